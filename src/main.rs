use anyhow::Result;
use clap::Parser;
use indicatif::{MultiProgress, ProgressDrawTarget};
use outlook_cli::cli::{self, Cli};
use outlook_cli::error::OutlookError;
use std::io::Write;
use std::process;
use std::sync::{Arc, Mutex};
use tracing_subscriber::fmt::MakeWriter;
use tracing_subscriber::EnvFilter;

/// A writer that prints through MultiProgress so log lines do not tear the spinners
#[derive(Clone)]
struct MultiProgressWriter {
    multi: Arc<MultiProgress>,
    buffer: Arc<Mutex<Vec<u8>>>,
}

impl MultiProgressWriter {
    fn new(multi: Arc<MultiProgress>) -> Self {
        Self {
            multi,
            buffer: Arc::new(Mutex::new(Vec::new())),
        }
    }
}

impl Write for MultiProgressWriter {
    fn write(&mut self, buf: &[u8]) -> std::io::Result<usize> {
        if let Ok(mut buffer) = self.buffer.lock() {
            buffer.extend_from_slice(buf);
        }
        Ok(buf.len())
    }

    fn flush(&mut self) -> std::io::Result<()> {
        let Ok(mut buffer) = self.buffer.lock() else {
            return Ok(());
        };
        if !buffer.is_empty() {
            let msg = String::from_utf8_lossy(&buffer);
            let msg = msg.trim_end_matches('\n');
            if !msg.is_empty() {
                // println is a no-op while hidden, fall back to plain stderr
                if self.multi.is_hidden() {
                    eprintln!("{}", msg);
                } else {
                    let _ = self.multi.println(msg);
                }
            }
            buffer.clear();
        }
        Ok(())
    }
}

impl Drop for MultiProgressWriter {
    fn drop(&mut self) {
        let _ = self.flush();
    }
}

#[derive(Clone)]
struct MultiProgressMakeWriter {
    multi: Arc<MultiProgress>,
}

impl<'a> MakeWriter<'a> for MultiProgressMakeWriter {
    type Writer = MultiProgressWriter;

    fn make_writer(&'a self) -> Self::Writer {
        MultiProgressWriter::new(Arc::clone(&self.multi))
    }
}

#[tokio::main]
async fn main() {
    if let Err(e) = run().await {
        display_error(&e);
        process::exit(1);
    }
}

async fn run() -> Result<()> {
    let cli = Cli::parse();

    let filter = if cli.verbose {
        EnvFilter::try_from_default_env()
            .unwrap_or_else(|_| EnvFilter::new("outlook_cli=debug,info"))
    } else {
        EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new("outlook_cli=info,warn"))
    };

    // Spinners and logs share stderr; stdout carries only delimited records
    let multi_progress = Arc::new(MultiProgress::with_draw_target(ProgressDrawTarget::stderr()));
    let make_writer = MultiProgressMakeWriter {
        multi: Arc::clone(&multi_progress),
    };

    tracing_subscriber::fmt()
        .with_env_filter(filter)
        .with_writer(make_writer)
        .with_target(false)
        .with_thread_ids(false)
        .with_file(false)
        .with_line_number(false)
        .init();

    cli::run_command(&cli, (*multi_progress).clone()).await?;
    Ok(())
}

/// Display error with context
fn display_error(error: &anyhow::Error) {
    eprintln!("Error: {}", error);

    let mut cause = error.source();
    while let Some(e) = cause {
        eprintln!("  Caused by: {}", e);
        cause = e.source();
    }

    if let Some(outlook_err) = error.downcast_ref::<OutlookError>() {
        match outlook_err {
            OutlookError::AuthError(_) => {
                eprintln!("\nHint: Your sign-in is missing or has expired.");
                eprintln!("      Try running: outlook-cli login --force");
            }
            OutlookError::RateLimitExceeded { .. } => {
                eprintln!("\nHint: Microsoft Graph is throttling requests.");
                eprintln!("      Wait a minute and try again.");
                eprintln!("      Consider reducing purge.max_concurrent_deletes in config.");
            }
            OutlookError::ServerError { .. } | OutlookError::NetworkError(_) => {
                eprintln!("\nHint: This may be a temporary service error.");
                eprintln!("      Try running the command again.");
            }
            OutlookError::ConfigError(_) => {
                eprintln!("\nHint: Check your configuration file for errors.");
                eprintln!("      Run: outlook-cli init-config --force");
            }
            _ => {}
        }
    }
}
