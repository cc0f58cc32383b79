//! Command-line interface

use chrono::Local;
use clap::{Args, Parser, Subcommand};
use indicatif::{MultiProgress, ProgressBar, ProgressStyle};
use std::io;
use std::path::{Path, PathBuf};
use std::sync::Arc;
use std::time::Duration;
use tracing::info;

use crate::auth::{AppRegistration, AuthRecord, Authenticator};
use crate::client::GraphClient;
use crate::config::Config;
use crate::error::{OutlookError, Result};
use crate::mailbox::Mailbox;
use crate::output;
use crate::purge::{
    CancellationFlag, CancellationListener, DelimitedReporter, PurgeConfig, PurgeSummary,
    PurgeWorker,
};
use crate::query::{self, Day, MessageQuery};

#[derive(Parser, Debug)]
#[command(name = "outlook-cli")]
#[command(version)]
#[command(about = "Outlook mailbox client for Microsoft Graph with bulk purge", long_about = None)]
pub struct Cli {
    /// Path to configuration file
    #[arg(short, long, default_value = "config.toml")]
    pub config: PathBuf,

    /// Path to the app registration file
    #[arg(long, default_value = ".auth.json")]
    pub auth_config: PathBuf,

    /// Path to the saved sign-in record
    #[arg(long, default_value = ".outlook/auth_record.json")]
    pub auth_record: PathBuf,

    /// Verbose logging
    #[arg(short, long)]
    pub verbose: bool,

    #[command(subcommand)]
    pub command: Commands,
}

#[derive(Subcommand, Debug)]
pub enum Commands {
    /// Sign in with a device code
    Login {
        /// Sign in again even if already signed in
        #[arg(long)]
        force: bool,
    },

    /// Forget the saved sign-in
    Logout,

    /// Show the signed-in user
    User,

    /// List mail folders, nested folders included
    Folders,

    /// List messages in a folder
    List(ListArgs),

    /// Show one message with its body
    Read {
        /// Message id
        id: String,
    },

    /// Move messages to a folder
    Move {
        /// Message ids followed by the destination folder
        #[arg(required = true, num_args = 2.., value_name = "ID... FOLDER")]
        args: Vec<String>,
    },

    /// Delete messages (moves them to Deleted Items)
    Delete {
        /// Message ids
        #[arg(required = true, num_args = 1..)]
        ids: Vec<String>,
    },

    /// Forward a message
    Forward {
        /// Message id
        id: String,

        /// Recipient addresses
        #[arg(long, required = true, num_args = 1..)]
        to: Vec<String>,

        /// Text placed above the forwarded message
        #[arg(long)]
        comment: Option<String>,
    },

    /// Delete every message received before a date, in batches
    Purge(PurgeArgs),

    /// Generate example configuration file
    InitConfig {
        /// Path to create config file
        #[arg(short, long, default_value = "config.toml")]
        output: PathBuf,

        /// Overwrite existing file
        #[arg(long)]
        force: bool,
    },
}

#[derive(Args, Debug)]
pub struct ListArgs {
    /// Folder name or id
    #[arg(default_value = "inbox")]
    pub folder: String,

    /// Number of messages (defaults to list.top from the config)
    #[arg(short, long)]
    pub top: Option<u32>,

    /// Oldest messages first
    #[arg(long)]
    pub oldest_first: bool,

    /// Only messages received today (local time)
    #[arg(long, conflicts_with = "yesterday")]
    pub today: bool,

    /// Only messages received yesterday (local time)
    #[arg(long)]
    pub yesterday: bool,
}

#[derive(Args, Debug)]
pub struct PurgeArgs {
    /// Folder name or id
    #[arg(default_value = "inbox")]
    pub folder: String,

    /// Show what would be deleted without deleting
    #[arg(long)]
    pub dry_run: bool,

    /// Messages per batch (defaults to purge.batch_size from the config)
    #[arg(long)]
    pub batch_size: Option<usize>,

    /// Delete messages received before this date, YYYY-MM-DD in local time
    #[arg(long)]
    pub before_date: Option<String>,
}

/// Spinners on stderr, sharing the MultiProgress the log writer prints through
pub struct ProgressReporter {
    multi: MultiProgress,
    spinner_style: ProgressStyle,
}

impl ProgressReporter {
    pub fn with_multi_progress(multi: MultiProgress) -> Self {
        let spinner_style = ProgressStyle::default_spinner()
            .template("{spinner:.green} [{elapsed:>6}] {msg}")
            .unwrap_or_else(|_| ProgressStyle::default_spinner())
            .tick_chars("⠁⠂⠄⡀⢀⠠⠐⠈ ");

        Self {
            multi,
            spinner_style,
        }
    }

    pub fn multi_progress(&self) -> &MultiProgress {
        &self.multi
    }

    pub fn add_spinner(&self, msg: &str) -> ProgressBar {
        let pb = self.multi.add(ProgressBar::new_spinner());
        pb.set_style(self.spinner_style.clone());
        pb.set_message(msg.to_string());
        pb.enable_steady_tick(Duration::from_millis(100));
        pb
    }

    /// Finish a spinner and clear it from the multi-progress display
    pub fn finish_spinner(&self, pb: &ProgressBar, msg: &str) {
        pb.finish_and_clear();
        info!("{}", msg);
    }

    /// Print a human-facing line on stderr without tearing the spinners
    pub fn notice(&self, msg: &str) {
        self.multi.suspend(|| eprintln!("{}", msg));
    }
}

/// Split `ID... FOLDER`
fn split_move_args(args: &[String]) -> Result<(&[String], &str)> {
    match args.split_last() {
        Some((folder, ids)) if !ids.is_empty() => Ok((ids, folder.as_str())),
        _ => Err(OutlookError::BadRequest(
            "move needs at least one message id and a destination folder".to_string(),
        )),
    }
}

/// Lines printed before the purge event stream
pub fn purge_header(folder: &str, config: &PurgeConfig) -> Vec<String> {
    vec![
        format!(
            "{}Purging emails from folder '{}' before {}",
            if config.dry_run { "DRY-RUN: " } else { "" },
            folder,
            config.cutoff.to_rfc3339()
        ),
        format!("Batch size: {}", config.batch_size),
        "Type 'QUIT' (case-insensitive) and press Enter to finish current batch and exit"
            .to_string(),
        "-".repeat(60),
    ]
}

async fn open_authenticator(cli: &Cli, config: &Config) -> Result<Authenticator> {
    let registration = AppRegistration::resolve(&cli.auth_config).await?;
    let http = reqwest::Client::builder()
        .timeout(Duration::from_secs(config.graph.request_timeout_secs))
        .build()
        .map_err(|e| OutlookError::ConfigError(format!("Failed to build HTTP client: {}", e)))?;
    Authenticator::new(http, &config.graph.authority, registration, cli.auth_record.clone()).await
}

async fn open_mailbox(cli: &Cli, config: &Config) -> Result<Mailbox<GraphClient>> {
    let authenticator = open_authenticator(cli, config).await?;
    if !authenticator.is_signed_in().await {
        return Err(OutlookError::AuthError(
            "Not logged in. Run 'outlook-cli login' first".to_string(),
        ));
    }
    let client = GraphClient::new(&config.graph, Arc::new(authenticator))?;
    Ok(Mailbox::preloaded(Arc::new(client)))
}

/// Execute the parsed command
pub async fn run_command(cli: &Cli, multi: MultiProgress) -> Result<()> {
    let reporter = ProgressReporter::with_multi_progress(multi);

    if let Commands::InitConfig { output, force } = &cli.command {
        return init_config(output, *force).await;
    }
    if let Commands::Logout = &cli.command {
        let removed = AuthRecord::delete(&cli.auth_record).await?;
        info!("Sign-in record {}", if removed { "removed" } else { "was not present" });
        println!("OK|logged-out");
        return Ok(());
    }

    let config = Config::load(&cli.config).await?;

    if let Commands::Login { force } = &cli.command {
        return login(cli, &config, *force, &reporter).await;
    }

    let mailbox = open_mailbox(cli, &config).await?;

    match &cli.command {
        Commands::User => {
            let user = mailbox.user().await?;
            println!("{}", output::user_line(&user));
        }

        Commands::Folders => {
            let spinner = reporter.add_spinner("Loading folders...");
            let folders = mailbox.folders().await?;
            reporter.finish_spinner(&spinner, &format!("Loaded {} folders", folders.len()));
            for folder in folders {
                println!("{}", output::folder_line(folder));
            }
        }

        Commands::List(args) => {
            let filter = match (args.today, args.yesterday) {
                (true, _) => Some(Day::Today),
                (_, true) => Some(Day::Yesterday),
                _ => None,
            }
            .map(|day| {
                query::day_window(day, &Local::now())
                    .map(|(start, end)| query::received_between_filter(&start, &end))
            })
            .transpose()?;

            let message_query = MessageQuery::new(args.top.unwrap_or(config.list.top))
                .oldest_first(args.oldest_first)
                .with_filter(filter);
            let (messages, more) = mailbox.list_messages(&args.folder, &message_query).await?;
            for message in &messages {
                println!("{}", output::message_line(message));
            }
            println!("{}", output::more_line(more));
        }

        Commands::Read { id } => {
            let message = mailbox.get_message(id).await?;
            for line in output::read_output(&message) {
                println!("{}", line);
            }
        }

        Commands::Move { args } => {
            let (ids, folder) = split_move_args(args)?;
            for (id, result) in mailbox.move_messages(ids, folder).await? {
                match result {
                    Ok(()) => println!("{}", output::ok_line(&["moved", &id, "to", folder])),
                    Err(e) => println!("{}", output::failed_line(&["moved", &id, &e.to_string()])),
                }
            }
        }

        Commands::Delete { ids } => {
            for (id, result) in mailbox.delete_messages(ids).await {
                match result {
                    Ok(()) => println!("{}", output::ok_line(&["deleted", &id])),
                    Err(e) => println!("{}", output::failed_line(&["deleted", &id, &e.to_string()])),
                }
            }
        }

        Commands::Forward { id, to, comment } => {
            mailbox.forward_message(id, to, comment.as_deref()).await?;
            println!("{}", output::ok_line(&["forwarded", id, "to", &to.join(",")]));
        }

        Commands::Purge(args) => {
            run_purge(&mailbox, &config, args, &reporter).await?;
        }

        Commands::Login { .. } | Commands::Logout | Commands::InitConfig { .. } => {}
    }

    Ok(())
}

async fn login(cli: &Cli, config: &Config, force: bool, reporter: &ProgressReporter) -> Result<()> {
    let authenticator = open_authenticator(cli, config).await?;

    if authenticator.is_signed_in().await && !force {
        info!(
            "Already signed in as {}",
            authenticator.username().await.unwrap_or_default()
        );
        println!("OK|authenticated");
        return Ok(());
    }

    let code = authenticator.request_device_code().await?;
    reporter.notice(&code.instructions());

    let spinner = reporter.add_spinner("Waiting for sign-in to complete...");
    let record = authenticator.complete_device_code(&code).await;
    spinner.finish_and_clear();
    let record = record?;

    info!("Signed in as {}", record.username);
    println!("OK|authenticated");
    Ok(())
}

/// Run the purge workflow with a stdin `QUIT` listener
pub async fn run_purge(
    mailbox: &Mailbox<GraphClient>,
    config: &Config,
    args: &PurgeArgs,
    reporter: &ProgressReporter,
) -> Result<PurgeSummary> {
    let before_date = args
        .before_date
        .clone()
        .unwrap_or_else(|| config.purge.before_date.clone());
    let cutoff = query::parse_before_date(&before_date, &Local)?;
    let folder_id = mailbox.resolve_folder(&args.folder).await?;

    let purge_config = PurgeConfig::new(folder_id, cutoff)
        .batch_size(args.batch_size.unwrap_or(config.purge.batch_size))
        .dry_run(args.dry_run)
        .max_concurrency(config.purge.max_concurrent_deletes)
        .page_size(config.purge.page_size);
    purge_config.validate()?;

    for line in purge_header(&args.folder, &purge_config) {
        println!("{}", line);
    }

    let cancel = CancellationFlag::new();
    CancellationListener::spawn_stdin(cancel.clone())?;

    let spinner = reporter
        .multi_progress()
        .add(ProgressBar::new_spinner());
    spinner.set_message("Scanning...");
    let sink = DelimitedReporter::new(io::stdout()).with_spinner(spinner);

    PurgeWorker::new(mailbox.gateway())
        .run(&purge_config, &cancel, &sink)
        .await
}

async fn init_config(output: &Path, force: bool) -> Result<()> {
    if output.exists() && !force {
        return Err(OutlookError::ConfigError(format!(
            "Configuration file already exists at {:?}. Use --force to overwrite.",
            output
        )));
    }

    Config::create_example(output).await?;

    println!("Created example configuration file at: {:?}", output);
    println!("\nKey settings to review:");
    println!("  - purge.before_date: Messages received before this date are purged");
    println!("  - purge.batch_size: Messages deleted per batch");
    println!("  - purge.max_concurrent_deletes: Parallel delete requests per batch");
    Ok(())
}
