//! Operator-requested stop for a running purge

use std::io::{self, BufRead};
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::Arc;
use std::thread;
use tracing::{debug, info};

/// Shown on stderr once the operator asks to stop
pub const QUIT_MESSAGE: &str = "User requested quit. Finishing current batch...";

/// Set-once flag shared between the listener and the worker
#[derive(Debug, Clone, Default)]
pub struct CancellationFlag(Arc<AtomicBool>);

impl CancellationFlag {
    pub fn new() -> Self {
        Self::default()
    }

    /// Raise the flag; returns `true` only for the call that actually set it
    pub fn set(&self) -> bool {
        !self.0.swap(true, Ordering::SeqCst)
    }

    pub fn is_set(&self) -> bool {
        self.0.load(Ordering::SeqCst)
    }
}

/// Whether an input line asks to stop
pub fn is_quit(line: &str) -> bool {
    line.trim().eq_ignore_ascii_case("quit")
}

/// Watches operator input and raises a [`CancellationFlag`]
pub struct CancellationListener {
    flag: CancellationFlag,
}

impl CancellationListener {
    pub fn new(flag: CancellationFlag) -> Self {
        Self { flag }
    }

    /// Read lines until `QUIT` or end of input
    ///
    /// Returns whether `QUIT` was seen. Unrelated input is ignored.
    pub fn watch<R: BufRead>(&self, reader: R) -> bool {
        for line in reader.lines() {
            let Ok(line) = line else {
                break;
            };
            if is_quit(&line) {
                if self.flag.set() {
                    eprintln!("{}", QUIT_MESSAGE);
                    info!("Quit requested by operator");
                }
                return true;
            }
            debug!("Ignoring operator input {:?}", line.trim());
        }
        false
    }

    /// Listen on stdin from a dedicated OS thread
    ///
    /// The thread is detached: a blocking stdin read cannot be interrupted, and the process
    /// exits once the purge finishes.
    pub fn spawn_stdin(flag: CancellationFlag) -> io::Result<thread::JoinHandle<bool>> {
        thread::Builder::new()
            .name("purge-quit-listener".to_string())
            .spawn(move || CancellationListener::new(flag).watch(io::stdin().lock()))
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::io::Cursor;

    #[test]
    fn test_is_quit_variants() {
        assert!(is_quit("QUIT"));
        assert!(is_quit("quit"));
        assert!(is_quit("  Quit \r"));
        assert!(!is_quit("quit now"));
        assert!(!is_quit("q"));
        assert!(!is_quit(""));
    }

    #[test]
    fn test_flag_is_set_once() {
        let flag = CancellationFlag::new();
        assert!(!flag.is_set());
        assert!(flag.set());
        assert!(!flag.set());
        assert!(flag.is_set());

        let shared = flag.clone();
        assert!(shared.is_set());
    }

    #[test]
    fn test_listener_ignores_other_input() {
        let flag = CancellationFlag::new();
        let listener = CancellationListener::new(flag.clone());

        let seen = listener.watch(Cursor::new("hello\nstop\n\n"));
        assert!(!seen);
        assert!(!flag.is_set());
    }

    #[test]
    fn test_listener_sets_flag_on_quit() {
        let flag = CancellationFlag::new();
        let listener = CancellationListener::new(flag.clone());

        let seen = listener.watch(Cursor::new("status\n  qUiT  \nmore\n"));
        assert!(seen);
        assert!(flag.is_set());
    }

    #[test]
    fn test_listener_on_thread() {
        let flag = CancellationFlag::new();
        let listener_flag = flag.clone();
        let handle = thread::spawn(move || {
            CancellationListener::new(listener_flag).watch(Cursor::new("QUIT\n"))
        });
        assert!(handle.join().unwrap());
        assert!(flag.is_set());
    }
}
