//! Outlook CLI
//!
//! A command-line client for an Outlook mailbox over Microsoft Graph, with a bulk purge
//! workflow for clearing out old mail.
//!
//! # Overview
//!
//! - **Authentication**: device-code sign-in with a persisted refresh-token record
//! - **Mailbox commands**: user, folders, list, read, move, delete, forward
//! - **Purge**: oldest-first paging, cutoff selection, batched concurrent deletes,
//!   a `QUIT` listener honoured between batches, and delimited progress output
//!
//! # Example Usage
//!
//! ```no_run
//! use outlook_cli::auth::StaticToken;
//! use outlook_cli::client::GraphClient;
//! use outlook_cli::config::Config;
//! use outlook_cli::purge::{CancellationFlag, PurgeConfig, PurgeWorker, RecordingReporter};
//! use std::sync::Arc;
//!
//! #[tokio::main]
//! async fn main() -> anyhow::Result<()> {
//!     let config = Config::default();
//!     let client = GraphClient::new(&config.graph, Arc::new(StaticToken("token".into())))?;
//!
//!     let cutoff = chrono::DateTime::parse_from_rfc3339("2024-01-01T00:00:00Z")?;
//!     let purge = PurgeConfig::new("inbox", cutoff).dry_run(true);
//!     let reporter = RecordingReporter::new();
//!
//!     let summary = PurgeWorker::new(Arc::new(client))
//!         .run(&purge, &CancellationFlag::new(), &reporter)
//!         .await?;
//!     println!("{} messages would be deleted", summary.total_affected);
//!     Ok(())
//! }
//! ```
//!
//! # Module Organization
//!
//! - [`auth`] - App registration, device-code sign-in, token refresh
//! - [`client`] - Graph client, gateway traits, paging cursor, retry
//! - [`cli`] - Command-line interface and command handlers
//! - [`config`] - Configuration management
//! - [`error`] - Error types and result aliases
//! - [`mailbox`] - Signed-in session with cached profile and folder tree
//! - [`models`] - Graph resources and purge references
//! - [`output`] - Pipe-delimited output formatting
//! - [`purge`] - Purge worker, batch deleter, cancellation, reporting
//! - [`query`] - OData filters, ordering, and date handling

pub mod auth;
pub mod cli;
pub mod client;
pub mod config;
pub mod error;
pub mod mailbox;
pub mod models;
pub mod output;
pub mod purge;
pub mod query;

pub use error::{OutlookError, Result};

pub use models::{MailFolder, Message, MessageRef, Page, User};

pub use config::{Config, GraphConfig, ListConfig, PurgeSettings};

pub use auth::{AppRegistration, AuthRecord, Authenticator, TokenSource};
pub use client::{GraphClient, MailClient, MailboxGateway, PageRequest};
pub use mailbox::Mailbox;

pub use purge::{
    BatchDeleter, CancellationFlag, CancellationListener, PurgeConfig, PurgeEvent, PurgeReporter,
    PurgeSummary, PurgeWorker,
};

pub use cli::{Cli, Commands, ProgressReporter};
