//! A signed-in mailbox session
//!
//! The profile and the folder tree are loaded once and shared by all commands. They can be
//! warmed up in background tasks so the first command that needs them does not wait.

use futures::future::{BoxFuture, FutureExt};
use futures::stream::{self, StreamExt};
use std::sync::Arc;
use tokio::sync::OnceCell;
use tracing::debug;

use crate::client::{MailClient, MailboxGateway};
use crate::error::Result;
use crate::models::{MailFolder, Message, User};
use crate::query::MessageQuery;

/// Folders that never hold mail worth listing
pub const EXCLUDED_FOLDERS: &[&str] = &[
    "Conversation History",
    "Drafts",
    "Outbox",
    "RSS Subscriptions",
    "Sent Items",
];

/// Names Graph resolves itself, no lookup needed
const WELL_KNOWN_FOLDERS: &[&str] = &[
    "inbox",
    "archive",
    "deleteditems",
    "drafts",
    "junkemail",
    "outbox",
    "sentitems",
    "msgfolderroot",
];

/// Parallel requests for multi-id commands
const COMMAND_CONCURRENCY: usize = 8;

pub fn is_excluded_folder(folder: &MailFolder) -> bool {
    folder
        .display_name
        .as_deref()
        .map(|name| EXCLUDED_FOLDERS.iter().any(|excluded| excluded.eq_ignore_ascii_case(name.trim())))
        .unwrap_or(false)
}

/// Depth-first walk yielding each folder's descendants before the folder itself
fn collect_tree<C: MailClient + ?Sized>(client: &C, level: Vec<MailFolder>) -> BoxFuture<'_, Result<Vec<MailFolder>>> {
    async move {
        let mut ordered = Vec::new();
        for folder in level {
            if is_excluded_folder(&folder) {
                continue;
            }
            if folder.child_folder_count.unwrap_or(0) > 0 {
                let children = client.list_child_folders(&folder.id).await?;
                ordered.extend(collect_tree(client, children).await?);
            }
            ordered.push(folder);
        }
        Ok(ordered)
    }
    .boxed()
}

/// Load the whole folder tree, children before parents
pub async fn load_folders<C: MailClient + ?Sized>(client: &C) -> Result<Vec<MailFolder>> {
    let top = client.list_folders().await?;
    collect_tree(client, top).await
}

pub struct Mailbox<C: MailClient + 'static> {
    client: Arc<C>,
    user: Arc<OnceCell<User>>,
    folders: Arc<OnceCell<Vec<MailFolder>>>,
}

impl<C: MailClient + 'static> Mailbox<C> {
    pub fn new(client: Arc<C>) -> Self {
        Self {
            client,
            user: Arc::new(OnceCell::new()),
            folders: Arc::new(OnceCell::new()),
        }
    }

    /// Create the session and start loading the profile and folders in the background
    pub fn preloaded(client: Arc<C>) -> Self {
        let mailbox = Self::new(client);
        mailbox.preload();
        mailbox
    }

    /// Spawn background loads; a failed preload is retried on first use
    pub fn preload(&self) {
        let client = Arc::clone(&self.client);
        let user = Arc::clone(&self.user);
        tokio::spawn(async move {
            if let Err(e) = user.get_or_try_init(|| client.get_user()).await {
                debug!("Profile preload failed: {}", e);
            }
        });

        let client = Arc::clone(&self.client);
        let folders = Arc::clone(&self.folders);
        tokio::spawn(async move {
            if let Err(e) = folders.get_or_try_init(|| load_folders(client.as_ref())).await {
                debug!("Folder preload failed: {}", e);
            }
        });
    }

    pub fn client(&self) -> &Arc<C> {
        &self.client
    }

    /// The client as a purge gateway
    pub fn gateway(&self) -> Arc<dyn MailboxGateway> {
        Arc::clone(&self.client) as Arc<dyn MailboxGateway>
    }

    pub async fn user(&self) -> Result<User> {
        self.user
            .get_or_try_init(|| self.client.get_user())
            .await
            .cloned()
    }

    pub async fn folders(&self) -> Result<&[MailFolder]> {
        self.folders
            .get_or_try_init(|| load_folders(self.client.as_ref()))
            .await
            .map(Vec::as_slice)
    }

    /// Map a folder argument to something Graph accepts
    ///
    /// Well-known names pass through, display names are looked up, anything else is
    /// assumed to be a folder id.
    pub async fn resolve_folder(&self, folder: &str) -> Result<String> {
        let trimmed = folder.trim();
        if WELL_KNOWN_FOLDERS.iter().any(|name| name.eq_ignore_ascii_case(trimmed)) {
            return Ok(trimmed.to_lowercase());
        }

        let found = self
            .folders()
            .await?
            .iter()
            .find(|f| {
                f.display_name
                    .as_deref()
                    .map_or(false, |name| name.trim().eq_ignore_ascii_case(trimmed))
            })
            .map(|f| f.id.clone());

        Ok(found.unwrap_or_else(|| trimmed.to_string()))
    }

    pub async fn list_messages(&self, folder: &str, query: &MessageQuery) -> Result<(Vec<Message>, bool)> {
        let folder_id = self.resolve_folder(folder).await?;
        self.client.list_messages(&folder_id, query).await
    }

    pub async fn get_message(&self, message_id: &str) -> Result<Message> {
        self.client.get_message(message_id).await
    }

    /// Move each message, reporting per-id outcomes in input order
    pub async fn move_messages(&self, ids: &[String], destination: &str) -> Result<Vec<(String, Result<()>)>> {
        let destination_id = self.resolve_folder(destination).await?;
        let client = self.client.as_ref();
        let destination_id = destination_id.as_str();

        Ok(stream::iter(ids)
            .map(|id| async move { (id.clone(), client.move_message(id, destination_id).await) })
            .buffered(COMMAND_CONCURRENCY)
            .collect()
            .await)
    }

    /// Delete each message, reporting per-id outcomes in input order
    pub async fn delete_messages(&self, ids: &[String]) -> Vec<(String, Result<()>)> {
        let client = self.client.as_ref();
        stream::iter(ids)
            .map(|id| async move { (id.clone(), client.delete_message(id).await) })
            .buffered(COMMAND_CONCURRENCY)
            .collect()
            .await
    }

    pub async fn forward_message(&self, message_id: &str, to: &[String], comment: Option<&str>) -> Result<()> {
        self.client.forward_message(message_id, to, comment).await
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn folder(name: &str) -> MailFolder {
        MailFolder {
            id: name.to_lowercase(),
            display_name: Some(name.to_string()),
            ..Default::default()
        }
    }

    #[test]
    fn test_excluded_folders() {
        assert!(is_excluded_folder(&folder("Sent Items")));
        assert!(is_excluded_folder(&folder("drafts")));
        assert!(is_excluded_folder(&folder("RSS Subscriptions")));
        assert!(!is_excluded_folder(&folder("Inbox")));
        assert!(!is_excluded_folder(&MailFolder::default()));
    }
}
