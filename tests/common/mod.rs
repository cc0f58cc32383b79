//! Common test utilities and fixtures
#![allow(dead_code)]

use async_trait::async_trait;
use chrono::{DateTime, Duration, FixedOffset, TimeZone, Utc};
use mockall::mock;
use outlook_cli::client::{MailClient, MailboxGateway, PageRequest};
use outlook_cli::error::{OutlookError, Result};
use outlook_cli::models::{MailFolder, Message, MessageRef, Page, User};
use outlook_cli::purge::{CancellationFlag, PurgeEvent, PurgeSummary};
use outlook_cli::query::MessageQuery;
use serde_json::json;
use std::collections::HashSet;
use std::sync::atomic::{AtomicUsize, Ordering};
use std::sync::Mutex;

/// Cutoff used by most purge scenarios: 2024-01-01 local midnight at UTC-5
pub fn cutoff() -> DateTime<FixedOffset> {
    FixedOffset::west_opt(5 * 3600)
        .unwrap()
        .with_ymd_and_hms(2024, 1, 1, 0, 0, 0)
        .unwrap()
}

/// A reference received `days` days before the cutoff (negative means after it)
pub fn message_days_before_cutoff(id: &str, days: i64) -> MessageRef {
    MessageRef {
        id: id.to_string(),
        received: cutoff().with_timezone(&Utc) - Duration::days(days),
        folder_id: "inbox".to_string(),
        subject: Some(format!("Subject {}", id)),
    }
}

pub fn create_test_folder(id: &str, name: &str, children: i32) -> MailFolder {
    MailFolder {
        id: id.to_string(),
        display_name: Some(name.to_string()),
        child_folder_count: Some(children),
        total_item_count: Some(0),
        unread_item_count: Some(0),
        ..Default::default()
    }
}

/// Graph JSON for a message as returned with the purge `$select`
pub fn graph_message_json(id: &str, received: &str, folder: &str) -> serde_json::Value {
    json!({
        "id": id,
        "subject": format!("Subject {}", id),
        "receivedDateTime": received,
        "parentFolderId": folder,
    })
}

/// Graph collection envelope
pub fn graph_collection(values: Vec<serde_json::Value>, next_link: Option<&str>) -> serde_json::Value {
    let mut body = json!({ "value": values });
    if let Some(link) = next_link {
        body["@odata.nextLink"] = json!(link);
    }
    body
}

/// The single summary of a run, panicking if there is not exactly one
pub fn only_summary(events: &[PurgeEvent]) -> PurgeSummary {
    let summaries: Vec<&PurgeSummary> = events
        .iter()
        .filter_map(|e| match e {
            PurgeEvent::Summary(s) => Some(s),
            _ => None,
        })
        .collect();
    assert_eq!(summaries.len(), 1, "expected exactly one summary: {:?}", events);
    summaries[0].clone()
}

pub fn progress_events(events: &[PurgeEvent]) -> Vec<outlook_cli::purge::ProgressEvent> {
    events
        .iter()
        .filter_map(|e| match e {
            PurgeEvent::Progress(p) => Some(*p),
            _ => None,
        })
        .collect()
}

/// In-memory folder that behaves like Graph for the purge workflow
///
/// Pages oldest first with a keyset token, so deletions between pages never skip messages.
/// Deleted messages disappear from later listings.
#[derive(Default)]
pub struct FakeMailbox {
    messages: Mutex<Vec<MessageRef>>,
    failing: HashSet<String>,
    fail_listing_on_call: Option<usize>,
    cancel_after_deletes: Mutex<Option<(usize, CancellationFlag)>>,
    folders: Vec<(Option<String>, MailFolder)>,
    pub list_calls: AtomicUsize,
    pub delete_calls: Mutex<Vec<String>>,
    pub user_calls: AtomicUsize,
    pub folder_calls: AtomicUsize,
    pub forwarded: Mutex<Vec<String>>,
}

impl FakeMailbox {
    pub fn new(mut messages: Vec<MessageRef>) -> Self {
        messages.sort_by(|a, b| a.received.cmp(&b.received).then_with(|| a.id.cmp(&b.id)));
        Self {
            messages: Mutex::new(messages),
            ..Default::default()
        }
    }

    /// Deletes of these ids fail with a 404-style error
    pub fn failing(mut self, ids: &[&str]) -> Self {
        self.failing = ids.iter().map(|s| s.to_string()).collect();
        self
    }

    /// The nth `list_page` call (1-based) fails with a server error
    pub fn fail_listing_on_call(mut self, call: usize) -> Self {
        self.fail_listing_on_call = Some(call);
        self
    }

    /// Raise `flag` once `deletes` deletes have been issued
    pub fn cancel_after_deletes(self, deletes: usize, flag: CancellationFlag) -> Self {
        *self.cancel_after_deletes.lock().unwrap() = Some((deletes, flag));
        self
    }

    /// Add a folder under `parent` (`None` for top level)
    pub fn with_folder(mut self, parent: Option<&str>, folder: MailFolder) -> Self {
        self.folders.push((parent.map(str::to_string), folder));
        self
    }

    fn children_of(&self, parent: Option<&str>) -> Vec<MailFolder> {
        self.folders
            .iter()
            .filter(|(p, _)| p.as_deref() == parent)
            .map(|(_, f)| f.clone())
            .collect()
    }

    pub fn remaining_ids(&self) -> Vec<String> {
        self.messages
            .lock()
            .unwrap()
            .iter()
            .map(|m| m.id.clone())
            .collect()
    }

    pub fn deleted_ids(&self) -> Vec<String> {
        self.delete_calls.lock().unwrap().clone()
    }

    fn key(message: &MessageRef) -> String {
        format!("{}|{}", message.received.to_rfc3339(), message.id)
    }
}

#[async_trait]
impl MailboxGateway for FakeMailbox {
    async fn list_page(&self, _folder_id: &str, request: &PageRequest) -> Result<Page<MessageRef>> {
        let call = self.list_calls.fetch_add(1, Ordering::SeqCst) + 1;
        if self.fail_listing_on_call == Some(call) {
            return Err(OutlookError::ServerError {
                status: 500,
                message: "listing failed".to_string(),
            });
        }

        let messages = self.messages.lock().unwrap();
        let matching: Vec<&MessageRef> = messages
            .iter()
            .filter(|m| request.received_before.map_or(true, |b| m.received < b))
            .filter(|m| {
                request
                    .page_token
                    .as_deref()
                    .map_or(true, |token| Self::key(m).as_str() > token)
            })
            .collect();

        let items: Vec<MessageRef> = matching
            .iter()
            .take(request.page_size)
            .map(|m| (*m).clone())
            .collect();
        let next_page_token = if matching.len() > items.len() {
            items.last().map(Self::key)
        } else {
            None
        };

        Ok(Page {
            items,
            next_page_token,
        })
    }

    async fn delete_message(&self, message_id: &str) -> Result<()> {
        let issued = {
            let mut calls = self.delete_calls.lock().unwrap();
            calls.push(message_id.to_string());
            calls.len()
        };
        if let Some((after, flag)) = self.cancel_after_deletes.lock().unwrap().as_ref() {
            if issued >= *after {
                flag.set();
            }
        }

        if self.failing.contains(message_id) {
            return Err(OutlookError::MessageNotFound(message_id.to_string()));
        }
        self.messages.lock().unwrap().retain(|m| m.id != message_id);
        Ok(())
    }

    async fn move_message(&self, _message_id: &str, _destination_id: &str) -> Result<()> {
        Ok(())
    }
}

#[async_trait]
impl MailClient for FakeMailbox {
    async fn get_user(&self) -> Result<User> {
        self.user_calls.fetch_add(1, Ordering::SeqCst);
        Ok(User {
            name: "Test User".to_string(),
            addr: "test@example.com".to_string(),
        })
    }

    async fn list_folders(&self) -> Result<Vec<MailFolder>> {
        self.folder_calls.fetch_add(1, Ordering::SeqCst);
        Ok(self.children_of(None))
    }

    async fn list_child_folders(&self, parent_id: &str) -> Result<Vec<MailFolder>> {
        self.folder_calls.fetch_add(1, Ordering::SeqCst);
        Ok(self.children_of(Some(parent_id)))
    }

    async fn list_messages(&self, _folder_id: &str, query: &MessageQuery) -> Result<(Vec<Message>, bool)> {
        let messages = self.messages.lock().unwrap();
        let listed: Vec<Message> = messages
            .iter()
            .take(query.top as usize)
            .map(|m| Message {
                id: Some(m.id.clone()),
                subject: m.subject.clone(),
                received_date_time: Some(m.received),
                ..Default::default()
            })
            .collect();
        Ok((listed, messages.len() > query.top as usize))
    }

    async fn get_message(&self, message_id: &str) -> Result<Message> {
        Err(OutlookError::MessageNotFound(message_id.to_string()))
    }

    async fn forward_message(&self, message_id: &str, to: &[String], _comment: Option<&str>) -> Result<()> {
        if to.is_empty() {
            return Err(OutlookError::BadRequest("At least one recipient is required".to_string()));
        }
        self.forwarded.lock().unwrap().push(message_id.to_string());
        Ok(())
    }
}

// Mock implementation of the purge gateway for testing
mock! {
    pub Gateway {}

    #[async_trait]
    impl MailboxGateway for Gateway {
        async fn list_page(&self, folder_id: &str, request: &PageRequest) -> Result<Page<MessageRef>>;
        async fn delete_message(&self, message_id: &str) -> Result<()>;
        async fn move_message(&self, message_id: &str, destination_id: &str) -> Result<()>;
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_message_days_before_cutoff() {
        let message = message_days_before_cutoff("m1", 2);
        assert!(message.received < cutoff().with_timezone(&Utc));
        let later = message_days_before_cutoff("m2", -1);
        assert!(later.received > cutoff().with_timezone(&Utc));
    }

    #[test]
    fn test_graph_collection() {
        let body = graph_collection(vec![json!({"id": "a"})], Some("https://next"));
        assert_eq!(body["value"].as_array().unwrap().len(), 1);
        assert_eq!(body["@odata.nextLink"], "https://next");
    }

    #[tokio::test]
    async fn test_fake_mailbox_pages_by_key() {
        let fake = FakeMailbox::new((0..5).map(|i| message_days_before_cutoff(&format!("m{}", i), 10 - i)).collect());
        let mut request = PageRequest {
            received_before: None,
            page_size: 2,
            page_token: None,
        };

        let first = fake.list_page("inbox", &request).await.unwrap();
        assert_eq!(first.items.len(), 2);
        fake.delete_message(&first.items[0].id).await.unwrap();

        request.page_token = first.next_page_token;
        let second = fake.list_page("inbox", &request).await.unwrap();
        assert_eq!(second.items[0].id, "m2");
    }
}
