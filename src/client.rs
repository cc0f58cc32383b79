//! Microsoft Graph mail client with retry logic

use async_trait::async_trait;
use base64::engine::general_purpose::URL_SAFE_NO_PAD;
use base64::Engine;
use chrono::{DateTime, Utc};
use reqwest::{Response, Url};
use serde::de::DeserializeOwned;
use serde::{Deserialize, Serialize};
use serde_json::json;
use std::sync::Arc;
use std::time::Duration;
use tracing::{debug, warn};

use crate::auth::TokenSource;
use crate::config::GraphConfig;
use crate::error::{OutlookError, Result};
use crate::models::{Collection, MailFolder, Message, MessageRef, Page, Recipient, User, UserProfile};
use crate::query::{self, MessageQuery, PURGE_SELECT_FIELDS};

/// Page size used when walking folder collections
const FOLDER_PAGE_SIZE: &str = "100";

/// Ceiling for a single backoff sleep
const MAX_RETRY_DELAY: Duration = Duration::from_secs(30);

/// Largest `$top` Graph accepts on a message listing
pub const MAX_PAGE_TOP: usize = 1000;

/// Query for one page of a purge scan
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct PageRequest {
    /// Only messages received strictly before this instant
    pub received_before: Option<DateTime<Utc>>,
    pub page_size: usize,
    /// Token returned by the previous page, `None` for the first page
    pub page_token: Option<String>,
}

/// The mailbox operations the purge workflow depends on
///
/// Listing is oldest first. A page token is opaque to callers and stays valid while
/// messages from earlier pages are being deleted.
#[async_trait]
pub trait MailboxGateway: Send + Sync {
    /// Fetch one page of message references from a folder
    async fn list_page(&self, folder_id: &str, request: &PageRequest) -> Result<Page<MessageRef>>;

    /// Delete a single message (moves it to Deleted Items)
    async fn delete_message(&self, message_id: &str) -> Result<()>;

    /// Move a single message to another folder
    async fn move_message(&self, message_id: &str, destination_id: &str) -> Result<()>;
}

/// Everything the interactive commands need on top of the gateway
#[async_trait]
pub trait MailClient: MailboxGateway {
    async fn get_user(&self) -> Result<User>;

    /// Top-level folders, hidden ones included
    async fn list_folders(&self) -> Result<Vec<MailFolder>>;

    async fn list_child_folders(&self, parent_id: &str) -> Result<Vec<MailFolder>>;

    /// One page of messages plus whether more exist
    async fn list_messages(&self, folder_id: &str, query: &MessageQuery) -> Result<(Vec<Message>, bool)>;

    /// A single message including its body
    async fn get_message(&self, message_id: &str) -> Result<Message>;

    async fn forward_message(
        &self,
        message_id: &str,
        to: &[String],
        comment: Option<&str>,
    ) -> Result<()>;
}

/// Keyset position inside a purge scan
///
/// `after` is the received time of the last message handed out; `seen` are the ids at exactly
/// that instant which were already returned. Deleting earlier messages never shifts it.
/// `next_link` is set only when `seen` filled a whole page; the scan then continues from
/// Graph's own `@odata.nextLink` until it gets past the tie.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct PageCursor {
    pub after: DateTime<Utc>,
    pub seen: Vec<String>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub next_link: Option<String>,
}

impl PageCursor {
    pub fn encode(&self) -> Result<String> {
        Ok(URL_SAFE_NO_PAD.encode(serde_json::to_vec(self)?))
    }

    pub fn decode(token: &str) -> Result<Self> {
        let bytes = URL_SAFE_NO_PAD
            .decode(token)
            .map_err(|e| OutlookError::InvalidResponse(format!("Malformed page token: {}", e)))?;
        Ok(serde_json::from_slice(&bytes)?)
    }
}

/// Cursor following `kept`, the references handed out for the current page
pub fn next_cursor(previous: Option<&PageCursor>, kept: &[MessageRef]) -> Option<PageCursor> {
    let last = kept.last()?.received;
    let mut seen: Vec<String> = match previous {
        Some(prev) if prev.after == last => prev.seen.clone(),
        _ => Vec::new(),
    };
    seen.extend(
        kept.iter()
            .filter(|m| m.received == last)
            .map(|m| m.id.clone()),
    );
    Some(PageCursor {
        after: last,
        seen,
        next_link: None,
    })
}

/// Graph REST client
pub struct GraphClient {
    http: reqwest::Client,
    base_url: Url,
    tokens: Arc<dyn TokenSource>,
    max_retries: u32,
    retry_base_delay: Duration,
}

impl GraphClient {
    /// Create a client for the configured Graph endpoint
    pub fn new(config: &GraphConfig, tokens: Arc<dyn TokenSource>) -> Result<Self> {
        let http = reqwest::Client::builder()
            .timeout(Duration::from_secs(config.request_timeout_secs))
            .build()
            .map_err(|e| OutlookError::ConfigError(format!("Failed to build HTTP client: {}", e)))?;
        Self::with_http(http, &config.base_url, tokens, config.max_retries)
    }

    pub fn with_http(
        http: reqwest::Client,
        base_url: &str,
        tokens: Arc<dyn TokenSource>,
        max_retries: u32,
    ) -> Result<Self> {
        let base_url = Url::parse(base_url)
            .map_err(|e| OutlookError::ConfigError(format!("Invalid Graph base URL: {}", e)))?;
        Ok(Self {
            http,
            base_url,
            tokens,
            max_retries,
            retry_base_delay: Duration::from_secs(1),
        })
    }

    /// Override the first backoff delay (tests use milliseconds)
    pub fn with_retry_base_delay(mut self, delay: Duration) -> Self {
        self.retry_base_delay = delay;
        self
    }

    fn endpoint(&self, segments: &[&str]) -> Result<Url> {
        let mut url = self.base_url.clone();
        url.path_segments_mut()
            .map_err(|_| OutlookError::ConfigError("Graph base URL cannot be a base".to_string()))?
            .pop_if_empty()
            .extend(segments);
        Ok(url)
    }

    fn folder_url(&self, segments: &[&str]) -> Result<Url> {
        let mut url = self.endpoint(segments)?;
        url.query_pairs_mut()
            .append_pair("includeHiddenFolders", "true")
            .append_pair("$top", FOLDER_PAGE_SIZE);
        Ok(url)
    }

    async fn get_json<T: DeserializeOwned>(&self, url: Url) -> Result<T> {
        let token = self.tokens.access_token().await?;
        debug!("GET {}", url);
        let response = self.http.get(url).bearer_auth(token).send().await?;
        Self::decode(response).await
    }

    async fn get_with_retry<T: DeserializeOwned>(&self, operation_name: &str, url: Url) -> Result<T> {
        with_retry(operation_name, self.max_retries, self.retry_base_delay, || {
            self.get_json(url.clone())
        })
        .await
    }

    async fn post_json(&self, url: Url, body: serde_json::Value) -> Result<()> {
        let token = self.tokens.access_token().await?;
        debug!("POST {}", url);
        let response = self.http.post(url).bearer_auth(token).json(&body).send().await?;
        Self::expect_success(response).await
    }

    async fn decode<T: DeserializeOwned>(response: Response) -> Result<T> {
        let status = response.status();
        if !status.is_success() {
            let headers = response.headers().clone();
            let body = response.text().await.unwrap_or_default();
            return Err(OutlookError::from_status(status, &headers, &body));
        }
        let body = response.text().await?;
        serde_json::from_str(&body)
            .map_err(|e| OutlookError::InvalidResponse(format!("Unexpected Graph payload: {}", e)))
    }

    async fn expect_success(response: Response) -> Result<()> {
        let status = response.status();
        if status.is_success() {
            return Ok(());
        }
        let headers = response.headers().clone();
        let body = response.text().await.unwrap_or_default();
        Err(OutlookError::from_status(status, &headers, &body))
    }

    /// Walk every page of a folder collection
    fn purge_listing_url(
        &self,
        folder_id: &str,
        cursor: Option<&PageCursor>,
        request: &PageRequest,
        top: usize,
    ) -> Result<Url> {
        let mut filters = Vec::new();
        if let Some(cursor) = cursor {
            filters.push(format!(
                "receivedDateTime ge {}",
                query::odata_datetime(&cursor.after)
            ));
        }
        if let Some(before) = &request.received_before {
            filters.push(query::received_before_filter(before));
        }

        let mut url = self.endpoint(&["me", "mailFolders", folder_id, "messages"])?;
        {
            let mut pairs = url.query_pairs_mut();
            pairs
                .append_pair("$select", PURGE_SELECT_FIELDS)
                .append_pair("$orderby", "receivedDateTime asc")
                .append_pair("$top", &top.to_string());
            if !filters.is_empty() {
                pairs.append_pair("$filter", &filters.join(" and "));
            }
        }
        Ok(url)
    }

    async fn collect_folders(&self, operation_name: &str, first: Url) -> Result<Vec<MailFolder>> {
        let mut folders = Vec::new();
        let mut next = Some(first);

        while let Some(url) = next.take() {
            let page: Collection<MailFolder> = self.get_with_retry(operation_name, url).await?;
            folders.extend(page.value);
            next = match page.next_link {
                Some(link) => Some(Url::parse(&link).map_err(|e| {
                    OutlookError::InvalidResponse(format!("Bad @odata.nextLink: {}", e))
                })?),
                None => None,
            };
        }

        Ok(folders)
    }
}

/// Execute an async operation with exponential backoff retry
///
/// Only transient failures are retried. A `Retry-After` from Graph replaces the backoff delay.
pub async fn with_retry<T, F, Fut>(
    operation_name: &str,
    max_retries: u32,
    base_delay: Duration,
    mut operation: F,
) -> Result<T>
where
    F: FnMut() -> Fut,
    Fut: std::future::Future<Output = Result<T>>,
{
    let mut delay = base_delay;
    let mut attempts = 0;

    loop {
        attempts += 1;
        match operation().await {
            Ok(result) => return Ok(result),
            Err(e) if e.is_transient() && attempts <= max_retries => {
                let wait = match &e {
                    OutlookError::RateLimitExceeded { retry_after } => {
                        Duration::from_secs(*retry_after).min(MAX_RETRY_DELAY)
                    }
                    _ => delay,
                };
                warn!(
                    "{} failed (attempt {}/{}): {}. Retrying in {:?}...",
                    operation_name,
                    attempts,
                    max_retries + 1,
                    e,
                    wait
                );
                tokio::time::sleep(wait).await;
                delay = std::cmp::min(delay * 2, MAX_RETRY_DELAY);
            }
            Err(e) => return Err(e),
        }
    }
}

#[async_trait]
impl MailboxGateway for GraphClient {
    async fn list_page(&self, folder_id: &str, request: &PageRequest) -> Result<Page<MessageRef>> {
        let cursor = request
            .page_token
            .as_deref()
            .map(PageCursor::decode)
            .transpose()?;
        let page_size = request.page_size.max(1);

        let (url, top) = match cursor.as_ref().and_then(|c| c.next_link.as_deref()) {
            Some(link) => {
                let url = Url::parse(link).map_err(|e| {
                    OutlookError::InvalidResponse(format!("Bad @odata.nextLink in page token: {}", e))
                })?;
                (url, None)
            }
            None => {
                let seen_count = cursor.as_ref().map_or(0, |c| c.seen.len());
                let top = (page_size + seen_count).min(MAX_PAGE_TOP);
                (self.purge_listing_url(folder_id, cursor.as_ref(), request, top)?, Some(top))
            }
        };

        let page: Collection<Message> = self.get_with_retry("list_page", url).await?;
        let fetched = page.value.len();

        let mut kept: Vec<MessageRef> = page
            .value
            .iter()
            .filter_map(|message| message.to_ref(folder_id))
            .filter(|m| cursor.as_ref().map_or(true, |c| !c.seen.contains(&m.id)))
            .collect();
        let truncated = kept.len() > page_size;
        kept.truncate(page_size);

        let more = truncated || top.map_or(false, |top| fetched >= top) || page.next_link.is_some();
        let next_page_token = match (&cursor, kept.is_empty(), page.next_link) {
            // every message on the page was already handed out
            (Some(cursor), true, Some(link)) => Some(PageCursor {
                after: cursor.after,
                seen: cursor.seen.clone(),
                next_link: Some(link),
            }),
            _ if more => next_cursor(cursor.as_ref(), &kept),
            _ => None,
        }
        .map(|c| c.encode())
        .transpose()?;

        debug!(
            "list_page({}): fetched {}, kept {}, more={}",
            folder_id,
            fetched,
            kept.len(),
            next_page_token.is_some()
        );

        Ok(Page {
            items: kept,
            next_page_token,
        })
    }

    async fn delete_message(&self, message_id: &str) -> Result<()> {
        let url = self.endpoint(&["me", "messages", message_id])?;
        let token = self.tokens.access_token().await?;
        debug!("DELETE {}", url);
        let response = self.http.delete(url).bearer_auth(token).send().await?;
        Self::expect_success(response).await
    }

    async fn move_message(&self, message_id: &str, destination_id: &str) -> Result<()> {
        let url = self.endpoint(&["me", "messages", message_id, "move"])?;
        self.post_json(url, json!({ "destinationId": destination_id }))
            .await
    }
}

#[async_trait]
impl MailClient for GraphClient {
    async fn get_user(&self) -> Result<User> {
        let mut url = self.endpoint(&["me"])?;
        url.query_pairs_mut()
            .append_pair("$select", "displayName,mail,userPrincipalName");
        let profile: UserProfile = self.get_with_retry("get_user", url).await?;
        Ok(User::from(profile))
    }

    async fn list_folders(&self) -> Result<Vec<MailFolder>> {
        let url = self.folder_url(&["me", "mailFolders"])?;
        self.collect_folders("list_folders", url).await
    }

    async fn list_child_folders(&self, parent_id: &str) -> Result<Vec<MailFolder>> {
        let url = self.folder_url(&["me", "mailFolders", parent_id, "childFolders"])?;
        self.collect_folders("list_child_folders", url).await
    }

    async fn list_messages(&self, folder_id: &str, query: &MessageQuery) -> Result<(Vec<Message>, bool)> {
        let mut url = self.endpoint(&["me", "mailFolders", folder_id, "messages"])?;
        {
            let mut pairs = url.query_pairs_mut();
            pairs
                .append_pair("$select", query::MESSAGE_SELECT_FIELDS)
                .append_pair("$top", &query.top.to_string())
                .append_pair("$orderby", query.order.orderby());
            if let Some(filter) = &query.filter {
                pairs.append_pair("$filter", filter);
            }
        }

        let page: Collection<Message> = self.get_with_retry("list_messages", url).await?;
        Ok((page.value, page.next_link.is_some()))
    }

    async fn get_message(&self, message_id: &str) -> Result<Message> {
        let mut url = self.endpoint(&["me", "messages", message_id])?;
        url.query_pairs_mut().append_pair(
            "$select",
            &format!("{},body", query::MESSAGE_SELECT_FIELDS),
        );
        self.get_with_retry("get_message", url).await
    }

    async fn forward_message(
        &self,
        message_id: &str,
        to: &[String],
        comment: Option<&str>,
    ) -> Result<()> {
        if to.is_empty() {
            return Err(OutlookError::BadRequest(
                "At least one recipient is required".to_string(),
            ));
        }
        let recipients: Vec<Recipient> = to.iter().map(|a| Recipient::from_address(a)).collect();
        let url = self.endpoint(&["me", "messages", message_id, "forward"])?;
        self.post_json(
            url,
            json!({
                "toRecipients": recipients,
                "comment": comment.unwrap_or_default(),
            }),
        )
        .await
    }
}

// Shared ownership for the session and the purge worker
#[async_trait]
impl<T: MailboxGateway + ?Sized> MailboxGateway for Arc<T> {
    async fn list_page(&self, folder_id: &str, request: &PageRequest) -> Result<Page<MessageRef>> {
        self.as_ref().list_page(folder_id, request).await
    }

    async fn delete_message(&self, message_id: &str) -> Result<()> {
        self.as_ref().delete_message(message_id).await
    }

    async fn move_message(&self, message_id: &str, destination_id: &str) -> Result<()> {
        self.as_ref().move_message(message_id, destination_id).await
    }
}
