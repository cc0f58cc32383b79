use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};

/// The minimal view of a message the purge workflow needs
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct MessageRef {
    pub id: String,
    pub received: DateTime<Utc>,
    pub folder_id: String,
    /// Only used for the per-message report line
    pub subject: Option<String>,
}

/// One page of results plus the opaque token for the next one
#[derive(Debug, Clone)]
pub struct Page<T> {
    pub items: Vec<T>,
    pub next_page_token: Option<String>,
}

impl<T> Page<T> {
    /// A page with nothing after it
    pub fn single(items: Vec<T>) -> Self {
        Self {
            items,
            next_page_token: None,
        }
    }
}

/// Signed-in user, as shown by the `user` command
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct User {
    pub name: String,
    pub addr: String,
}

impl From<UserProfile> for User {
    fn from(profile: UserProfile) -> Self {
        // Work/school accounts carry the address in `mail`, personal ones only in the UPN
        Self {
            name: profile.display_name.unwrap_or_default(),
            addr: profile
                .mail
                .filter(|m| !m.is_empty())
                .or(profile.user_principal_name)
                .unwrap_or_default(),
        }
    }
}

// Graph wire types. Every field is optional on the wire; `$select` decides what comes back.

#[derive(Debug, Clone, Default, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct UserProfile {
    pub display_name: Option<String>,
    pub mail: Option<String>,
    pub user_principal_name: Option<String>,
}

#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct EmailAddress {
    #[serde(skip_serializing_if = "Option::is_none")]
    pub name: Option<String>,
    pub address: Option<String>,
}

#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct Recipient {
    pub email_address: Option<EmailAddress>,
}

impl Recipient {
    pub fn from_address(address: &str) -> Self {
        Self {
            email_address: Some(EmailAddress {
                name: None,
                address: Some(address.to_string()),
            }),
        }
    }

    pub fn address(&self) -> Option<&str> {
        self.email_address
            .as_ref()
            .and_then(|email| email.address.as_deref())
            .filter(|value| !value.is_empty())
    }
}

#[derive(Debug, Clone, Default, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct ItemBody {
    pub content_type: Option<String>,
    pub content: Option<String>,
}

#[derive(Debug, Clone, Default, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct Message {
    pub id: Option<String>,
    pub subject: Option<String>,
    pub from: Option<Recipient>,
    #[serde(default, deserialize_with = "deserializers::null_as_default")]
    pub to_recipients: Vec<Recipient>,
    #[serde(default, deserialize_with = "deserializers::null_as_default")]
    pub cc_recipients: Vec<Recipient>,
    pub is_read: Option<bool>,
    pub received_date_time: Option<DateTime<Utc>>,
    pub sent_date_time: Option<DateTime<Utc>>,
    pub has_attachments: Option<bool>,
    pub importance: Option<String>,
    pub conversation_id: Option<String>,
    pub parent_folder_id: Option<String>,
    pub web_link: Option<String>,
    pub body_preview: Option<String>,
    pub body: Option<ItemBody>,
}

impl Message {
    /// Reduce to a purge reference; messages without id or timestamp cannot be filtered
    pub fn to_ref(&self, folder_id: &str) -> Option<MessageRef> {
        Some(MessageRef {
            id: self.id.clone()?,
            received: self.received_date_time?,
            folder_id: self
                .parent_folder_id
                .clone()
                .unwrap_or_else(|| folder_id.to_string()),
            subject: self.subject.clone(),
        })
    }
}

#[derive(Debug, Clone, Default, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct MailFolder {
    pub id: String,
    pub display_name: Option<String>,
    pub parent_folder_id: Option<String>,
    pub child_folder_count: Option<i32>,
    pub total_item_count: Option<i32>,
    pub unread_item_count: Option<i32>,
    pub is_hidden: Option<bool>,
}

/// OData collection envelope
#[derive(Debug, Clone, Deserialize)]
pub struct Collection<T> {
    #[serde(default = "Vec::new")]
    pub value: Vec<T>,
    #[serde(rename = "@odata.nextLink")]
    pub next_link: Option<String>,
}

/// Custom deserializers for Graph payloads
pub mod deserializers {
    use serde::{Deserialize, Deserializer};

    /// Graph sends `null` for empty collections on some message shapes
    pub fn null_as_default<'de, D, T>(deserializer: D) -> Result<T, D::Error>
    where
        D: Deserializer<'de>,
        T: Default + Deserialize<'de>,
    {
        let opt: Option<T> = Option::deserialize(deserializer)?;
        Ok(opt.unwrap_or_default())
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_message_deserialization() {
        let json = r#"{
            "id": "AAMkAGI2",
            "subject": "Quarterly report",
            "from": {"emailAddress": {"name": "Dana Lee", "address": "dana@contoso.com"}},
            "toRecipients": [{"emailAddress": {"address": "me@contoso.com"}}],
            "isRead": false,
            "receivedDateTime": "2023-11-02T14:05:00Z",
            "hasAttachments": true,
            "importance": "high",
            "parentFolderId": "inbox-id"
        }"#;

        let message: Message = serde_json::from_str(json).unwrap();
        assert_eq!(message.id.as_deref(), Some("AAMkAGI2"));
        assert_eq!(message.to_recipients.len(), 1);
        assert!(message.cc_recipients.is_empty());
        assert_eq!(
            message.from.as_ref().and_then(|r| r.address()),
            Some("dana@contoso.com")
        );
        assert_eq!(
            message.received_date_time.unwrap().to_rfc3339(),
            "2023-11-02T14:05:00+00:00"
        );

        let reference = message.to_ref("inbox").unwrap();
        assert_eq!(reference.folder_id, "inbox-id");
        assert_eq!(reference.subject.as_deref(), Some("Quarterly report"));
    }

    #[test]
    fn test_null_recipients_become_empty() {
        let message: Message =
            serde_json::from_str(r#"{"id": "x", "ccRecipients": null}"#).unwrap();
        assert!(message.cc_recipients.is_empty());
    }

    #[test]
    fn test_message_without_timestamp_has_no_ref() {
        let message: Message = serde_json::from_str(r#"{"id": "x"}"#).unwrap();
        assert!(message.to_ref("inbox").is_none());
    }

    #[test]
    fn test_user_prefers_mail_over_upn() {
        let user = User::from(UserProfile {
            display_name: Some("Dana".to_string()),
            mail: Some("dana@contoso.com".to_string()),
            user_principal_name: Some("dana_contoso.com#EXT#".to_string()),
        });
        assert_eq!(user.addr, "dana@contoso.com");

        let personal = User::from(UserProfile {
            display_name: None,
            mail: None,
            user_principal_name: Some("dana@outlook.com".to_string()),
        });
        assert_eq!(personal.name, "");
        assert_eq!(personal.addr, "dana@outlook.com");
    }

    #[test]
    fn test_collection_next_link() {
        let json = r#"{"value": [{"id": "f1", "displayName": "Inbox"}], "@odata.nextLink": "https://next"}"#;
        let page: Collection<MailFolder> = serde_json::from_str(json).unwrap();
        assert_eq!(page.value.len(), 1);
        assert_eq!(page.next_link.as_deref(), Some("https://next"));
    }

    #[test]
    fn test_recipient_serializes_for_forward() {
        let json = serde_json::to_value(Recipient::from_address("a@b.com")).unwrap();
        assert_eq!(json["emailAddress"]["address"], "a@b.com");
        assert!(json["emailAddress"].get("name").is_none());
    }
}
