//! Delimited (`|`-separated) output lines for script consumption

use chrono::{DateTime, SecondsFormat, Utc};
use once_cell::sync::Lazy;
use regex::Regex;

use crate::models::{MailFolder, Message, Recipient, User};

/// Printed wherever a value is missing
pub const NONE: &str = "NONE";

static CONTROL_RUNS: Lazy<Regex> =
    Lazy::new(|| Regex::new(r"[\p{Cc}\x{2028}\x{2029}]+").expect("valid control-character regex"));

static SPACE_RUNS: Lazy<Regex> =
    Lazy::new(|| Regex::new(r" {2,}").expect("valid whitespace regex"));

/// Make free text safe for a single delimited field
///
/// Control characters and line breaks collapse to one space, `|` becomes `/`.
pub fn sanitize_for_output(value: &str) -> String {
    let flattened = CONTROL_RUNS.replace_all(value, " ");
    let collapsed = SPACE_RUNS.replace_all(&flattened, " ");
    collapsed.trim().replace('|', "/")
}

/// Sanitized value or `NONE`
pub fn field(value: Option<&str>) -> String {
    match value.map(sanitize_for_output) {
        Some(v) if !v.is_empty() => v,
        _ => NONE.to_string(),
    }
}

pub fn timestamp(value: Option<&DateTime<Utc>>) -> String {
    value
        .map(|dt| dt.to_rfc3339_opts(SecondsFormat::Secs, true))
        .unwrap_or_else(|| NONE.to_string())
}

fn flag(value: Option<bool>) -> String {
    value
        .map(|v| v.to_string())
        .unwrap_or_else(|| NONE.to_string())
}

/// `Name <address>`, just the address, or `NONE`
pub fn format_from(from: Option<&Recipient>) -> String {
    let Some(email) = from.and_then(|r| r.email_address.as_ref()) else {
        return NONE.to_string();
    };
    let name = email
        .name
        .as_deref()
        .map(sanitize_for_output)
        .filter(|n| !n.is_empty());
    let address = email
        .address
        .as_deref()
        .map(sanitize_for_output)
        .filter(|a| !a.is_empty());

    match (name, address) {
        (Some(name), Some(address)) => format!("{} <{}>", name, address),
        (None, Some(address)) => address,
        (Some(name), None) => name,
        (None, None) => NONE.to_string(),
    }
}

/// Comma-separated addresses or `NONE`
pub fn format_emails(recipients: &[Recipient]) -> String {
    let addresses: Vec<String> = recipients
        .iter()
        .filter_map(|r| r.address())
        .map(sanitize_for_output)
        .collect();
    if addresses.is_empty() {
        NONE.to_string()
    } else {
        addresses.join(",")
    }
}

pub fn user_line(user: &User) -> String {
    format!(
        "{}|{}",
        field(Some(user.name.as_str())),
        field(Some(user.addr.as_str()))
    )
}

pub fn folder_line(folder: &MailFolder) -> String {
    format!(
        "{}|{}|parent={}|children={}|total={}|unread={}|hidden={}",
        field(folder.display_name.as_deref()),
        field(Some(folder.id.as_str())),
        field(folder.parent_folder_id.as_deref()),
        folder.child_folder_count.unwrap_or(0),
        folder.total_item_count.unwrap_or(0),
        folder.unread_item_count.unwrap_or(0),
        folder.is_hidden.unwrap_or(false)
    )
}

/// One line of `list` output
pub fn message_line(message: &Message) -> String {
    let read = match message.is_read {
        Some(true) => "read",
        Some(false) => "unread",
        None => NONE,
    };
    format!(
        "{}|{}|{}|to={}|cc={}|{}|{}|sent={}|attachments={}|importance={}|conversation={}|folder={}|weblink={}",
        field(message.id.as_deref()),
        field(message.subject.as_deref()),
        format_from(message.from.as_ref()),
        format_emails(&message.to_recipients),
        format_emails(&message.cc_recipients),
        read,
        timestamp(message.received_date_time.as_ref()),
        timestamp(message.sent_date_time.as_ref()),
        flag(message.has_attachments),
        field(message.importance.as_deref()),
        field(message.conversation_id.as_deref()),
        field(message.parent_folder_id.as_deref()),
        field(message.web_link.as_deref()),
    )
}

pub fn more_line(more: bool) -> String {
    format!("--- more={} ---", more)
}

/// Header line plus body for `read`
///
/// The body is printed as-is; only the header is delimited.
pub fn read_output(message: &Message) -> Vec<String> {
    let header = format!(
        "id={}|subject={}|from={}|to={}|cc={}|received={}|sent={}|read={}|attachments={}|importance={}|conversation={}|folder={}|weblink={}",
        field(message.id.as_deref()),
        field(message.subject.as_deref()),
        format_from(message.from.as_ref()),
        format_emails(&message.to_recipients),
        format_emails(&message.cc_recipients),
        timestamp(message.received_date_time.as_ref()),
        timestamp(message.sent_date_time.as_ref()),
        flag(message.is_read),
        flag(message.has_attachments),
        field(message.importance.as_deref()),
        field(message.conversation_id.as_deref()),
        field(message.parent_folder_id.as_deref()),
        field(message.web_link.as_deref()),
    );

    let body = message.body.as_ref();
    let content = body
        .and_then(|b| b.content.as_deref())
        .filter(|c| !c.trim().is_empty());
    let content_type = body
        .and_then(|b| b.content_type.as_deref())
        .unwrap_or("text");

    let mut lines = vec![header];
    match content {
        Some(content) => {
            lines.push(format!("--- Body ({}) ---", content_type));
            lines.push(content.to_string());
        }
        None => lines.push("(No body content)".to_string()),
    }
    lines
}

pub fn ok_line(parts: &[&str]) -> String {
    let mut fields = vec!["OK".to_string()];
    fields.extend(parts.iter().map(|p| sanitize_for_output(p)));
    fields.join("|")
}

pub fn failed_line(parts: &[&str]) -> String {
    let mut fields = vec!["FAILED".to_string()];
    fields.extend(parts.iter().map(|p| sanitize_for_output(p)));
    fields.join("|")
}
