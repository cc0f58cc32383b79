//! OData query building and the date handling behind `list` and `purge`

use chrono::{
    DateTime, Duration, FixedOffset, NaiveDate, NaiveDateTime, NaiveTime, TimeZone, Utc,
};

use crate::error::{OutlookError, Result};

/// Fields requested for message listings
pub const MESSAGE_SELECT_FIELDS: &str = concat!(
    "id,subject,from,toRecipients,ccRecipients,isRead,receivedDateTime,sentDateTime,",
    "hasAttachments,importance,conversationId,parentFolderId,webLink,bodyPreview"
);

/// Fields the purge workflow needs
pub const PURGE_SELECT_FIELDS: &str = "id,subject,receivedDateTime,parentFolderId";

#[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
pub enum SortOrder {
    OldestFirst,
    #[default]
    NewestFirst,
}

impl SortOrder {
    pub fn orderby(&self) -> &'static str {
        match self {
            SortOrder::OldestFirst => "receivedDateTime asc",
            SortOrder::NewestFirst => "receivedDateTime desc",
        }
    }
}

/// Parameters of a message listing
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct MessageQuery {
    pub top: u32,
    pub order: SortOrder,
    pub filter: Option<String>,
}

impl Default for MessageQuery {
    fn default() -> Self {
        Self {
            top: 25,
            order: SortOrder::default(),
            filter: None,
        }
    }
}

impl MessageQuery {
    pub fn new(top: u32) -> Self {
        Self {
            top,
            ..Default::default()
        }
    }

    pub fn oldest_first(mut self, oldest_first: bool) -> Self {
        self.order = if oldest_first {
            SortOrder::OldestFirst
        } else {
            SortOrder::NewestFirst
        };
        self
    }

    pub fn with_filter(mut self, filter: Option<String>) -> Self {
        self.filter = filter;
        self
    }
}

/// Which local day `list` should be narrowed to
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Day {
    Today,
    Yesterday,
}

/// Format an instant as an OData DateTimeOffset literal
///
/// Always rendered in UTC: a `+hh:mm` offset would be decoded as a space in the query string.
pub fn odata_datetime<Tz: TimeZone>(instant: &DateTime<Tz>) -> String {
    instant
        .with_timezone(&Utc)
        .format("%Y-%m-%dT%H:%M:%SZ")
        .to_string()
}

/// `receivedDateTime lt <before>`
pub fn received_before_filter<Tz: TimeZone>(before: &DateTime<Tz>) -> String {
    format!("receivedDateTime lt {}", odata_datetime(before))
}

/// `receivedDateTime ge <start> and receivedDateTime lt <end>`
pub fn received_between_filter<Tz: TimeZone>(start: &DateTime<Tz>, end: &DateTime<Tz>) -> String {
    format!(
        "receivedDateTime ge {} and receivedDateTime lt {}",
        odata_datetime(start),
        odata_datetime(end)
    )
}

/// Start and end (exclusive) of `day` around `now`, in `now`'s timezone
pub fn day_window<Tz: TimeZone>(day: Day, now: &DateTime<Tz>) -> Result<(DateTime<Tz>, DateTime<Tz>)> {
    let tz = now.timezone();
    let today = now.date_naive();
    let start_date = match day {
        Day::Today => today,
        Day::Yesterday => today - Duration::days(1),
    };
    let start = local_midnight(&tz, start_date)?;
    let end = local_midnight(&tz, start_date + Duration::days(1))?;
    Ok((start, end))
}

/// Parse a `--before-date` value
///
/// Accepts `YYYY-MM-DD`, a naive `YYYY-MM-DDTHH:MM:SS`, or a full RFC 3339 timestamp.
/// Values without an offset are interpreted in `tz`.
pub fn parse_before_date<Tz: TimeZone>(value: &str, tz: &Tz) -> Result<DateTime<FixedOffset>> {
    let value = value.trim();

    if let Ok(parsed) = DateTime::parse_from_rfc3339(value) {
        return Ok(parsed);
    }

    let naive = if let Ok(date) = NaiveDate::parse_from_str(value, "%Y-%m-%d") {
        date.and_time(NaiveTime::MIN)
    } else if let Ok(datetime) = NaiveDateTime::parse_from_str(value, "%Y-%m-%dT%H:%M:%S") {
        datetime
    } else {
        return Err(OutlookError::ConfigError(format!(
            "Invalid date format '{}'. Use YYYY-MM-DD",
            value
        )));
    };

    tz.from_local_datetime(&naive)
        .earliest()
        .map(|dt| dt.fixed_offset())
        .ok_or_else(|| {
            OutlookError::ConfigError(format!("'{}' does not exist in the local timezone", value))
        })
}

fn local_midnight<Tz: TimeZone>(tz: &Tz, date: NaiveDate) -> Result<DateTime<Tz>> {
    tz.from_local_datetime(&date.and_time(NaiveTime::MIN))
        .earliest()
        .ok_or_else(|| OutlookError::Unknown(format!("No local midnight on {}", date)))
}
