//! Lossy view of a Slack message for scoring.

use chrono::{DateTime, TimeZone, Utc};
use regex::Regex;
use serde_json::Value;
use std::sync::LazyLock;

/// Slack user mentions: `<@U123>` or `<@U123|alice>`.
///
/// SAFETY: Pattern is a compile-time constant that is known to be valid.
#[allow(clippy::unwrap_used)]
static USER_MENTION_RE: LazyLock<Regex> =
    LazyLock::new(|| Regex::new(r"<@[UW][A-Z0-9]+(?:\|[^>]*)?>").unwrap());

/// Broadcast mentions: `<!here>`, `<!channel>`, `<!everyone>`.
///
/// SAFETY: Pattern is a compile-time constant that is known to be valid.
#[allow(clippy::unwrap_used)]
static BROADCAST_RE: LazyLock<Regex> =
    LazyLock::new(|| Regex::new(r"<!(?:here|channel|everyone)(?:\|[^>]*)?>").unwrap());

/// Plain-text mentions: `@alice` at the start or after whitespace.
///
/// SAFETY: Pattern is a compile-time constant that is known to be valid.
#[allow(clippy::unwrap_used)]
static PLAIN_MENTION_RE: LazyLock<Regex> =
    LazyLock::new(|| Regex::new(r"(?:^|\s)@[\w.\-]+").unwrap());

/// The fields of a message the scorer reads.
#[derive(Debug, Clone, Default, PartialEq)]
pub struct Message {
    /// Message body.
    pub text: String,
    /// Author ID or name.
    pub user: String,
    /// Raw timestamp (`ts` or `timestamp`).
    pub timestamp: Option<String>,
    /// Summed reaction counts.
    pub reaction_count: u64,
    /// Replies in the thread this message starts.
    pub reply_count: u64,
    /// Whether the message starts a thread.
    pub is_thread_parent: bool,
    /// Number of attached files.
    pub file_count: usize,
    /// Whether the message is pinned.
    pub pinned: bool,
}

impl Message {
    /// Read a message out of arbitrary JSON; `None` if it is not an object.
    pub fn from_json_lossy(value: &Value) -> Option<Self> {
        let obj = value.as_object()?;
        let str_field = |key: &str| obj.get(key).and_then(Value::as_str);

        let text = str_field("text").unwrap_or_default().to_string();
        let user = str_field("user")
            .or_else(|| str_field("username"))
            .unwrap_or_default()
            .to_string();
        let timestamp = ["ts", "timestamp"]
            .iter()
            .find_map(|key| match obj.get(*key) {
                Some(Value::String(s)) => Some(s.clone()),
                Some(Value::Number(n)) => Some(n.to_string()),
                _ => None,
            });

        let reaction_count = obj
            .get("reactions")
            .and_then(Value::as_array)
            .map_or(0, |reactions| {
                reactions
                    .iter()
                    .map(|r| {
                        r.get("count").and_then(Value::as_u64).unwrap_or_else(|| {
                            r.get("users")
                                .and_then(Value::as_array)
                                .map_or(1, |users| users.len() as u64)
                        })
                    })
                    .sum()
            });

        let reply_count = obj
            .get("reply_count")
            .and_then(Value::as_u64)
            .or_else(|| {
                obj.get("replies")
                    .and_then(Value::as_array)
                    .map(|r| r.len() as u64)
            })
            .unwrap_or(0);

        let thread_ts = str_field("thread_ts");
        let is_thread_parent =
            reply_count > 0 && (thread_ts.is_none() || thread_ts == str_field("ts"));

        let file_count = obj
            .get("files")
            .and_then(Value::as_array)
            .map_or(0, Vec::len);
        let pinned = obj
            .get("pinned_to")
            .and_then(Value::as_array)
            .is_some_and(|p| !p.is_empty())
            || obj.get("is_pinned").and_then(Value::as_bool).unwrap_or(false);

        Some(Self {
            text,
            user,
            timestamp,
            reaction_count,
            reply_count,
            is_thread_parent,
            file_count,
            pinned,
        })
    }

    /// Count of user, broadcast and plain-text mentions in the body.
    pub fn mention_count(&self) -> usize {
        USER_MENTION_RE.find_iter(&self.text).count()
            + BROADCAST_RE.find_iter(&self.text).count()
            + PLAIN_MENTION_RE.find_iter(&self.text).count()
    }

    /// Whether the body contains `<!here>`, `<!channel>` or `<!everyone>`.
    pub fn has_broadcast(&self) -> bool {
        BROADCAST_RE.is_match(&self.text)
    }

    /// Whether any engagement signal was recorded.
    pub fn has_engagement(&self) -> bool {
        self.reaction_count > 0 || self.reply_count > 0 || self.mention_count() > 0
    }
}

/// Parse a Slack `ts` (`"1700000000.000100"`), epoch seconds, or RFC 3339.
pub fn parse_timestamp(raw: &str) -> Option<DateTime<Utc>> {
    let raw = raw.trim();
    if raw.is_empty() {
        return None;
    }
    if let Ok(dt) = DateTime::parse_from_rfc3339(raw) {
        return Some(dt.with_timezone(&Utc));
    }
    let (secs, frac) = raw.split_once('.').unwrap_or((raw, ""));
    if secs.is_empty() || !secs.bytes().all(|b| b.is_ascii_digit()) {
        return None;
    }
    if !frac.bytes().all(|b| b.is_ascii_digit()) {
        return None;
    }
    let secs: i64 = secs.parse().ok()?;
    let nanos: u32 = if frac.is_empty() {
        0
    } else {
        let digits: String = frac.chars().chain(std::iter::repeat('0')).take(9).collect();
        digits.parse().ok()?
    };
    Utc.timestamp_opt(secs, nanos).single()
}
