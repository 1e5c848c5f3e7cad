use chrono::{DateTime, NaiveDate, Utc};

use serde::{Deserialize, Serialize};

/// A single chat message as stored and returned to clients.
///
/// `message` is the canonical name of the text field. `text` is still
/// accepted on read, and so are the PascalCase names written by the old
/// .NET service.
#[derive(Debug, Clone, PartialEq, Eq)]
#[derive(Serialize, Deserialize)]
pub struct Message {
    #[serde(alias = "User")]
    pub user: String,
    #[serde(alias = "text", alias = "Message")]
    pub message: String,
    #[serde(alias = "Timestamp", deserialize_with = "timestamp::deserialize")]
    pub timestamp: DateTime<Utc>,
}

pub type Messages = Vec<Message>;

#[derive(thiserror::Error, Debug)]
pub enum ValidationError {
    #[error("Request body is empty")]
    EmptyBody,
    #[error("Malformed message: {0}")]
    Malformed(#[from] serde_json::Error),
    #[error("Please provide both user and message")]
    MissingField,
}

/// Inbound message before validation. Every field is optional here so that
/// a missing field is reported as a validation failure, not a decode error.
#[derive(Debug, Default, Deserialize)]
pub struct MessageDraft {
    #[serde(default, alias = "User")]
    pub user: Option<String>,
    #[serde(default, alias = "text", alias = "Message")]
    pub message: Option<String>,
    #[serde(
        default,
        alias = "Timestamp",
        deserialize_with = "timestamp::deserialize_option"
    )]
    pub timestamp: Option<DateTime<Utc>>,
}

impl MessageDraft {
    pub fn validate(self) -> Result<Message, ValidationError> {
        self.validate_at(Utc::now())
    }

    fn validate_at(self, now: DateTime<Utc>) -> Result<Message, ValidationError> {
        let user = non_blank(self.user).ok_or(ValidationError::MissingField)?;
        let message = non_blank(self.message).ok_or(ValidationError::MissingField)?;
        let timestamp = match self.timestamp {
            Some(ts) if !is_unset(&ts) => ts,
            _ => now,
        };

        Ok(Message {
            user,
            message,
            timestamp,
        })
    }
}

fn non_blank(value: Option<String>) -> Option<String> {
    value.filter(|v| !v.trim().is_empty())
}

// Zero values: the Unix epoch and the .NET `DateTime` default.
fn is_unset(ts: &DateTime<Utc>) -> bool {
    let dotnet_default = NaiveDate::from_ymd_opt(1, 1, 1)
        .and_then(|d| d.and_hms_opt(0, 0, 0))
        .map(|naive| naive.and_utc());

    *ts == DateTime::<Utc>::default() || Some(*ts) == dotnet_default
}

/// Decodes and validates a raw request body.
pub fn parse_message(body: &[u8]) -> Result<Message, ValidationError> {
    if body.iter().all(u8::is_ascii_whitespace) {
        return Err(ValidationError::EmptyBody);
    }

    let draft: MessageDraft = serde_json::from_slice(body)?;
    draft.validate()
}

/// Decodes a stored collection. Blank content is an empty collection.
pub fn decode_messages(content: &str) -> Result<Messages, serde_json::Error> {
    let content = content.trim();
    if content.is_empty() {
        return Ok(Messages::new());
    }

    serde_json::from_str(content)
}

pub fn encode_messages(messages: &[Message]) -> Result<String, serde_json::Error> {
    serde_json::to_string_pretty(messages)
}

mod timestamp {
    use chrono::{DateTime, Datelike, NaiveDateTime, Utc};
    use serde::{de, Deserialize, Deserializer};

    #[derive(Deserialize)]
    #[serde(untagged)]
    enum Wire {
        Seconds(i64),
        Text(String),
    }

    fn parse(text: &str) -> Option<DateTime<Utc>> {
        if let Ok(ts) = DateTime::parse_from_rfc3339(text) {
            return Some(ts.with_timezone(&Utc));
        }

        // No offset: taken as UTC.
        NaiveDateTime::parse_from_str(text, "%Y-%m-%dT%H:%M:%S%.f")
            .ok()
            .map(|naive| naive.and_utc())
    }

    fn resolve<E: de::Error>(wire: Wire) -> Result<DateTime<Utc>, E> {
        let ts = match wire {
            Wire::Seconds(secs) => DateTime::from_timestamp(secs, 0)
                .ok_or_else(|| E::custom(format!("timestamp {secs} is out of range")))?,
            Wire::Text(text) => {
                parse(&text).ok_or_else(|| E::custom(format!("invalid timestamp `{text}`")))?
            }
        };

        // Years outside 0000-9999 serialize with a sign and more than four
        // digits, which RFC 3339 cannot read back.
        if !(0..=9999).contains(&ts.year()) {
            return Err(E::custom(format!("timestamp {ts} is out of range")));
        }

        Ok(ts)
    }

    pub fn deserialize<'de, D>(deserializer: D) -> Result<DateTime<Utc>, D::Error>
    where
        D: Deserializer<'de>,
    {
        resolve(Wire::deserialize(deserializer)?)
    }

    pub fn deserialize_option<'de, D>(deserializer: D) -> Result<Option<DateTime<Utc>>, D::Error>
    where
        D: Deserializer<'de>,
    {
        Option::<Wire>::deserialize(deserializer)?
            .map(resolve::<D::Error>)
            .transpose()
    }
}
