use std::fmt::{Display, Formatter};
use std::path::Path;

use serde::{Deserialize, Serialize};
use time::{Date, Month, OffsetDateTime, PrimitiveDateTime, Time};

mod extract;

pub use extract::{extract_fields, parse_card_date};

/// File name suffix (without the dot) that marks a file in the card store as a card.
pub const CARD_EXTENSION: &str = "vcf";

/// Prefix a card dump puts before a free-text birthday or anniversary.
pub const TEXT_DATE_TAG: &str = "Text:";

time::serde::format_description!(
    pub index_timestamp,
    PrimitiveDateTime,
    "[year]-[month]-[day] [hour]:[minute]:[second]"
);

/// Errors reported by a [`CardCodec`].
#[derive(Debug, Clone, thiserror::Error, Eq, PartialEq)]
pub enum CardError {
    #[error("cannot read card file: {0}")]
    Io(String),
    #[error("invalid card file: {0}")]
    InvalidFile(String),
    #[error("invalid card: {0}")]
    InvalidCard(String),
    #[error("invalid property: {0}")]
    InvalidProperty(String),
    #[error("invalid date-time: {0}")]
    InvalidDateTime(String),
    #[error("write error: {0}")]
    Write(String),
}

/// Which step of a card operation failed.
#[derive(Debug, Clone, Copy, Serialize, Deserialize, Eq, PartialEq, Ord, PartialOrd, Hash)]
#[serde(rename_all = "snake_case")]
pub enum FailureKind {
    ParseFailure,
    ValidationFailure,
    WriteFailure,
}

impl FailureKind {
    #[must_use]
    pub fn as_str(self) -> &'static str {
        match self {
            Self::ParseFailure => "parse_failure",
            Self::ValidationFailure => "validation_failure",
            Self::WriteFailure => "write_failure",
        }
    }
}

impl Display for FailureKind {
    fn fmt(&self, f: &mut Formatter<'_>) -> std::fmt::Result {
        f.write_str(self.as_str())
    }
}

/// Contract of the card parsing library.
///
/// A `Handle` is owned by exactly one operation. Dropping it releases every resource the codec
/// acquired for it, so early returns never leak a parsed card.
pub trait CardCodec {
    type Handle;

    /// Parse the card stored at `path`. No handle is produced on failure.
    ///
    /// # Errors
    /// Returns a [`CardError`] when the file cannot be read or is malformed.
    fn parse(&self, path: &Path) -> Result<Self::Handle, CardError>;

    /// Check semantic rules that parsing alone does not enforce.
    ///
    /// # Errors
    /// Returns a [`CardError`] describing the first violated rule.
    fn validate(&self, card: &Self::Handle) -> Result<(), CardError>;

    /// Render the labeled line dump consumed by [`extract_fields`].
    fn serialize(&self, card: &Self::Handle) -> String;

    /// Persist `card` to `path`.
    ///
    /// # Errors
    /// Returns [`CardError::Write`] when the card cannot be stored.
    fn write(&self, path: &Path, card: &Self::Handle) -> Result<(), CardError>;

    /// Build the smallest card carrying `name`.
    fn create(&self, name: &str) -> Self::Handle;

    /// Replace the structural name of `card`, leaving every other field untouched.
    fn set_name(&self, card: &mut Self::Handle, name: &str);
}

#[derive(Debug, Clone, Copy, Serialize, Deserialize, Eq, PartialEq, Ord, PartialOrd, Hash)]
#[serde(transparent)]
pub struct FileId(pub i64);

impl Display for FileId {
    fn fmt(&self, f: &mut Formatter<'_>) -> std::fmt::Result {
        write!(f, "{}", self.0)
    }
}

#[derive(Debug, Clone, Copy, Serialize, Deserialize, Eq, PartialEq, Ord, PartialOrd, Hash)]
#[serde(transparent)]
pub struct ContactId(pub i64);

impl Display for ContactId {
    fn fmt(&self, f: &mut Formatter<'_>) -> std::fmt::Result {
        write!(f, "{}", self.0)
    }
}

/// Index row tracking one card file.
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq, Eq)]
pub struct FileRecord {
    pub file_id: FileId,
    pub file_name: String,
    #[serde(with = "time::serde::rfc3339")]
    pub last_modified: OffsetDateTime,
    #[serde(with = "time::serde::rfc3339")]
    pub created_at: OffsetDateTime,
}

/// Index row summarizing the content of one card.
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq, Eq)]
pub struct ContactRecord {
    pub contact_id: ContactId,
    pub name: String,
    #[serde(with = "index_timestamp::option")]
    pub birthday: Option<PrimitiveDateTime>,
    #[serde(with = "index_timestamp::option")]
    pub anniversary: Option<PrimitiveDateTime>,
    pub file_id: FileId,
}

/// Values for a contact row that has not been inserted yet.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct NewContact {
    pub name: String,
    pub birthday: Option<PrimitiveDateTime>,
    pub anniversary: Option<PrimitiveDateTime>,
}

impl NewContact {
    #[must_use]
    pub fn named(name: impl Into<String>) -> Self {
        Self { name: name.into(), birthday: None, anniversary: None }
    }
}

/// Birthday or anniversary value as it appears in a card dump.
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq, Eq)]
#[serde(tag = "kind", rename_all = "snake_case")]
pub enum CardDate {
    Text(String),
    Time { time: String, utc: bool },
    DateTime { date: String, time: String, utc: bool },
    Date(String),
}

impl CardDate {
    /// Normalize to a second-precision timestamp for the index.
    ///
    /// Only a `YYYYMMDD` date paired with an `HHMMSS` time normalizes. Date-only, time-only and text
    /// values are left out of the index.
    #[must_use]
    pub fn timestamp(&self) -> Option<PrimitiveDateTime> {
        match self {
            Self::DateTime { date, time, .. } => {
                Some(PrimitiveDateTime::new(parse_compact_date(date)?, parse_compact_time(time)?))
            }
            Self::Date(_) | Self::Text(_) | Self::Time { .. } => None,
        }
    }
}

impl Display for CardDate {
    fn fmt(&self, f: &mut Formatter<'_>) -> std::fmt::Result {
        let utc_suffix = |utc: bool| if utc { " (UTC)" } else { "" };
        match self {
            Self::Text(text) => f.write_str(text),
            Self::Time { time, utc } => write!(f, "Time: {time}{}", utc_suffix(*utc)),
            Self::DateTime { date, time, utc } => {
                write!(f, "Date: {date} Time: {time}{}", utc_suffix(*utc))
            }
            Self::Date(date) => write!(f, "Date: {date}"),
        }
    }
}

/// Structured fields pulled out of one card dump.
#[derive(Debug, Clone, Default, Serialize, Deserialize, PartialEq, Eq)]
pub struct ExtractedFields {
    pub name: Option<String>,
    pub birthday: Option<CardDate>,
    pub anniversary: Option<CardDate>,
    pub other_properties: usize,
}

impl ExtractedFields {
    /// Contact row values, or `None` when the dump carried no name.
    #[must_use]
    pub fn to_new_contact(&self) -> Option<NewContact> {
        let name = self.name.as_ref()?;
        Some(NewContact {
            name: name.clone(),
            birthday: self.birthday.as_ref().and_then(CardDate::timestamp),
            anniversary: self.anniversary.as_ref().and_then(CardDate::timestamp),
        })
    }

    #[must_use]
    pub fn notes_display(&self) -> String {
        format!("Number of other properties: {}", self.other_properties)
    }
}

/// One entry of the browsable card list.
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq, Eq)]
pub struct CardSummary {
    pub file_name: String,
    pub label: String,
}

/// Display strings for one card.
#[derive(Debug, Clone, Default, Serialize, Deserialize, PartialEq, Eq)]
pub struct ContactDetail {
    pub file_name: String,
    pub name: String,
    pub birthday: String,
    pub anniversary: String,
    pub notes: String,
}

impl ContactDetail {
    #[must_use]
    pub fn blank(file_name: impl Into<String>) -> Self {
        Self { file_name: file_name.into(), ..Self::default() }
    }

    #[must_use]
    pub fn from_fields(file_name: impl Into<String>, fields: &ExtractedFields) -> Self {
        Self {
            file_name: file_name.into(),
            name: fields.name.clone().unwrap_or_default(),
            birthday: fields.birthday.as_ref().map(ToString::to_string).unwrap_or_default(),
            anniversary: fields.anniversary.as_ref().map(ToString::to_string).unwrap_or_default(),
            notes: fields.notes_display(),
        }
    }
}

/// True when `file_name` names a card: not hidden and ending in `.vcf` (any case).
#[must_use]
pub fn is_card_file_name(file_name: &str) -> bool {
    if file_name.starts_with('.') {
        return false;
    }
    Path::new(file_name)
        .extension()
        .and_then(|ext| ext.to_str())
        .is_some_and(|ext| ext.eq_ignore_ascii_case(CARD_EXTENSION))
}

fn parse_compact_date(raw: &str) -> Option<Date> {
    if raw.len() != 8 || !raw.bytes().all(|b| b.is_ascii_digit()) {
        return None;
    }
    let year: i32 = raw[0..4].parse().ok()?;
    let month: u8 = raw[4..6].parse().ok()?;
    let day: u8 = raw[6..8].parse().ok()?;
    Date::from_calendar_date(year, Month::try_from(month).ok()?, day).ok()
}

fn parse_compact_time(raw: &str) -> Option<Time> {
    if raw.len() != 6 || !raw.bytes().all(|b| b.is_ascii_digit()) {
        return None;
    }
    let hour: u8 = raw[0..2].parse().ok()?;
    let minute: u8 = raw[2..4].parse().ok()?;
    let second: u8 = raw[4..6].parse().ok()?;
    Time::from_hms(hour, minute, second).ok()
}
