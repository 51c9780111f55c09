use crate::{CardDate, ExtractedFields, TEXT_DATE_TAG};

const NAME_PREFIX: &str = "FN:";
const BIRTHDAY_PREFIX: &str = "Birthday:";
const ANNIVERSARY_PREFIX: &str = "Anniversary:";
const PROPERTY_PREFIX: &str = "Property:";
const VALUE_MARKER: &str = "Value: ";
const NEXT_VALUE_MARKER: &str = " Value: ";
const FREE_TEXT_TAGS: &[&str] = &["circa"];
const TIME_MARKER: char = 'T';
const UTC_MARKER: char = 'Z';

enum DumpLine<'a> {
    Name(&'a str),
    Birthday(&'a str),
    Anniversary(&'a str),
    Property,
    Other,
}

fn classify(line: &str) -> DumpLine<'_> {
    if let Some(rest) = line.strip_prefix(NAME_PREFIX) {
        DumpLine::Name(rest)
    } else if let Some(rest) = line.strip_prefix(BIRTHDAY_PREFIX) {
        DumpLine::Birthday(rest)
    } else if let Some(rest) = line.strip_prefix(ANNIVERSARY_PREFIX) {
        DumpLine::Anniversary(rest)
    } else if line.starts_with(PROPERTY_PREFIX) {
        DumpLine::Property
    } else {
        DumpLine::Other
    }
}

/// Pull name, birthday, anniversary and the other-property count out of a card dump.
///
/// Unrecognized lines are ignored; later name/date lines replace earlier ones.
#[must_use]
pub fn extract_fields(dump: &str) -> ExtractedFields {
    let mut fields = ExtractedFields::default();

    for line in dump.lines() {
        match classify(line) {
            DumpLine::Name(rest) => fields.name = first_value(rest),
            DumpLine::Birthday(payload) => fields.birthday = parse_card_date(payload),
            DumpLine::Anniversary(payload) => fields.anniversary = parse_card_date(payload),
            DumpLine::Property => fields.other_properties += 1,
            DumpLine::Other => {}
        }
    }

    fields
}

/// Interpret the payload of a `Birthday:` or `Anniversary:` line.
#[must_use]
pub fn parse_card_date(payload: &str) -> Option<CardDate> {
    let payload = payload.trim();
    if payload.is_empty() {
        return None;
    }

    if let Some(text) = payload.strip_prefix(TEXT_DATE_TAG) {
        let text = text.trim();
        return (!text.is_empty()).then(|| CardDate::Text(text.to_string()));
    }
    if FREE_TEXT_TAGS.iter().any(|tag| payload.starts_with(tag)) {
        return Some(CardDate::Text(payload.to_string()));
    }

    if let Some(time) = payload.strip_prefix(TIME_MARKER) {
        let (time, utc) = split_utc(time);
        return Some(CardDate::Time { time, utc });
    }

    if let Some((date, time)) = payload.split_once(TIME_MARKER) {
        let (time, utc) = split_utc(time);
        return Some(CardDate::DateTime { date: date.to_string(), time, utc });
    }

    Some(CardDate::Date(payload.to_string()))
}

fn first_value(rest: &str) -> Option<String> {
    let (_, values) = rest.split_once(VALUE_MARKER)?;
    let value = values.split(NEXT_VALUE_MARKER).next().unwrap_or(values).trim();
    (!value.is_empty()).then(|| value.to_string())
}

fn split_utc(time: &str) -> (String, bool) {
    match time.strip_suffix(UTC_MARKER) {
        Some(stripped) => (stripped.to_string(), true),
        None => (time.to_string(), false),
    }
}
