//! vCard 4.0 implementation of the card parse boundary.
//!
//! Cards are read strictly (CRLF line endings, `BEGIN:VCARD` / `VERSION:4.0` header, `END:VCARD`
//! trailer, at least one `FN`), kept in memory as a [`Card`], and written back atomically.

use std::collections::BTreeMap;
use std::path::Path;

use contact_index_core::{CardCodec, CardError};

mod escape;
mod parse;
mod render;

pub use escape::{escape_text, unescape_text};
pub use parse::parse_card;
pub use render::{fold_line, render_card, serialize_card};

/// Properties that may appear at most once in a card.
const SINGLE_VALUED: &[&str] = &["KIND", "N", "GENDER", "PRODID", "REV", "UID"];
/// Properties whose values may contain empty structured components.
const STRUCTURED: &[&str] = &["N", "ADR"];

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Parameter {
    pub name: String,
    pub value: String,
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Property {
    pub name: String,
    /// Group prefix, empty when absent.
    pub group: String,
    pub parameters: Vec<Parameter>,
    /// Value components split on unescaped `;`, each still in escaped form.
    pub values: Vec<String>,
}

impl Property {
    #[must_use]
    pub fn simple(name: &str, value: &str) -> Self {
        Self {
            name: name.to_string(),
            group: String::new(),
            parameters: Vec::new(),
            values: vec![value.to_string()],
        }
    }

    fn is(&self, name: &str) -> bool {
        self.name.eq_ignore_ascii_case(name)
    }
}

/// `BDAY` / `ANNIVERSARY` value.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum CardDateTime {
    /// Declared with `VALUE=text`, e.g. `circa 1800`.
    Text(String),
    /// `YYYYMMDD` and/or `HHMMSS`; either part may be empty.
    Moment { date: String, time: String, utc: bool },
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Card {
    /// The first `FN` property. Later `FN` lines are kept as optional properties.
    pub full_name: Property,
    pub optional_properties: Vec<Property>,
    pub birthday: Option<CardDateTime>,
    pub anniversary: Option<CardDateTime>,
}

impl Card {
    /// A card holding only `FN`, with `name` escaped as a single text value.
    #[must_use]
    pub fn new(name: &str) -> Self {
        Self {
            full_name: Property::simple("FN", &escape_text(name)),
            optional_properties: Vec::new(),
            birthday: None,
            anniversary: None,
        }
    }

    /// Apply the semantic rules that parsing does not enforce.
    ///
    /// # Errors
    /// Returns the first violated rule as a [`CardError`].
    pub fn validate(&self) -> Result<(), CardError> {
        validate_property(&self.full_name)?;
        if !self.full_name.is("FN") {
            return Err(CardError::InvalidProperty(format!(
                "name property is {} instead of FN",
                self.full_name.name
            )));
        }

        let mut seen: BTreeMap<&'static str, usize> = BTreeMap::new();
        for prop in &self.optional_properties {
            if prop.is("VERSION") {
                return Err(CardError::InvalidCard("VERSION may only appear in the header".into()));
            }
            if prop.is("BDAY") || prop.is("ANNIVERSARY") {
                return Err(CardError::InvalidDateTime(format!(
                    "{} must be stored as a date-time field",
                    prop.name
                )));
            }
            validate_property(prop)?;

            if let Some(&name) = SINGLE_VALUED.iter().find(|name| prop.is(name)) {
                let count = seen.entry(name).or_insert(0);
                *count += 1;
                if *count > 1 {
                    return Err(CardError::InvalidProperty(format!(
                        "{name} may appear at most once"
                    )));
                }
            }
        }

        validate_date_time("BDAY", self.birthday.as_ref())?;
        validate_date_time("ANNIVERSARY", self.anniversary.as_ref())?;
        Ok(())
    }
}

fn validate_property(prop: &Property) -> Result<(), CardError> {
    if prop.name.is_empty() {
        return Err(CardError::InvalidProperty("property name is empty".into()));
    }
    if prop.values.is_empty() {
        return Err(CardError::InvalidProperty(format!("{} has no value", prop.name)));
    }
    let allows_empty = STRUCTURED.iter().any(|name| prop.is(name));
    if !allows_empty && prop.values.iter().any(String::is_empty) {
        return Err(CardError::InvalidProperty(format!("{} has an empty value", prop.name)));
    }
    if has_control(&prop.name)
        || has_control(&prop.group)
        || prop.values.iter().map(String::as_str).any(has_control)
        || prop.parameters.iter().any(|param| has_control(&param.name) || has_control(&param.value))
    {
        return Err(CardError::InvalidProperty(format!(
            "{} contains a control character",
            prop.name.escape_debug()
        )));
    }
    for param in &prop.parameters {
        if param.name.is_empty() || param.value.is_empty() {
            return Err(CardError::InvalidProperty(format!(
                "{} has an incomplete parameter",
                prop.name
            )));
        }
    }
    Ok(())
}

/// Tab is the one control character a content line may carry.
fn has_control(text: &str) -> bool {
    text.chars().any(|c| c.is_control() && c != '\t')
}

fn validate_date_time(label: &str, value: Option<&CardDateTime>) -> Result<(), CardError> {
    match value {
        Some(CardDateTime::Text(text)) if text.is_empty() => {
            Err(CardError::InvalidDateTime(format!("{label} text value is empty")))
        }
        Some(CardDateTime::Moment { date, time, .. }) if date.is_empty() && time.is_empty() => {
            Err(CardError::InvalidDateTime(format!("{label} has neither a date nor a time")))
        }
        _ => Ok(()),
    }
}

/// [`CardCodec`] over vCard 4.0 files.
#[derive(Debug, Clone, Copy, Default)]
pub struct VcfCodec;

impl VcfCodec {
    #[must_use]
    pub fn new() -> Self {
        Self
    }
}

impl CardCodec for VcfCodec {
    type Handle = Card;

    fn parse(&self, path: &Path) -> Result<Card, CardError> {
        let raw = std::fs::read(path)
            .map_err(|err| CardError::Io(format!("{}: {err}", path.display())))?;
        let text = String::from_utf8(raw).map_err(|_| {
            CardError::InvalidFile(format!("{} is not valid UTF-8", path.display()))
        })?;
        parse_card(&text)
    }

    fn validate(&self, card: &Card) -> Result<(), CardError> {
        card.validate()
    }

    fn serialize(&self, card: &Card) -> String {
        serialize_card(card)
    }

    fn write(&self, path: &Path, card: &Card) -> Result<(), CardError> {
        render::write_card(path, card)
    }

    fn create(&self, name: &str) -> Card {
        Card::new(name)
    }

    fn set_name(&self, card: &mut Card, name: &str) {
        let escaped = escape_text(name);
        match card.full_name.values.first_mut() {
            Some(first) => *first = escaped,
            None => card.full_name.values.push(escaped),
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn card_with(props: Vec<Property>) -> Card {
        let mut card = Card::new("Test Person");
        card.optional_properties = props;
        card
    }

    #[test]
    fn minimal_card_is_valid() {
        assert_eq!(Card::new("Ada").validate(), Ok(()));
    }

    #[test]
    fn empty_name_is_invalid() {
        let err = Card::new("").validate();
        assert!(matches!(err, Err(CardError::InvalidProperty(_))));
    }

    #[test]
    fn version_in_body_is_invalid_card() {
        let card = card_with(vec![Property::simple("VERSION", "4.0")]);
        assert!(matches!(card.validate(), Err(CardError::InvalidCard(_))));
    }

    #[test]
    fn date_properties_in_body_are_invalid_date_time() {
        let card = card_with(vec![Property::simple("BDAY", "19900101")]);
        assert!(matches!(card.validate(), Err(CardError::InvalidDateTime(_))));
    }

    #[test]
    fn single_valued_properties_may_not_repeat() {
        let card = card_with(vec![Property::simple("UID", "a"), Property::simple("uid", "b")]);
        assert!(matches!(card.validate(), Err(CardError::InvalidProperty(_))));

        let ok = card_with(vec![Property::simple("TEL", "1"), Property::simple("TEL", "2")]);
        assert_eq!(ok.validate(), Ok(()));
    }

    #[test]
    fn structured_properties_allow_empty_components() {
        let mut n = Property::simple("N", "Doe");
        n.values.extend(["Jane".to_string(), String::new(), String::new(), String::new()]);
        assert_eq!(card_with(vec![n]).validate(), Ok(()));

        let mut note = Property::simple("NOTE", "first");
        note.values.push(String::new());
        assert!(matches!(card_with(vec![note]).validate(), Err(CardError::InvalidProperty(_))));
    }

    #[test]
    fn incomplete_parameters_are_invalid() {
        let mut tel = Property::simple("TEL", "555");
        tel.parameters.push(Parameter { name: String::new(), value: "work".to_string() });
        assert!(matches!(card_with(vec![tel]).validate(), Err(CardError::InvalidProperty(_))));
    }

    #[test]
    fn empty_date_times_are_invalid() {
        let mut card = Card::new("Ada");
        card.birthday =
            Some(CardDateTime::Moment { date: String::new(), time: String::new(), utc: false });
        assert!(matches!(card.validate(), Err(CardError::InvalidDateTime(_))));

        card.birthday = None;
        card.anniversary = Some(CardDateTime::Text(String::new()));
        assert!(matches!(card.validate(), Err(CardError::InvalidDateTime(_))));
    }

    #[test]
    fn control_characters_are_invalid() {
        for name in ["Eve\nMallory", "Eve\r\nBDAY:20000101", "bell\u{7}"] {
            let err = Card::new(name).validate();
            assert!(matches!(err, Err(CardError::InvalidProperty(_))), "{name:?}");
        }

        let mut tel = Property::simple("TEL", "555");
        tel.parameters.push(Parameter { name: "TYPE".to_string(), value: "wo\nrk".to_string() });
        assert!(matches!(card_with(vec![tel]).validate(), Err(CardError::InvalidProperty(_))));

        let codec = VcfCodec::new();
        let mut card = Card::new("Eve");
        codec.set_name(&mut card, "Eve\nMallory");
        assert!(matches!(codec.validate(&card), Err(CardError::InvalidProperty(_))));
    }

    #[test]
    fn tabs_are_allowed_in_values() {
        assert_eq!(Card::new("tab\there").validate(), Ok(()));
    }

    #[test]
    fn names_are_stored_escaped() {
        let codec = VcfCodec::new();
        let mut card = Card::new("Doe; John");
        assert_eq!(card.full_name.values, vec!["Doe\\; John".to_string()]);
        assert_eq!(card.validate(), Ok(()));

        codec.set_name(&mut card, "Doe, Jane");
        assert_eq!(card.full_name.values, vec!["Doe\\, Jane".to_string()]);
    }

    #[test]
    fn set_name_replaces_only_the_first_value() {
        let codec = VcfCodec::new();
        let mut card = Card::new("Old");
        card.full_name.values.push("Alias".to_string());
        card.birthday = Some(CardDateTime::Text("circa 1900".to_string()));
        codec.set_name(&mut card, "New");
        assert_eq!(card.full_name.values, vec!["New".to_string(), "Alias".to_string()]);
        assert_eq!(card.birthday, Some(CardDateTime::Text("circa 1900".to_string())));
    }
}
