use contact_index_core::CardError;

use crate::escape::split_components;
use crate::{Card, CardDateTime, Parameter, Property};

const CRLF: &str = "\r\n";
const BEGIN_LINE: &str = "BEGIN:VCARD";
const VERSION_LINE: &str = "VERSION:4.0";
const END_LINE: &str = "END:VCARD";

/// Parse the text of a single vCard 4.0 file.
///
/// # Errors
/// Returns [`CardError::InvalidCard`] for framing problems (line endings, header, trailer, missing
/// `FN`) and [`CardError::InvalidProperty`] for malformed content lines.
pub fn parse_card(text: &str) -> Result<Card, CardError> {
    let physical = split_physical_lines(text)?;
    check_framing(&physical)?;

    let mut full_name: Option<Property> = None;
    let mut optional_properties = Vec::new();
    let mut birthday = None;
    let mut anniversary = None;

    for line in unfold(&physical) {
        let (prop, declared_text) = parse_content_line(&line)?;
        if prop.is("BEGIN") || prop.is("END") || prop.is("VERSION") {
            continue;
        }

        if prop.is("FN") && full_name.is_none() {
            full_name = Some(prop);
        } else if prop.is("BDAY") {
            birthday = Some(date_time_value(&prop, declared_text));
        } else if prop.is("ANNIVERSARY") {
            anniversary = Some(date_time_value(&prop, declared_text));
        } else {
            optional_properties.push(prop);
        }
    }

    let full_name = full_name.ok_or_else(|| CardError::InvalidCard("missing FN property".into()))?;
    Ok(Card { full_name, optional_properties, birthday, anniversary })
}

/// Every line must be CRLF terminated, including the last one.
fn split_physical_lines(text: &str) -> Result<Vec<&str>, CardError> {
    let body = text
        .strip_suffix(CRLF)
        .ok_or_else(|| CardError::InvalidCard("last line is not CRLF terminated".into()))?;
    let lines: Vec<&str> = body.split(CRLF).collect();
    if lines.iter().any(|line| line.contains(['\r', '\n'])) {
        return Err(CardError::InvalidCard("line is not CRLF terminated".into()));
    }
    Ok(lines)
}

fn check_framing(lines: &[&str]) -> Result<(), CardError> {
    if lines.first() != Some(&BEGIN_LINE) {
        return Err(CardError::InvalidCard(format!("first line must be {BEGIN_LINE}")));
    }
    if lines.get(1) != Some(&VERSION_LINE) {
        return Err(CardError::InvalidCard(format!("second line must be {VERSION_LINE}")));
    }
    let last = lines.iter().rev().find(|line| !line.is_empty());
    if last != Some(&END_LINE) {
        return Err(CardError::InvalidCard(format!("last line must be {END_LINE}")));
    }
    Ok(())
}

/// Joins folded continuation lines (leading space or tab) onto their logical line.
fn unfold(lines: &[&str]) -> Vec<String> {
    let mut logical: Vec<String> = Vec::new();
    for line in lines {
        if line.is_empty() {
            continue;
        }
        if let Some(continuation) = line.strip_prefix([' ', '\t']) {
            if let Some(prev) = logical.last_mut() {
                prev.push_str(continuation);
                continue;
            }
        }
        logical.push((*line).to_string());
    }
    logical
}

/// `[group.]NAME[;param=value]*:value[;value]*`
///
/// Also reports whether the line declared a text value (`VALUE=text`).
fn parse_content_line(line: &str) -> Result<(Property, bool), CardError> {
    let colon = find_value_separator(line)
        .ok_or_else(|| CardError::InvalidProperty(format!("missing ':' in line {line:?}")))?;
    let (head, value) = (&line[..colon], &line[colon + 1..]);

    let mut segments = head.split(';');
    let qualified = segments.next().unwrap_or_default();
    if qualified.is_empty() {
        return Err(CardError::InvalidProperty(format!("missing property name in {line:?}")));
    }
    if value.is_empty() {
        return Err(CardError::InvalidProperty(format!("{qualified} has an empty value")));
    }

    let (group, name) = match qualified.split_once('.') {
        Some((group, name)) => (group.to_string(), name.to_string()),
        None => (String::new(), qualified.to_string()),
    };

    let mut parameters = Vec::new();
    for segment in segments {
        match segment.split_once('=') {
            Some((param, param_value)) if !param_value.is_empty() => parameters.push(Parameter {
                name: param.to_string(),
                value: param_value.trim_matches('"').to_string(),
            }),
            _ => {
                return Err(CardError::InvalidProperty(format!(
                    "{name} has a parameter without a value: {segment:?}"
                )))
            }
        }
    }

    let declared_text = parameters.iter().any(|param| {
        param.name.eq_ignore_ascii_case("VALUE") && param.value.eq_ignore_ascii_case("text")
    });
    let values = split_components(value);

    Ok((Property { name, group, parameters, values }, declared_text))
}

/// First colon outside a quoted parameter value.
fn find_value_separator(line: &str) -> Option<usize> {
    let mut in_quotes = false;
    for (i, c) in line.char_indices() {
        match c {
            '"' => in_quotes = !in_quotes,
            ':' if !in_quotes => return Some(i),
            _ => {}
        }
    }
    None
}

fn date_time_value(prop: &Property, declared_text: bool) -> CardDateTime {
    let raw = prop.values.join(";");
    if declared_text {
        return CardDateTime::Text(raw);
    }

    let (rest, utc) = match raw.strip_suffix('Z') {
        Some(stripped) => (stripped, true),
        None => (raw.as_str(), false),
    };
    match rest.split_once('T') {
        Some((date, time)) => {
            CardDateTime::Moment { date: date.to_string(), time: time.to_string(), utc }
        }
        None => CardDateTime::Moment { date: rest.to_string(), time: String::new(), utc: false },
    }
}
