use std::fmt::Write as _;
use std::io::Write as _;
use std::path::Path;

use contact_index_core::{CardError, CARD_EXTENSION, TEXT_DATE_TAG};

use crate::{unescape_text, Card, CardDateTime, Property};

/// RFC 6350 line length limit, in octets.
const FOLD_WIDTH: usize = 75;
const CONTINUATION: &str = "\r\n ";

/// Render the card as the line-oriented dump consumed by the field extractor.
///
/// The first line describes the `FN` property, one `Property:` line follows per optional property,
/// then `Birthday:` and `Anniversary:` lines when those are set. Values appear unescaped and text
/// dates carry the free-text tag.
#[must_use]
pub fn serialize_card(card: &Card) -> String {
    let mut out = String::new();
    describe_property(&mut out, "FN:", &card.full_name);
    for prop in &card.optional_properties {
        out.push('\n');
        describe_property(&mut out, "Property:", prop);
    }
    if let Some(birthday) = &card.birthday {
        let _ = write!(out, "\nBirthday: {}", dump_date_time(birthday));
    }
    if let Some(anniversary) = &card.anniversary {
        let _ = write!(out, "\nAnniversary: {}", dump_date_time(anniversary));
    }
    out
}

fn describe_property(out: &mut String, label: &str, prop: &Property) {
    let _ = write!(out, "{label} {} Group: {}", prop.name, prop.group);
    for param in &prop.parameters {
        let _ = write!(out, " {}={}", param.name, param.value);
    }
    for value in &prop.values {
        let _ = write!(out, " Value: {}", unescape_text(value));
    }
}

fn dump_date_time(value: &CardDateTime) -> String {
    match value {
        CardDateTime::Text(text) => format!("{TEXT_DATE_TAG} {text}"),
        CardDateTime::Moment { .. } => date_time_text(value),
    }
}

fn date_time_text(value: &CardDateTime) -> String {
    match value {
        CardDateTime::Text(text) => text.clone(),
        CardDateTime::Moment { date, time, utc } => {
            let mut text = date.clone();
            if !time.is_empty() {
                text.push('T');
                text.push_str(time);
            }
            if *utc {
                text.push('Z');
            }
            text
        }
    }
}

/// Render the card as vCard 4.0 text with CRLF line endings and folded long lines.
#[must_use]
pub fn render_card(card: &Card) -> String {
    let mut lines = vec!["BEGIN:VCARD".to_string(), "VERSION:4.0".to_string()];
    lines.push(content_line(&card.full_name));
    if let Some(birthday) = &card.birthday {
        lines.push(date_time_line("BDAY", birthday));
    }
    if let Some(anniversary) = &card.anniversary {
        lines.push(date_time_line("ANNIVERSARY", anniversary));
    }
    lines.extend(card.optional_properties.iter().map(content_line));
    lines.push("END:VCARD".to_string());

    let mut out = String::new();
    for line in lines {
        out.push_str(&fold_line(&line));
        out.push_str("\r\n");
    }
    out
}

fn content_line(prop: &Property) -> String {
    let mut line = String::new();
    if !prop.group.is_empty() {
        line.push_str(&prop.group);
        line.push('.');
    }
    line.push_str(&prop.name);
    for param in &prop.parameters {
        let _ = write!(line, ";{}={}", param.name, quote_if_needed(&param.value));
    }
    line.push(':');
    line.push_str(&prop.values.join(";"));
    line
}

fn quote_if_needed(value: &str) -> String {
    if value.contains([':', ';', ',']) {
        format!("\"{value}\"")
    } else {
        value.to_string()
    }
}

fn date_time_line(name: &str, value: &CardDateTime) -> String {
    match value {
        CardDateTime::Text(text) => format!("{name};VALUE=text:{text}"),
        CardDateTime::Moment { .. } => format!("{name}:{}", date_time_text(value)),
    }
}

/// Fold a content line so no physical line exceeds 75 octets, splitting only on char boundaries.
#[must_use]
pub fn fold_line(line: &str) -> String {
    if line.len() <= FOLD_WIDTH {
        return line.to_string();
    }

    let mut out = String::with_capacity(line.len() + (line.len() / FOLD_WIDTH + 1) * CONTINUATION.len());
    // Continuation lines spend one octet on the leading space.
    let mut budget = FOLD_WIDTH;
    let mut used = 0;
    for ch in line.chars() {
        let width = ch.len_utf8();
        if used + width > budget {
            out.push_str(CONTINUATION);
            budget = FOLD_WIDTH - 1;
            used = 0;
        }
        out.push(ch);
        used += width;
    }
    out
}

/// Atomically replace `path` with the rendered card.
pub(crate) fn write_card(path: &Path, card: &Card) -> Result<(), CardError> {
    let has_card_extension = path
        .extension()
        .and_then(|ext| ext.to_str())
        .is_some_and(|ext| ext.eq_ignore_ascii_case(CARD_EXTENSION));
    if !has_card_extension {
        return Err(CardError::Write(format!(
            "{} does not have a .{CARD_EXTENSION} extension",
            path.display()
        )));
    }

    let dir = match path.parent() {
        Some(parent) if !parent.as_os_str().is_empty() => parent,
        _ => Path::new("."),
    };
    let write_err = |err: std::io::Error| CardError::Write(format!("{}: {err}", path.display()));

    let mut staged = tempfile::NamedTempFile::new_in(dir).map_err(write_err)?;
    staged.write_all(render_card(card).as_bytes()).map_err(write_err)?;
    staged.as_file().sync_all().map_err(write_err)?;
    staged.persist(path).map_err(|err| write_err(err.error))?;

    tracing::debug!(path = %path.display(), "wrote card");
    Ok(())
}
