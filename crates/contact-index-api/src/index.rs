//! Index primitives shared by the reconciliation and mutation paths.

use std::path::Path;

use anyhow::Result;
use contact_index_core::{
    extract_fields, is_card_file_name, CardCodec, CardError, ContactRecord, ExtractedFields,
    FailureKind, FileId, FileRecord,
};
use contact_index_store_sqlite::IndexTx;
use time::OffsetDateTime;

/// A card that could not be used, tagged with the step that rejected it.
#[derive(Debug, Clone, PartialEq, Eq)]
pub(crate) struct CardFailure {
    pub kind: FailureKind,
    pub error: CardError,
}

/// Result of recording one sighting of a card file.
#[derive(Debug, Clone)]
pub(crate) struct Sighting {
    pub file: FileRecord,
    pub newly_tracked: bool,
    pub contact_inserted: Option<ContactRecord>,
}

/// Parse and validate; the handle only escapes when both succeed.
pub(crate) fn load_valid_card<C: CardCodec>(
    codec: &C,
    path: &Path,
) -> Result<C::Handle, CardFailure> {
    let card = codec
        .parse(path)
        .map_err(|error| CardFailure { kind: FailureKind::ParseFailure, error })?;
    codec
        .validate(&card)
        .map_err(|error| CardFailure { kind: FailureKind::ValidationFailure, error })?;
    Ok(card)
}

pub(crate) fn fields_of<C: CardCodec>(codec: &C, card: &C::Handle) -> ExtractedFields {
    extract_fields(&codec.serialize(card))
}

/// A bare card file name: no directory part and a card extension.
pub(crate) fn is_plain_card_name(file_name: &str) -> bool {
    !file_name.is_empty()
        && !file_name.contains(['/', '\\'])
        && file_name != ".."
        && is_card_file_name(file_name)
}

/// Insert a contact for `file_id` unless one exists or the card carried no name.
pub(crate) fn ensure_contact(
    tx: &IndexTx<'_>,
    file_id: FileId,
    fields: &ExtractedFields,
) -> Result<Option<ContactRecord>> {
    if tx.contact_for_file(file_id)?.is_some() {
        return Ok(None);
    }
    let Some(values) = fields.to_new_contact() else {
        return Ok(None);
    };
    tx.insert_contact(file_id, &values).map(Some)
}

/// Track the file (or refresh its modification time) and fill in a missing contact.
///
/// An existing contact row is never modified here.
pub(crate) fn record_sighting(
    tx: &IndexTx<'_>,
    file_name: &str,
    modified: OffsetDateTime,
    fields: &ExtractedFields,
) -> Result<Sighting> {
    let (file, newly_tracked) = match tx.find_file(file_name)? {
        Some(mut file) => {
            tx.touch_file(file.file_id, modified)?;
            file.last_modified = modified;
            (file, false)
        }
        None => (tx.insert_file(file_name, modified, OffsetDateTime::now_utc())?, true),
    };
    let contact_inserted = ensure_contact(tx, file.file_id, fields)?;
    Ok(Sighting { file, newly_tracked, contact_inserted })
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn plain_card_names_have_no_directory_part() {
        assert!(is_plain_card_name("alice.vcf"));
        assert!(!is_plain_card_name(""));
        assert!(!is_plain_card_name("../alice.vcf"));
        assert!(!is_plain_card_name("cards/alice.vcf"));
        assert!(!is_plain_card_name("cards\\alice.vcf"));
        assert!(!is_plain_card_name("alice.txt"));
        assert!(!is_plain_card_name(".alice.vcf"));
    }
}
