use std::path::Path;

use anyhow::Result;
use contact_index_core::{
    CardCodec, CardError, ContactRecord, FailureKind, FileRecord, NewContact,
};
use contact_index_store_sqlite::SqliteStore;
use serde::{Deserialize, Serialize};
use time::OffsetDateTime;

use crate::index::{ensure_contact, fields_of, is_plain_card_name, load_valid_card, CardFailure};

/// Why a mutation was refused. Nothing was written when one of these is returned.
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq, Eq)]
#[serde(tag = "reason", rename_all = "snake_case")]
pub enum Rejection {
    DuplicateFileName,
    EmptyName,
    InvalidFileName,
    Card { kind: FailureKind, message: String },
}

impl From<CardFailure> for Rejection {
    fn from(failure: CardFailure) -> Self {
        Self::Card { kind: failure.kind, message: failure.error.to_string() }
    }
}

fn write_rejection(error: &CardError) -> Rejection {
    Rejection::Card { kind: FailureKind::WriteFailure, message: error.to_string() }
}

#[derive(Debug, Clone, Serialize, Deserialize, PartialEq, Eq)]
#[serde(tag = "outcome", rename_all = "snake_case")]
pub enum MutationOutcome {
    Created { file: FileRecord, contact: ContactRecord },
    Renamed { contact: ContactRecord },
    Rejected(Rejection),
}

/// Creates and renames contacts, keeping the card file and its index rows together.
///
/// The card file is always written before the index is touched.
pub struct ContactMutator<'a, C: CardCodec> {
    store: &'a mut SqliteStore,
    codec: &'a C,
    cards_dir: &'a Path,
}

impl<'a, C: CardCodec> ContactMutator<'a, C> {
    pub fn new(store: &'a mut SqliteStore, codec: &'a C, cards_dir: &'a Path) -> Self {
        Self { store, codec, cards_dir }
    }

    /// Write a new minimal card named `name` to `file_name` and index it.
    ///
    /// # Errors
    /// Returns an error when the index cannot be read or written. Card problems and name clashes
    /// are reported as [`MutationOutcome::Rejected`].
    pub fn create(&mut self, name: &str, file_name: &str) -> Result<MutationOutcome> {
        let name = name.trim();
        if !is_plain_card_name(file_name) {
            return Ok(MutationOutcome::Rejected(Rejection::InvalidFileName));
        }
        if self.store.find_file(file_name)?.is_some() {
            tracing::info!(file = file_name, "refusing to create card over a tracked file");
            return Ok(MutationOutcome::Rejected(Rejection::DuplicateFileName));
        }
        if name.is_empty() {
            return Ok(MutationOutcome::Rejected(Rejection::EmptyName));
        }

        let card = self.codec.create(name);
        if let Err(error) = self.codec.validate(&card) {
            let failure = CardFailure { kind: FailureKind::ValidationFailure, error };
            return Ok(MutationOutcome::Rejected(failure.into()));
        }
        if let Err(error) = self.codec.write(&self.cards_dir.join(file_name), &card) {
            tracing::warn!("Failed to write card {}: {}", file_name, error);
            return Ok(MutationOutcome::Rejected(write_rejection(&error)));
        }

        let now = OffsetDateTime::now_utc();
        let tx = self.store.transaction()?;
        let file = tx.insert_file(file_name, now, now)?;
        let contact = tx.insert_contact(file.file_id, &NewContact::named(name))?;
        tx.commit()?;

        tracing::info!(file = file_name, contact_id = %contact.contact_id, "created contact");
        Ok(MutationOutcome::Created { file, contact })
    }

    /// Rename the contact stored in `file_name`, creating the card when it is not tracked.
    ///
    /// Only the name changes; dates and every other property are left as they are.
    ///
    /// # Errors
    /// Returns an error when the index cannot be read or written.
    pub fn update(&mut self, file_name: &str, new_name: &str) -> Result<MutationOutcome> {
        let new_name = new_name.trim();
        if new_name.is_empty() {
            return Ok(MutationOutcome::Rejected(Rejection::EmptyName));
        }
        let Some(file) = self.store.find_file(file_name)? else {
            tracing::debug!(file = file_name, "update of untracked file falls back to create");
            return self.create(new_name, file_name);
        };

        let path = self.cards_dir.join(file_name);
        let mut card = match load_valid_card(self.codec, &path) {
            Ok(card) => card,
            Err(failure) => {
                tracing::warn!("Refusing to update {}: {}", file_name, failure.error);
                return Ok(MutationOutcome::Rejected(failure.into()));
            }
        };
        self.codec.set_name(&mut card, new_name);
        if let Err(error) = self.codec.validate(&card) {
            let failure = CardFailure { kind: FailureKind::ValidationFailure, error };
            return Ok(MutationOutcome::Rejected(failure.into()));
        }
        if let Err(error) = self.codec.write(&path, &card) {
            tracing::warn!("Failed to write card {}: {}", file_name, error);
            return Ok(MutationOutcome::Rejected(write_rejection(&error)));
        }
        let fields = fields_of(self.codec, &card);
        drop(card);

        let tx = self.store.transaction()?;
        let contact = match tx.contact_for_file(file.file_id)? {
            Some(existing) => {
                tx.rename_contact(existing.contact_id, new_name)?;
                ContactRecord { name: new_name.to_string(), ..existing }
            }
            None => match ensure_contact(&tx, file.file_id, &fields)? {
                Some(inserted) => inserted,
                None => tx.insert_contact(file.file_id, &NewContact::named(new_name))?,
            },
        };
        tx.commit()?;

        tracing::info!(file = file_name, contact_id = %contact.contact_id, "renamed contact");
        Ok(MutationOutcome::Renamed { contact })
    }
}
