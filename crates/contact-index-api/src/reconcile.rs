use std::path::Path;

use anyhow::Result;
use contact_index_core::{CardCodec, ExtractedFields, FailureKind};
use contact_index_store_sqlite::SqliteStore;
use serde::{Deserialize, Serialize};

use crate::index::{fields_of, load_valid_card, record_sighting, Sighting};
use crate::scan::{scan, ScannedCard};

/// A card the run could not use.
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq, Eq)]
pub struct SkippedCard {
    pub file_name: String,
    pub kind: FailureKind,
    pub message: String,
}

#[derive(Debug, Clone, Default, Serialize, Deserialize, PartialEq, Eq)]
pub struct ReconcileReport {
    pub scanned: usize,
    pub indexed_new: usize,
    pub refreshed: usize,
    pub contacts_inserted: usize,
    pub skipped: Vec<SkippedCard>,
    pub index_failures: usize,
    /// Cards that parsed and validated, in scan order.
    pub valid_files: Vec<String>,
}

/// Brings the index in line with the card store in a single pass.
pub struct Reconciler<'a, C: CardCodec> {
    store: &'a mut SqliteStore,
    codec: &'a C,
    cards_dir: &'a Path,
}

impl<'a, C: CardCodec> Reconciler<'a, C> {
    pub fn new(store: &'a mut SqliteStore, codec: &'a C, cards_dir: &'a Path) -> Self {
        Self { store, codec, cards_dir }
    }

    /// Scan the card store once and record every valid card in the index.
    ///
    /// Unusable cards and per-file index errors are reported and skipped; they never stop the run.
    ///
    /// # Errors
    /// Returns an error only when the card store cannot be listed.
    pub fn run(&mut self) -> Result<ReconcileReport> {
        let cards = scan(self.cards_dir)?;
        let mut report = ReconcileReport { scanned: cards.len(), ..ReconcileReport::default() };

        for card in &cards {
            let fields = match self.read_card(card) {
                Ok(fields) => fields,
                Err(skipped) => {
                    tracing::warn!(
                        "Skipping card {} ({}): {}",
                        skipped.file_name,
                        skipped.kind,
                        skipped.message
                    );
                    report.skipped.push(skipped);
                    continue;
                }
            };
            report.valid_files.push(card.file_name.clone());

            match self.index_card(card, &fields) {
                Ok(sighting) => {
                    if sighting.newly_tracked {
                        report.indexed_new += 1;
                    } else {
                        report.refreshed += 1;
                    }
                    if let Some(contact) = &sighting.contact_inserted {
                        report.contacts_inserted += 1;
                        tracing::debug!(
                            file = %sighting.file.file_name,
                            contact_id = %contact.contact_id,
                            "indexed contact"
                        );
                    }
                }
                Err(err) => {
                    report.index_failures += 1;
                    tracing::warn!("Failed to index {}: {:#}", card.file_name, err);
                }
            }
        }

        tracing::info!(
            scanned = report.scanned,
            indexed_new = report.indexed_new,
            refreshed = report.refreshed,
            contacts_inserted = report.contacts_inserted,
            skipped = report.skipped.len(),
            index_failures = report.index_failures,
            "reconciled card store"
        );
        Ok(report)
    }

    /// The card handle is dropped before this returns.
    fn read_card(&self, card: &ScannedCard) -> Result<ExtractedFields, SkippedCard> {
        let handle = load_valid_card(self.codec, &card.path).map_err(|failure| SkippedCard {
            file_name: card.file_name.clone(),
            kind: failure.kind,
            message: failure.error.to_string(),
        })?;
        Ok(fields_of(self.codec, &handle))
    }

    fn index_card(&mut self, card: &ScannedCard, fields: &ExtractedFields) -> Result<Sighting> {
        let tx = self.store.transaction()?;
        let sighting = record_sighting(&tx, &card.file_name, card.modified, fields)?;
        tx.commit()?;
        Ok(sighting)
    }
}
