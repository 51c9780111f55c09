use anyhow::Result;
use contact_index_core::{CardSummary, ContactDetail};
use contact_index_store_sqlite::{
    BirthdayListing, ContactListing, IndexStats, IntegrityReport, SchemaStatus, SqliteStore,
};
use contact_index_vcard::VcfCodec;
use serde::{Deserialize, Serialize};

mod config;
mod index;
mod mutate;
mod reconcile;
mod scan;

pub use config::{
    ContactIndexConfig, CARDS_DIR_ENV, DB_PATH_ENV, DEFAULT_CARDS_DIR, DEFAULT_DB_PATH,
};
pub use mutate::{ContactMutator, MutationOutcome, Rejection};
pub use reconcile::{ReconcileReport, Reconciler, SkippedCard};
pub use scan::{scan, ScannedCard};

#[derive(Debug, Clone, Serialize, Deserialize, PartialEq, Eq)]
pub struct MigrateResult {
    pub dry_run: bool,
    pub current_version: i64,
    pub target_version: i64,
    pub would_apply_versions: Vec<i64>,
    pub inferred_from_legacy: bool,
    pub after_version: Option<i64>,
    pub up_to_date: Option<bool>,
}

/// Operations a front end needs, each running against a freshly opened index.
#[derive(Debug, Clone)]
pub struct ContactIndexApi {
    config: ContactIndexConfig,
    codec: VcfCodec,
}

impl ContactIndexApi {
    #[must_use]
    pub fn new(config: ContactIndexConfig) -> Self {
        Self { config, codec: VcfCodec::new() }
    }

    #[must_use]
    pub fn config(&self) -> &ContactIndexConfig {
        &self.config
    }

    fn open_store(&self) -> Result<SqliteStore> {
        SqliteStore::open(&self.config.db_path)
    }

    fn open_migrated_store(&self) -> Result<SqliteStore> {
        let mut store = self.open_store()?;
        store.migrate()?;
        Ok(store)
    }

    /// Inspect schema status without mutating data.
    ///
    /// # Errors
    /// Returns an error when the `SQLite` database cannot be opened or queried.
    pub fn schema_status(&self) -> Result<SchemaStatus> {
        let store = self.open_store()?;
        store.schema_status()
    }

    /// Apply pending schema migrations, or report what would be applied for a dry run.
    ///
    /// # Errors
    /// Returns an error when the database cannot be opened or migration fails.
    pub fn migrate(&self, dry_run: bool) -> Result<MigrateResult> {
        let mut store = self.open_store()?;
        let before = store.schema_status()?;
        if dry_run {
            return Ok(MigrateResult {
                dry_run: true,
                current_version: before.current_version,
                target_version: before.target_version,
                would_apply_versions: before.pending_versions,
                inferred_from_legacy: before.inferred_from_legacy,
                after_version: None,
                up_to_date: None,
            });
        }

        let planned_versions = before.pending_versions;
        store.migrate()?;
        let after = store.schema_status()?;
        Ok(MigrateResult {
            dry_run: false,
            current_version: before.current_version,
            target_version: before.target_version,
            would_apply_versions: planned_versions,
            inferred_from_legacy: before.inferred_from_legacy,
            after_version: Some(after.current_version),
            up_to_date: Some(after.pending_versions.is_empty()),
        })
    }

    /// # Errors
    /// Returns an error when any integrity probe fails to run.
    pub fn integrity_check(&self) -> Result<IntegrityReport> {
        self.open_migrated_store()?.integrity_check()
    }

    /// # Errors
    /// Returns an error when the index cannot be opened or counted.
    pub fn stats(&self) -> Result<IndexStats> {
        self.open_migrated_store()?.stats()
    }

    /// Reconcile the index with the card store.
    ///
    /// # Errors
    /// Returns an error when the index cannot be opened or the card store cannot be listed.
    pub fn sync(&self) -> Result<ReconcileReport> {
        let mut store = self.open_migrated_store()?;
        Reconciler::new(&mut store, &self.codec, &self.config.cards_dir).run()
    }

    /// Reconcile, then list every valid card labeled by its file name.
    ///
    /// # Errors
    /// Same as [`ContactIndexApi::sync`].
    pub fn list_summaries(&self) -> Result<Vec<CardSummary>> {
        let report = self.sync()?;
        Ok(report
            .valid_files
            .into_iter()
            .map(|file_name| CardSummary { label: file_name.clone(), file_name })
            .collect())
    }

    /// Display fields of one card, read straight from its file.
    ///
    /// An unreadable or invalid card yields blank fields.
    #[must_use]
    pub fn get_detail(&self, file_name: &str) -> ContactDetail {
        if !index::is_plain_card_name(file_name) {
            tracing::warn!("Refusing to read card with unsafe name {:?}", file_name);
            return ContactDetail::blank(file_name);
        }
        let path = self.config.cards_dir.join(file_name);
        match index::load_valid_card(&self.codec, &path) {
            Ok(card) => {
                ContactDetail::from_fields(file_name, &index::fields_of(&self.codec, &card))
            }
            Err(failure) => {
                tracing::warn!("Failed to read card {} ({}): {}", file_name, failure.kind, failure.error);
                ContactDetail::blank(file_name)
            }
        }
    }

    /// # Errors
    /// Returns an error when the index cannot be read or written.
    pub fn create(&self, name: &str, file_name: &str) -> Result<MutationOutcome> {
        let mut store = self.open_migrated_store()?;
        ContactMutator::new(&mut store, &self.codec, &self.config.cards_dir).create(name, file_name)
    }

    /// # Errors
    /// Returns an error when the index cannot be read or written.
    pub fn update(&self, file_name: &str, name: &str) -> Result<MutationOutcome> {
        let mut store = self.open_migrated_store()?;
        ContactMutator::new(&mut store, &self.codec, &self.config.cards_dir).update(file_name, name)
    }

    /// # Errors
    /// Returns an error when the index cannot be read.
    pub fn list_contacts(&self) -> Result<Vec<ContactListing>> {
        self.open_migrated_store()?.list_contacts()
    }

    /// # Errors
    /// Returns an error for a month outside 1-12 or when the index cannot be read.
    pub fn born_in_month(&self, month: u8) -> Result<Vec<BirthdayListing>> {
        self.open_migrated_store()?.contacts_born_in_month(month)
    }
}

#[cfg(test)]
mod test_support {
    use std::fs;
    use std::path::{Path, PathBuf};

    use anyhow::Result;
    use contact_index_store_sqlite::SqliteStore;
    use contact_index_vcard::VcfCodec;
    use tempfile::TempDir;

    use crate::{ContactMutator, ReconcileReport, Reconciler};

    /// CRLF card text with `FN:name` followed by `extra` content lines.
    pub fn card_text(name: &str, extra: &[&str]) -> String {
        let mut lines = vec!["BEGIN:VCARD".to_string(), "VERSION:4.0".to_string()];
        lines.push(format!("FN:{name}"));
        lines.extend(extra.iter().map(|line| (*line).to_string()));
        lines.push("END:VCARD".to_string());
        let mut text = lines.join("\r\n");
        text.push_str("\r\n");
        text
    }

    pub fn write_card(dir: &Path, file_name: &str, text: &str) -> Result<PathBuf> {
        let path = dir.join(file_name);
        fs::write(&path, text)?;
        Ok(path)
    }

    /// A migrated index file and an empty card store in one temporary directory.
    pub struct TestStore {
        pub store: SqliteStore,
        pub db_path: PathBuf,
        cards_dir: PathBuf,
        codec: VcfCodec,
        _dir: TempDir,
    }

    impl TestStore {
        pub fn new() -> Result<Self> {
            let dir = tempfile::tempdir()?;
            let db_path = dir.path().join("index.sqlite3");
            let cards_dir = dir.path().join("cards");
            fs::create_dir(&cards_dir)?;
            let mut store = SqliteStore::open(&db_path)?;
            store.migrate()?;
            Ok(Self { store, db_path, cards_dir, codec: VcfCodec::new(), _dir: dir })
        }

        pub fn cards(&self) -> &Path {
            &self.cards_dir
        }

        pub fn reconcile(&mut self) -> Result<ReconcileReport> {
            Reconciler::new(&mut self.store, &self.codec, &self.cards_dir).run()
        }

        pub fn mutator(&mut self) -> ContactMutator<'_, VcfCodec> {
            ContactMutator::new(&mut self.store, &self.codec, &self.cards_dir)
        }
    }
}
