use std::path::Path;

use anyhow::{anyhow, Context, Result};
use contact_index_core::{ContactId, ContactRecord, FileId, FileRecord, NewContact};
use rusqlite::{params, Connection, OptionalExtension, Row, Transaction};
use serde::{Deserialize, Serialize};
use time::format_description::BorrowedFormatItem;
use time::macros::format_description;
use time::{OffsetDateTime, PrimitiveDateTime, UtcOffset};

const LATEST_SCHEMA_VERSION: i64 = 2;

const INDEX_TIMESTAMP: &[BorrowedFormatItem<'_>] =
    format_description!("[year]-[month]-[day] [hour]:[minute]:[second]");

const CREATE_SCHEMA_MIGRATIONS_SQL: &str = r"
CREATE TABLE IF NOT EXISTS schema_migrations (
  version INTEGER PRIMARY KEY,
  applied_at TEXT NOT NULL
);
";

const MIGRATION_001_SQL: &str = r"
CREATE TABLE IF NOT EXISTS files (
  file_id INTEGER PRIMARY KEY AUTOINCREMENT,
  file_name TEXT NOT NULL UNIQUE,
  last_modified TEXT NOT NULL,
  created_at TEXT NOT NULL
);

CREATE TABLE IF NOT EXISTS contacts (
  contact_id INTEGER PRIMARY KEY AUTOINCREMENT,
  name TEXT NOT NULL,
  birthday TEXT,
  anniversary TEXT,
  file_id INTEGER NOT NULL,
  FOREIGN KEY (file_id) REFERENCES files(file_id) ON DELETE CASCADE
);
";

const MIGRATION_002_SQL: &str = r"
CREATE INDEX IF NOT EXISTS idx_contacts_file_id ON contacts(file_id);
CREATE INDEX IF NOT EXISTS idx_contacts_name ON contacts(name);
";

const FILE_COLUMNS: &str = "file_id, file_name, last_modified, created_at";
const CONTACT_COLUMNS: &str = "contact_id, name, birthday, anniversary, file_id";

pub struct SqliteStore {
    conn: Connection,
}

#[derive(Debug, Clone, Serialize, Deserialize, PartialEq, Eq)]
pub struct SchemaStatus {
    pub current_version: i64,
    pub target_version: i64,
    pub pending_versions: Vec<i64>,
    pub inferred_from_legacy: bool,
}

#[derive(Debug, Clone, Serialize, Deserialize, PartialEq, Eq)]
pub struct ForeignKeyViolation {
    pub table: String,
    pub rowid: i64,
    pub parent: String,
    pub fk_index: i64,
}

/// A file row that owns more than one contact row.
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq, Eq)]
pub struct DuplicateContacts {
    pub file_id: FileId,
    pub file_name: String,
    pub contacts: i64,
}

#[derive(Debug, Clone, Serialize, Deserialize, PartialEq, Eq)]
pub struct IntegrityReport {
    pub quick_check_ok: bool,
    pub quick_check_message: String,
    pub foreign_key_violations: Vec<ForeignKeyViolation>,
    pub files_with_multiple_contacts: Vec<DuplicateContacts>,
    pub schema_status: SchemaStatus,
}

#[derive(Debug, Clone, Copy, Serialize, Deserialize, PartialEq, Eq)]
pub struct IndexStats {
    pub files: i64,
    pub contacts: i64,
}

/// Contact row joined with the name of the file it was read from.
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq, Eq)]
pub struct ContactListing {
    pub contact_id: ContactId,
    pub name: String,
    #[serde(with = "contact_index_core::index_timestamp::option")]
    pub birthday: Option<PrimitiveDateTime>,
    #[serde(with = "contact_index_core::index_timestamp::option")]
    pub anniversary: Option<PrimitiveDateTime>,
    pub file_name: String,
}

#[derive(Debug, Clone, Serialize, Deserialize, PartialEq, Eq)]
pub struct BirthdayListing {
    pub contact_id: ContactId,
    pub name: String,
    #[serde(with = "contact_index_core::index_timestamp")]
    pub birthday: PrimitiveDateTime,
    pub file_name: String,
    #[serde(with = "time::serde::rfc3339")]
    pub last_modified: OffsetDateTime,
}

impl SqliteStore {
    /// Open a SQLite-backed index and configure required runtime pragmas.
    ///
    /// # Errors
    /// Returns an error when the database cannot be opened or pragmas cannot be applied.
    pub fn open(path: &Path) -> Result<Self> {
        let conn = Connection::open(path)
            .with_context(|| format!("failed to open sqlite database at {}", path.display()))?;

        conn.execute_batch(
            "PRAGMA journal_mode = WAL;
             PRAGMA foreign_keys = ON;
             PRAGMA busy_timeout = 5000;",
        )
        .context("failed to configure sqlite pragmas")?;

        Ok(Self { conn })
    }

    /// Report current and target schema versions plus pending migrations.
    ///
    /// # Errors
    /// Returns an error when schema metadata cannot be read or initialized.
    pub fn schema_status(&self) -> Result<SchemaStatus> {
        self.conn
            .execute_batch(CREATE_SCHEMA_MIGRATIONS_SQL)
            .context("failed to apply schema_migrations table")?;
        let (current_version, inferred_from_legacy) = detect_effective_schema_version(&self.conn)?;
        let pending_versions = if current_version < LATEST_SCHEMA_VERSION {
            ((current_version + 1)..=LATEST_SCHEMA_VERSION).collect::<Vec<_>>()
        } else {
            Vec::new()
        };

        Ok(SchemaStatus {
            current_version,
            target_version: LATEST_SCHEMA_VERSION,
            pending_versions,
            inferred_from_legacy,
        })
    }

    /// Apply all forward migrations up to the latest supported schema version.
    ///
    /// # Errors
    /// Returns an error when migration bootstrapping or any migration step fails.
    pub fn migrate(&mut self) -> Result<()> {
        self.conn
            .execute_batch(CREATE_SCHEMA_MIGRATIONS_SQL)
            .context("failed to apply schema_migrations table")?;

        let (mut version, inferred) = detect_effective_schema_version(&self.conn)?;
        if inferred {
            // Tables exist without migration rows: record what is already there.
            for applied in 1..=version {
                record_schema_version(&self.conn, applied)?;
            }
        }

        if version < 1 {
            self.apply_migration(1, MIGRATION_001_SQL)?;
            version = 1;
        }
        if version < 2 {
            self.apply_migration(2, MIGRATION_002_SQL)?;
            version = 2;
        }

        if version != LATEST_SCHEMA_VERSION {
            return Err(anyhow!(
                "unsupported schema version {version}; expected {LATEST_SCHEMA_VERSION}"
            ));
        }

        Ok(())
    }

    fn apply_migration(&mut self, version: i64, sql: &str) -> Result<()> {
        let tx = self
            .conn
            .transaction()
            .with_context(|| format!("failed to start migration v{version} transaction"))?;
        tx.execute_batch(sql).with_context(|| format!("failed to apply migration v{version}"))?;
        record_schema_version(&tx, version)?;
        tx.commit().with_context(|| format!("failed to commit migration v{version}"))?;
        tracing::debug!(version, "applied index migration");
        Ok(())
    }

    /// Start a write transaction over the index.
    ///
    /// # Errors
    /// Returns an error when `SQLite` refuses to begin the transaction.
    pub fn transaction(&mut self) -> Result<IndexTx<'_>> {
        let tx = self.conn.transaction().context("failed to start transaction")?;
        Ok(IndexTx { tx })
    }

    /// # Errors
    /// Returns an error when the lookup query fails or the row cannot be decoded.
    pub fn find_file(&self, file_name: &str) -> Result<Option<FileRecord>> {
        find_file(&self.conn, file_name)
    }

    /// # Errors
    /// Returns an error when the lookup query fails or the row cannot be decoded.
    pub fn contact_for_file(&self, file_id: FileId) -> Result<Option<ContactRecord>> {
        contact_for_file(&self.conn, file_id)
    }

    /// Every tracked file, ordered by file name.
    ///
    /// # Errors
    /// Returns an error when rows cannot be read or decoded.
    pub fn list_files(&self) -> Result<Vec<FileRecord>> {
        let mut stmt = self
            .conn
            .prepare(&format!("SELECT {FILE_COLUMNS} FROM files ORDER BY file_name ASC"))
            .context("failed to prepare file listing")?;
        let mut rows = stmt.query([])?;
        let mut files = Vec::new();
        while let Some(row) = rows.next()? {
            files.push(file_from_row(row)?);
        }
        Ok(files)
    }

    /// Every contact with its file name, ordered by contact name.
    ///
    /// # Errors
    /// Returns an error when rows cannot be read or decoded.
    pub fn list_contacts(&self) -> Result<Vec<ContactListing>> {
        let mut stmt = self
            .conn
            .prepare(
                "SELECT c.contact_id, c.name, c.birthday, c.anniversary, f.file_name
                 FROM contacts c
                 JOIN files f ON f.file_id = c.file_id
                 ORDER BY c.name ASC, c.contact_id ASC",
            )
            .context("failed to prepare contact listing")?;
        let mut rows = stmt.query([])?;
        let mut contacts = Vec::new();
        while let Some(row) = rows.next()? {
            let birthday: Option<String> = row.get(2)?;
            let anniversary: Option<String> = row.get(3)?;
            contacts.push(ContactListing {
                contact_id: ContactId(row.get(0)?),
                name: row.get(1)?,
                birthday: birthday.as_deref().map(parse_index_timestamp).transpose()?,
                anniversary: anniversary.as_deref().map(parse_index_timestamp).transpose()?,
                file_name: row.get(4)?,
            });
        }
        Ok(contacts)
    }

    /// Contacts born in `month` (1-12), oldest first as of their file's last modification.
    ///
    /// # Errors
    /// Returns an error for a month outside 1-12 or when rows cannot be read or decoded.
    pub fn contacts_born_in_month(&self, month: u8) -> Result<Vec<BirthdayListing>> {
        if !(1..=12).contains(&month) {
            return Err(anyhow!("month must be between 1 and 12, got {month}"));
        }

        let mut stmt = self
            .conn
            .prepare(
                "SELECT c.contact_id, c.name, c.birthday, f.file_name, f.last_modified
                 FROM contacts c
                 JOIN files f ON f.file_id = c.file_id
                 WHERE c.birthday IS NOT NULL
                   AND CAST(strftime('%m', c.birthday) AS INTEGER) = ?1
                 ORDER BY julianday(f.last_modified) - julianday(c.birthday) DESC,
                          c.name ASC",
            )
            .context("failed to prepare birthday query")?;
        let mut rows = stmt.query(params![i64::from(month)])?;
        let mut listings = Vec::new();
        while let Some(row) = rows.next()? {
            let birthday: String = row.get(2)?;
            let last_modified: String = row.get(4)?;
            listings.push(BirthdayListing {
                contact_id: ContactId(row.get(0)?),
                name: row.get(1)?,
                birthday: parse_index_timestamp(&birthday)?,
                file_name: row.get(3)?,
                last_modified: parse_rfc3339(&last_modified)?,
            });
        }
        Ok(listings)
    }

    /// # Errors
    /// Returns an error when either count query fails.
    pub fn stats(&self) -> Result<IndexStats> {
        let count = |table: &str| -> Result<i64> {
            self.conn
                .query_row(&format!("SELECT COUNT(*) FROM {table}"), [], |row| row.get(0))
                .with_context(|| format!("failed to count rows in {table}"))
        };
        Ok(IndexStats { files: count("files")?, contacts: count("contacts")? })
    }

    /// Run quick-check, foreign-key-check, duplicate-contact, and schema status probes.
    ///
    /// # Errors
    /// Returns an error when any integrity probe query fails.
    pub fn integrity_check(&self) -> Result<IntegrityReport> {
        let quick_check_message: String = self
            .conn
            .query_row("PRAGMA quick_check", [], |row| row.get::<_, String>(0))
            .context("failed to run PRAGMA quick_check")?;

        let mut stmt = self
            .conn
            .prepare("PRAGMA foreign_key_check")
            .context("failed to prepare PRAGMA foreign_key_check")?;
        let rows = stmt.query_map([], |row| {
            Ok(ForeignKeyViolation {
                table: row.get(0)?,
                rowid: row.get(1)?,
                parent: row.get(2)?,
                fk_index: row.get(3)?,
            })
        })?;
        let mut foreign_key_violations = Vec::new();
        for row in rows {
            foreign_key_violations.push(row?);
        }

        let files_with_multiple_contacts = if table_exists(&self.conn, "contacts")? {
            let mut stmt = self
                .conn
                .prepare(
                    "SELECT f.file_id, f.file_name, COUNT(c.contact_id)
                     FROM files f
                     JOIN contacts c ON c.file_id = f.file_id
                     GROUP BY f.file_id, f.file_name
                     HAVING COUNT(c.contact_id) > 1
                     ORDER BY f.file_name ASC",
                )
                .context("failed to prepare duplicate contact probe")?;
            let rows = stmt.query_map([], |row| {
                Ok(DuplicateContacts {
                    file_id: FileId(row.get(0)?),
                    file_name: row.get(1)?,
                    contacts: row.get(2)?,
                })
            })?;
            rows.collect::<rusqlite::Result<Vec<_>>>()?
        } else {
            Vec::new()
        };

        let schema_status = self.schema_status()?;
        Ok(IntegrityReport {
            quick_check_ok: quick_check_message == "ok",
            quick_check_message,
            foreign_key_violations,
            files_with_multiple_contacts,
            schema_status,
        })
    }
}

/// One unit of index work. Dropping it without [`IndexTx::commit`] rolls everything back.
pub struct IndexTx<'a> {
    tx: Transaction<'a>,
}

impl IndexTx<'_> {
    /// # Errors
    /// Returns an error when the lookup query fails or the row cannot be decoded.
    pub fn find_file(&self, file_name: &str) -> Result<Option<FileRecord>> {
        find_file(&self.tx, file_name)
    }

    /// # Errors
    /// Returns an error when the lookup query fails or the row cannot be decoded.
    pub fn contact_for_file(&self, file_id: FileId) -> Result<Option<ContactRecord>> {
        contact_for_file(&self.tx, file_id)
    }

    /// Insert a file row. Timestamps are stored in UTC at second precision.
    ///
    /// # Errors
    /// Returns an error when the name is already tracked or the insert fails.
    pub fn insert_file(
        &self,
        file_name: &str,
        last_modified: OffsetDateTime,
        created_at: OffsetDateTime,
    ) -> Result<FileRecord> {
        let last_modified = index_instant(last_modified)?;
        let created_at = index_instant(created_at)?;
        self.tx
            .execute(
                "INSERT INTO files(file_name, last_modified, created_at) VALUES (?1, ?2, ?3)",
                params![file_name, rfc3339(last_modified)?, rfc3339(created_at)?],
            )
            .with_context(|| format!("failed to insert file row for {file_name}"))?;

        Ok(FileRecord {
            file_id: FileId(self.tx.last_insert_rowid()),
            file_name: file_name.to_string(),
            last_modified,
            created_at,
        })
    }

    /// Overwrite the stored modification time of a tracked file.
    ///
    /// # Errors
    /// Returns an error when the update fails or no row carries `file_id`.
    pub fn touch_file(&self, file_id: FileId, last_modified: OffsetDateTime) -> Result<()> {
        let changed = self
            .tx
            .execute(
                "UPDATE files SET last_modified = ?1 WHERE file_id = ?2",
                params![rfc3339(index_instant(last_modified)?)?, file_id.0],
            )
            .with_context(|| format!("failed to update last_modified for file {file_id}"))?;
        if changed == 0 {
            return Err(anyhow!("file {file_id} is not tracked"));
        }
        Ok(())
    }

    /// # Errors
    /// Returns an error when the insert fails, including an unknown `file_id`.
    pub fn insert_contact(&self, file_id: FileId, contact: &NewContact) -> Result<ContactRecord> {
        self.tx
            .execute(
                "INSERT INTO contacts(name, birthday, anniversary, file_id) VALUES (?1, ?2, ?3, ?4)",
                params![
                    contact.name,
                    contact.birthday.map(format_index_timestamp).transpose()?,
                    contact.anniversary.map(format_index_timestamp).transpose()?,
                    file_id.0,
                ],
            )
            .with_context(|| format!("failed to insert contact for file {file_id}"))?;

        Ok(ContactRecord {
            contact_id: ContactId(self.tx.last_insert_rowid()),
            name: contact.name.clone(),
            birthday: contact.birthday,
            anniversary: contact.anniversary,
            file_id,
        })
    }

    /// Change only the name column of a contact.
    ///
    /// # Errors
    /// Returns an error when the update fails or no row carries `contact_id`.
    pub fn rename_contact(&self, contact_id: ContactId, name: &str) -> Result<()> {
        let changed = self
            .tx
            .execute(
                "UPDATE contacts SET name = ?1 WHERE contact_id = ?2",
                params![name, contact_id.0],
            )
            .with_context(|| format!("failed to rename contact {contact_id}"))?;
        if changed == 0 {
            return Err(anyhow!("contact {contact_id} does not exist"));
        }
        Ok(())
    }

    /// # Errors
    /// Returns an error when `SQLite` cannot commit.
    pub fn commit(self) -> Result<()> {
        self.tx.commit().context("failed to commit index transaction")
    }
}

fn find_file(conn: &Connection, file_name: &str) -> Result<Option<FileRecord>> {
    let mut stmt = conn
        .prepare(&format!("SELECT {FILE_COLUMNS} FROM files WHERE file_name = ?1"))
        .context("failed to prepare file lookup")?;
    let mut rows = stmt.query(params![file_name])?;
    rows.next()?.map(file_from_row).transpose()
}

fn contact_for_file(conn: &Connection, file_id: FileId) -> Result<Option<ContactRecord>> {
    conn.query_row(
        &format!(
            "SELECT {CONTACT_COLUMNS} FROM contacts WHERE file_id = ?1
             ORDER BY contact_id ASC LIMIT 1"
        ),
        params![file_id.0],
        |row| {
            Ok((
                row.get::<_, i64>(0)?,
                row.get::<_, String>(1)?,
                row.get::<_, Option<String>>(2)?,
                row.get::<_, Option<String>>(3)?,
                row.get::<_, i64>(4)?,
            ))
        },
    )
    .optional()
    .with_context(|| format!("failed to look up contact for file {file_id}"))?
    .map(|(contact_id, name, birthday, anniversary, file_id)| -> Result<ContactRecord> {
        Ok(ContactRecord {
            contact_id: ContactId(contact_id),
            name,
            birthday: birthday.as_deref().map(parse_index_timestamp).transpose()?,
            anniversary: anniversary.as_deref().map(parse_index_timestamp).transpose()?,
            file_id: FileId(file_id),
        })
    })
    .transpose()
}

fn file_from_row(row: &Row<'_>) -> Result<FileRecord> {
    let last_modified: String = row.get(2)?;
    let created_at: String = row.get(3)?;
    Ok(FileRecord {
        file_id: FileId(row.get(0)?),
        file_name: row.get(1)?,
        last_modified: parse_rfc3339(&last_modified)?,
        created_at: parse_rfc3339(&created_at)?,
    })
}

fn table_exists(conn: &Connection, table_name: &str) -> Result<bool> {
    let exists = conn
        .query_row(
            "SELECT EXISTS(SELECT 1 FROM sqlite_master WHERE type = 'table' AND name = ?1)",
            params![table_name],
            |row| row.get::<_, i64>(0),
        )
        .with_context(|| format!("failed to check if table exists: {table_name}"))?;
    Ok(exists == 1)
}

fn index_exists(conn: &Connection, index_name: &str) -> Result<bool> {
    let exists = conn
        .query_row(
            "SELECT EXISTS(SELECT 1 FROM sqlite_master WHERE type = 'index' AND name = ?1)",
            params![index_name],
            |row| row.get::<_, i64>(0),
        )
        .with_context(|| format!("failed to check if index exists: {index_name}"))?;
    Ok(exists == 1)
}

fn current_schema_version(conn: &Connection) -> Result<i64> {
    let version = conn
        .query_row("SELECT COALESCE(MAX(version), 0) FROM schema_migrations", [], |row| {
            row.get::<_, i64>(0)
        })
        .context("failed to read current schema version")?;
    Ok(version)
}

fn detect_effective_schema_version(conn: &Connection) -> Result<(i64, bool)> {
    let recorded = current_schema_version(conn)?;
    if recorded > 0 {
        return Ok((recorded, false));
    }

    let has_files = table_exists(conn, "files")?;
    let has_contacts = table_exists(conn, "contacts")?;
    match (has_files, has_contacts) {
        (false, false) => Ok((0, false)),
        (true, true) if index_exists(conn, "idx_contacts_file_id")? => Ok((2, true)),
        (true, true) => Ok((1, true)),
        _ => Err(anyhow!("database schema is invalid: files and contacts must exist together")),
    }
}

fn record_schema_version(conn: &Connection, version: i64) -> Result<()> {
    let now = rfc3339(OffsetDateTime::now_utc())?;
    conn.execute(
        "INSERT OR IGNORE INTO schema_migrations(version, applied_at) VALUES (?1, ?2)",
        params![version, now],
    )
    .with_context(|| format!("failed to record migration version {version}"))?;
    Ok(())
}

/// UTC with the sub-second part dropped, the precision kept by the index.
fn index_instant(value: OffsetDateTime) -> Result<OffsetDateTime> {
    value
        .to_offset(UtcOffset::UTC)
        .replace_nanosecond(0)
        .context("failed to truncate timestamp to seconds")
}

fn rfc3339(value: OffsetDateTime) -> Result<String> {
    value
        .format(&time::format_description::well_known::Rfc3339)
        .context("failed to format RFC3339 timestamp")
}

fn parse_rfc3339(value: &str) -> Result<OffsetDateTime> {
    OffsetDateTime::parse(value, &time::format_description::well_known::Rfc3339)
        .with_context(|| format!("invalid RFC3339 timestamp: {value}"))
}

fn format_index_timestamp(value: PrimitiveDateTime) -> Result<String> {
    value.format(INDEX_TIMESTAMP).context("failed to format contact timestamp")
}

fn parse_index_timestamp(value: &str) -> Result<PrimitiveDateTime> {
    PrimitiveDateTime::parse(value, INDEX_TIMESTAMP)
        .with_context(|| format!("invalid contact timestamp: {value}"))
}

#[cfg(test)]
mod tests {
    use time::macros::datetime;
    use time::Month;

    use super::*;

    fn migrated() -> Result<SqliteStore> {
        let mut store = SqliteStore::open(Path::new(":memory:"))?;
        store.migrate()?;
        Ok(store)
    }

    fn contact(name: &str, birthday: Option<PrimitiveDateTime>) -> NewContact {
        NewContact { name: name.to_string(), birthday, anniversary: None }
    }

    fn add_file_with_contact(
        store: &mut SqliteStore,
        file_name: &str,
        last_modified: OffsetDateTime,
        new_contact: &NewContact,
    ) -> Result<(FileRecord, ContactRecord)> {
        let tx = store.transaction()?;
        let file = tx.insert_file(file_name, last_modified, last_modified)?;
        let contact = tx.insert_contact(file.file_id, new_contact)?;
        tx.commit()?;
        Ok((file, contact))
    }

    #[test]
    fn fresh_database_reports_pending_versions() -> Result<()> {
        let store = SqliteStore::open(Path::new(":memory:"))?;
        let status = store.schema_status()?;
        assert_eq!(status.current_version, 0);
        assert_eq!(status.pending_versions, vec![1, 2]);
        assert!(!status.inferred_from_legacy);
        Ok(())
    }

    #[test]
    fn migrate_is_repeatable() -> Result<()> {
        let mut store = migrated()?;
        store.migrate()?;
        let status = store.schema_status()?;
        assert_eq!(status.current_version, LATEST_SCHEMA_VERSION);
        assert!(status.pending_versions.is_empty());
        Ok(())
    }

    #[test]
    fn legacy_tables_without_migration_rows_are_inferred() -> Result<()> {
        let mut store = SqliteStore::open(Path::new(":memory:"))?;
        store.conn.execute_batch(MIGRATION_001_SQL)?;

        let status = store.schema_status()?;
        assert_eq!(status.current_version, 1);
        assert!(status.inferred_from_legacy);
        assert_eq!(status.pending_versions, vec![2]);

        store.migrate()?;
        let status = store.schema_status()?;
        assert_eq!(status.current_version, 2);
        assert!(!status.inferred_from_legacy);
        Ok(())
    }

    #[test]
    fn file_rows_round_trip_at_second_precision() -> Result<()> {
        let mut store = migrated()?;
        let modified = datetime!(2024-03-01 10:20:30.987 +02:00);
        let created = datetime!(2024-03-02 00:00:00 UTC);

        let tx = store.transaction()?;
        let inserted = tx.insert_file("alice.vcf", modified, created)?;
        tx.commit()?;

        let found = store
            .find_file("alice.vcf")?
            .unwrap_or_else(|| panic!("inserted file should be found"));
        assert_eq!(found, inserted);
        assert_eq!(found.last_modified, datetime!(2024-03-01 08:20:30 UTC));
        assert_eq!(found.created_at, created);
        assert_eq!(store.find_file("bob.vcf")?, None);
        Ok(())
    }

    #[test]
    fn duplicate_file_names_are_rejected() -> Result<()> {
        let mut store = migrated()?;
        let now = OffsetDateTime::now_utc();
        let tx = store.transaction()?;
        tx.insert_file("alice.vcf", now, now)?;
        assert!(tx.insert_file("alice.vcf", now, now).is_err());
        Ok(())
    }

    #[test]
    fn touch_updates_only_last_modified() -> Result<()> {
        let mut store = migrated()?;
        let created = datetime!(2020-01-01 00:00:00 UTC);
        let tx = store.transaction()?;
        let file = tx.insert_file("alice.vcf", created, created)?;
        tx.touch_file(file.file_id, datetime!(2021-06-01 12:00:00 UTC))?;
        assert!(tx.touch_file(FileId(999), created).is_err());
        tx.commit()?;

        let found = store
            .find_file("alice.vcf")?
            .unwrap_or_else(|| panic!("file should still be tracked"));
        assert_eq!(found.last_modified, datetime!(2021-06-01 12:00:00 UTC));
        assert_eq!(found.created_at, created);
        Ok(())
    }

    #[test]
    fn uncommitted_transactions_roll_back() -> Result<()> {
        let mut store = migrated()?;
        let now = OffsetDateTime::now_utc();
        {
            let tx = store.transaction()?;
            tx.insert_file("ghost.vcf", now, now)?;
        }
        assert_eq!(store.find_file("ghost.vcf")?, None);
        Ok(())
    }

    #[test]
    fn contacts_round_trip_and_rename() -> Result<()> {
        let mut store = migrated()?;
        let now = OffsetDateTime::now_utc();
        let (file, inserted) = add_file_with_contact(
            &mut store,
            "ada.vcf",
            now,
            &NewContact {
                name: "Ada".to_string(),
                birthday: Some(datetime!(1815-12-10 00:00:00)),
                anniversary: Some(datetime!(1835-07-08 09:30:00)),
            },
        )?;

        let found = store
            .contact_for_file(file.file_id)?
            .unwrap_or_else(|| panic!("contact should be found"));
        assert_eq!(found, inserted);

        let tx = store.transaction()?;
        tx.rename_contact(found.contact_id, "Ada Lovelace")?;
        assert!(tx.rename_contact(ContactId(999), "Nobody").is_err());
        tx.commit()?;

        let renamed = store
            .contact_for_file(file.file_id)?
            .unwrap_or_else(|| panic!("contact should survive rename"));
        assert_eq!(renamed.name, "Ada Lovelace");
        assert_eq!(renamed.birthday, inserted.birthday);
        assert_eq!(renamed.anniversary, inserted.anniversary);
        Ok(())
    }

    #[test]
    fn contacts_require_a_tracked_file() -> Result<()> {
        let mut store = migrated()?;
        let tx = store.transaction()?;
        assert!(tx.insert_contact(FileId(42), &contact("Orphan", None)).is_err());
        Ok(())
    }

    #[test]
    fn deleting_a_file_cascades_to_its_contact() -> Result<()> {
        let mut store = migrated()?;
        let now = OffsetDateTime::now_utc();
        add_file_with_contact(&mut store, "gone.vcf", now, &contact("Gone", None))?;
        store.conn.execute("DELETE FROM files WHERE file_name = 'gone.vcf'", [])?;
        assert_eq!(store.stats()?, IndexStats { files: 0, contacts: 0 });
        Ok(())
    }

    #[test]
    fn contact_listing_is_ordered_by_name() -> Result<()> {
        let mut store = migrated()?;
        let now = OffsetDateTime::now_utc();
        add_file_with_contact(&mut store, "z.vcf", now, &contact("Zed", None))?;
        add_file_with_contact(
            &mut store,
            "a.vcf",
            now,
            &contact("Amy", Some(datetime!(1990-06-15 00:00:00))),
        )?;

        let listing = store.list_contacts()?;
        let names: Vec<&str> = listing.iter().map(|row| row.name.as_str()).collect();
        assert_eq!(names, vec!["Amy", "Zed"]);
        assert_eq!(listing[0].file_name, "a.vcf");
        assert_eq!(listing[0].birthday, Some(datetime!(1990-06-15 00:00:00)));

        let files = store.list_files()?;
        assert_eq!(files.len(), 2);
        assert_eq!(files[0].file_name, "a.vcf");
        Ok(())
    }

    #[test]
    fn born_in_month_orders_oldest_first() -> Result<()> {
        let mut store = migrated()?;
        let modified = datetime!(2024-01-01 00:00:00 UTC);
        add_file_with_contact(
            &mut store,
            "young.vcf",
            modified,
            &contact("Young", Some(datetime!(2000-06-01 00:00:00))),
        )?;
        add_file_with_contact(
            &mut store,
            "old.vcf",
            modified,
            &contact("Old", Some(datetime!(1950-06-30 12:00:00))),
        )?;
        add_file_with_contact(
            &mut store,
            "july.vcf",
            modified,
            &contact("July", Some(datetime!(1980-07-01 00:00:00))),
        )?;
        add_file_with_contact(&mut store, "none.vcf", modified, &contact("None", None))?;

        let june = store.contacts_born_in_month(6)?;
        let names: Vec<&str> = june.iter().map(|row| row.name.as_str()).collect();
        assert_eq!(names, vec!["Old", "Young"]);
        assert_eq!(june[0].birthday.month(), Month::June);
        assert_eq!(june[0].last_modified, modified);

        assert!(store.contacts_born_in_month(0).is_err());
        assert!(store.contacts_born_in_month(13).is_err());
        Ok(())
    }

    #[test]
    fn integrity_check_reports_clean_database() -> Result<()> {
        let store = migrated()?;
        let report = store.integrity_check()?;
        assert!(report.quick_check_ok);
        assert!(report.foreign_key_violations.is_empty());
        assert!(report.files_with_multiple_contacts.is_empty());
        assert_eq!(report.schema_status.current_version, LATEST_SCHEMA_VERSION);
        Ok(())
    }

    #[test]
    fn integrity_check_flags_files_with_several_contacts() -> Result<()> {
        let mut store = migrated()?;
        let now = OffsetDateTime::now_utc();
        let (file, _) = add_file_with_contact(&mut store, "twice.vcf", now, &contact("One", None))?;
        let tx = store.transaction()?;
        tx.insert_contact(file.file_id, &contact("Two", None))?;
        tx.commit()?;

        let report = store.integrity_check()?;
        assert_eq!(
            report.files_with_multiple_contacts,
            vec![DuplicateContacts { file_id: file.file_id, file_name: "twice.vcf".to_string(), contacts: 2 }]
        );
        Ok(())
    }
}
