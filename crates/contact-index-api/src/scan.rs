use std::path::{Path, PathBuf};

use anyhow::{anyhow, Context, Result};
use contact_index_core::is_card_file_name;
use time::OffsetDateTime;
use walkdir::WalkDir;

/// A card file found in the card store.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ScannedCard {
    pub file_name: String,
    pub path: PathBuf,
    pub modified: OffsetDateTime,
}

/// List the card files directly inside `cards_dir`, sorted by file name.
///
/// Entries that cannot be inspected are logged and left out.
///
/// # Errors
/// Returns an error when `cards_dir` itself is missing or unreadable.
pub fn scan(cards_dir: &Path) -> Result<Vec<ScannedCard>> {
    let metadata = std::fs::metadata(cards_dir)
        .with_context(|| format!("failed to read card store {}", cards_dir.display()))?;
    if !metadata.is_dir() {
        return Err(anyhow!("card store {} is not a directory", cards_dir.display()));
    }

    let mut cards = Vec::new();
    let walker =
        WalkDir::new(cards_dir).min_depth(1).max_depth(1).follow_links(true).sort_by_file_name();
    for entry in walker {
        let entry = match entry {
            Ok(entry) => entry,
            Err(err) if err.depth() == 0 => {
                return Err(anyhow::Error::new(err)
                    .context(format!("failed to list card store {}", cards_dir.display())));
            }
            Err(err) => {
                tracing::warn!("Skipping unreadable card store entry: {}", err);
                continue;
            }
        };

        if !entry.file_type().is_file() {
            continue;
        }
        let Some(file_name) = entry.file_name().to_str() else {
            tracing::warn!("Skipping non UTF-8 file name {:?}", entry.path());
            continue;
        };
        if !is_card_file_name(file_name) {
            continue;
        }

        let modified = match entry.metadata().map_err(anyhow::Error::from).and_then(|meta| {
            meta.modified().context("modification time unavailable")
        }) {
            Ok(modified) => OffsetDateTime::from(modified),
            Err(err) => {
                tracing::warn!("Skipping {:?}: {:#}", entry.path(), err);
                continue;
            }
        };

        cards.push(ScannedCard {
            file_name: file_name.to_string(),
            path: entry.path().to_path_buf(),
            modified,
        });
    }

    Ok(cards)
}

#[cfg(test)]
mod tests {
    use std::fs;

    use super::*;

    #[test]
    fn scan_keeps_visible_card_files_only() -> Result<()> {
        let dir = tempfile::tempdir()?;
        fs::write(dir.path().join("bob.vcf"), "x")?;
        fs::write(dir.path().join("Alice.VCF"), "x")?;
        fs::write(dir.path().join(".hidden.vcf"), "x")?;
        fs::write(dir.path().join("notes.txt"), "x")?;
        fs::create_dir(dir.path().join("nested.vcf"))?;
        fs::write(dir.path().join("nested.vcf").join("inner.vcf"), "x")?;

        let names: Vec<String> = scan(dir.path())?.into_iter().map(|card| card.file_name).collect();
        assert_eq!(names, vec!["Alice.VCF".to_string(), "bob.vcf".to_string()]);
        Ok(())
    }

    #[test]
    fn scan_reports_modification_times() -> Result<()> {
        let dir = tempfile::tempdir()?;
        let path = dir.path().join("carol.vcf");
        fs::write(&path, "x")?;
        let expected = OffsetDateTime::from(fs::metadata(&path)?.modified()?);

        let cards = scan(dir.path())?;
        assert_eq!(cards.len(), 1);
        assert_eq!(cards[0].modified, expected);
        assert_eq!(cards[0].path, path);
        Ok(())
    }

    #[test]
    fn missing_store_is_fatal() -> Result<()> {
        let dir = tempfile::tempdir()?;
        assert!(scan(&dir.path().join("absent")).is_err());

        let file = dir.path().join("plain.vcf");
        fs::write(&file, "x")?;
        assert!(scan(&file).is_err());
        Ok(())
    }

    #[test]
    fn empty_store_yields_nothing() -> Result<()> {
        let dir = tempfile::tempdir()?;
        assert!(scan(dir.path())?.is_empty());
        Ok(())
    }
}
