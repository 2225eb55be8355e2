//! Per-account book database
//!
//! Layout, under the account's `books/` directory:
//!
//! ```text
//! <book-id>/entry.json   feed entry and DRM loan record
//! <book-id>/book.epub    downloaded artifact, when present
//! ```

use std::collections::BTreeMap;
use std::fs;
use std::path::{Path, PathBuf};

use serde::{Deserialize, Serialize};
use tempfile::NamedTempFile;
use thiserror::Error;
use tracing::debug;

use super::feed::FeedEntry;
use crate::drm::DrmLoan;
use crate::ids::BookId;
use crate::storage::{self, StorageError};

const ENTRY_FILE: &str = "entry.json";
const ARTIFACT_FILE: &str = "book.epub";

/// Errors raised by a book database
#[derive(Debug, Error)]
pub enum BookDatabaseError {
    #[error("Book {0} does not exist in this database")]
    NotFound(BookId),

    #[error("Failed to copy book artifact from '{from}' to '{to}': {source}")]
    CopyArtifact {
        from: PathBuf,
        to: PathBuf,
        #[source]
        source: std::io::Error,
    },

    #[error(transparent)]
    Storage(#[from] StorageError),
}

/// One book held by an account
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct BookRecord {
    pub id: BookId,
    pub entry: FeedEntry,
    /// Path of the stored artifact, if downloaded
    pub artifact: Option<PathBuf>,
    /// DRM loan that must be returned on revocation
    pub loan: Option<DrmLoan>,
}

impl BookRecord {
    pub fn is_downloaded(&self) -> bool {
        self.artifact.is_some()
    }
}

#[derive(Serialize, Deserialize)]
struct EntryFile {
    entry: FeedEntry,
    #[serde(default)]
    loan: Option<DrmLoan>,
}

/// Directory-backed book database owned by one account
#[derive(Debug, Clone)]
pub struct BookDatabase {
    directory: PathBuf,
}

impl BookDatabase {
    /// Open (creating if needed) the database rooted at `directory`
    pub fn open(directory: impl Into<PathBuf>) -> Result<Self, BookDatabaseError> {
        let directory = directory.into();
        storage::create_dir_all(&directory)?;
        Ok(Self { directory })
    }

    pub fn directory(&self) -> &Path {
        &self.directory
    }

    fn book_dir(&self, id: &BookId) -> PathBuf {
        self.directory.join(id.as_str())
    }

    /// Ids of all books with a directory in the database
    ///
    /// Only looks at directory names, so damaged entries are still listed.
    pub fn book_ids(&self) -> Result<Vec<BookId>, BookDatabaseError> {
        let entries = match fs::read_dir(&self.directory) {
            Ok(entries) => entries,
            Err(e) if e.kind() == std::io::ErrorKind::NotFound => return Ok(Vec::new()),
            Err(e) => return Err(StorageError::from_read_io(e, self.directory.clone()).into()),
        };

        let mut ids = Vec::new();
        for entry in entries {
            let entry = entry.map_err(|e| StorageError::from_read_io(e, self.directory.clone()))?;
            if let Some(id) = entry
                .file_name()
                .to_str()
                .and_then(|name| BookId::parse(name).ok())
            {
                ids.push(id);
            }
        }
        ids.sort();
        Ok(ids)
    }

    /// All readable books in the database
    pub fn books(&self) -> Result<BTreeMap<BookId, BookRecord>, BookDatabaseError> {
        let mut books = BTreeMap::new();
        for id in self.book_ids()? {
            if let Some(record) = self.book(&id)? {
                books.insert(id, record);
            }
        }
        Ok(books)
    }

    /// Look up one book
    pub fn book(&self, id: &BookId) -> Result<Option<BookRecord>, BookDatabaseError> {
        let dir = self.book_dir(id);
        let Some(file) = storage::read_json_optional::<EntryFile>(&dir.join(ENTRY_FILE))? else {
            return Ok(None);
        };

        let artifact_path = dir.join(ARTIFACT_FILE);
        Ok(Some(BookRecord {
            id: id.clone(),
            entry: file.entry,
            artifact: artifact_path.is_file().then_some(artifact_path),
            loan: file.loan,
        }))
    }

    /// Create an entry for a feed entry, or update the stored feed entry
    ///
    /// Any existing artifact and loan are kept.
    pub fn create_or_update(&self, entry: &FeedEntry) -> Result<BookRecord, BookDatabaseError> {
        let id = entry.book_id();
        let loan = self.book(&id)?.and_then(|record| record.loan);
        self.write_entry(&id, entry.clone(), loan)?;
        debug!(book = %id.short(), title = %entry.title, "stored book entry");
        self.book(&id)?.ok_or(BookDatabaseError::NotFound(id))
    }

    /// Record (or clear) the DRM loan of a book
    pub fn set_loan(&self, id: &BookId, loan: Option<DrmLoan>) -> Result<(), BookDatabaseError> {
        let record = self
            .book(id)?
            .ok_or_else(|| BookDatabaseError::NotFound(id.clone()))?;
        self.write_entry(id, record.entry, loan)
    }

    fn write_entry(
        &self,
        id: &BookId,
        entry: FeedEntry,
        loan: Option<DrmLoan>,
    ) -> Result<(), BookDatabaseError> {
        let path = self.book_dir(id).join(ENTRY_FILE);
        storage::write_json(&path, &EntryFile { entry, loan })?;
        Ok(())
    }

    /// Store `source` as the artifact of a book, replacing any previous one
    pub fn write_artifact(&self, id: &BookId, source: &Path) -> Result<PathBuf, BookDatabaseError> {
        if self.book(id)?.is_none() {
            return Err(BookDatabaseError::NotFound(id.clone()));
        }

        let dir = self.book_dir(id);
        let target = dir.join(ARTIFACT_FILE);
        let staging =
            NamedTempFile::new_in(&dir).map_err(|e| StorageError::from_io(e, dir.clone()))?;
        let staging_path = staging.path().to_path_buf();
        fs::copy(source, &staging_path).map_err(|e| BookDatabaseError::CopyArtifact {
            from: source.to_path_buf(),
            to: staging_path.clone(),
            source: e,
        })?;
        staging
            .persist(&target)
            .map_err(|e| StorageError::AtomicWriteFailed {
                from: staging_path,
                to: target.clone(),
                source: e.error,
            })?;

        debug!(book = %id.short(), path = %target.display(), "stored book artifact");
        Ok(target)
    }

    /// Remove the artifact of a book, keeping its entry
    pub fn delete_artifact(&self, id: &BookId) -> Result<(), BookDatabaseError> {
        storage::remove_file(&self.book_dir(id).join(ARTIFACT_FILE))?;
        Ok(())
    }

    /// Remove a book entirely
    pub fn delete_book(&self, id: &BookId) -> Result<(), BookDatabaseError> {
        storage::remove_dir_all(&self.book_dir(id))?;
        Ok(())
    }

    /// Remove the whole database from disk
    pub fn destroy(&self) -> Result<(), BookDatabaseError> {
        storage::remove_dir_all(&self.directory)?;
        debug!(path = %self.directory.display(), "destroyed book database");
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::books::feed::{Acquisition, AcquisitionType};
    use tempfile::TempDir;
    use url::Url;

    fn entry(id: &str) -> FeedEntry {
        FeedEntry::new(id, format!("Title of {}", id)).with_acquisition(Acquisition::new(
            AcquisitionType::OpenAccess,
            Url::parse("https://books.example/book.epub").unwrap(),
        ))
    }

    fn open_db(temp_dir: &TempDir) -> BookDatabase {
        BookDatabase::open(temp_dir.path().join("books")).unwrap()
    }

    #[test]
    fn test_create_and_list() {
        let temp_dir = TempDir::new().unwrap();
        let db = open_db(&temp_dir);

        let first = db.create_or_update(&entry("urn:1")).unwrap();
        db.create_or_update(&entry("urn:2")).unwrap();

        assert!(!first.is_downloaded());
        assert_eq!(db.book_ids().unwrap().len(), 2);

        let books = db.books().unwrap();
        assert_eq!(books[&first.id].entry.title, "Title of urn:1");
    }

    #[test]
    fn test_artifact_lifecycle() {
        let temp_dir = TempDir::new().unwrap();
        let db = open_db(&temp_dir);
        let record = db.create_or_update(&entry("urn:1")).unwrap();

        let source = temp_dir.path().join("download.part");
        fs::write(&source, b"PK epub bytes").unwrap();

        let stored = db.write_artifact(&record.id, &source).unwrap();
        assert_eq!(fs::read(&stored).unwrap(), b"PK epub bytes");
        assert!(db.book(&record.id).unwrap().unwrap().is_downloaded());

        db.delete_artifact(&record.id).unwrap();
        let after = db.book(&record.id).unwrap().unwrap();
        assert!(!after.is_downloaded());
        assert_eq!(after.entry, record.entry);
    }

    #[test]
    fn test_write_artifact_requires_entry() {
        let temp_dir = TempDir::new().unwrap();
        let db = open_db(&temp_dir);
        let source = temp_dir.path().join("download.part");
        fs::write(&source, b"bytes").unwrap();

        let result = db.write_artifact(&BookId::for_entry("urn:missing"), &source);
        assert!(matches!(result, Err(BookDatabaseError::NotFound(_))));
    }

    #[test]
    fn test_concurrent_writes_to_one_book() {
        let temp_dir = TempDir::new().unwrap();
        let db = open_db(&temp_dir);
        let record = db.create_or_update(&entry("urn:1")).unwrap();
        let source = temp_dir.path().join("download.part");
        fs::write(&source, b"PK epub bytes").unwrap();

        std::thread::scope(|scope| {
            for _ in 0..4 {
                scope.spawn(|| {
                    for _ in 0..50 {
                        db.create_or_update(&entry("urn:1")).unwrap();
                        db.write_artifact(&record.id, &source).unwrap();
                    }
                });
            }
        });

        let stored = db.book(&record.id).unwrap().unwrap();
        assert_eq!(fs::read(stored.artifact.unwrap()).unwrap(), b"PK epub bytes");
        let files = fs::read_dir(db.directory().join(record.id.as_str()))
            .unwrap()
            .count();
        assert_eq!(files, 2);
    }

    #[test]
    fn test_update_keeps_loan() {
        let temp_dir = TempDir::new().unwrap();
        let db = open_db(&temp_dir);
        let record = db.create_or_update(&entry("urn:1")).unwrap();

        let loan = DrmLoan {
            vendor: "NYPL".to_string(),
            loan_id: "loan-1".to_string(),
            returnable: true,
        };
        db.set_loan(&record.id, Some(loan.clone())).unwrap();

        let mut updated = entry("urn:1");
        updated.title = "New title".to_string();
        let record = db.create_or_update(&updated).unwrap();

        assert_eq!(record.entry.title, "New title");
        assert_eq!(record.loan, Some(loan));
    }

    #[test]
    fn test_delete_book_and_destroy() {
        let temp_dir = TempDir::new().unwrap();
        let db = open_db(&temp_dir);
        let one = db.create_or_update(&entry("urn:1")).unwrap();
        db.create_or_update(&entry("urn:2")).unwrap();

        db.delete_book(&one.id).unwrap();
        assert!(db.book(&one.id).unwrap().is_none());
        assert_eq!(db.book_ids().unwrap().len(), 1);

        db.destroy().unwrap();
        assert!(!db.directory().exists());
        assert!(db.book_ids().unwrap().is_empty());
    }

    #[test]
    fn test_foreign_directories_are_ignored() {
        let temp_dir = TempDir::new().unwrap();
        let db = open_db(&temp_dir);
        fs::create_dir(db.directory().join("not-a-book")).unwrap();

        assert!(db.book_ids().unwrap().is_empty());
    }
}
