use std::fs;
use std::path::Path;
use std::sync::Arc;
use std::time::{Duration, SystemTime, UNIX_EPOCH};

use common::{AudioProperties, DeviceFile, RawTags};
use redb::{
    CommitError, Database, DatabaseError, ReadableTable, StorageError, TableDefinition,
    TableError, TransactionError,
};
use serde::{Deserialize, Serialize};
use tracing::{info, warn};

const CACHE_VERSION: u32 = 1;

const META_TABLE: TableDefinition<&str, &[u8]> = TableDefinition::new("meta");
const TAGS_TABLE: TableDefinition<&str, &[u8]> = TableDefinition::new("tags");

const META_VERSION_KEY: &str = "version";

/// One cached extraction, authoritative only while the stored signature
/// still matches the file on disk.
#[derive(Clone, Debug, Serialize, Deserialize)]
pub struct CacheEntry {
    pub size: u64,
    pub modified_secs: u64,
    pub tags: RawTags,
    pub properties: AudioProperties,
    pub extracted_at: u64,
}

impl CacheEntry {
    fn matches(&self, file: &DeviceFile) -> bool {
        self.size == file.size && self.modified_secs == file.modified_secs
    }
}

/// Persistent tag cache keyed by path, self-validating via the embedded
/// size/mtime signature. A cache that could not be opened behaves as a
/// universal miss rather than failing its callers.
#[derive(Clone)]
pub struct TagCache {
    db: Option<Arc<Database>>,
}

impl TagCache {
    pub fn open_or_default(path: &Path) -> TagCache {
        match open_db(path) {
            Ok(db) => TagCache {
                db: Some(Arc::new(db)),
            },
            Err(err) => {
                warn!("Tag cache unavailable ({}); extraction will not be cached", err);
                TagCache { db: None }
            }
        }
    }

    /// A cache that always misses and never stores.
    pub fn disabled() -> TagCache {
        TagCache { db: None }
    }

    /// Pure read. Any failure, signature mismatch, or absent entry is a
    /// miss; stale data is never returned.
    pub fn lookup(&self, file: &DeviceFile) -> Option<CacheEntry> {
        let db = self.db.as_ref()?;
        match read_entry(db, file) {
            Ok(entry) => entry,
            Err(err) => {
                warn!("Cache lookup failed for {:?}: {}", file.path, err);
                None
            }
        }
    }

    /// Upsert; the last write for a path wins.
    pub fn store(
        &self,
        file: &DeviceFile,
        tags: &RawTags,
        properties: &AudioProperties,
    ) -> Result<(), CacheError> {
        let db = match &self.db {
            Some(db) => db,
            None => return Ok(()),
        };
        let entry = CacheEntry {
            size: file.size,
            modified_secs: file.modified_secs,
            tags: tags.clone(),
            properties: properties.clone(),
            extracted_at: now_secs(),
        };
        let bytes = bincode::serialize(&entry)?;
        let key = file.path.to_string_lossy();

        let write_txn = db.begin_write()?;
        {
            let mut table = write_txn.open_table(TAGS_TABLE)?;
            table.insert(key.as_ref(), bytes.as_slice())?;
        }
        write_txn.commit()?;
        Ok(())
    }
}

#[derive(Debug)]
pub enum CacheError {
    Io(std::io::Error),
    Redb(redb::Error),
    Bincode(Box<bincode::ErrorKind>),
}

impl std::fmt::Display for CacheError {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            CacheError::Io(err) => write!(f, "io error: {}", err),
            CacheError::Redb(err) => write!(f, "store error: {}", err),
            CacheError::Bincode(err) => write!(f, "encoding error: {}", err),
        }
    }
}

impl std::error::Error for CacheError {}

impl From<std::io::Error> for CacheError {
    fn from(err: std::io::Error) -> Self {
        CacheError::Io(err)
    }
}

impl From<redb::Error> for CacheError {
    fn from(err: redb::Error) -> Self {
        CacheError::Redb(err)
    }
}

impl From<DatabaseError> for CacheError {
    fn from(err: DatabaseError) -> Self {
        CacheError::Redb(err.into())
    }
}

impl From<TableError> for CacheError {
    fn from(err: TableError) -> Self {
        CacheError::Redb(err.into())
    }
}

impl From<TransactionError> for CacheError {
    fn from(err: TransactionError) -> Self {
        CacheError::Redb(err.into())
    }
}

impl From<StorageError> for CacheError {
    fn from(err: StorageError) -> Self {
        CacheError::Redb(err.into())
    }
}

impl From<CommitError> for CacheError {
    fn from(err: CommitError) -> Self {
        CacheError::Redb(err.into())
    }
}

impl From<Box<bincode::ErrorKind>> for CacheError {
    fn from(err: Box<bincode::ErrorKind>) -> Self {
        CacheError::Bincode(err)
    }
}

fn open_db(path: &Path) -> Result<Database, CacheError> {
    if let Some(parent) = path.parent() {
        if !parent.as_os_str().is_empty() {
            fs::create_dir_all(parent)?;
        }
    }
    let db = if path.exists() {
        match Database::open(path) {
            Ok(db) => db,
            Err(err) => {
                warn!("Tag cache store unreadable ({}); recreating", err);
                fs::remove_file(path)?;
                Database::create(path)?
            }
        }
    } else {
        Database::create(path)?
    };
    ensure_version(&db)?;
    Ok(db)
}

fn ensure_version(db: &Database) -> Result<(), CacheError> {
    if read_version(db)? == Some(CACHE_VERSION) {
        return Ok(());
    }
    info!("Tag cache version mismatch; clearing entries");
    let write_txn = db.begin_write()?;
    match write_txn.delete_table(TAGS_TABLE) {
        Ok(_) => {}
        Err(TableError::TableDoesNotExist(_)) => {}
        Err(err) => return Err(err.into()),
    }
    {
        let mut meta = write_txn.open_table(META_TABLE)?;
        let bytes = bincode::serialize(&CACHE_VERSION)?;
        meta.insert(META_VERSION_KEY, bytes.as_slice())?;
    }
    write_txn.commit()?;
    Ok(())
}

fn read_version(db: &Database) -> Result<Option<u32>, CacheError> {
    let read_txn = db.begin_read()?;
    let table = match read_txn.open_table(META_TABLE) {
        Ok(table) => table,
        Err(TableError::TableDoesNotExist(_)) => return Ok(None),
        Err(err) => return Err(err.into()),
    };
    let version = match table.get(META_VERSION_KEY)? {
        Some(value) => Some(bincode::deserialize(value.value())?),
        None => None,
    };
    Ok(version)
}

fn read_entry(db: &Database, file: &DeviceFile) -> Result<Option<CacheEntry>, CacheError> {
    let read_txn = db.begin_read()?;
    let table = match read_txn.open_table(TAGS_TABLE) {
        Ok(table) => table,
        Err(TableError::TableDoesNotExist(_)) => return Ok(None),
        Err(err) => return Err(err.into()),
    };
    let key = file.path.to_string_lossy();
    let entry: CacheEntry = match table.get(key.as_ref())? {
        Some(value) => bincode::deserialize(value.value())?,
        None => return Ok(None),
    };
    if entry.matches(file) {
        Ok(Some(entry))
    } else {
        Ok(None)
    }
}

fn now_secs() -> u64 {
    SystemTime::now()
        .duration_since(UNIX_EPOCH)
        .unwrap_or_else(|_| Duration::from_secs(0))
        .as_secs()
}

#[cfg(test)]
mod tests {
    use super::TagCache;
    use common::{tagkey, AudioProperties, DeviceFile, RawTags};
    use std::path::PathBuf;

    fn device_file(name: &str, size: u64, modified_secs: u64) -> DeviceFile {
        DeviceFile {
            path: PathBuf::from("/music").join(name),
            size,
            modified_secs,
        }
    }

    fn sample_tags(title: &str) -> RawTags {
        let mut tags = RawTags::new();
        tags.insert(tagkey::TITLE.to_string(), vec![title.to_string()]);
        tags
    }

    #[test]
    fn store_then_lookup_hits() {
        let dir = tempfile::tempdir().unwrap();
        let cache = TagCache::open_or_default(&dir.path().join("tags.redb"));
        let file = device_file("a.mp3", 100, 1000);

        cache
            .store(&file, &sample_tags("A"), &AudioProperties::default())
            .unwrap();
        let entry = cache.lookup(&file).unwrap();
        assert_eq!(entry.tags, sample_tags("A"));
    }

    #[test]
    fn signature_mismatch_is_a_miss_for_that_file_only() {
        let dir = tempfile::tempdir().unwrap();
        let cache = TagCache::open_or_default(&dir.path().join("tags.redb"));
        let first = device_file("a.mp3", 100, 1000);
        let second = device_file("b.mp3", 200, 2000);

        cache
            .store(&first, &sample_tags("A"), &AudioProperties::default())
            .unwrap();
        cache
            .store(&second, &sample_tags("B"), &AudioProperties::default())
            .unwrap();

        let touched = device_file("a.mp3", 100, 1001);
        assert!(cache.lookup(&touched).is_none());
        assert!(cache.lookup(&second).is_some());
    }

    #[test]
    fn last_write_wins() {
        let dir = tempfile::tempdir().unwrap();
        let cache = TagCache::open_or_default(&dir.path().join("tags.redb"));
        let file = device_file("a.mp3", 100, 1000);

        cache
            .store(&file, &sample_tags("Old"), &AudioProperties::default())
            .unwrap();
        cache
            .store(&file, &sample_tags("New"), &AudioProperties::default())
            .unwrap();

        let entry = cache.lookup(&file).unwrap();
        assert_eq!(entry.tags, sample_tags("New"));
    }

    #[test]
    fn entries_survive_reopen() {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("tags.redb");
        let file = device_file("a.mp3", 100, 1000);

        {
            let cache = TagCache::open_or_default(&path);
            cache
                .store(&file, &sample_tags("A"), &AudioProperties::default())
                .unwrap();
        }

        let cache = TagCache::open_or_default(&path);
        assert!(cache.lookup(&file).is_some());
    }

    #[test]
    fn corrupt_store_degrades_to_miss() {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("tags.redb");
        std::fs::write(&path, b"not a database").unwrap();

        let cache = TagCache::open_or_default(&path);
        let file = device_file("a.mp3", 100, 1000);
        assert!(cache.lookup(&file).is_none());
        cache
            .store(&file, &sample_tags("A"), &AudioProperties::default())
            .unwrap();
    }

    #[test]
    fn disabled_cache_always_misses() {
        let cache = TagCache::disabled();
        let file = device_file("a.mp3", 100, 1000);
        cache
            .store(&file, &sample_tags("A"), &AudioProperties::default())
            .unwrap();
        assert!(cache.lookup(&file).is_none());
    }
}
