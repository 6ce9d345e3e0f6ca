//! Content-addressed store of pipeline outputs.
//!
//! A [`Fingerprint`] is a BLAKE3 digest over the pipeline config and the
//! grant snapshot. [`TableCache`] maps fingerprints to JSON-encoded
//! [`PipelineOutput`]s in a `redb` table, so a result is reused exactly when
//! its inputs are identical and survives process restarts.

use redb::{Database, ReadableDatabase, ReadableTable, TableDefinition};

use crate::{GrantRecord, PipelineConfig, PipelineOutput, Result};

/// Fingerprint hex -> JSON `PipelineOutput`.
const PIPELINE_OUTPUTS: TableDefinition<&str, &str> = TableDefinition::new("pipeline_outputs");

/// Digest identifying one (config, grant snapshot) input.
#[derive(Debug, Clone, PartialEq, Eq, Hash)]
pub struct Fingerprint(String);

impl Fingerprint {
    /// Hash the canonical JSON of `config` followed by every record in order.
    pub fn of(records: &[GrantRecord], config: &PipelineConfig) -> Result<Self> {
        let mut hasher = blake3::Hasher::new();
        hasher.update(&serde_json::to_vec(config)?);
        for record in records {
            hasher.update(&serde_json::to_vec(record)?);
        }
        Ok(Self(hasher.finalize().to_hex().to_string()))
    }

    pub fn as_str(&self) -> &str {
        &self.0
    }
}

impl std::fmt::Display for Fingerprint {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        write!(f, "{}", self.0)
    }
}

/// Durable memo of pipeline outputs keyed by [`Fingerprint`].
///
/// # Example
///
/// ```rust,no_run
/// use grantscope::{Pipeline, PipelineConfig, TableCache};
///
/// let cache = TableCache::open("grants.cache").unwrap();
/// let pipeline = Pipeline::new(PipelineConfig::default()).unwrap();
/// let output = pipeline.run_cached(&cache, &[]).unwrap();
/// ```
pub struct TableCache {
    db: Database,
}

impl TableCache {
    /// Open or create a cache file at `path`.
    pub fn open(path: &str) -> Result<Self> {
        let db = Database::create(path)?;
        Self::init(db)
    }

    /// Create a cache that lives only as long as this value.
    pub fn open_in_memory() -> Result<Self> {
        let backend = redb::backends::InMemoryBackend::new();
        let db = Database::builder().create_with_backend(backend)?;
        Self::init(db)
    }

    fn init(db: Database) -> Result<Self> {
        {
            let write_txn = db.begin_write()?;
            write_txn.open_table(PIPELINE_OUTPUTS)?;
            write_txn.commit()?;
        }
        Ok(Self { db })
    }

    pub fn get(&self, fingerprint: &Fingerprint) -> Result<Option<PipelineOutput>> {
        let read_txn = self.db.begin_read()?;
        let table = read_txn.open_table(PIPELINE_OUTPUTS)?;
        let stored: Option<String> = table
            .get(fingerprint.as_str())?
            .map(|guard| guard.value().to_string());

        match stored {
            Some(json) => Ok(Some(serde_json::from_str(&json)?)),
            None => Ok(None),
        }
    }

    /// Store `output` under `fingerprint`, replacing any previous entry.
    pub fn put(&self, fingerprint: &Fingerprint, output: &PipelineOutput) -> Result<()> {
        let value = serde_json::to_string(output)?;
        let write_txn = self.db.begin_write()?;
        {
            let mut table = write_txn.open_table(PIPELINE_OUTPUTS)?;
            table.insert(fingerprint.as_str(), value.as_str())?;
        }
        write_txn.commit()?;
        Ok(())
    }

    /// Number of stored outputs.
    pub fn len(&self) -> Result<usize> {
        let read_txn = self.db.begin_read()?;
        let table = read_txn.open_table(PIPELINE_OUTPUTS)?;
        let mut count = 0;
        for entry in table.iter()? {
            entry?;
            count += 1;
        }
        Ok(count)
    }

    pub fn is_empty(&self) -> Result<bool> {
        Ok(self.len()? == 0)
    }
}
