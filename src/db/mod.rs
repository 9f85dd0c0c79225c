use anyhow::{Context, Result};
use rocksdb::{Direction, IteratorMode, Options, WriteBatch, DB};

use crate::model::{MapProjection, Submission};

use std::{path::Path, str, sync::Arc};

const SCAN_PREFIX: &str = "scan:";
const SERIAL_INDEX_PREFIX: &str = "scan_by_serial:";
const SERIAL_PREFIX: &str = "serial:";

/// Append-only submission store backed by RocksDB.
///
/// RocksDB calls block, so every public method hops onto the blocking pool.
pub struct DBLayer {
    db: Arc<DB>,
}

impl DBLayer {
    pub fn new(path: impl AsRef<Path>) -> Result<Self> {
        let path = path.as_ref();
        let mut opts = Options::default();
        opts.create_if_missing(true);
        let db = DB::open(&opts, path)
            .with_context(|| format!("Failed to open submission store at {}", path.display()))?;
        Ok(Self { db: Arc::new(db) })
    }

    #[cfg(test)]
    pub(crate) fn open_read_only(path: impl AsRef<Path>) -> Result<Self> {
        let db = DB::open_for_read_only(&Options::default(), path.as_ref(), false)?;
        Ok(Self { db: Arc::new(db) })
    }

    async fn blocking<T, F>(&self, f: F) -> Result<T>
    where
        F: FnOnce(&DB) -> Result<T> + Send + 'static,
        T: Send + 'static,
    {
        let db = Arc::clone(&self.db);
        tokio::task::spawn_blocking(move || f(&db))
            .await
            .context("store task panicked")?
    }

    // ============================================================
    // KEYS
    // ============================================================
    fn scan_key(sub: &Submission) -> String {
        format!("{SCAN_PREFIX}{:020}:{}", sort_nanos(sub), sub.id)
        // 020 → zero-padded nanos so iteration follows insertion time
    }

    fn serial_index_prefix(serial: &str) -> String {
        format!("{SERIAL_INDEX_PREFIX}{}:", hex(serial))
    }

    fn serial_index_key(sub: &Submission) -> String {
        format!(
            "{}{:020}:{}",
            Self::serial_index_prefix(&sub.serial),
            sort_nanos(sub),
            sub.id
        )
    }

    fn serial_key(serial: &str) -> String {
        format!("{SERIAL_PREFIX}{serial}")
    }

    // ============================================================
    // WRITES
    // ============================================================
    pub async fn insert(&self, sub: &Submission) -> Result<()> {
        let key = Self::scan_key(sub);
        let index_key = Self::serial_index_key(sub);
        let serial_key = Self::serial_key(&sub.serial);
        let val = serde_json::to_vec(sub)?;

        self.blocking(move |db| {
            let mut batch = WriteBatch::default();
            batch.put(key.as_bytes(), val);
            batch.put(index_key.as_bytes(), key.as_bytes());
            batch.put(serial_key.as_bytes(), b"1");
            db.write(batch)?;
            Ok(())
        })
        .await
    }

    // ============================================================
    // READS
    // ============================================================
    pub async fn find_by_serial(&self, serial: &str) -> Result<Vec<Submission>> {
        let prefix = Self::serial_index_prefix(serial);

        self.blocking(move |db| {
            let mut results = Vec::new();
            for item in db.iterator(IteratorMode::From(prefix.as_bytes(), Direction::Forward)) {
                let (key, primary) = item?;
                if !key.starts_with(prefix.as_bytes()) {
                    break;
                }

                let Some(val) = db.get(&primary)? else {
                    continue;
                };
                results.push(serde_json::from_slice(&val)?);
            }
            Ok(results)
        })
        .await
    }

    pub async fn distinct_serials(&self) -> Result<Vec<String>> {
        self.blocking(|db| {
            let mut serials = Vec::new();
            for item in db.iterator(IteratorMode::From(
                SERIAL_PREFIX.as_bytes(),
                Direction::Forward,
            )) {
                let (key, _) = item?;
                let k = str::from_utf8(&key)?;
                let Some(serial) = k.strip_prefix(SERIAL_PREFIX) else {
                    break;
                };
                serials.push(serial.to_string());
            }
            Ok(serials)
        })
        .await
    }

    pub async fn list_all(&self) -> Result<Vec<Submission>> {
        self.blocking(|db| {
            let mut results = Vec::new();
            for item in db.iterator(IteratorMode::From(
                SCAN_PREFIX.as_bytes(),
                Direction::Forward,
            )) {
                let (key, val) = item?;
                if !key.starts_with(SCAN_PREFIX.as_bytes()) {
                    break;
                }
                results.push(serde_json::from_slice(&val)?);
            }
            Ok(results)
        })
        .await
    }

    /// Every submission reduced to the fields the map needs.
    pub async fn find_all_projected(&self) -> Result<Vec<MapProjection>> {
        Ok(self
            .list_all()
            .await?
            .into_iter()
            .map(MapProjection::from)
            .collect())
    }
}

fn sort_nanos(sub: &Submission) -> u64 {
    sub.timestamp
        .timestamp_nanos_opt()
        .map(|n| n.max(0) as u64)
        .unwrap_or(0)
}

// Serials are free text; hex keeps ':' inside a serial from bleeding into the index prefix.
fn hex(s: &str) -> String {
    s.bytes().map(|b| format!("{b:02x}")).collect()
}
