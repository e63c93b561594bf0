//! Hematite chain database.
//!
//! Typed views over a rocksdb instance: one column family per logical namespace, point reads
//! through the backend handle, and atomic multi-column commits through [`rocksdb`] write
//! batches. Each sync stage commits exactly one batch per forward or unwind pass, so a crash
//! leaves at worst a strict prefix of the intended progress.

use std::path::Path;
use std::sync::Arc;
use std::{fmt, fs};

use anyhow::Context;
use hp_chain_config::ChainConfig;
use hp_utils::service::{Service, ServiceRunner};
use rocksdb::{BoundColumnFamily, ColumnFamilyDescriptor, DBWithThreadMode, MultiThreaded, WriteOptions};

mod chain_head;
mod error;
mod rocksdb_options;

pub mod block_db;

pub use chain_head::{BlockNStatus, ChainHead};
pub use error::StorageError;

pub type DB = DBWithThreadMode<MultiThreaded>;
pub type WriteBatch = rocksdb::WriteBatchWithTransaction<false>;

pub fn open_rocksdb(path: &Path) -> anyhow::Result<Arc<DB>> {
    let opts = rocksdb_options::rocksdb_global_options()?;
    tracing::debug!("opening db at {:?}", path.display());
    let db = DB::open_cf_descriptors(
        &opts,
        path,
        Column::ALL.iter().map(|col| ColumnFamilyDescriptor::new(col.rocksdb_name(), col.rocksdb_options())),
    )?;

    Ok(Arc::new(db))
}

/// One value per logical namespace of the store.
#[derive(Clone, Copy, PartialEq, Eq)]
pub enum Column {
    /// block_n => canonical header hash
    CanonicalHashes,
    /// (block_n, hash) => RLP header
    Headers,
    /// (block_n, hash) => RLP total difficulty
    HeadersTotalDifficulty,
    /// header hash => block_n
    BlockHashToNumber,
    /// (block_n, hash) => RLP body
    BlockBodies,
    /// header hash => () blacklist, persisted across restarts
    BadBlocks,
    /// Meta column: chain-identity guard, per-stage head status
    BlockStorageMeta,
}

impl fmt::Debug for Column {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}", self.rocksdb_name())
    }
}

impl fmt::Display for Column {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}", self.rocksdb_name())
    }
}

impl Column {
    pub const ALL: &'static [Self] = {
        use Column::*;
        &[
            CanonicalHashes,
            Headers,
            HeadersTotalDifficulty,
            BlockHashToNumber,
            BlockBodies,
            BadBlocks,
            BlockStorageMeta,
        ]
    };
    pub const NUM_COLUMNS: usize = Self::ALL.len();

    pub(crate) fn rocksdb_name(&self) -> &'static str {
        use Column::*;
        match self {
            CanonicalHashes => "canonical_hashes",
            Headers => "headers",
            HeadersTotalDifficulty => "headers_total_difficulty",
            BlockHashToNumber => "block_hash_to_number",
            BlockBodies => "block_bodies",
            BadBlocks => "bad_blocks",
            BlockStorageMeta => "block_storage_meta",
        }
    }
}

pub trait DatabaseExt {
    fn get_column(&self, col: Column) -> Arc<BoundColumnFamily<'_>>;
}

impl DatabaseExt for DB {
    fn get_column(&self, col: Column) -> Arc<BoundColumnFamily<'_>> {
        let name = col.rocksdb_name();
        match self.cf_handle(name) {
            Some(column) => column,
            None => panic!("column {name} not initialized"),
        }
    }
}

fn make_write_opt_no_wal() -> WriteOptions {
    let mut opts = WriteOptions::new();
    opts.disable_wal(true);
    opts
}

/// Hematite chain database backend singleton.
pub struct HematiteBackend {
    db: Arc<DB>,
    chain_config: Arc<ChainConfig>,
    chain_head: ChainHead,
    write_opt_no_wal: WriteOptions,
    #[cfg(any(test, feature = "testing"))]
    _temp_dir: Option<tempfile::TempDir>,
}

impl fmt::Debug for HematiteBackend {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("HematiteBackend")
            .field("chain", &self.chain_config.chain_name)
            .field("head", &self.chain_head)
            .finish()
    }
}

impl Drop for HematiteBackend {
    fn drop(&mut self) {
        tracing::info!("⏳ Gracefully closing the database...");
        if let Err(err) = self.flush() {
            tracing::error!("Error when flushing the database: {err:#}");
        }
    }
}

impl HematiteBackend {
    pub fn chain_config(&self) -> &Arc<ChainConfig> {
        &self.chain_config
    }

    pub fn chain_head(&self) -> &ChainHead {
        &self.chain_head
    }

    /// Open the db.
    pub fn open(db_dir: &Path, chain_config: Arc<ChainConfig>) -> anyhow::Result<Arc<HematiteBackend>> {
        let db_path = db_dir.join("db");
        fs::create_dir_all(&db_path).with_context(|| format!("Creating db directory {:?}", db_path))?;
        let db = open_rocksdb(&db_path)?;

        let chain_head = ChainHead::load_from_db(&db).context("Loading chain head status")?;
        let backend = Arc::new(Self {
            db,
            chain_config,
            chain_head,
            write_opt_no_wal: make_write_opt_no_wal(),
            #[cfg(any(test, feature = "testing"))]
            _temp_dir: None,
        });
        backend.check_configuration()?;
        Ok(backend)
    }

    #[cfg(any(test, feature = "testing"))]
    pub fn open_for_testing(chain_config: Arc<ChainConfig>) -> Arc<HematiteBackend> {
        let temp_dir = tempfile::TempDir::with_prefix("hematite-test").unwrap();
        let db = open_rocksdb(temp_dir.as_ref()).unwrap();
        Arc::new(Self {
            db,
            chain_config,
            chain_head: ChainHead::default(),
            write_opt_no_wal: make_write_opt_no_wal(),
            _temp_dir: Some(temp_dir),
        })
    }

    pub fn flush(&self) -> anyhow::Result<()> {
        tracing::debug!("doing a db flush");
        let mut opts = rocksdb::FlushOptions::default();
        opts.set_wait(true);
        let columns = Column::ALL.iter().map(|e| self.db.get_column(*e)).collect::<Vec<_>>();
        let columns = columns.iter().collect::<Vec<_>>();
        self.db.flush_cfs_opt(&columns, &opts).context("Flushing database")?;
        Ok(())
    }
}

/// Database service: owns the backend handle for the lifetime of the node.
pub struct DatabaseService {
    handle: Arc<HematiteBackend>,
}

impl DatabaseService {
    pub fn new(base_path: &Path, chain_config: Arc<ChainConfig>) -> anyhow::Result<Self> {
        tracing::info!("💾 Opening database at: {}", base_path.display());
        let handle = HematiteBackend::open(base_path, chain_config)?;
        Ok(Self { handle })
    }

    pub fn backend(&self) -> &Arc<HematiteBackend> {
        &self.handle
    }

    #[cfg(any(test, feature = "testing"))]
    pub fn open_for_testing(chain_config: Arc<ChainConfig>) -> Self {
        Self { handle: HematiteBackend::open_for_testing(chain_config) }
    }
}

#[async_trait::async_trait]
impl Service for DatabaseService {
    async fn start<'a>(&mut self, runner: ServiceRunner<'a>) -> anyhow::Result<()> {
        // Nothing to drive; the backend lives until the node shuts down.
        runner.service_loop(|ctx| async move {
            ctx.cancelled().await;
            Ok(())
        });
        Ok(())
    }

    fn name(&self) -> &'static str {
        "database"
    }
}
