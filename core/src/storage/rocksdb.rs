//! RocksDB-backed block store.
//!
//! Persists blocks and tip metadata with dedicated column families:
//!
//! - `"blocks"`: maps `BlockHash` (32 bytes) -> canonical block bytes,
//! - `"meta"`:   stores the current tip under a fixed key `"tip"`.

use std::{path::Path, sync::Arc};

use crate::consensus::store::BlockStore;
use crate::crypto::HASH_LEN;
use crate::types::{Block, BlockHash, Hash256};

use rocksdb::{BoundColumnFamily, ColumnFamilyDescriptor, Options, DB};

/// Configuration for [`RocksDbBlockStore`].
#[derive(Clone, Debug)]
pub struct RocksDbConfig {
    /// Filesystem path to the RocksDB database directory.
    pub path: String,
    /// Whether to create the database and missing column families if they
    /// do not yet exist.
    pub create_if_missing: bool,
}

impl Default for RocksDbConfig {
    fn default() -> Self {
        Self {
            path: "data/ledger-db".to_string(),
            create_if_missing: true,
        }
    }
}

/// Storage-level error type.
#[derive(Debug)]
pub enum StorageError {
    RocksDb(rocksdb::Error),
    MissingColumnFamily(&'static str),
    CorruptedMeta(&'static str),
}

impl From<rocksdb::Error> for StorageError {
    fn from(e: rocksdb::Error) -> Self {
        StorageError::RocksDb(e)
    }
}

impl std::fmt::Display for StorageError {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            StorageError::RocksDb(e) => write!(f, "rocksdb error: {e}"),
            StorageError::MissingColumnFamily(name) => write!(f, "missing column family: {name}"),
            StorageError::CorruptedMeta(what) => write!(f, "corrupted metadata: {what}"),
        }
    }
}

impl std::error::Error for StorageError {}

/// RocksDB-backed implementation of [`BlockStore`].
pub struct RocksDbBlockStore {
    db: DB,
}

impl RocksDbBlockStore {
    /// Opens (or creates) a RocksDB-backed block store at the given path,
    /// setting up the `"blocks"` and `"meta"` column families.
    pub fn open(cfg: &RocksDbConfig) -> Result<Self, StorageError> {
        let path = Path::new(&cfg.path);

        let mut opts = Options::default();
        opts.create_if_missing(cfg.create_if_missing);
        opts.create_missing_column_families(cfg.create_if_missing);

        let cfs = vec![
            ColumnFamilyDescriptor::new("default", Options::default()),
            ColumnFamilyDescriptor::new("blocks", Options::default()),
            ColumnFamilyDescriptor::new("meta", Options::default()),
        ];

        let db = DB::open_cf_descriptors(&opts, path, cfs)?;

        Ok(Self { db })
    }

    fn cf_blocks(&self) -> Result<Arc<BoundColumnFamily<'_>>, StorageError> {
        self.db
            .cf_handle("blocks")
            .ok_or(StorageError::MissingColumnFamily("blocks"))
    }

    fn cf_meta(&self) -> Result<Arc<BoundColumnFamily<'_>>, StorageError> {
        self.db
            .cf_handle("meta")
            .ok_or(StorageError::MissingColumnFamily("meta"))
    }

    fn encode_block(block: &Block) -> Vec<u8> {
        block.canonical_bytes()
    }

    fn decode_block(bytes: &[u8]) -> Option<Block> {
        serde_json::from_slice(bytes).ok()
    }

    /// Loads the current tip hash from the meta column family, if present.
    fn load_tip(&self) -> Result<Option<BlockHash>, StorageError> {
        let cf_meta = self.cf_meta()?;
        match self.db.get_cf(&cf_meta, b"tip")? {
            None => Ok(None),
            Some(bytes) => {
                if bytes.len() != HASH_LEN {
                    return Err(StorageError::CorruptedMeta("tip hash length"));
                }
                let mut arr = [0u8; HASH_LEN];
                arr.copy_from_slice(&bytes);
                Ok(Some(BlockHash(Hash256(arr))))
            }
        }
    }

    /// Persists the tip hash into the meta column family.
    fn store_tip(&self, hash: &BlockHash) -> Result<(), StorageError> {
        let cf_meta = self.cf_meta()?;
        self.db.put_cf(&cf_meta, b"tip", hash.0.as_bytes())?;
        Ok(())
    }
}

impl BlockStore for RocksDbBlockStore {
    fn get_block(&self, hash: &BlockHash) -> Option<Block> {
        let cf = self.cf_blocks().ok()?;
        match self.db.get_cf(&cf, hash.0.as_bytes()) {
            Ok(Some(bytes)) => Self::decode_block(&bytes),
            Ok(None) | Err(_) => None,
        }
    }

    fn put_block(&mut self, block: Block) {
        let hash = block.block_hash();
        let bytes = Self::encode_block(&block);

        match self.cf_blocks() {
            Ok(cf) => {
                // Best-effort persistence: a write failure here is logged,
                // not propagated, matching this store's "log and drop"
                // treatment of non-fatal storage errors elsewhere.
                if let Err(e) = self.db.put_cf(&cf, hash.0.as_bytes(), bytes) {
                    tracing::error!(error = %e, "RocksDbBlockStore::put_block failed");
                }
            }
            Err(e) => tracing::error!(error = %e, "RocksDbBlockStore::put_block: missing column family"),
        }
    }

    fn tip(&self) -> Option<BlockHash> {
        self.load_tip().ok().flatten()
    }

    fn set_tip(&mut self, hash: BlockHash) {
        if let Err(e) = self.store_tip(&hash) {
            tracing::error!(error = %e, "RocksDbBlockStore::set_tip failed");
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::crypto::KeyPair;
    use crate::types::Header;
    use tempfile::TempDir;

    fn dummy_block(height: u64) -> Block {
        let header = Header {
            version: 1,
            height,
            prev_hash: BlockHash(Hash256::zero()),
            timestamp: 1_700_000_000 + height,
            miner: KeyPair::generate().public_key(),
            difficulty: 1,
            nonce: 0,
            tx_merkle_root: Hash256::empty(),
            state_root: Hash256::empty(),
            tx_count: 0,
        };
        Block { header, txs: Vec::new() }
    }

    #[test]
    fn rocksdb_store_roundtrip_block_and_tip() {
        let tmp = TempDir::new().expect("create temp dir");
        let cfg = RocksDbConfig {
            path: tmp.path().to_string_lossy().to_string(),
            create_if_missing: true,
        };

        let mut store = RocksDbBlockStore::open(&cfg).expect("open RocksDB");

        let block = dummy_block(0);
        let hash = block.block_hash();
        store.put_block(block);

        let fetched = store.get_block(&hash).expect("block should exist");
        assert_eq!(fetched.header.height, 0);

        store.set_tip(hash);
        assert_eq!(store.tip(), Some(hash));
    }
}
