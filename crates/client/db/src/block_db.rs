//! Read and write operations for the block namespaces.
//!
//! Writes are grouped so that one stage pass is one [`WriteBatch`]: the headers stage commits
//! canonical mappings, headers, difficulty records and the head row together; the bodies stage
//! does the same for bodies and its own progress row. Unwinds mirror the writes.

use alloy_primitives::{B256, U256};
use alloy_rlp::Decodable;
use hp_block::{BlockBody, Header, SealedHeader};

use crate::chain_head::ROW_HEAD_STATUS;
use crate::{Column, DatabaseExt, HematiteBackend, StorageError, WriteBatch};

type Result<T, E = StorageError> = std::result::Result<T, E>;

const ROW_CHAIN_INFO: &[u8] = b"chain_info";

#[derive(serde::Serialize, serde::Deserialize, Debug, Clone)]
struct ChainInfo {
    chain_id: u64,
    chain_name: String,
}

fn num_key(block_n: u64) -> [u8; 8] {
    block_n.to_be_bytes()
}

fn block_key(block_n: u64, hash: &B256) -> [u8; 40] {
    let mut key = [0u8; 40];
    key[..8].copy_from_slice(&block_n.to_be_bytes());
    key[8..].copy_from_slice(hash.as_slice());
    key
}

fn rlp_encode<T: alloy_rlp::Encodable>(value: &T) -> Vec<u8> {
    let mut out = Vec::new();
    value.encode(&mut out);
    out
}

impl HematiteBackend {
    /// Refuses to reopen a database that was created for another chain.
    pub(crate) fn check_configuration(&self) -> anyhow::Result<()> {
        let expected = self.chain_config();
        let col = self.db.get_column(Column::BlockStorageMeta);
        if let Some(res) = self.db.get_pinned_cf(&col, ROW_CHAIN_INFO)? {
            let res: ChainInfo = bincode::deserialize(res.as_ref())?;
            if res.chain_id != expected.chain_id {
                anyhow::bail!(
                    "The database has been created on the network \"{}\" (chain id {}), \
                     but the node is configured for network \"{}\" (chain id {}).",
                    res.chain_name,
                    res.chain_id,
                    expected.chain_name,
                    expected.chain_id
                )
            }
        } else {
            let chain_info = ChainInfo { chain_id: expected.chain_id, chain_name: expected.chain_name.clone() };
            self.db.put_cf(&col, ROW_CHAIN_INFO, bincode::serialize(&chain_info)?)?;
        }
        Ok(())
    }

    // DB read operations

    pub fn get_canonical_hash(&self, block_n: u64) -> Result<Option<B256>> {
        let col = self.db.get_column(Column::CanonicalHashes);
        let Some(res) = self.db.get_cf(&col, num_key(block_n))? else { return Ok(None) };
        Ok(Some(B256::from_slice(&res)))
    }

    pub fn get_header(&self, block_n: u64, hash: &B256) -> Result<Option<Header>> {
        let col = self.db.get_column(Column::Headers);
        let Some(res) = self.db.get_cf(&col, block_key(block_n, hash))? else { return Ok(None) };
        Ok(Some(Header::decode(&mut res.as_slice())?))
    }

    pub fn get_canonical_header(&self, block_n: u64) -> Result<Option<SealedHeader>> {
        let Some(hash) = self.get_canonical_hash(block_n)? else { return Ok(None) };
        let header = self
            .get_header(block_n, &hash)?
            .ok_or_else(|| StorageError::inconsistency("canonical hash without header record"))?;
        Ok(Some(SealedHeader::from_parts(hash, header)))
    }

    pub fn get_block_number(&self, hash: &B256) -> Result<Option<u64>> {
        let col = self.db.get_column(Column::BlockHashToNumber);
        let Some(res) = self.db.get_cf(&col, hash.as_slice())? else { return Ok(None) };
        let bytes: [u8; 8] =
            res.as_slice().try_into().map_err(|_| StorageError::inconsistency("malformed block number record"))?;
        Ok(Some(u64::from_be_bytes(bytes)))
    }

    pub fn get_header_by_hash(&self, hash: &B256) -> Result<Option<Header>> {
        let Some(block_n) = self.get_block_number(hash)? else { return Ok(None) };
        self.get_header(block_n, hash)
    }

    pub fn get_total_difficulty(&self, block_n: u64, hash: &B256) -> Result<Option<U256>> {
        let col = self.db.get_column(Column::HeadersTotalDifficulty);
        let Some(res) = self.db.get_cf(&col, block_key(block_n, hash))? else { return Ok(None) };
        Ok(Some(U256::decode(&mut res.as_slice())?))
    }

    pub fn get_body(&self, block_n: u64, hash: &B256) -> Result<Option<BlockBody>> {
        let col = self.db.get_column(Column::BlockBodies);
        let Some(res) = self.db.get_cf(&col, block_key(block_n, hash))? else { return Ok(None) };
        Ok(Some(BlockBody::decode(&mut res.as_slice())?))
    }

    pub fn has_body(&self, block_n: u64, hash: &B256) -> Result<bool> {
        let col = self.db.get_column(Column::BlockBodies);
        Ok(self.db.get_pinned_cf(&col, block_key(block_n, hash))?.is_some())
    }

    pub fn is_bad_block(&self, hash: &B256) -> Result<bool> {
        let col = self.db.get_column(Column::BadBlocks);
        Ok(self.db.get_pinned_cf(&col, hash.as_slice())?.is_some())
    }

    /// The whole blacklist, loaded once when the exchange starts.
    pub fn bad_blocks(&self) -> Result<Vec<B256>> {
        let col = self.db.get_column(Column::BadBlocks);
        let mut out = Vec::new();
        for entry in self.db.iterator_cf(&col, rocksdb::IteratorMode::Start) {
            let (key, _) = entry?;
            out.push(B256::from_slice(&key));
        }
        Ok(out)
    }

    /// Canonical tip as seen by the headers stage: number, hash, total difficulty.
    pub fn head_info(&self) -> Result<Option<(u64, B256, U256)>> {
        let Some(block_n) = self.chain_head.headers.get() else { return Ok(None) };
        let hash = self
            .get_canonical_hash(block_n)?
            .ok_or_else(|| StorageError::inconsistency("head status points at a missing canonical record"))?;
        let td = self
            .get_total_difficulty(block_n, &hash)?
            .ok_or_else(|| StorageError::inconsistency("canonical head without difficulty record"))?;
        Ok(Some((block_n, hash, td)))
    }

    // DB write operations

    /// Stores the genesis block if the database is empty.
    pub fn init_genesis(&self, genesis: &SealedHeader) -> Result<()> {
        if self.chain_head.headers.get().is_some() {
            return Ok(());
        }
        tracing::info!("🌱 Writing genesis block {:#x}", genesis.hash());
        self.store_canonical_headers(std::slice::from_ref(genesis))?;
        // The genesis body is empty by construction.
        self.store_bodies(&[(0, genesis.hash(), BlockBody::default())])?;
        Ok(())
    }

    /// Appends a contiguous run of canonical headers, computing total difficulty along the way.
    /// One atomic batch: canonical mappings, headers, difficulty records, hash index, head row.
    pub fn store_canonical_headers(&self, headers: &[SealedHeader]) -> Result<()> {
        let Some(first) = headers.first() else { return Ok(()) };

        let mut td = if first.number() == 0 {
            U256::ZERO
        } else {
            self.get_total_difficulty(first.number() - 1, &first.parent_hash)?
                .ok_or_else(|| StorageError::inconsistency("appending headers with no parent difficulty record"))?
        };

        let canonical = self.db.get_column(Column::CanonicalHashes);
        let headers_col = self.db.get_column(Column::Headers);
        let td_col = self.db.get_column(Column::HeadersTotalDifficulty);
        let hash_to_num = self.db.get_column(Column::BlockHashToNumber);
        let meta = self.db.get_column(Column::BlockStorageMeta);

        let mut batch = WriteBatch::default();
        let mut last = 0;
        for header in headers {
            td += header.difficulty();
            let key = block_key(header.number(), &header.hash());
            batch.put_cf(&canonical, num_key(header.number()), header.hash().as_slice());
            batch.put_cf(&headers_col, key, rlp_encode(header.header()));
            batch.put_cf(&td_col, key, rlp_encode(&td));
            batch.put_cf(&hash_to_num, header.hash().as_slice(), num_key(header.number()));
            last = header.number();
        }

        let new_head = self.chain_head.clone();
        new_head.headers.set(Some(last));
        batch.put_cf(&meta, ROW_HEAD_STATUS, bincode::serialize(&new_head)?);

        self.db.write_opt(batch, &self.write_opt_no_wal)?;
        self.chain_head.headers.set(Some(last));
        Ok(())
    }

    /// Reverts the headers stage above `point` and records `bad_block` in the blacklist.
    /// Idempotent; a no-op (except for the blacklist) when the head is at or below `point`.
    pub fn unwind_headers_to(&self, point: u64, bad_block: Option<B256>) -> Result<()> {
        let canonical = self.db.get_column(Column::CanonicalHashes);
        let headers_col = self.db.get_column(Column::Headers);
        let td_col = self.db.get_column(Column::HeadersTotalDifficulty);
        let hash_to_num = self.db.get_column(Column::BlockHashToNumber);
        let bad_col = self.db.get_column(Column::BadBlocks);
        let meta = self.db.get_column(Column::BlockStorageMeta);

        let mut batch = WriteBatch::default();
        let head = self.chain_head.headers.get().unwrap_or(0);
        for block_n in (point + 1..=head).rev() {
            let Some(hash) = self.get_canonical_hash(block_n)? else { continue };
            let key = block_key(block_n, &hash);
            batch.delete_cf(&canonical, num_key(block_n));
            batch.delete_cf(&headers_col, key);
            batch.delete_cf(&td_col, key);
            batch.delete_cf(&hash_to_num, hash.as_slice());
        }
        if let Some(bad_block) = bad_block {
            batch.put_cf(&bad_col, bad_block.as_slice(), []);
        }

        let new_point = self.chain_head.headers.get().map(|head| head.min(point));
        let new_head = self.chain_head.clone();
        new_head.headers.set(new_point);
        batch.put_cf(&meta, ROW_HEAD_STATUS, bincode::serialize(&new_head)?);

        self.db.write_opt(batch, &self.write_opt_no_wal)?;
        self.chain_head.headers.set(new_point);
        Ok(())
    }

    /// Stores a contiguous run of bodies and advances the bodies progress. One atomic batch.
    pub fn store_bodies(&self, entries: &[(u64, B256, BlockBody)]) -> Result<()> {
        let Some((last, _, _)) = entries.last() else { return Ok(()) };

        let bodies = self.db.get_column(Column::BlockBodies);
        let meta = self.db.get_column(Column::BlockStorageMeta);

        let mut batch = WriteBatch::default();
        for (block_n, hash, body) in entries {
            batch.put_cf(&bodies, block_key(*block_n, hash), rlp_encode(body));
        }

        let new_head = self.chain_head.clone();
        new_head.bodies.set(Some(*last));
        batch.put_cf(&meta, ROW_HEAD_STATUS, bincode::serialize(&new_head)?);

        self.db.write_opt(batch, &self.write_opt_no_wal)?;
        self.chain_head.bodies.set(Some(*last));
        Ok(())
    }

    /// Reverts the bodies stage above `point`. Idempotent.
    pub fn unwind_bodies_to(&self, point: u64) -> Result<()> {
        let bodies = self.db.get_column(Column::BlockBodies);
        let meta = self.db.get_column(Column::BlockStorageMeta);

        let mut batch = WriteBatch::default();
        let head = self.chain_head.bodies.get().unwrap_or(0);
        for block_n in (point + 1..=head).rev() {
            // The canonical mapping may already be gone if headers unwound first; fall back to
            // the hash recorded next to the body keys by iterating the canonical index first.
            if let Some(hash) = self.get_canonical_hash(block_n)? {
                batch.delete_cf(&bodies, block_key(block_n, &hash));
            }
        }

        let new_point = self.chain_head.bodies.get().map(|head| head.min(point));
        let new_head = self.chain_head.clone();
        new_head.bodies.set(new_point);
        batch.put_cf(&meta, ROW_HEAD_STATUS, bincode::serialize(&new_head)?);

        self.db.write_opt(batch, &self.write_opt_no_wal)?;
        self.chain_head.bodies.set(new_point);
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use hp_block::test_utils::{build_chain, build_chain_with_bodies, dev_genesis, sample_body};
    use hp_chain_config::ChainConfig;
    use rstest::{fixture, rstest};
    use std::sync::Arc;

    #[fixture]
    fn backend() -> Arc<HematiteBackend> {
        HematiteBackend::open_for_testing(Arc::new(ChainConfig::dev()))
    }

    #[rstest]
    fn store_and_read_headers(backend: Arc<HematiteBackend>) {
        let config = backend.chain_config().clone();
        let genesis = dev_genesis(&config);
        backend.init_genesis(&genesis).unwrap();

        let chain = build_chain(&config, &genesis, 5);
        backend.store_canonical_headers(&chain).unwrap();

        let (head_n, head_hash, head_td) = backend.head_info().unwrap().unwrap();
        assert_eq!(head_n, 5);
        assert_eq!(head_hash, chain[4].hash());

        // Total difficulty accumulates strictly.
        let mut expected_td = genesis.difficulty();
        let mut prev_td = backend.get_total_difficulty(0, &genesis.hash()).unwrap().unwrap();
        assert_eq!(prev_td, expected_td);
        for header in &chain {
            expected_td += header.difficulty();
            let td = backend.get_total_difficulty(header.number(), &header.hash()).unwrap().unwrap();
            assert_eq!(td, expected_td);
            assert!(td > prev_td);
            prev_td = td;
        }
        assert_eq!(head_td, expected_td);

        // Round trips.
        let read = backend.get_canonical_header(3).unwrap().unwrap();
        assert_eq!(read, chain[2]);
        assert_eq!(backend.get_block_number(&chain[2].hash()).unwrap(), Some(3));
        assert_eq!(backend.get_header_by_hash(&chain[4].hash()).unwrap().unwrap(), *chain[4].header());
    }

    #[rstest]
    fn unwind_deletes_everything_above_point(backend: Arc<HematiteBackend>) {
        let config = backend.chain_config().clone();
        let genesis = dev_genesis(&config);
        backend.init_genesis(&genesis).unwrap();
        let chain = build_chain(&config, &genesis, 5);
        backend.store_canonical_headers(&chain).unwrap();

        let bad = chain[4].hash();
        backend.unwind_headers_to(2, Some(bad)).unwrap();

        assert_eq!(backend.chain_head().headers.get(), Some(2));
        for block_n in 3..=5u64 {
            let hash = chain[(block_n - 1) as usize].hash();
            assert_eq!(backend.get_canonical_hash(block_n).unwrap(), None);
            assert_eq!(backend.get_header(block_n, &hash).unwrap(), None);
            assert_eq!(backend.get_total_difficulty(block_n, &hash).unwrap(), None);
            assert_eq!(backend.get_block_number(&hash).unwrap(), None);
        }
        // Below the point everything survives.
        assert!(backend.get_canonical_header(2).unwrap().is_some());
        assert!(backend.is_bad_block(&bad).unwrap());

        // Idempotent, including with a point above the head.
        backend.unwind_headers_to(2, None).unwrap();
        backend.unwind_headers_to(100, None).unwrap();
        assert_eq!(backend.chain_head().headers.get(), Some(2));
    }

    #[rstest]
    fn bodies_progress_and_unwind(backend: Arc<HematiteBackend>) {
        let config = backend.chain_config().clone();
        let genesis = dev_genesis(&config);
        backend.init_genesis(&genesis).unwrap();

        let bodies: Vec<_> = (0..3).map(|i| sample_body(i + 1)).collect();
        let chain = build_chain_with_bodies(&config, &genesis, &bodies);
        backend.store_canonical_headers(&chain).unwrap();

        let entries: Vec<_> =
            chain.iter().zip(&bodies).map(|(h, b)| (h.number(), h.hash(), b.clone())).collect();
        backend.store_bodies(&entries).unwrap();
        assert_eq!(backend.chain_head().bodies.get(), Some(3));
        assert!(backend.has_body(2, &chain[1].hash()).unwrap());
        assert_eq!(backend.get_body(1, &chain[0].hash()).unwrap().unwrap(), bodies[0]);

        backend.unwind_bodies_to(1).unwrap();
        assert_eq!(backend.chain_head().bodies.get(), Some(1));
        assert!(!backend.has_body(2, &chain[1].hash()).unwrap());
        assert!(backend.has_body(1, &chain[0].hash()).unwrap());
    }

    #[rstest]
    fn head_status_survives_reopen() {
        let dir = tempfile::TempDir::with_prefix("hematite-reopen").unwrap();
        let config = Arc::new(ChainConfig::dev());
        let genesis = dev_genesis(&config);
        {
            let backend = HematiteBackend::open(dir.path(), config.clone()).unwrap();
            backend.init_genesis(&genesis).unwrap();
            let chain = build_chain(&config, &genesis, 3);
            backend.store_canonical_headers(&chain).unwrap();
        }
        let backend = HematiteBackend::open(dir.path(), config).unwrap();
        assert_eq!(backend.chain_head().headers.get(), Some(3));
        assert_eq!(backend.chain_head().bodies.get(), Some(0));
    }

    #[rstest]
    fn wrong_chain_is_rejected_on_reopen() {
        let dir = tempfile::TempDir::with_prefix("hematite-chain-guard").unwrap();
        {
            let _backend = HematiteBackend::open(dir.path(), Arc::new(ChainConfig::dev())).unwrap();
        }
        let err = HematiteBackend::open(dir.path(), Arc::new(ChainConfig::mainnet()));
        assert!(err.is_err());
    }
}
