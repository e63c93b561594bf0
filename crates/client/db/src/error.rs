use std::borrow::Cow;

#[derive(thiserror::Error, Debug)]
pub enum StorageError {
    #[error("RocksDB error: {0}")]
    RocksDb(#[from] rocksdb::Error),
    #[error("Value codec error: {0}")]
    Bincode(#[from] bincode::Error),
    #[error("RLP decode error: {0}")]
    Rlp(#[from] alloy_rlp::Error),
    #[error("Inconsistent storage state: {0}")]
    Inconsistency(Cow<'static, str>),
}

impl StorageError {
    pub fn inconsistency(msg: impl Into<Cow<'static, str>>) -> Self {
        Self::Inconsistency(msg.into())
    }
}
