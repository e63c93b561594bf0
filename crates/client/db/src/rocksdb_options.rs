use anyhow::Context;
use rocksdb::Options;

use crate::Column;

pub(crate) fn rocksdb_global_options() -> anyhow::Result<Options> {
    let mut options = Options::default();
    options.create_if_missing(true);
    options.create_missing_column_families(true);
    let cores = std::thread::available_parallelism().context("Getting available parallelism")?.get() as i32;
    options.increase_parallelism(cores);
    options.set_max_background_jobs(cores.clamp(1, 4));
    options.set_keep_log_file_num(3);
    Ok(options)
}

impl Column {
    /// Per-column options. Point-lookup namespaces get a bloom filter.
    pub(crate) fn rocksdb_options(&self) -> Options {
        let mut options = Options::default();
        match self {
            Column::Headers | Column::HeadersTotalDifficulty | Column::BlockBodies | Column::BlockHashToNumber => {
                options.set_memtable_prefix_bloom_ratio(0.1);
            }
            _ => {}
        }
        options
    }
}
