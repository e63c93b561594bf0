use std::path::PathBuf;

#[derive(Clone, Debug, clap::Args)]
pub struct DbParams {
    /// Directory holding the chain database.
    #[arg(env = "HEMATITE_BASE_PATH", long, default_value = "./hematite-db", value_name = "PATH")]
    pub base_path: PathBuf,
}
