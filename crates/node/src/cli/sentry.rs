#[derive(Clone, Debug, clap::Args)]
pub struct SentryParams {
    /// gRPC endpoint of the sentry daemon.
    #[arg(env = "HEMATITE_SENTRY_URL", long, default_value = "http://127.0.0.1:9091", value_name = "URL")]
    pub sentry_url: String,
}
