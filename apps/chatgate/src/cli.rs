use std::path::PathBuf;

use clap::Parser;

use chatgate_common::{ExhaustionPolicy, GlobalConfigPatch};

#[derive(Parser, Debug)]
#[command(name = "chatgate", version, about)]
pub(crate) struct Cli {
    /// JSON file with any subset of the settings below.
    #[arg(long, env = "CHATGATE_CONFIG")]
    pub(crate) config: Option<PathBuf>,
    #[arg(long, env = "CHATGATE_HOST")]
    pub(crate) host: Option<String>,
    #[arg(long, env = "CHATGATE_PORT")]
    pub(crate) port: Option<u16>,
    #[arg(long, env = "CHATGATE_DATA_DIR")]
    pub(crate) data_dir: Option<PathBuf>,
    /// Upstream chat origin.
    #[arg(long = "upstream", env = "CHATGATE_UPSTREAM")]
    pub(crate) upstream_base_url: Option<String>,
    #[arg(long, env = "CHATGATE_PROXY")]
    pub(crate) proxy: Option<String>,
    #[arg(long, env = "CHATGATE_SESSION_POOL_CAPACITY")]
    pub(crate) session_pool_capacity: Option<usize>,
    #[arg(long, env = "CHATGATE_REQUEST_TIMEOUT_SECS")]
    pub(crate) request_timeout_secs: Option<u64>,
    #[arg(long, env = "CHATGATE_DEFAULT_MODEL")]
    pub(crate) default_model: Option<String>,
    #[arg(long, env = "CHATGATE_RATE_LIMIT_COOLDOWN_HOURS")]
    pub(crate) rate_limit_cooldown_hours: Option<u64>,
    #[arg(long, env = "CHATGATE_STREAM_CHUNK_SIZE")]
    pub(crate) stream_chunk_size: Option<usize>,
    #[arg(long, env = "CHATGATE_STREAM_CHUNK_DELAY_MS")]
    pub(crate) stream_chunk_delay_ms: Option<u64>,
    /// `reject` answers 503 once no credential is left; `shutdown` also stops the server.
    #[arg(long, env = "CHATGATE_EXHAUSTION_POLICY")]
    pub(crate) exhaustion_policy: Option<ExhaustionPolicy>,
    /// Downstream bearer key; repeat for several. None disables client auth.
    #[arg(long = "api-key", env = "CHATGATE_API_KEYS", value_delimiter = ',')]
    pub(crate) api_keys: Vec<String>,
    #[arg(long, env = "CHATGATE_ADMIN_KEY")]
    pub(crate) admin_key: Option<String>,
}

impl Cli {
    pub(crate) fn to_patch(&self) -> GlobalConfigPatch {
        let api_keys: Vec<String> = self
            .api_keys
            .iter()
            .map(|key| key.trim().to_string())
            .filter(|key| !key.is_empty())
            .collect();
        GlobalConfigPatch {
            host: self.host.clone(),
            port: self.port,
            data_dir: self.data_dir.clone(),
            upstream_base_url: self.upstream_base_url.clone(),
            proxy: self.proxy.clone(),
            session_pool_capacity: self.session_pool_capacity,
            request_timeout_secs: self.request_timeout_secs,
            default_model: self.default_model.clone(),
            rate_limit_cooldown_hours: self.rate_limit_cooldown_hours,
            stream_chunk_size: self.stream_chunk_size,
            stream_chunk_delay_ms: self.stream_chunk_delay_ms,
            exhaustion_policy: self.exhaustion_policy,
            api_keys: (!api_keys.is_empty()).then_some(api_keys),
            admin_key: self
                .admin_key
                .as_ref()
                .map(|key| key.trim().to_string())
                .filter(|key| !key.is_empty()),
        }
    }
}
