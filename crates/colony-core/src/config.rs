use std::path::PathBuf;
use std::time::Duration;

/// Runtime configuration, read once from the environment at startup.
/// Credentials live here and nowhere else: never in source, never in the
/// persisted state file, never in logs.
#[derive(Clone)]
pub struct Config {
    pub state_file: PathBuf,
    pub reports_dir: PathBuf,
    pub shutdown_grace: Duration,
    pub dispatch_cache_ttl: Duration,
    pub rate_limit_per_minute: u32,
    pub llm_endpoint: String,
    pub llm_api_key: Option<String>,
    pub llm_model: String,
    pub telegram_bot_token: Option<String>,
    pub allowed_telegram_users: Vec<String>,
    pub rpc_endpoints: Vec<String>,
}

fn default_rpc_endpoints() -> Vec<String> {
    vec![
        "https://rpc.starknet.lava.build:443".to_string(),
        "https://rpc.starknet.blockpi.org/v1/public".to_string(),
        "https://starknet.drpc.org".to_string(),
    ]
}

impl Config {
    pub fn from_env() -> Self {
        Self {
            state_file: PathBuf::from(env_or("STATE_FILE", "./state.json")),
            reports_dir: PathBuf::from(env_or("REPORTS_DIR", "./reports")),
            shutdown_grace: Duration::from_secs(env_parsed("SHUTDOWN_GRACE_SECONDS", 10)),
            dispatch_cache_ttl: Duration::from_secs(env_parsed("DISPATCH_CACHE_TTL_SECONDS", 30)),
            rate_limit_per_minute: env_parsed("RATE_LIMIT_PER_MINUTE", 10),
            llm_endpoint: env_or("LLM_ENDPOINT", "https://api.minimax.io/v1"),
            llm_api_key: env_opt("LLM_API_KEY"),
            llm_model: env_or("LLM_MODEL", "MiniMax-M2.1"),
            telegram_bot_token: env_opt("TELEGRAM_BOT_TOKEN"),
            allowed_telegram_users: env_opt("ALLOWED_TELEGRAM_USERS")
                .map(split_csv)
                .unwrap_or_default(),
            rpc_endpoints: env_opt("RPC_ENDPOINTS")
                .map(split_csv)
                .unwrap_or_else(default_rpc_endpoints),
        }
    }
}

fn split_csv(raw: String) -> Vec<String> {
    raw.split(',')
        .map(|s| s.trim().to_string())
        .filter(|s| !s.is_empty())
        .collect()
}

impl std::fmt::Debug for Config {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("Config")
            .field("state_file", &self.state_file)
            .field("reports_dir", &self.reports_dir)
            .field("shutdown_grace", &self.shutdown_grace)
            .field("dispatch_cache_ttl", &self.dispatch_cache_ttl)
            .field("rate_limit_per_minute", &self.rate_limit_per_minute)
            .field("llm_endpoint", &self.llm_endpoint)
            .field("llm_api_key", &self.llm_api_key.as_ref().map(|_| "***"))
            .field("llm_model", &self.llm_model)
            .field(
                "telegram_bot_token",
                &self.telegram_bot_token.as_ref().map(|_| "***"),
            )
            .field("allowed_telegram_users", &self.allowed_telegram_users)
            .field("rpc_endpoints", &self.rpc_endpoints)
            .finish()
    }
}

impl Default for Config {
    fn default() -> Self {
        Self {
            state_file: PathBuf::from("./state.json"),
            reports_dir: PathBuf::from("./reports"),
            shutdown_grace: Duration::from_secs(10),
            dispatch_cache_ttl: Duration::from_secs(30),
            rate_limit_per_minute: 10,
            llm_endpoint: "https://api.minimax.io/v1".to_string(),
            llm_api_key: None,
            llm_model: "MiniMax-M2.1".to_string(),
            telegram_bot_token: None,
            allowed_telegram_users: Vec::new(),
            rpc_endpoints: default_rpc_endpoints(),
        }
    }
}

fn env_or(key: &str, default: &str) -> String {
    std::env::var(key)
        .ok()
        .filter(|v| !v.trim().is_empty())
        .unwrap_or_else(|| default.to_string())
}

fn env_opt(key: &str) -> Option<String> {
    std::env::var(key).ok().filter(|v| !v.trim().is_empty())
}

fn env_parsed<T: std::str::FromStr>(key: &str, default: T) -> T {
    std::env::var(key)
        .ok()
        .and_then(|v| v.trim().parse().ok())
        .unwrap_or(default)
}
