use derive_yaml::FromYaml;
use crate::config::parser::FromYaml; // Import trait

// --- Constants ---
pub const DEFAULT_HOST: &str = "0.0.0.0";
pub const DEFAULT_PORT: u16 = 9006;
pub const DEFAULT_ROOT: &str = "./www";
pub const DEFAULT_THREAD_COUNT: usize = 4;
pub const DEFAULT_DB_POOL_SIZE: usize = 8;
pub const DEFAULT_DB_PORT: u16 = 3306;
pub const DEFAULT_MAX_BODY_SIZE: usize = 1_048_576; // 1MB, bounds Content-Length

/// Top level configuration for the server, read from a YAML-subset config file and
/// overridable by CLI flags (see `bin/main.rs`).
#[derive(Debug, Clone, FromYaml)]
pub struct AppConfig {
    pub host: String,
    pub port: u16,
    pub document_root: String,
    pub db_url: String,
    pub db_user: String,
    pub db_password: String,
    pub db_name: String,
    pub db_port: u16,
    pub db_pool_size: usize,
    pub thread_count: usize,
    pub log_async: bool,
    pub log_disabled: bool,
    pub trigger_mode: u8,
    pub linger_on_shutdown: bool,
    pub concurrency_mode_reactor: bool,
}

impl Default for AppConfig {
    fn default() -> Self {
        Self {
            host: DEFAULT_HOST.to_string(),
            port: DEFAULT_PORT,
            document_root: DEFAULT_ROOT.to_string(),
            db_url: "127.0.0.1".to_string(),
            db_user: String::new(),
            db_password: String::new(),
            db_name: String::new(),
            db_port: DEFAULT_DB_PORT,
            db_pool_size: DEFAULT_DB_POOL_SIZE,
            thread_count: DEFAULT_THREAD_COUNT,
            log_async: false,
            log_disabled: false,
            trigger_mode: 0,
            linger_on_shutdown: false,
            concurrency_mode_reactor: true,
        }
    }
}
