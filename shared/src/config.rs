use std::env;
use std::process;

#[derive(Debug, Clone)]
pub struct DatabaseConfig {
    pub database_url: String,
    pub max_connections: u32,
    pub min_connections: u32,
    pub acquire_timeout_secs: u64,
    pub max_conn_lifetime_secs: u64,
    pub max_conn_idle_time_secs: u64,
}

#[derive(Debug, Clone)]
pub struct GoogleProviderConfig {
    pub client_id: String,
    pub client_secret: String,
    pub redirect_uri: String,
    pub oauth_scopes: Vec<String>,
}

#[derive(Debug, Clone)]
pub struct DropboxProviderConfig {
    pub client_id: String,
    pub client_secret: String,
    pub redirect_uri: String,
    pub oauth_scopes: Vec<String>,
}

#[derive(Debug, Clone)]
pub struct SessionCookieConfig {
    pub auth_key: String,
    pub encryption_key: String,
}

#[derive(Debug, Clone)]
pub struct VaultConfig {
    /// Exactly 32 raw bytes once hex-decoded.
    pub master_key: Vec<u8>,
}

#[derive(Debug, Clone)]
pub struct WorkerConfig {
    pub max_concurrent_tasks: usize,
    pub poll_interval_ms: u64,
}

#[derive(Debug, Clone)]
pub struct SchedulerConfig {
    pub tick_interval_secs: u64,
}

#[derive(Debug, Clone)]
pub struct Config {
    pub database: DatabaseConfig,
    pub google: GoogleProviderConfig,
    pub dropbox: DropboxProviderConfig,
    pub session_cookie: SessionCookieConfig,
    pub vault: VaultConfig,
    pub worker: WorkerConfig,
    pub scheduler: SchedulerConfig,
}

impl Config {
    pub fn from_env() -> Self {
        Self {
            database: DatabaseConfig::from_env(),
            google: GoogleProviderConfig::from_env(),
            dropbox: DropboxProviderConfig::from_env(),
            session_cookie: SessionCookieConfig::from_env(),
            vault: VaultConfig::from_env(),
            worker: WorkerConfig::from_env(),
            scheduler: SchedulerConfig::from_env(),
        }
    }
}

fn get_required_env(key: &str) -> String {
    env::var(key).unwrap_or_else(|_| {
        eprintln!("ERROR: Required environment variable '{}' is not set", key);
        eprintln!("Please set this variable in your .env file or environment");
        process::exit(1);
    })
}

fn get_optional_env(key: &str, default: &str) -> String {
    env::var(key).unwrap_or_else(|_| default.to_string())
}

fn parse_port(port_str: &str, var_name: &str) -> u16 {
    port_str.parse::<u16>().unwrap_or_else(|_| {
        eprintln!(
            "ERROR: Invalid port number in '{}': '{}'",
            var_name, port_str
        );
        eprintln!("Port must be a number between 1 and 65535");
        process::exit(1);
    })
}

fn validate_url(url: &str, var_name: &str) -> String {
    if url.is_empty() {
        eprintln!("ERROR: Environment variable '{}' cannot be empty", var_name);
        process::exit(1);
    }

    if !url.starts_with("http://") && !url.starts_with("https://") && !url.starts_with("postgresql://") {
        eprintln!("ERROR: Invalid URL format in '{}': '{}'", var_name, url);
        eprintln!("URL must start with http://, https://, or postgresql://");
        process::exit(1);
    }

    url.to_string()
}

fn parse_u32(value: &str, var_name: &str) -> u32 {
    value.parse::<u32>().unwrap_or_else(|_| {
        eprintln!("ERROR: Invalid value for '{}': '{}'", var_name, value);
        eprintln!("Must be a positive number");
        process::exit(1);
    })
}

fn parse_u64(value: &str, var_name: &str) -> u64 {
    value.parse::<u64>().unwrap_or_else(|_| {
        eprintln!("ERROR: Invalid value for '{}': '{}'", var_name, value);
        eprintln!("Must be a positive number");
        process::exit(1);
    })
}

fn decode_master_key(hex: &str) -> Vec<u8> {
    if hex.len() != 64 {
        eprintln!("ERROR: AES_MASTER_KEY must be exactly 64 hex characters (32 bytes)");
        process::exit(1);
    }

    let mut bytes = Vec::with_capacity(32);
    for i in (0..hex.len()).step_by(2) {
        match u8::from_str_radix(&hex[i..i + 2], 16) {
            Ok(b) => bytes.push(b),
            Err(_) => {
                eprintln!("ERROR: AES_MASTER_KEY is not valid hex");
                process::exit(1);
            }
        }
    }
    bytes
}

impl DatabaseConfig {
    pub fn from_env() -> Self {
        let database_url = get_required_env("DATABASE_URL");
        let database_url = validate_url(&database_url, "DATABASE_URL");

        let max_connections = parse_u32(
            &get_optional_env("DB_MAX_CONNECTIONS", "10"),
            "DB_MAX_CONNECTIONS",
        );
        let min_connections = parse_u32(
            &get_optional_env("DB_MIN_CONNECTIONS", "1"),
            "DB_MIN_CONNECTIONS",
        );
        let acquire_timeout_secs = parse_u64(
            &get_optional_env("DB_ACQUIRE_TIMEOUT_SECONDS", "3"),
            "DB_ACQUIRE_TIMEOUT_SECONDS",
        );
        let max_conn_lifetime_secs = parse_u64(
            &get_optional_env("DB_MAX_CONN_LIFETIME_SECONDS", "1800"),
            "DB_MAX_CONN_LIFETIME_SECONDS",
        );
        let max_conn_idle_time_secs = parse_u64(
            &get_optional_env("DB_MAX_CONN_IDLE_TIME_SECONDS", "600"),
            "DB_MAX_CONN_IDLE_TIME_SECONDS",
        );

        Self {
            database_url,
            max_connections,
            min_connections,
            acquire_timeout_secs,
            max_conn_lifetime_secs,
            max_conn_idle_time_secs,
        }
    }
}

impl GoogleProviderConfig {
    pub fn from_env() -> Self {
        let client_id = get_required_env("GOOGLE_CLIENT_ID");
        let client_secret = get_required_env("GOOGLE_CLIENT_SECRET");
        let redirect_uri = get_required_env("GOOGLE_REDIRECT_URI");
        let redirect_uri = validate_url(&redirect_uri, "GOOGLE_REDIRECT_URI");

        let oauth_scopes = get_optional_env(
            "GOOGLE_OAUTH_SCOPES",
            "https://www.googleapis.com/auth/drive.readonly",
        )
        .split(',')
        .map(|s| s.trim().to_string())
        .collect();

        Self {
            client_id,
            client_secret,
            redirect_uri,
            oauth_scopes,
        }
    }
}

impl DropboxProviderConfig {
    pub fn from_env() -> Self {
        let client_id = get_required_env("DROPBOX_CLIENT_ID");
        let client_secret = get_required_env("DROPBOX_CLIENT_SECRET");
        let redirect_uri = get_required_env("DROPBOX_REDIRECT_URI");
        let redirect_uri = validate_url(&redirect_uri, "DROPBOX_REDIRECT_URI");

        let oauth_scopes = get_optional_env("DROPBOX_OAUTH_SCOPES", "files.metadata.read")
            .split(',')
            .map(|s| s.trim().to_string())
            .collect();

        Self {
            client_id,
            client_secret,
            redirect_uri,
            oauth_scopes,
        }
    }
}

impl SessionCookieConfig {
    pub fn from_env() -> Self {
        let auth_key = get_required_env("SESSION_COOKIE_AUTH_KEY");
        let encryption_key = get_required_env("SESSION_COOKIE_ENCRYPTION_KEY");

        if auth_key.len() < 32 {
            eprintln!("ERROR: SESSION_COOKIE_AUTH_KEY must be at least 32 characters");
            process::exit(1);
        }
        if encryption_key.len() != 32 {
            eprintln!("ERROR: SESSION_COOKIE_ENCRYPTION_KEY must be exactly 32 characters");
            process::exit(1);
        }

        Self {
            auth_key,
            encryption_key,
        }
    }
}

impl VaultConfig {
    pub fn from_env() -> Self {
        let master_key_hex = get_required_env("AES_MASTER_KEY");
        let master_key = decode_master_key(&master_key_hex);

        Self { master_key }
    }
}

impl WorkerConfig {
    pub fn from_env() -> Self {
        let max_concurrent_tasks = parse_u32(
            &get_optional_env("WORKER_MAX_CONCURRENT_TASKS", "10"),
            "WORKER_MAX_CONCURRENT_TASKS",
        ) as usize;
        let poll_interval_ms = parse_u64(
            &get_optional_env("WORKER_POLL_INTERVAL_MS", "500"),
            "WORKER_POLL_INTERVAL_MS",
        );

        Self {
            max_concurrent_tasks,
            poll_interval_ms,
        }
    }
}

impl SchedulerConfig {
    pub fn from_env() -> Self {
        let tick_interval_secs = parse_u64(
            &get_optional_env("SCHEDULER_TICK_INTERVAL_SECONDS", "60"),
            "SCHEDULER_TICK_INTERVAL_SECONDS",
        );

        Self { tick_interval_secs }
    }
}

/// Standalone helper retained for callers (e.g. the HTTP entrypoints) that
/// only need a bound port, not a full section struct.
pub fn read_port_env(var_name: &str, default: &str) -> u16 {
    parse_port(&get_optional_env(var_name, default), var_name)
}
