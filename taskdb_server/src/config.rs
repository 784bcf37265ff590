use std::net::{IpAddr, Ipv4Addr, SocketAddr};
use std::path::PathBuf;
use std::time::Duration;

use clap::Parser;

/// Server configuration. Every flag can also be set through its environment
/// variable.
#[derive(Parser, Debug, Clone)]
#[command(name = "taskdb-server")]
#[command(version, about = "To-do list server with REST, WebSocket and GraphQL front-ends", long_about = None)]
pub struct Config {
    /// Address to bind
    #[arg(long, env = "TASKDB_HOST", default_value_t = IpAddr::V4(Ipv4Addr::UNSPECIFIED))]
    pub host: IpAddr,

    /// Port to listen on
    #[arg(long, env = "PORT", default_value_t = 3000)]
    pub port: u16,

    /// Directory holding tasks.json and users.json
    #[arg(long, env = "TASKDB_DATA_DIR", default_value = "data")]
    pub data_dir: PathBuf,

    /// Root directory for uploaded attachments
    #[arg(long, env = "TASKDB_UPLOADS_DIR", default_value = "uploads")]
    pub uploads_dir: PathBuf,

    /// JWT signing secret file; defaults to <data-dir>/jwt-secret.txt
    #[arg(long, env = "TASKDB_SECRET_FILE")]
    pub secret_file: Option<PathBuf>,

    /// Session lifetime, e.g. 90s, 30m or 1h
    #[arg(long, env = "TASKDB_TOKEN_TTL", default_value = "1h", value_parser = parse_duration)]
    pub token_ttl: Duration,

    /// Mark the session cookie Secure
    #[arg(long, env = "TASKDB_SECURE_COOKIES")]
    pub secure_cookies: bool,

    /// Serve task routes without a session, operating on owner-less tasks
    #[arg(long, env = "TASKDB_ALLOW_ANONYMOUS")]
    pub allow_anonymous: bool,

    /// Treat unparseable documents as empty instead of refusing to start using them
    #[arg(long, env = "TASKDB_LENIENT_DOCUMENTS")]
    pub lenient_documents: bool,

    /// Origin allowed to make credentialed cross-origin requests
    #[arg(long, env = "TASKDB_CORS_ORIGIN")]
    pub cors_origin: Option<String>,

    /// Directory of static files served at /
    #[arg(long, env = "TASKDB_STATIC_DIR")]
    pub static_dir: Option<PathBuf>,
}

impl Config {
    pub fn addr(&self) -> SocketAddr {
        SocketAddr::new(self.host, self.port)
    }

    pub fn secret_path(&self) -> PathBuf {
        self.secret_file
            .clone()
            .unwrap_or_else(|| self.data_dir.join("jwt-secret.txt"))
    }

    /// Configuration rooted in `dir`, for tests and embedding.
    pub fn for_dir(dir: impl Into<PathBuf>) -> Self {
        let dir = dir.into();
        Self {
            host: IpAddr::V4(Ipv4Addr::LOCALHOST),
            port: 0,
            data_dir: dir.join("data"),
            uploads_dir: dir.join("uploads"),
            secret_file: None,
            token_ttl: Duration::from_secs(3600),
            secure_cookies: false,
            allow_anonymous: false,
            lenient_documents: false,
            cors_origin: None,
            static_dir: None,
        }
    }
}

/// Parse `<n>s`, `<n>m` or `<n>h`. A bare number is seconds.
pub fn parse_duration(raw: &str) -> Result<Duration, String> {
    let raw = raw.trim();
    let (digits, unit) = match raw.char_indices().find(|(_, c)| !c.is_ascii_digit()) {
        Some((idx, _)) => raw.split_at(idx),
        None => (raw, "s"),
    };
    let value: u64 = digits
        .parse()
        .map_err(|_| format!("invalid duration {raw:?}"))?;
    let scale = match unit {
        "s" => 1,
        "m" => 60,
        "h" => 3600,
        other => return Err(format!("unknown duration unit {other:?} in {raw:?}")),
    };
    let secs = value
        .checked_mul(scale)
        .ok_or_else(|| format!("duration {raw:?} is too large"))?;
    if secs == 0 {
        return Err("duration must be positive".to_string());
    }
    Ok(Duration::from_secs(secs))
}
