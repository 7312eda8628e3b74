//! Startup configuration.
//!
//! [`Settings`] is what the operator supplies (flags or environment);
//! [`Settings::validate`] turns it into the immutable [`Config`] the gateway
//! runs with. Every problem is collected so a bad deployment is reported in
//! one go instead of one restart per mistake.

use std::collections::HashSet;
use std::fmt;
use std::net::{IpAddr, SocketAddr};
use std::path::{Path, PathBuf};
use std::time::Duration;

use axum::http::HeaderValue;
use clap::Parser;
use thiserror::Error;

/// Placeholder shipped in sample deployments; never accepted.
pub const PLACEHOLDER_API_KEY: &str = "your-secret-api-key-here";
pub const MIN_API_KEY_LEN: usize = 32;
/// Upper bound for `MAX_CONCURRENT_TOOLS`.
pub const MAX_CONCURRENT_TOOLS_LIMIT: usize = 1024;

#[derive(Debug, Clone, Parser)]
#[command(
    name = "vnstat-gateway",
    version,
    about = "Serve vnStat traffic counters over an authenticated JSON API"
)]
pub struct Settings {
    /// Address to listen on
    #[arg(long, env = "VPS_HOST", default_value = "0.0.0.0")]
    pub host: String,

    /// Port to listen on
    #[arg(long, env = "VPS_PORT", default_value_t = 8443)]
    pub port: u16,

    /// Shared bearer key clients must present (at least 32 characters)
    #[arg(long, env = "VPS_API_KEY", hide_env_values = true)]
    pub api_key: Option<String>,

    /// Path to the vnstat executable
    #[arg(long, env = "VNSTAT_PATH", default_value = "/usr/bin/vnstat")]
    pub vnstat_path: PathBuf,

    /// TLS private key (PEM); requires --ssl-certfile
    #[arg(long, env = "SSL_KEYFILE")]
    pub ssl_keyfile: Option<PathBuf>,

    /// TLS certificate chain (PEM); requires --ssl-keyfile
    #[arg(long, env = "SSL_CERTFILE")]
    pub ssl_certfile: Option<PathBuf>,

    /// Comma separated client addresses allowed to connect (empty = any)
    #[arg(long, env = "ALLOWED_IPS", value_delimiter = ',')]
    pub allowed_ips: Vec<String>,

    /// Seconds a single vnstat invocation may run
    #[arg(long, env = "REQUEST_TIMEOUT", default_value_t = 10)]
    pub request_timeout: u64,

    /// Maximum vnstat processes running at once
    #[arg(long, env = "MAX_CONCURRENT_TOOLS", default_value_t = 8)]
    pub max_concurrent_tools: usize,

    /// Comma separated browser origins allowed to call the API (`*` = any, empty = none)
    #[arg(long, env = "ALLOWED_ORIGINS", value_delimiter = ',', default_value = "*")]
    pub allowed_origins: Vec<String>,

    /// Log filter used when RUST_LOG is not set
    #[arg(long, env = "LOG_LEVEL", default_value = "info")]
    pub log_level: String,

    /// Append logs to this file instead of stderr
    #[arg(long, env = "LOG_FILE")]
    pub log_file: Option<PathBuf>,
}

/// The shared bearer secret. `Debug` never prints it.
#[derive(Clone, PartialEq, Eq)]
pub struct ApiKey(String);

impl ApiKey {
    pub fn new(key: impl Into<String>) -> Self {
        Self(key.into())
    }

    pub fn as_bytes(&self) -> &[u8] {
        self.0.as_bytes()
    }

}

impl fmt::Debug for ApiKey {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "ApiKey(<{} chars>)", self.0.len())
    }
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct TlsPaths {
    pub key: PathBuf,
    pub cert: PathBuf,
}

/// Which browser origins get CORS headers.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum CorsOrigins {
    Any,
    List(Vec<HeaderValue>),
}

/// Validated, immutable runtime configuration.
#[derive(Debug, Clone)]
pub struct Config {
    pub listen: SocketAddr,
    pub api_key: ApiKey,
    pub tool_path: PathBuf,
    pub tls: Option<TlsPaths>,
    pub allowed_source_ips: HashSet<IpAddr>,
    pub request_timeout: Duration,
    pub max_concurrent_tools: usize,
    pub cors_origins: CorsOrigins,
}

impl Config {
    pub fn allowlist_enabled(&self) -> bool {
        !self.allowed_source_ips.is_empty()
    }
}

#[derive(Debug, Error, PartialEq, Eq)]
pub enum ConfigIssue {
    #[error("listen host {0:?} is not an IP address")]
    InvalidHost(String),

    #[error("API key is not set or still the placeholder; set VPS_API_KEY")]
    MissingApiKey,

    #[error("API key must be at least 32 characters (got {0})")]
    ShortApiKey(usize),

    #[error("vnstat not found at {0}")]
    ToolNotFound(PathBuf),

    #[error("vnstat at {0} is not an executable file")]
    ToolNotExecutable(PathBuf),

    #[error("TLS needs both a key and a certificate; only {0} was given")]
    IncompleteTlsPair(&'static str),

    #[error("TLS {kind} file not found: {path}")]
    TlsFileMissing { kind: &'static str, path: PathBuf },

    #[error("allowlist entry {0:?} is not an IP address")]
    InvalidAllowedIp(String),

    #[error("request timeout must be at least one second")]
    ZeroTimeout,

    #[error("max concurrent tools must be at least one")]
    ZeroConcurrency,

    #[error("max concurrent tools must be at most 1024 (got {0})")]
    ExcessiveConcurrency(usize),

    #[error("allowed origin {0:?} is not a valid header value")]
    InvalidOrigin(String),

    #[error("allowed origins cannot mix \"*\" with explicit origins")]
    MixedWildcardOrigin,
}

/// All problems found while validating [`Settings`].
#[derive(Debug, Error, PartialEq, Eq)]
#[error("{} configuration error(s):{}", .0.len(), render_issues(.0))]
pub struct ConfigErrors(pub Vec<ConfigIssue>);

fn render_issues(issues: &[ConfigIssue]) -> String {
    issues.iter().map(|i| format!("\n  - {i}")).collect()
}

impl Settings {
    pub fn validate(&self) -> Result<Config, ConfigErrors> {
        let mut issues = Vec::new();

        let listen = match self.host.trim().parse::<IpAddr>() {
            Ok(ip) => Some(SocketAddr::new(ip, self.port)),
            Err(_) => {
                issues.push(ConfigIssue::InvalidHost(self.host.clone()));
                None
            }
        };

        let api_key = match self.api_key.as_deref() {
            None | Some("") | Some(PLACEHOLDER_API_KEY) => {
                issues.push(ConfigIssue::MissingApiKey);
                None
            }
            Some(key) if key.len() < MIN_API_KEY_LEN => {
                issues.push(ConfigIssue::ShortApiKey(key.len()));
                None
            }
            Some(key) => Some(ApiKey::new(key)),
        };

        if let Err(issue) = check_executable(&self.vnstat_path) {
            issues.push(issue);
        }

        let tls = match (&self.ssl_keyfile, &self.ssl_certfile) {
            (None, None) => None,
            (Some(_), None) => {
                issues.push(ConfigIssue::IncompleteTlsPair("a key"));
                None
            }
            (None, Some(_)) => {
                issues.push(ConfigIssue::IncompleteTlsPair("a certificate"));
                None
            }
            (Some(key), Some(cert)) => {
                let before = issues.len();
                for (kind, path) in [("key", key), ("certificate", cert)] {
                    if !path.is_file() {
                        issues.push(ConfigIssue::TlsFileMissing {
                            kind,
                            path: path.clone(),
                        });
                    }
                }
                (issues.len() == before).then(|| TlsPaths {
                    key: key.clone(),
                    cert: cert.clone(),
                })
            }
        };

        let mut allowed_source_ips = HashSet::new();
        for entry in self.allowed_ips.iter().map(|s| s.trim()).filter(|s| !s.is_empty()) {
            match entry.parse::<IpAddr>() {
                Ok(ip) => {
                    allowed_source_ips.insert(ip.to_canonical());
                }
                Err(_) => issues.push(ConfigIssue::InvalidAllowedIp(entry.to_string())),
            }
        }

        if self.request_timeout == 0 {
            issues.push(ConfigIssue::ZeroTimeout);
        }
        if self.max_concurrent_tools == 0 {
            issues.push(ConfigIssue::ZeroConcurrency);
        } else if self.max_concurrent_tools > MAX_CONCURRENT_TOOLS_LIMIT {
            issues.push(ConfigIssue::ExcessiveConcurrency(self.max_concurrent_tools));
        }

        let cors_origins = cors_origins(&self.allowed_origins, &mut issues);

        match (listen, api_key) {
            (Some(listen), Some(api_key)) if issues.is_empty() => Ok(Config {
                listen,
                api_key,
                tool_path: self.vnstat_path.clone(),
                tls,
                allowed_source_ips,
                request_timeout: Duration::from_secs(self.request_timeout),
                max_concurrent_tools: self.max_concurrent_tools,
                cors_origins,
            }),
            _ => Err(ConfigErrors(issues)),
        }
    }
}

fn cors_origins(entries: &[String], issues: &mut Vec<ConfigIssue>) -> CorsOrigins {
    let entries: Vec<&str> = entries
        .iter()
        .map(|s| s.trim())
        .filter(|s| !s.is_empty())
        .collect();

    if entries.contains(&"*") {
        if entries.len() > 1 {
            issues.push(ConfigIssue::MixedWildcardOrigin);
        }
        return CorsOrigins::Any;
    }

    let mut origins = Vec::with_capacity(entries.len());
    for entry in entries {
        match HeaderValue::from_str(entry) {
            Ok(value) => origins.push(value),
            Err(_) => issues.push(ConfigIssue::InvalidOrigin(entry.to_string())),
        }
    }
    CorsOrigins::List(origins)
}

fn check_executable(path: &Path) -> Result<(), ConfigIssue> {
    let meta = std::fs::metadata(path).map_err(|_| ConfigIssue::ToolNotFound(path.to_path_buf()))?;
    if !meta.is_file() {
        return Err(ConfigIssue::ToolNotExecutable(path.to_path_buf()));
    }
    #[cfg(unix)]
    {
        use std::os::unix::fs::PermissionsExt;
        if meta.permissions().mode() & 0o111 == 0 {
            return Err(ConfigIssue::ToolNotExecutable(path.to_path_buf()));
        }
    }
    Ok(())
}
