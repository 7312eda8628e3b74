#![allow(dead_code)]

use std::collections::HashSet;
use std::fs;
use std::net::SocketAddr;
use std::os::unix::fs::PermissionsExt;
use std::path::{Path, PathBuf};
use std::sync::OnceLock;
use std::time::Duration;

use axum::body::Body;
use axum::extract::ConnectInfo;
use axum::http::{Request, header};
use serde_json::Value;
use tempfile::TempDir;

use vnstat_gateway::config::{ApiKey, CorsOrigins};
use vnstat_gateway::Config;

pub const API_KEY: &str = "test-key-0123456789-abcdefghijklmnop";

const SNAPSHOT: &str = r#"{"vnstatversion":"2.10","jsonversion":"$ARGS","interfaces":[{"name":"eth0","alias":"uplink","created":{"date":{"year":2023,"month":3,"day":14},"timestamp":1678752000},"updated":{"date":{"year":2024,"month":5,"day":1},"time":{"hour":12,"minute":5},"timestamp":1714565100},"traffic":{"total":{"rx":987654321012,"tx":123456789098},"hour":[{"id":1,"date":{"year":2024,"month":5,"day":1},"time":{"hour":11,"minute":0},"timestamp":1714561200,"rx":73400320,"tx":10485760}],"day":[{"id":2,"date":{"year":2024,"month":5,"day":1},"timestamp":1714521600,"rx":1073741824,"tx":268435456}],"month":[{"id":3,"date":{"year":2024,"month":5},"timestamp":1714521600,"rx":53687091200,"tx":5368709120}]}},{"name":"wg0","alias":"","created":{"date":{"year":2024,"month":1,"day":2}},"traffic":{"total":{"rx":42,"tx":7}}}]}"#;

const LIVE: &str = r#"{"jsonversion":"2","vnstatversion":"2.10","interface":"eth0","sampletime":2,"rx":{"ratestring":"1.20 Mbit/s","bytespersecond":150000,"packetspersecond":120,"bytes":300000,"packets":240},"tx":{"ratestring":"80 kbit/s","bytespersecond":10000,"packetspersecond":30,"bytes":20000,"packets":60}}"#;

pub const VERSION_LINE: &str = "vnStat 2.10 by Teemu Toivola <tst at iki dot fi>";

/// Fake vnstat executables, written once per test binary before any of them
/// is spawned.
pub struct Tools {
    _dir: TempDir,
    pub ok: PathBuf,
    pub failing: PathBuf,
    pub garbage: PathBuf,
    pub no_interfaces: PathBuf,
    pub slow: PathBuf,
    pub slow_pid: PathBuf,
    pub stalled: PathBuf,
    pub stalled_pid: PathBuf,
    pub busy: PathBuf,
    pub missing: PathBuf,
}

pub fn tools() -> &'static Tools {
    static TOOLS: OnceLock<Tools> = OnceLock::new();
    TOOLS.get_or_init(|| {
        let dir = tempfile::Builder::new()
            .prefix("vnstat-gateway-test")
            .tempdir()
            .unwrap();
        let slow_pid = dir.path().join("slow.pid");

        let ok_body = format!(
            "#!/bin/sh\nARGS=\"$*\"\ncase \"$1\" in\n  --version) echo \"{VERSION_LINE}\" ;;\n  -tr) cat <<EOF\n{LIVE}\nEOF\n  ;;\n  *) cat <<EOF\n{SNAPSHOT}\nEOF\n  ;;\nesac\n"
        );
        let busy_body = format!("#!/bin/sh\nARGS=\"$*\"\nsleep 1\ncat <<EOF\n{SNAPSHOT}\nEOF\n");
        let slow_body = format!("#!/bin/sh\necho $$ > '{}'\nexec sleep 30\n", slow_pid.display());
        let stalled_pid = dir.path().join("stalled.pid");
        let stalled_body = format!("#!/bin/sh\necho $$ > '{}'\nexec sleep 30\n", stalled_pid.display());

        let tools = Tools {
            ok: script(dir.path(), "vnstat-ok", &ok_body),
            failing: script(
                dir.path(),
                "vnstat-failing",
                "#!/bin/sh\necho 'Error: Unable to open database \"/var/lib/vnstat/vnstat.db\"' >&2\nexit 1\n",
            ),
            garbage: script(dir.path(), "vnstat-garbage", "#!/bin/sh\necho 'eth0: 12 GiB'\n"),
            no_interfaces: script(
                dir.path(),
                "vnstat-no-interfaces",
                "#!/bin/sh\necho '{\"vnstatversion\":\"2.10\",\"jsonversion\":\"2\"}'\n",
            ),
            slow: script(dir.path(), "vnstat-slow", &slow_body),
            slow_pid,
            stalled: script(dir.path(), "vnstat-stalled", &stalled_body),
            stalled_pid,
            busy: script(dir.path(), "vnstat-busy", &busy_body),
            missing: dir.path().join("vnstat-missing"),
            _dir: dir,
        };
        tools
    })
}

fn script(dir: &Path, name: &str, body: &str) -> PathBuf {
    let path = dir.join(name);
    fs::write(&path, body).unwrap();
    fs::set_permissions(&path, fs::Permissions::from_mode(0o755)).unwrap();
    path
}

pub fn config(tool: &Path) -> Config {
    Config {
        listen: "127.0.0.1:0".parse().unwrap(),
        api_key: ApiKey::new(API_KEY),
        tool_path: tool.to_path_buf(),
        tls: None,
        allowed_source_ips: HashSet::new(),
        request_timeout: Duration::from_secs(10),
        max_concurrent_tools: 4,
        cors_origins: CorsOrigins::Any,
    }
}

pub fn with_allowlist(mut config: Config, allowed: &[&str]) -> Config {
    config.allowed_source_ips = allowed.iter().map(|s| s.parse().unwrap()).collect();
    config
}

/// A GET as it would arrive from `source` over a real connection.
pub fn get(uri: &str, key: Option<&str>, source: &str) -> Request<Body> {
    let addr = SocketAddr::new(source.parse().unwrap(), 51234);
    let mut builder = Request::builder()
        .method("GET")
        .uri(uri)
        .extension(ConnectInfo(addr));
    if let Some(key) = key {
        builder = builder.header(header::AUTHORIZATION, format!("Bearer {key}"));
    }
    builder.body(Body::empty()).unwrap()
}

/// A browser CORS preflight for a GET on `uri`; carries no credential.
pub fn preflight(uri: &str, origin: &str) -> Request<Body> {
    Request::builder()
        .method("OPTIONS")
        .uri(uri)
        .header(header::ORIGIN, origin)
        .header(header::ACCESS_CONTROL_REQUEST_METHOD, "GET")
        .header(header::ACCESS_CONTROL_REQUEST_HEADERS, "authorization")
        .extension(ConnectInfo(SocketAddr::new("127.0.0.1".parse().unwrap(), 51234)))
        .body(Body::empty())
        .unwrap()
}

pub fn with_origin(mut request: Request<Body>, origin: &'static str) -> Request<Body> {
    request
        .headers_mut()
        .insert(header::ORIGIN, header::HeaderValue::from_static(origin));
    request
}

/// Wait for a fake tool to record its pid.
pub async fn wait_for_pid(pid_file: &Path) -> String {
    for _ in 0..100 {
        if let Ok(pid) = fs::read_to_string(pid_file) {
            let pid = pid.trim();
            if !pid.is_empty() {
                return pid.to_string();
            }
        }
        tokio::time::sleep(Duration::from_millis(50)).await;
    }
    panic!("{} never written", pid_file.display());
}

/// True once `pid` is gone or only a zombie awaiting the reaper.
pub fn process_stopped(pid: &str) -> bool {
    match fs::read_to_string(format!("/proc/{pid}/stat")) {
        Err(_) => true,
        Ok(stat) => stat
            .rsplit_once(')')
            .map(|(_, rest)| rest.trim_start().starts_with('Z'))
            .unwrap_or(false),
    }
}

pub fn authed(uri: &str) -> Request<Body> {
    get(uri, Some(API_KEY), "127.0.0.1")
}

pub async fn body_json(response: axum::response::Response) -> Value {
    let bytes = axum::body::to_bytes(response.into_body(), usize::MAX)
        .await
        .unwrap();
    serde_json::from_slice(&bytes).unwrap()
}
