//! The only place the gateway starts a process.
//!
//! Callers pick a [`ToolQuery`]; each variant maps to a fixed argument list,
//! so nothing a client sends ever reaches the command line.

use std::io;
use std::path::PathBuf;
use std::process::{ExitStatus, Stdio};
use std::str::FromStr;
use std::sync::Arc;
use std::sync::atomic::{AtomicU64, Ordering};
use std::time::{Duration, Instant};

use serde::Serialize;
use tokio::io::AsyncReadExt;
use tokio::process::{Child, ChildStderr, ChildStdout, Command};
use tokio::sync::Semaphore;
use tokio::time::timeout;

use crate::config::Config;
use crate::error::GatewayError;

/// Appended to every data query.
pub const JSON_FLAG: &str = "--json";

/// Seconds `vnstat -tr` samples for; must stay well under the request timeout.
pub const LIVE_SAMPLE_SECS: &str = "2";

#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize)]
#[serde(rename_all = "lowercase")]
pub enum Period {
    Hour,
    #[default]
    Day,
    Month,
}

impl Period {
    fn flag(self) -> &'static str {
        match self {
            Period::Hour => "-h",
            Period::Day => "-d",
            Period::Month => "-m",
        }
    }
}

impl FromStr for Period {
    type Err = GatewayError;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s {
            "h" | "hour" => Ok(Period::Hour),
            "d" | "day" => Ok(Period::Day),
            "m" | "month" => Ok(Period::Month),
            other => Err(GatewayError::InvalidParameter(format!(
                "period must be one of h, d, m (hour, day, month), got {other:?}"
            ))),
        }
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ToolQuery {
    Snapshot,
    LiveSample,
    History(Period),
    Version,
}

impl ToolQuery {
    pub fn args(self) -> Vec<&'static str> {
        match self {
            ToolQuery::Snapshot => vec![JSON_FLAG],
            ToolQuery::LiveSample => vec!["-tr", LIVE_SAMPLE_SECS, JSON_FLAG],
            ToolQuery::History(period) => vec![period.flag(), JSON_FLAG],
            ToolQuery::Version => vec!["--version"],
        }
    }
}

/// Captured result of a successful (exit 0) invocation.
#[derive(Debug)]
pub struct ToolOutput {
    pub stdout: Vec<u8>,
}

pub struct CommandExecutor {
    tool_path: PathBuf,
    timeout: Duration,
    slots: usize,
    permits: Arc<Semaphore>,
    spawned: AtomicU64,
}

impl CommandExecutor {
    pub fn new(config: &Config) -> Self {
        Self {
            tool_path: config.tool_path.clone(),
            timeout: config.request_timeout,
            slots: config.max_concurrent_tools,
            permits: Arc::new(Semaphore::new(config.max_concurrent_tools)),
            spawned: AtomicU64::new(0),
        }
    }

    /// Number of processes this executor has tried to start.
    pub fn spawn_count(&self) -> u64 {
        self.spawned.load(Ordering::Relaxed)
    }

    pub async fn run(&self, query: ToolQuery) -> Result<ToolOutput, GatewayError> {
        let _permit = self.permits.clone().try_acquire_owned().map_err(|_| {
            log::warn!("all {} tool slots busy, rejecting {query:?}", self.slots);
            GatewayError::ServiceBusy
        })?;

        let args = query.args();
        let mut command = Command::new(&self.tool_path);
        command
            .args(&args)
            .stdin(Stdio::null())
            .stdout(Stdio::piped())
            .stderr(Stdio::piped())
            .kill_on_drop(true);

        self.spawned.fetch_add(1, Ordering::Relaxed);
        let started = Instant::now();
        let mut child = command.spawn().map_err(|e| {
            log::error!("failed to launch {}: {e}", self.tool_path.display());
            GatewayError::ToolUnavailable {
                reason: e.to_string(),
            }
        })?;

        let stdout = child.stdout.take();
        let stderr = child.stderr.take();
        let outcome = {
            let collect = collect(&mut child, stdout, stderr);
            timeout(self.timeout, collect).await
        };

        let (status, stdout, stderr) = match outcome {
            Ok(Ok(captured)) => captured,
            Ok(Err(e)) => {
                log::error!("i/o error talking to {}: {e}", self.tool_path.display());
                let _ = child.kill().await;
                return Err(GatewayError::internal(e.to_string()));
            }
            Err(_) => {
                if let Err(e) = child.kill().await {
                    log::error!("failed to kill timed out vnstat: {e}");
                }
                log::warn!("vnstat {args:?} exceeded {}s and was killed", self.timeout.as_secs());
                return Err(GatewayError::ToolTimeout {
                    timeout_secs: self.timeout.as_secs(),
                });
            }
        };

        let elapsed = started.elapsed();
        if !status.success() {
            let stderr = String::from_utf8_lossy(&stderr).trim().to_string();
            log::error!("vnstat {args:?} failed with {status}: {stderr}");
            return Err(GatewayError::ToolExecutionFailed {
                status: status.to_string(),
                stderr,
            });
        }

        if !stderr.is_empty() {
            log::debug!("vnstat {args:?} stderr: {}", String::from_utf8_lossy(&stderr).trim());
        }
        log::debug!("vnstat {args:?} finished in {elapsed:?} ({} bytes)", stdout.len());
        Ok(ToolOutput { stdout })
    }
}

async fn collect(
    child: &mut Child,
    stdout: Option<ChildStdout>,
    stderr: Option<ChildStderr>,
) -> io::Result<(ExitStatus, Vec<u8>, Vec<u8>)> {
    let read_stdout = async {
        let mut buf = Vec::new();
        if let Some(mut out) = stdout {
            out.read_to_end(&mut buf).await?;
        }
        Ok::<_, io::Error>(buf)
    };
    let read_stderr = async {
        let mut buf = Vec::new();
        if let Some(mut err) = stderr {
            err.read_to_end(&mut buf).await?;
        }
        Ok::<_, io::Error>(buf)
    };

    let (out, err, status) = tokio::try_join!(read_stdout, read_stderr, child.wait())?;
    Ok((status, out, err))
}
