//! Optional supervision of a local Baileys sidecar process.

use std::{
    path::{Path, PathBuf},
    process::Stdio,
    time::Duration,
};

use {
    tokio::{
        io::{AsyncBufReadExt, BufReader},
        process::{Child, Command},
    },
    tracing::{debug, error, info, warn},
};

use crate::{Error, Result};

/// Environment variable naming the sidecar checkout.
pub const SIDECAR_DIR_ENV: &str = "WARELAY_SIDECAR_DIR";

const SIDECAR_REL_PATH: &str = "sidecar/baileys";
const STARTUP_GRACE: Duration = Duration::from_millis(500);
const STOP_TIMEOUT: Duration = Duration::from_secs(5);

/// Handle to a running sidecar.
pub struct SidecarProcess {
    child: Child,
    port: u16,
}

impl SidecarProcess {
    pub fn port(&self) -> u16 {
        self.port
    }

    pub fn is_running(&mut self) -> bool {
        matches!(self.child.try_wait(), Ok(None))
    }

    /// SIGTERM, then kill if it has not exited within a few seconds.
    pub async fn stop(&mut self) -> Result<()> {
        info!("stopping baileys sidecar");

        #[cfg(unix)]
        {
            use nix::{
                sys::signal::{Signal, kill},
                unistd::Pid,
            };

            if let Some(pid) = self.child.id()
                && let Ok(pid) = i32::try_from(pid)
            {
                let _ = kill(Pid::from_raw(pid), Signal::SIGTERM);
            }
        }

        #[cfg(not(unix))]
        {
            let _ = self.child.kill().await;
        }

        match tokio::time::timeout(STOP_TIMEOUT, self.child.wait()).await {
            Ok(Ok(status)) => info!(?status, "baileys sidecar exited"),
            Ok(Err(e)) => warn!(error = %e, "error waiting for sidecar"),
            Err(_) => {
                warn!("sidecar did not exit gracefully, killing");
                self.child.kill().await?;
            },
        }
        Ok(())
    }
}

/// How to launch the sidecar.
#[derive(Debug, Clone)]
pub struct SidecarLaunch {
    /// Checkout containing `package.json`.
    pub dir: PathBuf,
    pub port: u16,
}

/// Locate the sidecar checkout: explicit path, then `WARELAY_SIDECAR_DIR`,
/// then next to the executable, then relative to the working directory.
pub fn find_sidecar_dir(explicit: Option<&Path>) -> Result<PathBuf> {
    find_sidecar_dir_with(explicit, std::env::var(SIDECAR_DIR_ENV).ok())
}

fn find_sidecar_dir_with(explicit: Option<&Path>, env_dir: Option<String>) -> Result<PathBuf> {
    let is_checkout = |p: &Path| p.join("package.json").is_file();

    if let Some(path) = explicit {
        if is_checkout(path) {
            return Ok(path.to_path_buf());
        }
        return Err(Error::sidecar(format!(
            "{} has no package.json",
            path.display()
        )));
    }

    if let Some(dir) = env_dir {
        let path = PathBuf::from(&dir);
        if is_checkout(&path) {
            return Ok(path);
        }
        warn!(path = %dir, "{SIDECAR_DIR_ENV} set but package.json not found");
    }

    if let Ok(exe) = std::env::current_exe()
        && let Some(exe_dir) = exe.parent()
    {
        for up in ["..", "../.."] {
            let candidate = exe_dir.join(up).join(SIDECAR_REL_PATH);
            if is_checkout(&candidate) {
                return Ok(candidate);
            }
        }
    }

    for prefix in [".", "..", "../.."] {
        let candidate = Path::new(prefix).join(SIDECAR_REL_PATH);
        if is_checkout(&candidate) {
            return Ok(candidate.canonicalize().unwrap_or(candidate));
        }
    }

    Err(Error::sidecar(format!(
        "baileys sidecar not found; set {SIDECAR_DIR_ENV} or sidecar.dir"
    )))
}

/// Build the sidecar if needed, start it and forward its logs to tracing.
pub async fn start_sidecar(launch: SidecarLaunch) -> Result<SidecarProcess> {
    let dir = &launch.dir;

    if !dir.join("dist/index.js").exists() {
        info!(path = %dir.display(), "building baileys sidecar");
        if !dir.join("node_modules").exists() {
            run_npm(dir, &["install"]).await?;
        }
        run_npm(dir, &["run", "build"]).await?;
    }

    info!(path = %dir.display(), port = launch.port, "starting baileys sidecar");
    let mut child = Command::new("node")
        .arg("dist/index.js")
        .current_dir(dir)
        .env("WARELAY_SIDECAR_PORT", launch.port.to_string())
        .stdout(Stdio::piped())
        .stderr(Stdio::piped())
        .kill_on_drop(true)
        .spawn()
        .map_err(|e| Error::sidecar(format!("failed to spawn node: {e}")))?;

    if let Some(stdout) = child.stdout.take() {
        tokio::spawn(async move {
            let mut lines = BufReader::new(stdout).lines();
            while let Ok(Some(line)) = lines.next_line().await {
                forward_log_line(&line);
            }
        });
    }
    if let Some(stderr) = child.stderr.take() {
        tokio::spawn(async move {
            let mut lines = BufReader::new(stderr).lines();
            while let Ok(Some(line)) = lines.next_line().await {
                warn!(target: "whatsapp_sidecar", "{line}");
            }
        });
    }

    tokio::time::sleep(STARTUP_GRACE).await;
    if let Some(status) = child.try_wait()? {
        return Err(Error::sidecar(format!(
            "sidecar exited immediately with {status}"
        )));
    }

    info!(port = launch.port, "baileys sidecar started");
    Ok(SidecarProcess {
        child,
        port: launch.port,
    })
}

async fn run_npm(dir: &Path, args: &[&str]) -> Result<()> {
    debug!(path = %dir.display(), ?args, "running npm");
    let output = Command::new("npm")
        .args(args)
        .current_dir(dir)
        .output()
        .await
        .map_err(|e| Error::sidecar(format!("failed to run npm: {e}")))?;
    if !output.status.success() {
        return Err(Error::sidecar(format!(
            "npm {} failed: {}",
            args.join(" "),
            String::from_utf8_lossy(&output.stderr)
        )));
    }
    Ok(())
}

/// Pino log levels, as numbers.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
enum SidecarLevel {
    Debug,
    Info,
    Warn,
    Error,
}

/// Split a pino JSON line into level and message; plain lines are info.
fn parse_log_line(line: &str) -> (SidecarLevel, String) {
    if line.starts_with('{')
        && let Ok(log) = serde_json::from_str::<serde_json::Value>(line)
    {
        let level = match log.get("level").and_then(serde_json::Value::as_u64) {
            Some(10 | 20) => SidecarLevel::Debug,
            Some(30) | None => SidecarLevel::Info,
            Some(40) => SidecarLevel::Warn,
            Some(_) => SidecarLevel::Error,
        };
        let msg = log
            .get("msg")
            .and_then(serde_json::Value::as_str)
            .unwrap_or(line)
            .to_string();
        return (level, msg);
    }
    (SidecarLevel::Info, line.to_string())
}

fn forward_log_line(line: &str) {
    let (level, msg) = parse_log_line(line);
    match level {
        SidecarLevel::Debug => debug!(target: "whatsapp_sidecar", "{msg}"),
        SidecarLevel::Info => info!(target: "whatsapp_sidecar", "{msg}"),
        SidecarLevel::Warn => warn!(target: "whatsapp_sidecar", "{msg}"),
        SidecarLevel::Error => error!(target: "whatsapp_sidecar", "{msg}"),
    }
}

#[cfg(test)]
mod tests {
    use {super::*, rstest::rstest};

    #[rstest]
    #[case(r#"{"level":20,"msg":"frame"}"#, SidecarLevel::Debug, "frame")]
    #[case(r#"{"level":30,"msg":"connected"}"#, SidecarLevel::Info, "connected")]
    #[case(r#"{"level":40,"msg":"slow"}"#, SidecarLevel::Warn, "slow")]
    #[case(r#"{"level":50,"msg":"boom"}"#, SidecarLevel::Error, "boom")]
    #[case("plain text", SidecarLevel::Info, "plain text")]
    fn pino_lines(#[case] line: &str, #[case] level: SidecarLevel, #[case] msg: &str) {
        assert_eq!(parse_log_line(line), (level, msg.to_string()));
    }

    #[test]
    fn explicit_dir_must_be_a_checkout() {
        let dir = tempfile::tempdir().unwrap();
        assert!(find_sidecar_dir_with(Some(dir.path()), None).is_err());

        std::fs::write(dir.path().join("package.json"), "{}").unwrap();
        assert_eq!(
            find_sidecar_dir_with(Some(dir.path()), None).unwrap(),
            dir.path()
        );
    }

    #[test]
    fn env_dir_is_used() {
        let dir = tempfile::tempdir().unwrap();
        std::fs::write(dir.path().join("package.json"), "{}").unwrap();
        let found =
            find_sidecar_dir_with(None, Some(dir.path().display().to_string())).unwrap();
        assert_eq!(found, dir.path());
    }
}
