//! Operator hook scripts.
//!
//! `pre_start` and `post_down` run to completion within the hook grace
//! period. `post_up` runs detached for the lifetime of a run with its output
//! merged into the game's feed; on teardown its process group gets SIGTERM,
//! then SIGKILL once the grace period is over.

use super::process::pump;
use super::signal::{self, Signal};
use crate::config::Config;
use crate::error::LifecycleError;
use std::path::Path;
use std::process::Stdio;
use tokio::process::Command;
use tokio::sync::mpsc;
use tokio_util::sync::CancellationToken;
use tokio_util::task::TaskTracker;
use tracing::{Instrument, error, info, warn};

/// Hook points.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Hook {
    PreStart,
    PostUp,
    PostDown,
}

impl Hook {
    pub fn as_str(self) -> &'static str {
        match self {
            Self::PreStart => "pre_start",
            Self::PostUp => "post_up",
            Self::PostDown => "post_down",
        }
    }

    pub fn path(self, config: &Config) -> Option<&Path> {
        match self {
            Self::PreStart => config.hooks.pre_start.as_deref(),
            Self::PostUp => config.hooks.post_up.as_deref(),
            Self::PostDown => config.hooks.post_down.as_deref(),
        }
    }
}

/// Environment exposed to every hook.
pub fn environment(config: &Config) -> Vec<(&'static str, String)> {
    vec![
        ("SAVEPATH", config.game.galaxy_path().display().to_string()),
        ("DATAPATH", config.game.data_path.display().to_string()),
        ("RCONADDR", config.rcon.address.clone()),
        ("RCONPORT", config.rcon.port.to_string()),
        ("RCONPASS", config.rcon.password.clone()),
    ]
}

fn command(path: &Path, config: &Config) -> Command {
    let mut command = Command::new(path);
    command
        .envs(environment(config))
        .stdin(Stdio::null())
        .stdout(Stdio::piped())
        .stderr(Stdio::piped())
        .kill_on_drop(true);
    signal::isolate(&mut command);
    command
}

/// Run a hook to completion, bounded by the hook grace period.
///
/// Returns `Ok(())` when no script is configured for `hook`.
pub async fn run_to_completion(hook: Hook, config: &Config) -> Result<(), LifecycleError> {
    let Some(path) = hook.path(config) else {
        return Ok(());
    };
    let grace = config.timeouts.hook_grace();
    let failed = |reason: String| LifecycleError::Hook {
        hook: hook.as_str().to_string(),
        reason,
    };

    async {
        info!(path = %path.display(), "Running hook");
        let child = command(path, config)
            .spawn()
            .map_err(|e| failed(e.to_string()))?;
        let pid = child.id();

        let output = match tokio::time::timeout(grace, child.wait_with_output()).await {
            Ok(output) => output.map_err(|e| failed(e.to_string()))?,
            Err(_) => {
                // Dropping the wait killed the script itself; finish off its group
                if let Some(pid) = pid {
                    signal::signal_group(pid, Signal::Kill);
                }
                return Err(failed(format!(
                    "did not finish within {} seconds",
                    grace.as_secs()
                )));
            }
        };

        for line in String::from_utf8_lossy(&output.stdout)
            .lines()
            .chain(String::from_utf8_lossy(&output.stderr).lines())
            .filter(|l| !l.trim().is_empty())
        {
            info!(target: "hook", "{line}");
        }

        if output.status.success() {
            info!("Hook finished");
            Ok(())
        } else {
            Err(failed(format!("exited with {}", output.status)))
        }
    }
    .instrument(crate::telemetry::spans::hook(hook.as_str()))
    .await
}

/// Start a hook for the lifetime of a run.
///
/// Launch failures are logged; they never fail the run.
pub fn spawn_detached(
    hook: Hook,
    config: &Config,
    feed: mpsc::Sender<String>,
    cancel: CancellationToken,
    tracker: &TaskTracker,
) {
    let Some(path) = hook.path(config) else {
        return;
    };
    let span = crate::telemetry::spans::hook(hook.as_str());
    let grace = config.timeouts.hook_grace();

    let mut child = match command(path, config).spawn() {
        Ok(child) => child,
        Err(e) => {
            span.in_scope(|| error!(path = %path.display(), error = %e, "Failed to start hook"));
            return;
        }
    };
    span.in_scope(|| info!(path = %path.display(), pid = ?child.id(), "Hook started"));

    if let Some(stdout) = child.stdout.take() {
        tracker.spawn(pump(stdout, feed.clone(), cancel.clone()));
    }
    if let Some(stderr) = child.stderr.take() {
        tracker.spawn(pump(stderr, feed, cancel.clone()));
    }

    tracker.spawn(
        async move {
            let pid = child.id();
            tokio::select! {
                status = child.wait() => {
                    match status {
                        Ok(status) => info!(%status, "Hook exited"),
                        Err(e) => warn!(error = %e, "Failed to wait for hook"),
                    }
                    return;
                }
                _ = cancel.cancelled() => {}
            }

            info!("Waiting for hook to stop");
            if let Some(pid) = pid {
                signal::signal_group(pid, Signal::Terminate);
            }
            if tokio::time::timeout(grace, child.wait()).await.is_ok() {
                info!("Hook stopped");
                return;
            }

            error!("Hook ignored SIGTERM, killing it");
            if let Some(pid) = pid {
                signal::signal_group(pid, Signal::Kill);
            }
            let _ = child.kill().await;
        }
        .instrument(span),
    );
}

#[cfg(all(test, unix))]
mod tests {
    use super::*;
    use std::os::unix::fs::PermissionsExt;
    use std::time::Duration;
    use tempfile::TempDir;

    fn config_with(dir: &TempDir, hooks: &str, grace: u64) -> Config {
        Config::parse(&format!(
            r#"
            [game]
            install_path = "{dir}"
            galaxy = "alpha"
            data_path = "{dir}/data"

            [rcon]
            password = "pw"

            [timeouts]
            hook_grace = {grace}

            [hooks]
            {hooks}
            "#,
            dir = dir.path().display(),
        ))
        .unwrap()
    }

    fn script(dir: &TempDir, name: &str, body: &str) -> std::path::PathBuf {
        let path = dir.path().join(name);
        std::fs::write(&path, format!("#!/bin/sh\n{body}\n")).unwrap();
        std::fs::set_permissions(&path, std::fs::Permissions::from_mode(0o755)).unwrap();
        path
    }

    #[tokio::test]
    async fn unconfigured_hook_is_a_noop() {
        let dir = TempDir::new().unwrap();
        let config = config_with(&dir, "", 5);
        run_to_completion(Hook::PreStart, &config).await.unwrap();
    }

    #[tokio::test]
    async fn hook_sees_environment_and_failure_is_reported() {
        let dir = TempDir::new().unwrap();
        let marker = dir.path().join("env.out");
        let path = script(
            &dir,
            "down.sh",
            &format!("echo \"$SAVEPATH $RCONPORT\" > {}\nexit 3", marker.display()),
        );
        let config = config_with(&dir, &format!("post_down = \"{}\"", path.display()), 5);

        // Freshly written scripts can briefly be busy; retry the spawn
        let mut result = run_to_completion(Hook::PostDown, &config).await;
        for _ in 0..5 {
            match &result {
                Err(LifecycleError::Hook { reason, .. }) if reason.contains("busy") => {
                    tokio::time::sleep(Duration::from_millis(50)).await;
                    result = run_to_completion(Hook::PostDown, &config).await;
                }
                _ => break,
            }
        }

        assert!(matches!(result, Err(LifecycleError::Hook { ref hook, .. }) if hook == "post_down"));
        let written = std::fs::read_to_string(&marker).unwrap();
        assert_eq!(
            written.trim(),
            format!("{} 27015", dir.path().join("data").join("alpha").display())
        );
    }

    #[test]
    fn environment_names() {
        let dir = TempDir::new().unwrap();
        let config = config_with(&dir, "", 5);
        let names: Vec<_> = environment(&config).into_iter().map(|(k, _)| k).collect();
        assert_eq!(names, ["SAVEPATH", "DATAPATH", "RCONADDR", "RCONPORT", "RCONPASS"]);
    }
}
