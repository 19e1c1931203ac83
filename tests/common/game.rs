//! Fake game server.
//!
//! The "game" is `/bin/sh` running a script from a scratch install directory.
//! It prints the readiness marker, then polls its working directory:
//! - `emit`: printed to stdout, then removed
//! - `crash`: removed, then the script exits with status 1
//! - `stop`: the script prints a farewell and exits cleanly

use galaxyd::Config;
use std::path::{Path, PathBuf};
use std::sync::Arc;
use tempfile::TempDir;

/// Script that behaves like a healthy server.
pub const HEALTHY: &str = r#"
rm -f ./stop ./crash
echo "Loading galaxy"
echo "Server startup complete."
while [ ! -f ./stop ]; do
  if [ -f ./emit ]; then cat ./emit; rm -f ./emit; fi
  if [ -f ./crash ]; then rm -f ./crash; exit 1; fi
  sleep 0.05
done
echo "Server shutdown complete."
"#;

/// Script that comes up but never honours the stop file.
#[allow(dead_code)]
pub const STUBBORN: &str = r#"
echo launch >> ./launches
echo "Server startup complete."
while true; do sleep 0.05; done
"#;

/// [`HEALTHY`] on the first launch; every later launch fails immediately.
#[allow(dead_code)]
pub fn fails_after_first_launch() -> String {
    format!(
        "echo launch >> ./launches\nif [ $(wc -l < ./launches) -gt 1 ]; then echo \"Galaxy is corrupt\"; exit 1; fi\n{HEALTHY}"
    )
}

/// Timeouts used unless a test overrides them.
pub const SHORT_TIMEOUTS: &str = "readiness = 5\nstop = 5\nhook_grace = 5\ncommand = 5";

pub struct FakeGame {
    dir: TempDir,
}

impl FakeGame {
    /// A game running [`HEALTHY`].
    pub fn healthy() -> Self {
        Self::with_script(HEALTHY)
    }

    pub fn with_script(body: &str) -> Self {
        let dir = TempDir::new().expect("create scratch dir");
        std::fs::write(dir.path().join("game.sh"), body).expect("write game script");
        std::fs::create_dir_all(dir.path().join("galaxies")).expect("create data dir");
        Self { dir }
    }

    pub fn path(&self) -> &Path {
        self.dir.path()
    }

    /// Configuration launching this game, with `extra` appended verbatim.
    ///
    /// Timeouts are short so failures surface quickly.
    pub fn config(&self, extra: &str) -> Arc<Config> {
        self.config_with_timeouts(SHORT_TIMEOUTS, extra)
    }

    /// Like [`FakeGame::config`] with the `[timeouts]` body replaced.
    pub fn config_with_timeouts(&self, timeouts: &str, extra: &str) -> Arc<Config> {
        let dir = self.path().display();
        let toml = format!(
            r#"
[game]
install_path = "{dir}"
executable = "/bin/sh"
galaxy = "testgalaxy"
data_path = "{dir}/galaxies"
extra_args = ["{dir}/game.sh"]

[rcon]
password = "integration"

[timeouts]
{timeouts}

{extra}
"#
        );
        Arc::new(Config::parse(&toml).expect("valid test config"))
    }

    /// Make the game print `lines` on its stdout.
    pub fn emit(&self, lines: &[&str]) {
        let staging = self.path().join("emit.tmp");
        let mut body = lines.join("\n");
        body.push('\n');
        std::fs::write(&staging, body).expect("write emit file");
        std::fs::rename(&staging, self.path().join("emit")).expect("publish emit file");
    }

    /// Make the game exit with a failure status.
    pub fn crash(&self) {
        std::fs::write(self.path().join("crash"), "").expect("write crash file");
    }

    /// How many times a script that logs its launches has been started.
    #[allow(dead_code)]
    pub fn launches(&self) -> usize {
        std::fs::read_to_string(self.path().join("launches"))
            .map(|text| text.lines().count())
            .unwrap_or(0)
    }

    /// The file whose presence makes the game exit cleanly.
    pub fn stop_file(&self) -> PathBuf {
        self.path().join("stop")
    }

    /// Write an executable hook script and return its path.
    #[cfg(unix)]
    #[allow(dead_code)]
    pub fn hook(&self, name: &str, body: &str) -> PathBuf {
        use std::os::unix::fs::PermissionsExt;
        let path = self.path().join(name);
        std::fs::write(&path, format!("#!/bin/sh\n{body}\n")).expect("write hook");
        std::fs::set_permissions(&path, std::fs::Permissions::from_mode(0o755))
            .expect("chmod hook");
        path
    }
}
