//! One run of the game process and the tasks bound to it.
//!
//! ```text
//!   stdout ──pump──┐
//!   stderr ──pump──┼──► feed (mpsc) ──► scanner ──► Registry::dispatch
//!   hooks  ──pump──┘                       │
//!                                          └──► readiness (watch)
//!   child  ──reaper──► exited (watch), crash report
//! ```
//!
//! Every task lives on the run's own [`TaskTracker`] and observes the run's
//! [`CancellationToken`], a child of the supervisor's shutdown token.

use super::signal;
use crate::bus::{BusMessage, ChatData};
use crate::config::Config;
use crate::error::LifecycleError;
use crate::events::{EventContext, Registry};
use futures_util::StreamExt;
use std::process::Stdio;
use std::sync::Arc;
use std::sync::atomic::{AtomicBool, Ordering};
use std::time::Duration;
use tokio::io::AsyncRead;
use tokio::process::{Child, Command};
use tokio::sync::{mpsc, watch};
use tokio_util::bytes::BytesMut;
use tokio_util::codec::{AnyDelimiterCodec, AnyDelimiterCodecError, Decoder, FramedRead};
use tokio_util::sync::CancellationToken;
use tokio_util::task::TaskTracker;
use tracing::{Instrument, debug, error, info, warn};

/// Lines buffered between the pumps and the scanner.
pub const FEED_CAPACITY: usize = 1024;

/// Longest line a pump will buffer. Anything longer is skipped up to the
/// next newline.
pub const MAX_LINE_LENGTH: usize = 64 * 1024;

/// Grace period for a killed process to be reaped.
const KILL_REAP_WAIT: Duration = Duration::from_secs(10);

/// Startup progress as seen by the scanner.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Readiness {
    Pending,
    Ready,
    Failed,
}

/// Why a run should be considered crashed.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct CrashReport {
    pub run_id: String,
    pub reason: String,
}

/// How a pump stopped.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum PumpEnd {
    Eof,
    Cancelled,
    FeedClosed,
}

#[derive(Debug, PartialEq, Eq)]
enum Frame {
    Line(String),
    Oversized,
}

/// Newline framing with a length cap that survives oversized lines.
///
/// `FramedRead` ends the stream on the first decode error, so the cap is
/// reported as a frame instead. The inner codec discards the rest of the
/// oversized line on its own.
struct LineCodec {
    inner: AnyDelimiterCodec,
}

impl LineCodec {
    fn new(max_length: usize) -> Self {
        Self {
            inner: AnyDelimiterCodec::new_with_max_length(
                b"\n".to_vec(),
                b"\n".to_vec(),
                max_length,
            ),
        }
    }

    fn frame(
        decoded: Result<Option<tokio_util::bytes::Bytes>, AnyDelimiterCodecError>,
    ) -> Result<Option<Frame>, AnyDelimiterCodecError> {
        match decoded {
            Ok(Some(chunk)) => Ok(Some(Frame::Line(
                String::from_utf8_lossy(&chunk)
                    .trim_end_matches('\r')
                    .to_string(),
            ))),
            Ok(None) => Ok(None),
            Err(AnyDelimiterCodecError::MaxChunkLengthExceeded) => Ok(Some(Frame::Oversized)),
            Err(e) => Err(e),
        }
    }
}

impl Decoder for LineCodec {
    type Item = Frame;
    type Error = AnyDelimiterCodecError;

    fn decode(&mut self, src: &mut BytesMut) -> Result<Option<Frame>, Self::Error> {
        Self::frame(self.inner.decode(src))
    }

    fn decode_eof(&mut self, src: &mut BytesMut) -> Result<Option<Frame>, Self::Error> {
        Self::frame(self.inner.decode_eof(src))
    }
}

/// Forward `reader` into `feed` one line at a time, in order.
///
/// Bytes that are not UTF-8 are replaced rather than ending the stream.
/// Lines longer than [`MAX_LINE_LENGTH`] are dropped with a warning.
pub async fn pump<R>(reader: R, feed: mpsc::Sender<String>, cancel: CancellationToken) -> PumpEnd
where
    R: AsyncRead + Unpin,
{
    pump_with_limit(reader, feed, cancel, MAX_LINE_LENGTH).await
}

async fn pump_with_limit<R>(
    reader: R,
    feed: mpsc::Sender<String>,
    cancel: CancellationToken,
    max_length: usize,
) -> PumpEnd
where
    R: AsyncRead + Unpin,
{
    let mut lines = FramedRead::new(reader, LineCodec::new(max_length));
    loop {
        let next = tokio::select! {
            _ = cancel.cancelled() => return PumpEnd::Cancelled,
            next = lines.next() => next,
        };
        let line = match next {
            Some(Ok(Frame::Line(line))) => line,
            Some(Ok(Frame::Oversized)) => {
                warn!(max_length, "Output line exceeds the length limit, skipped");
                continue;
            }
            Some(Err(e)) => {
                warn!(error = %e, "Output stream read failed");
                return PumpEnd::Eof;
            }
            None => return PumpEnd::Eof,
        };
        tokio::select! {
            _ = cancel.cancelled() => return PumpEnd::Cancelled,
            sent = feed.send(line) => if sent.is_err() {
                return PumpEnd::FeedClosed;
            },
        }
    }
}

/// The game's command line, working directory and environment.
pub fn game_command(config: &Config) -> Command {
    let game = &config.game;
    let mut command = Command::new(game.executable_path());
    command
        .args(&game.extra_args)
        .arg("--galaxy-name")
        .arg(&game.galaxy)
        .arg("--datapath")
        .arg(&game.data_path)
        .arg("--rcon-ip")
        .arg(&config.rcon.address)
        .arg("--rcon-password")
        .arg(&config.rcon.password)
        .arg("--rcon-port")
        .arg(config.rcon.port.to_string())
        .current_dir(&game.install_path)
        .env("LD_LIBRARY_PATH", game.library_path())
        .stdin(Stdio::null())
        .stdout(Stdio::piped())
        .stderr(Stdio::piped())
        .kill_on_drop(true);
    signal::isolate(&mut command);
    command
}

/// A live run of the game process.
pub struct Run {
    id: String,
    pid: Option<u32>,
    cancel: CancellationToken,
    tracker: TaskTracker,
    feed: mpsc::Sender<String>,
    ready: watch::Receiver<Readiness>,
    exited: watch::Receiver<bool>,
    stopping: Arc<AtomicBool>,
    kill: CancellationToken,
}

/// What the run's tasks need from the supervisor.
pub struct RunDeps {
    pub registry: Arc<Registry>,
    pub events: EventContext,
    pub crashes: mpsc::Sender<CrashReport>,
    pub shutdown: CancellationToken,
}

impl Run {
    /// Spawn the game and the pumps, scanner and reaper bound to it.
    pub fn spawn(config: &Config, deps: RunDeps) -> Result<Self, LifecycleError> {
        let id = uuid::Uuid::new_v4().to_string();
        let span = crate::telemetry::spans::run(&id, &config.game.galaxy);

        let mut child = game_command(config).spawn().map_err(LifecycleError::Spawn)?;
        let pid = child.id();
        span.in_scope(|| info!(pid = ?pid, "Game process spawned"));

        let cancel = deps.shutdown.child_token();
        let tracker = TaskTracker::new();
        let (feed, feed_rx) = mpsc::channel(FEED_CAPACITY);
        let (ready_tx, ready) = watch::channel(Readiness::Pending);
        let (exited_tx, exited) = watch::channel(false);
        let stopping = Arc::new(AtomicBool::new(false));
        let kill = CancellationToken::new();

        if let Some(stderr) = child.stderr.take() {
            tracker.spawn(
                pump(stderr, feed.clone(), cancel.clone()).instrument(span.clone()),
            );
        }

        if let Some(stdout) = child.stdout.take() {
            let feed = feed.clone();
            let cancel = cancel.clone();
            let stopping = Arc::clone(&stopping);
            let crashes = deps.crashes.clone();
            let run_id = id.clone();
            tracker.spawn(
                async move {
                    let end = pump(stdout, feed, cancel).await;
                    debug!(?end, "Stdout pump finished");
                    if end == PumpEnd::Eof && !stopping.load(Ordering::Acquire) {
                        report(&crashes, run_id, "the game's output stream closed unexpectedly");
                    }
                }
                .instrument(span.clone()),
            );
        }

        tracker.spawn(
            scan(
                feed_rx,
                deps.registry,
                deps.events.clone(),
                ready_tx,
                config.game.readiness_marker.clone(),
                config.game.failure_marker.clone(),
                cancel.clone(),
            )
            .instrument(span.clone()),
        );

        tracker.spawn(
            reap(
                child,
                ReapDeps {
                    run_id: id.clone(),
                    exited: exited_tx,
                    stopping: Arc::clone(&stopping),
                    kill: kill.clone(),
                    cancel: cancel.clone(),
                    crashes: deps.crashes,
                    events: deps.events,
                },
            )
            .instrument(span),
        );

        Ok(Self {
            id,
            pid,
            cancel,
            tracker,
            feed,
            ready,
            exited,
            stopping,
            kill,
        })
    }

    pub fn id(&self) -> &str {
        &self.id
    }

    pub fn pid(&self) -> Option<u32> {
        self.pid
    }

    pub fn cancel_token(&self) -> &CancellationToken {
        &self.cancel
    }

    pub fn tracker(&self) -> &TaskTracker {
        &self.tracker
    }

    /// Sender merging extra output (hook scripts) into the scanner's feed.
    pub fn feed(&self) -> mpsc::Sender<String> {
        self.feed.clone()
    }

    /// Wait until the scanner saw a readiness or failure marker.
    pub async fn wait_ready(&mut self) -> Readiness {
        match self.ready.wait_for(|r| *r != Readiness::Pending).await {
            Ok(r) => *r,
            // Scanner gone: the run is being torn down
            Err(_) => Readiness::Failed,
        }
    }

    pub fn has_exited(&self) -> bool {
        *self.exited.borrow()
    }

    /// A receiver flipping to `true` once the process has been reaped.
    pub fn exited_watch(&self) -> watch::Receiver<bool> {
        self.exited.clone()
    }

    /// A token that kills the process when cancelled, usable from other tasks.
    pub fn killer(&self) -> CancellationToken {
        self.kill.clone()
    }

    /// Wait for process exit. Returns false if `timeout` elapsed first.
    pub async fn wait_exit(&mut self, timeout: Duration) -> bool {
        let exited = self.exited.wait_for(|e| *e);
        matches!(tokio::time::timeout(timeout, exited).await, Ok(Ok(_)))
    }

    /// Mark the coming exit as requested so it is not reported as a crash.
    pub fn mark_stopping(&self) {
        self.stopping.store(true, Ordering::Release);
    }

    /// Ask the reaper to kill the process.
    pub fn kill(&self) {
        self.mark_stopping();
        self.kill.cancel();
    }

    /// Kill if still alive, stop every task of the run and wait for them.
    pub async fn teardown(mut self) {
        if !self.has_exited() {
            self.kill();
            if !self.wait_exit(KILL_REAP_WAIT).await {
                error!(run_id = %self.id, "Game process did not exit after kill");
            }
        }
        self.mark_stopping();
        self.cancel.cancel();
        self.tracker.close();
        self.tracker.wait().await;
        debug!(run_id = %self.id, "Run torn down");
    }
}

fn report(crashes: &mpsc::Sender<CrashReport>, run_id: String, reason: &str) {
    let report = CrashReport {
        run_id,
        reason: reason.to_string(),
    };
    if let Err(e) = crashes.try_send(report) {
        warn!(error = %e, "Crash report dropped");
    }
}

async fn scan(
    mut feed: mpsc::Receiver<String>,
    registry: Arc<Registry>,
    events: EventContext,
    ready: watch::Sender<Readiness>,
    readiness_marker: String,
    failure_marker: String,
    cancel: CancellationToken,
) {
    loop {
        // Drain queued lines before honouring cancellation
        let line = tokio::select! {
            biased;
            line = feed.recv() => match line {
                Some(line) => line,
                None => break,
            },
            _ = cancel.cancelled() => break,
        };

        let marker = line.trim();
        if marker == readiness_marker {
            ready.send_if_modified(|r| set_once(r, Readiness::Ready));
        } else if marker == failure_marker {
            ready.send_if_modified(|r| set_once(r, Readiness::Failed));
        }

        registry.dispatch(&line, &events);
    }
    debug!("Scanner stopped");
}

fn set_once(current: &mut Readiness, next: Readiness) -> bool {
    if *current == Readiness::Pending {
        *current = next;
        true
    } else {
        false
    }
}

struct ReapDeps {
    run_id: String,
    exited: watch::Sender<bool>,
    stopping: Arc<AtomicBool>,
    kill: CancellationToken,
    cancel: CancellationToken,
    crashes: mpsc::Sender<CrashReport>,
    events: EventContext,
}

async fn reap(mut child: Child, deps: ReapDeps) {
    let status = tokio::select! {
        status = child.wait() => status,
        _ = deps.kill.cancelled() => kill_and_wait(&mut child).await,
        _ = deps.cancel.cancelled() => kill_and_wait(&mut child).await,
    };
    deps.exited.send_replace(true);

    let requested = deps.stopping.load(Ordering::Acquire);
    match status {
        Ok(status) if status.success() => info!(%status, "Game process exited"),
        Ok(status) => {
            warn!(%status, requested, "Game process exited with failure");
            if let Some(code) = status.code() {
                deps.events.bus.send(BusMessage::Log(ChatData::anonymous(format!(
                    "**Server Error**: Avorion has exited with non-zero status code: `{code}`"
                ))));
            }
        }
        Err(e) => error!(error = %e, "Failed to wait for the game process"),
    }

    if !requested {
        report(&deps.crashes, deps.run_id, "the game process exited unexpectedly");
    }
}

async fn kill_and_wait(child: &mut Child) -> std::io::Result<std::process::ExitStatus> {
    if let Err(e) = child.start_kill() {
        warn!(error = %e, "Failed to kill the game process");
    }
    child.wait().await
}
