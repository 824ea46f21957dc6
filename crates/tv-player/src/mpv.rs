//! mpv as the playback engine, driven over its JSON IPC socket.
//!
//! ```text
//!   MpvEngine::start(url)
//!         │
//!         ├── MpvDriver::spawn_and_connect()   (lazily, on first use / after death)
//!         │         ├── writer_task  ← MpvRequest via mpsc → socket
//!         │         └── reader_task  ← JSON lines from socket
//!         │                  ├── response (request_id) → matching oneshot
//!         │                  └── event                  → forwarder
//!         └── forwarder: end-file(error) / connection loss → PlayerEvent::EngineError
//! ```
//!
//! Unix uses a domain socket, Windows a named pipe `\\.\pipe\<name>`.

use async_trait::async_trait;
use serde_json::{json, Value};
use std::collections::HashMap;
use std::sync::atomic::{AtomicU64, Ordering};
use std::sync::Arc;
use tokio::io::{AsyncBufReadExt, AsyncRead, AsyncWrite, AsyncWriteExt, BufReader};
use tokio::sync::{mpsc, oneshot, Mutex};
use tokio::time::Duration;
use tracing::{debug, info, warn};

use tv_proto::config::MpvConfig;
use tv_proto::error::EngineError;
use tv_proto::platform;

use crate::core::{PlaybackEngine, PlayerEvent};

static NEXT_REQ_ID: AtomicU64 = AtomicU64::new(1);

const IPC_TIMEOUT: Duration = Duration::from_secs(5);

type PendingMap = Arc<Mutex<HashMap<u64, oneshot::Sender<anyhow::Result<Value>>>>>;

struct PendingRequest {
    req_id: u64,
    payload: String, // serialised JSON line, '\n' terminated
    reply: oneshot::Sender<anyhow::Result<Value>>,
}

/// An unsolicited mpv message (no request_id).
#[derive(Debug, Clone)]
pub struct MpvEvent {
    pub raw: Value,
}

impl MpvEvent {
    /// "end-file", "start-file", "file-loaded", ...
    pub fn event_name(&self) -> Option<&str> {
        self.raw.get("event")?.as_str()
    }

    /// The playback failure carried by an `end-file` event, if any.
    ///
    /// mpv reports `reason: "error"` with a `file_error` description such as
    /// "loading failed" or "unrecognized file format".
    pub fn playback_error(&self) -> Option<String> {
        if self.event_name()? != "end-file" {
            return None;
        }
        if self.raw.get("reason")?.as_str()? != "error" {
            return None;
        }
        let message = self
            .raw
            .get("file_error")
            .and_then(|v| v.as_str())
            .map(str::trim)
            .filter(|s| !s.is_empty())
            .unwrap_or("playback failed");
        Some(message.to_string())
    }
}

// ── handle ────────────────────────────────────────────────────────────────────

/// Cloneable handle to the writer task.
#[derive(Clone)]
pub struct MpvHandle {
    tx: mpsc::Sender<PendingRequest>,
}

impl MpvHandle {
    pub async fn send(&self, command: Value) -> anyhow::Result<Value> {
        let req_id = NEXT_REQ_ID.fetch_add(1, Ordering::Relaxed);
        let msg = json!({ "command": command, "request_id": req_id });
        let mut raw = serde_json::to_string(&msg)?;
        raw.push('\n');

        let (reply_tx, reply_rx) = oneshot::channel();
        self.tx
            .send(PendingRequest {
                req_id,
                payload: raw,
                reply: reply_tx,
            })
            .await
            .map_err(|_| anyhow::anyhow!("mpv writer task gone"))?;

        tokio::time::timeout(IPC_TIMEOUT, reply_rx)
            .await
            .map_err(|_| anyhow::anyhow!("mpv IPC timeout for req={}", req_id))?
            .map_err(|_| anyhow::anyhow!("mpv reply channel dropped req={}", req_id))?
    }

    pub async fn load_stream(&self, url: &str, volume: f32) -> anyhow::Result<()> {
        self.send(json!(["loadfile", url, "replace"])).await?;
        let vol_pct = (volume * 100.0).clamp(0.0, 100.0);
        let _ = self.send(json!(["set_property", "volume", vol_pct])).await;
        Ok(())
    }

    pub async fn stop(&self) -> anyhow::Result<()> {
        self.send(json!(["stop"])).await?;
        Ok(())
    }

    pub async fn set_fullscreen(&self, fullscreen: bool) -> anyhow::Result<()> {
        self.send(json!(["set_property", "fullscreen", fullscreen]))
            .await?;
        Ok(())
    }
}

// ── driver ────────────────────────────────────────────────────────────────────

/// Owns the mpv child process.
pub struct MpvDriver {
    socket_name: String,
    process: Option<tokio::process::Child>,
    extra_args: Vec<String>,
}

impl MpvDriver {
    pub fn new(extra_args: Vec<String>) -> Self {
        Self {
            socket_name: platform::mpv_socket_name(),
            process: None,
            extra_args,
        }
    }

    pub fn process_alive(&mut self) -> bool {
        match self.process.as_mut() {
            Some(child) => matches!(child.try_wait(), Ok(None)),
            None => false,
        }
    }

    pub async fn kill(&mut self) {
        if let Some(mut p) = self.process.take() {
            let _ = p.kill().await;
        }
        #[cfg(unix)]
        {
            let _ = tokio::fs::remove_file(&self.socket_name).await;
        }
    }

    /// Spawn a fresh mpv and connect to its IPC endpoint.  Unsolicited
    /// events go to `event_tx`.
    pub async fn spawn_and_connect(
        &mut self,
        fullscreen: bool,
        event_tx: mpsc::Sender<MpvEvent>,
    ) -> anyhow::Result<MpvHandle> {
        self.kill().await;

        let mpv_binary =
            platform::find_mpv_binary().ok_or_else(|| anyhow::anyhow!("mpv binary not found"))?;
        info!("mpv: spawning {}", mpv_binary.display());

        let mut cmd = tokio::process::Command::new(mpv_binary);
        cmd.arg("--idle=yes")
            .arg("--force-window=yes")
            .arg("--keep-open=no")
            .arg("--title=tvplay")
            .arg(platform::mpv_socket_arg())
            .arg("--quiet");
        if fullscreen {
            cmd.arg("--fullscreen");
        }
        let child = cmd
            .args(&self.extra_args)
            .stdin(std::process::Stdio::null())
            .stdout(std::process::Stdio::null())
            .stderr(std::process::Stdio::null())
            .kill_on_drop(true)
            .spawn()?;
        self.process = Some(child);

        let stream = self.connect().await?;
        info!("mpv: connected to IPC endpoint");
        Ok(start_io_tasks(stream, event_tx))
    }

    #[cfg(unix)]
    async fn connect(&self) -> anyhow::Result<tokio::net::UnixStream> {
        let socket_path = std::path::Path::new(&self.socket_name);
        for _ in 0..50 {
            tokio::time::sleep(Duration::from_millis(100)).await;
            if socket_path.exists() {
                if let Ok(stream) = tokio::net::UnixStream::connect(socket_path).await {
                    return Ok(stream);
                }
            }
        }
        anyhow::bail!("mpv IPC socket did not appear")
    }

    #[cfg(windows)]
    async fn connect(
        &self,
    ) -> anyhow::Result<tokio::net::windows::named_pipe::NamedPipeClient> {
        use tokio::net::windows::named_pipe::ClientOptions;
        let pipe_path = format!(r"\\.\pipe\{}", self.socket_name);
        for _ in 0..50 {
            tokio::time::sleep(Duration::from_millis(100)).await;
            if let Ok(client) = ClientOptions::new().open(&pipe_path) {
                return Ok(client);
            }
        }
        anyhow::bail!("mpv named pipe did not appear")
    }
}

fn start_io_tasks<S>(stream: S, event_tx: mpsc::Sender<MpvEvent>) -> MpvHandle
where
    S: AsyncRead + AsyncWrite + Send + 'static,
{
    let (read_half, write_half) = tokio::io::split(stream);
    let pending: PendingMap = Arc::new(Mutex::new(HashMap::new()));
    let (cmd_tx, cmd_rx) = mpsc::channel::<PendingRequest>(64);

    tokio::spawn(writer_task(write_half, cmd_rx, pending.clone()));
    tokio::spawn(reader_task(BufReader::new(read_half), pending, event_tx));

    MpvHandle { tx: cmd_tx }
}

async fn fail_pending(pending: &PendingMap, reason: &str) {
    let mut map = pending.lock().await;
    for (_, tx) in map.drain() {
        let _ = tx.send(Err(anyhow::anyhow!("{}", reason)));
    }
}

async fn reader_task<R>(
    mut reader: BufReader<R>,
    pending: PendingMap,
    event_tx: mpsc::Sender<MpvEvent>,
) where
    R: AsyncRead + Unpin,
{
    let mut line = String::new();
    loop {
        line.clear();
        match reader.read_line(&mut line).await {
            Ok(0) => {
                debug!("mpv reader: connection closed");
                fail_pending(&pending, "mpv IPC connection closed").await;
                break;
            }
            Ok(_) => {
                let trimmed = line.trim();
                if trimmed.is_empty() {
                    continue;
                }
                let val: Value = match serde_json::from_str(trimmed) {
                    Ok(v) => v,
                    Err(e) => {
                        debug!("mpv reader: invalid json '{}': {}", trimmed, e);
                        continue;
                    }
                };

                match val.get("request_id").and_then(|v| v.as_u64()) {
                    Some(req_id) => {
                        let Some(tx) = pending.lock().await.remove(&req_id) else {
                            debug!("mpv reader: response for unknown req={}", req_id);
                            continue;
                        };
                        let result = if val["error"].as_str() == Some("success") {
                            Ok(val)
                        } else {
                            let err = val["error"].as_str().unwrap_or("unknown error");
                            Err(anyhow::anyhow!("mpv error: {}", err))
                        };
                        let _ = tx.send(result);
                    }
                    None => {
                        debug!("mpv reader: event {}", trimmed);
                        if event_tx.send(MpvEvent { raw: val }).await.is_err() {
                            break;
                        }
                    }
                }
            }
            Err(e) => {
                warn!("mpv reader: read error: {}", e);
                fail_pending(&pending, &format!("mpv IPC read error: {}", e)).await;
                break;
            }
        }
    }
}

async fn writer_task<W>(mut writer: W, mut rx: mpsc::Receiver<PendingRequest>, pending: PendingMap)
where
    W: AsyncWrite + Unpin,
{
    while let Some(req) = rx.recv().await {
        // register before writing so the reader can always match the reply
        pending.lock().await.insert(req.req_id, req.reply);
        debug!("mpv writer: send req={} payload={}", req.req_id, req.payload.trim());
        if let Err(e) = writer.write_all(req.payload.as_bytes()).await {
            warn!("mpv writer: write error: {}", e);
            if let Some(tx) = pending.lock().await.remove(&req.req_id) {
                let _ = tx.send(Err(anyhow::anyhow!("mpv write error: {}", e)));
            }
            break;
        }
    }
    debug!("mpv writer: task exiting");
}

// ── engine ────────────────────────────────────────────────────────────────────

/// `PlaybackEngine` backed by an mpv child process.
pub struct MpvEngine {
    driver: MpvDriver,
    handle: Option<MpvHandle>,
    player_tx: mpsc::Sender<PlayerEvent>,
    volume: f32,
    fullscreen: bool,
}

impl MpvEngine {
    pub fn new(config: &MpvConfig, player_tx: mpsc::Sender<PlayerEvent>) -> Self {
        Self {
            driver: MpvDriver::new(config.extra_args.clone()),
            handle: None,
            player_tx,
            volume: config.default_volume,
            fullscreen: false,
        }
    }

    async fn ensure_handle(&mut self) -> Result<MpvHandle, EngineError> {
        if self.handle.is_some() && !self.driver.process_alive() {
            warn!("mpv: process died, dropping handle");
            self.handle = None;
        }
        if let Some(h) = &self.handle {
            return Ok(h.clone());
        }

        let (event_tx, event_rx) = mpsc::channel::<MpvEvent>(64);
        let handle = self
            .driver
            .spawn_and_connect(self.fullscreen, event_tx)
            .await
            .map_err(|e| EngineError::Unavailable(e.to_string()))?;
        tokio::spawn(forward_events(event_rx, self.player_tx.clone()));

        self.handle = Some(handle.clone());
        Ok(handle)
    }
}

/// Turn mpv events into controller events.  When the reader goes away the
/// process is gone too, which the user sees as a playback error.
async fn forward_events(mut rx: mpsc::Receiver<MpvEvent>, player_tx: mpsc::Sender<PlayerEvent>) {
    while let Some(evt) = rx.recv().await {
        if let Some(message) = evt.playback_error() {
            info!("mpv: end-file with error: {}", message);
            if player_tx.send(PlayerEvent::EngineError(message)).await.is_err() {
                return;
            }
        }
    }
    let _ = player_tx
        .send(PlayerEvent::EngineError("mpv exited".to_string()))
        .await;
}

#[async_trait]
impl PlaybackEngine for MpvEngine {
    async fn start(&mut self, url: &str) -> Result<(), EngineError> {
        let handle = self.ensure_handle().await?;
        handle
            .load_stream(url, self.volume)
            .await
            .map_err(|e| EngineError::Command(e.to_string()))
    }

    async fn stop(&mut self) -> Result<(), EngineError> {
        match &self.handle {
            Some(h) => h.stop().await.map_err(|e| EngineError::Command(e.to_string())),
            None => Ok(()),
        }
    }

    async fn set_fullscreen(&mut self, fullscreen: bool) -> Result<(), EngineError> {
        self.fullscreen = fullscreen;
        match &self.handle {
            Some(h) => h
                .set_fullscreen(fullscreen)
                .await
                .map_err(|e| EngineError::Command(e.to_string())),
            None => Ok(()),
        }
    }

    async fn shutdown(&mut self) {
        info!("mpv: shutting down");
        if let Some(h) = self.handle.take() {
            let _ = h.stop().await;
            let _ = h.send(json!(["quit"])).await;
        }
        self.driver.kill().await;
    }
}
