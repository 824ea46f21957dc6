//! PlayerCore: single-owner event loop for the playback session.
//!
//! All inputs (channel selection, fullscreen toggles, asynchronous engine
//! failures) arrive as `PlayerEvent`s on one mpsc channel and are handled
//! to completion, one at a time.  PlayerCore owns the `Catalog`, the
//! `PlaybackSession`, the display surface and the playback engine
//! exclusively; nothing else mutates them.
//!
//! The surface and engine are injected so the state machine runs without a
//! terminal or an mpv process.

use std::future::Future;
use std::process::ExitCode;

use async_trait::async_trait;
use tokio::sync::mpsc;
use tracing::{debug, info, warn};

use tv_proto::catalog::Catalog;
use tv_proto::error::{EngineError, SelectionError, StartupError};
use tv_proto::session::{PlaybackPhase, PlaybackSession};

const TITLE_ERROR: &str = "Error";
const TITLE_MEDIA_ERROR: &str = "Media Error";
const MSG_NO_CHANNELS: &str = "No channels found or failed to load channels.";
const MSG_MISSING_URL: &str = "Failed to load the media content.";

// ── collaborators ─────────────────────────────────────────────────────────────

/// Whatever presents the channel list and video to the user.
///
/// Calls are fire-and-forget; a surface must not fail.
pub trait DisplaySurface {
    fn show_channels(&mut self, names: &[String]);
    fn show_stream(&mut self, index: usize, name: &str, url: &str);
    /// A notification the user has to acknowledge.
    fn notify_error(&mut self, title: &str, message: &str);
    /// Hide (`true`) or show the channel selector.
    fn set_fullscreen(&mut self, fullscreen: bool);
    /// Go away once the user has seen every pending notification.
    fn close_after_notices(&mut self) {}
}

/// Decodes and renders a stream.  Failures after `start` returns are
/// reported back as `PlayerEvent::EngineError`.
#[async_trait]
pub trait PlaybackEngine: Send {
    async fn start(&mut self, url: &str) -> Result<(), EngineError>;
    async fn stop(&mut self) -> Result<(), EngineError>;
    async fn set_fullscreen(&mut self, fullscreen: bool) -> Result<(), EngineError>;
    /// Release the engine at exit.
    async fn shutdown(&mut self) {}
}

// ── PlayerEvent ───────────────────────────────────────────────────────────────

/// All inputs into the PlayerCore loop.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum PlayerEvent {
    /// The user picked a channel.
    Select(usize),
    ToggleFullscreen,
    /// Asynchronous failure from the playback engine.
    EngineError(String),
    Shutdown,
}

// ── SessionEnd ────────────────────────────────────────────────────────────────

/// How a player session ended.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum SessionEnd {
    /// The user quit, or every event sender went away.
    Quit,
    /// Startup found no channels.
    Fatal,
}

impl SessionEnd {
    pub fn exit_status(self) -> u8 {
        match self {
            SessionEnd::Quit => 0,
            SessionEnd::Fatal => 1,
        }
    }
}

impl From<SessionEnd> for ExitCode {
    fn from(end: SessionEnd) -> Self {
        ExitCode::from(end.exit_status())
    }
}

// ── PlayerCore ────────────────────────────────────────────────────────────────

pub struct PlayerCore<S, E> {
    catalog: Catalog,
    session: PlaybackSession,
    phase: PlaybackPhase,
    surface: S,
    engine: E,
}

impl<S: DisplaySurface, E: PlaybackEngine> PlayerCore<S, E> {
    pub fn new(surface: S, engine: E) -> Self {
        Self {
            catalog: Catalog::default(),
            session: PlaybackSession::default(),
            phase: PlaybackPhase::Empty,
            surface,
            engine,
        }
    }

    pub fn session(&self) -> &PlaybackSession {
        &self.session
    }

    pub fn phase(&self) -> PlaybackPhase {
        self.phase
    }

    #[cfg(test)]
    pub fn surface(&self) -> &S {
        &self.surface
    }

    #[cfg(test)]
    pub fn engine(&self) -> &E {
        &self.engine
    }

    /// Install the startup catalog and play its first channel.
    ///
    /// An empty catalog is fatal: the user is notified and the caller is
    /// expected to exit non-zero.
    pub async fn load(&mut self, catalog: Catalog) -> Result<(), StartupError> {
        if catalog.is_empty() {
            warn!("PlayerCore: catalog is empty, giving up");
            self.set_phase(PlaybackPhase::Fatal);
            self.surface.notify_error(TITLE_ERROR, MSG_NO_CHANNELS);
            return Err(StartupError::EmptyCatalog);
        }

        self.catalog = catalog;
        self.set_phase(PlaybackPhase::Ready);
        self.surface.show_channels(&self.catalog.names());

        if let Err(e) = self.select(0).await {
            warn!("PlayerCore: initial selection failed: {}", e);
        }
        Ok(())
    }

    /// Switch playback to `catalog[index]`.
    ///
    /// Out-of-range indices leave the session untouched.  An entry without a
    /// URL is reported to the user and never reaches the engine.  Engine
    /// failures are recovered here and do not surface as `Err`.
    pub async fn select(&mut self, index: usize) -> Result<(), SelectionError> {
        let entry = self
            .catalog
            .get(index)
            .ok_or(SelectionError::OutOfRange {
                index,
                len: self.catalog.len(),
            })?;

        let name = entry.name.clone();
        let url = entry.url.trim().to_string();
        if url.is_empty() {
            warn!("PlayerCore: channel {} ({:?}) has no URL", index, name);
            self.session.last_error = Some(MSG_MISSING_URL.to_string());
            self.surface.notify_error(TITLE_ERROR, MSG_MISSING_URL);
            return Err(SelectionError::MissingUrl { index });
        }

        // stop-before-start, also when re-selecting the same channel
        if self.session.current_index.is_some() {
            if let Err(e) = self.engine.stop().await {
                warn!("PlayerCore: stopping previous stream failed: {}", e);
            }
        }

        // A retry of the current channel keeps the last error around.
        if self.session.current_index != Some(index) {
            self.session.last_error = None;
        }
        self.session.current_index = Some(index);

        info!("Playing channel {}: {} ({})", index, name, url);
        match self.engine.start(&url).await {
            Ok(()) => {
                self.set_phase(PlaybackPhase::Playing);
                self.surface.show_stream(index, &name, &url);
            }
            Err(e) => self.record_engine_error(e.to_string()),
        }
        Ok(())
    }

    /// Asynchronous failure from the engine.  Blank messages are ignored.
    pub fn on_engine_error(&mut self, message: String) {
        if message.trim().is_empty() {
            debug!("PlayerCore: ignoring empty engine error");
            return;
        }
        self.record_engine_error(message);
    }

    /// Flip the fullscreen flag.  Never fails and never touches playback.
    pub async fn toggle_fullscreen(&mut self) {
        let fullscreen = !self.session.is_full_screen;
        self.session.is_full_screen = fullscreen;
        info!("PlayerCore: fullscreen → {}", fullscreen);
        self.surface.set_fullscreen(fullscreen);
        if let Err(e) = self.engine.set_fullscreen(fullscreen).await {
            warn!("PlayerCore: engine fullscreen toggle failed: {}", e);
        }
    }

    /// Whole session: wait for `catalog`, load it, then run the event loop.
    ///
    /// A `Shutdown` that arrives while the catalog is still being fetched
    /// ends the session before anything is played.  Other events queued
    /// during the fetch are dropped.
    pub async fn play<F>(
        &mut self,
        catalog: F,
        mut event_rx: mpsc::Receiver<PlayerEvent>,
        start_fullscreen: bool,
    ) -> SessionEnd
    where
        F: Future<Output = Catalog>,
    {
        let fetched = tokio::select! {
            biased;
            _ = wait_for_quit(&mut event_rx) => None,
            catalog = catalog => Some(catalog),
        };
        let Some(catalog) = fetched else {
            info!("PlayerCore: quit while loading channels");
            self.engine.shutdown().await;
            return SessionEnd::Quit;
        };

        if let Err(e) = self.load(catalog).await {
            warn!("PlayerCore: startup failed: {}", e);
            self.surface.close_after_notices();
            return SessionEnd::Fatal;
        }
        info!("PlayerCore: {} channels available", self.catalog.len());

        if start_fullscreen {
            self.toggle_fullscreen().await;
        }
        self.run(event_rx).await;
        SessionEnd::Quit
    }

    /// Run the event loop.  Returns on `Shutdown` or once every sender is
    /// gone, after releasing the engine.
    pub async fn run(&mut self, mut event_rx: mpsc::Receiver<PlayerEvent>) {
        info!("PlayerCore: starting event loop");

        loop {
            match event_rx.recv().await {
                None => {
                    info!("PlayerCore: event channel closed, shutting down");
                    break;
                }
                Some(PlayerEvent::Shutdown) => {
                    info!("PlayerCore: shutdown requested");
                    break;
                }
                Some(PlayerEvent::Select(index)) => {
                    if let Err(e) = self.select(index).await {
                        warn!("PlayerCore: select error: {}", e);
                    }
                }
                Some(PlayerEvent::ToggleFullscreen) => self.toggle_fullscreen().await,
                Some(PlayerEvent::EngineError(message)) => self.on_engine_error(message),
            }
        }

        info!("PlayerCore: cleanup, releasing playback engine");
        self.engine.shutdown().await;
    }

    fn record_engine_error(&mut self, message: String) {
        if self.phase == PlaybackPhase::Fatal {
            return;
        }
        warn!("PlayerCore: playback error: {}", message);
        self.surface
            .notify_error(TITLE_MEDIA_ERROR, &format!("Playback error: {}", message));
        self.session.last_error = Some(message);
        self.set_phase(PlaybackPhase::Error);
    }

    fn set_phase(&mut self, phase: PlaybackPhase) {
        if self.phase != phase {
            info!("PlayerCore: phase {:?} → {:?}", self.phase, phase);
            self.phase = phase;
        }
    }
}

/// Resolves on `Shutdown` or once every sender is gone.
async fn wait_for_quit(event_rx: &mut mpsc::Receiver<PlayerEvent>) {
    loop {
        match event_rx.recv().await {
            None | Some(PlayerEvent::Shutdown) => return,
            Some(other) => debug!("PlayerCore: dropping {:?} while loading", other),
        }
    }
}
