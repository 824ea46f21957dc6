/// Where the controller is in its lifecycle.
///
/// Transitions:
///   Empty -> Ready -> Playing <-> Error
///   Empty -> Fatal (no channels)
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
pub enum PlaybackPhase {
    /// No catalog yet.
    #[default]
    Empty,
    /// Catalog loaded, nothing selected.
    Ready,
    /// A stream was handed to the engine.
    Playing,
    /// The engine reported a failure; the selection is kept for retry.
    Error,
    /// Startup found no channels.  Terminal.
    Fatal,
}

/// Transient playback state owned by the controller.  Never persisted.
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct PlaybackSession {
    pub current_index: Option<usize>,
    pub is_full_screen: bool,
    pub last_error: Option<String>,
}
