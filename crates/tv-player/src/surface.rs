//! `DisplaySurface` backed by the terminal UI.
//!
//! PlayerCore calls into `TerminalSurface`, which only queues a
//! `SurfaceUpdate` for the UI task; rendering happens over there.

use tokio::sync::mpsc;

use crate::core::DisplaySurface;

#[derive(Debug, Clone, PartialEq, Eq)]
pub enum SurfaceUpdate {
    Channels(Vec<String>),
    NowPlaying { index: usize, name: String, url: String },
    Notice { title: String, message: String },
    Fullscreen(bool),
    /// Quit once the user has dismissed every pending notice.
    CloseAfterNotices,
}

pub struct TerminalSurface {
    tx: mpsc::UnboundedSender<SurfaceUpdate>,
}

impl TerminalSurface {
    pub fn new(tx: mpsc::UnboundedSender<SurfaceUpdate>) -> Self {
        Self { tx }
    }

    fn send(&self, update: SurfaceUpdate) {
        // UI already gone: nothing left to show it on
        let _ = self.tx.send(update);
    }
}

impl DisplaySurface for TerminalSurface {
    fn show_channels(&mut self, names: &[String]) {
        self.send(SurfaceUpdate::Channels(names.to_vec()));
    }

    fn show_stream(&mut self, index: usize, name: &str, url: &str) {
        self.send(SurfaceUpdate::NowPlaying {
            index,
            name: name.to_string(),
            url: url.to_string(),
        });
    }

    fn notify_error(&mut self, title: &str, message: &str) {
        self.send(SurfaceUpdate::Notice {
            title: title.to_string(),
            message: message.to_string(),
        });
    }

    fn set_fullscreen(&mut self, fullscreen: bool) {
        self.send(SurfaceUpdate::Fullscreen(fullscreen));
    }

    fn close_after_notices(&mut self) {
        self.send(SurfaceUpdate::CloseAfterNotices);
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn forwards_calls_as_updates() {
        let (tx, mut rx) = mpsc::unbounded_channel();
        let mut surface = TerminalSurface::new(tx);
        surface.show_channels(&["YLE TV1".to_string()]);
        surface.notify_error("Error", "boom");
        surface.set_fullscreen(true);

        assert_eq!(rx.try_recv().unwrap(), SurfaceUpdate::Channels(vec!["YLE TV1".into()]));
        assert_eq!(
            rx.try_recv().unwrap(),
            SurfaceUpdate::Notice {
                title: "Error".into(),
                message: "boom".into()
            }
        );
        assert_eq!(rx.try_recv().unwrap(), SurfaceUpdate::Fullscreen(true));
    }

    #[test]
    fn closed_ui_does_not_fail() {
        let (tx, rx) = mpsc::unbounded_channel();
        drop(rx);
        let mut surface = TerminalSurface::new(tx);
        surface.notify_error("Media Error", "Playback error: x");
        surface.close_after_notices();
    }
}
