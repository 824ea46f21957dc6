//! App: terminal front end.
//!
//! - Key presses become `PlayerEvent`s for PlayerCore.
//! - `SurfaceUpdate`s from PlayerCore change what is drawn.
//! - Error notices are modal: while one is up, keys only dismiss it.

use std::collections::VecDeque;
use std::io;
use std::time::Duration;

use ratatui::crossterm::{
    event::{self, Event, KeyCode, KeyEvent, KeyEventKind},
    execute,
    terminal::{disable_raw_mode, enable_raw_mode, EnterAlternateScreen, LeaveAlternateScreen},
};
use ratatui::{
    backend::CrosstermBackend,
    layout::{Alignment, Constraint, Direction, Layout, Rect},
    text::{Line, Span},
    widgets::{Block, Borders, Clear, List, ListItem, ListState, Paragraph, Wrap},
    Frame, Terminal,
};
use tokio::sync::mpsc;
use tracing::{debug, info};
use unicode_width::UnicodeWidthStr;

use crate::core::PlayerEvent;
use crate::surface::SurfaceUpdate;
use crate::theme;

const PAGE: usize = 10;

#[derive(Debug)]
enum AppMessage {
    Key(KeyEvent),
    Redraw,
}

#[derive(Debug, Clone, PartialEq, Eq)]
struct Notice {
    title: String,
    message: String,
}

pub struct App {
    channels: Vec<String>,
    list_state: ListState,
    now_playing: Option<(usize, String)>,
    status_error: Option<String>,
    notices: VecDeque<Notice>,
    fullscreen: bool,
    close_after_notices: bool,
    should_quit: bool,
    event_tx: mpsc::Sender<PlayerEvent>,
}

impl App {
    pub fn new(event_tx: mpsc::Sender<PlayerEvent>) -> Self {
        Self {
            channels: Vec::new(),
            list_state: ListState::default(),
            now_playing: None,
            status_error: None,
            notices: VecDeque::new(),
            fullscreen: false,
            close_after_notices: false,
            should_quit: false,
            event_tx,
        }
    }

    // ── Main run loop ─────────────────────────────────────────────────────────

    pub async fn run(
        mut self,
        mut updates: mpsc::UnboundedReceiver<SurfaceUpdate>,
    ) -> anyhow::Result<()> {
        enable_raw_mode()?;
        let mut stdout = io::stdout();
        execute!(stdout, EnterAlternateScreen)?;
        let mut terminal = Terminal::new(CrosstermBackend::new(stdout))?;
        debug!("run(): terminal ready, size={:?}", terminal.size());

        let result = self.event_loop(&mut terminal, &mut updates).await;

        disable_raw_mode()?;
        execute!(terminal.backend_mut(), LeaveAlternateScreen)?;
        terminal.show_cursor()?;
        result
    }

    async fn event_loop(
        &mut self,
        terminal: &mut Terminal<CrosstermBackend<io::Stdout>>,
        updates: &mut mpsc::UnboundedReceiver<SurfaceUpdate>,
    ) -> anyhow::Result<()> {
        let (tx, mut rx) = mpsc::channel::<AppMessage>(256);

        // Keyboard reader.  Polls so it notices when the loop below is gone.
        tokio::task::spawn_blocking(move || loop {
            if tx.is_closed() {
                break;
            }
            match event::poll(Duration::from_millis(100)) {
                Ok(true) => {
                    let msg = match event::read() {
                        Ok(Event::Key(key)) => AppMessage::Key(key),
                        Ok(Event::Resize(..)) => AppMessage::Redraw,
                        Ok(_) => continue,
                        Err(_) => break,
                    };
                    if tx.blocking_send(msg).is_err() {
                        break;
                    }
                }
                Ok(false) => {}
                Err(_) => break,
            }
        });

        loop {
            terminal.draw(|f| self.draw(f))?;
            if self.should_quit {
                break;
            }

            tokio::select! {
                Some(msg) = rx.recv() => {
                    if let AppMessage::Key(key) = msg {
                        if let Some(evt) = self.handle_key(key) {
                            if self.event_tx.send(evt).await.is_err() {
                                self.should_quit = true;
                            }
                        }
                    }
                }
                Some(update) = updates.recv() => self.apply_update(update),
                else => break,
            }
        }
        Ok(())
    }

    // ── state changes ─────────────────────────────────────────────────────────

    fn apply_update(&mut self, update: SurfaceUpdate) {
        match update {
            SurfaceUpdate::Channels(names) => {
                info!("UI: {} channels", names.len());
                self.channels = names;
                self.list_state
                    .select((!self.channels.is_empty()).then_some(0));
            }
            SurfaceUpdate::NowPlaying { index, name, url } => {
                debug!("UI: now playing {} ({})", name, url);
                self.now_playing = Some((index, name));
                self.status_error = None;
                self.list_state.select(Some(index));
            }
            SurfaceUpdate::Notice { title, message } => {
                self.status_error = Some(message.clone());
                self.notices.push_back(Notice { title, message });
            }
            SurfaceUpdate::Fullscreen(fullscreen) => self.fullscreen = fullscreen,
            SurfaceUpdate::CloseAfterNotices => {
                self.close_after_notices = true;
                if self.notices.is_empty() {
                    self.should_quit = true;
                }
            }
        }
    }

    /// Apply a key press and return the event PlayerCore should see, if any.
    fn handle_key(&mut self, key: KeyEvent) -> Option<PlayerEvent> {
        if key.kind != KeyEventKind::Press {
            return None;
        }

        if !self.notices.is_empty() {
            if matches!(
                key.code,
                KeyCode::Enter | KeyCode::Esc | KeyCode::Char(' ') | KeyCode::Char('q')
            ) {
                self.notices.pop_front();
                if self.notices.is_empty() && self.close_after_notices {
                    self.should_quit = true;
                }
            }
            return None;
        }

        match key.code {
            KeyCode::Char('q') | KeyCode::Esc => {
                self.should_quit = true;
                Some(PlayerEvent::Shutdown)
            }
            // nothing to hide until the list is up
            _ if self.channels.is_empty() => None,
            KeyCode::F(11) | KeyCode::Char('f') => Some(PlayerEvent::ToggleFullscreen),
            _ if self.fullscreen => None,
            KeyCode::Up | KeyCode::Char('k') => self.move_cursor(-1),
            KeyCode::Down | KeyCode::Char('j') => self.move_cursor(1),
            KeyCode::PageUp => self.move_cursor(-(PAGE as isize)),
            KeyCode::PageDown => self.move_cursor(PAGE as isize),
            KeyCode::Home | KeyCode::Char('g') => {
                self.list_state.select(Some(0));
                None
            }
            KeyCode::End | KeyCode::Char('G') => {
                self.list_state.select(Some(self.channels.len() - 1));
                None
            }
            KeyCode::Enter => self.list_state.selected().map(PlayerEvent::Select),
            _ => None,
        }
    }

    fn move_cursor(&mut self, delta: isize) -> Option<PlayerEvent> {
        let last = self.channels.len().saturating_sub(1) as isize;
        let current = self.list_state.selected().unwrap_or(0) as isize;
        self.list_state
            .select(Some((current + delta).clamp(0, last) as usize));
        None
    }

    // ── drawing ───────────────────────────────────────────────────────────────

    fn draw(&mut self, f: &mut Frame) {
        let area = f.area();
        let chunks = Layout::default()
            .direction(Direction::Vertical)
            .constraints([Constraint::Min(1), Constraint::Length(1)])
            .split(area);

        if self.fullscreen {
            let hint = Paragraph::new("fullscreen · F11 shows the channel list")
                .style(theme::style_hint())
                .alignment(Alignment::Center);
            f.render_widget(hint, chunks[0]);
        } else {
            self.draw_channel_list(f, chunks[0]);
        }

        f.render_widget(self.status_line(), chunks[1]);

        if let Some(notice) = self.notices.front() {
            draw_notice(f, area, notice);
        }
    }

    fn draw_channel_list(&mut self, f: &mut Frame, area: Rect) {
        let block = Block::default()
            .borders(Borders::ALL)
            .border_style(theme::style_border())
            .title(" Channels ");

        if self.channels.is_empty() {
            let loading = Paragraph::new("Loading channels…")
                .style(theme::style_secondary())
                .block(block);
            f.render_widget(loading, area);
            return;
        }

        let playing = self.now_playing.as_ref().map(|(i, _)| *i);
        let items: Vec<ListItem> = self
            .channels
            .iter()
            .enumerate()
            .map(|(i, name)| {
                if Some(i) == playing {
                    ListItem::new(Line::from(vec![
                        Span::styled("▶ ", theme::style_playing()),
                        Span::styled(name.as_str(), theme::style_playing()),
                    ]))
                } else {
                    ListItem::new(Line::from(Span::styled(
                        format!("  {}", name),
                        theme::style_default(),
                    )))
                }
            })
            .collect();

        let list = List::new(items)
            .block(block)
            .highlight_style(theme::style_selected());
        f.render_stateful_widget(list, area, &mut self.list_state);
    }

    fn status_line(&self) -> Paragraph<'_> {
        let mut spans = Vec::new();
        if let Some(err) = &self.status_error {
            spans.push(Span::styled(format!(" ✗ {}", err), theme::style_error()));
        } else if let Some((_, name)) = &self.now_playing {
            spans.push(Span::styled(format!(" ▶ {}", name), theme::style_playing()));
        }
        spans.push(Span::styled(
            "   ↑↓ move · enter play · F11 fullscreen · q quit",
            theme::style_hint(),
        ));
        Paragraph::new(Line::from(spans))
    }
}

fn draw_notice(f: &mut Frame, area: Rect, notice: &Notice) {
    let text_width = notice.message.width().max(notice.title.width()) as u16;
    let width = (text_width + 4)
        .max(30)
        .min(area.width.saturating_sub(2).max(1));
    let inner_width = width.saturating_sub(2).max(1);
    let lines = (notice.message.width() as u16).div_ceil(inner_width).max(1);
    let height = (lines + 4).min(area.height);
    let popup = centered_rect(area, width, height);

    let block = Block::default()
        .borders(Borders::ALL)
        .border_style(theme::style_error())
        .title(format!(" {} ", notice.title));
    let body = Paragraph::new(vec![
        Line::from(Span::styled(notice.message.as_str(), theme::style_default())),
        Line::from(""),
        Line::from(Span::styled("[enter] OK", theme::style_hint())),
    ])
    .block(block)
    .wrap(Wrap { trim: true })
    .alignment(Alignment::Center);

    f.render_widget(Clear, popup);
    f.render_widget(body, popup);
}

fn centered_rect(area: Rect, width: u16, height: u16) -> Rect {
    let width = width.min(area.width);
    let height = height.min(area.height);
    Rect {
        x: area.x + (area.width - width) / 2,
        y: area.y + (area.height - height) / 2,
        width,
        height,
    }
}

/// Put the terminal back before a panic message is printed, then exit
/// with status 1.
pub fn install_panic_hook() {
    let original = std::panic::take_hook();
    std::panic::set_hook(Box::new(move |info| {
        let _ = disable_raw_mode();
        let _ = execute!(io::stdout(), LeaveAlternateScreen);
        original(info);
        std::process::exit(1);
    }));
}

#[cfg(test)]
mod tests {
    use super::*;
    use ratatui::backend::TestBackend;
    use ratatui::crossterm::event::KeyModifiers;

    fn key(code: KeyCode) -> KeyEvent {
        KeyEvent::new(code, KeyModifiers::NONE)
    }

    fn app_with_channels() -> (App, mpsc::Receiver<PlayerEvent>) {
        let (tx, rx) = mpsc::channel(8);
        let mut app = App::new(tx);
        app.apply_update(SurfaceUpdate::Channels(vec![
            "YLE TV1".into(),
            "MTV3".into(),
            "Hero".into(),
        ]));
        (app, rx)
    }

    fn render(app: &mut App) -> String {
        let mut terminal = Terminal::new(TestBackend::new(70, 12)).unwrap();
        terminal.draw(|f| app.draw(f)).unwrap();
        terminal
            .backend()
            .buffer()
            .content()
            .iter()
            .map(|c| c.symbol())
            .collect()
    }

    #[test]
    fn enter_selects_highlighted_channel() {
        let (mut app, _rx) = app_with_channels();
        assert_eq!(app.handle_key(key(KeyCode::Down)), None);
        assert_eq!(app.handle_key(key(KeyCode::Down)), None);
        assert_eq!(app.handle_key(key(KeyCode::Down)), None);
        assert_eq!(app.handle_key(key(KeyCode::Enter)), Some(PlayerEvent::Select(2)));
        app.handle_key(key(KeyCode::Home));
        assert_eq!(app.handle_key(key(KeyCode::Enter)), Some(PlayerEvent::Select(0)));
    }

    #[test]
    fn f11_toggles_and_quit_shuts_down() {
        let (mut app, _rx) = app_with_channels();
        assert_eq!(app.handle_key(key(KeyCode::F(11))), Some(PlayerEvent::ToggleFullscreen));
        assert_eq!(app.handle_key(key(KeyCode::Char('q'))), Some(PlayerEvent::Shutdown));
        assert!(app.should_quit);
    }

    #[test]
    fn fullscreen_hides_selector_and_ignores_navigation() {
        let (mut app, _rx) = app_with_channels();
        app.apply_update(SurfaceUpdate::Fullscreen(true));
        assert_eq!(app.handle_key(key(KeyCode::Enter)), None);
        assert!(!render(&mut app).contains("Channels"));

        app.apply_update(SurfaceUpdate::Fullscreen(false));
        assert!(render(&mut app).contains("Channels"));
    }

    #[test]
    fn notices_are_modal() {
        let (mut app, _rx) = app_with_channels();
        app.apply_update(SurfaceUpdate::Notice {
            title: "Media Error".into(),
            message: "Playback error: 404".into(),
        });
        let screen = render(&mut app);
        assert!(screen.contains("Media Error"));
        assert!(screen.contains("Playback error: 404"));

        assert_eq!(app.handle_key(key(KeyCode::Char('f'))), None);
        assert_eq!(app.handle_key(key(KeyCode::Enter)), None);
        assert!(app.notices.is_empty());
        assert!(!app.should_quit);
        assert_eq!(app.handle_key(key(KeyCode::Enter)), Some(PlayerEvent::Select(0)));
    }

    #[test]
    fn fatal_notice_quits_after_dismissal() {
        let (tx, _rx) = mpsc::channel(1);
        let mut app = App::new(tx);
        app.apply_update(SurfaceUpdate::Notice {
            title: "Error".into(),
            message: "No channels found or failed to load channels.".into(),
        });
        app.apply_update(SurfaceUpdate::CloseAfterNotices);
        assert!(!app.should_quit);
        app.handle_key(key(KeyCode::Esc));
        assert!(app.should_quit);
    }

    #[test]
    fn now_playing_moves_cursor_and_clears_status_error() {
        let (mut app, _rx) = app_with_channels();
        app.apply_update(SurfaceUpdate::Notice {
            title: "Media Error".into(),
            message: "x".into(),
        });
        app.handle_key(key(KeyCode::Enter));
        app.apply_update(SurfaceUpdate::NowPlaying {
            index: 1,
            name: "MTV3".into(),
            url: "https://a/mtv3".into(),
        });
        assert_eq!(app.list_state.selected(), Some(1));
        assert_eq!(app.status_error, None);
        assert!(render(&mut app).contains("▶ MTV3"));
    }

    #[test]
    fn only_quit_works_while_loading() {
        let (tx, _rx) = mpsc::channel(1);
        let mut app = App::new(tx);
        assert_eq!(app.handle_key(key(KeyCode::F(11))), None);
        assert_eq!(app.handle_key(key(KeyCode::Char('f'))), None);
        assert_eq!(app.handle_key(key(KeyCode::Enter)), None);
        assert!(!app.should_quit);
        assert_eq!(app.handle_key(key(KeyCode::Char('q'))), Some(PlayerEvent::Shutdown));
        assert!(app.should_quit);
    }

    #[test]
    fn empty_list_shows_loading() {
        let (tx, _rx) = mpsc::channel(1);
        let mut app = App::new(tx);
        assert!(render(&mut app).contains("Loading channels"));
        assert_eq!(app.handle_key(key(KeyCode::Enter)), None);
    }
}
