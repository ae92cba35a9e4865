use anyhow::{Context, Result};
use crossbeam::channel::{unbounded, Receiver};
use crossterm::{
    event::{
        self, DisableBracketedPaste, EnableBracketedPaste, Event as CrosstermEvent, KeyCode,
        KeyEvent, KeyEventKind, KeyModifiers,
    },
    execute,
    terminal::{disable_raw_mode, enable_raw_mode, EnterAlternateScreen, LeaveAlternateScreen},
};
use ratatui::{
    backend::CrosstermBackend,
    prelude::Rect,
    style::{Color, Style},
    text::Line,
    widgets::{Block, Borders, Clear, Paragraph},
    Terminal,
};
use std::{io, panic, thread, time::Duration};
use unicode_segmentation::UnicodeSegmentation;
use unicode_width::UnicodeWidthStr;

use crate::application::ApplicationState;

// What a scene wants the application loop to do after handling input.
#[derive(PartialEq, Debug)]
pub enum ProcessInputResult {
    None,
    Quit,
    ChangeScene(ApplicationState),
}

// ctrl-c leaves the application from any scene
pub fn is_quit_key(key: &KeyEvent) -> bool {
    key.code == KeyCode::Char('c') && key.modifiers.contains(KeyModifiers::CONTROL)
}

pub type Frame<'a> = ratatui::Frame<'a>;

// Implement this on all UI state objects that can be drawn.
pub trait TerminalRenderable {
    fn render(&mut self, f: &mut Frame);
    fn process_input(&mut self, event: TerminalEvent) -> ProcessInputResult;
}

// The terminal events the scenes react to.
#[derive(Clone, Debug, PartialEq)]
pub enum TerminalEvent {
    // nothing happened for a whole poll interval
    Tick,
    Key(KeyEvent),
    // text pasted while bracketed paste is on, delivered in one piece
    Paste(String),
}
impl TerminalEvent {
    fn from_crossterm(e: CrosstermEvent) -> Option<TerminalEvent> {
        match e {
            // only presses, so windows doesn't deliver every key twice
            CrosstermEvent::Key(key) if key.kind == KeyEventKind::Press => {
                Some(TerminalEvent::Key(key))
            }
            CrosstermEvent::Paste(text) => Some(TerminalEvent::Paste(text)),
            // resizes are picked up by the next draw
            _ => None,
        }
    }
}

// Reads crossterm events on a background thread. The thread ends once the
// receiver has been dropped.
fn spawn_event_pump(poll_interval: Duration) -> Receiver<TerminalEvent> {
    let (sender, receiver) = unbounded();
    thread::spawn(move || loop {
        let event = match event::poll(poll_interval) {
            Ok(true) => match event::read() {
                Ok(e) => TerminalEvent::from_crossterm(e),
                Err(err) => {
                    log::error!("Failed to read a terminal event: {err}");
                    None
                }
            },
            Ok(false) => Some(TerminalEvent::Tick),
            Err(err) => {
                log::error!("Failed to poll for terminal events: {err}");
                thread::sleep(poll_interval);
                None
            }
        };

        if let Some(event) = event {
            if sender.send(event).is_err() {
                return;
            }
        }
    });
    receiver
}

// Owns the terminal backend and the event pump.
// enable()/disable() are associated functions so the panic hook can call them.
pub struct Tui {
    terminal: Terminal<CrosstermBackend<io::Stdout>>,
    events: Receiver<TerminalEvent>,
}
impl Tui {
    pub fn new(input_poll_ms: u64) -> Result<Self> {
        let terminal = Terminal::new(CrosstermBackend::new(io::stdout()))
            .context("creating terminal backend interface failed")?;

        // put the terminal back before the panic message gets printed
        let default_hook = panic::take_hook();
        panic::set_hook(Box::new(move |info| {
            if let Err(err) = Self::disable() {
                eprintln!("failed to reset the terminal on detected panic: {err:#}");
            }
            default_hook(info);
        }));

        Ok(Self {
            terminal,
            events: spawn_event_pump(Duration::from_millis(input_poll_ms)),
        })
    }

    pub fn enable() -> Result<()> {
        enable_raw_mode().context("failed to enable raw mode")?;
        execute!(io::stdout(), EnterAlternateScreen, EnableBracketedPaste)
            .context("unable to enter alternate screen")
    }

    pub fn disable() -> Result<()> {
        disable_raw_mode().context("failed to disable raw mode")?;
        execute!(io::stdout(), DisableBracketedPaste, LeaveAlternateScreen)
            .context("unable to switch to main screen")
    }

    pub fn draw(&mut self, scene: &mut dyn TerminalRenderable) -> Result<()> {
        self.terminal
            .draw(|frame| scene.render(frame))
            .context("drawing the frame failed")?;
        Ok(())
    }

    // hands queued events to the scene until it asks for something or the queue is empty
    pub fn process_input(&mut self, scene: &mut dyn TerminalRenderable) -> ProcessInputResult {
        while let Ok(event) = self.events.try_recv() {
            let result = scene.process_input(event);
            if result != ProcessInputResult::None {
                return result;
            }
        }
        ProcessInputResult::None
    }
}

// a rect of the given percentages of `outer`, centered inside it
pub fn centered_rect(percent_x: u16, percent_y: u16, outer: Rect) -> Rect {
    let width = (outer.width as u32 * percent_x.min(100) as u32 / 100) as u16;
    let height = (outer.height as u32 * percent_y.min(100) as u32 / 100) as u16;
    Rect {
        x: outer.x + (outer.width - width) / 2,
        y: outer.y + (outer.height - height) / 2,
        width,
        height,
    }
}

// A bordered popup with a title and wrapped text, dismissed with Enter or Esc.
pub struct MessageBox {
    title: String,
    text: String,
    width_pct: u16,
    height_pct: u16,
    pub dismissed: bool,
}
impl MessageBox {
    pub fn new(title: &str, text: &str, width_pct: u16, height_pct: u16) -> Self {
        Self {
            title: title.to_owned(),
            text: text.to_owned(),
            width_pct,
            height_pct,
            dismissed: false,
        }
    }

    pub fn process_input(&mut self, event: TerminalEvent) {
        if let TerminalEvent::Key(key) = event {
            if matches!(key.code, KeyCode::Esc | KeyCode::Enter) {
                self.dismissed = true;
            }
        }
    }

    pub fn render(&self, frame: &mut Frame) {
        let mut area = centered_rect(self.width_pct, self.height_pct, frame.size());
        let inner_width = area.width.saturating_sub(2) as usize;

        let lines: Vec<Line> = self
            .text
            .lines()
            .flat_map(|line| wrap_to_width(line, inner_width, 0))
            .map(Line::from)
            .collect();

        // shrink to the text plus the border
        area.height = area.height.min(lines.len() as u16 + 2);

        let body = Paragraph::new(lines).block(
            Block::default()
                .border_style(Style::default().fg(Color::Cyan))
                .title(self.title.as_str())
                .borders(Borders::ALL),
        );
        frame.render_widget(Clear, area);
        frame.render_widget(body, area);
    }
}

// Word-wraps one line of text to `max_width` display columns. The first output
// line is `first_line_reserve` columns shorter so a speaker name can be put in
// front of it. Runs of whitespace between words are kept; whitespace at a break
// is dropped. Words wider than a whole line are broken between graphemes.
pub fn wrap_to_width(source: &str, max_width: usize, first_line_reserve: usize) -> Vec<String> {
    let max_width = max_width.max(1);
    let mut limit = max_width.saturating_sub(first_line_reserve).max(1);

    let mut lines = Vec::new();
    let mut line = String::new();
    let mut line_width = 0;
    let mut gap = String::new();

    for token in source.split_word_bounds() {
        if token.chars().all(char::is_whitespace) {
            if !line.is_empty() {
                gap.push_str(token);
            }
            continue;
        }

        let token_width = token.width();
        let gap_width = gap.width();
        // the gap is always empty while the line is
        if line_width + gap_width + token_width <= limit {
            line.push_str(&gap);
            line.push_str(token);
            line_width += gap_width + token_width;
            gap.clear();
            continue;
        }

        // the token starts a new line
        gap.clear();
        if !line.is_empty() {
            lines.push(std::mem::take(&mut line));
            line_width = 0;
            limit = max_width;
        }
        if token_width <= limit {
            line.push_str(token);
            line_width = token_width;
            continue;
        }

        for grapheme in token.graphemes(true) {
            let grapheme_width = grapheme.width();
            if !line.is_empty() && line_width + grapheme_width > limit {
                lines.push(std::mem::take(&mut line));
                line_width = 0;
                limit = max_width;
            }
            line.push_str(grapheme);
            line_width += grapheme_width;
        }
    }

    if !line.is_empty() || lines.is_empty() {
        lines.push(line);
    }
    lines
}
