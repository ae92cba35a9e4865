use crossbeam::channel::{Receiver, Sender};
use crossterm::event::KeyCode;
use rand::Rng;
use ratatui::prelude::{Alignment, Constraint, Direction, Layout, Rect};
use ratatui::style::{Color, Modifier, Style};
use ratatui::symbols::Marker;
use ratatui::text::{Line, Span};
use ratatui::widgets::{Axis, Chart, Clear, Dataset, GraphType, Paragraph};
use std::time::Instant;
use unicode_width::UnicodeWidthStr;

use crate::approval::GateAction;
use crate::chat_engine::{ChatEngineRequest, ChatEngineResponse};
use crate::config::ConfigurationFile;
use crate::inline_image::decoded_len;
use crate::session::SessionSnapshot;
use crate::transcript::{split_inline_images, AssistantSegment};
use crate::tui::{
    is_quit_key, wrap_to_width, Frame, MessageBox, ProcessInputResult, TerminalEvent,
    TerminalRenderable,
};

const HELP_TEXT: &str = "j      = scroll chatlog down\n\
                         k      = scroll chatlog up\n\
                         r      = type a new message (enter to send, esc to cancel)\n\
                         y      = generate the offered image\n\
                         n      = skip the offered image\n\
                         esc    = exit back to the main menu";

const DIM: Color = Color::Rgb(100, 100, 100);

// Replaces each inline image in the assistant text with a short placeholder
// since the terminal can't draw the picture itself.
pub fn assistant_display_text(text: &str) -> String {
    let mut display = String::with_capacity(text.len().min(4096));
    for segment in split_inline_images(text) {
        match segment {
            AssistantSegment::Text(t) => display.push_str(t),
            AssistantSegment::Image(payload) => {
                let kb = (decoded_len(payload) + 1023) / 1024;
                display.push_str(&format!("[image: png, {} KB]", kb));
            }
        }
    }
    display
}

// Splits a line into spans so "quoted speech" can be coloured differently.
// `in_quote` carries an unclosed quote over to the next line of the same entry.
fn quote_spans(
    line: &str,
    in_quote: &mut bool,
    text_style: Style,
    quote_style: Style,
) -> Vec<Span<'static>> {
    let mut spans = Vec::new();
    let mut run_start = 0;
    for (idx, _) in line.match_indices('"') {
        if *in_quote {
            // the closing mark belongs to the quote
            spans.push(Span::styled(line[run_start..=idx].to_owned(), quote_style));
            run_start = idx + 1;
        } else {
            if idx > run_start {
                spans.push(Span::styled(line[run_start..idx].to_owned(), text_style));
            }
            run_start = idx;
        }
        *in_quote = !*in_quote;
    }
    if run_start < line.len() {
        let style = if *in_quote { quote_style } else { text_style };
        spans.push(Span::styled(line[run_start..].to_owned(), style));
    }
    spans
}

fn rgb(values: [u8; 3]) -> Color {
    Color::Rgb(values[0], values[1], values[2])
}

// The request the chat scene is waiting on.
#[derive(Clone, Copy, Debug, PartialEq)]
enum PendingWork {
    Reply,
    Image,
    Skip,
}
impl PendingWork {
    fn label(self) -> &'static str {
        match self {
            PendingWork::Reply => "asking the text model",
            PendingWork::Image => "generating the image",
            PendingWork::Skip => "skipping the image",
        }
    }
}

// one speaker's block of text in the rendered chatlog
struct ChatlogEntry {
    speaker: String,
    text: String,
    from_user: bool,
}

pub struct ChatState {
    config: ConfigurationFile,

    // the latest state reported back by the chat engine
    snapshot: SessionSnapshot,

    // how many entries, counting back from the newest, are scrolled past
    scroll: usize,

    send_to_server: Sender<ChatEngineRequest>,
    recv_on_client: Receiver<ChatEngineResponse>,

    // Some while the user is typing a message
    draft: Option<String>,

    // the message that was sent but hasn't come back in a snapshot yet
    pending_message: Option<String>,

    waiting_on: Option<PendingWork>,
    indicator: Option<WaitIndicator>,

    message_box: Option<MessageBox>,
}
impl ChatState {
    pub fn new(
        config: ConfigurationFile,
        send_to_server: Sender<ChatEngineRequest>,
        recv_on_client: Receiver<ChatEngineResponse>,
    ) -> ChatState {
        ChatState {
            config,
            snapshot: SessionSnapshot::default(),
            scroll: 0,
            send_to_server,
            recv_on_client,
            draft: None,
            pending_message: None,
            waiting_on: None,
            indicator: None,
            message_box: None,
        }
    }

    pub fn process_incoming_chat_engine_messages(&mut self) {
        while let Ok(response) = self.recv_on_client.try_recv() {
            match response {
                ChatEngineResponse::SessionUpdated(snapshot) => {
                    if let (Some(work), Some(indicator)) = (self.waiting_on, &self.indicator) {
                        log::debug!(
                            "Finished {} after {:.1}s",
                            work.label(),
                            indicator.started.elapsed().as_secs_f64()
                        );
                    }
                    self.snapshot = snapshot;
                    self.pending_message = None;
                    self.scroll = 0;
                    self.waiting_on = None;
                    self.indicator = None;
                }
                ChatEngineResponse::Ready => {
                    log::debug!("Chat engine reported ready after the chat scene started.");
                }
            }
        }
    }

    // sends the request and blocks further input until the next snapshot arrives
    fn send_request(&mut self, request: ChatEngineRequest, work: PendingWork) -> bool {
        if let Err(err) = self.send_to_server.send(request) {
            log::error!("Error sending a request to the chat engine: {}", err);
            self.message_box = Some(MessageBox::new(
                "Error",
                "The chat engine has stopped; restart the application to keep chatting.",
                60,
                30,
            ));
            return false;
        }
        self.waiting_on = Some(work);
        true
    }

    fn action_enabled(&self, action: GateAction) -> bool {
        self.snapshot.gate.enabled_actions().contains(&action)
    }

    fn handle_draft_input(&mut self, event: TerminalEvent) {
        let Some(draft) = self.draft.as_mut() else {
            return;
        };
        match event {
            TerminalEvent::Paste(text) => draft.push_str(&text),
            TerminalEvent::Key(key) => match key.code {
                KeyCode::Esc => self.draft = None,
                KeyCode::Backspace => {
                    draft.pop();
                }
                KeyCode::Char(c) => draft.push(c),
                KeyCode::Enter => self.submit_draft(),
                _ => {}
            },
            TerminalEvent::Tick => {}
        }
    }

    fn submit_draft(&mut self) {
        let Some(draft) = self.draft.as_mut() else {
            return;
        };
        let message = draft.trim().to_owned();
        if message.is_empty() {
            return;
        }

        // a typed "\n" at the end asks for a line break instead of sending
        if let Some(kept) = message.strip_suffix("\\n") {
            *draft = format!("{}\n", kept);
            return;
        }

        self.draft = None;
        if self.send_request(ChatEngineRequest::SubmitMessage(message.clone()), PendingWork::Reply) {
            self.pending_message = Some(message);
        }
    }

    fn handle_chatlog_input(&mut self, event: TerminalEvent) -> ProcessInputResult {
        let TerminalEvent::Key(key) = event else {
            return ProcessInputResult::None;
        };
        match key.code {
            KeyCode::Esc => {
                return ProcessInputResult::ChangeScene(
                    crate::application::ApplicationState::MainMenu,
                );
            }
            KeyCode::Char('?') => {
                self.message_box = Some(MessageBox::new("Command Reference:", HELP_TEXT, 60, 40));
            }
            // nothing else is accepted until the engine answers
            _ if self.waiting_on.is_some() => {}
            KeyCode::Char('r') => self.draft = Some(String::new()),
            KeyCode::Char('y') if self.action_enabled(GateAction::Generate) => {
                self.send_request(ChatEngineRequest::GenerateImage, PendingWork::Image);
            }
            KeyCode::Char('n') if self.action_enabled(GateAction::Skip) => {
                self.send_request(ChatEngineRequest::SkipImage, PendingWork::Skip);
            }
            KeyCode::Char('j') => {
                let entries = self.chatlog_entries().len();
                self.scroll = (self.scroll + 1).min(entries.saturating_sub(1));
            }
            KeyCode::Char('k') => self.scroll = self.scroll.saturating_sub(1),
            _ => {}
        }
        ProcessInputResult::None
    }

    // flattens the transcript into speaker blocks, oldest first
    fn chatlog_entries(&self) -> Vec<ChatlogEntry> {
        let user = &self.config.display_name;
        let assistant = &self.config.assistant_name;
        let mut entries = Vec::with_capacity(self.snapshot.transcript.len() * 2 + 1);
        for turn in self.snapshot.transcript.iter() {
            if !turn.user_text.is_empty() {
                entries.push(ChatlogEntry {
                    speaker: user.clone(),
                    text: turn.user_text.clone(),
                    from_user: true,
                });
            }
            entries.push(ChatlogEntry {
                speaker: assistant.clone(),
                text: assistant_display_text(&turn.assistant_text),
                from_user: false,
            });
        }
        if let Some(pending) = &self.pending_message {
            entries.push(ChatlogEntry {
                speaker: user.clone(),
                text: pending.clone(),
                from_user: true,
            });
        }
        entries
    }

    // the speaker name on the first row, then the wrapped text with quotes highlighted
    fn entry_lines(&self, entry: &ChatlogEntry, width: usize) -> Vec<Line<'static>> {
        let name_rgb = if entry.from_user {
            self.config.display_name_rgb
        } else {
            self.config.assistant_name_rgb
        };
        let name_style = name_rgb.map_or(Style::default(), |c| Style::default().fg(rgb(c)));
        let text_style = self
            .config
            .text_rgb
            .map_or(Style::default(), |c| Style::default().fg(rgb(c)));
        let quote_style = self
            .config
            .quotes_rgb
            .map_or(Style::default(), |c| Style::default().fg(rgb(c)));

        let mut header = vec![
            Span::styled(entry.speaker.clone(), name_style.add_modifier(Modifier::BOLD)),
            Span::styled(": ", text_style.add_modifier(Modifier::BOLD)),
        ];
        let reserve = entry.speaker.width() + 2;

        let mut lines = Vec::new();
        let mut in_quote = false;
        for (row, source) in entry.text.lines().enumerate() {
            let first_reserve = if row == 0 { reserve } else { 0 };
            for wrapped in wrap_to_width(source, width, first_reserve) {
                let mut spans = std::mem::take(&mut header);
                spans.extend(quote_spans(&wrapped, &mut in_quote, text_style, quote_style));
                lines.push(Line::from(spans));
            }
        }
        if !header.is_empty() {
            lines.push(Line::from(header));
        }
        lines
    }

    fn render_chatlog(&self, frame: &mut Frame, area: Rect) {
        let width = area.width as usize;
        let rows = area.height as usize;
        let entries = self.chatlog_entries();

        let mut lines = Vec::new();
        for entry in entries.iter().rev().skip(self.scroll) {
            lines.extend(self.entry_lines(entry, width));
            if lines.len() >= rows {
                break;
            }
            if self.config.add_visual_buffer_between_chatlog_items == Some(true) {
                lines.push(Line::from(""));
            }
        }

        if self.snapshot.transcript.is_empty() && self.pending_message.is_none() {
            lines.push(Line::from(Span::styled(
                "Press 'r' to start chatting or '?' for help.",
                Style::default().fg(DIM),
            )));
        }

        frame.render_widget(Paragraph::new(lines).alignment(self.text_alignment()), area);
    }

    fn draft_lines(&self, draft: &str, width: usize) -> Vec<Line<'static>> {
        let mut lines: Vec<Line> = if draft.is_empty() {
            vec![Line::from(Span::styled("<Type Reply Here>", Style::default().fg(DIM)))]
        } else {
            draft
                .split('\n')
                .flat_map(|line| wrap_to_width(line, width, 0))
                .map(Line::from)
                .collect()
        };
        lines.push(Line::from(Span::styled("─".repeat(width), Style::default().fg(DIM))));
        lines
    }

    // the open image offer and the keys that answer it
    fn approval_line(&self) -> Line<'static> {
        let prompt = self.snapshot.gate.pending_prompt().unwrap_or_default();
        let key_style = Style::default()
            .fg(Color::LightYellow)
            .add_modifier(Modifier::BOLD);
        let mut spans = vec![Span::raw("Image offered: "), Span::raw(prompt.to_owned())];
        for action in self.snapshot.gate.enabled_actions() {
            let (key, what) = match action {
                GateAction::Generate => ("(y)", " generate"),
                GateAction::Skip => ("(n)", " skip"),
            };
            spans.push(Span::raw("  "));
            spans.push(Span::styled(key, key_style));
            spans.push(Span::raw(what));
        }
        Line::from(spans)
    }

    fn text_alignment(&self) -> Alignment {
        self.config
            .chat_text_justification
            .clone()
            .map_or(Alignment::Right, Alignment::from)
    }
}

impl TerminalRenderable for ChatState {
    fn process_input(&mut self, event: TerminalEvent) -> ProcessInputResult {
        self.process_incoming_chat_engine_messages();

        if matches!(&event, TerminalEvent::Key(key) if is_quit_key(key)) {
            return ProcessInputResult::Quit;
        }

        if let Some(message_box) = self.message_box.as_mut() {
            message_box.process_input(event);
            if message_box.dismissed {
                self.message_box = None;
            }
            ProcessInputResult::None
        } else if self.draft.is_some() {
            self.handle_draft_input(event);
            ProcessInputResult::None
        } else {
            self.handle_chatlog_input(event)
        }
    }

    fn render(&mut self, frame: &mut Frame) {
        frame.render_widget(Clear, frame.size());

        let columns = Layout::default()
            .direction(Direction::Horizontal)
            .constraints([
                Constraint::Percentage(10),
                Constraint::Percentage(80),
                Constraint::Percentage(10),
            ])
            .split(frame.size());
        let column = columns[1];
        let width = column.width as usize;

        // the strip above the chatlog: wait indicator, draft, or the image offer
        let mut top_lines = Vec::new();
        let top_height = if self.waiting_on.is_some() {
            WaitIndicator::HEIGHT
        } else if let Some(draft) = &self.draft {
            top_lines = self.draft_lines(draft, width);
            top_lines.len() as u16
        } else if self.snapshot.gate.is_awaiting_decision() {
            top_lines = vec![self.approval_line(), Line::from("")];
            top_lines.len() as u16
        } else {
            0
        };

        let rows = Layout::default()
            .direction(Direction::Vertical)
            .constraints([Constraint::Max(top_height), Constraint::Min(4)])
            .split(column);

        if let Some(work) = self.waiting_on {
            let config = &self.config;
            let indicator = self.indicator.get_or_insert_with(|| {
                let primary = config
                    .progress_primary_rgb
                    .or(config.assistant_name_rgb)
                    .unwrap_or([10, 242, 10]);
                let secondary = config.progress_secondary_rgb.unwrap_or([62, 62, 62]);
                WaitIndicator::new(work, primary, secondary)
            });
            indicator.render(frame, rows[0]);
        } else if !top_lines.is_empty() {
            frame.render_widget(
                Paragraph::new(top_lines).alignment(self.text_alignment()),
                rows[0],
            );
        }

        self.render_chatlog(frame, rows[1]);

        if let Some(message_box) = &self.message_box {
            message_box.render(frame);
        }
    }
}

// Shown while a request is outstanding: what is being waited on, how long it
// has taken, and two drifting sine waves so the screen visibly keeps running.
struct WaitIndicator {
    label: &'static str,
    started: Instant,
    // radians per second the waves scroll by; jittered per request
    drift: f64,
    primary: Color,
    secondary: Color,
    fast_wave: Vec<(f64, f64)>,
    slow_wave: Vec<(f64, f64)>,
}
impl WaitIndicator {
    const HEIGHT: u16 = 5;

    fn new(work: PendingWork, primary: [u8; 3], secondary: [u8; 3]) -> Self {
        Self {
            label: work.label(),
            started: Instant::now(),
            drift: rand::thread_rng().gen_range(7.0..9.0),
            primary: rgb(primary),
            secondary: rgb(secondary),
            fast_wave: Vec::new(),
            slow_wave: Vec::new(),
        }
    }

    fn caption(&self) -> String {
        format!("{}... {}s", self.label, self.started.elapsed().as_secs())
    }

    // samples one period-normalized sine wave across `samples` points
    fn sample(wave: &mut Vec<(f64, f64)>, amplitude: f64, cycles: f64, phase: f64, samples: usize) {
        use std::f64::consts::TAU;
        wave.clear();
        wave.extend((0..samples).map(|i| {
            let x = i as f64 / samples as f64;
            (x, amplitude * (TAU * cycles * x + phase).sin())
        }));
    }

    fn render(&mut self, frame: &mut Frame, area: Rect) {
        let rows = Layout::default()
            .direction(Direction::Vertical)
            .constraints([Constraint::Length(1), Constraint::Min(1)])
            .split(area);

        frame.render_widget(
            Paragraph::new(Line::from(Span::styled(self.caption(), Style::default().fg(self.primary))))
                .alignment(Alignment::Center),
            rows[0],
        );

        // the fast wave breathes between 2 and 10 cycles every 8 seconds
        let t = self.started.elapsed().as_secs_f64();
        let phase = self.drift * t;
        let fast_cycles = 6.0 - 4.0 * (t * std::f64::consts::PI / 4.0).cos();
        let slow_cycles = 1.75 + 0.45 * (t * 0.3).sin();
        let samples = rows[1].width as usize;
        Self::sample(&mut self.fast_wave, 1.0, fast_cycles, phase, samples);
        Self::sample(&mut self.slow_wave, 0.8, slow_cycles, phase, samples);

        let datasets = vec![
            Dataset::default()
                .marker(Marker::Dot)
                .graph_type(GraphType::Scatter)
                .style(Style::default().fg(self.secondary))
                .data(&self.fast_wave),
            Dataset::default()
                .marker(Marker::Dot)
                .graph_type(GraphType::Scatter)
                .style(Style::default().fg(self.primary))
                .data(&self.slow_wave),
        ];
        let scope = Chart::new(datasets)
            .x_axis(Axis::default().bounds([0.0, 1.0]))
            .y_axis(Axis::default().bounds([-1.0, 1.0]));
        frame.render_widget(scope, rows[1]);
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::application::ApplicationState;
    use crate::approval::ApprovalGate;
    use crate::inline_image::{png_markdown, tests::tiny_png};
    use crate::transcript::{Transcript, Turn};
    use crossbeam::channel::bounded;
    use crossterm::event::{KeyEvent, KeyModifiers};

    struct Harness {
        chat: ChatState,
        requests: Receiver<ChatEngineRequest>,
        responses: Sender<ChatEngineResponse>,
    }

    fn harness() -> Harness {
        let (send_to_server, requests) = bounded(10);
        let (responses, recv_on_client) = bounded(10);
        Harness {
            chat: ChatState::new(ConfigurationFile::default(), send_to_server, recv_on_client),
            requests,
            responses,
        }
    }

    fn key(c: char) -> TerminalEvent {
        TerminalEvent::Key(KeyEvent::new(KeyCode::Char(c), KeyModifiers::NONE))
    }

    fn code(code: KeyCode) -> TerminalEvent {
        TerminalEvent::Key(KeyEvent::new(code, KeyModifiers::NONE))
    }

    fn offered(prompt: &str) -> SessionSnapshot {
        let mut transcript = Transcript::new();
        transcript.push(Turn::new("draw", "Sure"));
        SessionSnapshot {
            transcript,
            gate: ApprovalGate::AwaitingDecision(prompt.to_owned()),
        }
    }

    #[test]
    fn images_render_as_placeholders() {
        let png = tiny_png();
        let text = format!("Here it is\n\n{}", png_markdown(&png));
        let shown = assistant_display_text(&text);
        assert!(shown.starts_with("Here it is\n\n[image: png, "));
        assert!(shown.ends_with(" KB]"));
        assert!(!shown.contains("base64"));
        assert_eq!(assistant_display_text("plain"), "plain");
    }

    #[test]
    fn quotes_get_their_own_spans() {
        let text = Style::default().fg(Color::White);
        let quote = Style::default().fg(Color::Yellow);
        let mut in_quote = false;

        let spans = quote_spans("she said \"hi\" twice", &mut in_quote, text, quote);
        let pieces: Vec<(&str, Style)> =
            spans.iter().map(|s| (s.content.as_ref(), s.style)).collect();
        assert_eq!(
            pieces,
            vec![("she said ", text), ("\"hi\"", quote), (" twice", text)]
        );
        assert!(!in_quote);

        // an open quote runs on into the next line
        let spans = quote_spans("\"unfinished", &mut in_quote, text, quote);
        assert_eq!(spans.len(), 1);
        assert_eq!(spans[0].style, quote);
        assert!(in_quote);
        let spans = quote_spans("done\" ok", &mut in_quote, text, quote);
        assert_eq!(spans[0].content, "done\"");
        assert_eq!(spans[0].style, quote);
        assert_eq!(spans[1].style, text);
    }

    #[test]
    fn composing_sends_the_message() {
        let mut h = harness();
        h.chat.process_input(key('r'));
        for c in "hi there".chars() {
            h.chat.process_input(key(c));
        }
        h.chat.process_input(code(KeyCode::Enter));

        assert_eq!(
            h.requests.try_recv().unwrap(),
            ChatEngineRequest::SubmitMessage("hi there".to_owned())
        );
        assert_eq!(h.chat.waiting_on, Some(PendingWork::Reply));
        assert_eq!(h.chat.draft, None);
        assert_eq!(h.chat.pending_message.as_deref(), Some("hi there"));
    }

    #[test]
    fn blank_and_escaped_newline_drafts_are_not_sent() {
        let mut h = harness();
        h.chat.process_input(key('r'));
        h.chat.process_input(code(KeyCode::Enter));
        assert!(h.requests.try_recv().is_err());

        h.chat.process_input(TerminalEvent::Paste("line one\\n".to_owned()));
        h.chat.process_input(code(KeyCode::Enter));
        assert!(h.requests.try_recv().is_err());
        assert_eq!(h.chat.draft.as_deref(), Some("line one\n"));

        h.chat.process_input(code(KeyCode::Esc));
        assert_eq!(h.chat.draft, None);
    }

    #[test]
    fn approval_keys_follow_the_gate() {
        let mut h = harness();
        h.chat.process_input(key('y'));
        h.chat.process_input(key('n'));
        assert!(h.requests.try_recv().is_err());

        h.responses
            .send(ChatEngineResponse::SessionUpdated(offered("a cat")))
            .unwrap();
        h.chat.process_input(key('y'));
        assert_eq!(h.requests.try_recv().unwrap(), ChatEngineRequest::GenerateImage);
        assert_eq!(h.chat.waiting_on, Some(PendingWork::Image));

        // input is refused while the engine works
        h.chat.process_input(key('n'));
        assert!(h.requests.try_recv().is_err());
    }

    #[test]
    fn wait_label_names_the_outstanding_request() {
        let mut h = harness();
        h.chat.snapshot = offered("a dog");
        h.chat.process_input(key('n'));
        assert_eq!(h.requests.try_recv().unwrap(), ChatEngineRequest::SkipImage);
        assert_eq!(h.chat.waiting_on.map(PendingWork::label), Some("skipping the image"));

        let indicator = WaitIndicator::new(PendingWork::Image, [1, 2, 3], [4, 5, 6]);
        assert!(indicator.caption().starts_with("generating the image... "));
        assert_eq!(PendingWork::Reply.label(), "asking the text model");
    }

    #[test]
    fn snapshot_arrival_ends_the_wait() {
        let mut h = harness();
        h.chat.snapshot = offered("a dog");
        h.chat.process_input(key('n'));
        let _ = h.requests.try_recv();

        h.responses
            .send(ChatEngineResponse::SessionUpdated(SessionSnapshot {
                transcript: offered("a dog").transcript,
                gate: ApprovalGate::Idle,
            }))
            .unwrap();
        h.chat.process_incoming_chat_engine_messages();
        assert_eq!(h.chat.waiting_on, None);
        assert!(h.chat.indicator.is_none());
        assert!(!h.chat.snapshot.gate.is_awaiting_decision());
    }

    #[test]
    fn escape_returns_to_the_menu() {
        let mut h = harness();
        assert_eq!(
            h.chat.process_input(code(KeyCode::Esc)),
            ProcessInputResult::ChangeScene(ApplicationState::MainMenu)
        );
    }

    #[test]
    fn ctrl_c_quits_even_while_typing() {
        let mut h = harness();
        h.chat.process_input(key('r'));
        let ctrl_c = TerminalEvent::Key(KeyEvent::new(KeyCode::Char('c'), KeyModifiers::CONTROL));
        assert_eq!(h.chat.process_input(ctrl_c), ProcessInputResult::Quit);
    }

    #[test]
    fn help_box_swallows_keys_until_dismissed() {
        let mut h = harness();
        h.chat.process_input(key('?'));
        assert!(h.chat.message_box.is_some());
        h.chat.process_input(key('r'));
        assert_eq!(h.chat.draft, None);
        h.chat.process_input(code(KeyCode::Enter));
        assert!(h.chat.message_box.is_none());
    }

    #[test]
    fn chatlog_entries_skip_empty_user_text() {
        let mut h = harness();
        let mut transcript = Transcript::new();
        transcript.push(Turn::new("", "(Image generation failed: offline)"));
        transcript.push(Turn::new("hello", "hi"));
        h.chat.snapshot.transcript = transcript;
        h.chat.pending_message = Some("still there?".to_owned());

        let entries = h.chat.chatlog_entries();
        assert_eq!(entries.len(), 4);
        assert!(!entries[0].from_user);
        assert!(entries[1].from_user);
        assert_eq!(entries[2].text, "hi");
        assert_eq!(entries[3].text, "still there?");
    }

    #[test]
    fn entries_start_with_the_speaker_name() {
        let h = harness();
        let entry = ChatlogEntry {
            speaker: "Gemini".to_owned(),
            text: "first line\nsecond".to_owned(),
            from_user: false,
        };
        let lines = h.chat.entry_lines(&entry, 40);
        assert_eq!(lines.len(), 2);
        assert_eq!(lines[0].spans[0].content, "Gemini");
        assert_eq!(lines[0].spans[2].content, "first line");
        assert_eq!(lines[1].spans[0].content, "second");

        let empty = ChatlogEntry {
            speaker: "User".to_owned(),
            text: String::new(),
            from_user: true,
        };
        assert_eq!(h.chat.entry_lines(&empty, 40).len(), 1);
    }

    #[test]
    fn scrolling_stays_in_range() {
        let mut h = harness();
        h.chat.snapshot = offered("x");
        h.chat.snapshot.gate = ApprovalGate::Idle;
        for _ in 0..5 {
            h.chat.process_input(key('j'));
        }
        assert_eq!(h.chat.scroll, 1);
        h.chat.process_input(key('k'));
        h.chat.process_input(key('k'));
        assert_eq!(h.chat.scroll, 0);
    }
}
