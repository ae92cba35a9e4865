use crossterm::event::KeyCode;
use ratatui::{
    prelude::{Alignment, Constraint, Direction, Layout},
    style::{Color, Style, Stylize},
    text::{Line, Span},
    widgets::Paragraph,
};

use crate::{
    config::{ModelSelection, API_KEY_ENV_VAR},
    tui::{is_quit_key, Frame, ProcessInputResult, TerminalEvent, TerminalRenderable},
};

pub struct MainMenuState {
    // shown under the title so it's clear what is being talked to
    text_model: String,
    image_model: String,

    // without a key, chatting still works but only answers with a notice
    has_api_key: bool,
}
impl MainMenuState {
    pub fn new(models: &ModelSelection, has_api_key: bool) -> Self {
        Self {
            text_model: models.text_model.clone(),
            image_model: models.image_model.clone(),
            has_api_key,
        }
    }
}
impl TerminalRenderable for MainMenuState {
    fn process_input(&mut self, event: TerminalEvent) -> ProcessInputResult {
        if let TerminalEvent::Key(key) = event {
            if key.code == KeyCode::Char('q') || is_quit_key(&key) {
                return ProcessInputResult::Quit;
            }
            if key.code == KeyCode::Char('c') || key.code == KeyCode::Enter {
                return ProcessInputResult::ChangeScene(
                    crate::application::ApplicationState::Chat,
                );
            }
        }

        ProcessInputResult::None
    }

    fn render(&mut self, frame: &mut Frame) {
        let dim = Style::default().fg(Color::Rgb(120, 120, 120));
        let key_status = if self.has_api_key {
            Span::styled(
                format!("{} found", API_KEY_ENV_VAR),
                Style::default().fg(Color::LightGreen),
            )
        } else {
            Span::styled(
                format!("{} missing: replies will only be a notice", API_KEY_ENV_VAR),
                Style::default().fg(Color::LightRed),
            )
        };

        let main_title_seq = vec![
            Line::from("Image Chat".bold()),
            Line::from("----------"),
            Line::from(Span::styled(format!("text:  {}", self.text_model), dim)),
            Line::from(Span::styled(format!("image: {}", self.image_model), dim)),
            Line::from(key_status),
            Line::from(""),
            Line::from("(c)hat"),
            Line::from(""),
            Line::from("(q)uit"),
        ];

        let hchunks = Layout::default()
            .direction(Direction::Horizontal)
            .constraints(
                [
                    Constraint::Percentage(20),
                    Constraint::Percentage(60),
                    Constraint::Percentage(20),
                ]
                .as_ref(),
            )
            .split(frame.size());

        let vchunks = Layout::default()
            .direction(Direction::Vertical)
            .constraints([Constraint::Percentage(20), Constraint::Min(9)].as_ref())
            .split(hchunks[1]);

        let title = Paragraph::new(main_title_seq).alignment(Alignment::Center);
        frame.render_widget(title, vchunks[1]);
    }
}
