use std::time::{Duration, Instant};

use anyhow::{Context, Result};

use crate::{
    chat::ChatState,
    chat_engine::ChatEngine,
    config::{ConfigurationFile, ModelSelection},
    main_menu::MainMenuState,
    tui::{ProcessInputResult, TerminalRenderable, Tui},
};

// The scene currently shown.
#[derive(PartialEq, Debug, Clone, Copy)]
pub enum ApplicationState {
    MainMenu,
    Chat,
}

pub struct Application<'a> {
    terminal: &'a mut Tui,

    // the worker thread that owns the chat session
    pub engine: ChatEngine,

    current_state: ApplicationState,
    mainmenu_state: MainMenuState,

    // lives for the whole run so the transcript survives a trip back to the menu
    chat_state: ChatState,
}
impl<'a> Application<'a> {
    pub fn new(
        terminal: &'a mut Tui,
        config: ConfigurationFile,
        models: &ModelSelection,
        has_api_key: bool,
        engine: ChatEngine,
    ) -> Application<'a> {
        let chat_state = ChatState::new(
            config,
            engine.send_to_server.clone(),
            engine.recv_on_client.clone(),
        );
        Application {
            terminal,
            engine,
            current_state: ApplicationState::MainMenu,
            mainmenu_state: MainMenuState::new(models, has_api_key),
            chat_state,
        }
    }

    // Draws the active scene at most once per `frame_interval_ms` and feeds it the
    // queued input, until a scene asks to quit.
    pub fn run(&mut self, frame_interval_ms: u64) -> Result<()> {
        let frame_interval = Duration::from_millis(frame_interval_ms);
        let mut next_frame = Instant::now();
        loop {
            // engine replies land even while the menu is showing
            self.chat_state.process_incoming_chat_engine_messages();

            let scene: &mut dyn TerminalRenderable = match self.current_state {
                ApplicationState::MainMenu => &mut self.mainmenu_state,
                ApplicationState::Chat => &mut self.chat_state,
            };

            if Instant::now() >= next_frame {
                self.terminal
                    .draw(scene)
                    .with_context(|| format!("failed to draw the {:?} scene", self.current_state))?;
                next_frame = Instant::now() + frame_interval;
            }

            match self.terminal.process_input(scene) {
                ProcessInputResult::Quit => return Ok(()),
                ProcessInputResult::ChangeScene(next) => {
                    log::debug!("Switching from {:?} to {:?}", self.current_state, next);
                    self.current_state = next;
                }
                ProcessInputResult::None => std::thread::sleep(Duration::from_millis(2)),
            }
        }
    }
}
