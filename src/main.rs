use anyhow::{Context, Result};
use application::Application;

use chat_engine::{ChatEngine, ChatEngineResponse};
use gemini::{GeminiClient, GenerativeService};
use session::ChatSession;
use simple_logger::SimpleLogger;
use tui::Tui;

mod application;
mod approval;
mod chat;
mod chat_engine;
mod config;
mod gemini;
mod inline_image;
mod main_menu;
mod normalizer;
mod session;
mod transcript;
mod tui;

// This is how long the timeout should be in milliseconds for the terminal's backend
const INPUT_THREAD_READ_TIMEOUT_MS: u64 = 1000 / 4;
const UI_DRAW_TICK_RATE: u64 = 1000 / 30;

fn main() -> Result<()> {
    // parse the command-line arguments
    let cmd_arg_matches = clap::Command::new("image_chat")
        .about("image_chat: a terminal chat with Gemini that can offer to draw pictures.")
        .arg(
            clap::Arg::new("config-file")
                .short('c')
                .long("config-file")
                .action(clap::ArgAction::Set)
                .value_name("FILE")
                .help("Specifies the configuration file to load instead of searching for config.yaml."),
        )
        .arg(
            clap::Arg::new("env-file")
                .short('e')
                .long("env-file")
                .default_value(".env")
                .action(clap::ArgAction::Set)
                .value_name("FILE")
                .help("An environment file to read GOOGLE_API_KEY from, if present."),
        )
        .arg(
            clap::Arg::new("text-model")
                .long("text-model")
                .action(clap::ArgAction::Set)
                .value_name("MODEL")
                .help("Overrides the configured model used for chat replies."),
        )
        .arg(
            clap::Arg::new("image-model")
                .long("image-model")
                .action(clap::ArgAction::Set)
                .value_name("MODEL")
                .help("Overrides the configured model used for image generation."),
        )
        .get_matches();

    SimpleLogger::new()
        .with_level(log::LevelFilter::Warn)
        .env()
        .with_colors(true)
        .init()
        .context("failed to initialize the logger")?;

    // ***********************************************************************
    // load the configuration file and the api key for the application.
    let config =
        config::ConfigurationFile::load_config(cmd_arg_matches.get_one::<String>("config-file"));
    let models = config.model_selection(
        cmd_arg_matches.get_one::<String>("text-model"),
        cmd_arg_matches.get_one::<String>("image-model"),
    );

    // without a key the session still runs, it just answers with a notice
    let service: Option<Box<dyn GenerativeService>> =
        match config::load_api_key(cmd_arg_matches.get_one::<String>("env-file")) {
            Some(api_key) => {
                match GeminiClient::new(&api_key, &config.api_base, config.remote_timeout_s) {
                    Ok(client) => Some(Box::new(client)),
                    Err(err) => {
                        log::error!("Unable to create the Gemini client: {:#}", err);
                        None
                    }
                }
            }
            None => {
                log::warn!("{} is not set; chatting will be disabled.", config::API_KEY_ENV_VAR);
                None
            }
        };

    let session = ChatSession::new(service, models.clone(), config.system_prompt());
    let has_api_key = session.has_service();

    // ***********************************************************************
    // Spawn the chat engine thread and wait here for it to respond.
    let engine = ChatEngine::spawn(session);
    let res = engine
        .recv_on_client
        .recv()
        .context("the chat engine thread stopped before it reported ready")?;
    if res != ChatEngineResponse::Ready {
        log::error!("First ChatEngineResponse wasn't Ready. Suspect problems if that wasn't planned")
    }

    // ***********************************************************************
    // setup the terminal and run the loop, hoping to restore terminal on exit.
    let mut tui = Tui::new(INPUT_THREAD_READ_TIMEOUT_MS)
        .context("failed to create the terminal interface")?;
    Tui::enable().context("should have been able to start the terminal interface")?;

    // **********************************************************************
    // run the actual app
    let mut app = Application::new(&mut tui, config, &models, has_api_key, engine);
    if let Err(err) = app.run(UI_DRAW_TICK_RATE) {
        log::error!("Application loop failed: {err:#}")
    }

    // tell the engine to shut down ... and try to wait for it to happen.
    app.engine.shutdown();

    // ***************************************************************
    // restore the terminal now that the application is quitting.
    Tui::disable().context("failed to disable the terminal interface")?;

    Ok(())
}
