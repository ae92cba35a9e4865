use std::path::{Path, PathBuf};

use directories::BaseDirs;
use ratatui::prelude::Alignment;
use serde::Deserialize;

use crate::gemini::DEFAULT_API_BASE;

pub const CURRENT_VERSION: u16 = 1;
pub const APPLICATION_CONFIG_FOLDER_NAME: &str = "image_chat";
pub const CONFIG_FILE_NAME: &str = "config.yaml";

// the only place the api key is ever read from
pub const API_KEY_ENV_VAR: &str = "GOOGLE_API_KEY";

pub const DEFAULT_TEXT_MODEL: &str = "gemini-2.5-flash-lite";
pub const DEFAULT_IMAGE_MODEL: &str = "gemini-2.5-flash-image-preview";

// generous, since image generation can take a while
const DEFAULT_REMOTE_TIMEOUT_S: u64 = 60 * 10;

pub const DEFAULT_SYSTEM_PROMPT: &str = r#"You are a helpful assistant.
Output ONLY a single valid JSON object. Do NOT include code fences or ```json markers.
Do NOT add any text before or after the JSON. The JSON must have EXACTLY these keys:
- "reply" (string): your chat reply to display to the user.
- "want_image" (boolean): true only if an image would help or was requested.
- "image_prompt" (string): a short, specific prompt to generate the image if want_image is true, else "".
Example:
{"reply":"Hello there!","want_image":false,"image_prompt":""}"#;

#[derive(Deserialize, PartialEq, Debug, Clone)]
pub enum Justification {
    Left,
    Right,
    Center,
}
impl From<Justification> for Alignment {
    fn from(value: Justification) -> Self {
        match value {
            Justification::Center => Alignment::Center,
            Justification::Left => Alignment::Left,
            Justification::Right => Alignment::Right,
        }
    }
}

// the pair of models a chat session talks to
#[derive(Clone, Debug, PartialEq)]
pub struct ModelSelection {
    pub text_model: String,
    pub image_model: String,
}
impl Default for ModelSelection {
    fn default() -> Self {
        Self {
            text_model: DEFAULT_TEXT_MODEL.to_owned(),
            image_model: DEFAULT_IMAGE_MODEL.to_owned(),
        }
    }
}

#[derive(Deserialize, PartialEq, Debug, Clone)]
#[serde(default)]
pub struct ConfigurationFile {
    // version number for the file which should be incremented on breaking changes
    pub version: u16,

    // the name shown for the user's turns in the chat log
    pub display_name: String,

    // the name shown for the model's turns in the chat log
    pub assistant_name: String,

    // the model that answers chat messages with the JSON reply
    pub text_model: String,

    // the model asked for images once the user approves one
    pub image_model: String,

    // the root of the Gemini REST API, without a trailing slash
    pub api_base: String,

    // the number of seconds to wait for either call before giving up
    pub remote_timeout_s: u64,

    // replaces the built-in instruction that asks for the JSON reply
    pub system_prompt: Option<String>,

    // the color to use for the display name of the user in the chat log.
    pub display_name_rgb: Option<[u8; 3]>,

    // the color to use for the assistant's name in the chat log.
    pub assistant_name_rgb: Option<[u8; 3]>,

    // the color to use for text in quotes in the chat log.
    pub quotes_rgb: Option<[u8; 3]>,

    // the color to use for the normal, unquoted text in the chat log.
    pub text_rgb: Option<[u8; 3]>,

    // the foreground RGB color of the 'primary' element in the progress bar
    pub progress_primary_rgb: Option<[u8; 3]>,

    // the foreground RGB color of the 'secondary' element in the progress bar
    pub progress_secondary_rgb: Option<[u8; 3]>,

    // optional setting to determine how the text should be justified.
    pub chat_text_justification: Option<Justification>,

    // optional setting to add a 'buffer' between chatlog items to aid in visually grouping them.
    pub add_visual_buffer_between_chatlog_items: Option<bool>,
}

impl Default for ConfigurationFile {
    fn default() -> Self {
        ConfigurationFile {
            version: CURRENT_VERSION,
            display_name: "User".to_owned(),
            assistant_name: "Gemini".to_owned(),
            text_model: DEFAULT_TEXT_MODEL.to_owned(),
            image_model: DEFAULT_IMAGE_MODEL.to_owned(),
            api_base: DEFAULT_API_BASE.to_owned(),
            remote_timeout_s: DEFAULT_REMOTE_TIMEOUT_S,
            system_prompt: None,
            display_name_rgb: None,
            assistant_name_rgb: None,
            quotes_rgb: None,
            text_rgb: None,
            progress_primary_rgb: None,
            progress_secondary_rgb: None,
            chat_text_justification: None,
            add_visual_buffer_between_chatlog_items: None,
        }
    }
}

impl ConfigurationFile {
    // loads the configuration file by using the alternative path specified or by searching
    // common locations for the config file to load.
    // if those fail to find a file, then a new configuration object is constructed with defaults and returned.
    pub fn load_config(alt_config_filepath: Option<&String>) -> ConfigurationFile {
        let filepath: Option<PathBuf> = locate_config_file(CONFIG_FILE_NAME, alt_config_filepath);

        if let Some(found_file) = filepath {
            match Self::load_from_file(&found_file) {
                Ok(cfg) => return cfg,
                Err(err) => log::error!("{:#}", err),
            }
        }

        // if we made it here, no config file was found, or if it was found, it could not be deserialized as yaml.
        log::warn!(
            "Using a default configuration file from memory since none were located to be read."
        );
        Default::default()
    }

    pub fn load_from_file(filepath: &Path) -> anyhow::Result<ConfigurationFile> {
        use anyhow::Context;

        let plain_string = std::fs::read_to_string(filepath)
            .with_context(|| format!("Failed to load the configuration file ({:?})", filepath))?;
        let cfg = serde_yaml::from_str::<ConfigurationFile>(plain_string.as_str()).with_context(
            || format!("Failed to deserialize the configuration file ({:?})", filepath),
        )?;
        if cfg.version != CURRENT_VERSION {
            log::warn!(
                "Configuration file ({:?}) is version {} but version {} is expected.",
                filepath,
                cfg.version,
                CURRENT_VERSION
            );
        }
        Ok(cfg)
    }

    // the system instruction that asks the text model for the JSON reply
    pub fn system_prompt(&self) -> &str {
        match &self.system_prompt {
            Some(prompt) if !prompt.trim().is_empty() => prompt.as_str(),
            _ => DEFAULT_SYSTEM_PROMPT,
        }
    }

    // the configured models with any command-line overrides applied
    pub fn model_selection(
        &self,
        text_override: Option<&String>,
        image_override: Option<&String>,
    ) -> ModelSelection {
        ModelSelection {
            text_model: text_override.unwrap_or(&self.text_model).to_owned(),
            image_model: image_override.unwrap_or(&self.image_model).to_owned(),
        }
    }
}

// loads a configuration file in the following order:
//  1) alternate path provided as parameter
//  2) 'platform' config folder (e.g. /home/alice/.config or C:\Users\Alice\AppData\Roaming or /Users/Alice/Library/Application Support)
//  3) next to the binary in the working folder
pub fn locate_config_file(filename: &str, alt_path: Option<&String>) -> Option<PathBuf> {
    // specified alternate config file
    if let Some(alt) = alt_path {
        let p = Path::new(alt.as_str());
        if p.exists() {
            return Some(p.to_path_buf());
        }
        log::warn!("The configuration file {:?} does not exist; searching elsewhere.", p);
    }

    // try the 'platform' config file location
    if let Some(base_dirs) = BaseDirs::new() {
        let p = Path::new(&base_dirs.config_dir())
            .join(APPLICATION_CONFIG_FOLDER_NAME)
            .join(filename);
        if p.exists() {
            return Some(p);
        }
    }

    // last attempt, look parallel next to the executable
    let p = Path::new(filename);
    if p.exists() {
        return Some(p.to_path_buf());
    }

    None
}

// loads the optional .env file into the process environment and then returns the
// api key, if one is set and isn't blank.
pub fn load_api_key(env_file: Option<&String>) -> Option<String> {
    if let Some(env_path) = env_file {
        match dotenvy::from_path(env_path) {
            Ok(()) => log::debug!("Loaded environment variables from {}", env_path),
            Err(err) if err.not_found() => {
                log::debug!("No environment file at {}", env_path)
            }
            Err(err) => log::warn!("Failed to read the environment file {}: {}", env_path, err),
        }
    }

    std::env::var(API_KEY_ENV_VAR)
        .ok()
        .map(|key| key.trim().to_owned())
        .filter(|key| !key.is_empty())
}
