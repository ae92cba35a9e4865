use anyhow::{anyhow, Result};

use crate::{
    approval::ApprovalGate,
    config::{ModelSelection, API_KEY_ENV_VAR},
    gemini::GenerativeService,
    inline_image::{png_markdown, read_image_from_stream, reencode_as_png},
    normalizer::normalize_reply,
    transcript::{Transcript, Turn},
};

pub const NO_TEXT_RECEIVED: &str = "(No text received from the model.)";
pub const EMPTY_REPLY: &str = "(Empty reply)";
pub const NO_IMAGE_RECEIVED: &str = "(No image data received)";

pub fn no_api_key_notice() -> String {
    format!("No {} configured.", API_KEY_ENV_VAR)
}

// What a chat turn decided about offering an image.
#[derive(Clone, Debug, Default, PartialEq)]
pub struct ChatTurnOutcome {
    // set only when the model asked for an image and gave a usable prompt
    pub image_prompt: Option<String>,
}

// builds the single prompt string sent to the text model: the instruction, the
// flattened history and the new message waiting for the assistant's answer.
pub fn build_prompt(system_prompt: &str, transcript: &Transcript, message: &str) -> String {
    let mut buf = String::new();
    buf.push_str(system_prompt);
    buf.push_str("\n\n");
    buf.push_str(&transcript.flatten_for_prompt());
    buf.push_str("User: ");
    buf.push_str(message);
    buf.push_str("\nAssistant:");
    buf
}

// Handles one submitted message: asks the text model, normalizes its reply and
// appends the new turn to `transcript`.
//
// Every failure ends up as a transcript notice; nothing is returned as an error.
pub fn run_chat_turn(
    service: Option<&dyn GenerativeService>,
    models: &ModelSelection,
    system_prompt: &str,
    message: &str,
    transcript: &mut Transcript,
) -> ChatTurnOutcome {
    let Some(service) = service else {
        transcript.push(Turn::new(message, &no_api_key_notice()));
        return ChatTurnOutcome::default();
    };

    let prompt = build_prompt(system_prompt, transcript, message);
    let raw = match service.generate_text(&models.text_model, &prompt) {
        Ok(text) => text.trim().to_owned(),
        Err(err) => {
            log::error!("Text generation failed: {:#}", err);
            transcript.push(Turn::new(
                message,
                &format!("(Text generation failed: {:#})", err),
            ));
            return ChatTurnOutcome::default();
        }
    };

    if raw.is_empty() {
        log::warn!("The text model returned an empty response.");
        transcript.push(Turn::new(message, NO_TEXT_RECEIVED));
        return ChatTurnOutcome::default();
    }

    let parsed = normalize_reply(&raw);
    let reply = parsed.reply.trim();
    let image_prompt = parsed.image_prompt.trim();
    transcript.push(Turn::new(
        message,
        if reply.is_empty() { EMPTY_REPLY } else { reply },
    ));

    if parsed.want_image && !image_prompt.is_empty() {
        ChatTurnOutcome {
            image_prompt: Some(image_prompt.to_owned()),
        }
    } else {
        ChatTurnOutcome::default()
    }
}

// streams an image for the prompt and returns its markdown, or None if the
// stream finished without any image data.
fn generate_image_markdown(
    service: Option<&dyn GenerativeService>,
    image_model: &str,
    prompt: &str,
) -> Result<Option<String>> {
    let service = service.ok_or_else(|| anyhow!(no_api_key_notice()))?;
    let stream = service.generate_image_stream(image_model, prompt)?;
    match read_image_from_stream(stream)? {
        Some(bytes) => {
            let png = reencode_as_png(&bytes)?;
            Ok(Some(png_markdown(&png)))
        }
        None => Ok(None),
    }
}

// Generates an image for `prompt` and attaches the result (or a notice about
// why there is none) to the last turn of the transcript.
//
// An empty prompt leaves the transcript untouched.
pub fn run_image_generation(
    service: Option<&dyn GenerativeService>,
    image_model: &str,
    prompt: &str,
    transcript: &mut Transcript,
) {
    if prompt.is_empty() {
        return;
    }

    match generate_image_markdown(service, image_model, prompt) {
        Ok(Some(markdown)) => transcript.amend_last(&markdown),
        Ok(None) => {
            log::warn!("The image stream ended without any image data.");
            transcript.amend_last(NO_IMAGE_RECEIVED);
        }
        Err(err) => {
            log::error!("Image generation failed: {:#}", err);
            transcript.amend_last(&format!("(Image generation failed: {:#})", err));
        }
    }
}

// A copy of the session state handed to the UI after each request.
#[derive(Clone, Debug, Default, PartialEq)]
pub struct SessionSnapshot {
    pub transcript: Transcript,
    pub gate: ApprovalGate,
}

// The per-session state: the injected service, the transcript and the one
// pending image decision.
pub struct ChatSession {
    service: Option<Box<dyn GenerativeService>>,
    models: ModelSelection,
    system_prompt: String,
    transcript: Transcript,
    gate: ApprovalGate,
}
impl ChatSession {
    pub fn new(
        service: Option<Box<dyn GenerativeService>>,
        models: ModelSelection,
        system_prompt: &str,
    ) -> Self {
        Self {
            service,
            models,
            system_prompt: system_prompt.to_owned(),
            transcript: Transcript::new(),
            gate: ApprovalGate::Idle,
        }
    }

    pub fn has_service(&self) -> bool {
        self.service.is_some()
    }

    pub fn transcript(&self) -> &Transcript {
        &self.transcript
    }

    pub fn gate(&self) -> &ApprovalGate {
        &self.gate
    }

    pub fn snapshot(&self) -> SessionSnapshot {
        SessionSnapshot {
            transcript: self.transcript.clone(),
            gate: self.gate.clone(),
        }
    }

    // runs a chat turn for the message and opens the gate if an image was offered.
    // blank messages are ignored.
    pub fn submit_message(&mut self, message: &str) -> ChatTurnOutcome {
        if message.trim().is_empty() {
            return ChatTurnOutcome::default();
        }

        let outcome = run_chat_turn(
            self.service.as_deref(),
            &self.models,
            &self.system_prompt,
            message,
            &mut self.transcript,
        );
        match &outcome.image_prompt {
            Some(prompt) => {
                self.gate.offer(prompt);
            }
            None => self.gate.skip(),
        }
        outcome
    }

    // the approve action: consumes the pending prompt and generates the image.
    pub fn generate_image(&mut self) {
        let prompt = self.gate.take().unwrap_or_default();
        run_image_generation(
            self.service.as_deref(),
            &self.models.image_model,
            &prompt,
            &mut self.transcript,
        );
    }

    // the skip action: drops the pending prompt, transcript unchanged
    pub fn skip_image(&mut self) {
        self.gate.skip();
    }
}
