use std::thread;

use crossbeam::channel::{bounded, Receiver, Sender};

use crate::session::{ChatSession, SessionSnapshot};

#[derive(Clone, Debug, PartialEq)]
pub enum ChatEngineRequest {
    SubmitMessage(String),
    GenerateImage,
    SkipImage,
    ImmediateShutdown,
}

#[derive(Clone, Debug, PartialEq)]
pub enum ChatEngineResponse {
    SessionUpdated(SessionSnapshot),
    Ready,
}

// The worker thread that owns the chat session. Requests are handled one at a
// time and each one is answered with a fresh snapshot of the session, so the
// blocking network calls never stall the terminal drawing.
pub struct ChatEngine {
    pub send_to_server: Sender<ChatEngineRequest>,
    pub recv_on_client: Receiver<ChatEngineResponse>,
    pub handle: thread::JoinHandle<()>,
}
impl ChatEngine {
    pub fn spawn(session: ChatSession) -> ChatEngine {
        let (send_to_server, recv_on_server) = bounded::<ChatEngineRequest>(10);
        let (send_to_client, recv_on_client) = bounded::<ChatEngineResponse>(10);
        let thread_handle = thread::spawn(move || {
            let mut session = session;

            // tell the main thread that we're up.
            if let Err(err) = send_to_client.send(ChatEngineResponse::Ready) {
                log::error!("ChatEngine thread couldn't report that it started: {}", err);
                return;
            }

            loop {
                // BLOCK UNTIL NEW REQUEST
                let request = match recv_on_server.recv() {
                    Ok(request) => request,
                    Err(err) => {
                        log::debug!("ChatEngine request channel closed: {}", err);
                        return;
                    }
                };

                match request {
                    ChatEngineRequest::ImmediateShutdown => {
                        return;
                    }
                    ChatEngineRequest::SubmitMessage(message) => {
                        session.submit_message(&message);
                        if let Some(prompt) = session.gate().pending_prompt() {
                            log::debug!("The model offered an image: {}", prompt);
                        }
                    }
                    ChatEngineRequest::GenerateImage => session.generate_image(),
                    ChatEngineRequest::SkipImage => session.skip_image(),
                };

                // SEND THE RESULT FROM THE SERVER
                let result = ChatEngineResponse::SessionUpdated(session.snapshot());
                if let Err(err) = send_to_client.send(result) {
                    log::error!("ChatEngine thread's send failed: {}", err);
                }
                log::trace!(
                    "One job-cycle complete in the chat engine thread; {} turns.",
                    session.transcript().len()
                );
            }
        });

        ChatEngine {
            send_to_server,
            recv_on_client,
            handle: thread_handle,
        }
    }

    // asks the worker to stop and waits for it to finish
    pub fn shutdown(self) {
        match self
            .send_to_server
            .try_send(ChatEngineRequest::ImmediateShutdown)
        {
            Ok(()) => {
                let _ = self.handle.join();
            }
            Err(err) => log::error!("Failed to shutdown the chat engine thread: {err}"),
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::approval::ApprovalGate;
    use crate::config::ModelSelection;
    use crate::session::tests::ScriptedService;
    use std::time::Duration;

    const WAIT: Duration = Duration::from_secs(10);

    fn next_snapshot(engine: &ChatEngine) -> SessionSnapshot {
        match engine.recv_on_client.recv_timeout(WAIT) {
            Ok(ChatEngineResponse::SessionUpdated(snapshot)) => snapshot,
            other => panic!("expected a session update, got {:?}", other),
        }
    }

    #[test]
    fn engine_runs_the_whole_approval_flow() {
        let service = ScriptedService::replying(
            "{\"reply\":\"Here you go\",\"want_image\":true,\"image_prompt\":\"a cat\"}",
        );
        let session = ChatSession::new(Some(Box::new(service)), ModelSelection::default(), "SYS");
        let engine = ChatEngine::spawn(session);

        assert_eq!(
            engine.recv_on_client.recv_timeout(WAIT).unwrap(),
            ChatEngineResponse::Ready
        );

        engine
            .send_to_server
            .send(ChatEngineRequest::SubmitMessage("draw a cat".to_owned()))
            .unwrap();
        let snapshot = next_snapshot(&engine);
        assert_eq!(snapshot.transcript.len(), 1);
        assert_eq!(snapshot.gate.pending_prompt(), Some("a cat"));

        engine
            .send_to_server
            .send(ChatEngineRequest::GenerateImage)
            .unwrap();
        let snapshot = next_snapshot(&engine);
        assert_eq!(snapshot.gate, ApprovalGate::Idle);
        assert!(snapshot
            .transcript
            .last()
            .unwrap()
            .assistant_text
            .contains("data:image/png;base64,"));

        engine.shutdown();
    }

    #[test]
    fn skip_is_answered_with_a_closed_gate() {
        let service = ScriptedService::replying(
            "{\"reply\":\"Maybe\",\"want_image\":true,\"image_prompt\":\"a dog\"}",
        );
        let session = ChatSession::new(Some(Box::new(service)), ModelSelection::default(), "SYS");
        let engine = ChatEngine::spawn(session);
        let _ = engine.recv_on_client.recv_timeout(WAIT);

        engine
            .send_to_server
            .send(ChatEngineRequest::SubmitMessage("a dog?".to_owned()))
            .unwrap();
        let offered = next_snapshot(&engine);
        assert!(offered.gate.is_awaiting_decision());

        engine.send_to_server.send(ChatEngineRequest::SkipImage).unwrap();
        let skipped = next_snapshot(&engine);
        assert_eq!(skipped.gate, ApprovalGate::Idle);
        assert_eq!(skipped.transcript, offered.transcript);

        engine.shutdown();
    }
}
