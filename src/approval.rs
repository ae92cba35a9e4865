// The user-facing decisions available while an image offer is open.
#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub enum GateAction {
    Generate,
    Skip,
}

// Holds at most one image prompt waiting for the user to approve or skip it.
//
// There is no timeout: an offer stays open until one of the two actions
// consumes it.
#[derive(Clone, Debug, Default, PartialEq)]
pub enum ApprovalGate {
    #[default]
    Idle,
    AwaitingDecision(String),
}
impl ApprovalGate {
    // opens the gate for the given prompt; blank prompts leave it idle.
    // returns true if an offer is now open.
    pub fn offer(&mut self, prompt: &str) -> bool {
        let prompt = prompt.trim();
        if prompt.is_empty() {
            *self = ApprovalGate::Idle;
            return false;
        }
        if let ApprovalGate::AwaitingDecision(previous) = self {
            log::debug!("Replacing the unanswered image offer: {}", previous);
        }
        *self = ApprovalGate::AwaitingDecision(prompt.to_owned());
        true
    }

    // consumes the pending prompt for generation, leaving the gate idle
    pub fn take(&mut self) -> Option<String> {
        match std::mem::take(self) {
            ApprovalGate::AwaitingDecision(prompt) => Some(prompt),
            ApprovalGate::Idle => None,
        }
    }

    // drops the pending prompt without using it
    pub fn skip(&mut self) {
        *self = ApprovalGate::Idle;
    }

    pub fn pending_prompt(&self) -> Option<&str> {
        match self {
            ApprovalGate::AwaitingDecision(prompt) => Some(prompt.as_str()),
            ApprovalGate::Idle => None,
        }
    }

    pub fn is_awaiting_decision(&self) -> bool {
        matches!(self, ApprovalGate::AwaitingDecision(_))
    }

    // the actions a UI should expose for the current state
    pub fn enabled_actions(&self) -> &'static [GateAction] {
        match self {
            ApprovalGate::Idle => &[],
            ApprovalGate::AwaitingDecision(_) => &[GateAction::Generate, GateAction::Skip],
        }
    }
}
