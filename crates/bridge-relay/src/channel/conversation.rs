//! Conversation state machine.

/// Where a persistent conversation stands.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum ConversationState {
    /// Waiting for the UI component to ask for its payload.
    Opened,
    /// Payload delivered; waiting for the answer.
    AwaitingData,
    /// The UI component answered.
    Completed,
    /// The scope went away first.
    Cancelled,
}

/// Inputs that move a conversation along.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ConversationEvent {
    DataRequested,
    DataReturned,
    ScopeDestroyed,
}

impl ConversationState {
    /// The single transition function. `None` means the event is ignored.
    ///
    /// Terminal states accept nothing, which is what makes the race between
    /// an answer and scope destruction resolve exactly once.
    pub fn transition(self, event: ConversationEvent) -> Option<ConversationState> {
        use ConversationEvent::*;
        use ConversationState::*;

        match (self, event) {
            (Completed | Cancelled, _) => None,
            // A reloaded popup may ask again.
            (Opened | AwaitingData, DataRequested) => Some(AwaitingData),
            (Opened | AwaitingData, DataReturned) => Some(Completed),
            (Opened | AwaitingData, ScopeDestroyed) => Some(Cancelled),
        }
    }

    pub fn is_terminal(self) -> bool {
        matches!(self, ConversationState::Completed | ConversationState::Cancelled)
    }
}
