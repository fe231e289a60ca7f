//! Persistent conversations between the privileged context and a UI
//! component (e.g. an approval popup).
//!
//! The requester lives in the UI component and asks for its payload; the
//! responder lives in the privileged context and waits for the answer or for
//! the component's scope to be destroyed, whichever comes first.

pub mod conversation;
pub mod requester;
pub mod responder;

pub use conversation::{ConversationEvent, ConversationState};
pub use requester::{ChannelRequester, CHANNEL_NAME};
pub use responder::{ChannelResponder, ConversationId, PendingConversation};
