//! Live chat between anonymous visitors and support staff
//!
//! - `ChatStore` / `MemoryChatStore`: persisted conversations and settings
//! - `MessageRelay`: persist a message, then broadcast it
//! - `AutoResponder`: canned replies to visitor text messages
//! - `visitor`: ids, user-agent screening, device labels

pub mod auto_reply;
pub mod memory;
pub mod models;
pub mod relay;
pub mod store;
pub mod visitor;

pub use auto_reply::{find_reply, AutoResponder, CannedReply, ReplySource};
pub use memory::MemoryChatStore;
pub use models::{
    AdminAccount, AutoReply, ChatMessage, CommonQuestion, MessageType, MessageView, NewMessage,
    Settings, Visitor, WelcomeMessage,
};
pub use relay::{Delivery, MessageRelay, PublishOutcome};
pub use store::ChatStore;
