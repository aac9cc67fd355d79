pub mod auto_message;
pub mod conversation;
pub mod user;

pub use auto_message::{AutoMessage, AutoMessageStatus, NewAutoMessage};
pub use conversation::{ChatMessage, Conversation, MessageType};
pub use user::User;
