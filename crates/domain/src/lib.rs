//! 聊天系统核心领域模型
//!
//! 包含用户、会话、消息等实体，以及实时通道上的事件定义。

pub mod conversation;
pub mod errors;
pub mod events;
pub mod message;
pub mod user;
pub mod value_objects;

// 重新导出常用类型
pub use conversation::Conversation;
pub use errors::{DomainError, DomainResult, RepositoryError, RepositoryResult};
pub use events::{
    ClientEvent, MessagesReadPayload, SendMessagePayload, ServerEvent, TypingScope, TypingTarget,
};
pub use message::{MediaDescriptor, Message, MessageType, MessageView, ReadMarker};
pub use user::{User, UserIdentity};
pub use value_objects::{ConnectionId, ConversationId, MessageId, Timestamp, UserId};
