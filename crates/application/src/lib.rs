//! 应用层实现。
//!
//! 实时同步的核心：在线注册表、房间管理、连接会话、消息扇出、
//! 已读回执合并与输入状态转发。存储与身份校验通过 trait 注入，
//! 具体实现在基础设施层和 Web 层。

pub mod background;
pub mod clock;
pub mod connection;
pub mod conversations;
pub mod error;
pub mod fanout;
pub mod identity;
pub mod presence;
pub mod read_receipts;
pub mod realtime;
pub mod repository;
pub mod rooms;
pub mod session;
pub mod typing;

pub use clock::{Clock, SystemClock};
pub use connection::{fan_out, ConnectionHandle, DeliveryError, DeliveryReport};
pub use conversations::{
    ConversationService, CreateConversation, HistoryPage, HistoryQuery, UpdateGroup,
    DEFAULT_PAGE_SIZE, MAX_PAGE_SIZE,
};
pub use error::{ApplicationError, ApplicationResult};
pub use fanout::{MessageFanoutEngine, SubmitMessage, SubmitOutcome};
pub use identity::IdentityResolver;
pub use presence::{PresenceChange, PresenceRegistry, PresenceUpdate};
pub use read_receipts::{ReadOrigin, ReadOutcome, ReadReceiptAggregator};
pub use realtime::{Realtime, RealtimeDependencies, RealtimeSettings};
pub use repository::{ConversationRepository, MessageRepository, UserRepository};
pub use rooms::RoomManager;
pub use session::{ConnectionSession, SessionState};
pub use typing::TypingRelay;
