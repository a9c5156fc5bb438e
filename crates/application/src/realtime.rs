use std::sync::Arc;
use std::time::Duration;

use crate::clock::Clock;
use crate::conversations::ConversationService;
use crate::fanout::MessageFanoutEngine;
use crate::identity::IdentityResolver;
use crate::presence::PresenceRegistry;
use crate::read_receipts::ReadReceiptAggregator;
use crate::repository::{ConversationRepository, MessageRepository, UserRepository};
use crate::rooms::RoomManager;
use crate::session::ConnectionSession;
use crate::typing::TypingRelay;

#[derive(Debug, Clone)]
pub struct RealtimeSettings {
    /// 握手（等待凭证 + 校验）的上限
    pub handshake_timeout: Duration,
    /// 每条连接的出站队列长度
    pub outbound_buffer: usize,
    /// 通过实时通道加入房间时是否校验会话成员资格
    pub verify_room_membership: bool,
}

impl Default for RealtimeSettings {
    fn default() -> Self {
        Self {
            handshake_timeout: Duration::from_secs(10),
            outbound_buffer: 256,
            verify_room_membership: true,
        }
    }
}

pub struct RealtimeDependencies {
    pub identity: Arc<dyn IdentityResolver>,
    pub users: Arc<dyn UserRepository>,
    pub conversations: Arc<dyn ConversationRepository>,
    pub messages: Arc<dyn MessageRepository>,
    pub clock: Arc<dyn Clock>,
    pub settings: RealtimeSettings,
}

/// 实时同步子系统的组装点。
///
/// REST 与实时连接两条路径共享同一个 `Realtime`，
/// 在线注册表和房间管理器是进程内唯一的扇出权威。
pub struct Realtime {
    pub(crate) identity: Arc<dyn IdentityResolver>,
    pub(crate) conversations: Arc<dyn ConversationRepository>,
    pub(crate) settings: RealtimeSettings,
    presence: Arc<PresenceRegistry>,
    rooms: Arc<RoomManager>,
    fanout: MessageFanoutEngine,
    read_receipts: Arc<ReadReceiptAggregator>,
    typing: TypingRelay,
    conversation_service: ConversationService,
}

impl Realtime {
    pub fn new(deps: RealtimeDependencies) -> Self {
        let RealtimeDependencies {
            identity,
            users,
            conversations,
            messages,
            clock,
            settings,
        } = deps;

        let presence = Arc::new(PresenceRegistry::new(users.clone(), clock.clone()));
        let rooms = Arc::new(RoomManager::new());
        let fanout = MessageFanoutEngine::new(
            messages.clone(),
            conversations.clone(),
            rooms.clone(),
            clock.clone(),
        );
        let read_receipts = Arc::new(ReadReceiptAggregator::new(
            messages.clone(),
            conversations.clone(),
            rooms.clone(),
            clock.clone(),
        ));
        let typing = TypingRelay::new(rooms.clone(), presence.clone());
        let conversation_service = ConversationService::new(
            conversations.clone(),
            messages,
            users.clone(),
            read_receipts.clone(),
            rooms.clone(),
            clock.clone(),
        );

        Self {
            identity,
            conversations,
            settings,
            presence,
            rooms,
            fanout,
            read_receipts,
            typing,
            conversation_service,
        }
    }

    /// 为一条新的传输层连接创建会话，初始状态为 `Connecting`
    pub fn open_session(self: &Arc<Self>) -> ConnectionSession {
        ConnectionSession::new(self.clone())
    }

    pub fn identity(&self) -> &Arc<dyn IdentityResolver> {
        &self.identity
    }

    pub fn presence(&self) -> &PresenceRegistry {
        &self.presence
    }

    pub fn rooms(&self) -> &RoomManager {
        &self.rooms
    }

    pub fn fanout(&self) -> &MessageFanoutEngine {
        &self.fanout
    }

    pub fn read_receipts(&self) -> &ReadReceiptAggregator {
        &self.read_receipts
    }

    pub fn typing(&self) -> &TypingRelay {
        &self.typing
    }

    pub fn conversations(&self) -> &ConversationService {
        &self.conversation_service
    }
}
