use std::sync::Arc;

use domain::{ConnectionId, ServerEvent, TypingScope, UserId};

use crate::connection::{fan_out, DeliveryReport};
use crate::presence::PresenceRegistry;
use crate::rooms::RoomManager;

/// 输入状态转发。无状态、不落库、不回执、不重试，丢了就丢了。
pub struct TypingRelay {
    rooms: Arc<RoomManager>,
    presence: Arc<PresenceRegistry>,
}

impl TypingRelay {
    pub fn new(rooms: Arc<RoomManager>, presence: Arc<PresenceRegistry>) -> Self {
        Self { rooms, presence }
    }

    /// 私聊发给对方的所有在线连接；会话发给房间，排除正在输入的那条连接。
    pub async fn relay(
        &self,
        typist: UserId,
        origin: Option<ConnectionId>,
        scope: TypingScope,
        is_typing: bool,
    ) -> DeliveryReport {
        match scope {
            TypingScope::Conversation(conversation_id) => {
                let event = ServerEvent::UserTyping {
                    user_id: typist,
                    is_typing,
                    conversation_id: Some(conversation_id),
                };
                self.rooms.broadcast(conversation_id, event, origin).await
            }
            TypingScope::Recipient(recipient_id) => {
                let event = ServerEvent::UserTyping {
                    user_id: typist,
                    is_typing,
                    conversation_id: None,
                };
                let targets = self.presence.connections_of(recipient_id).await;
                fan_out(targets.iter(), &event)
            }
        }
    }
}
