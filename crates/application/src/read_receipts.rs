use std::sync::Arc;

use domain::{ConnectionId, ConversationId, MessageId, ServerEvent, UserId};

use crate::clock::Clock;
use crate::error::{ApplicationError, ApplicationResult};
use crate::repository::{ConversationRepository, MessageRepository};
use crate::rooms::RoomManager;

/// 已读请求从哪条路径进来
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ReadOrigin {
    /// 实时连接：通知时排除发起连接，客户端靠它抑制本地回显
    Socket(ConnectionId),
    /// REST 接口：通知房间内所有连接
    Rest,
}

impl ReadOrigin {
    fn excluded(&self) -> Option<ConnectionId> {
        match self {
            ReadOrigin::Socket(connection_id) => Some(*connection_id),
            ReadOrigin::Rest => None,
        }
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct ReadOutcome {
    /// 本次真正追加了标记的消息数
    pub updated: u64,
    pub notified: bool,
}

/// 合并两条路径上的已读状态修改。
///
/// 去重交给存储的条件批量更新（只在标记缺失时追加），这里不做先读后写。
/// 只有真正改变了状态才发通知，已生效的重复请求既不写库也不再通知。
pub struct ReadReceiptAggregator {
    messages: Arc<dyn MessageRepository>,
    conversations: Arc<dyn ConversationRepository>,
    rooms: Arc<RoomManager>,
    clock: Arc<dyn Clock>,
}

impl ReadReceiptAggregator {
    pub fn new(
        messages: Arc<dyn MessageRepository>,
        conversations: Arc<dyn ConversationRepository>,
        rooms: Arc<RoomManager>,
        clock: Arc<dyn Clock>,
    ) -> Self {
        Self {
            messages,
            conversations,
            rooms,
            clock,
        }
    }

    /// 把会话里别人发的、`reader` 还没读过的消息全部标记为已读
    pub async fn mark_read(
        &self,
        origin: ReadOrigin,
        conversation_id: ConversationId,
        reader: UserId,
    ) -> ApplicationResult<ReadOutcome> {
        self.conversations
            .find_for_participant(conversation_id, reader)
            .await?
            .ok_or(ApplicationError::Authorization)?;

        let updated = self
            .messages
            .append_read_marker_if_absent(conversation_id, reader, self.clock.now())
            .await?;

        if updated == 0 {
            tracing::debug!(%conversation_id, user_id = %reader, "read state already applied");
            return Ok(ReadOutcome {
                updated,
                notified: false,
            });
        }

        self.rooms
            .broadcast(
                conversation_id,
                ServerEvent::MessagesRead {
                    conversation_id,
                    user_id: reader,
                },
                origin.excluded(),
            )
            .await;

        tracing::info!(%conversation_id, user_id = %reader, updated, ?origin, "messages marked read");
        Ok(ReadOutcome {
            updated,
            notified: true,
        })
    }

    /// 单条消息已读（REST），只在真正追加了标记时通知房间
    pub async fn mark_message_read(
        &self,
        message_id: MessageId,
        reader: UserId,
    ) -> ApplicationResult<bool> {
        let message = self
            .messages
            .find_by_id(message_id)
            .await?
            .ok_or(ApplicationError::NotFound { resource: "message" })?;

        self.conversations
            .find_for_participant(message.conversation_id, reader)
            .await?
            .ok_or(ApplicationError::Authorization)?;

        let added = self
            .messages
            .append_message_read_marker(message_id, reader, self.clock.now())
            .await?;

        if added {
            self.rooms
                .broadcast(
                    message.conversation_id,
                    ServerEvent::MessageRead {
                        message_id,
                        user_id: reader,
                    },
                    None,
                )
                .await;
        }
        Ok(added)
    }
}
