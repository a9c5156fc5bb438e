use std::sync::Arc;

use domain::{
    ConversationId, MediaDescriptor, Message, MessageId, MessageType, MessageView, ServerEvent,
    UserIdentity,
};

use crate::background::run_best_effort;
use crate::clock::Clock;
use crate::connection::{ConnectionHandle, DeliveryReport};
use crate::error::{ApplicationError, ApplicationResult};
use crate::repository::{ConversationRepository, MessageRepository};
use crate::rooms::RoomManager;

/// 一次发送请求，来自实时连接或者 REST 接口
#[derive(Debug, Clone)]
pub struct SubmitMessage {
    pub sender: UserIdentity,
    pub conversation_id: ConversationId,
    pub content: String,
    pub message_type: MessageType,
    pub media: Option<MediaDescriptor>,
}

#[derive(Debug, Clone)]
pub struct SubmitOutcome {
    pub message: MessageView,
    pub delivery: DeliveryReport,
}

/// 消息写入与扇出
///
/// 顺序固定为：校验 → 授权 → 持久化 → 刷新会话活跃时间（尽力而为）→ 广播 → 回执。
/// 先落库再广播，广播不是事实来源；任何一步失败都只回报给发送方，房间里看不到痕迹。
pub struct MessageFanoutEngine {
    messages: Arc<dyn MessageRepository>,
    conversations: Arc<dyn ConversationRepository>,
    rooms: Arc<RoomManager>,
    clock: Arc<dyn Clock>,
}

impl MessageFanoutEngine {
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

    /// `origin` 为发起的连接；REST 路径没有连接，传 `None`，也就没有 `message:sent` 回执。
    pub async fn submit(
        &self,
        origin: Option<&ConnectionHandle>,
        request: SubmitMessage,
    ) -> ApplicationResult<SubmitOutcome> {
        let SubmitMessage {
            sender,
            conversation_id,
            content,
            message_type,
            media,
        } = request;
        let now = self.clock.now();

        let draft = Message::compose(
            MessageId::generate(),
            conversation_id,
            sender.id,
            content,
            message_type,
            media,
            now,
        )?;

        self.conversations
            .find_for_participant(conversation_id, sender.id)
            .await?
            .ok_or(ApplicationError::Authorization)?;

        let stored = self.messages.insert_message(draft).await.map_err(|err| {
            tracing::error!(%conversation_id, sender_id = %sender.id, error = %err, "failed to persist message");
            ApplicationError::from(err)
        })?;

        // 活跃时间只影响会话列表排序，失败不影响消息本身
        run_best_effort("touch_conversation", self.conversations.touch(conversation_id, now)).await;

        let message_id = stored.id;
        let view = MessageView::new(stored, sender);
        let delivery = self
            .rooms
            .broadcast(
                conversation_id,
                ServerEvent::MessageNew {
                    message: view.clone(),
                },
                None,
            )
            .await;

        if let Some(origin) = origin {
            if let Err(err) = origin.deliver(ServerEvent::MessageSent { message_id }) {
                tracing::warn!(error = %err, %message_id, "failed to acknowledge message");
            }
        }

        tracing::info!(
            %conversation_id,
            %message_id,
            sender_id = %view.sender.id,
            delivered = delivery.delivered,
            "message accepted"
        );

        Ok(SubmitOutcome {
            message: view,
            delivery,
        })
    }
}
