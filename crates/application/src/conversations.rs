use std::collections::HashMap;
use std::sync::Arc;

use domain::{
    Conversation, ConversationId, Message, MessageView, UserId, UserIdentity,
};
use serde::Serialize;

use crate::clock::Clock;
use crate::error::{ApplicationError, ApplicationResult};
use crate::read_receipts::{ReadOrigin, ReadReceiptAggregator};
use crate::repository::{ConversationRepository, MessageRepository, UserRepository};
use crate::rooms::RoomManager;

pub const DEFAULT_PAGE_SIZE: u32 = 50;
pub const MAX_PAGE_SIZE: u32 = 100;

#[derive(Debug, Clone)]
pub struct CreateConversation {
    pub creator: UserId,
    pub participants: Vec<UserId>,
    pub title: Option<String>,
    pub is_group: bool,
}

/// 群资料修改，字段缺省表示不改
#[derive(Debug, Clone, Default)]
pub struct UpdateGroup {
    pub title: Option<String>,
    pub participants: Option<Vec<UserId>>,
}

#[derive(Debug, Clone, Copy, Default)]
pub struct HistoryQuery {
    pub limit: Option<u32>,
    /// 序号游标：只返回 `sequence` 小于它的消息
    pub before: Option<i64>,
}

impl HistoryQuery {
    fn page_size(&self) -> ApplicationResult<u32> {
        match self.limit {
            None => Ok(DEFAULT_PAGE_SIZE),
            Some(0) => Err(ApplicationError::validation("limit", "must be at least 1")),
            Some(limit) => Ok(limit.min(MAX_PAGE_SIZE)),
        }
    }
}

/// 按时间正序返回的一页历史
#[derive(Debug, Clone, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct HistoryPage {
    pub messages: Vec<MessageView>,
    pub has_more: bool,
}

/// REST 侧的会话用例：创建、读取、改群资料、翻历史。读取和翻历史都会顺带把会话标记为已读。
pub struct ConversationService {
    conversations: Arc<dyn ConversationRepository>,
    messages: Arc<dyn MessageRepository>,
    users: Arc<dyn UserRepository>,
    read_receipts: Arc<ReadReceiptAggregator>,
    rooms: Arc<RoomManager>,
    clock: Arc<dyn Clock>,
}

impl ConversationService {
    pub fn new(
        conversations: Arc<dyn ConversationRepository>,
        messages: Arc<dyn MessageRepository>,
        users: Arc<dyn UserRepository>,
        read_receipts: Arc<ReadReceiptAggregator>,
        rooms: Arc<RoomManager>,
        clock: Arc<dyn Clock>,
    ) -> Self {
        Self {
            conversations,
            messages,
            users,
            read_receipts,
            rooms,
            clock,
        }
    }

    pub async fn create(&self, request: CreateConversation) -> ApplicationResult<Conversation> {
        let conversation = Conversation::new(
            ConversationId::generate(),
            request.creator,
            request.participants,
            request.title,
            request.is_group,
            self.clock.now(),
        )?;
        let created = self.conversations.create(conversation).await?;
        tracing::info!(
            conversation_id = %created.id,
            created_by = %created.created_by,
            participants = created.participants.len(),
            "conversation created"
        );
        Ok(created)
    }

    /// 非参与者看到的是 404，不暴露会话是否存在
    pub async fn get(
        &self,
        conversation_id: ConversationId,
        viewer: UserId,
    ) -> ApplicationResult<Conversation> {
        let conversation = self
            .conversations
            .find_for_participant(conversation_id, viewer)
            .await?
            .ok_or(ApplicationError::NotFound {
                resource: "conversation",
            })?;

        self.read_receipts
            .mark_read(ReadOrigin::Rest, conversation_id, viewer)
            .await?;
        Ok(conversation)
    }

    /// 只有群的创建者能改；看不到或不是群的一律 404。
    ///
    /// 被移出的用户，其已加入房间的连接随即被踢出房间。
    pub async fn update(
        &self,
        conversation_id: ConversationId,
        caller: UserId,
        request: UpdateGroup,
    ) -> ApplicationResult<Conversation> {
        let mut conversation = self
            .conversations
            .find_for_participant(conversation_id, caller)
            .await?
            .filter(|conversation| conversation.is_group)
            .ok_or(ApplicationError::NotFound {
                resource: "conversation",
            })?;
        if conversation.created_by != caller {
            return Err(ApplicationError::Authorization);
        }

        conversation.update_group(request.title, request.participants, self.clock.now())?;
        let updated = self.conversations.update_group(conversation).await?;

        let evicted = self
            .rooms
            .retain_participants(conversation_id, &updated.participants)
            .await;
        tracing::info!(
            conversation_id = %updated.id,
            participants = updated.participants.len(),
            evicted,
            "group conversation updated"
        );
        Ok(updated)
    }

    pub async fn history(
        &self,
        conversation_id: ConversationId,
        viewer: UserId,
        query: HistoryQuery,
    ) -> ApplicationResult<HistoryPage> {
        let limit = query.page_size()?;
        self.conversations
            .find_for_participant(conversation_id, viewer)
            .await?
            .ok_or(ApplicationError::Authorization)?;

        let mut page = self
            .messages
            .list_page(conversation_id, limit, query.before)
            .await?;
        let has_more = page.len() == limit as usize;
        page.reverse();

        let messages = self.resolve_senders(page).await?;

        self.read_receipts
            .mark_read(ReadOrigin::Rest, conversation_id, viewer)
            .await?;

        Ok(HistoryPage { messages, has_more })
    }

    async fn resolve_senders(&self, page: Vec<Message>) -> ApplicationResult<Vec<MessageView>> {
        let mut senders: HashMap<UserId, UserIdentity> = HashMap::new();
        let mut views = Vec::with_capacity(page.len());
        for message in page {
            let sender = match senders.get(&message.sender_id) {
                Some(identity) => identity.clone(),
                None => {
                    let identity = self
                        .users
                        .find_by_id(message.sender_id)
                        .await?
                        .map(|user| user.identity())
                        .unwrap_or_else(|| UserIdentity::anonymous(message.sender_id));
                    senders.insert(message.sender_id, identity.clone());
                    identity
                }
            };
            views.push(MessageView::new(message, sender));
        }
        Ok(views)
    }
}
