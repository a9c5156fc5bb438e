//! 外部存储协作方的接口
//!
//! 持久化的具体实现（内存、PostgreSQL）在基础设施层。

use async_trait::async_trait;
use domain::{
    Conversation, ConversationId, Message, MessageId, RepositoryError, Timestamp, User, UserId,
};

#[cfg_attr(test, mockall::automock)]
#[async_trait]
pub trait MessageRepository: Send + Sync {
    /// 持久化消息并返回存储后的副本（带存储分配的 `sequence`）
    async fn insert_message(&self, message: Message) -> Result<Message, RepositoryError>;

    /// 给会话内所有非 `reader` 发送、且还没有 `reader` 标记的消息追加已读标记。
    ///
    /// 必须是一次条件批量更新：只在标记缺失时追加，从不覆盖。返回受影响的消息数。
    async fn append_read_marker_if_absent(
        &self,
        conversation_id: ConversationId,
        reader: UserId,
        read_at: Timestamp,
    ) -> Result<u64, RepositoryError>;

    /// 单条消息的条件追加，返回是否真的追加了
    async fn append_message_read_marker(
        &self,
        message_id: MessageId,
        reader: UserId,
        read_at: Timestamp,
    ) -> Result<bool, RepositoryError>;

    async fn find_by_id(&self, id: MessageId) -> Result<Option<Message>, RepositoryError>;

    /// 按 `sequence` 倒序分页，`before` 是序号游标
    async fn list_page(
        &self,
        conversation_id: ConversationId,
        limit: u32,
        before: Option<i64>,
    ) -> Result<Vec<Message>, RepositoryError>;
}

#[cfg_attr(test, mockall::automock)]
#[async_trait]
pub trait ConversationRepository: Send + Sync {
    async fn create(&self, conversation: Conversation) -> Result<Conversation, RepositoryError>;

    /// 只有 `participant` 属于该会话时才返回
    async fn find_for_participant(
        &self,
        id: ConversationId,
        participant: UserId,
    ) -> Result<Option<Conversation>, RepositoryError>;

    /// 覆盖群的标题、参与者与 `updated_at`，会话不存在时返回 `NotFound`
    async fn update_group(
        &self,
        conversation: Conversation,
    ) -> Result<Conversation, RepositoryError>;

    /// 刷新最近活跃时间
    async fn touch(&self, id: ConversationId, at: Timestamp) -> Result<(), RepositoryError>;
}

#[cfg_attr(test, mockall::automock)]
#[async_trait]
pub trait UserRepository: Send + Sync {
    async fn find_by_id(&self, id: UserId) -> Result<Option<User>, RepositoryError>;

    async fn set_presence(
        &self,
        id: UserId,
        online: bool,
        last_seen: Timestamp,
    ) -> Result<(), RepositoryError>;
}
