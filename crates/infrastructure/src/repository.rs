use std::collections::HashMap;
use std::sync::Arc;

use application::repository::{ConversationRepository, MessageRepository, UserRepository};
use async_trait::async_trait;
use chrono::{DateTime, Utc};
use domain::{
    Conversation, ConversationId, MediaDescriptor, Message, MessageId, MessageType, ReadMarker,
    RepositoryError, Timestamp, User, UserId,
};
use sqlx::{postgres::PgPoolOptions, FromRow, PgPool};
use uuid::Uuid;

fn map_sqlx_err(err: sqlx::Error) -> RepositoryError {
    match err {
        sqlx::Error::RowNotFound => RepositoryError::NotFound,
        sqlx::Error::Database(db) if db.is_unique_violation() => RepositoryError::Conflict,
        other => RepositoryError::storage(other.to_string()),
    }
}

fn invalid_data(message: impl Into<String>) -> RepositoryError {
    RepositoryError::storage(message)
}

#[derive(Debug, FromRow)]
struct UserRecord {
    id: Uuid,
    username: String,
    avatar: Option<String>,
    is_online: bool,
    last_seen: Option<DateTime<Utc>>,
}

impl From<UserRecord> for User {
    fn from(value: UserRecord) -> Self {
        User {
            id: UserId::from(value.id),
            username: value.username,
            avatar: value.avatar,
            is_online: value.is_online,
            last_seen: value.last_seen,
        }
    }
}

#[derive(Debug, FromRow)]
struct ConversationRecord {
    id: Uuid,
    title: Option<String>,
    is_group: bool,
    created_by: Uuid,
    created_at: DateTime<Utc>,
    updated_at: DateTime<Utc>,
    participants: Vec<Uuid>,
}

impl From<ConversationRecord> for Conversation {
    fn from(value: ConversationRecord) -> Self {
        Conversation {
            id: ConversationId::from(value.id),
            participants: value.participants.into_iter().map(UserId::from).collect(),
            title: value.title,
            is_group: value.is_group,
            created_by: UserId::from(value.created_by),
            created_at: value.created_at,
            updated_at: value.updated_at,
        }
    }
}

#[derive(Debug, FromRow)]
struct MessageRecord {
    id: Uuid,
    sequence: i64,
    conversation_id: Uuid,
    sender_id: Uuid,
    content: String,
    message_type: String,
    media_url: Option<String>,
    media_mime_type: Option<String>,
    media_size: Option<i64>,
    media_thumbnail_url: Option<String>,
    created_at: DateTime<Utc>,
}

impl MessageRecord {
    fn into_message(self, read_by: Vec<ReadMarker>) -> Result<Message, RepositoryError> {
        let message_type =
            MessageType::parse(&self.message_type).map_err(|err| invalid_data(err.to_string()))?;
        let media = self.media_url.map(|url| MediaDescriptor {
            url,
            mime_type: self.media_mime_type,
            size: self.media_size.and_then(|size| u64::try_from(size).ok()),
            thumbnail_url: self.media_thumbnail_url,
        });

        Ok(Message {
            id: MessageId::from(self.id),
            conversation_id: ConversationId::from(self.conversation_id),
            sender_id: UserId::from(self.sender_id),
            content: self.content,
            message_type,
            media,
            created_at: self.created_at,
            sequence: self.sequence,
            read_by,
        })
    }
}

#[derive(Debug, FromRow)]
struct ReadRecord {
    message_id: Uuid,
    user_id: Uuid,
    read_at: DateTime<Utc>,
}

const MESSAGE_COLUMNS: &str = r#"
    id, sequence, conversation_id, sender_id, content, message_type,
    media_url, media_mime_type, media_size, media_thumbnail_url, created_at
"#;

const CONVERSATION_SELECT: &str = r#"
    SELECT c.id, c.title, c.is_group, c.created_by, c.created_at, c.updated_at,
           ARRAY(
               SELECT p.user_id FROM conversation_participants p
               WHERE p.conversation_id = c.id
               ORDER BY p.user_id
           ) AS participants
    FROM conversations c
"#;

#[derive(Clone)]
pub struct PgUserRepository {
    pool: PgPool,
}

impl PgUserRepository {
    pub fn new(pool: PgPool) -> Self {
        Self { pool }
    }

    /// 只给启动种子和测试用
    pub async fn create(&self, user: User) -> Result<User, RepositoryError> {
        let record = sqlx::query_as::<_, UserRecord>(
            r#"
            INSERT INTO users (id, username, avatar, is_online, last_seen)
            VALUES ($1, $2, $3, $4, $5)
            RETURNING id, username, avatar, is_online, last_seen
            "#,
        )
        .bind(Uuid::from(user.id))
        .bind(&user.username)
        .bind(&user.avatar)
        .bind(user.is_online)
        .bind(user.last_seen)
        .fetch_one(&self.pool)
        .await
        .map_err(map_sqlx_err)?;

        Ok(User::from(record))
    }
}

#[async_trait]
impl UserRepository for PgUserRepository {
    async fn find_by_id(&self, id: UserId) -> Result<Option<User>, RepositoryError> {
        let record = sqlx::query_as::<_, UserRecord>(
            r#"
            SELECT id, username, avatar, is_online, last_seen
            FROM users WHERE id = $1
            "#,
        )
        .bind(Uuid::from(id))
        .fetch_optional(&self.pool)
        .await
        .map_err(map_sqlx_err)?;

        Ok(record.map(User::from))
    }

    async fn set_presence(
        &self,
        id: UserId,
        online: bool,
        last_seen: Timestamp,
    ) -> Result<(), RepositoryError> {
        // 后台写入可能乱序完成，比已记录时间更早的写入不生效
        let result = sqlx::query(
            r#"
            UPDATE users SET is_online = $2, last_seen = $3
            WHERE id = $1 AND (last_seen IS NULL OR last_seen <= $3)
            "#,
        )
        .bind(Uuid::from(id))
        .bind(online)
        .bind(last_seen)
        .execute(&self.pool)
        .await
        .map_err(map_sqlx_err)?;

        if result.rows_affected() == 0 {
            let exists: bool = sqlx::query_scalar("SELECT EXISTS (SELECT 1 FROM users WHERE id = $1)")
                .bind(Uuid::from(id))
                .fetch_one(&self.pool)
                .await
                .map_err(map_sqlx_err)?;
            if !exists {
                return Err(RepositoryError::NotFound);
            }
            tracing::debug!(user_id = %id, online, "stale presence write skipped");
        }
        Ok(())
    }
}

#[derive(Clone)]
pub struct PgConversationRepository {
    pool: PgPool,
}

impl PgConversationRepository {
    pub fn new(pool: PgPool) -> Self {
        Self { pool }
    }
}

#[async_trait]
impl ConversationRepository for PgConversationRepository {
    async fn create(&self, conversation: Conversation) -> Result<Conversation, RepositoryError> {
        let mut tx = self.pool.begin().await.map_err(map_sqlx_err)?;

        sqlx::query(
            r#"
            INSERT INTO conversations (id, title, is_group, created_by, created_at, updated_at)
            VALUES ($1, $2, $3, $4, $5, $6)
            "#,
        )
        .bind(Uuid::from(conversation.id))
        .bind(&conversation.title)
        .bind(conversation.is_group)
        .bind(Uuid::from(conversation.created_by))
        .bind(conversation.created_at)
        .bind(conversation.updated_at)
        .execute(&mut *tx)
        .await
        .map_err(map_sqlx_err)?;

        let participants: Vec<Uuid> = conversation
            .participants
            .iter()
            .copied()
            .map(Uuid::from)
            .collect();
        sqlx::query(
            r#"
            INSERT INTO conversation_participants (conversation_id, user_id)
            SELECT $1, UNNEST($2::uuid[])
            "#,
        )
        .bind(Uuid::from(conversation.id))
        .bind(participants)
        .execute(&mut *tx)
        .await
        .map_err(map_sqlx_err)?;

        tx.commit().await.map_err(map_sqlx_err)?;
        Ok(conversation)
    }

    async fn find_for_participant(
        &self,
        id: ConversationId,
        participant: UserId,
    ) -> Result<Option<Conversation>, RepositoryError> {
        let query = format!(
            r#"{CONVERSATION_SELECT}
            WHERE c.id = $1
              AND EXISTS (
                  SELECT 1 FROM conversation_participants p
                  WHERE p.conversation_id = c.id AND p.user_id = $2
              )
            "#
        );
        let record = sqlx::query_as::<_, ConversationRecord>(&query)
            .bind(Uuid::from(id))
            .bind(Uuid::from(participant))
            .fetch_optional(&self.pool)
            .await
            .map_err(map_sqlx_err)?;

        Ok(record.map(Conversation::from))
    }

    async fn update_group(
        &self,
        conversation: Conversation,
    ) -> Result<Conversation, RepositoryError> {
        let mut tx = self.pool.begin().await.map_err(map_sqlx_err)?;

        let updated = sqlx::query(
            r#"
            UPDATE conversations
            SET title = $2, updated_at = GREATEST(updated_at, $3)
            WHERE id = $1 AND is_group
            "#,
        )
        .bind(Uuid::from(conversation.id))
        .bind(&conversation.title)
        .bind(conversation.updated_at)
        .execute(&mut *tx)
        .await
        .map_err(map_sqlx_err)?;
        if updated.rows_affected() == 0 {
            return Err(RepositoryError::NotFound);
        }

        // 参与者整表替换
        sqlx::query("DELETE FROM conversation_participants WHERE conversation_id = $1")
            .bind(Uuid::from(conversation.id))
            .execute(&mut *tx)
            .await
            .map_err(map_sqlx_err)?;

        let participants: Vec<Uuid> = conversation
            .participants
            .iter()
            .copied()
            .map(Uuid::from)
            .collect();
        sqlx::query(
            r#"
            INSERT INTO conversation_participants (conversation_id, user_id)
            SELECT $1, UNNEST($2::uuid[])
            "#,
        )
        .bind(Uuid::from(conversation.id))
        .bind(participants)
        .execute(&mut *tx)
        .await
        .map_err(map_sqlx_err)?;

        tx.commit().await.map_err(map_sqlx_err)?;
        Ok(conversation)
    }

    async fn touch(&self, id: ConversationId, at: Timestamp) -> Result<(), RepositoryError> {
        // 只前进不后退
        sqlx::query(
            r#"
            UPDATE conversations SET updated_at = GREATEST(updated_at, $2)
            WHERE id = $1
            "#,
        )
        .bind(Uuid::from(id))
        .bind(at)
        .execute(&self.pool)
        .await
        .map_err(map_sqlx_err)?;
        Ok(())
    }
}

#[derive(Clone)]
pub struct PgMessageRepository {
    pool: PgPool,
}

impl PgMessageRepository {
    pub fn new(pool: PgPool) -> Self {
        Self { pool }
    }

    async fn load_read_markers(
        &self,
        message_ids: &[Uuid],
    ) -> Result<HashMap<Uuid, Vec<ReadMarker>>, RepositoryError> {
        let records = sqlx::query_as::<_, ReadRecord>(
            r#"
            SELECT message_id, user_id, read_at FROM message_reads
            WHERE message_id = ANY($1)
            ORDER BY read_at
            "#,
        )
        .bind(message_ids)
        .fetch_all(&self.pool)
        .await
        .map_err(map_sqlx_err)?;

        let mut markers: HashMap<Uuid, Vec<ReadMarker>> = HashMap::new();
        for record in records {
            markers.entry(record.message_id).or_default().push(ReadMarker {
                user_id: UserId::from(record.user_id),
                read_at: record.read_at,
            });
        }
        Ok(markers)
    }

    async fn hydrate(&self, records: Vec<MessageRecord>) -> Result<Vec<Message>, RepositoryError> {
        let ids: Vec<Uuid> = records.iter().map(|record| record.id).collect();
        let mut markers = self.load_read_markers(&ids).await?;
        records
            .into_iter()
            .map(|record| {
                let read_by = markers.remove(&record.id).unwrap_or_default();
                record.into_message(read_by)
            })
            .collect()
    }
}

#[async_trait]
impl MessageRepository for PgMessageRepository {
    async fn insert_message(&self, message: Message) -> Result<Message, RepositoryError> {
        let mut tx = self.pool.begin().await.map_err(map_sqlx_err)?;
        let media = message.media.as_ref();

        let sequence: i64 = sqlx::query_scalar(
            r#"
            INSERT INTO messages (
                id, conversation_id, sender_id, content, message_type,
                media_url, media_mime_type, media_size, media_thumbnail_url, created_at
            )
            VALUES ($1, $2, $3, $4, $5, $6, $7, $8, $9, $10)
            RETURNING sequence
            "#,
        )
        .bind(Uuid::from(message.id))
        .bind(Uuid::from(message.conversation_id))
        .bind(Uuid::from(message.sender_id))
        .bind(&message.content)
        .bind(message.message_type.as_str())
        .bind(media.map(|m| m.url.clone()))
        .bind(media.and_then(|m| m.mime_type.clone()))
        .bind(media.and_then(|m| m.size).and_then(|size| i64::try_from(size).ok()))
        .bind(media.and_then(|m| m.thumbnail_url.clone()))
        .bind(message.created_at)
        .fetch_one(&mut *tx)
        .await
        .map_err(map_sqlx_err)?;

        for marker in &message.read_by {
            sqlx::query(
                r#"
                INSERT INTO message_reads (message_id, user_id, read_at)
                VALUES ($1, $2, $3)
                ON CONFLICT (message_id, user_id) DO NOTHING
                "#,
            )
            .bind(Uuid::from(message.id))
            .bind(Uuid::from(marker.user_id))
            .bind(marker.read_at)
            .execute(&mut *tx)
            .await
            .map_err(map_sqlx_err)?;
        }

        tx.commit().await.map_err(map_sqlx_err)?;
        Ok(Message { sequence, ..message })
    }

    async fn append_read_marker_if_absent(
        &self,
        conversation_id: ConversationId,
        reader: UserId,
        read_at: Timestamp,
    ) -> Result<u64, RepositoryError> {
        // 主键冲突即已读，单条语句完成条件追加
        let result = sqlx::query(
            r#"
            INSERT INTO message_reads (message_id, user_id, read_at)
            SELECT m.id, $2, $3 FROM messages m
            WHERE m.conversation_id = $1 AND m.sender_id <> $2
            ON CONFLICT (message_id, user_id) DO NOTHING
            "#,
        )
        .bind(Uuid::from(conversation_id))
        .bind(Uuid::from(reader))
        .bind(read_at)
        .execute(&self.pool)
        .await
        .map_err(map_sqlx_err)?;

        Ok(result.rows_affected())
    }

    async fn append_message_read_marker(
        &self,
        message_id: MessageId,
        reader: UserId,
        read_at: Timestamp,
    ) -> Result<bool, RepositoryError> {
        let result = sqlx::query(
            r#"
            INSERT INTO message_reads (message_id, user_id, read_at)
            VALUES ($1, $2, $3)
            ON CONFLICT (message_id, user_id) DO NOTHING
            "#,
        )
        .bind(Uuid::from(message_id))
        .bind(Uuid::from(reader))
        .bind(read_at)
        .execute(&self.pool)
        .await
        .map_err(map_sqlx_err)?;

        Ok(result.rows_affected() == 1)
    }

    async fn find_by_id(&self, id: MessageId) -> Result<Option<Message>, RepositoryError> {
        let query = format!("SELECT {MESSAGE_COLUMNS} FROM messages WHERE id = $1");
        let record = sqlx::query_as::<_, MessageRecord>(&query)
            .bind(Uuid::from(id))
            .fetch_optional(&self.pool)
            .await
            .map_err(map_sqlx_err)?;

        match record {
            Some(record) => Ok(self.hydrate(vec![record]).await?.pop()),
            None => Ok(None),
        }
    }

    async fn list_page(
        &self,
        conversation_id: ConversationId,
        limit: u32,
        before: Option<i64>,
    ) -> Result<Vec<Message>, RepositoryError> {
        let query = format!(
            r#"
            SELECT {MESSAGE_COLUMNS} FROM messages
            WHERE conversation_id = $1
              AND ($2::BIGINT IS NULL OR sequence < $2)
            ORDER BY sequence DESC
            LIMIT $3
            "#
        );
        let records = sqlx::query_as::<_, MessageRecord>(&query)
            .bind(Uuid::from(conversation_id))
            .bind(before)
            .bind(i64::from(limit))
            .fetch_all(&self.pool)
            .await
            .map_err(map_sqlx_err)?;

        self.hydrate(records).await
    }
}

/// 三个仓储共用一个连接池
pub struct PgStorage {
    pub pool: PgPool,
    pub user_repository: Arc<PgUserRepository>,
    pub conversation_repository: Arc<PgConversationRepository>,
    pub message_repository: Arc<PgMessageRepository>,
}

impl PgStorage {
    pub fn new(pool: PgPool) -> Self {
        Self {
            user_repository: Arc::new(PgUserRepository::new(pool.clone())),
            conversation_repository: Arc::new(PgConversationRepository::new(pool.clone())),
            message_repository: Arc::new(PgMessageRepository::new(pool.clone())),
            pool,
        }
    }
}

pub async fn create_pg_pool(
    database_url: &str,
    max_connections: u32,
) -> Result<PgPool, sqlx::Error> {
    PgPoolOptions::new()
        .max_connections(max_connections)
        .connect(database_url)
        .await
}
