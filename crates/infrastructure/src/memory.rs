//! 进程内存储
//!
//! 单进程部署和测试用。所有表放在同一把锁后面，
//! 条件批量已读更新在一次写锁内完成，并发调用之间不会重复追加。

use std::collections::HashMap;

use application::repository::{ConversationRepository, MessageRepository, UserRepository};
use async_trait::async_trait;
use domain::{
    Conversation, ConversationId, Message, MessageId, RepositoryError, Timestamp, User, UserId,
};
use tokio::sync::RwLock;

#[derive(Default)]
struct Tables {
    users: HashMap<UserId, User>,
    conversations: HashMap<ConversationId, Conversation>,
    /// 每个会话按 `sequence` 递增排列
    messages: HashMap<ConversationId, Vec<Message>>,
    message_index: HashMap<MessageId, ConversationId>,
    next_sequence: i64,
}

impl Tables {
    fn message_mut(&mut self, id: MessageId) -> Option<&mut Message> {
        let conversation_id = self.message_index.get(&id)?;
        self.messages
            .get_mut(conversation_id)?
            .iter_mut()
            .find(|message| message.id == id)
    }
}

#[derive(Default)]
pub struct InMemoryStore {
    tables: RwLock<Tables>,
}

impl InMemoryStore {
    pub fn new() -> Self {
        Self::default()
    }

    /// 用户的注册不属于实时同步，这里只提供写入口给启动种子和测试
    pub async fn insert_user(&self, user: User) {
        self.tables.write().await.users.insert(user.id, user);
    }

    pub async fn user(&self, id: UserId) -> Option<User> {
        self.tables.read().await.users.get(&id).cloned()
    }

    pub async fn conversation(&self, id: ConversationId) -> Option<Conversation> {
        self.tables.read().await.conversations.get(&id).cloned()
    }

    pub async fn message(&self, id: MessageId) -> Option<Message> {
        let tables = self.tables.read().await;
        let conversation_id = tables.message_index.get(&id)?;
        tables
            .messages
            .get(conversation_id)?
            .iter()
            .find(|message| message.id == id)
            .cloned()
    }
}

#[async_trait]
impl UserRepository for InMemoryStore {
    async fn find_by_id(&self, id: UserId) -> Result<Option<User>, RepositoryError> {
        Ok(self.user(id).await)
    }

    async fn set_presence(
        &self,
        id: UserId,
        online: bool,
        last_seen: Timestamp,
    ) -> Result<(), RepositoryError> {
        let mut tables = self.tables.write().await;
        let user = tables.users.get_mut(&id).ok_or(RepositoryError::NotFound)?;
        if !user.set_presence(online, last_seen) {
            tracing::debug!(user_id = %id, online, "stale presence write skipped");
        }
        Ok(())
    }
}

#[async_trait]
impl ConversationRepository for InMemoryStore {
    async fn create(&self, conversation: Conversation) -> Result<Conversation, RepositoryError> {
        let mut tables = self.tables.write().await;
        if tables.conversations.contains_key(&conversation.id) {
            return Err(RepositoryError::Conflict);
        }
        tables
            .conversations
            .insert(conversation.id, conversation.clone());
        Ok(conversation)
    }

    async fn find_for_participant(
        &self,
        id: ConversationId,
        participant: UserId,
    ) -> Result<Option<Conversation>, RepositoryError> {
        Ok(self
            .tables
            .read()
            .await
            .conversations
            .get(&id)
            .filter(|conversation| conversation.has_participant(participant))
            .cloned())
    }

    async fn update_group(
        &self,
        conversation: Conversation,
    ) -> Result<Conversation, RepositoryError> {
        let mut tables = self.tables.write().await;
        let stored = tables
            .conversations
            .get_mut(&conversation.id)
            .filter(|stored| stored.is_group)
            .ok_or(RepositoryError::NotFound)?;
        *stored = conversation.clone();
        Ok(conversation)
    }

    async fn touch(&self, id: ConversationId, at: Timestamp) -> Result<(), RepositoryError> {
        let mut tables = self.tables.write().await;
        let conversation = tables
            .conversations
            .get_mut(&id)
            .ok_or(RepositoryError::NotFound)?;
        conversation.touch(at);
        Ok(())
    }
}

#[async_trait]
impl MessageRepository for InMemoryStore {
    async fn insert_message(&self, mut message: Message) -> Result<Message, RepositoryError> {
        let mut tables = self.tables.write().await;
        if !tables.conversations.contains_key(&message.conversation_id) {
            return Err(RepositoryError::NotFound);
        }
        if tables.message_index.contains_key(&message.id) {
            return Err(RepositoryError::Conflict);
        }

        tables.next_sequence += 1;
        message.sequence = tables.next_sequence;
        tables
            .message_index
            .insert(message.id, message.conversation_id);
        tables
            .messages
            .entry(message.conversation_id)
            .or_default()
            .push(message.clone());
        Ok(message)
    }

    async fn append_read_marker_if_absent(
        &self,
        conversation_id: ConversationId,
        reader: UserId,
        read_at: Timestamp,
    ) -> Result<u64, RepositoryError> {
        let mut tables = self.tables.write().await;
        let Some(messages) = tables.messages.get_mut(&conversation_id) else {
            return Ok(0);
        };

        let mut updated = 0;
        for message in messages.iter_mut() {
            if message.sender_id != reader && message.mark_read_by(reader, read_at) {
                updated += 1;
            }
        }
        Ok(updated)
    }

    async fn append_message_read_marker(
        &self,
        message_id: MessageId,
        reader: UserId,
        read_at: Timestamp,
    ) -> Result<bool, RepositoryError> {
        let mut tables = self.tables.write().await;
        let message = tables
            .message_mut(message_id)
            .ok_or(RepositoryError::NotFound)?;
        Ok(message.mark_read_by(reader, read_at))
    }

    async fn find_by_id(&self, id: MessageId) -> Result<Option<Message>, RepositoryError> {
        Ok(self.message(id).await)
    }

    async fn list_page(
        &self,
        conversation_id: ConversationId,
        limit: u32,
        before: Option<i64>,
    ) -> Result<Vec<Message>, RepositoryError> {
        let tables = self.tables.read().await;
        let Some(messages) = tables.messages.get(&conversation_id) else {
            return Ok(Vec::new());
        };

        Ok(messages
            .iter()
            .rev()
            .filter(|message| before.map_or(true, |cursor| message.sequence < cursor))
            .take(limit as usize)
            .cloned()
            .collect())
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use chrono::Utc;
    use domain::MessageType;

    async fn seeded() -> (InMemoryStore, Conversation, UserId, UserId) {
        let store = InMemoryStore::new();
        let alice = User::new(UserId::generate(), "alice", None);
        let bob = User::new(UserId::generate(), "bob", None);
        store.insert_user(alice.clone()).await;
        store.insert_user(bob.clone()).await;
        let conversation = Conversation::new(
            ConversationId::generate(),
            alice.id,
            vec![bob.id],
            None,
            false,
            Utc::now(),
        )
        .unwrap();
        store.create(conversation.clone()).await.unwrap();
        (store, conversation, alice.id, bob.id)
    }

    async fn send(store: &InMemoryStore, conversation_id: ConversationId, sender: UserId) -> Message {
        let message = Message::compose(
            MessageId::generate(),
            conversation_id,
            sender,
            "hello",
            MessageType::Text,
            None,
            Utc::now(),
        )
        .unwrap();
        store.insert_message(message).await.unwrap()
    }

    #[tokio::test]
    async fn sequences_are_assigned_in_insert_order() {
        let (store, conversation, alice, bob) = seeded().await;
        let first = send(&store, conversation.id, alice).await;
        let second = send(&store, conversation.id, bob).await;
        assert!(second.sequence > first.sequence);

        let page = store.list_page(conversation.id, 10, None).await.unwrap();
        assert_eq!(page[0].id, second.id);

        let older = store
            .list_page(conversation.id, 10, Some(second.sequence))
            .await
            .unwrap();
        assert_eq!(older.len(), 1);
        assert_eq!(older[0].id, first.id);
    }

    #[tokio::test]
    async fn bulk_read_skips_own_and_already_read_messages() {
        let (store, conversation, alice, bob) = seeded().await;
        send(&store, conversation.id, alice).await;
        send(&store, conversation.id, alice).await;
        send(&store, conversation.id, bob).await;

        let now = Utc::now();
        assert_eq!(
            store
                .append_read_marker_if_absent(conversation.id, bob, now)
                .await
                .unwrap(),
            2
        );
        assert_eq!(
            store
                .append_read_marker_if_absent(conversation.id, bob, now)
                .await
                .unwrap(),
            0
        );
    }

    #[tokio::test]
    async fn single_read_marker_is_not_overwritten() {
        let (store, conversation, alice, bob) = seeded().await;
        let message = send(&store, conversation.id, alice).await;

        let first = Utc::now();
        assert!(store
            .append_message_read_marker(message.id, bob, first)
            .await
            .unwrap());
        assert!(!store
            .append_message_read_marker(message.id, bob, Utc::now())
            .await
            .unwrap());

        let stored = store.message(message.id).await.unwrap();
        let marker = stored.read_by.iter().find(|m| m.user_id == bob).unwrap();
        assert_eq!(marker.read_at, first);
    }

    #[tokio::test]
    async fn participant_lookup_hides_foreign_conversations() {
        let (store, conversation, alice, _bob) = seeded().await;
        assert!(store
            .find_for_participant(conversation.id, alice)
            .await
            .unwrap()
            .is_some());
        assert!(store
            .find_for_participant(conversation.id, UserId::generate())
            .await
            .unwrap()
            .is_none());
    }

    #[tokio::test]
    async fn group_update_replaces_stored_participants() {
        let (store, conversation, alice, bob) = seeded().await;
        let carol = UserId::generate();
        let mut group = Conversation::new(
            ConversationId::generate(),
            alice,
            vec![bob],
            None,
            true,
            Utc::now(),
        )
        .unwrap();
        store.create(group.clone()).await.unwrap();

        group
            .update_group(Some("team".into()), Some(vec![carol]), Utc::now())
            .unwrap();
        store.update_group(group.clone()).await.unwrap();

        assert!(store.find_for_participant(group.id, bob).await.unwrap().is_none());
        let seen = store.find_for_participant(group.id, carol).await.unwrap().unwrap();
        assert_eq!(seen.title.as_deref(), Some("team"));

        let mut unknown = conversation;
        unknown.id = ConversationId::generate();
        assert_eq!(store.update_group(unknown).await, Err(RepositoryError::NotFound));
    }

    #[tokio::test]
    async fn out_of_order_presence_writes_keep_the_latest() {
        let (store, _, alice, _) = seeded().await;
        let connected = Utc::now();
        let disconnected = connected + chrono::Duration::milliseconds(10);

        store.set_presence(alice, false, disconnected).await.unwrap();
        store.set_presence(alice, true, connected).await.unwrap();

        let user = store.user(alice).await.unwrap();
        assert!(!user.is_online);
        assert_eq!(user.last_seen, Some(disconnected));

        assert_eq!(
            store.set_presence(UserId::generate(), true, connected).await,
            Err(RepositoryError::NotFound)
        );
    }
}
