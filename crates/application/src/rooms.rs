use std::collections::{HashMap, HashSet};

use domain::{ConnectionId, ConversationId, ServerEvent, UserId};
use tokio::sync::RwLock;

use crate::connection::{fan_out, ConnectionHandle, DeliveryReport};

#[derive(Default)]
struct RoomState {
    /// 会话 → 房间内的连接
    members: HashMap<ConversationId, HashMap<ConnectionId, ConnectionHandle>>,
    /// 连接 → 已加入的会话，用于断线时一次性释放
    joined: HashMap<ConnectionId, HashSet<ConversationId>>,
}

/// 房间管理器
///
/// 房间成员关系是派生状态：只反映当前的连接，从不持久化，
/// 进程重启后所有房间为空，直到客户端重新加入。
/// 这里不校验会话成员资格，由调用方在加入前完成授权。
#[derive(Default)]
pub struct RoomManager {
    state: RwLock<RoomState>,
}

impl RoomManager {
    pub fn new() -> Self {
        Self::default()
    }

    /// 加入房间，已是成员时为空操作。返回是否新加入。
    pub async fn join(&self, handle: &ConnectionHandle, conversation_id: ConversationId) -> bool {
        let mut state = self.state.write().await;
        let inserted = state
            .members
            .entry(conversation_id)
            .or_default()
            .insert(handle.id(), handle.clone())
            .is_none();
        state
            .joined
            .entry(handle.id())
            .or_default()
            .insert(conversation_id);

        if inserted {
            tracing::debug!(connection_id = %handle.id(), %conversation_id, "joined room");
        }
        inserted
    }

    /// 离开房间，返回连接之前是否在房间里
    pub async fn leave(&self, connection_id: ConnectionId, conversation_id: ConversationId) -> bool {
        let mut state = self.state.write().await;
        let removed = Self::remove_member(&mut state, connection_id, conversation_id);
        if let Some(rooms) = state.joined.get_mut(&connection_id) {
            rooms.remove(&conversation_id);
            if rooms.is_empty() {
                state.joined.remove(&connection_id);
            }
        }
        removed
    }

    /// 释放连接的全部房间成员关系，断线时调用。可重复调用。
    pub async fn release_all(&self, connection_id: ConnectionId) -> usize {
        let mut state = self.state.write().await;
        let Some(rooms) = state.joined.remove(&connection_id) else {
            return 0;
        };
        let released = rooms.len();
        for conversation_id in rooms {
            Self::remove_member(&mut state, connection_id, conversation_id);
        }
        tracing::debug!(%connection_id, released, "released room memberships");
        released
    }

    /// 向房间内所有连接投递事件，可排除一个连接。
    ///
    /// 逐个成员独立投递，某个成员失败只记录日志，不影响其他成员。
    pub async fn broadcast(
        &self,
        conversation_id: ConversationId,
        event: ServerEvent,
        exclude: Option<ConnectionId>,
    ) -> DeliveryReport {
        let targets: Vec<ConnectionHandle> = {
            let state = self.state.read().await;
            match state.members.get(&conversation_id) {
                Some(members) => members
                    .values()
                    .filter(|handle| Some(handle.id()) != exclude)
                    .cloned()
                    .collect(),
                None => Vec::new(),
            }
        };

        let report = fan_out(targets.iter(), &event);
        tracing::debug!(
            %conversation_id,
            event = event.name(),
            delivered = report.delivered,
            failed = report.failed,
            "room broadcast"
        );
        report
    }

    pub async fn member_count(&self, conversation_id: ConversationId) -> usize {
        self.state
            .read()
            .await
            .members
            .get(&conversation_id)
            .map_or(0, HashMap::len)
    }

    /// 会话成员变更后，把已不在参与者名单里的用户的连接移出房间。返回移出的连接数。
    pub async fn retain_participants(
        &self,
        conversation_id: ConversationId,
        participants: &[UserId],
    ) -> usize {
        let mut state = self.state.write().await;
        let evicted: Vec<ConnectionId> = match state.members.get(&conversation_id) {
            Some(members) => members
                .values()
                .filter(|handle| !participants.contains(&handle.user_id()))
                .map(ConnectionHandle::id)
                .collect(),
            None => return 0,
        };

        for connection_id in &evicted {
            Self::remove_member(&mut state, *connection_id, conversation_id);
            if let Some(rooms) = state.joined.get_mut(connection_id) {
                rooms.remove(&conversation_id);
                if rooms.is_empty() {
                    state.joined.remove(connection_id);
                }
            }
        }
        if !evicted.is_empty() {
            tracing::info!(%conversation_id, evicted = evicted.len(), "removed former participants from room");
        }
        evicted.len()
    }

    fn remove_member(
        state: &mut RoomState,
        connection_id: ConnectionId,
        conversation_id: ConversationId,
    ) -> bool {
        let Some(members) = state.members.get_mut(&conversation_id) else {
            return false;
        };
        let removed = members.remove(&connection_id).is_some();
        if members.is_empty() {
            state.members.remove(&conversation_id);
        }
        removed
    }
}
