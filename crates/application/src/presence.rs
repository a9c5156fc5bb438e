use std::collections::HashMap;
use std::sync::Arc;

use domain::{ConnectionId, ServerEvent, Timestamp, UserId};
use tokio::sync::RwLock;
use tokio::task::JoinHandle;

use crate::background::spawn_best_effort;
use crate::clock::Clock;
use crate::connection::{fan_out, ConnectionHandle};
use crate::repository::UserRepository;

/// 一次注册/注销带来的在线状态变化
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum PresenceChange {
    /// 用户的第一条连接
    CameOnline,
    /// 用户的最后一条连接断开
    WentOffline,
    /// 其他设备仍在线，或者重复调用
    Unchanged,
}

/// 注册表操作的结果。
///
/// 在线状态写库是尽力而为的后台任务，`persistence` 只是它的句柄；
/// 内存里的在线状态在返回时已经生效，与写库成败无关。
#[derive(Debug)]
pub struct PresenceUpdate {
    pub change: PresenceChange,
    pub persistence: Option<JoinHandle<()>>,
}

impl PresenceUpdate {
    fn unchanged() -> Self {
        Self {
            change: PresenceChange::Unchanged,
            persistence: None,
        }
    }
}

/// 在线状态注册表
///
/// 维护 用户 → 连接集合 的映射（多设备），不是每个用户一个槽位，
/// 一台设备上线不会覆盖另一台设备的会话。所有修改都在同一把写锁内完成。
pub struct PresenceRegistry {
    connections: RwLock<HashMap<UserId, HashMap<ConnectionId, ConnectionHandle>>>,
    users: Arc<dyn UserRepository>,
    clock: Arc<dyn Clock>,
}

impl PresenceRegistry {
    pub fn new(users: Arc<dyn UserRepository>, clock: Arc<dyn Clock>) -> Self {
        Self {
            connections: RwLock::new(HashMap::new()),
            users,
            clock,
        }
    }

    /// 登记连接。用户的第一条连接会把用户标记为在线，并通知其他所有在线连接。
    /// 对同一句柄幂等。
    pub async fn register(&self, handle: ConnectionHandle) -> PresenceUpdate {
        let user_id = handle.user_id();
        let connection_id = handle.id();

        // 广播和取时间都在写锁内，事件顺序与状态变化顺序一致
        let (report, at) = {
            let mut connections = self.connections.write().await;
            let devices = connections.entry(user_id).or_default();
            if devices.contains_key(&connection_id) {
                return PresenceUpdate::unchanged();
            }
            devices.insert(connection_id, handle);
            if devices.len() > 1 {
                tracing::debug!(%user_id, %connection_id, devices = devices.len(), "additional device connected");
                return PresenceUpdate::unchanged();
            }
            let audience = Self::collect_except(&connections, user_id);
            (
                fan_out(audience.iter(), &ServerEvent::UserOnline { user_id }),
                self.clock.now(),
            )
        };
        tracing::info!(%user_id, %connection_id, notified = report.delivered, "user online");

        PresenceUpdate {
            change: PresenceChange::CameOnline,
            persistence: Some(self.persist(user_id, true, at)),
        }
    }

    /// 注销连接。用户的连接集合清空时标记离线、记录最后在线时间并广播一次离线事件。
    /// 对未知句柄是空操作，断线信号重复到达时可以安全地多次调用。
    pub async fn unregister(&self, user_id: UserId, connection_id: ConnectionId) -> PresenceUpdate {
        let (report, at) = {
            let mut connections = self.connections.write().await;
            let Some(devices) = connections.get_mut(&user_id) else {
                return PresenceUpdate::unchanged();
            };
            if devices.remove(&connection_id).is_none() {
                return PresenceUpdate::unchanged();
            }
            if !devices.is_empty() {
                return PresenceUpdate::unchanged();
            }
            connections.remove(&user_id);
            let audience = Self::collect_except(&connections, user_id);
            (
                fan_out(audience.iter(), &ServerEvent::UserOffline { user_id }),
                self.clock.now(),
            )
        };
        tracing::info!(%user_id, %connection_id, notified = report.delivered, "user offline");

        PresenceUpdate {
            change: PresenceChange::WentOffline,
            persistence: Some(self.persist(user_id, false, at)),
        }
    }

    pub async fn is_online(&self, user_id: UserId) -> bool {
        self.connections.read().await.contains_key(&user_id)
    }

    /// 当前在线用户，用来给新连接的客户端做初始同步
    pub async fn snapshot_online_users(&self) -> Vec<UserId> {
        let mut users: Vec<UserId> = self.connections.read().await.keys().copied().collect();
        users.sort();
        users
    }

    /// 某个用户的全部在线连接
    pub async fn connections_of(&self, user_id: UserId) -> Vec<ConnectionHandle> {
        self.connections
            .read()
            .await
            .get(&user_id)
            .map(|devices| devices.values().cloned().collect())
            .unwrap_or_default()
    }

    fn collect_except(
        connections: &HashMap<UserId, HashMap<ConnectionId, ConnectionHandle>>,
        user_id: UserId,
    ) -> Vec<ConnectionHandle> {
        connections
            .iter()
            .filter(|(owner, _)| **owner != user_id)
            .flat_map(|(_, devices)| devices.values().cloned())
            .collect()
    }

    /// `at` 在写锁内取得，存储端按它丢弃过期的写入
    fn persist(&self, user_id: UserId, online: bool, at: Timestamp) -> JoinHandle<()> {
        let users = self.users.clone();
        spawn_best_effort("persist_presence", async move {
            users.set_presence(user_id, online, at).await
        })
    }
}
