use std::fmt;
use std::hash::{Hash, Hasher};

use domain::{ConnectionId, ServerEvent, UserId};
use thiserror::Error;
use tokio::sync::mpsc::{self, error::TrySendError};

use crate::error::ApplicationError;

/// 单个连接的投递失败。只影响这一个成员，不影响其他成员和整体操作。
#[derive(Debug, Error, Clone, PartialEq, Eq)]
pub enum DeliveryError {
    #[error("outbound queue of connection {0} is full")]
    Full(ConnectionId),
    #[error("connection {0} is closed")]
    Closed(ConnectionId),
}

impl From<DeliveryError> for ApplicationError {
    fn from(value: DeliveryError) -> Self {
        ApplicationError::Transport(value.to_string())
    }
}

/// 一条已认证的实时连接在注册表里的句柄。
///
/// 句柄只持有出站队列的发送端；真正写 socket 的是连接自己的发送任务。
/// 投递用 `try_send`，慢连接或者已断开的连接不会阻塞其他成员。
#[derive(Clone)]
pub struct ConnectionHandle {
    id: ConnectionId,
    user_id: UserId,
    outbound: mpsc::Sender<ServerEvent>,
}

impl ConnectionHandle {
    pub fn new(id: ConnectionId, user_id: UserId, outbound: mpsc::Sender<ServerEvent>) -> Self {
        Self {
            id,
            user_id,
            outbound,
        }
    }

    /// 新建句柄以及对应的出站队列接收端
    pub fn channel(user_id: UserId, capacity: usize) -> (Self, mpsc::Receiver<ServerEvent>) {
        let (tx, rx) = mpsc::channel(capacity.max(1));
        (Self::new(ConnectionId::generate(), user_id, tx), rx)
    }

    pub fn id(&self) -> ConnectionId {
        self.id
    }

    pub fn user_id(&self) -> UserId {
        self.user_id
    }

    pub fn deliver(&self, event: ServerEvent) -> Result<(), DeliveryError> {
        self.outbound.try_send(event).map_err(|err| match err {
            TrySendError::Full(_) => DeliveryError::Full(self.id),
            TrySendError::Closed(_) => DeliveryError::Closed(self.id),
        })
    }

    pub fn is_closed(&self) -> bool {
        self.outbound.is_closed()
    }
}

impl PartialEq for ConnectionHandle {
    fn eq(&self, other: &Self) -> bool {
        self.id == other.id
    }
}

impl Eq for ConnectionHandle {}

impl Hash for ConnectionHandle {
    fn hash<H: Hasher>(&self, state: &mut H) {
        self.id.hash(state);
    }
}

impl fmt::Debug for ConnectionHandle {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("ConnectionHandle")
            .field("id", &self.id)
            .field("user_id", &self.user_id)
            .finish()
    }
}

/// 一次扇出的投递结果
#[derive(Debug, Default, Clone, Copy, PartialEq, Eq)]
pub struct DeliveryReport {
    pub delivered: usize,
    pub failed: usize,
}

impl DeliveryReport {
    pub fn record(&mut self, result: Result<(), DeliveryError>) {
        match result {
            Ok(()) => self.delivered += 1,
            Err(err) => {
                tracing::warn!(error = %err, "dropping event for unreachable connection");
                self.failed += 1;
            }
        }
    }

    pub fn attempted(&self) -> usize {
        self.delivered + self.failed
    }
}

/// 把同一事件投递给一组连接，逐个独立处理
pub fn fan_out<'a>(
    targets: impl IntoIterator<Item = &'a ConnectionHandle>,
    event: &ServerEvent,
) -> DeliveryReport {
    let mut report = DeliveryReport::default();
    for handle in targets {
        report.record(handle.deliver(event.clone()));
    }
    report
}
