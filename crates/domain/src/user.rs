use crate::value_objects::{Timestamp, UserId};

/// 持久化的用户记录，只保留实时同步需要的字段。
#[derive(Debug, Clone, PartialEq, Eq, serde::Serialize, serde::Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct User {
    pub id: UserId,
    pub username: String,
    pub avatar: Option<String>,
    pub is_online: bool,
    pub last_seen: Option<Timestamp>,
}

impl User {
    pub fn new(id: UserId, username: impl Into<String>, avatar: Option<String>) -> Self {
        Self {
            id,
            username: username.into(),
            avatar,
            is_online: false,
            last_seen: None,
        }
    }

    /// 比已记录的时间更早的写入会被丢弃，返回是否生效
    pub fn set_presence(&mut self, online: bool, at: Timestamp) -> bool {
        if self.last_seen.is_some_and(|seen| seen > at) {
            return false;
        }
        self.is_online = online;
        self.last_seen = Some(at);
        true
    }

    pub fn identity(&self) -> UserIdentity {
        UserIdentity {
            id: self.id,
            username: self.username.clone(),
            avatar: self.avatar.clone(),
        }
    }
}

/// 认证后得到的用户身份，连接存活期间缓存在内存中，
/// 也作为广播消息里的发送者信息。
#[derive(Debug, Clone, PartialEq, Eq, Hash, serde::Serialize, serde::Deserialize)]
pub struct UserIdentity {
    pub id: UserId,
    pub username: String,
    pub avatar: Option<String>,
}

impl UserIdentity {
    /// 只有 id 的身份，用于发送者资料查不到的场景。
    pub fn anonymous(id: UserId) -> Self {
        Self {
            id,
            username: String::new(),
            avatar: None,
        }
    }
}
