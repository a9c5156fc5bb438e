//! 实时通道上的事件定义
//!
//! 所有帧都是 `{"event": "<名称>", "data": <负载>}` 形式的 JSON 文本。
//! 入站与出站事件各是一个封闭的枚举，分发时用 `match` 穷尽处理。

use serde::{Deserialize, Serialize};

use crate::errors::DomainError;
use crate::message::{MediaDescriptor, MessageType, MessageView};
use crate::value_objects::{ConversationId, MessageId, UserId};

/// 客户端 → 服务端
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(tag = "event", content = "data")]
pub enum ClientEvent {
    /// 握手时未携带凭证时，第一帧必须是它
    #[serde(rename = "auth")]
    Auth { token: String },
    #[serde(rename = "conversation:join")]
    ConversationJoin(ConversationId),
    #[serde(rename = "conversation:leave")]
    ConversationLeave(ConversationId),
    #[serde(rename = "message:send")]
    MessageSend(SendMessagePayload),
    #[serde(rename = "typing:start")]
    TypingStart(TypingTarget),
    #[serde(rename = "typing:stop")]
    TypingStop(TypingTarget),
    #[serde(rename = "messages:read")]
    MessagesRead(MessagesReadPayload),
}

impl ClientEvent {
    pub fn name(&self) -> &'static str {
        match self {
            ClientEvent::Auth { .. } => "auth",
            ClientEvent::ConversationJoin(_) => "conversation:join",
            ClientEvent::ConversationLeave(_) => "conversation:leave",
            ClientEvent::MessageSend(_) => "message:send",
            ClientEvent::TypingStart(_) => "typing:start",
            ClientEvent::TypingStop(_) => "typing:stop",
            ClientEvent::MessagesRead(_) => "messages:read",
        }
    }

    pub fn from_json(text: &str) -> Result<Self, DomainError> {
        serde_json::from_str(text)
            .map_err(|err| DomainError::validation_error("event", err.to_string()))
    }
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct SendMessagePayload {
    pub conversation_id: ConversationId,
    #[serde(default)]
    pub content: String,
    #[serde(rename = "type", default)]
    pub message_type: MessageType,
    #[serde(default)]
    pub media: Option<MediaDescriptor>,
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct MessagesReadPayload {
    pub conversation_id: ConversationId,
}

/// 输入状态的目标：会话房间或者某个用户（私聊）。
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct TypingTarget {
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub conversation_id: Option<ConversationId>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub recipient_id: Option<UserId>,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum TypingScope {
    Conversation(ConversationId),
    Recipient(UserId),
}

impl TypingTarget {
    pub fn conversation(id: ConversationId) -> Self {
        Self {
            conversation_id: Some(id),
            recipient_id: None,
        }
    }

    pub fn recipient(id: UserId) -> Self {
        Self {
            conversation_id: None,
            recipient_id: Some(id),
        }
    }

    /// 两者都给时以会话为准
    pub fn scope(&self) -> Result<TypingScope, DomainError> {
        match (self.conversation_id, self.recipient_id) {
            (Some(conversation_id), _) => Ok(TypingScope::Conversation(conversation_id)),
            (None, Some(recipient_id)) => Ok(TypingScope::Recipient(recipient_id)),
            (None, None) => Err(DomainError::validation_error(
                "typing",
                "conversationId or recipientId is required",
            )),
        }
    }
}

/// 服务端 → 客户端
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(tag = "event", content = "data")]
pub enum ServerEvent {
    #[serde(rename = "message:new")]
    MessageNew { message: MessageView },
    #[serde(rename = "message:sent", rename_all = "camelCase")]
    MessageSent { message_id: MessageId },
    #[serde(rename = "messages:read", rename_all = "camelCase")]
    MessagesRead {
        conversation_id: ConversationId,
        user_id: UserId,
    },
    #[serde(rename = "message:read", rename_all = "camelCase")]
    MessageRead {
        message_id: MessageId,
        user_id: UserId,
    },
    #[serde(rename = "user:online", rename_all = "camelCase")]
    UserOnline { user_id: UserId },
    #[serde(rename = "user:offline", rename_all = "camelCase")]
    UserOffline { user_id: UserId },
    #[serde(rename = "users:online")]
    UsersOnline(Vec<UserId>),
    #[serde(rename = "user:typing", rename_all = "camelCase")]
    UserTyping {
        user_id: UserId,
        is_typing: bool,
        #[serde(default, skip_serializing_if = "Option::is_none")]
        conversation_id: Option<ConversationId>,
    },
    #[serde(rename = "error")]
    Error { code: String, message: String },
}

impl ServerEvent {
    pub fn name(&self) -> &'static str {
        match self {
            ServerEvent::MessageNew { .. } => "message:new",
            ServerEvent::MessageSent { .. } => "message:sent",
            ServerEvent::MessagesRead { .. } => "messages:read",
            ServerEvent::MessageRead { .. } => "message:read",
            ServerEvent::UserOnline { .. } => "user:online",
            ServerEvent::UserOffline { .. } => "user:offline",
            ServerEvent::UsersOnline(_) => "users:online",
            ServerEvent::UserTyping { .. } => "user:typing",
            ServerEvent::Error { .. } => "error",
        }
    }

    pub fn error(code: impl Into<String>, message: impl Into<String>) -> Self {
        ServerEvent::Error {
            code: code.into(),
            message: message.into(),
        }
    }

    pub fn to_json(&self) -> Result<String, serde_json::Error> {
        serde_json::to_string(self)
    }
}
