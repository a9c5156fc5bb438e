use crate::errors::DomainError;
use crate::user::UserIdentity;
use crate::value_objects::{ConversationId, MessageId, Timestamp, UserId};

/// 单条消息正文的最大字符数
pub const MAX_CONTENT_CHARS: usize = 4000;

#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Hash, serde::Serialize, serde::Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum MessageType {
    #[default]
    Text,
    Image,
    Video,
}

impl MessageType {
    pub fn as_str(&self) -> &'static str {
        match self {
            MessageType::Text => "text",
            MessageType::Image => "image",
            MessageType::Video => "video",
        }
    }

    pub fn parse(value: &str) -> Result<Self, DomainError> {
        match value {
            "text" => Ok(MessageType::Text),
            "image" => Ok(MessageType::Image),
            "video" => Ok(MessageType::Video),
            other => Err(DomainError::validation_error(
                "type",
                format!("unsupported message type `{other}`"),
            )),
        }
    }
}

/// 已上传媒体的引用，上传与缩略图由外部服务负责。
#[derive(Debug, Clone, PartialEq, Eq, serde::Serialize, serde::Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct MediaDescriptor {
    pub url: String,
    #[serde(default)]
    pub mime_type: Option<String>,
    #[serde(default)]
    pub size: Option<u64>,
    #[serde(default)]
    pub thumbnail_url: Option<String>,
}

/// 已读标记：某个用户在某个时间看过这条消息。
#[derive(Debug, Clone, PartialEq, Eq, serde::Serialize, serde::Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct ReadMarker {
    pub user_id: UserId,
    pub read_at: Timestamp,
}

#[derive(Debug, Clone, PartialEq, Eq, serde::Serialize, serde::Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct Message {
    pub id: MessageId,
    pub conversation_id: ConversationId,
    pub sender_id: UserId,
    pub content: String,
    #[serde(rename = "type")]
    pub message_type: MessageType,
    pub media: Option<MediaDescriptor>,
    pub created_at: Timestamp,
    /// 存储分配的单调序号，分页以它为准而不是墙钟时间。插入前为 0。
    pub sequence: i64,
    pub read_by: Vec<ReadMarker>,
}

impl Message {
    /// 校验并构造一条新消息，发送者的已读标记随消息一起创建。
    pub fn compose(
        id: MessageId,
        conversation_id: ConversationId,
        sender_id: UserId,
        content: impl Into<String>,
        message_type: MessageType,
        media: Option<MediaDescriptor>,
        now: Timestamp,
    ) -> Result<Self, DomainError> {
        let content = content.into().trim().to_owned();

        if let Some(descriptor) = &media {
            if descriptor.url.trim().is_empty() {
                return Err(DomainError::validation_error(
                    "media",
                    "media reference needs a url",
                ));
            }
        }
        if content.is_empty() && media.is_none() {
            return Err(DomainError::validation_error(
                "content",
                "message needs content or a media reference",
            ));
        }
        if content.chars().count() > MAX_CONTENT_CHARS {
            return Err(DomainError::validation_error("content", "message too long"));
        }

        Ok(Self {
            id,
            conversation_id,
            sender_id,
            content,
            message_type,
            media,
            created_at: now,
            sequence: 0,
            read_by: vec![ReadMarker {
                user_id: sender_id,
                read_at: now,
            }],
        })
    }

    pub fn is_read_by(&self, user_id: UserId) -> bool {
        self.read_by.iter().any(|marker| marker.user_id == user_id)
    }

    /// 追加已读标记；已存在时不覆盖，返回是否真的追加了。
    pub fn mark_read_by(&mut self, user_id: UserId, at: Timestamp) -> bool {
        if self.is_read_by(user_id) {
            return false;
        }
        self.read_by.push(ReadMarker {
            user_id,
            read_at: at,
        });
        true
    }
}

/// 广播给客户端的消息：持久化副本加上解析好的发送者资料。
#[derive(Debug, Clone, PartialEq, Eq, serde::Serialize, serde::Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct MessageView {
    #[serde(flatten)]
    pub message: Message,
    pub sender: UserIdentity,
}

impl MessageView {
    pub fn new(message: Message, sender: UserIdentity) -> Self {
        Self { message, sender }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use chrono::Utc;

    fn compose(content: &str, media: Option<MediaDescriptor>) -> Result<Message, DomainError> {
        Message::compose(
            MessageId::generate(),
            ConversationId::generate(),
            UserId::generate(),
            content,
            MessageType::Text,
            media,
            Utc::now(),
        )
    }

    #[test]
    fn sender_reads_own_message_on_creation() {
        let message = compose("hi", None).unwrap();
        assert_eq!(message.read_by.len(), 1);
        assert!(message.is_read_by(message.sender_id));
    }

    #[test]
    fn empty_content_without_media_is_rejected() {
        assert!(compose("   ", None).is_err());
    }

    #[test]
    fn media_only_message_is_accepted() {
        let media = MediaDescriptor {
            url: "https://cdn.example.com/a.png".into(),
            mime_type: Some("image/png".into()),
            size: Some(42),
            thumbnail_url: None,
        };
        let message = compose("", Some(media)).unwrap();
        assert!(message.content.is_empty());
    }

    #[test]
    fn media_without_url_is_rejected() {
        let media = MediaDescriptor {
            url: " ".into(),
            mime_type: None,
            size: None,
            thumbnail_url: None,
        };
        assert!(compose("caption", Some(media)).is_err());
    }

    #[test]
    fn mark_read_is_append_only() {
        let mut message = compose("hello", None).unwrap();
        let reader = UserId::generate();
        let first = Utc::now();
        assert!(message.mark_read_by(reader, first));
        assert!(!message.mark_read_by(reader, first + chrono::Duration::seconds(3)));
        let markers: Vec<_> = message
            .read_by
            .iter()
            .filter(|m| m.user_id == reader)
            .collect();
        assert_eq!(markers.len(), 1);
        assert_eq!(markers[0].read_at, first);
    }

    #[test]
    fn message_type_wire_names() {
        assert_eq!(serde_json::to_string(&MessageType::Video).unwrap(), "\"video\"");
        assert_eq!(MessageType::parse("image").unwrap(), MessageType::Image);
        assert!(MessageType::parse("file").is_err());
    }
}
