use crate::errors::DomainError;
use crate::value_objects::{ConversationId, Timestamp, UserId};

/// 会话：一组参与者之间的消息容器。
///
/// 不变量：
/// - 参与者唯一，且必须包含创建者；
/// - 非群聊恰好两名参与者；
/// - `updated_at` 在每条被接受的消息之后刷新，用于列表排序。
#[derive(Debug, Clone, PartialEq, Eq, serde::Serialize, serde::Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct Conversation {
    pub id: ConversationId,
    pub participants: Vec<UserId>,
    pub title: Option<String>,
    pub is_group: bool,
    pub created_by: UserId,
    pub created_at: Timestamp,
    pub updated_at: Timestamp,
}

impl Conversation {
    pub fn new(
        id: ConversationId,
        creator: UserId,
        participants: impl IntoIterator<Item = UserId>,
        title: Option<String>,
        is_group: bool,
        now: Timestamp,
    ) -> Result<Self, DomainError> {
        let mut members: Vec<UserId> = Vec::new();
        for participant in participants {
            if !members.contains(&participant) {
                members.push(participant);
            }
        }
        if !members.contains(&creator) {
            members.push(creator);
        }

        if !is_group && members.len() != 2 {
            return Err(DomainError::validation_error(
                "participants",
                "a direct conversation needs exactly two participants",
            ));
        }
        if is_group && members.len() < 2 {
            return Err(DomainError::validation_error(
                "participants",
                "a group conversation needs at least two participants",
            ));
        }

        // 标题只对群聊有意义
        let title = if is_group {
            title.map(|t| t.trim().to_owned()).filter(|t| !t.is_empty())
        } else {
            None
        };

        Ok(Self {
            id,
            participants: members,
            title,
            is_group,
            created_by: creator,
            created_at: now,
            updated_at: now,
        })
    }

    /// 群资料修改：标题为空白时清除；参与者整体替换，创建者始终保留
    pub fn update_group(
        &mut self,
        title: Option<String>,
        participants: Option<Vec<UserId>>,
        now: Timestamp,
    ) -> Result<(), DomainError> {
        if !self.is_group {
            return Err(DomainError::validation_error(
                "isGroup",
                "only group conversations can be updated",
            ));
        }

        if let Some(participants) = participants {
            let mut members: Vec<UserId> = vec![self.created_by];
            for participant in participants {
                if !members.contains(&participant) {
                    members.push(participant);
                }
            }
            if members.len() < 2 {
                return Err(DomainError::validation_error(
                    "participants",
                    "a group conversation needs at least two participants",
                ));
            }
            self.participants = members;
        }

        if let Some(title) = title {
            let title = title.trim();
            self.title = (!title.is_empty()).then(|| title.to_owned());
        }

        self.touch(now);
        Ok(())
    }

    pub fn has_participant(&self, user_id: UserId) -> bool {
        self.participants.contains(&user_id)
    }

    pub fn touch(&mut self, at: Timestamp) {
        if at > self.updated_at {
            self.updated_at = at;
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use chrono::Utc;

    #[test]
    fn creator_is_added_and_duplicates_are_dropped() {
        let creator = UserId::generate();
        let other = UserId::generate();
        let conversation = Conversation::new(
            ConversationId::generate(),
            creator,
            vec![other, other],
            Some("ignored".into()),
            false,
            Utc::now(),
        )
        .unwrap();

        assert_eq!(conversation.participants.len(), 2);
        assert!(conversation.has_participant(creator));
        assert!(conversation.has_participant(other));
        assert_eq!(conversation.title, None);
    }

    #[test]
    fn direct_conversation_requires_two_participants() {
        let creator = UserId::generate();
        let result = Conversation::new(
            ConversationId::generate(),
            creator,
            vec![UserId::generate(), UserId::generate()],
            None,
            false,
            Utc::now(),
        );
        assert!(matches!(result, Err(DomainError::ValidationError { .. })));
    }

    #[test]
    fn group_keeps_title() {
        let creator = UserId::generate();
        let conversation = Conversation::new(
            ConversationId::generate(),
            creator,
            vec![UserId::generate(), UserId::generate()],
            Some("  team  ".into()),
            true,
            Utc::now(),
        )
        .unwrap();
        assert_eq!(conversation.participants.len(), 3);
        assert_eq!(conversation.title.as_deref(), Some("team"));
    }

    #[test]
    fn group_update_keeps_creator_and_clears_blank_title() {
        let now = Utc::now();
        let creator = UserId::generate();
        let (bob, carol) = (UserId::generate(), UserId::generate());
        let mut group = Conversation::new(
            ConversationId::generate(),
            creator,
            vec![bob],
            Some("team".into()),
            true,
            now,
        )
        .unwrap();

        let later = now + chrono::Duration::seconds(1);
        group
            .update_group(Some("   ".into()), Some(vec![carol, carol]), later)
            .unwrap();

        assert_eq!(group.participants, vec![creator, carol]);
        assert_eq!(group.title, None);
        assert_eq!(group.updated_at, later);

        let err = group.update_group(None, Some(vec![creator]), later);
        assert!(matches!(err, Err(DomainError::ValidationError { .. })));
        assert_eq!(group.participants, vec![creator, carol]);
    }

    #[test]
    fn direct_conversation_cannot_be_updated() {
        let mut direct = Conversation::new(
            ConversationId::generate(),
            UserId::generate(),
            vec![UserId::generate()],
            None,
            false,
            Utc::now(),
        )
        .unwrap();
        let result = direct.update_group(Some("x".into()), None, Utc::now());
        assert!(matches!(result, Err(DomainError::ValidationError { .. })));
    }

    #[test]
    fn touch_never_moves_backwards() {
        let now = Utc::now();
        let mut conversation = Conversation::new(
            ConversationId::generate(),
            UserId::generate(),
            vec![UserId::generate()],
            None,
            false,
            now,
        )
        .unwrap();
        conversation.touch(now - chrono::Duration::seconds(5));
        assert_eq!(conversation.updated_at, now);
    }
}
