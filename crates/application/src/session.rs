use std::future::Future;
use std::sync::Arc;

use domain::{ClientEvent, ConnectionId, ServerEvent, UserId, UserIdentity};
use tokio::sync::mpsc;

use crate::connection::ConnectionHandle;
use crate::error::{ApplicationError, ApplicationResult};
use crate::fanout::SubmitMessage;
use crate::read_receipts::ReadOrigin;
use crate::realtime::Realtime;

/// 连接状态机：`Connecting → Authenticated → Active → Closed`
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum SessionState {
    Connecting,
    Authenticated,
    Active,
    Closed,
}

/// 单条实时连接的会话，与具体传输层无关。
///
/// 传输层负责收发帧：收到的帧按顺序交给 [`ConnectionSession::dispatch_frame`]，
/// 逐个 `await`，同一连接上的事件因此保持接收顺序；出站事件从
/// 握手返回的接收端读取。断线时调用 [`ConnectionSession::close`]。
pub struct ConnectionSession {
    realtime: Arc<Realtime>,
    state: SessionState,
    identity: Option<UserIdentity>,
    handle: Option<ConnectionHandle>,
}

impl ConnectionSession {
    pub(crate) fn new(realtime: Arc<Realtime>) -> Self {
        Self {
            realtime,
            state: SessionState::Connecting,
            identity: None,
            handle: None,
        }
    }

    pub fn state(&self) -> SessionState {
        self.state
    }

    pub fn identity(&self) -> Option<&UserIdentity> {
        self.identity.as_ref()
    }

    pub fn user_id(&self) -> Option<UserId> {
        self.identity.as_ref().map(|identity| identity.id)
    }

    pub fn connection_id(&self) -> Option<ConnectionId> {
        self.handle.as_ref().map(ConnectionHandle::id)
    }

    /// 用已知凭证完成握手
    pub async fn authenticate(
        &mut self,
        credential: &str,
    ) -> ApplicationResult<mpsc::Receiver<ServerEvent>> {
        let credential = credential.to_owned();
        self.handshake(async move { Ok(credential) }).await
    }

    /// 握手：等待凭证并校验，整个过程受超时约束。
    ///
    /// 成功后登记在线状态、向本连接推送在线用户快照，进入 `Active`；
    /// 失败或超时直接进入 `Closed`，此前没有任何注册表写入，不需要回滚。
    pub async fn handshake<F>(
        &mut self,
        credential: F,
    ) -> ApplicationResult<mpsc::Receiver<ServerEvent>>
    where
        F: Future<Output = ApplicationResult<String>>,
    {
        if self.state != SessionState::Connecting {
            return Err(ApplicationError::authentication("handshake already attempted"));
        }

        let realtime = self.realtime.clone();
        let timeout = realtime.settings.handshake_timeout;
        let resolved = tokio::time::timeout(timeout, async {
            let token = credential.await?;
            if token.trim().is_empty() {
                return Err(ApplicationError::authentication("missing credential"));
            }
            realtime.identity.resolve(token.trim()).await
        })
        .await;

        let identity = match resolved {
            Ok(Ok(identity)) => identity,
            Ok(Err(err)) => {
                self.state = SessionState::Closed;
                tracing::warn!(error = %err, "handshake rejected");
                return Err(err);
            }
            Err(_) => {
                self.state = SessionState::Closed;
                tracing::warn!(timeout_ms = timeout.as_millis() as u64, "handshake timed out");
                return Err(ApplicationError::authentication("authentication timed out"));
            }
        };
        self.state = SessionState::Authenticated;

        let (handle, outbound) =
            ConnectionHandle::channel(identity.id, realtime.settings.outbound_buffer);
        realtime.presence().register(handle.clone()).await;

        let snapshot = realtime.presence().snapshot_online_users().await;
        if let Err(err) = handle.deliver(ServerEvent::UsersOnline(snapshot)) {
            tracing::warn!(error = %err, "failed to seed online snapshot");
        }

        tracing::info!(user_id = %identity.id, connection_id = %handle.id(), "session active");
        self.identity = Some(identity);
        self.handle = Some(handle);
        self.state = SessionState::Active;
        Ok(outbound)
    }

    /// 解析并处理一帧文本。格式错误只回报给本连接，连接保持打开。
    pub async fn dispatch_frame(&mut self, text: &str) -> ApplicationResult<()> {
        match ClientEvent::from_json(text) {
            Ok(event) => self.dispatch(event).await,
            Err(err) => {
                let err = ApplicationError::from(err);
                self.report(&err);
                Err(err)
            }
        }
    }

    /// 处理一个入站事件，失败时向本连接发送 `error` 事件。
    pub async fn dispatch(&mut self, event: ClientEvent) -> ApplicationResult<()> {
        let name = event.name();
        let result = self.handle_event(event).await;
        if let Err(err) = &result {
            tracing::debug!(event = name, code = err.code(), error = %err, "event rejected");
            self.report(err);
        }
        result
    }

    async fn handle_event(&mut self, event: ClientEvent) -> ApplicationResult<()> {
        let (identity, handle) = match (&self.state, &self.identity, &self.handle) {
            (SessionState::Active, Some(identity), Some(handle)) => (identity.clone(), handle.clone()),
            _ => {
                return Err(ApplicationError::authentication(
                    "connection is not authenticated",
                ))
            }
        };
        let realtime = self.realtime.clone();

        match event {
            ClientEvent::Auth { .. } => Err(ApplicationError::validation(
                "auth",
                "connection is already authenticated",
            )),
            ClientEvent::ConversationJoin(conversation_id) => {
                if realtime.settings.verify_room_membership {
                    realtime
                        .conversations
                        .find_for_participant(conversation_id, identity.id)
                        .await?
                        .ok_or(ApplicationError::Authorization)?;
                }
                realtime.rooms().join(&handle, conversation_id).await;
                Ok(())
            }
            ClientEvent::ConversationLeave(conversation_id) => {
                realtime.rooms().leave(handle.id(), conversation_id).await;
                Ok(())
            }
            ClientEvent::MessageSend(payload) => {
                realtime
                    .fanout()
                    .submit(
                        Some(&handle),
                        SubmitMessage {
                            sender: identity,
                            conversation_id: payload.conversation_id,
                            content: payload.content,
                            message_type: payload.message_type,
                            media: payload.media,
                        },
                    )
                    .await?;
                Ok(())
            }
            ClientEvent::TypingStart(target) => {
                let scope = target.scope()?;
                realtime
                    .typing()
                    .relay(identity.id, Some(handle.id()), scope, true)
                    .await;
                Ok(())
            }
            ClientEvent::TypingStop(target) => {
                let scope = target.scope()?;
                realtime
                    .typing()
                    .relay(identity.id, Some(handle.id()), scope, false)
                    .await;
                Ok(())
            }
            ClientEvent::MessagesRead(payload) => {
                realtime
                    .read_receipts()
                    .mark_read(
                        ReadOrigin::Socket(handle.id()),
                        payload.conversation_id,
                        identity.id,
                    )
                    .await?;
                Ok(())
            }
        }
    }

    fn report(&self, err: &ApplicationError) {
        if let Some(handle) = &self.handle {
            if let Err(delivery) = handle.deliver(ServerEvent::error(err.code(), err.client_message())) {
                tracing::warn!(error = %delivery, "failed to report error to connection");
            }
        }
    }

    /// 关闭会话：释放房间成员关系并注销在线状态，只会生效一次。
    pub async fn close(&mut self) -> bool {
        if self.state == SessionState::Closed && self.handle.is_none() {
            return false;
        }
        self.state = SessionState::Closed;
        let Some(handle) = self.handle.take() else {
            return false;
        };

        let released = self.realtime.rooms().release_all(handle.id()).await;
        self.realtime
            .presence()
            .unregister(handle.user_id(), handle.id())
            .await;
        tracing::info!(
            user_id = %handle.user_id(),
            connection_id = %handle.id(),
            released,
            "session closed"
        );
        true
    }
}

impl Drop for ConnectionSession {
    fn drop(&mut self) {
        // 传输层没走到 close 时（比如任务被取消）在这里补做清理
        let Some(handle) = self.handle.take() else {
            return;
        };
        let realtime = self.realtime.clone();
        match tokio::runtime::Handle::try_current() {
            Ok(runtime) => {
                runtime.spawn(async move {
                    realtime.rooms().release_all(handle.id()).await;
                    realtime
                        .presence()
                        .unregister(handle.user_id(), handle.id())
                        .await;
                });
            }
            Err(_) => {
                tracing::warn!(connection_id = %handle.id(), "session dropped outside runtime, cleanup skipped");
            }
        }
    }
}

#[cfg(test)]
mod tests {
    use std::time::Duration;

    use super::*;
    use crate::clock::SystemClock;
    use crate::identity::MockIdentityResolver;
    use crate::realtime::{RealtimeDependencies, RealtimeSettings};
    use crate::repository::{
        MockConversationRepository, MockMessageRepository, MockUserRepository,
    };
    use domain::ConversationId;

    fn realtime(identity: MockIdentityResolver, settings: RealtimeSettings) -> Arc<Realtime> {
        let mut users = MockUserRepository::new();
        users.expect_set_presence().returning(|_, _, _| Ok(()));
        let mut conversations = MockConversationRepository::new();
        conversations
            .expect_find_for_participant()
            .returning(|_, _| Ok(None));
        Arc::new(Realtime::new(RealtimeDependencies {
            identity: Arc::new(identity),
            users: Arc::new(users),
            conversations: Arc::new(conversations),
            messages: Arc::new(MockMessageRepository::new()),
            clock: Arc::new(SystemClock),
            settings,
        }))
    }

    fn accepting(user_id: UserId) -> MockIdentityResolver {
        let mut identity = MockIdentityResolver::new();
        identity
            .expect_resolve()
            .returning(move |_| Ok(UserIdentity::anonymous(user_id)));
        identity
    }

    #[tokio::test]
    async fn rejected_credential_leaves_no_trace() {
        let mut identity = MockIdentityResolver::new();
        identity
            .expect_resolve()
            .returning(|_| Err(ApplicationError::authentication("bad token")));
        let realtime = realtime(identity, RealtimeSettings::default());

        let mut session = realtime.open_session();
        let result = session.authenticate("forged").await;

        assert!(matches!(result, Err(ApplicationError::Authentication(_))));
        assert_eq!(session.state(), SessionState::Closed);
        assert!(realtime.presence().snapshot_online_users().await.is_empty());
        assert!(!session.close().await);
    }

    #[tokio::test]
    async fn slow_handshake_times_out() {
        let settings = RealtimeSettings {
            handshake_timeout: Duration::from_millis(20),
            ..RealtimeSettings::default()
        };
        let realtime = realtime(MockIdentityResolver::new(), settings);

        let mut session = realtime.open_session();
        let result = session
            .handshake(std::future::pending::<ApplicationResult<String>>())
            .await;

        assert_eq!(
            result.unwrap_err(),
            ApplicationError::authentication("authentication timed out")
        );
        assert_eq!(session.state(), SessionState::Closed);
    }

    #[tokio::test]
    async fn events_before_authentication_are_refused() {
        let realtime = realtime(MockIdentityResolver::new(), RealtimeSettings::default());
        let mut session = realtime.open_session();

        let result = session
            .dispatch(ClientEvent::ConversationLeave(ConversationId::generate()))
            .await;
        assert!(matches!(result, Err(ApplicationError::Authentication(_))));
    }

    #[tokio::test]
    async fn active_session_gets_snapshot_and_cleans_up_once() {
        let user_id = UserId::generate();
        let realtime = realtime(accepting(user_id), RealtimeSettings::default());

        let mut session = realtime.open_session();
        let mut outbound = session.authenticate("token").await.unwrap();
        assert_eq!(session.state(), SessionState::Active);
        assert_eq!(
            outbound.recv().await,
            Some(ServerEvent::UsersOnline(vec![user_id]))
        );

        assert!(session.close().await);
        assert!(!session.close().await);
        assert!(!realtime.presence().is_online(user_id).await);
    }

    #[tokio::test]
    async fn garbage_frame_reports_error_and_keeps_session() {
        let realtime = realtime(accepting(UserId::generate()), RealtimeSettings::default());
        let mut session = realtime.open_session();
        let mut outbound = session.authenticate("token").await.unwrap();
        let _snapshot = outbound.recv().await;

        assert!(session.dispatch_frame("{not json").await.is_err());
        match outbound.recv().await {
            Some(ServerEvent::Error { code, .. }) => assert_eq!(code, "VALIDATION_FAILED"),
            other => panic!("unexpected {other:?}"),
        }
        assert_eq!(session.state(), SessionState::Active);
    }

    #[tokio::test]
    async fn joining_a_foreign_room_is_refused() {
        let realtime = realtime(accepting(UserId::generate()), RealtimeSettings::default());
        let mut session = realtime.open_session();
        let mut outbound = session.authenticate("token").await.unwrap();
        let _snapshot = outbound.recv().await;

        let room = ConversationId::generate();
        let result = session.dispatch(ClientEvent::ConversationJoin(room)).await;

        assert_eq!(result.unwrap_err(), ApplicationError::Authorization);
        assert_eq!(realtime.rooms().member_count(room).await, 0);
        assert!(matches!(
            outbound.recv().await,
            Some(ServerEvent::Error { code, .. }) if code == "AUTHORIZATION_FAILED"
        ));
    }

    #[tokio::test]
    async fn unverified_join_goes_straight_to_the_room() {
        let settings = RealtimeSettings {
            verify_room_membership: false,
            ..RealtimeSettings::default()
        };
        let realtime = realtime(accepting(UserId::generate()), settings);
        let mut session = realtime.open_session();
        let _outbound = session.authenticate("token").await.unwrap();

        let room = ConversationId::generate();
        session.dispatch(ClientEvent::ConversationJoin(room)).await.unwrap();
        assert_eq!(realtime.rooms().member_count(room).await, 1);

        session.close().await;
        assert_eq!(realtime.rooms().member_count(room).await, 0);
    }
}
