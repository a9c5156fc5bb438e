//! WebSocket 传输层
//!
//! 连接升级、握手、帧收发。协议语义全部在 [`application::ConnectionSession`] 里，
//! 这里只负责把 socket 上的帧和会话对接起来。

use application::{ApplicationError, ApplicationResult, ConnectionSession};
use axum::{
    extract::{
        ws::{close_code, CloseFrame, Message as WsMessage, WebSocket, WebSocketUpgrade},
        Query, State,
    },
    http::HeaderMap,
    response::Response,
};
use domain::{ClientEvent, ServerEvent};
use futures_util::{
    sink::SinkExt,
    stream::{SplitSink, SplitStream, StreamExt},
};
use serde::Deserialize;
use tokio::sync::mpsc;

use crate::{auth::bearer_token, state::AppState};

/// WebSocket连接查询参数
#[derive(Debug, Deserialize)]
pub struct WsQuery {
    /// JWT access token，也可以放在 Authorization 头里或者第一帧里
    #[serde(default)]
    pub token: Option<String>,
}

pub async fn websocket_upgrade(
    ws: WebSocketUpgrade,
    State(state): State<AppState>,
    Query(query): Query<WsQuery>,
    headers: HeaderMap,
) -> Response {
    let token = query
        .token
        .filter(|token| !token.trim().is_empty())
        .or_else(|| bearer_token(&headers).map(str::to_owned));

    ws.on_upgrade(move |socket| serve_connection(socket, state, token))
}

/// WebSocket 写操作命令
///
/// 所有对 sender 的写操作都经过发送任务，接收侧只投递命令
#[derive(Debug)]
enum WsCommand {
    SendPong(Vec<u8>),
}

async fn serve_connection(socket: WebSocket, state: AppState, token: Option<String>) {
    let (mut sender, mut incoming) = socket.split();
    let mut session = state.realtime.open_session();

    let handshake = match token {
        Some(token) => session.authenticate(&token).await,
        None => session.handshake(await_auth_frame(&mut incoming)).await,
    };
    let outbound = match handshake {
        Ok(outbound) => outbound,
        Err(err) => {
            reject(&mut sender, &err).await;
            return;
        }
    };

    let user_id = session.user_id();
    let connection_id = session.connection_id();
    tracing::info!(?user_id, ?connection_id, "WebSocket 连接已建立");

    let (cmd_tx, cmd_rx) = mpsc::channel::<WsCommand>(32);
    let mut send_task = tokio::spawn(write_loop(sender, outbound, cmd_rx));

    // 接收侧在当前任务里逐帧 await，同一连接的事件按到达顺序处理
    let recv = read_loop(&mut session, &mut incoming, &cmd_tx);

    tokio::select! {
        _ = recv => {
            tracing::debug!("WebSocket接收结束");
        }
        _ = &mut send_task => {
            tracing::debug!("WebSocket发送任务结束");
        }
    }

    session.close().await;
    send_task.abort();
    tracing::info!(?user_id, ?connection_id, "WebSocket连接已断开，在线状态已清理");
}

/// 没有随升级请求带凭证时，第一帧必须是 `auth`
async fn await_auth_frame(incoming: &mut SplitStream<WebSocket>) -> ApplicationResult<String> {
    while let Some(frame) = incoming.next().await {
        match frame {
            Ok(WsMessage::Text(text)) => {
                return match ClientEvent::from_json(text.as_str()) {
                    Ok(ClientEvent::Auth { token }) => Ok(token),
                    Ok(other) => Err(ApplicationError::authentication(format!(
                        "`{}` received before authentication",
                        other.name()
                    ))),
                    Err(_) => Err(ApplicationError::authentication(
                        "first frame must be an auth event",
                    )),
                };
            }
            Ok(WsMessage::Close(_)) | Err(_) => break,
            Ok(_) => continue,
        }
    }
    Err(ApplicationError::authentication(
        "connection closed before authentication",
    ))
}

async fn reject(sender: &mut SplitSink<WebSocket, WsMessage>, err: &ApplicationError) {
    let event = ServerEvent::error(err.code(), err.client_message());
    match event.to_json() {
        Ok(json) => {
            if sender.send(WsMessage::Text(json.into())).await.is_err() {
                tracing::debug!("client went away before rejection was sent");
            }
        }
        Err(err) => tracing::warn!(error = %err, "failed to serialize rejection"),
    }

    let close = WsMessage::Close(Some(CloseFrame {
        code: close_code::POLICY,
        reason: "authentication failed".into(),
    }));
    if sender.send(close).await.is_err() {
        tracing::debug!("failed to send close frame");
    }
}

async fn read_loop(
    session: &mut ConnectionSession,
    incoming: &mut SplitStream<WebSocket>,
    cmd_tx: &mpsc::Sender<WsCommand>,
) {
    while let Some(frame) = incoming.next().await {
        let message = match frame {
            Ok(message) => message,
            Err(err) => {
                tracing::debug!(error = %err, "WebSocket读取失败");
                break;
            }
        };

        match message {
            WsMessage::Text(text) => {
                // 出错时会话已经把 error 事件回给了本连接
                let _ = session.dispatch_frame(text.as_str()).await;
            }
            WsMessage::Binary(_) => {
                tracing::debug!("忽略二进制帧");
            }
            WsMessage::Ping(data) => {
                tracing::debug!("收到ping消息，发送pong回应");
                if cmd_tx.send(WsCommand::SendPong(data.to_vec())).await.is_err() {
                    break;
                }
            }
            WsMessage::Pong(_) => {}
            WsMessage::Close(_) => {
                tracing::info!("WebSocket收到关闭消息");
                break;
            }
        }
    }
}

async fn write_loop(
    mut sender: SplitSink<WebSocket, WsMessage>,
    mut outbound: mpsc::Receiver<ServerEvent>,
    mut cmd_rx: mpsc::Receiver<WsCommand>,
) {
    loop {
        tokio::select! {
            Some(cmd) = cmd_rx.recv() => {
                match cmd {
                    WsCommand::SendPong(data) => {
                        if sender.send(WsMessage::Pong(data.into())).await.is_err() {
                            tracing::warn!("Failed to send pong message");
                            break;
                        }
                    }
                }
            }
            event = outbound.recv() => {
                let Some(event) = event else {
                    break;
                };
                let payload = match event.to_json() {
                    Ok(json) => json,
                    Err(err) => {
                        tracing::warn!(error = %err, event = event.name(), "failed to serialize websocket payload");
                        continue;
                    }
                };
                if sender.send(WsMessage::Text(payload.into())).await.is_err() {
                    tracing::warn!("Failed to send text message");
                    break;
                }
            }
        }
    }
    tracing::info!("WebSocket发送任务结束");
}
