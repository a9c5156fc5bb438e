//! Web API 层。
//!
//! 提供 Axum 路由：REST 接口和 `/api/v1/ws` 实时通道，
//! 请求都委托给应用层的 [`application::Realtime`]。

mod auth;
mod error;
mod routes;
mod state;
mod websocket;

pub use auth::{bearer_token, AuthUser, Claims, JwtService};
pub use config::JwtConfig;
pub use error::{ApiError, ErrorBody};
pub use routes::router;
pub use state::AppState;
