//! JWT 认证
//!
//! 提供 JWT token 生成、验证，以及 REST 接口用的身份提取器。
//! 实时连接和 REST 共用同一个 [`IdentityResolver`] 实现。

use std::sync::Arc;

use application::{ApplicationError, IdentityResolver, UserRepository};
use async_trait::async_trait;
use axum::{
    extract::FromRequestParts,
    http::{header::AUTHORIZATION, request::Parts, HeaderMap},
};
use config::JwtConfig;
use domain::{UserId, UserIdentity};
use jsonwebtoken::{decode, encode, DecodingKey, EncodingKey, Header, Validation};
use serde::{Deserialize, Serialize};
use uuid::Uuid;

use crate::{error::ApiError, state::AppState};

/// JWT Claims 结构
#[derive(Debug, Serialize, Deserialize)]
pub struct Claims {
    pub sub: Uuid,
    pub exp: i64, // 过期时间 (Unix timestamp)
}

/// JWT Token 服务
#[derive(Clone)]
pub struct JwtService {
    expiration_hours: i64,
    encoding_key: EncodingKey,
    decoding_key: DecodingKey,
    users: Arc<dyn UserRepository>,
}

impl JwtService {
    pub fn new(config: &JwtConfig, users: Arc<dyn UserRepository>) -> Self {
        Self {
            expiration_hours: config.expiration_hours,
            encoding_key: EncodingKey::from_secret(config.secret.as_bytes()),
            decoding_key: DecodingKey::from_secret(config.secret.as_bytes()),
            users,
        }
    }

    /// 生成 JWT token
    pub fn generate_token(&self, user_id: UserId) -> Result<String, ApiError> {
        let exp = chrono::Utc::now() + chrono::Duration::hours(self.expiration_hours);
        let claims = Claims {
            sub: user_id.into(),
            exp: exp.timestamp(),
        };

        encode(&Header::default(), &claims, &self.encoding_key)
            .map_err(|err| ApiError::internal_server_error(format!("Token generation failed: {err}")))
    }

    /// 验证签名与过期时间
    pub fn verify_token(&self, token: &str) -> Result<Claims, ApplicationError> {
        decode::<Claims>(token, &self.decoding_key, &Validation::default())
            .map(|data| data.claims)
            .map_err(|err| ApplicationError::authentication(format!("invalid token: {err}")))
    }
}

#[async_trait]
impl IdentityResolver for JwtService {
    async fn resolve(&self, credential: &str) -> Result<UserIdentity, ApplicationError> {
        let claims = self.verify_token(credential)?;
        let user_id = UserId::from(claims.sub);
        let user = self
            .users
            .find_by_id(user_id)
            .await
            .map_err(|err| {
                tracing::error!(%user_id, error = %err, "failed to load user during authentication");
                ApplicationError::authentication("unable to verify user")
            })?
            .ok_or_else(|| ApplicationError::authentication("user no longer exists"))?;
        Ok(user.identity())
    }
}

/// `Authorization: Bearer <token>` 里的 token
pub fn bearer_token(headers: &HeaderMap) -> Option<&str> {
    headers
        .get(AUTHORIZATION)
        .and_then(|header| header.to_str().ok())
        .and_then(|value| value.strip_prefix("Bearer "))
        .map(str::trim)
        .filter(|token| !token.is_empty())
}

/// 已认证的调用方
#[derive(Debug, Clone)]
pub struct AuthUser(pub UserIdentity);

impl FromRequestParts<AppState> for AuthUser {
    type Rejection = ApiError;

    async fn from_request_parts(
        parts: &mut Parts,
        state: &AppState,
    ) -> Result<Self, Self::Rejection> {
        let token = bearer_token(&parts.headers)
            .ok_or_else(|| ApiError::unauthorized("Missing authorization header"))?;
        let identity = state.realtime.identity().resolve(token).await?;
        Ok(AuthUser(identity))
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use chrono::Utc;
    use domain::{RepositoryError, User};
    use infrastructure::InMemoryStore;

    struct UnavailableUsers;

    #[async_trait]
    impl UserRepository for UnavailableUsers {
        async fn find_by_id(&self, _id: UserId) -> Result<Option<User>, RepositoryError> {
            Err(RepositoryError::storage("connection refused"))
        }

        async fn set_presence(
            &self,
            _id: UserId,
            _online: bool,
            _last_seen: domain::Timestamp,
        ) -> Result<(), RepositoryError> {
            Ok(())
        }
    }

    fn config() -> JwtConfig {
        JwtConfig {
            secret: "unit-test-secret".into(),
            expiration_hours: 1,
        }
    }

    #[tokio::test]
    async fn known_user_resolves_to_identity() {
        let store = Arc::new(InMemoryStore::new());
        let alice = User::new(UserId::generate(), "alice", None);
        store.insert_user(alice.clone()).await;
        let jwt = JwtService::new(&config(), store);

        let token = jwt.generate_token(alice.id).unwrap();
        let identity = jwt.resolve(&token).await.unwrap();
        assert_eq!(identity, alice.identity());
    }

    #[tokio::test]
    async fn seeded_memory_backend_accepts_tokens_for_seed_users() {
        let carol = User::new(UserId::generate(), "carol", None);
        let infra = infrastructure::Infrastructure::connect(
            infrastructure::StorageConfig::Memory,
            vec![carol.clone()],
        )
        .await
        .unwrap();
        let jwt = JwtService::new(&config(), infra.users);

        let token = jwt.generate_token(carol.id).unwrap();
        assert_eq!(jwt.resolve(&token).await.unwrap(), carol.identity());
    }

    #[tokio::test]
    async fn unknown_user_is_an_authentication_failure() {
        let jwt = JwtService::new(&config(), Arc::new(InMemoryStore::new()));
        let token = jwt.generate_token(UserId::generate()).unwrap();
        let err = jwt.resolve(&token).await.unwrap_err();
        assert_eq!(err.code(), "AUTHENTICATION_FAILED");
    }

    #[tokio::test]
    async fn storage_failure_is_reported_as_authentication_failure() {
        let jwt = JwtService::new(&config(), Arc::new(UnavailableUsers));
        let token = jwt.generate_token(UserId::generate()).unwrap();

        let err = jwt.resolve(&token).await.unwrap_err();
        assert_eq!(err.code(), "AUTHENTICATION_FAILED");
        assert!(!err.client_message().contains("connection refused"));
    }

    #[test]
    fn expired_token_is_rejected() {
        let jwt = JwtService::new(&config(), Arc::new(InMemoryStore::new()));
        let claims = Claims {
            sub: uuid::Uuid::new_v4(),
            exp: (Utc::now() - chrono::Duration::hours(2)).timestamp(),
        };
        let token = encode(&Header::default(), &claims, &jwt.encoding_key).unwrap();
        assert!(jwt.verify_token(&token).is_err());
    }
}
