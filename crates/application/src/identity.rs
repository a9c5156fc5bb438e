use async_trait::async_trait;
use domain::UserIdentity;

use crate::error::ApplicationError;

/// 凭证校验：给定 token，解析出用户身份或者失败。
#[cfg_attr(test, mockall::automock)]
#[async_trait]
pub trait IdentityResolver: Send + Sync {
    async fn resolve(&self, credential: &str) -> Result<UserIdentity, ApplicationError>;
}
