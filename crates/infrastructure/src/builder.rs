use std::sync::Arc;

use application::repository::{ConversationRepository, MessageRepository, UserRepository};
use domain::{RepositoryError, User};
use thiserror::Error;

use crate::{
    memory::InMemoryStore,
    migrations::MIGRATOR,
    repository::{create_pg_pool, PgStorage},
};

#[derive(Debug, Clone, Default)]
pub enum StorageConfig {
    #[default]
    Memory,
    Postgres {
        database_url: String,
        max_connections: u32,
    },
}

#[derive(Debug, Error)]
pub enum InfrastructureError {
    #[error("database error: {0}")]
    Database(#[from] sqlx::Error),
    #[error("migration error: {0}")]
    Migration(#[from] sqlx::migrate::MigrateError),
    #[error("failed to seed user: {0}")]
    Seed(RepositoryError),
}

/// 选好后端的三个仓储，交给应用层组装
#[derive(Clone)]
pub struct Infrastructure {
    pub users: Arc<dyn UserRepository>,
    pub conversations: Arc<dyn ConversationRepository>,
    pub messages: Arc<dyn MessageRepository>,
}

impl Infrastructure {
    /// 按配置选择后端并写入预置用户
    pub async fn connect(
        config: StorageConfig,
        seed_users: Vec<User>,
    ) -> Result<Self, InfrastructureError> {
        match config {
            StorageConfig::Memory => {
                let store = Arc::new(InMemoryStore::new());
                if seed_users.is_empty() {
                    tracing::warn!("内存存储没有预置用户，所有认证都会失败");
                }
                let seeded = seed_users.len();
                for user in seed_users {
                    store.insert_user(user).await;
                }
                tracing::info!(seeded, "使用内存存储");
                Ok(Self::in_memory(store))
            }
            StorageConfig::Postgres {
                database_url,
                max_connections,
            } => {
                let pool = create_pg_pool(&database_url, max_connections).await?;
                MIGRATOR.run(&pool).await?;
                tracing::info!(max_connections, "PostgreSQL 已连接，迁移完成");

                let storage = PgStorage::new(pool);
                for user in seed_users {
                    let user_id = user.id;
                    match storage.user_repository.create(user).await {
                        Ok(_) => tracing::info!(%user_id, "预置用户已写入"),
                        Err(RepositoryError::Conflict) => {
                            tracing::debug!(%user_id, "预置用户已存在")
                        }
                        Err(err) => return Err(InfrastructureError::Seed(err)),
                    }
                }

                Ok(Self {
                    users: storage.user_repository,
                    conversations: storage.conversation_repository,
                    messages: storage.message_repository,
                })
            }
        }
    }

    pub fn in_memory(store: Arc<InMemoryStore>) -> Self {
        Self {
            users: store.clone(),
            conversations: store.clone(),
            messages: store,
        }
    }
}
