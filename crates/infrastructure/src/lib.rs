//! 基础设施层实现。
//!
//! 提供内存存储和 PostgreSQL 仓储，实现应用层定义的存储接口。

pub mod builder;
pub mod memory;
pub mod migrations;
pub mod repository;

pub use builder::{Infrastructure, InfrastructureError, StorageConfig};
pub use memory::InMemoryStore;
pub use migrations::MIGRATOR;
pub use repository::{
    create_pg_pool, PgConversationRepository, PgMessageRepository, PgStorage, PgUserRepository,
};
