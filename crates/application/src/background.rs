//! 尽力而为的副作用
//!
//! 在线状态落库之类的操作不影响主流程的成败：
//! 它们在独立任务里执行，失败只记录日志，不向调用方传播。

use std::fmt::Display;
use std::future::Future;

use tokio::task::JoinHandle;

/// 启动一个尽力而为任务。返回的句柄只用于测试或关闭时等待，调用方不需要关心结果。
pub fn spawn_best_effort<F, E>(task: &'static str, fut: F) -> JoinHandle<()>
where
    F: Future<Output = Result<(), E>> + Send + 'static,
    E: Display + Send + 'static,
{
    tokio::spawn(async move {
        if let Err(err) = fut.await {
            tracing::warn!(task, error = %err, "best-effort task failed");
        }
    })
}

/// 就地等待一个尽力而为的操作，失败时记录日志并返回 `false`。
pub async fn run_best_effort<F, E>(task: &'static str, fut: F) -> bool
where
    F: Future<Output = Result<(), E>>,
    E: Display,
{
    match fut.await {
        Ok(()) => true,
        Err(err) => {
            tracing::warn!(task, error = %err, "best-effort operation failed");
            false
        }
    }
}
