//! RAII-based cleanup for background tasks.
//!
//! Every spawned pipeline task (watch/discovery/resend/aggregation, plus the
//! heartbeat) is registered here under a name, so SIGTERM can join the whole
//! set with one bounded timeout instead of hand-tracking `JoinHandle`s at
//! every call site (see SPEC_FULL.md §5).

use std::collections::HashMap;
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::Arc;
use std::time::Duration;

use async_trait::async_trait;
use tokio::sync::RwLock;
use tokio::task::JoinHandle;

use crate::errors::AppResult;

#[async_trait]
pub trait Cleanup: Send + Sync {
    async fn cleanup(&self) -> AppResult<()>;
    fn is_cleaned_up(&self) -> bool;
    fn component_name(&self) -> &str;
}

/// RAII guard for automatic cleanup on drop, used for values owned for the
/// lifetime of `main` (e.g. the top-level `TaskManager`) where an explicit
/// `.cleanup().await` on every exit path would be easy to forget.
pub struct CleanupGuard<T: Cleanup + 'static> {
    resource: Option<T>,
    auto_cleanup: bool,
}

impl<T: Cleanup + 'static> CleanupGuard<T> {
    pub fn new(resource: T) -> Self {
        Self {
            resource: Some(resource),
            auto_cleanup: true,
        }
    }

    pub fn get(&self) -> Option<&T> {
        self.resource.as_ref()
    }

    pub async fn cleanup(mut self) -> AppResult<()> {
        if let Some(resource) = self.resource.take() {
            resource.cleanup().await?;
        }
        Ok(())
    }
}

impl<T: Cleanup + 'static> Drop for CleanupGuard<T> {
    fn drop(&mut self) {
        if self.auto_cleanup {
            if let Some(resource) = self.resource.take() {
                if let Ok(handle) = tokio::runtime::Handle::try_current() {
                    let component_name = resource.component_name().to_string();
                    handle.spawn(async move {
                        if let Err(e) = resource.cleanup().await {
                            tracing::warn!(component = %component_name, error = %e, "cleanup failed");
                        }
                    });
                } else {
                    tracing::warn!(component = resource.component_name(), "cannot run async cleanup: no runtime");
                }
            }
        }
    }
}

pub struct ManagedTask {
    handle: Option<JoinHandle<()>>,
    name: String,
    cleaned_up: AtomicBool,
}

impl ManagedTask {
    pub fn new(handle: JoinHandle<()>, name: impl Into<String>) -> Self {
        Self {
            handle: Some(handle),
            name: name.into(),
            cleaned_up: AtomicBool::new(false),
        }
    }

    pub fn is_finished(&self) -> bool {
        self.handle.as_ref().map_or(true, |h| h.is_finished())
    }

    pub fn abort(&mut self) {
        if let Some(handle) = self.handle.take() {
            handle.abort();
        }
        self.cleaned_up.store(true, Ordering::SeqCst);
    }

    /// Wait up to `timeout` for the task to finish on its own, then abort it.
    async fn join_or_abort(&mut self, timeout: Duration) {
        if let Some(mut handle) = self.handle.take() {
            if tokio::time::timeout(timeout, &mut handle).await.is_err() {
                handle.abort();
            }
        }
        self.cleaned_up.store(true, Ordering::SeqCst);
    }
}

#[async_trait]
impl Cleanup for ManagedTask {
    async fn cleanup(&self) -> AppResult<()> {
        if let Some(handle) = &self.handle {
            if !handle.is_finished() {
                handle.abort();
            }
        }
        self.cleaned_up.store(true, Ordering::SeqCst);
        Ok(())
    }

    fn is_cleaned_up(&self) -> bool {
        self.cleaned_up.load(Ordering::SeqCst)
    }

    fn component_name(&self) -> &str {
        &self.name
    }
}

/// Registry of every spawned pipeline task, keyed by `"<kind>:<role>"`
/// (e.g. `"pods:watch"`, `"services:aggregate"`, `"heartbeat"`).
pub struct TaskManager {
    tasks: Arc<RwLock<HashMap<String, ManagedTask>>>,
    name: String,
    cleaned_up: AtomicBool,
}

impl TaskManager {
    pub fn new(name: impl Into<String>) -> Self {
        Self {
            tasks: Arc::new(RwLock::new(HashMap::new())),
            name: name.into(),
            cleaned_up: AtomicBool::new(false),
        }
    }

    pub async fn spawn_task<F>(&self, id: impl Into<String>, future: F)
    where
        F: std::future::Future<Output = ()> + Send + 'static,
    {
        let id = id.into();
        let handle = tokio::spawn(future);
        let managed_task = ManagedTask::new(handle, id.clone());
        self.tasks.write().await.insert(id, managed_task);
    }

    pub async fn active_task_count(&self) -> usize {
        self.tasks.read().await.values().filter(|t| !t.is_finished()).count()
    }

    pub async fn active_task_ids(&self) -> Vec<String> {
        self.tasks
            .read()
            .await
            .iter()
            .filter(|(_, t)| !t.is_finished())
            .map(|(id, _)| id.clone())
            .collect()
    }

    /// Bounded-timeout shutdown: every task gets up to `timeout` to finish
    /// cooperatively (checking the shared exit flag), then is aborted.
    pub async fn shutdown(&self, timeout: Duration) {
        let mut tasks = self.tasks.write().await;
        for (_, task) in tasks.iter_mut() {
            task.join_or_abort(timeout).await;
        }
        self.cleaned_up.store(true, Ordering::SeqCst);
    }
}

#[async_trait]
impl Cleanup for TaskManager {
    async fn cleanup(&self) -> AppResult<()> {
        self.shutdown(Duration::from_secs(3)).await;
        Ok(())
    }

    fn is_cleaned_up(&self) -> bool {
        self.cleaned_up.load(Ordering::SeqCst)
    }

    fn component_name(&self) -> &str {
        &self.name
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use tokio::time::sleep;

    #[tokio::test]
    async fn shutdown_joins_fast_tasks_without_aborting() {
        let manager = TaskManager::new("test");
        manager
            .spawn_task("quick", async {
                sleep(Duration::from_millis(5)).await;
            })
            .await;
        sleep(Duration::from_millis(20)).await;
        assert_eq!(manager.active_task_count().await, 0);
        manager.shutdown(Duration::from_millis(100)).await;
        assert!(manager.is_cleaned_up());
    }

    #[tokio::test]
    async fn shutdown_aborts_tasks_past_timeout() {
        let manager = TaskManager::new("test");
        manager
            .spawn_task("slow", async {
                sleep(Duration::from_secs(10)).await;
            })
            .await;
        assert_eq!(manager.active_task_count().await, 1);
        manager.shutdown(Duration::from_millis(20)).await;
        assert_eq!(manager.active_task_count().await, 0);
    }

    #[tokio::test]
    async fn managed_task_abort_marks_cleaned_up() {
        let handle = tokio::spawn(async {
            sleep(Duration::from_secs(10)).await;
        });
        let mut task = ManagedTask::new(handle, "t");
        assert!(!task.is_finished());
        task.abort();
        assert!(task.is_cleaned_up());
    }
}
