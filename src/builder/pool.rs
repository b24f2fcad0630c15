//! Background build pool.
//!
//! Each submitted build runs in its own tokio task. A global semaphore caps
//! how many builds run at once, and a per-project async mutex keeps two
//! builds of the same project from running concurrently. Every task is kept
//! by build id so callers can join or cancel it.

use std::collections::HashMap;
use std::sync::{Arc, Mutex};

use tokio::sync::Semaphore;
use tokio::task::JoinHandle;
use tracing::{debug, info, warn};
use uuid::Uuid;

use super::executor::{BuildExecutor, BuildOutcome};
use crate::registry::Actor;

pub type BuildId = Uuid;

type ProjectLock = Arc<tokio::sync::Mutex<()>>;

pub struct BuildPool {
    executor: Arc<BuildExecutor>,
    semaphore: Arc<Semaphore>,
    project_locks: Mutex<HashMap<String, ProjectLock>>,
    tasks: Mutex<HashMap<BuildId, JoinHandle<BuildOutcome>>>,
}

impl BuildPool {
    pub fn new(executor: Arc<BuildExecutor>, max_concurrent: usize) -> Self {
        Self {
            executor,
            semaphore: Arc::new(Semaphore::new(max_concurrent.max(1))),
            project_locks: Mutex::new(HashMap::new()),
            tasks: Mutex::new(HashMap::new()),
        }
    }

    pub fn executor(&self) -> &Arc<BuildExecutor> {
        &self.executor
    }

    /// Queue a build and return immediately with its id.
    ///
    /// Must be called from within a tokio runtime.
    pub fn submit(&self, name: &str, branch: &str, actor: Actor) -> BuildId {
        self.reap();

        let id = Uuid::new_v4();
        let project = name.trim().to_lowercase();
        let branch = branch.to_string();
        let lock = self.project_lock(&project);
        let semaphore = self.semaphore.clone();
        let executor = self.executor.clone();

        debug!(build_id = %id, project = %project, branch = %branch, actor = %actor, "Build queued");
        let handle = tokio::spawn(async move {
            let _project_guard = lock.lock().await;
            let _permit = match semaphore.acquire_owned().await {
                Ok(permit) => permit,
                Err(_) => return BuildOutcome::Failed,
            };
            executor.run(&project, &branch, actor, |_| {}).await
        });

        lock_map(&self.tasks).insert(id, handle);
        id
    }

    /// Wait for a build to finish.
    ///
    /// Returns `None` for an unknown id or a cancelled build.
    pub async fn join(&self, id: BuildId) -> Option<BuildOutcome> {
        let handle = lock_map(&self.tasks).remove(&id)?;
        match handle.await {
            Ok(outcome) => Some(outcome),
            Err(e) if e.is_cancelled() => None,
            Err(e) => {
                warn!(build_id = %id, error = %e, "Build task panicked");
                None
            }
        }
    }

    /// Abort a build. Its child process is killed when the task is dropped.
    ///
    /// Returns false when the id is unknown.
    pub fn cancel(&self, id: BuildId) -> bool {
        match lock_map(&self.tasks).remove(&id) {
            Some(handle) => {
                handle.abort();
                info!(build_id = %id, "Build cancelled");
                true
            }
            None => false,
        }
    }

    /// Number of tracked builds that have not finished yet.
    pub fn active(&self) -> usize {
        lock_map(&self.tasks)
            .values()
            .filter(|h| !h.is_finished())
            .count()
    }

    /// Abort every tracked build and wait for the tasks to unwind.
    pub async fn shutdown(&self) {
        let handles: Vec<_> = lock_map(&self.tasks).drain().collect();
        if !handles.is_empty() {
            info!(count = handles.len(), "Aborting running builds");
        }
        for (_, handle) in &handles {
            handle.abort();
        }
        for (_, handle) in handles {
            let _ = handle.await;
        }
    }

    /// Drop handles of finished builds nobody joined.
    fn reap(&self) {
        lock_map(&self.tasks).retain(|_, h| !h.is_finished());
    }

    fn project_lock(&self, project: &str) -> ProjectLock {
        lock_map(&self.project_locks)
            .entry(project.to_string())
            .or_default()
            .clone()
    }
}

fn lock_map<K, V>(map: &Mutex<HashMap<K, V>>) -> std::sync::MutexGuard<'_, HashMap<K, V>> {
    map.lock().unwrap_or_else(|poisoned| poisoned.into_inner())
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::config::Config;
    use crate::hub::MessageHub;
    use crate::registry::{BuildStatus, NoArtifacts, ProjectFields, Registry, RegistryHandle};
    use std::time::Duration;
    use tempfile::TempDir;

    fn setup(script_body: &str, max_concurrent: usize) -> (TempDir, BuildPool) {
        let dir = TempDir::new().unwrap();
        let script = dir.path().join("build.sh");
        std::fs::write(&script, script_body).unwrap();
        let mut config = Config::new(dir.path());
        config.build.command = vec!["sh".into(), script.to_string_lossy().to_string()];
        let registry = RegistryHandle::new(Registry::new(&config, Arc::new(NoArtifacts)));
        for name in ["docs-a", "docs-b"] {
            registry
                .blocking()
                .create(
                    name,
                    &format!("https://github.com/acme/{name}"),
                    ProjectFields::default(),
                )
                .unwrap();
        }
        let executor = Arc::new(BuildExecutor::new(
            &config,
            registry,
            Arc::new(MessageHub::new()),
        ));
        (dir, BuildPool::new(executor, max_concurrent))
    }

    #[tokio::test]
    async fn test_submit_and_join() {
        let (_dir, pool) = setup("echo 'Build Successfully 4'\n", 2);
        let id = pool.submit("docs-a", "latest", Actor::Api);
        assert_eq!(
            pool.join(id).await,
            Some(BuildOutcome::Succeeded { elapsed: 4 })
        );
        let record = pool
            .executor()
            .registry()
            .blocking()
            .get("docs-a")
            .unwrap()
            .unwrap();
        assert_eq!(record.status_of("master"), BuildStatus::Passing);
        assert_eq!(pool.join(id).await, None);
    }

    #[tokio::test]
    async fn test_builds_of_one_project_are_serialized() {
        // Each build appends start/end markers; overlap would interleave them.
        let (dir, pool) = setup(
            "echo start >> \"$(dirname \"$0\")/trace\"\nsleep 0.2\necho end >> \"$(dirname \"$0\")/trace\"\necho 'Build Successfully'\n",
            4,
        );
        let a = pool.submit("docs-a", "main", Actor::Webhook);
        let b = pool.submit("docs-a", "main", Actor::Webhook);
        assert!(pool.join(a).await.unwrap().is_success());
        assert!(pool.join(b).await.unwrap().is_success());

        let trace = std::fs::read_to_string(dir.path().join("trace")).unwrap();
        assert_eq!(trace, "start\nend\nstart\nend\n");
    }

    #[tokio::test]
    async fn test_cancel_aborts_build() {
        let (_dir, pool) = setup("exec sleep 30\necho 'Build Successfully'\n", 1);
        let id = pool.submit("docs-a", "main", Actor::Cli);
        tokio::time::sleep(Duration::from_millis(100)).await;
        assert!(pool.cancel(id));
        assert!(!pool.cancel(id));
        assert_eq!(pool.join(id).await, None);
        assert_eq!(pool.active(), 0);
    }

    #[tokio::test]
    async fn test_shutdown_aborts_everything() {
        let (_dir, pool) = setup("exec sleep 30\n", 2);
        pool.submit("docs-a", "main", Actor::Cli);
        pool.submit("docs-b", "main", Actor::Cli);
        pool.shutdown().await;
        assert_eq!(pool.active(), 0);
    }

    #[tokio::test]
    async fn test_unknown_project_outcome() {
        let (_dir, pool) = setup("echo never\n", 1);
        let id = pool.submit("ghost", "main", Actor::Api);
        assert_eq!(pool.join(id).await, Some(BuildOutcome::NotFound));
    }
}
