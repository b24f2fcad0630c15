use std::sync::Arc;

use super::Registry;
use crate::errors::RegistryError;

/// Async-safe wrapper around [`Registry`].
///
/// Registry calls do blocking file I/O and take file locks, so async callers
/// go through [`RegistryHandle::call`], which runs the closure on tokio's
/// blocking pool.
#[derive(Clone)]
pub struct RegistryHandle {
    inner: Arc<Registry>,
}

impl RegistryHandle {
    pub fn new(registry: Registry) -> Self {
        Self {
            inner: Arc::new(registry),
        }
    }

    /// Run a closure with access to the registry on a blocking thread.
    /// All data passed into `f` must be owned (`'static`).
    pub async fn call<F, R>(&self, f: F) -> Result<R, RegistryError>
    where
        F: FnOnce(&Registry) -> Result<R, RegistryError> + Send + 'static,
        R: Send + 'static,
    {
        let registry = self.inner.clone();
        tokio::task::spawn_blocking(move || f(&registry))
            .await
            .map_err(|e| RegistryError::TaskFailed(e.to_string()))?
    }

    /// Direct access for synchronous contexts (CLI commands, tests).
    /// Must not be used on a hot async path.
    pub fn blocking(&self) -> &Registry {
        &self.inner
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::config::Config;
    use crate::registry::{NoArtifacts, ProjectFields};
    use tempfile::TempDir;

    #[tokio::test]
    async fn test_call_runs_on_blocking_pool() {
        let dir = TempDir::new().unwrap();
        let config = Config::new(dir.path());
        let handle = RegistryHandle::new(Registry::new(&config, Arc::new(NoArtifacts)));

        handle
            .call(|r| {
                r.create(
                    "docs-a",
                    "https://github.com/acme/docs-a",
                    ProjectFields::default(),
                )
            })
            .await
            .unwrap();

        assert!(handle.call(|r| r.has("docs-a")).await.unwrap());
        assert!(handle.blocking().has("docs-a").unwrap());
    }

    #[tokio::test]
    async fn test_call_propagates_errors() {
        let dir = TempDir::new().unwrap();
        let config = Config::new(dir.path());
        let handle = RegistryHandle::new(Registry::new(&config, Arc::new(NoArtifacts)));

        let err = handle
            .call(|r| r.get_for_api("ghost"))
            .await
            .unwrap_err();
        assert!(matches!(err, RegistryError::NotFound { .. }));
    }
}
