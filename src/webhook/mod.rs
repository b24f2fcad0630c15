//! Webhook dispatch: authenticate a provider event and turn it into a build.

pub mod provider;
pub mod signature;

use std::sync::Arc;

use axum::http::HeaderMap;
use serde_json::Value;
use tracing::{info, warn};

use crate::builder::{BuildId, BuildPool};
use crate::errors::WebhookError;
use crate::registry::{Actor, RegistryHandle};

pub use provider::{Provider, WebhookEvent};

/// Successful result of a dispatch.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum Dispatched {
    /// Ping event answered without touching any project.
    Pong,
    /// Valid event that does not trigger a build.
    Ignored { reason: String },
    /// A build was submitted to the pool.
    Triggered { branch: String, build_id: BuildId },
}

pub struct WebhookDispatcher {
    registry: RegistryHandle,
    pool: Arc<BuildPool>,
    default_branch: String,
}

impl WebhookDispatcher {
    pub fn new(registry: RegistryHandle, pool: Arc<BuildPool>, default_branch: impl Into<String>) -> Self {
        Self {
            registry,
            pool,
            default_branch: default_branch.into(),
        }
    }

    /// Authenticate and dispatch one webhook delivery for project `name`.
    ///
    /// Returns as soon as the build is queued; it never waits for the build.
    pub async fn dispatch(
        &self,
        name: &str,
        headers: &HeaderMap,
        body: &[u8],
    ) -> Result<Dispatched, WebhookError> {
        let mut seen = (None, None);
        let result = self.dispatch_inner(name, headers, body, &mut seen).await;
        let provider = seen.0.map(|p: Provider| p.to_string()).unwrap_or_else(|| "-".into());
        let event = seen.1.map(|e: WebhookEvent| e.to_string()).unwrap_or_else(|| "-".into());
        match &result {
            Ok(Dispatched::Triggered { branch, build_id }) => info!(
                project = %name, provider = %provider, event = %event, branch = %branch,
                build_id = %build_id, "Webhook triggered build"
            ),
            Ok(other) => info!(
                project = %name, provider = %provider, event = %event, outcome = ?other,
                "Webhook accepted without build"
            ),
            Err(e) => warn!(
                project = %name, provider = %provider, event = %event, code = e.code(),
                error = %e, "Webhook rejected"
            ),
        }
        result
    }

    async fn dispatch_inner(
        &self,
        name: &str,
        headers: &HeaderMap,
        body: &[u8],
        seen: &mut (Option<Provider>, Option<WebhookEvent>),
    ) -> Result<Dispatched, WebhookError> {
        let provider = provider::detect(headers)?;
        seen.0 = Some(provider);
        let event = provider::classify(provider, headers)?;
        seen.1 = Some(event);
        if event == WebhookEvent::Ping {
            return Ok(Dispatched::Pong);
        }

        let key = name.trim().to_lowercase();
        let record = {
            let key = key.clone();
            self.registry.call(move |r| r.get(&key)).await?
        }
        .ok_or_else(|| WebhookError::NotFound { name: key.clone() })?;

        if let Some(secret) = record.secret.as_deref() {
            match provider {
                Provider::GitHub => signature::verify_github(
                    secret,
                    provider::header(headers, provider::HEADER_GITHUB_SIGNATURE),
                    body,
                )?,
                Provider::Gitee => signature::verify_gitee(
                    secret,
                    provider::header(headers, provider::HEADER_GITEE_TOKEN),
                )?,
            }
        }

        let payload: Value = serde_json::from_slice(body)
            .map_err(|e| WebhookError::InvalidPayload(e.to_string()))?;
        let Some(branch) =
            provider::extract_branch(provider, event, &payload, &self.default_branch)?
        else {
            return Ok(Dispatched::Ignored {
                reason: "the action is ignored in the release event".to_string(),
            });
        };

        if record.excluded_branches.iter().any(|b| *b == branch) {
            return Err(WebhookError::ExcludedBranch { branch });
        }

        let build_id = self.pool.submit(&key, &branch, Actor::Webhook);
        Ok(Dispatched::Triggered { branch, build_id })
    }
}
