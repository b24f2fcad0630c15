//! Provider detection, event classification and branch extraction.

use std::fmt;

use axum::http::HeaderMap;
use serde_json::Value;

use crate::errors::WebhookError;

pub const HEADER_GITHUB_EVENT: &str = "x-github-event";
pub const HEADER_GITHUB_SIGNATURE: &str = "x-hub-signature";
pub const HEADER_GITEE_EVENT: &str = "x-gitee-event";
pub const HEADER_GITEE_PING: &str = "x-gitee-ping";
pub const HEADER_GITEE_TOKEN: &str = "x-gitee-token";

const GITHUB_AGENT_PREFIX: &str = "GitHub-Hookshot";
const GITEE_AGENT: &str = "git-oschina-hook";

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Provider {
    GitHub,
    Gitee,
}

impl fmt::Display for Provider {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Self::GitHub => f.write_str("github"),
            Self::Gitee => f.write_str("gitee"),
        }
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum WebhookEvent {
    Ping,
    Push,
    Release,
}

impl fmt::Display for WebhookEvent {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Self::Ping => f.write_str("ping"),
            Self::Push => f.write_str("push"),
            Self::Release => f.write_str("release"),
        }
    }
}

pub(crate) fn header<'a>(headers: &'a HeaderMap, name: &str) -> Option<&'a str> {
    headers.get(name).and_then(|v| v.to_str().ok())
}

fn is_true(value: &str) -> bool {
    matches!(
        value.trim().to_ascii_lowercase().as_str(),
        "true" | "1" | "yes" | "on"
    )
}

/// Identify the sender from the `User-Agent` and provider headers.
pub fn detect(headers: &HeaderMap) -> Result<Provider, WebhookError> {
    let agent = header(headers, "user-agent").unwrap_or_default();
    if agent.starts_with(GITHUB_AGENT_PREFIX) {
        Ok(Provider::GitHub)
    } else if agent == GITEE_AGENT || headers.contains_key(HEADER_GITEE_EVENT) {
        Ok(Provider::Gitee)
    } else {
        Err(WebhookError::UnsupportedProvider)
    }
}

pub fn classify(provider: Provider, headers: &HeaderMap) -> Result<WebhookEvent, WebhookError> {
    match provider {
        Provider::GitHub => {
            let event = header(headers, HEADER_GITHUB_EVENT).unwrap_or_default();
            match event {
                "ping" => Ok(WebhookEvent::Ping),
                "push" => Ok(WebhookEvent::Push),
                "release" => Ok(WebhookEvent::Release),
                other => Err(WebhookError::UnsupportedEvent {
                    event: other.to_string(),
                }),
            }
        }
        Provider::Gitee => {
            if header(headers, HEADER_GITEE_PING).is_some_and(is_true) {
                return Ok(WebhookEvent::Ping);
            }
            let event = header(headers, HEADER_GITEE_EVENT).unwrap_or_default();
            match event {
                "Push Hook" => Ok(WebhookEvent::Push),
                "Tag Push Hook" => Ok(WebhookEvent::Release),
                other => Err(WebhookError::UnsupportedEvent {
                    event: other.to_string(),
                }),
            }
        }
    }
}

fn branch_from_ref(body: &Value) -> Option<String> {
    let reference = body.get("ref").and_then(Value::as_str)?.trim();
    let branch = reference
        .strip_prefix("refs/heads/")
        .or_else(|| reference.strip_prefix("refs/tags/"))
        .unwrap_or(reference);
    (!branch.is_empty()).then(|| branch.to_string())
}

/// Branch (or tag) to build for an event.
///
/// `Ok(None)` means the event is valid but deliberately ignored: a GitHub
/// release whose action is not `published`.
pub fn extract_branch(
    provider: Provider,
    event: WebhookEvent,
    body: &Value,
    default_branch: &str,
) -> Result<Option<String>, WebhookError> {
    match (provider, event) {
        (_, WebhookEvent::Ping) => Ok(None),
        (_, WebhookEvent::Push) => Ok(Some(
            branch_from_ref(body).unwrap_or_else(|| default_branch.to_string()),
        )),
        (Provider::GitHub, WebhookEvent::Release) => {
            if body.get("action").and_then(Value::as_str) != Some("published") {
                return Ok(None);
            }
            body.pointer("/release/tag_name")
                .and_then(Value::as_str)
                .map(str::trim)
                .filter(|t| !t.is_empty())
                .map(|t| Some(t.to_string()))
                .ok_or_else(|| WebhookError::InvalidPayload("missing release.tag_name".into()))
        }
        (Provider::Gitee, WebhookEvent::Release) => branch_from_ref(body)
            .map(Some)
            .ok_or_else(|| WebhookError::InvalidPayload("missing tag ref".into())),
    }
}
