//! Runs the external build command for one project and branch.
//!
//! The child's stdout and stderr share one OS pipe so the combined stream
//! keeps the order the process wrote it in. A blocking reader thread splits
//! the pipe into lines and forwards them over a channel; each line goes to
//! the caller's callback and to the message hub as soon as it arrives.

use std::io::{BufRead, BufReader};
use std::path::PathBuf;
use std::process::Stdio;
use std::sync::Arc;
use std::time::Instant;

use tokio::process::{Child, Command};
use tokio::sync::mpsc;
use tracing::{debug, info, warn};

use crate::config::Config;
use crate::errors::BuildError;
use crate::hub::MessageHub;
use crate::registry::{
    Actor, BuildResult, BuildStatus, ProjectFields, ProjectRecord, RegistryHandle,
};

/// Marker line the build command prints on success.
pub const SUCCESS_SENTINEL: &str = "Build Successfully";

/// Environment variables carrying a project's hook commands to the build.
pub const BEFORE_HOOK_ENV: &str = "DOCFORGE_BEFORE_HOOK";
pub const AFTER_HOOK_ENV: &str = "DOCFORGE_AFTER_HOOK";

/// Terminal state of one build invocation.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum BuildOutcome {
    /// The sentinel line was seen; `elapsed` is the reported seconds or -1.
    Succeeded { elapsed: i64 },
    Failed,
    NotFound,
}

impl BuildOutcome {
    pub fn is_success(&self) -> bool {
        matches!(self, Self::Succeeded { .. })
    }

    pub fn status(&self) -> BuildStatus {
        match self {
            Self::Succeeded { .. } => BuildStatus::Passing,
            Self::Failed => BuildStatus::Failing,
            Self::NotFound => BuildStatus::Unknown,
        }
    }
}

/// Seconds reported on a sentinel line, if the line is one.
///
/// Returns `None` for non-sentinel lines and `Some(-1)` when the sentinel
/// carries no positive integer.
pub fn parse_sentinel(line: &str) -> Option<i64> {
    let idx = line.find(SUCCESS_SENTINEL)?;
    let rest = &line[idx + SUCCESS_SENTINEL.len()..];
    Some(
        rest.split_whitespace()
            .find_map(|tok| tok.parse::<i64>().ok())
            .filter(|secs| *secs > 0)
            .unwrap_or(-1),
    )
}

pub struct BuildExecutor {
    registry: RegistryHandle,
    hub: Arc<MessageHub>,
    command: Vec<String>,
    config_path: PathBuf,
    log_output: bool,
}

impl BuildExecutor {
    pub fn new(config: &Config, registry: RegistryHandle, hub: Arc<MessageHub>) -> Self {
        Self {
            registry,
            hub,
            command: config.build.command.clone(),
            config_path: config.path.clone(),
            log_output: config.build.log_output,
        }
    }

    pub fn registry(&self) -> &RegistryHandle {
        &self.registry
    }

    pub fn hub(&self) -> &Arc<MessageHub> {
        &self.hub
    }

    /// Build `branch` of project `name`, feeding every output line to `on_line`
    /// and the hub, then record the result.
    ///
    /// Never fails: spawn and I/O errors become an output line and a
    /// `failing` result.
    pub async fn run<F>(&self, name: &str, branch: &str, actor: Actor, mut on_line: F) -> BuildOutcome
    where
        F: FnMut(&str) + Send,
    {
        let key = name.trim().to_lowercase();
        let lookup = {
            let key = key.clone();
            self.registry.call(move |r| r.get(&key)).await
        };
        let record = match lookup {
            Ok(Some(record)) => record,
            Ok(None) => {
                self.emit(&key, &format!("Did not find this project {}", key), &mut on_line);
                return BuildOutcome::NotFound;
            }
            Err(e) => {
                warn!(project = %key, error = %e, "Failed to load project for build");
                self.emit(&key, &format!("Failed to load project {}: {}", key, e), &mut on_line);
                return BuildOutcome::Failed;
            }
        };

        let branch = record.resolve_branch(branch).to_string();
        info!(project = %key, branch = %branch, actor = %actor, "Build started");
        let started = Instant::now();

        let outcome = match self.spawn(&key, &record, &branch) {
            Ok((mut child, mut lines)) => {
                let mut outcome = BuildOutcome::Failed;
                while let Some(line) = lines.recv().await {
                    if let Some(elapsed) = parse_sentinel(&line) {
                        outcome = BuildOutcome::Succeeded { elapsed };
                    }
                    self.emit(&key, &line, &mut on_line);
                }
                match child.wait().await {
                    Ok(status) => debug!(project = %key, status = %status, "Build command exited"),
                    Err(e) => warn!(project = %key, error = %e, "Failed to wait for build command"),
                }
                outcome
            }
            Err(e) => {
                warn!(project = %key, error = %e, "Build command could not start");
                let line = match &e {
                    BuildError::ExternalProcess { source, .. } => {
                        format!("Failed to spawn build command: {}", source)
                    }
                    other => format!("Failed to spawn build command: {}", other),
                };
                self.emit(&key, &line, &mut on_line);
                BuildOutcome::Failed
            }
        };

        let usedtime = match outcome {
            BuildOutcome::Succeeded { elapsed } => elapsed,
            _ => -1,
        };
        let result = BuildResult::now(outcome.status(), actor, usedtime);
        let write = {
            let key = key.clone();
            let branch = branch.clone();
            self.registry
                .call(move |r| r.update(&key, ProjectFields::build_result(branch, result)))
                .await
        };
        if let Err(e) = write {
            warn!(project = %key, branch = %branch, error = %e, "Failed to record build result");
        }

        info!(
            project = %key,
            branch = %branch,
            actor = %actor,
            status = %outcome.status(),
            usedtime,
            wall_secs = started.elapsed().as_secs(),
            "Build finished"
        );
        outcome
    }

    fn emit<F: FnMut(&str)>(&self, project: &str, line: &str, on_line: &mut F) {
        if self.log_output {
            debug!(project = %project, "{}", line);
        }
        on_line(line);
        self.hub.enqueue(project, line);
    }

    /// Start the build command with stdout and stderr joined on one pipe.
    ///
    /// The project's hook commands travel in `DOCFORGE_BEFORE_HOOK` and
    /// `DOCFORGE_AFTER_HOOK`; unset hooks are removed from the environment.
    fn spawn(
        &self,
        name: &str,
        record: &ProjectRecord,
        branch: &str,
    ) -> Result<(Child, mpsc::Receiver<String>), BuildError> {
        let (program, leading) = self.command.split_first().ok_or(BuildError::EmptyCommand)?;

        let (reader, writer) = std::io::pipe().map_err(BuildError::Io)?;
        let writer_err = writer.try_clone().map_err(BuildError::Io)?;

        let mut cmd = Command::new(program);
        cmd.args(leading)
            .arg("-n")
            .arg(name)
            .arg("-u")
            .arg(&record.url)
            .arg("-b")
            .arg(branch)
            .arg("-c")
            .arg(&self.config_path)
            .stdin(Stdio::null())
            .stdout(Stdio::from(writer))
            .stderr(Stdio::from(writer_err))
            .kill_on_drop(true);

        for (var, hook) in [
            (BEFORE_HOOK_ENV, &record.before_hook),
            (AFTER_HOOK_ENV, &record.after_hook),
        ] {
            match hook {
                Some(hook) => cmd.env(var, hook),
                None => cmd.env_remove(var),
            };
        }

        let child = cmd.spawn().map_err(|source| BuildError::ExternalProcess {
            command: self.command.join(" "),
            source,
        })?;
        // Our copies of the write end live in `cmd`; the reader only sees EOF
        // once they are closed.
        drop(cmd);

        let (tx, rx) = mpsc::channel::<String>(256);
        // Detached so a grandchild still holding the pipe cannot stall shutdown.
        std::thread::Builder::new()
            .name(format!("build-output-{}", name))
            .spawn(move || {
                let mut reader = BufReader::new(reader);
                let mut buf = Vec::new();
                loop {
                    buf.clear();
                    match reader.read_until(b'\n', &mut buf) {
                        Ok(0) | Err(_) => break,
                        Ok(_) => {
                            let line = String::from_utf8_lossy(&buf)
                                .trim_end_matches(['\r', '\n'])
                                .to_string();
                            if tx.blocking_send(line).is_err() {
                                break;
                            }
                        }
                    }
                }
            })
            .map_err(BuildError::Io)?;

        Ok((child, rx))
    }
}
