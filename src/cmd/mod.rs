//! CLI command implementations.
//!
//! | Module    | Commands handled |
//! |-----------|------------------|
//! | `init`    | `Init`           |
//! | `project` | `Project`        |
//! | `build`   | `Build`          |
//! | `api`     | `Api`            |
//! | `cfg`     | `Cfg`            |

pub mod api;
pub mod build;
pub mod cfg;
pub mod init;
pub mod project;

use std::path::Path;

use anyhow::{Context, Result};
use docforge::config::Config;
use tracing_appender::non_blocking::WorkerGuard;

pub use api::cmd_api;
pub use build::cmd_build;
pub use cfg::cmd_cfg;
pub use init::cmd_init;
pub use project::cmd_project;

/// Load and validate the configuration, then install logging.
///
/// The returned guard must outlive every log call.
pub fn load_config(path: &Path) -> Result<(Config, Option<WorkerGuard>)> {
    if !docforge::config::expand_home(path).exists() {
        anyhow::bail!(
            "No configuration at {}. Run 'docforge init --base-dir <dir>' first.",
            path.display()
        );
    }
    let config = Config::load(path)?;
    let guard = docforge::logging::init(&config.default.log_level, Some(&config.log_dir()))
        .context("Failed to initialize logging")?;
    Ok((config, guard))
}
