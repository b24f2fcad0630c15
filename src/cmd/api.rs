//! HTTP API server: `docforge api`.

use anyhow::Result;
use docforge::config::Config;
use docforge::server::{ServerConfig, start_server};

pub async fn cmd_api(config: Config, host: Option<String>, port: Option<u16>) -> Result<()> {
    let server = ServerConfig::from_config(&config, host, port);
    start_server(config, server).await
}
