use anyhow::Result;
use clap::{Args, Parser, Subcommand};
use std::path::PathBuf;

use docforge::registry::{BuilderKind, ProjectFields, model::split_list};

mod cmd;

#[derive(Parser)]
#[command(name = "docforge")]
#[command(version, about = "Self-hosted documentation build and hosting service")]
pub struct Cli {
    /// Configuration file
    #[arg(short, long, global = true, env = "DOCFORGE_CFG")]
    pub config: Option<PathBuf>,

    #[command(subcommand)]
    pub command: Commands,
}

#[derive(Subcommand)]
pub enum Commands {
    /// Write a default configuration file
    Init {
        /// Root directory for docs, nginx files, logs and the project store
        #[arg(long)]
        base_dir: PathBuf,
    },
    /// Manage documentation projects
    Project {
        #[command(subcommand)]
        command: ProjectCommands,
    },
    /// Build one branch of a project in the foreground
    Build {
        name: String,
        /// Branch or tag; `latest` means the project's latest branch
        #[arg(short, long, default_value = "latest")]
        branch: String,
    },
    /// Run the HTTP API server
    Api {
        #[arg(long)]
        host: Option<String>,
        #[arg(long)]
        port: Option<u16>,
    },
    /// Show configuration: everything, one section, or one key
    Cfg {
        section: Option<String>,
        key: Option<String>,
        /// Print as JSON
        #[arg(short, long)]
        json: bool,
    },
}

#[derive(Subcommand)]
pub enum ProjectCommands {
    /// Register a new project
    Create {
        name: String,
        /// Git repository URL
        #[arg(long)]
        url: String,
        #[command(flatten)]
        options: ProjectOptions,
    },
    /// Change some fields of a project
    Update {
        name: String,
        /// Git repository URL
        #[arg(long)]
        url: Option<String>,
        #[command(flatten)]
        options: ProjectOptions,
    },
    /// Show one project
    Get {
        name: String,
        /// Print the stored record as JSON
        #[arg(long)]
        json: bool,
    },
    /// List all projects
    List,
    /// Remove a project, its built docs and its nginx config
    Remove {
        name: String,
        /// Skip confirmation prompt
        #[arg(long)]
        yes: bool,
    },
    /// Copy a project to another installation as a base64 string
    #[command(alias = "t")]
    Transfer {
        #[command(subcommand)]
        command: TransferCommands,
    },
}

#[derive(Subcommand)]
pub enum TransferCommands {
    /// Print a project as a base64 string
    Export {
        name: String,
        /// Include build results
        #[arg(long)]
        with_builds: bool,
    },
    /// Create a project from a base64 string
    Import {
        data: String,
        /// Name to use instead of the exported one
        name: Option<String>,
        /// Print the decoded payload without importing
        #[arg(short = 'd', long)]
        show: bool,
    },
}

#[derive(Args, Debug, Default, Clone)]
pub struct ProjectOptions {
    /// Branch built when `latest` is requested
    #[arg(long)]
    pub latest: Option<String>,
    /// Serve a single version without language prefix
    #[arg(long)]
    pub single: Option<bool>,
    /// Documentation source directory inside the repository
    #[arg(long)]
    pub sourcedir: Option<String>,
    /// Comma-separated language codes
    #[arg(long)]
    pub languages: Option<String>,
    #[arg(long)]
    pub default_language: Option<String>,
    /// Index document overriding `index.rst`/`index.md`
    #[arg(long)]
    pub index: Option<String>,
    /// Comma-separated requirement files
    #[arg(long)]
    pub requirements: Option<String>,
    /// Install the project itself before building
    #[arg(long)]
    pub install: Option<bool>,
    #[arg(long)]
    pub show_nav: Option<bool>,
    #[arg(long)]
    pub show_nav_git: Option<bool>,
    /// Shared secret for webhooks and the build API
    #[arg(long)]
    pub secret: Option<String>,
    /// Custom domain; `off` removes it
    #[arg(long)]
    pub custom_domain: Option<String>,
    #[arg(long)]
    pub ssl: Option<bool>,
    #[arg(long)]
    pub ssl_crt: Option<String>,
    #[arg(long)]
    pub ssl_key: Option<String>,
    #[arg(long)]
    pub ssl_hsts_maxage: Option<u64>,
    /// html, dirhtml or singlehtml
    #[arg(long)]
    pub builder: Option<BuilderKind>,
    /// Comma-separated branches never built from webhooks
    #[arg(long)]
    pub excluded_branches: Option<String>,
    /// Command the build runs first; empty removes it
    #[arg(long = "before")]
    pub before_hook: Option<String>,
    /// Command the build runs after success; empty removes it
    #[arg(long = "after")]
    pub after_hook: Option<String>,
}

impl ProjectOptions {
    pub fn into_fields(self, url: Option<String>) -> ProjectFields {
        ProjectFields {
            url,
            latest: self.latest,
            single: self.single,
            sourcedir: self.sourcedir,
            languages: self.languages.as_deref().map(split_list),
            default_language: self.default_language,
            index: self.index,
            requirements: self.requirements.as_deref().map(split_list),
            install: self.install,
            show_nav: self.show_nav,
            show_nav_git: self.show_nav_git,
            secret: self.secret,
            custom_domain: self.custom_domain,
            ssl: self.ssl,
            ssl_crt: self.ssl_crt,
            ssl_key: self.ssl_key,
            ssl_hsts_maxage: self.ssl_hsts_maxage,
            builder: self.builder,
            excluded_branches: self.excluded_branches.as_deref().map(split_list),
            before_hook: self.before_hook,
            after_hook: self.after_hook,
            ..Default::default()
        }
    }
}

#[tokio::main]
async fn main() -> Result<()> {
    let cli = Cli::parse();
    let config_path = cli
        .config
        .clone()
        .unwrap_or_else(docforge::config::default_config_path);

    match cli.command {
        Commands::Init { base_dir } => cmd::cmd_init(&config_path, &base_dir)?,
        Commands::Project { command } => {
            let (config, _guard) = cmd::load_config(&config_path)?;
            cmd::cmd_project(&config, command)?;
        }
        Commands::Build { name, branch } => {
            let (config, _guard) = cmd::load_config(&config_path)?;
            cmd::cmd_build(&config, &name, &branch).await?;
        }
        Commands::Api { host, port } => {
            let (config, _guard) = cmd::load_config(&config_path)?;
            cmd::cmd_api(config, host, port).await?;
        }
        Commands::Cfg { section, key, json } => {
            let (config, _guard) = cmd::load_config(&config_path)?;
            cmd::cmd_cfg(&config, section.as_deref(), key.as_deref(), json)?;
        }
    }

    Ok(())
}
