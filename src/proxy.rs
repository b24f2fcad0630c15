//! nginx configuration rendering and reload.
//!
//! Every project gets `<base_dir>/nginx/<name>.conf` serving its generated
//! domain. A project with a custom domain also gets `<name>.ext.conf`.

use std::fs;
use std::path::{Path, PathBuf};
use std::process::Command;

use anyhow::{Context, Result, bail};
use chrono::Local;
use tracing::{info, warn};

use crate::config::{Config, NginxSection};
use crate::registry::{DerivedArtifacts, ProjectRecord};

const SSL_CIPHERS: &str = "TLS13-AES-256-GCM-SHA384:TLS13-CHACHA20-POLY1305-SHA256:TLS13-AES-128-GCM-SHA256:TLS13-AES-128-CCM-8-SHA256:TLS13-AES-128-CCM-SHA256:EECDH+CHACHA20:EECDH+CHACHA20-draft:EECDH+ECDSA+AES128:EECDH+aRSA+AES128:RSA+AES128:EECDH+ECDSA+AES256:EECDH+aRSA+AES256:RSA+AES256:EECDH+ECDSA+3DES:EECDH+aRSA+3DES:RSA+3DES:!MD5";

/// TLS parameters for one rendered server block.
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct TlsParams {
    pub crt: String,
    pub key: String,
    pub hsts_maxage: u64,
}

/// Input of one rendered server block.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct SiteParams<'a> {
    pub name: &'a str,
    pub domain: &'a str,
    pub docs_dir: &'a Path,
    pub default_language: &'a str,
    pub single: bool,
    pub tls: Option<TlsParams>,
}

fn render_ssl(tls: &TlsParams) -> String {
    let mut out = format!(
        r#"
    if ($scheme = http) {{
        return 301 https://$server_name$request_uri;
    }}
    ssl_certificate {crt};
    ssl_certificate_key {key};
    ssl_stapling on;
    ssl_stapling_verify on;
    resolver 8.8.8.8 114.114.114.114 valid=300s;
    resolver_timeout 5s;
    ssl_session_cache builtin:1000 shared:SSL:10m;
    ssl_session_tickets on;
    ssl_session_timeout 10m;
    ssl_protocols TLSv1 TLSv1.1 TLSv1.2 TLSv1.3;
    ssl_ciphers {SSL_CIPHERS};
    ssl_prefer_server_ciphers on;"#,
        crt = tls.crt,
        key = tls.key,
    );
    if tls.hsts_maxage > 0 {
        out.push_str(&format!(
            "\n    add_header Strict-Transport-Security \"max-age={}; preload\";",
            tls.hsts_maxage
        ));
    }
    out
}

/// Render one nginx server block.
pub fn render_site(site: &SiteParams<'_>) -> String {
    let docs_dir = site.docs_dir.display();
    let listen_ssl = if site.tls.is_some() {
        "\n    listen 443 ssl http2;"
    } else {
        ""
    };
    let ssl_cfg = site.tls.as_ref().map(render_ssl).unwrap_or_default();
    let header = format!(
        "#: Automatic generated by docforge at {}",
        Local::now().format("%Y-%m-%d %H:%M:%S")
    );

    if site.single {
        format!(
            r#"{header}
server {{
    listen 80;{listen_ssl}
    server_name {domain};
    charset utf-8;
    root {docs_dir}/{name}/{lang}/latest/;
    index index.html;{ssl_cfg}
}}
"#,
            domain = site.domain,
            name = site.name,
            lang = site.default_language,
        )
    } else {
        format!(
            r#"{header}
server {{
    listen 80;{listen_ssl}
    server_name {domain};
    charset utf-8;
    root {docs_dir}/{name}/;
    index index.html;
    set $home /{lang}/latest;
    error_page 403 =404 /404.html;{ssl_cfg}
    location / {{
        if (-e $document_root$home$document_uri) {{
            return 302 $home$document_uri$is_args$args;
        }}
    }}
}}
"#,
            domain = site.domain,
            name = site.name,
            lang = site.default_language,
        )
    }
}

/// Writes per-project nginx files and reloads nginx.
pub struct NginxConfigurator {
    docs_dir: PathBuf,
    nginx_dir: PathBuf,
    nginx: NginxSection,
}

impl NginxConfigurator {
    pub fn new(config: &Config) -> Self {
        Self {
            docs_dir: config.docs_dir(),
            nginx_dir: config.nginx_dir(),
            nginx: config.nginx.clone(),
        }
    }

    pub fn default_file(&self, name: &str) -> PathBuf {
        self.nginx_dir.join(format!("{name}.conf"))
    }

    pub fn custom_file(&self, name: &str) -> PathBuf {
        self.nginx_dir.join(format!("{name}.ext.conf"))
    }

    fn global_tls(&self) -> Option<TlsParams> {
        self.nginx.ssl.then(|| TlsParams {
            crt: self.nginx.ssl_crt.clone().unwrap_or_default(),
            key: self.nginx.ssl_key.clone().unwrap_or_default(),
            hsts_maxage: self.nginx.ssl_hsts_maxage,
        })
    }

    fn write(&self, path: &Path, content: &str) -> Result<()> {
        fs::write(path, content).with_context(|| format!("Failed to write {}", path.display()))
    }

    /// Run `<exec> -t`, then `<exec> -s reload`. Does nothing without `nginx.exec`.
    pub fn reload(&self) -> Result<()> {
        let Some(exec) = self.nginx.exec.as_deref() else {
            return Ok(());
        };
        let argv: Vec<&str> = exec.split_whitespace().collect();
        let Some((program, leading)) = argv.split_first() else {
            return Ok(());
        };

        let status = Command::new(program)
            .args(leading)
            .arg("-t")
            .status()
            .with_context(|| format!("Failed to run {exec} -t"))?;
        if !status.success() {
            bail!("nginx syntax check failed ({status})");
        }
        let status = Command::new(program)
            .args(leading)
            .args(["-s", "reload"])
            .status()
            .with_context(|| format!("Failed to run {exec} -s reload"))?;
        if !status.success() {
            bail!("nginx reload failed ({status})");
        }
        info!("nginx reloaded");
        Ok(())
    }
}

impl DerivedArtifacts for NginxConfigurator {
    fn regenerate(&self, record: &ProjectRecord) -> Result<()> {
        fs::create_dir_all(&self.docs_dir)
            .with_context(|| format!("Failed to create {}", self.docs_dir.display()))?;
        fs::create_dir_all(&self.nginx_dir)
            .with_context(|| format!("Failed to create {}", self.nginx_dir.display()))?;

        let default_site = SiteParams {
            name: &record.name,
            domain: &record.generated_domain,
            docs_dir: &self.docs_dir,
            default_language: &record.default_language,
            single: record.single,
            tls: self.global_tls(),
        };
        info!(project = %record.name, domain = %record.generated_domain, "Rendering nginx config");
        self.write(&self.default_file(&record.name), &render_site(&default_site))?;

        let custom_file = self.custom_file(&record.name);
        match record.custom_domain.as_deref() {
            Some(domain) => {
                let tls = record.ssl.enabled.then(|| TlsParams {
                    crt: record.ssl.crt.clone().unwrap_or_default(),
                    key: record.ssl.key.clone().unwrap_or_default(),
                    hsts_maxage: record.ssl.hsts_maxage,
                });
                let site = SiteParams {
                    domain,
                    tls,
                    ..default_site
                };
                info!(project = %record.name, domain = %domain, "Rendering custom domain nginx config");
                self.write(&custom_file, &render_site(&site))?;
            }
            None if custom_file.exists() => {
                fs::remove_file(&custom_file)
                    .with_context(|| format!("Failed to remove {}", custom_file.display()))?;
            }
            None => {}
        }

        self.reload()
    }

    fn teardown(&self, name: &str) -> Result<()> {
        let mut removed = false;
        for path in [self.default_file(name), self.custom_file(name)] {
            if path.exists() {
                fs::remove_file(&path)
                    .with_context(|| format!("Failed to remove {}", path.display()))?;
                removed = true;
            }
        }
        if !removed {
            warn!(project = %name, "No nginx config to remove");
            return Ok(());
        }
        self.reload()
    }
}
