//! Project registry: validated create/read/update/remove over the project store.

mod handle;
pub mod model;
pub mod transfer;
pub mod validate;

use std::collections::BTreeMap;
use std::path::PathBuf;
use std::sync::Arc;

use serde::{Serialize, Serializer};
use serde_json::Value;
use tracing::{info, warn};

use crate::config::Config;
use crate::errors::RegistryError;
use crate::store::{Document, ProjectStore};

pub use handle::RegistryHandle;
pub use model::{
    Actor, BuildResult, BuildStatus, BuilderKind, GitProvider, ProjectFields, ProjectRecord,
    SourceType, SslSettings,
};

/// Downstream artifacts derived from a project record (the reverse-proxy config).
pub trait DerivedArtifacts: Send + Sync {
    /// Render the artifacts for `record` and apply them.
    fn regenerate(&self, record: &ProjectRecord) -> anyhow::Result<()>;
    /// Remove every artifact of project `name` and apply the removal.
    fn teardown(&self, name: &str) -> anyhow::Result<()>;
}

/// Artifacts sink that does nothing.
#[derive(Debug, Default)]
pub struct NoArtifacts;

impl DerivedArtifacts for NoArtifacts {
    fn regenerate(&self, _record: &ProjectRecord) -> anyhow::Result<()> {
        Ok(())
    }

    fn teardown(&self, _name: &str) -> anyhow::Result<()> {
        Ok(())
    }
}

/// Read view of a project served by the description endpoint.
#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct ProjectView {
    pub languages: Vec<String>,
    pub versions: BTreeMap<String, Vec<String>>,
    pub latest: String,
    pub url: String,
    pub dn: String,
    #[serde(serialize_with = "serialize_or_false")]
    pub custom_dn: Option<String>,
    pub sourcedir: String,
    pub single: bool,
    pub show_nav: bool,
    pub show_nav_git: bool,
    pub builder: BuilderKind,
    #[serde(rename = "type")]
    pub source_type: SourceType,
    pub gsp: GitProvider,
}

fn serialize_or_false<S: Serializer>(value: &Option<String>, serializer: S) -> Result<S::Ok, S::Error> {
    match value {
        Some(v) => serializer.serialize_str(v),
        None => serializer.serialize_bool(false),
    }
}

/// Project registry backed by a [`ProjectStore`].
pub struct Registry {
    store: ProjectStore,
    base_dir: PathBuf,
    domain_suffix: String,
    default_branch: String,
    unallowed_names: Vec<String>,
    artifacts: Arc<dyn DerivedArtifacts>,
}

impl Registry {
    pub fn new(config: &Config, artifacts: Arc<dyn DerivedArtifacts>) -> Self {
        Self {
            store: ProjectStore::new(config.store_path()),
            base_dir: config.default.base_dir.clone(),
            domain_suffix: config.nginx.domain_suffix.clone(),
            default_branch: config.default.default_branch.clone(),
            unallowed_names: config.unallowed_names(),
            artifacts,
        }
    }

    fn generated_domain(&self, name: &str) -> String {
        format!("{}.{}", name, self.domain_suffix)
    }

    fn docs_dir(&self, name: &str) -> PathBuf {
        self.base_dir.join("docs").join(name)
    }

    /// Register a new project.
    pub fn create(
        &self,
        name: &str,
        url: &str,
        fields: ProjectFields,
    ) -> Result<ProjectRecord, RegistryError> {
        let name = validate::normalize_name(name);
        if !validate::is_project_name(&name) {
            return Err(RegistryError::InvalidName { name });
        }
        if self.unallowed_names.contains(&name) {
            return Err(RegistryError::Unallowed { name });
        }

        let url = url.trim().to_string();
        let mut record = ProjectRecord {
            name: name.clone(),
            source_type: validate::source_type(&url),
            provider: validate::git_service_provider(&url),
            url,
            latest: self.default_branch.clone(),
            single: false,
            sourcedir: "docs".to_string(),
            languages: vec!["en".to_string()],
            default_language: String::new(),
            index: None,
            requirements: Vec::new(),
            install: false,
            show_nav: true,
            show_nav_git: true,
            secret: None,
            custom_domain: None,
            ssl: SslSettings::default(),
            builder: BuilderKind::default(),
            excluded_branches: Vec::new(),
            before_hook: None,
            after_hook: None,
            generated_domain: self.generated_domain(&name),
            builds: Default::default(),
        };
        let explicit_url = fields.url.is_some();
        record.apply(fields);
        if explicit_url {
            record.source_type = validate::source_type(&record.url);
            record.provider = validate::git_service_provider(&record.url);
        }
        record.normalize_languages();
        if record.languages.is_empty() {
            return Err(RegistryError::EmptyLanguages { name });
        }

        let record = self.store.modify(|doc| {
            if doc.contains_key(&name) {
                return Err(RegistryError::AlreadyExists { name: name.clone() });
            }
            check_generated_domain(doc, &record)?;
            check_custom_domain(doc, &record)?;
            let value = to_value(&record)?;
            doc.insert(name.clone(), value);
            Ok(record)
        })?;

        info!(project = %record.name, url = %validate::public_url(&record.url), "Project created");
        self.regenerate(&record);
        Ok(record)
    }

    /// Encode project `name` as a transfer string.
    pub fn export(&self, name: &str, with_builds: bool) -> Result<String, RegistryError> {
        let record = self.get(name)?.ok_or_else(|| RegistryError::NotFound {
            name: name.trim().to_lowercase(),
        })?;
        transfer::encode(&record, with_builds)
    }

    /// Create a project from a transfer string, optionally under a new name.
    ///
    /// The generated domain, source type and provider are recomputed here.
    pub fn import(&self, encoded: &str, rename: Option<&str>) -> Result<ProjectRecord, RegistryError> {
        let imported = transfer::decode(encoded, rename)?;
        let record = self.create(&imported.name, &imported.url, imported.fields)?;
        info!(project = %record.name, "Project imported");
        Ok(record)
    }

    pub fn has(&self, name: &str) -> Result<bool, RegistryError> {
        let key = name.trim().to_lowercase();
        Ok(self.store.get(&key)?.is_some())
    }

    /// Case-insensitive lookup.
    pub fn get(&self, name: &str) -> Result<Option<ProjectRecord>, RegistryError> {
        let key = name.trim().to_lowercase();
        match self.store.get(&key)? {
            Some(value) => from_value(&key, value).map(Some),
            None => Ok(None),
        }
    }

    /// All records, sorted by name.
    pub fn list(&self) -> Result<Vec<ProjectRecord>, RegistryError> {
        let doc = self.store.list()?;
        let mut records = doc
            .into_iter()
            .map(|(name, value)| from_value(&name, value))
            .collect::<Result<Vec<_>, _>>()?;
        records.sort_by(|a, b| a.name.cmp(&b.name));
        Ok(records)
    }

    /// Merge `fields` into an existing record.
    ///
    /// Returns `Ok(None)` when the project does not exist.
    pub fn update(
        &self,
        name: &str,
        fields: ProjectFields,
    ) -> Result<Option<ProjectRecord>, RegistryError> {
        let key = name.trim().to_lowercase();
        if fields.is_empty() {
            return self.get(&key);
        }
        let explicit_url = fields.url.is_some();

        let changed = self.store.modify(|doc| {
            let Some(value) = doc.get(&key).cloned() else {
                return Ok(None);
            };
            let before = from_value(&key, value)?;
            let mut after = before.clone();
            let previous_default = before.default_language.clone();
            let default_given = fields.default_language.is_some();
            let languages_given = fields.languages.is_some();

            after.apply(fields);
            if languages_given && !default_given {
                after.default_language = previous_default;
            }
            after.normalize_languages();
            if after.languages.is_empty() {
                return Err(RegistryError::EmptyLanguages { name: key.clone() });
            }
            if explicit_url {
                after.source_type = validate::source_type(&after.url);
                after.provider = validate::git_service_provider(&after.url);
            }
            if after.custom_domain != before.custom_domain {
                check_custom_domain(doc, &after)?;
            }

            doc.insert(key.clone(), to_value(&after)?);
            Ok(Some((before, after)))
        })?;

        let Some((before, after)) = changed else {
            return Ok(None);
        };
        info!(project = %after.name, "Project updated");
        if before.regeneration_key() != after.regeneration_key() {
            info!(project = %after.name, "Rendering derived config again");
            self.regenerate(&after);
        }
        Ok(Some(after))
    }

    /// Remove a project together with its built docs and derived config.
    ///
    /// Returns whether the project existed.
    pub fn remove(&self, name: &str) -> Result<bool, RegistryError> {
        let key = name.trim().to_lowercase();
        if !self.has(&key)? {
            return Ok(false);
        }
        info!(project = %key, "Removing project, its docs and derived config");

        let docs = self.docs_dir(&key);
        if docs.is_dir() {
            std::fs::remove_dir_all(&docs).map_err(|source| RegistryError::Io {
                path: docs.clone(),
                source,
            })?;
        }
        if let Err(e) = self.artifacts.teardown(&key) {
            warn!(project = %key, error = %format!("{:#}", e), "Failed to tear down derived config");
        }
        Ok(self.store.remove(&key)?)
    }

    /// Status of the last build of `branch` (`latest` resolves to the latest branch).
    pub fn get_for_badge(&self, name: &str, branch: &str) -> Result<BuildStatus, RegistryError> {
        Ok(match self.get(name)? {
            Some(record) => record.status_of(record.resolve_branch(branch)),
            None => BuildStatus::Unknown,
        })
    }

    /// Read view including the built versions found on disk.
    pub fn get_for_api(&self, name: &str) -> Result<ProjectView, RegistryError> {
        let record = self.get(name)?.ok_or_else(|| RegistryError::NotFound {
            name: name.trim().to_lowercase(),
        })?;

        let mut versions = BTreeMap::new();
        for lang in &record.languages {
            let lang_dir = self.docs_dir(&record.name).join(lang);
            let mut found = Vec::new();
            if lang_dir.is_dir() {
                let entries = std::fs::read_dir(&lang_dir).map_err(|source| RegistryError::Io {
                    path: lang_dir.clone(),
                    source,
                })?;
                for entry in entries.flatten() {
                    if !entry.path().is_dir() {
                        continue;
                    }
                    let version = entry.file_name().to_string_lossy().to_string();
                    if version != "latest" && version != record.latest {
                        found.push(version);
                    }
                }
            }
            found.sort_unstable_by(|a, b| b.cmp(a));
            versions.insert(lang.clone(), found);
        }

        Ok(ProjectView {
            languages: record.languages.clone(),
            versions,
            latest: record.latest.clone(),
            url: validate::public_url(&record.url),
            dn: record.generated_domain.clone(),
            custom_dn: record.custom_domain.clone(),
            sourcedir: record.sourcedir.clone(),
            single: record.single,
            show_nav: record.show_nav,
            show_nav_git: record.show_nav_git,
            builder: record.builder,
            source_type: record.source_type,
            gsp: record.provider,
        })
    }

    fn regenerate(&self, record: &ProjectRecord) {
        if let Err(e) = self.artifacts.regenerate(record) {
            warn!(project = %record.name, error = %format!("{:#}", e), "Failed to render derived config");
        }
    }
}

fn to_value(record: &ProjectRecord) -> Result<Value, RegistryError> {
    serde_json::to_value(record).map_err(|source| RegistryError::InvalidRecord {
        name: record.name.clone(),
        source,
    })
}

fn from_value(name: &str, value: Value) -> Result<ProjectRecord, RegistryError> {
    let mut record: ProjectRecord =
        serde_json::from_value(value).map_err(|source| RegistryError::InvalidRecord {
            name: name.to_string(),
            source,
        })?;
    record.name = name.to_string();
    Ok(record)
}

/// Reject a new project whose generated domain is another project's custom domain.
fn check_generated_domain(doc: &Document, record: &ProjectRecord) -> Result<(), RegistryError> {
    let owner = doc.iter().find(|(other, value)| {
        **other != record.name
            && value
                .get("custom_domain")
                .and_then(Value::as_str)
                .is_some_and(|d| d.eq_ignore_ascii_case(&record.generated_domain))
    });
    match owner {
        Some((other, _)) => Err(RegistryError::DomainConflict {
            domain: record.generated_domain.clone(),
            owner: other.clone(),
        }),
        None => Ok(()),
    }
}

/// Reject an invalid custom domain, or one already claimed by a project.
fn check_custom_domain(doc: &Document, record: &ProjectRecord) -> Result<(), RegistryError> {
    let Some(domain) = record.custom_domain.as_deref() else {
        return Ok(());
    };
    if !validate::is_domain(domain) {
        return Err(RegistryError::InvalidDomain {
            domain: domain.to_string(),
        });
    }
    if domain.eq_ignore_ascii_case(&record.generated_domain) {
        return Err(RegistryError::DomainConflict {
            domain: domain.to_string(),
            owner: record.name.clone(),
        });
    }
    for (other, value) in doc {
        if *other == record.name {
            continue;
        }
        let claimed = ["custom_domain", "_dn"]
            .iter()
            .filter_map(|k| value.get(*k).and_then(Value::as_str))
            .any(|d| d.eq_ignore_ascii_case(domain));
        if claimed {
            return Err(RegistryError::DomainConflict {
                domain: domain.to_string(),
                owner: other.clone(),
            });
        }
    }
    Ok(())
}
