//! Project record types as stored in the project store.

use std::collections::BTreeMap;
use std::fmt;

use serde::de::{self, IgnoredAny, MapAccess, Visitor};
use serde::ser::SerializeMap;
use serde::{Deserialize, Deserializer, Serialize, Serializer};

/// Key prefix of per-branch build results inside a record.
pub const BUILD_KEY_PREFIX: &str = "_build_";

/// Outcome of the last build of a branch.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum BuildStatus {
    Passing,
    Failing,
    Unknown,
}

impl BuildStatus {
    pub fn as_str(&self) -> &'static str {
        match self {
            Self::Passing => "passing",
            Self::Failing => "failing",
            Self::Unknown => "unknown",
        }
    }
}

impl fmt::Display for BuildStatus {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

/// Origin of a build trigger.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum Actor {
    Cli,
    Api,
    Webhook,
}

impl Actor {
    pub fn as_str(&self) -> &'static str {
        match self {
            Self::Cli => "cli",
            Self::Api => "api",
            Self::Webhook => "webhook",
        }
    }
}

impl fmt::Display for Actor {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

/// Result of one build, stored under `_build_<branch>`.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct BuildResult {
    /// Local time, `%Y-%m-%d %H:%M:%S`
    pub btime: String,
    pub status: BuildStatus,
    pub sender: Actor,
    /// Elapsed seconds reported by the build command, `-1` when unknown
    pub usedtime: i64,
}

impl BuildResult {
    pub fn now(status: BuildStatus, sender: Actor, usedtime: i64) -> Self {
        Self {
            btime: chrono::Local::now().format("%Y-%m-%d %H:%M:%S").to_string(),
            status,
            sender,
            usedtime,
        }
    }
}

/// Per-branch build results, flattened into the record as `_build_<branch>` keys.
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct BuildSet(pub BTreeMap<String, BuildResult>);

impl BuildSet {
    pub fn get(&self, branch: &str) -> Option<&BuildResult> {
        self.0.get(branch)
    }

    pub fn insert(&mut self, branch: impl Into<String>, result: BuildResult) {
        self.0.insert(branch.into(), result);
    }

    pub fn iter(&self) -> impl Iterator<Item = (&String, &BuildResult)> {
        self.0.iter()
    }

    pub fn is_empty(&self) -> bool {
        self.0.is_empty()
    }
}

impl Serialize for BuildSet {
    fn serialize<S: Serializer>(&self, serializer: S) -> Result<S::Ok, S::Error> {
        let mut map = serializer.serialize_map(Some(self.0.len()))?;
        for (branch, result) in &self.0 {
            map.serialize_entry(&format!("{BUILD_KEY_PREFIX}{branch}"), result)?;
        }
        map.end()
    }
}

impl<'de> Deserialize<'de> for BuildSet {
    fn deserialize<D: Deserializer<'de>>(deserializer: D) -> Result<Self, D::Error> {
        struct BuildSetVisitor;

        impl<'de> Visitor<'de> for BuildSetVisitor {
            type Value = BuildSet;

            fn expecting(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
                f.write_str("a map of _build_<branch> entries")
            }

            fn visit_map<A: MapAccess<'de>>(self, mut access: A) -> Result<BuildSet, A::Error> {
                let mut builds = BTreeMap::new();
                while let Some(key) = access.next_key::<String>()? {
                    match key.strip_prefix(BUILD_KEY_PREFIX) {
                        Some(branch) if !branch.is_empty() => {
                            let result: BuildResult = access.next_value()?;
                            builds.insert(branch.to_string(), result);
                        }
                        _ => {
                            access.next_value::<IgnoredAny>()?;
                        }
                    }
                }
                Ok(BuildSet(builds))
            }
        }

        deserializer.deserialize_map(BuildSetVisitor)
    }
}

/// TLS settings for a project's custom domain.
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct SslSettings {
    #[serde(default)]
    pub enabled: bool,
    #[serde(default)]
    pub crt: Option<String>,
    #[serde(default)]
    pub key: Option<String>,
    #[serde(default)]
    pub hsts_maxage: u64,
}

/// Static-site builder flavour passed through to the build command's config.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum BuilderKind {
    #[default]
    Html,
    Dirhtml,
    Singlehtml,
}

impl BuilderKind {
    pub fn as_str(&self) -> &'static str {
        match self {
            Self::Html => "html",
            Self::Dirhtml => "dirhtml",
            Self::Singlehtml => "singlehtml",
        }
    }
}

impl std::str::FromStr for BuilderKind {
    type Err = String;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s {
            "html" => Ok(Self::Html),
            "dirhtml" => Ok(Self::Dirhtml),
            "singlehtml" => Ok(Self::Singlehtml),
            other => Err(format!(
                "Invalid builder '{}'. Valid values: html, dirhtml, singlehtml",
                other
            )),
        }
    }
}

/// Whether the source URL carries credentials.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum SourceType {
    #[default]
    Public,
    Private,
}

impl SourceType {
    pub fn as_str(&self) -> &'static str {
        match self {
            Self::Public => "public",
            Self::Private => "private",
        }
    }
}

/// Hosting service of the source repository.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize, Deserialize)]
pub enum GitProvider {
    GitHub,
    Gitee,
    #[default]
    #[serde(rename = "N/A")]
    Unknown,
}

impl GitProvider {
    pub fn as_str(&self) -> &'static str {
        match self {
            Self::GitHub => "GitHub",
            Self::Gitee => "Gitee",
            Self::Unknown => "N/A",
        }
    }
}

/// A registered documentation project.
///
/// The name is the store key and is not part of the stored value.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct ProjectRecord {
    #[serde(skip)]
    pub name: String,
    pub url: String,
    #[serde(default = "default_latest")]
    pub latest: String,
    #[serde(default)]
    pub single: bool,
    #[serde(default = "default_sourcedir")]
    pub sourcedir: String,
    #[serde(default = "default_languages")]
    pub languages: Vec<String>,
    #[serde(default = "default_language")]
    pub default_language: String,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub index: Option<String>,
    #[serde(default, skip_serializing_if = "Vec::is_empty")]
    pub requirements: Vec<String>,
    #[serde(default)]
    pub install: bool,
    #[serde(default = "default_true")]
    pub show_nav: bool,
    #[serde(default = "default_true")]
    pub show_nav_git: bool,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub secret: Option<String>,
    #[serde(default, deserialize_with = "deserialize_domain")]
    pub custom_domain: Option<String>,
    #[serde(default)]
    pub ssl: SslSettings,
    #[serde(default)]
    pub builder: BuilderKind,
    #[serde(default, skip_serializing_if = "Vec::is_empty")]
    pub excluded_branches: Vec<String>,
    /// Shell command the build runs before building
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub before_hook: Option<String>,
    /// Shell command the build runs after a successful build
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub after_hook: Option<String>,
    #[serde(rename = "_dn")]
    pub generated_domain: String,
    #[serde(rename = "_type", default)]
    pub source_type: SourceType,
    #[serde(rename = "_gsp", default)]
    pub provider: GitProvider,
    #[serde(flatten)]
    pub builds: BuildSet,
}

fn default_latest() -> String {
    "master".to_string()
}

fn default_sourcedir() -> String {
    "docs".to_string()
}

fn default_languages() -> Vec<String> {
    vec!["en".to_string()]
}

fn default_language() -> String {
    "en".to_string()
}

fn default_true() -> bool {
    true
}

/// Custom domains are stored as a string, with `false`/`"false"`/`"off"`
/// meaning none.
fn deserialize_domain<'de, D: Deserializer<'de>>(deserializer: D) -> Result<Option<String>, D::Error> {
    let value = serde_json::Value::deserialize(deserializer)?;
    match value {
        serde_json::Value::Null | serde_json::Value::Bool(false) => Ok(None),
        serde_json::Value::String(s) => Ok(parse_domain_value(&s)),
        other => Err(de::Error::custom(format!(
            "custom_domain must be a string, got {}",
            other
        ))),
    }
}

/// Interpret a user-supplied domain value; empty, `false` and `off` clear it.
pub fn parse_domain_value(value: &str) -> Option<String> {
    let value = value.trim();
    match value.to_ascii_lowercase().as_str() {
        "" | "false" | "off" | "none" => None,
        _ => Some(value.to_string()),
    }
}

impl ProjectRecord {
    /// Status of the last build of `branch`, `Unknown` when none ran.
    pub fn status_of(&self, branch: &str) -> BuildStatus {
        self.builds
            .get(branch)
            .map_or(BuildStatus::Unknown, |b| b.status)
    }

    /// Resolve the `latest` alias (or an empty branch) to the latest branch.
    pub fn resolve_branch<'a>(&'a self, branch: &'a str) -> &'a str {
        let branch = branch.trim();
        if branch.is_empty() || branch == "latest" {
            &self.latest
        } else {
            branch
        }
    }

    /// Fields whose change requires the derived proxy config to be rendered again.
    pub(crate) fn regeneration_key(&self) -> (&[String], &str, bool, Option<&str>, &SslSettings) {
        (
            &self.languages,
            &self.default_language,
            self.single,
            self.custom_domain.as_deref(),
            &self.ssl,
        )
    }
}

/// A partial set of project fields.
///
/// Used both for creation (unset fields take their defaults) and for
/// updates (only set fields change).
#[derive(Debug, Clone, Default)]
pub struct ProjectFields {
    pub url: Option<String>,
    pub latest: Option<String>,
    pub single: Option<bool>,
    pub sourcedir: Option<String>,
    pub languages: Option<Vec<String>>,
    pub default_language: Option<String>,
    /// Empty string clears it
    pub index: Option<String>,
    pub requirements: Option<Vec<String>>,
    pub install: Option<bool>,
    pub show_nav: Option<bool>,
    pub show_nav_git: Option<bool>,
    /// Empty string clears it
    pub secret: Option<String>,
    /// `false`, `off` or empty clears it
    pub custom_domain: Option<String>,
    pub ssl: Option<bool>,
    pub ssl_crt: Option<String>,
    pub ssl_key: Option<String>,
    pub ssl_hsts_maxage: Option<u64>,
    pub builder: Option<BuilderKind>,
    pub excluded_branches: Option<Vec<String>>,
    /// Empty string clears it
    pub before_hook: Option<String>,
    /// Empty string clears it
    pub after_hook: Option<String>,
    /// Build results to merge, keyed by branch
    pub builds: BTreeMap<String, BuildResult>,
}

impl ProjectFields {
    pub fn is_empty(&self) -> bool {
        self.url.is_none()
            && self.latest.is_none()
            && self.single.is_none()
            && self.sourcedir.is_none()
            && self.languages.is_none()
            && self.default_language.is_none()
            && self.index.is_none()
            && self.requirements.is_none()
            && self.install.is_none()
            && self.show_nav.is_none()
            && self.show_nav_git.is_none()
            && self.secret.is_none()
            && self.custom_domain.is_none()
            && self.ssl.is_none()
            && self.ssl_crt.is_none()
            && self.ssl_key.is_none()
            && self.ssl_hsts_maxage.is_none()
            && self.builder.is_none()
            && self.excluded_branches.is_none()
            && self.before_hook.is_none()
            && self.after_hook.is_none()
            && self.builds.is_empty()
    }

    /// Every user-settable field of `record`, plus its build results.
    pub fn from_record(record: ProjectRecord) -> Self {
        Self {
            url: Some(record.url),
            latest: Some(record.latest),
            single: Some(record.single),
            sourcedir: Some(record.sourcedir),
            languages: Some(record.languages),
            default_language: Some(record.default_language),
            index: record.index,
            requirements: Some(record.requirements),
            install: Some(record.install),
            show_nav: Some(record.show_nav),
            show_nav_git: Some(record.show_nav_git),
            secret: record.secret,
            custom_domain: record.custom_domain,
            ssl: Some(record.ssl.enabled),
            ssl_crt: record.ssl.crt,
            ssl_key: record.ssl.key,
            ssl_hsts_maxage: Some(record.ssl.hsts_maxage),
            builder: Some(record.builder),
            excluded_branches: Some(record.excluded_branches),
            before_hook: record.before_hook,
            after_hook: record.after_hook,
            builds: record.builds.0,
        }
    }

    /// A single build result, as written by the executor.
    pub fn build_result(branch: impl Into<String>, result: BuildResult) -> Self {
        let mut builds = BTreeMap::new();
        builds.insert(branch.into(), result);
        Self {
            builds,
            ..Default::default()
        }
    }
}

fn non_empty(value: String) -> Option<String> {
    let value = value.trim().to_string();
    (!value.is_empty()).then_some(value)
}

/// Split a comma-separated list, dropping blanks.
pub fn split_list(value: &str) -> Vec<String> {
    value
        .split(',')
        .map(str::trim)
        .filter(|s| !s.is_empty())
        .map(str::to_string)
        .collect()
}

impl ProjectRecord {
    /// Overlay `fields` onto the record. Derived fields are left alone.
    pub(crate) fn apply(&mut self, fields: ProjectFields) {
        if let Some(v) = fields.url {
            self.url = v;
        }
        if let Some(v) = fields.latest.and_then(non_empty) {
            self.latest = v;
        }
        if let Some(v) = fields.single {
            self.single = v;
        }
        if let Some(v) = fields.sourcedir.and_then(non_empty) {
            self.sourcedir = v;
        }
        if let Some(v) = fields.languages {
            self.languages = v;
        }
        if let Some(v) = fields.default_language {
            self.default_language = v.trim().to_string();
        }
        if let Some(v) = fields.index {
            self.index = non_empty(v);
        }
        if let Some(v) = fields.requirements {
            self.requirements = v;
        }
        if let Some(v) = fields.install {
            self.install = v;
        }
        if let Some(v) = fields.show_nav {
            self.show_nav = v;
        }
        if let Some(v) = fields.show_nav_git {
            self.show_nav_git = v;
        }
        if let Some(v) = fields.secret {
            self.secret = non_empty(v);
        }
        if let Some(v) = fields.custom_domain {
            self.custom_domain = parse_domain_value(&v);
        }
        if let Some(v) = fields.ssl {
            self.ssl.enabled = v;
        }
        if let Some(v) = fields.ssl_crt {
            self.ssl.crt = non_empty(v);
        }
        if let Some(v) = fields.ssl_key {
            self.ssl.key = non_empty(v);
        }
        if let Some(v) = fields.ssl_hsts_maxage {
            self.ssl.hsts_maxage = v;
        }
        if let Some(v) = fields.builder {
            self.builder = v;
        }
        if let Some(v) = fields.excluded_branches {
            self.excluded_branches = v;
        }
        if let Some(v) = fields.before_hook {
            self.before_hook = non_empty(v);
        }
        if let Some(v) = fields.after_hook {
            self.after_hook = non_empty(v);
        }
        for (branch, result) in fields.builds {
            self.builds.insert(branch, result);
        }
    }

    /// Keep the default language inside the language set.
    pub(crate) fn normalize_languages(&mut self) {
        self.languages = self
            .languages
            .iter()
            .map(|l| l.trim().to_string())
            .filter(|l| !l.is_empty())
            .fold(Vec::new(), |mut acc, l| {
                if !acc.contains(&l) {
                    acc.push(l);
                }
                acc
            });
        if !self.languages.contains(&self.default_language) {
            if let Some(first) = self.languages.first() {
                self.default_language = first.clone();
            }
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use serde_json::json;

    fn sample() -> serde_json::Value {
        json!({
            "url": "https://github.com/acme/docs-a",
            "latest": "main",
            "languages": ["en", "zh"],
            "default_language": "en",
            "custom_domain": "false",
            "_dn": "docs-a.example.com",
            "_type": "public",
            "_gsp": "GitHub",
            "_build_main": {
                "btime": "2024-01-01 10:00:00",
                "status": "passing",
                "sender": "webhook",
                "usedtime": 12
            },
            "legacy_key": 1
        })
    }

    #[test]
    fn test_deserialize_collects_build_keys() {
        let record: ProjectRecord = serde_json::from_value(sample()).unwrap();
        assert_eq!(record.status_of("main"), BuildStatus::Passing);
        assert_eq!(record.status_of("dev"), BuildStatus::Unknown);
        assert_eq!(record.builds.get("main").unwrap().usedtime, 12);
        assert_eq!(record.custom_domain, None);
        assert_eq!(record.provider, GitProvider::GitHub);
        assert!(record.show_nav);
        assert_eq!(record.sourcedir, "docs");
    }

    #[test]
    fn test_serialize_flattens_build_keys() {
        let record: ProjectRecord = serde_json::from_value(sample()).unwrap();
        let value = serde_json::to_value(&record).unwrap();
        assert_eq!(value["_build_main"]["status"], "passing");
        assert_eq!(value["_gsp"], "GitHub");
        assert!(value.get("name").is_none());
        assert!(value.get("legacy_key").is_none());
    }

    #[test]
    fn test_malformed_build_entry_is_rejected() {
        let mut value = sample();
        value["_build_main"] = json!({"status": "sideways"});
        assert!(serde_json::from_value::<ProjectRecord>(value).is_err());
    }

    #[test]
    fn test_missing_url_is_rejected() {
        let mut value = sample();
        value.as_object_mut().unwrap().remove("url");
        assert!(serde_json::from_value::<ProjectRecord>(value).is_err());
    }

    #[test]
    fn test_hooks_are_set_and_cleared() {
        let mut record: ProjectRecord = serde_json::from_value(sample()).unwrap();
        assert_eq!(record.before_hook, None);
        record.apply(ProjectFields {
            before_hook: Some(" make deps ".into()),
            after_hook: Some("./publish.sh".into()),
            ..Default::default()
        });
        assert_eq!(record.before_hook.as_deref(), Some("make deps"));
        let value = serde_json::to_value(&record).unwrap();
        assert_eq!(value["after_hook"], "./publish.sh");

        record.apply(ProjectFields {
            after_hook: Some(String::new()),
            ..Default::default()
        });
        assert_eq!(record.after_hook, None);
        assert_eq!(record.before_hook.as_deref(), Some("make deps"));
        let value = serde_json::to_value(&record).unwrap();
        assert!(value.get("after_hook").is_none());
    }

    #[test]
    fn test_parse_domain_value() {
        assert_eq!(parse_domain_value("off"), None);
        assert_eq!(parse_domain_value("False"), None);
        assert_eq!(parse_domain_value(""), None);
        assert_eq!(
            parse_domain_value(" docs.acme.io "),
            Some("docs.acme.io".to_string())
        );
    }

    #[test]
    fn test_resolve_branch() {
        let record: ProjectRecord = serde_json::from_value(sample()).unwrap();
        assert_eq!(record.resolve_branch("latest"), "main");
        assert_eq!(record.resolve_branch(""), "main");
        assert_eq!(record.resolve_branch("v1.0"), "v1.0");
    }

    #[test]
    fn test_normalize_languages_resets_default() {
        let mut record: ProjectRecord = serde_json::from_value(sample()).unwrap();
        record.languages = vec!["zh".into(), " ".into(), "zh".into(), "ja".into()];
        record.normalize_languages();
        assert_eq!(record.languages, vec!["zh", "ja"]);
        assert_eq!(record.default_language, "zh");
    }

    #[test]
    fn test_apply_clears_optional_values() {
        let mut record: ProjectRecord = serde_json::from_value(sample()).unwrap();
        record.secret = Some("s3cret".into());
        record.apply(ProjectFields {
            secret: Some(String::new()),
            custom_domain: Some("docs.acme.io".into()),
            ..Default::default()
        });
        assert_eq!(record.secret, None);
        assert_eq!(record.custom_domain.as_deref(), Some("docs.acme.io"));
    }

    #[test]
    fn test_split_list() {
        assert_eq!(split_list("en, zh,,ja "), vec!["en", "zh", "ja"]);
        assert!(split_list("").is_empty());
    }

    #[test]
    fn test_builder_kind_from_str() {
        assert_eq!("dirhtml".parse::<BuilderKind>().unwrap(), BuilderKind::Dirhtml);
        assert!("pdf".parse::<BuilderKind>().is_err());
    }
}
