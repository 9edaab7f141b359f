//! Repository configuration cascade
//!
//! Looks a configuration file up in order:
//! 1. `path` in the repository
//! 2. `{config_dir}/path` in the repository
//! 3. `path` in the owner's shared configuration repository
//! 4. the caller's default
//!
//! The first document found wins. A document may name a parent with
//! `_extends: "repo"`, `"owner/repo"` or either form with a `:path` suffix;
//! the parent is resolved first and the child is merged over it.

use async_trait::async_trait;
use dashmap::DashMap;
use hookwise_core::{ArrayMergeStrategy, CascadeConfig};
use serde::Serialize;
use serde_json::Value;
use std::sync::Arc;
use thiserror::Error;
use tracing::debug;

/// Key naming the parent document
pub const EXTENDS_KEY: &str = "_extends";

#[derive(Error, Debug, Clone, PartialEq, Eq)]
pub enum CascadeError {
    #[error("Failed to parse {location}: {message}")]
    Parse { location: String, message: String },

    #[error("Cycle in _extends chain: {}", .chain.join(" -> "))]
    Cycle { chain: Vec<String> },

    #[error("_extends chain deeper than {max}")]
    DepthExceeded { max: usize },

    #[error("Extended configuration not found: {reference}")]
    ExtendsNotFound { reference: String },

    #[error("Invalid _extends reference: {reference}")]
    InvalidExtends { reference: String },

    #[error("Invalid repository: {0}")]
    InvalidRepository(String),

    #[error("Content source error: {0}")]
    Source(String),
}

/// `owner/repo`
#[derive(Debug, Clone, PartialEq, Eq, Hash, Serialize)]
pub struct RepositoryRef {
    pub owner: String,
    pub repo: String,
}

impl RepositoryRef {
    pub fn new(owner: impl Into<String>, repo: impl Into<String>) -> Self {
        Self {
            owner: owner.into(),
            repo: repo.into(),
        }
    }

    pub fn parse(full_name: &str) -> Result<Self, CascadeError> {
        match full_name.split_once('/') {
            Some((owner, repo)) if !owner.is_empty() && !repo.is_empty() && !repo.contains('/') => {
                Ok(Self::new(owner, repo))
            }
            _ => Err(CascadeError::InvalidRepository(full_name.to_string())),
        }
    }
}

impl std::fmt::Display for RepositoryRef {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        write!(f, "{}/{}", self.owner, self.repo)
    }
}

/// A file in a repository
#[derive(Debug, Clone, PartialEq, Eq, Hash, Serialize)]
pub struct ConfigLocation {
    pub repo: RepositoryRef,
    pub path: String,
}

impl ConfigLocation {
    fn new(repo: RepositoryRef, path: impl Into<String>) -> Self {
        Self {
            repo,
            path: path.into(),
        }
    }
}

impl std::fmt::Display for ConfigLocation {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        write!(f, "{}:{}", self.repo, self.path)
    }
}

/// Reads raw files from repositories (default branch)
#[async_trait]
pub trait ContentSource: Send + Sync {
    /// `Ok(None)` when the file does not exist
    async fn fetch(&self, repo: &RepositoryRef, path: &str) -> Result<Option<String>, CascadeError>;
}

/// Content source backed by a map, for tests and fixtures
#[derive(Default)]
pub struct InMemoryContentSource {
    files: DashMap<ConfigLocation, String>,
}

impl InMemoryContentSource {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn insert(&self, repo: &RepositoryRef, path: &str, content: impl Into<String>) {
        self.files
            .insert(ConfigLocation::new(repo.clone(), path), content.into());
    }

    pub fn with_file(self, repo: &RepositoryRef, path: &str, content: impl Into<String>) -> Self {
        self.insert(repo, path, content);
        self
    }
}

#[async_trait]
impl ContentSource for InMemoryContentSource {
    async fn fetch(&self, repo: &RepositoryRef, path: &str) -> Result<Option<String>, CascadeError> {
        let key = ConfigLocation::new(repo.clone(), path);
        Ok(self.files.get(&key).map(|content| content.clone()))
    }
}

/// Outcome of a cascade lookup
#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct ResolvedConfig {
    pub value: Value,
    /// Where the winning document came from; `None` for the default
    pub origin: Option<ConfigLocation>,
    /// Documents merged, child first
    pub chain: Vec<ConfigLocation>,
}

impl ResolvedConfig {
    pub fn is_default(&self) -> bool {
        self.origin.is_none()
    }
}

pub struct ConfigCascadeResolver {
    source: Arc<dyn ContentSource>,
    config: CascadeConfig,
}

impl ConfigCascadeResolver {
    pub fn new(source: Arc<dyn ContentSource>, config: CascadeConfig) -> Self {
        Self { source, config }
    }

    pub async fn resolve(
        &self,
        repo: &RepositoryRef,
        path: &str,
        default: Value,
    ) -> Result<ResolvedConfig, CascadeError> {
        let path = path.trim_start_matches('/');

        for location in self.candidates(repo, path, true) {
            if let Some(document) = self.load(&location).await? {
                debug!(location = %location, "Configuration found");
                let (value, chain) = self.expand(location.clone(), document, path).await?;
                return Ok(ResolvedConfig {
                    value,
                    origin: Some(location),
                    chain,
                });
            }
        }

        debug!(repo = %repo, path = %path, "No configuration found, using default");
        Ok(ResolvedConfig {
            value: default,
            origin: None,
            chain: Vec::new(),
        })
    }

    fn candidates(&self, repo: &RepositoryRef, path: &str, include_shared: bool) -> Vec<ConfigLocation> {
        let mut candidates = vec![ConfigLocation::new(repo.clone(), path)];

        let config_dir = self.config.config_dir.trim_matches('/');
        if !config_dir.is_empty() {
            candidates.push(ConfigLocation::new(repo.clone(), format!("{}/{}", config_dir, path)));
        }

        if include_shared && repo.repo != self.config.shared_config_repo {
            candidates.push(ConfigLocation::new(
                RepositoryRef::new(repo.owner.clone(), self.config.shared_config_repo.clone()),
                path,
            ));
        }

        candidates
    }

    async fn load(&self, location: &ConfigLocation) -> Result<Option<Value>, CascadeError> {
        match self.source.fetch(&location.repo, &location.path).await? {
            Some(content) => parse_document(location, &content).map(Some),
            None => Ok(None),
        }
    }

    /// Follow the `_extends` chain from `document` and merge it, root first
    async fn expand(
        &self,
        location: ConfigLocation,
        document: Value,
        requested_path: &str,
    ) -> Result<(Value, Vec<ConfigLocation>), CascadeError> {
        let mut chain = vec![location];
        let mut documents = vec![document];

        loop {
            let (current_location, current) = match (chain.last(), documents.last()) {
                (Some(location), Some(document)) => (location, document),
                _ => break,
            };
            let Some(reference) = extends_reference(current)? else {
                break;
            };

            if chain.len() > self.config.max_extends_depth {
                return Err(CascadeError::DepthExceeded {
                    max: self.config.max_extends_depth,
                });
            }

            let (parent_repo, parent_path) =
                parse_extends(&reference, &current_location.repo, requested_path)?;
            let (parent_location, parent) = self
                .locate_parent(&parent_repo, &parent_path)
                .await?
                .ok_or_else(|| CascadeError::ExtendsNotFound {
                    reference: reference.clone(),
                })?;

            if chain.contains(&parent_location) {
                let mut cycle: Vec<String> = chain.iter().map(ToString::to_string).collect();
                cycle.push(parent_location.to_string());
                return Err(CascadeError::Cycle { chain: cycle });
            }

            debug!(child = %current_location, parent = %parent_location, "Following {}", EXTENDS_KEY);
            chain.push(parent_location);
            documents.push(parent);
        }

        let strategy = self.config.array_merge;
        let merged = documents
            .into_iter()
            .rev()
            .map(strip_extends)
            .reduce(|parent, child| merge_values(parent, child, strategy))
            .unwrap_or_else(|| Value::Object(Default::default()));

        Ok((merged, chain))
    }

    async fn locate_parent(
        &self,
        repo: &RepositoryRef,
        path: &str,
    ) -> Result<Option<(ConfigLocation, Value)>, CascadeError> {
        for location in self.candidates(repo, path, false) {
            if let Some(document) = self.load(&location).await? {
                return Ok(Some((location, document)));
            }
        }
        Ok(None)
    }
}

fn parse_document(location: &ConfigLocation, content: &str) -> Result<Value, CascadeError> {
    if content.trim().is_empty() {
        return Ok(Value::Object(Default::default()));
    }

    let value: Value = serde_yaml::from_str(content).map_err(|e| CascadeError::Parse {
        location: location.to_string(),
        message: e.to_string(),
    })?;

    Ok(match value {
        Value::Null => Value::Object(Default::default()),
        other => other,
    })
}

fn extends_reference(document: &Value) -> Result<Option<String>, CascadeError> {
    match document.get(EXTENDS_KEY) {
        None | Some(Value::Null) => Ok(None),
        Some(Value::String(reference)) => Ok(Some(reference.clone())),
        Some(other) => Err(CascadeError::InvalidExtends {
            reference: other.to_string(),
        }),
    }
}

/// `repo`, `owner/repo`, optionally followed by `:path`
fn parse_extends(
    reference: &str,
    current: &RepositoryRef,
    default_path: &str,
) -> Result<(RepositoryRef, String), CascadeError> {
    let invalid = || CascadeError::InvalidExtends {
        reference: reference.to_string(),
    };

    let (repo_part, path) = match reference.trim().split_once(':') {
        Some((repo_part, path)) => {
            let path = path.trim_start_matches('/');
            if path.is_empty() {
                return Err(invalid());
            }
            (repo_part, path.to_string())
        }
        None => (reference.trim(), default_path.to_string()),
    };

    let repo = if repo_part.contains('/') {
        RepositoryRef::parse(repo_part).map_err(|_| invalid())?
    } else if repo_part.is_empty() {
        return Err(invalid());
    } else {
        RepositoryRef::new(current.owner.clone(), repo_part)
    };

    Ok((repo, path))
}

fn strip_extends(mut document: Value) -> Value {
    if let Value::Object(map) = &mut document {
        map.remove(EXTENDS_KEY);
    }
    document
}

/// Merge `child` over `parent`: objects recursively, arrays per `strategy`,
/// anything else from the child.
pub fn merge_values(parent: Value, child: Value, strategy: ArrayMergeStrategy) -> Value {
    match (parent, child) {
        (Value::Object(mut parent), Value::Object(child)) => {
            for (key, child_value) in child {
                let merged = match parent.remove(&key) {
                    Some(parent_value) => merge_values(parent_value, child_value, strategy),
                    None => child_value,
                };
                parent.insert(key, merged);
            }
            Value::Object(parent)
        }
        (Value::Array(mut parent), Value::Array(child)) => match strategy {
            ArrayMergeStrategy::Replace => Value::Array(child),
            ArrayMergeStrategy::Concatenate => {
                parent.extend(child);
                Value::Array(parent)
            }
        },
        (_, child) => child,
    }
}
