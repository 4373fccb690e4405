//! Where policy documents come from.

use std::collections::HashMap;
use std::fs;
use std::io::ErrorKind;
use std::path::{Path, PathBuf};
use std::sync::{PoisonError, RwLock};

use super::PolicyDomain;

/// Supplies raw policy documents by domain.
///
/// `Ok(None)` means the document is absent (defaults apply silently
/// apart from a warning). `Err` carries a human-readable reason for an
/// unreadable source.
pub trait PolicySource: Send + Sync {
    fn fetch(&self, domain: PolicyDomain) -> Result<Option<String>, String>;

    /// Human-readable location, for logs.
    fn describe(&self, domain: PolicyDomain) -> String {
        domain.file_name()
    }
}

/// Reads `<dir>/<domain>.yaml` on every fetch.
#[derive(Debug, Clone)]
pub struct FilePolicySource {
    dir: PathBuf,
}

impl FilePolicySource {
    pub fn new(dir: impl Into<PathBuf>) -> Self {
        Self { dir: dir.into() }
    }

    pub fn dir(&self) -> &Path {
        &self.dir
    }

    fn path_for(&self, domain: PolicyDomain) -> PathBuf {
        self.dir.join(domain.file_name())
    }
}

impl PolicySource for FilePolicySource {
    fn fetch(&self, domain: PolicyDomain) -> Result<Option<String>, String> {
        let path = self.path_for(domain);
        match fs::read_to_string(&path) {
            Ok(text) => Ok(Some(text)),
            Err(e) if e.kind() == ErrorKind::NotFound => Ok(None),
            Err(e) => Err(format!("failed to read {}: {e}", path.display())),
        }
    }

    fn describe(&self, domain: PolicyDomain) -> String {
        self.path_for(domain).display().to_string()
    }
}

/// In-memory documents, swappable at runtime. Used by tests and by
/// embedders that manage configuration themselves.
#[derive(Debug, Default)]
pub struct StaticPolicySource {
    documents: RwLock<HashMap<PolicyDomain, String>>,
}

impl StaticPolicySource {
    pub fn new() -> Self {
        Self::default()
    }

    /// Builder-style insert.
    pub fn with(self, domain: PolicyDomain, document: impl Into<String>) -> Self {
        self.set(domain, document);
        self
    }

    pub fn set(&self, domain: PolicyDomain, document: impl Into<String>) {
        self.documents
            .write()
            .unwrap_or_else(PoisonError::into_inner)
            .insert(domain, document.into());
    }

    pub fn remove(&self, domain: PolicyDomain) {
        self.documents
            .write()
            .unwrap_or_else(PoisonError::into_inner)
            .remove(&domain);
    }
}

impl PolicySource for StaticPolicySource {
    fn fetch(&self, domain: PolicyDomain) -> Result<Option<String>, String> {
        Ok(self
            .documents
            .read()
            .unwrap_or_else(PoisonError::into_inner)
            .get(&domain)
            .cloned())
    }

    fn describe(&self, domain: PolicyDomain) -> String {
        format!("memory:{}", domain.file_name())
    }
}
