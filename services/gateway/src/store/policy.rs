//! Policy stores the engine reloads from.
//!
//! [`InMemoryPolicyStore`] is mutated at runtime (tests, admin tooling);
//! [`YamlPolicyFile`] reads the operator-managed policy document from disk.
use async_trait::async_trait;
use std::path::{Path, PathBuf};
use std::sync::Arc;
use tokio::sync::RwLock;
use tollgate_authz::{
    AuthzError, AuthzResult, PolicyDocument, PolicyModel, PolicyRule, PolicySource, RoleBinding,
};

#[derive(Debug, Clone, Default)]
pub struct InMemoryPolicyStore {
    document: Arc<RwLock<PolicyDocument>>,
}

impl InMemoryPolicyStore {
    pub fn new(document: PolicyDocument) -> Self {
        Self {
            document: Arc::new(RwLock::new(document)),
        }
    }

    pub async fn set_model(&self, model: PolicyModel) {
        self.document.write().await.model = model;
    }

    pub async fn add_rule(&self, rule: PolicyRule) {
        self.document.write().await.rules.push(rule);
    }

    pub async fn add_binding(&self, binding: RoleBinding) {
        self.document.write().await.bindings.push(binding);
    }

    pub async fn document(&self) -> PolicyDocument {
        self.document.read().await.clone()
    }
}

#[async_trait]
impl PolicySource for InMemoryPolicyStore {
    async fn load_model(&self) -> AuthzResult<PolicyModel> {
        Ok(self.document.read().await.model.clone())
    }

    async fn list_domains(&self) -> AuthzResult<Vec<String>> {
        Ok(self.document.read().await.domains())
    }

    async fn load_rules(&self, domain: &str) -> AuthzResult<(Vec<PolicyRule>, Vec<RoleBinding>)> {
        Ok(self.document.read().await.rules_for(domain))
    }
}

/// Policy document on disk.
///
/// `load_model` re-reads the file; `list_domains` and `load_rules` answer
/// from the document captured by the last `load_model`, so one reload sees
/// one version of the file.
#[derive(Debug)]
pub struct YamlPolicyFile {
    path: PathBuf,
    loaded: RwLock<PolicyDocument>,
}

impl YamlPolicyFile {
    pub fn new(path: impl Into<PathBuf>) -> Self {
        Self {
            path: path.into(),
            loaded: RwLock::new(PolicyDocument::default()),
        }
    }

    pub fn path(&self) -> &Path {
        &self.path
    }

    pub async fn read(&self) -> AuthzResult<PolicyDocument> {
        let raw = tokio::fs::read_to_string(&self.path).await.map_err(|err| {
            AuthzError::Source(format!("read policy file {}: {err}", self.path.display()))
        })?;
        PolicyDocument::from_yaml(&raw)
    }
}

#[async_trait]
impl PolicySource for YamlPolicyFile {
    async fn load_model(&self) -> AuthzResult<PolicyModel> {
        let document = self.read().await?;
        let model = document.model.clone();
        *self.loaded.write().await = document;
        Ok(model)
    }

    async fn list_domains(&self) -> AuthzResult<Vec<String>> {
        Ok(self.loaded.read().await.domains())
    }

    async fn load_rules(&self, domain: &str) -> AuthzResult<(Vec<PolicyRule>, Vec<RoleBinding>)> {
        Ok(self.loaded.read().await.rules_for(domain))
    }
}
