// credentials/store.rs
use super::types::{CredentialBinding, CredentialSecret};
use crate::config::BindingSpec;
use crate::error::{MergeError, MergeErrorKind, StepError};
use serde::{Deserialize, Serialize};
use std::collections::HashMap;
use std::fs;
use std::path::{Path, PathBuf};
use tracing::debug;

/// A credential record as kept in a credential store file.
///
/// Fields are optional at this level; which ones are required depends on
/// `kind` and is checked by [`StoredCredential::to_secret`].
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct StoredCredential {
    pub id: String,
    pub kind: String,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub username: Option<String>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub password: Option<String>,
    #[serde(default, alias = "secret", skip_serializing_if = "Option::is_none")]
    pub token: Option<String>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub content: Option<String>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub path: Option<String>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub certificate: Option<String>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub private_key: Option<String>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub server: Option<String>,
}

impl StoredCredential {
    /// Turns the record into resolved secret material. `base_dir` anchors
    /// relative kubeconfig paths.
    pub fn to_secret(&self, base_dir: Option<&Path>) -> Result<CredentialSecret, MergeError> {
        let fail = |reason: MergeErrorKind| MergeError::binding(&self.id, reason);
        let field = |value: &Option<String>, name: &'static str| {
            value
                .clone()
                .ok_or(MergeErrorKind::MissingCredentialField(name))
        };

        let secret = match self.kind.as_str() {
            "usernamePassword" => CredentialSecret::UsernamePassword {
                username: field(&self.username, "username").map_err(fail)?,
                password: self.password.clone().unwrap_or_default(),
                server: self.server.clone(),
            },
            "secretText" | "token" => CredentialSecret::Token {
                token: field(&self.token, "token").map_err(fail)?,
                server: self.server.clone(),
            },
            "kubeconfigFile" | "file" => CredentialSecret::KubeconfigFile {
                content: self.kubeconfig_content(base_dir)?,
            },
            "certificate" => CredentialSecret::ClientCertificate {
                certificate: field(&self.certificate, "certificate").map_err(fail)?,
                private_key: field(&self.private_key, "privateKey").map_err(fail)?,
                server: self.server.clone(),
            },
            other => {
                return Err(fail(MergeErrorKind::UnsupportedCredentialKind(
                    other.to_string(),
                )))
            }
        };

        secret.validate().map_err(fail)?;
        Ok(secret)
    }

    fn kubeconfig_content(&self, base_dir: Option<&Path>) -> Result<String, MergeError> {
        if let Some(content) = &self.content {
            return Ok(content.clone());
        }

        let path = self.path.as_ref().ok_or_else(|| {
            MergeError::binding(&self.id, MergeErrorKind::MissingCredentialField("content"))
        })?;
        let path = resolve_path(path, base_dir);
        fs::read_to_string(&path).map_err(|e| {
            MergeError::binding(
                &self.id,
                MergeErrorKind::MalformedEmbeddedConfig(format!(
                    "cannot read {}: {}",
                    path.display(),
                    e
                )),
            )
        })
    }
}

/// Expands `~` and anchors relative paths at `base_dir`.
pub fn resolve_path(path: &str, base_dir: Option<&Path>) -> PathBuf {
    let expanded = PathBuf::from(shellexpand::tilde(path).to_string());
    match base_dir {
        Some(base) if expanded.is_relative() => base.join(expanded),
        _ => expanded,
    }
}

/// Source of credential records, keyed by credential id.
pub trait CredentialStore {
    fn lookup(&self, id: &str) -> Option<StoredCredential>;

    /// Directory that relative paths inside records are resolved against.
    fn base_dir(&self) -> Option<&Path> {
        None
    }
}

#[derive(Debug, Default, Deserialize)]
struct CredentialsDocument {
    #[serde(default)]
    credentials: Vec<StoredCredential>,
}

/// Credential store backed by a YAML or JSON file.
#[derive(Debug, Default)]
pub struct FileCredentialStore {
    credentials: HashMap<String, StoredCredential>,
    base_dir: Option<PathBuf>,
}

impl FileCredentialStore {
    pub fn load_from_file(path: &Path) -> Result<Self, StepError> {
        let contents = fs::read_to_string(path).map_err(|source| StepError::Read {
            path: path.display().to_string(),
            source,
        })?;
        let mut store = Self::parse(&contents, is_json(path)).map_err(|message| {
            StepError::Parse {
                path: path.display().to_string(),
                message,
            }
        })?;
        store.base_dir = path.parent().map(Path::to_path_buf);
        debug!(
            "loaded {} credentials from {}",
            store.credentials.len(),
            path.display()
        );
        Ok(store)
    }

    pub fn parse(contents: &str, json: bool) -> Result<Self, String> {
        let document: CredentialsDocument = if json {
            serde_json::from_str(contents).map_err(|e| e.to_string())?
        } else {
            serde_yaml::from_str(contents).map_err(|e| e.to_string())?
        };

        let mut credentials = HashMap::new();
        for credential in document.credentials {
            if credential.id.trim().is_empty() {
                return Err("credential with an empty id".to_string());
            }
            if credentials.contains_key(&credential.id) {
                return Err(format!("duplicate credential id '{}'", credential.id));
            }
            credentials.insert(credential.id.clone(), credential);
        }

        Ok(Self {
            credentials,
            base_dir: None,
        })
    }

    pub fn len(&self) -> usize {
        self.credentials.len()
    }

    pub fn is_empty(&self) -> bool {
        self.credentials.is_empty()
    }
}

impl CredentialStore for FileCredentialStore {
    fn lookup(&self, id: &str) -> Option<StoredCredential> {
        self.credentials.get(id).cloned()
    }

    fn base_dir(&self) -> Option<&Path> {
        self.base_dir.as_deref()
    }
}

pub(crate) fn is_json(path: &Path) -> bool {
    path.extension()
        .and_then(|ext| ext.to_str())
        .map(|ext| ext.eq_ignore_ascii_case("json"))
        .unwrap_or(false)
}

/// Resolves each requested binding against `store`, keeping the request
/// order.
pub fn resolve_credentials(
    store: &dyn CredentialStore,
    specs: &[BindingSpec],
) -> Result<Vec<CredentialBinding>, StepError> {
    specs
        .iter()
        .map(|spec| {
            let record = store
                .lookup(&spec.credentials_id)
                .ok_or_else(|| StepError::CredentialNotFound(spec.credentials_id.clone()))?;
            let secret = record.to_secret(store.base_dir())?;

            Ok(CredentialBinding {
                credential_id: spec.credentials_id.clone(),
                secret,
                server_url: spec.server_url.clone(),
                context_name: spec.context_name.clone(),
                cluster_name: spec.cluster_name.clone(),
                user_name: spec.user_name.clone(),
                namespace: spec.namespace.clone(),
                ca_certificate: spec.ca_certificate.clone(),
            })
        })
        .collect()
}
