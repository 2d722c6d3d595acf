// config/types.rs
use crate::credentials::store::{is_json, resolve_path};
use crate::error::StepError;
use crate::kubeconfig::{CollisionPolicy, MergeOptions};
use serde::{Deserialize, Serialize};
use std::{fs, path::Path, path::PathBuf};

pub const DEFAULT_ENV_VAR: &str = "KUBECONFIG";

fn default_env_var() -> String {
    DEFAULT_ENV_VAR.to_string()
}

/// One credential requested by a step, with its overrides.
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct BindingSpec {
    pub credentials_id: String,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub server_url: Option<String>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub context_name: Option<String>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub cluster_name: Option<String>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub user_name: Option<String>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub namespace: Option<String>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub ca_certificate: Option<String>,
}

impl BindingSpec {
    pub fn new(credentials_id: impl Into<String>) -> Self {
        Self {
            credentials_id: credentials_id.into(),
            ..Self::default()
        }
    }

    pub fn with_server_url(mut self, server_url: impl Into<String>) -> Self {
        self.server_url = Some(server_url.into());
        self
    }

    pub fn with_namespace(mut self, namespace: impl Into<String>) -> Self {
        self.namespace = Some(namespace.into());
        self
    }
}

/// Step definition: which credentials to bind and how to expose them.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct StepConfig {
    #[serde(default = "default_env_var")]
    pub env_var: String,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub temp_dir: Option<PathBuf>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub current_context: Option<String>,
    #[serde(default)]
    pub strict: bool,
    #[serde(default)]
    pub bindings: Vec<BindingSpec>,
}

impl Default for StepConfig {
    fn default() -> Self {
        Self {
            env_var: default_env_var(),
            temp_dir: None,
            current_context: None,
            strict: false,
            bindings: Vec::new(),
        }
    }
}

impl StepConfig {
    pub fn load_from_file(path: &Path) -> Result<Self, StepError> {
        let config_str = fs::read_to_string(path).map_err(|source| StepError::Read {
            path: path.display().to_string(),
            source,
        })?;

        let parsed = if is_json(path) {
            serde_json::from_str::<StepConfig>(&config_str).map_err(|e| e.to_string())
        } else {
            serde_yaml::from_str::<StepConfig>(&config_str).map_err(|e| e.to_string())
        };
        let mut config = parsed.map_err(|message| StepError::Parse {
            path: path.display().to_string(),
            message,
        })?;

        // Relative temp dirs and CA files are relative to the step file.
        let base = path.parent();
        if let Some(dir) = &config.temp_dir {
            config.temp_dir = Some(resolve_path(&dir.to_string_lossy(), base));
        }
        for binding in &mut config.bindings {
            binding.ca_certificate = binding
                .ca_certificate
                .take()
                .map(|ca| read_ca_certificate(&ca, base))
                .transpose()?;
        }
        Ok(config)
    }

    pub fn validate(&self) -> Result<(), StepError> {
        if self.env_var.trim().is_empty() || self.env_var.contains('=') {
            return Err(StepError::InvalidStep(format!(
                "invalid environment variable name '{}'",
                self.env_var
            )));
        }
        if self.bindings.is_empty() {
            return Err(StepError::InvalidStep(
                "at least one credential binding is required".to_string(),
            ));
        }
        if let Some(empty) = self
            .bindings
            .iter()
            .position(|b| b.credentials_id.trim().is_empty())
        {
            return Err(StepError::InvalidStep(format!(
                "binding #{} has no credentialsId",
                empty + 1
            )));
        }
        if let Some(dir) = &self.temp_dir {
            if dir.exists() && !dir.is_dir() {
                return Err(StepError::InvalidStep(format!(
                    "temp directory {} is not a directory",
                    dir.display()
                )));
            }
        }
        Ok(())
    }

    pub fn merge_options(&self) -> MergeOptions {
        MergeOptions {
            collision_policy: if self.strict {
                CollisionPolicy::Reject
            } else {
                CollisionPolicy::Overwrite
            },
            current_context: self.current_context.clone(),
        }
    }

    pub fn temp_dir(&self) -> PathBuf {
        self.temp_dir.clone().unwrap_or_else(std::env::temp_dir)
    }
}

/// A CA certificate may be given inline as PEM or as a path to a PEM file.
pub fn read_ca_certificate(value: &str, base: Option<&Path>) -> Result<String, StepError> {
    if value.trim_start().starts_with("-----BEGIN") {
        return Ok(value.to_string());
    }
    let path = resolve_path(value, base);
    fs::read_to_string(&path).map_err(|source| StepError::Read {
        path: path.display().to_string(),
        source,
    })
}
