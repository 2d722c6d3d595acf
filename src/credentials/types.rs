// credentials/types.rs
use crate::error::{MergeError, MergeErrorKind};

/// Secret material of a credential, already resolved to plain values.
#[derive(Debug, Clone, PartialEq)]
pub enum CredentialSecret {
    UsernamePassword {
        username: String,
        password: String,
        server: Option<String>,
    },
    Token {
        token: String,
        server: Option<String>,
    },
    KubeconfigFile {
        content: String,
    },
    ClientCertificate {
        certificate: String,
        private_key: String,
        server: Option<String>,
    },
}

impl CredentialSecret {
    pub fn kind_name(&self) -> &'static str {
        match self {
            CredentialSecret::UsernamePassword { .. } => "usernamePassword",
            CredentialSecret::Token { .. } => "secretText",
            CredentialSecret::KubeconfigFile { .. } => "kubeconfigFile",
            CredentialSecret::ClientCertificate { .. } => "certificate",
        }
    }

    /// Server URL stored alongside the credential itself, if any.
    pub fn server(&self) -> Option<&str> {
        match self {
            CredentialSecret::UsernamePassword { server, .. }
            | CredentialSecret::Token { server, .. }
            | CredentialSecret::ClientCertificate { server, .. } => server.as_deref(),
            CredentialSecret::KubeconfigFile { .. } => None,
        }
    }

    /// Rejects secrets that lack the data their kind requires.
    pub fn validate(&self) -> Result<(), MergeErrorKind> {
        let require = |value: &str, field: &'static str| {
            if value.trim().is_empty() {
                Err(MergeErrorKind::MissingCredentialField(field))
            } else {
                Ok(())
            }
        };

        match self {
            CredentialSecret::UsernamePassword { username, .. } => require(username, "username"),
            CredentialSecret::Token { token, .. } => require(token, "token"),
            CredentialSecret::KubeconfigFile { content } => require(content, "content"),
            CredentialSecret::ClientCertificate {
                certificate,
                private_key,
                ..
            } => {
                require(certificate, "certificate")?;
                require(private_key, "privateKey")
            }
        }
    }
}

/// One credential consumed by a step, with the overrides the step declared
/// for it.
#[derive(Debug, Clone, PartialEq)]
pub struct CredentialBinding {
    pub credential_id: String,
    pub secret: CredentialSecret,
    pub server_url: Option<String>,
    pub context_name: Option<String>,
    pub cluster_name: Option<String>,
    pub user_name: Option<String>,
    pub namespace: Option<String>,
    pub ca_certificate: Option<String>,
}

impl CredentialBinding {
    pub fn new(credential_id: impl Into<String>, secret: CredentialSecret) -> Self {
        Self {
            credential_id: credential_id.into(),
            secret,
            server_url: None,
            context_name: None,
            cluster_name: None,
            user_name: None,
            namespace: None,
            ca_certificate: None,
        }
    }

    pub fn with_server_url(mut self, server_url: impl Into<String>) -> Self {
        self.server_url = Some(server_url.into());
        self
    }

    pub fn with_context_name(mut self, context_name: impl Into<String>) -> Self {
        self.context_name = Some(context_name.into());
        self
    }

    pub fn with_cluster_name(mut self, cluster_name: impl Into<String>) -> Self {
        self.cluster_name = Some(cluster_name.into());
        self
    }

    pub fn with_user_name(mut self, user_name: impl Into<String>) -> Self {
        self.user_name = Some(user_name.into());
        self
    }

    pub fn with_namespace(mut self, namespace: impl Into<String>) -> Self {
        self.namespace = Some(namespace.into());
        self
    }

    pub fn with_ca_certificate(mut self, pem: impl Into<String>) -> Self {
        self.ca_certificate = Some(pem.into());
        self
    }

    /// Wraps a failure reason with this binding's credential id.
    pub fn error(&self, reason: MergeErrorKind) -> MergeError {
        MergeError::binding(&self.credential_id, reason)
    }
}
