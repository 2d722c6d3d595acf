//! Merging credential bindings into a single kubeconfig.
//!
//! Bindings are processed in the order given. Names collide across bindings
//! by overwriting in place (or by failing, under [`CollisionPolicy::Reject`]).
//! The current context is chosen in this order:
//!
//! 1. the explicit [`MergeOptions::current_context`],
//! 2. the context targeted by the first kubeconfig file binding, unless a
//!    later binding names its context explicitly,
//! 3. the context of the last binding.

use super::types::{
    find, upsert, Context, MergedConfig, NamedCluster, NamedContext, NamedUser, Stanza,
    CERTIFICATE_AUTHORITY, CERTIFICATE_AUTHORITY_DATA, CLIENT_CERTIFICATE_DATA, CLIENT_KEY_DATA,
    INSECURE_SKIP_TLS_VERIFY, PASSWORD, SERVER, TOKEN, USERNAME,
};
use crate::credentials::{CredentialBinding, CredentialSecret};
use crate::error::{MergeError, MergeErrorKind};
use base64::{engine::general_purpose, Engine as _};
use std::collections::{BTreeMap, HashMap};
use tracing::debug;
use url::Url;

#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub enum CollisionPolicy {
    /// A later binding replaces an entry of the same name.
    #[default]
    Overwrite,
    /// Two bindings defining the same name is an error.
    Reject,
}

#[derive(Debug, Clone, Default)]
pub struct MergeOptions {
    pub collision_policy: CollisionPolicy,
    pub current_context: Option<String>,
}

/// Entries produced by a single binding before they enter the merged config.
struct Contribution {
    clusters: Vec<NamedCluster>,
    users: Vec<NamedUser>,
    contexts: Vec<NamedContext>,
    context: String,
    claims_current: bool,
}

pub struct KubeconfigMerger {
    options: MergeOptions,
    config: MergedConfig,
    owners: HashMap<(&'static str, String), String>,
    claimed_context: Option<String>,
    last_context: Option<String>,
}

impl KubeconfigMerger {
    pub fn new(options: MergeOptions) -> Self {
        Self {
            options,
            config: MergedConfig::default(),
            owners: HashMap::new(),
            claimed_context: None,
            last_context: None,
        }
    }

    /// Adds one binding. On error the merger is left as it was before the
    /// call.
    pub fn add(&mut self, binding: &CredentialBinding) -> Result<(), MergeError> {
        binding
            .secret
            .validate()
            .map_err(|reason| binding.error(reason))?;

        let contribution = match &binding.secret {
            CredentialSecret::KubeconfigFile { content } => expand_file(binding, content),
            CredentialSecret::UsernamePassword {
                username, password, ..
            } => {
                let mut user = Stanza::new();
                user.set_str(USERNAME, username.as_str());
                user.set_str(PASSWORD, password.as_str());
                expand_credential(binding, user)
            }
            CredentialSecret::Token { token, .. } => {
                let mut user = Stanza::new();
                user.set_str(TOKEN, token.as_str());
                expand_credential(binding, user)
            }
            CredentialSecret::ClientCertificate {
                certificate,
                private_key,
                ..
            } => client_certificate_user(certificate, private_key)
                .and_then(|user| expand_credential(binding, user)),
        }
        .map_err(|reason| binding.error(reason))?;

        if self.options.collision_policy == CollisionPolicy::Reject {
            self.check_collisions(binding, &contribution)?;
        }
        self.apply(binding, contribution);
        Ok(())
    }

    fn check_collisions(
        &self,
        binding: &CredentialBinding,
        contribution: &Contribution,
    ) -> Result<(), MergeError> {
        let names = contribution
            .clusters
            .iter()
            .map(|c| ("cluster", c.name.as_str()))
            .chain(contribution.users.iter().map(|u| ("user", u.name.as_str())))
            .chain(
                contribution
                    .contexts
                    .iter()
                    .map(|c| ("context", c.name.as_str())),
            );

        for (section, name) in names {
            if let Some(owner) = self.owners.get(&(section, name.to_string())) {
                if owner != &binding.credential_id {
                    return Err(binding.error(MergeErrorKind::NameCollisionUnresolved {
                        section,
                        name: name.to_string(),
                        owner: owner.clone(),
                    }));
                }
            }
        }
        Ok(())
    }

    fn apply(&mut self, binding: &CredentialBinding, contribution: Contribution) {
        let id = &binding.credential_id;

        for cluster in contribution.clusters {
            self.claim("cluster", &cluster.name, id);
            upsert(&mut self.config.clusters, cluster);
        }
        for user in contribution.users {
            self.claim("user", &user.name, id);
            upsert(&mut self.config.users, user);
        }
        for context in contribution.contexts {
            self.claim("context", &context.name, id);
            upsert(&mut self.config.contexts, context);
        }

        let explicit = non_empty(&binding.context_name).is_some();
        match &self.claimed_context {
            None if contribution.claims_current => {
                self.claimed_context = Some(contribution.context.clone());
            }
            Some(previous) if explicit => {
                debug!(
                    "current context '{}' overridden by '{}' from credential '{}'",
                    previous, contribution.context, id
                );
                self.claimed_context = Some(contribution.context.clone());
            }
            _ => {}
        }
        debug!(
            credential_id = %id,
            kind = binding.secret.kind_name(),
            context = %contribution.context,
            "merged credential"
        );
        self.last_context = Some(contribution.context);
    }

    fn claim(&mut self, section: &'static str, name: &str, id: &str) {
        if let Some(previous) = self
            .owners
            .insert((section, name.to_string()), id.to_string())
        {
            if previous != id {
                debug!(
                    "{} '{}' from credential '{}' overwritten by credential '{}'",
                    section, name, previous, id
                );
            }
        }
    }

    /// Picks the current context and returns the merged config.
    pub fn finish(self) -> Result<MergedConfig, MergeError> {
        let mut config = self.config;

        config.current_context = match self.options.current_context {
            Some(requested) => {
                if config.context(&requested).is_none() {
                    return Err(MergeError::UnknownCurrentContext(requested));
                }
                requested
            }
            None => self
                .claimed_context
                .or(self.last_context)
                .ok_or(MergeError::NoBindings)?,
        };

        config.validate().map_err(MergeError::Inconsistent)?;
        Ok(config)
    }
}

/// Merges `bindings` with the default options.
pub fn merge(bindings: &[CredentialBinding]) -> Result<MergedConfig, MergeError> {
    merge_with(bindings, &MergeOptions::default())
}

pub fn merge_with(
    bindings: &[CredentialBinding],
    options: &MergeOptions,
) -> Result<MergedConfig, MergeError> {
    if bindings.is_empty() {
        return Err(MergeError::NoBindings);
    }

    let mut merger = KubeconfigMerger::new(options.clone());
    for binding in bindings {
        merger.add(binding)?;
    }
    merger.finish()
}

/// Empty strings count as unset, so an empty form field never overrides.
fn non_empty(value: &Option<String>) -> Option<&str> {
    value.as_deref().map(str::trim).filter(|v| !v.is_empty())
}

fn encode(pem: &str) -> String {
    general_purpose::STANDARD.encode(pem.as_bytes())
}

fn validate_server_url(server: &str) -> Result<(), MergeErrorKind> {
    let invalid = |message: String| MergeErrorKind::InvalidServerUrl {
        url: server.to_string(),
        message,
    };
    let url = Url::parse(server).map_err(|e| invalid(e.to_string()))?;
    if !url.has_host() {
        return Err(invalid("no host".to_string()));
    }
    Ok(())
}

fn validate_certificate(pem: &str, field: &'static str) -> Result<(), MergeErrorKind> {
    let invalid = |message: String| MergeErrorKind::InvalidCertificate { field, message };
    let (_, pem) =
        x509_parser::pem::parse_x509_pem(pem.as_bytes()).map_err(|e| invalid(e.to_string()))?;
    pem.parse_x509().map_err(|e| invalid(e.to_string()))?;
    Ok(())
}

/// Sets the TLS fields of a cluster: the CA is embedded when given,
/// otherwise verification is skipped. Any earlier TLS setting is dropped.
fn apply_tls(cluster: &mut Stanza, ca_certificate: Option<&str>) -> Result<(), MergeErrorKind> {
    cluster.remove(CERTIFICATE_AUTHORITY);
    cluster.remove(CERTIFICATE_AUTHORITY_DATA);
    cluster.remove(INSECURE_SKIP_TLS_VERIFY);

    match ca_certificate {
        Some(pem) => {
            validate_certificate(pem, "caCertificate")?;
            cluster.set_str(CERTIFICATE_AUTHORITY_DATA, encode(pem));
        }
        None => cluster.set_bool(INSECURE_SKIP_TLS_VERIFY, true),
    }
    Ok(())
}

fn client_certificate_user(certificate: &str, private_key: &str) -> Result<Stanza, MergeErrorKind> {
    validate_certificate(certificate, "certificate")?;
    if !private_key.contains("PRIVATE KEY-----") {
        return Err(MergeErrorKind::InvalidCertificate {
            field: "privateKey",
            message: "not a PEM encoded private key".to_string(),
        });
    }

    let mut user = Stanza::new();
    user.set_str(CLIENT_CERTIFICATE_DATA, encode(certificate));
    user.set_str(CLIENT_KEY_DATA, encode(private_key));
    Ok(user)
}

/// A credential that is not a kubeconfig yields exactly one cluster, user
/// and context.
fn expand_credential(
    binding: &CredentialBinding,
    user: Stanza,
) -> Result<Contribution, MergeErrorKind> {
    let id = binding.credential_id.as_str();
    let cluster_name = non_empty(&binding.cluster_name).unwrap_or(id).to_string();
    let user_name = non_empty(&binding.user_name).unwrap_or(id).to_string();
    let context_name = non_empty(&binding.context_name)
        .unwrap_or(&cluster_name)
        .to_string();

    let server = non_empty(&binding.server_url)
        .or(binding.secret.server())
        .ok_or(MergeErrorKind::MissingCredentialField("serverUrl"))?;
    validate_server_url(server)?;

    let mut cluster = Stanza::new();
    cluster.set_str(SERVER, server);
    apply_tls(&mut cluster, non_empty(&binding.ca_certificate))?;

    let context = Context {
        cluster: cluster_name.clone(),
        namespace: non_empty(&binding.namespace).map(str::to_string),
        user: user_name.clone(),
        extra: BTreeMap::new(),
    };

    Ok(Contribution {
        clusters: vec![NamedCluster {
            cluster,
            name: cluster_name,
        }],
        users: vec![NamedUser {
            name: user_name,
            user,
        }],
        contexts: vec![NamedContext {
            context,
            name: context_name.clone(),
        }],
        context: context_name,
        claims_current: false,
    })
}

fn parse_embedded(content: &str) -> Result<MergedConfig, MergeErrorKind> {
    let doc: MergedConfig = serde_yaml::from_str(content)
        .map_err(|e| MergeErrorKind::MalformedEmbeddedConfig(e.to_string()))?;

    if doc.contexts.is_empty() {
        return Err(MergeErrorKind::MalformedEmbeddedConfig(
            "no contexts defined".to_string(),
        ));
    }
    doc.validate_references()
        .map_err(MergeErrorKind::MalformedEmbeddedConfig)?;
    Ok(doc)
}

/// Index of the context a file binding's overrides apply to.
fn target_context(binding: &CredentialBinding, doc: &MergedConfig) -> Result<usize, MergeErrorKind> {
    let position = |name: &str| doc.contexts.iter().position(|c| c.name == name);

    if let Some(index) = non_empty(&binding.context_name).and_then(position) {
        return Ok(index);
    }
    if let Some(index) = position(&doc.current_context) {
        return Ok(index);
    }
    if doc.contexts.len() == 1 {
        return Ok(0);
    }
    Err(MergeErrorKind::MissingCredentialField("contextName"))
}

/// A kubeconfig file contributes everything it defines. Overrides apply to
/// one target context, adding derived clusters and users rather than editing
/// the file's own entries.
fn expand_file(binding: &CredentialBinding, content: &str) -> Result<Contribution, MergeErrorKind> {
    let mut doc = parse_embedded(content)?;
    let index = target_context(binding, &doc)?;

    if let Some(name) = non_empty(&binding.context_name) {
        doc.contexts[index].name = name.to_string();
    }

    let server_url = non_empty(&binding.server_url);
    let cluster_name = non_empty(&binding.cluster_name);
    let ca_certificate = non_empty(&binding.ca_certificate);

    if server_url.is_some() || cluster_name.is_some() || ca_certificate.is_some() {
        let original = &doc.contexts[index].context.cluster;
        let mut cluster = find(&doc.clusters, original)
            .map(|c| c.cluster.clone())
            .ok_or_else(|| {
                MergeErrorKind::MalformedEmbeddedConfig(format!("unknown cluster '{}'", original))
            })?;

        if let Some(server) = server_url {
            validate_server_url(server)?;
            cluster.set_str(SERVER, server);
        }
        if server_url.is_some() || ca_certificate.is_some() {
            apply_tls(&mut cluster, ca_certificate)?;
        }

        let name = cluster_name.unwrap_or(&binding.credential_id).to_string();
        doc.contexts[index].context.cluster = name.clone();
        upsert(&mut doc.clusters, NamedCluster { cluster, name });
    }

    if let Some(name) = non_empty(&binding.user_name) {
        let original = &doc.contexts[index].context.user;
        if original != name {
            let user = find(&doc.users, original)
                .map(|u| u.user.clone())
                .ok_or_else(|| {
                    MergeErrorKind::MalformedEmbeddedConfig(format!("unknown user '{}'", original))
                })?;
            doc.contexts[index].context.user = name.to_string();
            upsert(
                &mut doc.users,
                NamedUser {
                    name: name.to_string(),
                    user,
                },
            );
        }
    }

    if let Some(namespace) = non_empty(&binding.namespace) {
        doc.contexts[index].context.namespace = Some(namespace.to_string());
    }

    Ok(Contribution {
        context: doc.contexts[index].name.clone(),
        clusters: doc.clusters,
        users: doc.users,
        contexts: doc.contexts,
        claims_current: true,
    })
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::kubeconfig::serialize;

    const TEST_CLUSTER: &str = include_str!("../../tests/fixtures/test-cluster.yaml");
    const TEST_CLUSTER2: &str = include_str!("../../tests/fixtures/test-cluster2.yaml");
    const MULTI_CONTEXT: &str = include_str!("../../tests/fixtures/multi-context.yaml");
    const CA_CERT: &str = include_str!("../../tests/fixtures/ca.crt");
    const CLIENT_CERT: &str = include_str!("../../tests/fixtures/client.crt");
    const CLIENT_KEY: &str = include_str!("../../tests/fixtures/client.key");

    fn username_password(id: &str) -> CredentialBinding {
        CredentialBinding::new(
            id,
            CredentialSecret::UsernamePassword {
                username: "bob".to_string(),
                password: "s3cr3t".to_string(),
                server: None,
            },
        )
    }

    fn token(id: &str) -> CredentialBinding {
        CredentialBinding::new(
            id,
            CredentialSecret::Token {
                token: "s3cr3t".to_string(),
                server: None,
            },
        )
    }

    fn file(id: &str, content: &str) -> CredentialBinding {
        CredentialBinding::new(
            id,
            CredentialSecret::KubeconfigFile {
                content: content.to_string(),
            },
        )
    }

    fn render(config: &MergedConfig) -> String {
        String::from_utf8(serialize(config).unwrap()).unwrap()
    }

    fn reason(err: MergeError) -> MergeErrorKind {
        match err {
            MergeError::Binding { reason, .. } => reason,
            other => panic!("expected a binding error, got {:?}", other),
        }
    }

    #[test]
    fn test_single_username_password() {
        let binding = username_password("test-credentials")
            .with_server_url("https://localhost:6443")
            .with_cluster_name("k8s")
            .with_context_name("k8s");

        let config = merge(&[binding]).unwrap();

        assert_eq!(
            render(&config),
            "apiVersion: v1
clusters:
- cluster:
    insecure-skip-tls-verify: true
    server: https://localhost:6443
  name: k8s
contexts:
- context:
    cluster: k8s
    user: test-credentials
  name: k8s
current-context: k8s
kind: Config
preferences: {}
users:
- name: test-credentials
  user:
    password: s3cr3t
    username: bob
"
        );
    }

    #[test]
    fn test_names_default_to_credential_id() {
        let config = merge(&[token("ci").with_server_url("https://k8s.local")]).unwrap();

        assert_eq!(config.clusters[0].name, "ci");
        assert_eq!(config.contexts[0].name, "ci");
        assert_eq!(config.users[0].name, "ci");
        assert_eq!(config.current_context, "ci");
    }

    #[test]
    fn test_context_defaults_to_cluster_name() {
        let config = merge(&[token("ci")
            .with_server_url("https://k8s.local")
            .with_cluster_name("edge")])
        .unwrap();

        assert_eq!(config.contexts[0].name, "edge");
        assert_eq!(config.contexts[0].context.cluster, "edge");
        assert_eq!(config.contexts[0].context.user, "ci");
    }

    #[test]
    fn test_multiple_kubeconfig_files() {
        let config = merge(&[
            file("test-credentials", TEST_CLUSTER),
            file("cred9999", TEST_CLUSTER2),
        ])
        .unwrap();

        assert_eq!(
            render(&config),
            "apiVersion: v1
clusters:
- cluster:
    insecure-skip-tls-verify: true
    server: https://test-cluster
  name: test-cluster
- cluster:
    insecure-skip-tls-verify: true
    server: https://test-cluster2
  name: test-cluster2
contexts:
- context:
    cluster: test-cluster
    user: test-user
  name: test-cluster
- context:
    cluster: test-cluster2
    user: test-user2
  name: test-cluster2
current-context: test-cluster
kind: Config
preferences: {}
users:
- name: test-user
  user: {}
- name: test-user2
  user: {}
"
        );
    }

    #[test]
    fn test_token_with_overrides_and_file() {
        let config = merge(&[
            token("test-credentials")
                .with_server_url("https://localhost:1234")
                .with_cluster_name("clus1234")
                .with_context_name("cont1234"),
            file("cred9999", TEST_CLUSTER2)
                .with_server_url("https://localhost:9999")
                .with_cluster_name("clus9999")
                .with_context_name("test-cluster2"),
        ])
        .unwrap();

        assert_eq!(
            render(&config),
            "apiVersion: v1
clusters:
- cluster:
    insecure-skip-tls-verify: true
    server: https://localhost:1234
  name: clus1234
- cluster:
    insecure-skip-tls-verify: true
    server: https://test-cluster2
  name: test-cluster2
- cluster:
    insecure-skip-tls-verify: true
    server: https://localhost:9999
  name: clus9999
contexts:
- context:
    cluster: clus1234
    user: test-credentials
  name: cont1234
- context:
    cluster: clus9999
    user: test-user2
  name: test-cluster2
current-context: test-cluster2
kind: Config
preferences: {}
users:
- name: test-credentials
  user:
    token: s3cr3t
- name: test-user2
  user: {}
"
        );
    }

    #[test]
    fn test_server_override_on_file_derives_cluster_from_id() {
        let config = merge(&[
            file("test-credentials", TEST_CLUSTER),
            file("cred9999", TEST_CLUSTER2).with_server_url("https://localhost:9999"),
        ])
        .unwrap();

        let names: Vec<&str> = config.clusters.iter().map(|c| c.name.as_str()).collect();
        assert_eq!(names, vec!["test-cluster", "test-cluster2", "cred9999"]);

        let derived = config.cluster("cred9999").unwrap();
        assert_eq!(derived.cluster.get_str(SERVER), Some("https://localhost:9999"));
        assert_eq!(derived.cluster.get_bool(INSECURE_SKIP_TLS_VERIFY), Some(true));

        let context = config.context("test-cluster2").unwrap();
        assert_eq!(context.context.cluster, "cred9999");
        assert_eq!(context.context.user, "test-user2");
        assert_eq!(config.current_context, "test-cluster");
    }

    #[test]
    fn test_current_context_falls_back_to_last_binding() {
        let config = merge(&[
            token("a").with_server_url("https://a.example.com"),
            username_password("b").with_server_url("https://b.example.com"),
        ])
        .unwrap();
        assert_eq!(config.current_context, "b");
    }

    #[test]
    fn test_later_explicit_context_overrides_file_claim() {
        let config = merge(&[
            file("f", TEST_CLUSTER),
            token("tok")
                .with_server_url("https://k8s.local")
                .with_context_name("explicit"),
        ])
        .unwrap();
        assert_eq!(config.current_context, "explicit");

        // Without an explicit name the file keeps its claim.
        let config = merge(&[
            file("f", TEST_CLUSTER),
            token("tok").with_server_url("https://k8s.local"),
        ])
        .unwrap();
        assert_eq!(config.current_context, "test-cluster");
    }

    #[test]
    fn test_later_file_with_context_name_overrides_claim() {
        let config = merge(&[
            file("a", TEST_CLUSTER),
            file("b", MULTI_CONTEXT).with_context_name("production"),
        ])
        .unwrap();
        assert_eq!(config.current_context, "production");
    }

    #[test]
    fn test_explicit_current_context() {
        let options = MergeOptions {
            current_context: Some("a".to_string()),
            ..MergeOptions::default()
        };
        let bindings = [
            token("a").with_server_url("https://a.example.com"),
            file("f", TEST_CLUSTER),
        ];
        assert_eq!(merge_with(&bindings, &options).unwrap().current_context, "a");

        let options = MergeOptions {
            current_context: Some("nope".to_string()),
            ..MergeOptions::default()
        };
        assert_eq!(
            merge_with(&bindings, &options).unwrap_err(),
            MergeError::UnknownCurrentContext("nope".to_string())
        );
    }

    #[test]
    fn test_collision_overwrites_in_place() {
        let config = merge(&[
            token("shared").with_server_url("https://first.example.com"),
            token("other").with_server_url("https://other.example.com"),
            username_password("shared").with_server_url("https://second.example.com"),
        ])
        .unwrap();

        let names: Vec<&str> = config.clusters.iter().map(|c| c.name.as_str()).collect();
        assert_eq!(names, vec!["shared", "other"]);
        assert_eq!(
            config.cluster("shared").unwrap().cluster.get_str(SERVER),
            Some("https://second.example.com")
        );
        let user = &config.user("shared").unwrap().user;
        assert_eq!(user.get_str(USERNAME), Some("bob"));
        assert!(!user.contains_key(TOKEN));
        assert_eq!(config.current_context, "shared");
    }

    #[test]
    fn test_collision_rejected_in_strict_mode() {
        let options = MergeOptions {
            collision_policy: CollisionPolicy::Reject,
            ..MergeOptions::default()
        };
        let err = merge_with(
            &[
                token("first")
                    .with_server_url("https://a.example.com")
                    .with_cluster_name("shared"),
                token("second")
                    .with_server_url("https://b.example.com")
                    .with_cluster_name("shared"),
            ],
            &options,
        )
        .unwrap_err();

        assert_eq!(err.credential_id(), Some("second"));
        assert_eq!(
            reason(err),
            MergeErrorKind::NameCollisionUnresolved {
                section: "cluster",
                name: "shared".to_string(),
                owner: "first".to_string(),
            }
        );
    }

    #[test]
    fn test_empty_bindings() {
        assert_eq!(merge(&[]).unwrap_err(), MergeError::NoBindings);
    }

    #[test]
    fn test_missing_server_url() {
        let err = merge(&[file("f", TEST_CLUSTER), token("tok")]).unwrap_err();
        assert_eq!(err.credential_id(), Some("tok"));
        assert_eq!(
            reason(err),
            MergeErrorKind::MissingCredentialField("serverUrl")
        );
    }

    #[test]
    fn test_inherent_server_is_used() {
        let binding = CredentialBinding::new(
            "tok",
            CredentialSecret::Token {
                token: "t".to_string(),
                server: Some("https://stored.example.com".to_string()),
            },
        );
        let config = merge(&[binding.clone()]).unwrap();
        assert_eq!(
            config.clusters[0].cluster.get_str(SERVER),
            Some("https://stored.example.com")
        );

        let config = merge(&[binding.with_server_url("https://override.example.com")]).unwrap();
        assert_eq!(
            config.clusters[0].cluster.get_str(SERVER),
            Some("https://override.example.com")
        );
    }

    #[test]
    fn test_invalid_server_url() {
        let err = merge(&[token("tok").with_server_url("not a url")]).unwrap_err();
        assert!(matches!(
            reason(err),
            MergeErrorKind::InvalidServerUrl { .. }
        ));
    }

    #[test]
    fn test_ca_certificate_replaces_insecure_flag() {
        let config = merge(&[token("tok")
            .with_server_url("https://k8s.local:6443")
            .with_ca_certificate(CA_CERT)])
        .unwrap();

        let cluster = &config.clusters[0].cluster;
        assert_eq!(cluster.get_str(CERTIFICATE_AUTHORITY_DATA), Some(encode(CA_CERT).as_str()));
        assert!(!cluster.contains_key(INSECURE_SKIP_TLS_VERIFY));

        let keys: Vec<&str> = cluster.keys().collect();
        assert_eq!(keys, vec![CERTIFICATE_AUTHORITY_DATA, SERVER]);
    }

    #[test]
    fn test_invalid_ca_certificate() {
        let err = merge(&[token("tok")
            .with_server_url("https://k8s.local")
            .with_ca_certificate("-----BEGIN CERTIFICATE-----\nbm9wZQ==\n-----END CERTIFICATE-----\n")])
        .unwrap_err();
        assert!(matches!(
            reason(err),
            MergeErrorKind::InvalidCertificate {
                field: "caCertificate",
                ..
            }
        ));
    }

    #[test]
    fn test_client_certificate() {
        let binding = CredentialBinding::new(
            "mtls",
            CredentialSecret::ClientCertificate {
                certificate: CLIENT_CERT.to_string(),
                private_key: CLIENT_KEY.to_string(),
                server: Some("https://k8s.local".to_string()),
            },
        );
        let config = merge(&[binding]).unwrap();

        let user = &config.user("mtls").unwrap().user;
        assert_eq!(
            user.get_str(CLIENT_CERTIFICATE_DATA),
            Some(encode(CLIENT_CERT).as_str())
        );
        assert_eq!(user.get_str(CLIENT_KEY_DATA), Some(encode(CLIENT_KEY).as_str()));
    }

    #[test]
    fn test_client_certificate_requires_key_pem() {
        let binding = CredentialBinding::new(
            "mtls",
            CredentialSecret::ClientCertificate {
                certificate: CLIENT_CERT.to_string(),
                private_key: "garbage".to_string(),
                server: Some("https://k8s.local".to_string()),
            },
        );
        assert!(matches!(
            reason(merge(&[binding]).unwrap_err()),
            MergeErrorKind::InvalidCertificate {
                field: "privateKey",
                ..
            }
        ));
    }

    #[test]
    fn test_namespace_on_credential_and_file() {
        let config = merge(&[
            token("tok")
                .with_server_url("https://k8s.local")
                .with_namespace("apps"),
            file("f", TEST_CLUSTER).with_namespace("tests"),
        ])
        .unwrap();

        assert_eq!(
            config.context("tok").unwrap().context.namespace.as_deref(),
            Some("apps")
        );
        assert_eq!(
            config.context("test-cluster").unwrap().context.namespace.as_deref(),
            Some("tests")
        );
        assert!(render(&config).contains("    namespace: apps\n    user: tok\n"));
    }

    #[test]
    fn test_file_user_override_copies_user() {
        let config = merge(&[file("f", MULTI_CONTEXT)
            .with_context_name("production")
            .with_user_name("deployer")])
        .unwrap();

        let context = config.context("production").unwrap();
        assert_eq!(context.context.user, "deployer");
        assert_eq!(
            config.user("deployer").unwrap().user.get_str(TOKEN),
            Some("embedded-token")
        );
        // The untouched context still points at the file's own user.
        assert_eq!(config.context("staging").unwrap().context.user, "ci-bot");
        assert!(config.user("ci-bot").is_some());
        assert_eq!(config.current_context, "production");
    }

    #[test]
    fn test_file_without_current_context_needs_context_name() {
        let err = merge(&[file("f", MULTI_CONTEXT)]).unwrap_err();
        assert_eq!(
            reason(err),
            MergeErrorKind::MissingCredentialField("contextName")
        );
    }

    #[test]
    fn test_file_context_rename() {
        let config = merge(&[file("f", TEST_CLUSTER).with_context_name("renamed")]).unwrap();
        assert!(config.context("test-cluster").is_none());
        assert_eq!(
            config.context("renamed").unwrap().context.cluster,
            "test-cluster"
        );
        assert_eq!(config.current_context, "renamed");
    }

    #[test]
    fn test_file_ca_override_keeps_server() {
        let config = merge(&[file("f", MULTI_CONTEXT)
            .with_context_name("staging")
            .with_ca_certificate(CA_CERT)])
        .unwrap();

        let derived = config.cluster("f").unwrap();
        assert_eq!(
            derived.cluster.get_str(SERVER),
            Some("https://staging.example.com:6443")
        );
        assert!(derived.cluster.contains_key(CERTIFICATE_AUTHORITY_DATA));
        assert!(!derived.cluster.contains_key(CERTIFICATE_AUTHORITY));
        assert!(!derived.cluster.contains_key(INSECURE_SKIP_TLS_VERIFY));
        assert_eq!(config.context("staging").unwrap().context.cluster, "f");
    }

    #[test]
    fn test_malformed_embedded_config() {
        let err = merge(&[file("bad", "clusters: [oops")]).unwrap_err();
        assert!(matches!(
            reason(err),
            MergeErrorKind::MalformedEmbeddedConfig(_)
        ));

        let dangling = "contexts:\n- name: x\n  context:\n    cluster: missing\n    user: u\nusers:\n- name: u\n  user: {}\n";
        let err = merge(&[file("bad", dangling)]).unwrap_err();
        assert_eq!(
            reason(err),
            MergeErrorKind::MalformedEmbeddedConfig(
                "context 'x' references unknown cluster 'missing'".to_string()
            )
        );

        let err = merge(&[file("empty", "apiVersion: v1\nkind: Config\n")]).unwrap_err();
        assert_eq!(
            reason(err),
            MergeErrorKind::MalformedEmbeddedConfig("no contexts defined".to_string())
        );
    }

    #[test]
    fn test_failure_aborts_whole_merge() {
        let err = merge(&[
            token("good").with_server_url("https://k8s.local"),
            CredentialBinding::new(
                "broken",
                CredentialSecret::UsernamePassword {
                    username: String::new(),
                    password: "p".to_string(),
                    server: None,
                },
            ),
        ])
        .unwrap_err();
        assert_eq!(err.credential_id(), Some("broken"));
    }

    #[test]
    fn test_empty_overrides_are_ignored() {
        let config = merge(&[token("tok")
            .with_server_url("https://k8s.local")
            .with_cluster_name("")
            .with_namespace(" ")])
        .unwrap();
        assert_eq!(config.clusters[0].name, "tok");
        assert_eq!(config.contexts[0].context.namespace, None);
    }

    #[test]
    fn test_merge_is_deterministic_and_round_trips() {
        let bindings = [
            token("test-credentials")
                .with_server_url("https://localhost:1234")
                .with_cluster_name("clus1234")
                .with_context_name("cont1234"),
            file("cred9999", TEST_CLUSTER2).with_cluster_name("clus9999"),
            file("multi", MULTI_CONTEXT).with_context_name("staging"),
        ];

        let first = serialize(&merge(&bindings).unwrap()).unwrap();
        let second = serialize(&merge(&bindings).unwrap()).unwrap();
        assert_eq!(first, second);

        let config = merge(&bindings).unwrap();
        let parsed = MergedConfig::from_yaml(&render(&config)).unwrap();
        assert_eq!(parsed, config);
        assert!(parsed.validate().is_ok());
    }
}
