// src/kubeconfig/types.rs
use serde::{Deserialize, Deserializer, Serialize, Serializer};
use serde_yaml::Value;
use std::collections::{BTreeMap, HashSet};

pub const API_VERSION: &str = "v1";
pub const KIND: &str = "Config";

pub const SERVER: &str = "server";
pub const INSECURE_SKIP_TLS_VERIFY: &str = "insecure-skip-tls-verify";
pub const CERTIFICATE_AUTHORITY: &str = "certificate-authority";
pub const CERTIFICATE_AUTHORITY_DATA: &str = "certificate-authority-data";
pub const USERNAME: &str = "username";
pub const PASSWORD: &str = "password";
pub const TOKEN: &str = "token";
pub const CLIENT_CERTIFICATE_DATA: &str = "client-certificate-data";
pub const CLIENT_KEY_DATA: &str = "client-key-data";

/// Treats an explicit YAML `null` like a missing key. kubectl writes
/// `clusters: null` and `user: null` for empty sections.
fn null_as_default<'de, D, T>(deserializer: D) -> Result<T, D::Error>
where
    D: Deserializer<'de>,
    T: Default + Deserialize<'de>,
{
    Ok(Option::<T>::deserialize(deserializer)?.unwrap_or_default())
}

fn default_api_version() -> String {
    API_VERSION.to_string()
}

fn default_kind() -> String {
    KIND.to_string()
}

/// A free-form kubeconfig record (cluster or user body).
///
/// Keys are kept in a `BTreeMap` so that every record serializes with its
/// keys in alphabetical order, whatever fields an embedded kubeconfig carried.
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
#[serde(transparent)]
pub struct Stanza(BTreeMap<String, Value>);

impl Stanza {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn is_empty(&self) -> bool {
        self.0.is_empty()
    }

    pub fn get_str(&self, key: &str) -> Option<&str> {
        self.0.get(key).and_then(Value::as_str)
    }

    pub fn get_bool(&self, key: &str) -> Option<bool> {
        self.0.get(key).and_then(Value::as_bool)
    }

    pub fn contains_key(&self, key: &str) -> bool {
        self.0.contains_key(key)
    }

    pub fn set_str(&mut self, key: &str, value: impl Into<String>) {
        self.0.insert(key.to_string(), Value::String(value.into()));
    }

    pub fn set_bool(&mut self, key: &str, value: bool) {
        self.0.insert(key.to_string(), Value::Bool(value));
    }

    pub fn remove(&mut self, key: &str) -> Option<Value> {
        self.0.remove(key)
    }

    pub fn keys(&self) -> impl Iterator<Item = &str> {
        self.0.keys().map(String::as_str)
    }
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct NamedCluster {
    #[serde(default, deserialize_with = "null_as_default")]
    pub cluster: Stanza,
    pub name: String,
}

/// Context body. Keys a file carried beyond the known ones (such as
/// `extensions`) are kept in `extra`.
#[derive(Debug, Clone, Default, PartialEq, Deserialize)]
pub struct Context {
    pub cluster: String,
    #[serde(default)]
    pub namespace: Option<String>,
    pub user: String,
    #[serde(flatten)]
    pub extra: BTreeMap<String, Value>,
}

impl Serialize for Context {
    fn serialize<S: Serializer>(&self, serializer: S) -> Result<S::Ok, S::Error> {
        // Known and extra keys share one alphabetical order.
        let mut body: BTreeMap<&str, Value> = self
            .extra
            .iter()
            .map(|(key, value)| (key.as_str(), value.clone()))
            .collect();
        body.insert("cluster", Value::String(self.cluster.clone()));
        if let Some(namespace) = &self.namespace {
            body.insert("namespace", Value::String(namespace.clone()));
        }
        body.insert("user", Value::String(self.user.clone()));
        body.serialize(serializer)
    }
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct NamedContext {
    pub context: Context,
    pub name: String,
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct NamedUser {
    pub name: String,
    #[serde(default, deserialize_with = "null_as_default")]
    pub user: Stanza,
}

/// Something stored under a unique name in one of the kubeconfig sections.
pub trait Named {
    fn name(&self) -> &str;
}

impl Named for NamedCluster {
    fn name(&self) -> &str {
        &self.name
    }
}

impl Named for NamedContext {
    fn name(&self) -> &str {
        &self.name
    }
}

impl Named for NamedUser {
    fn name(&self) -> &str {
        &self.name
    }
}

/// Inserts `entry` or overwrites the entry of the same name in place.
///
/// Returns `true` when an existing entry was replaced. Replaced entries keep
/// their original position, new names are appended.
pub fn upsert<T: Named>(entries: &mut Vec<T>, entry: T) -> bool {
    if let Some(existing) = entries.iter_mut().find(|e| e.name() == entry.name()) {
        *existing = entry;
        true
    } else {
        entries.push(entry);
        false
    }
}

pub fn find<'a, T: Named>(entries: &'a [T], name: &str) -> Option<&'a T> {
    entries.iter().find(|e| e.name() == name)
}

/// A complete kubeconfig document.
///
/// Field order matches the order kubectl writes top-level keys in.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct MergedConfig {
    #[serde(rename = "apiVersion", default = "default_api_version")]
    pub api_version: String,
    #[serde(default, deserialize_with = "null_as_default")]
    pub clusters: Vec<NamedCluster>,
    #[serde(default, deserialize_with = "null_as_default")]
    pub contexts: Vec<NamedContext>,
    #[serde(rename = "current-context", default)]
    pub current_context: String,
    #[serde(default = "default_kind")]
    pub kind: String,
    #[serde(default, deserialize_with = "null_as_default")]
    pub preferences: BTreeMap<String, Value>,
    #[serde(default, deserialize_with = "null_as_default")]
    pub users: Vec<NamedUser>,
}

impl Default for MergedConfig {
    fn default() -> Self {
        Self {
            api_version: API_VERSION.to_string(),
            clusters: Vec::new(),
            contexts: Vec::new(),
            current_context: String::new(),
            kind: KIND.to_string(),
            preferences: BTreeMap::new(),
            users: Vec::new(),
        }
    }
}

impl MergedConfig {
    pub fn cluster(&self, name: &str) -> Option<&NamedCluster> {
        find(&self.clusters, name)
    }

    pub fn context(&self, name: &str) -> Option<&NamedContext> {
        find(&self.contexts, name)
    }

    pub fn user(&self, name: &str) -> Option<&NamedUser> {
        find(&self.users, name)
    }

    pub fn to_yaml(&self) -> Result<String, serde_yaml::Error> {
        serde_yaml::to_string(self)
    }

    pub fn from_yaml(yaml: &str) -> Result<Self, serde_yaml::Error> {
        serde_yaml::from_str(yaml)
    }

    /// Checks that names are unique, that every context points at a known
    /// cluster and user, and that the current context exists.
    pub fn validate(&self) -> Result<(), String> {
        self.validate_references()?;
        if self.context(&self.current_context).is_none() {
            return Err(format!(
                "current context '{}' is not defined",
                self.current_context
            ));
        }
        Ok(())
    }

    /// Same as [`validate`](Self::validate) without the current context check.
    pub fn validate_references(&self) -> Result<(), String> {
        check_unique("cluster", &self.clusters)?;
        check_unique("context", &self.contexts)?;
        check_unique("user", &self.users)?;

        for ctx in &self.contexts {
            if self.cluster(&ctx.context.cluster).is_none() {
                return Err(format!(
                    "context '{}' references unknown cluster '{}'",
                    ctx.name, ctx.context.cluster
                ));
            }
            if self.user(&ctx.context.user).is_none() {
                return Err(format!(
                    "context '{}' references unknown user '{}'",
                    ctx.name, ctx.context.user
                ));
            }
        }
        Ok(())
    }
}

fn check_unique<T: Named>(section: &str, entries: &[T]) -> Result<(), String> {
    let mut seen = HashSet::new();
    for entry in entries {
        if entry.name().is_empty() {
            return Err(format!("{} with an empty name", section));
        }
        if !seen.insert(entry.name()) {
            return Err(format!("duplicate {} '{}'", section, entry.name()));
        }
    }
    Ok(())
}

/// Deterministic YAML rendering of a merged kubeconfig.
pub fn serialize(config: &MergedConfig) -> Result<Vec<u8>, serde_yaml::Error> {
    config.to_yaml().map(String::into_bytes)
}
