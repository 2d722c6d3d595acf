//! Materializes a kubeconfig from credential records for the duration of a
//! build step.
//!
//! Credentials are merged into a single kubeconfig ([`kubeconfig::merge`]),
//! written to an owner-only temp file, exposed to a child command through an
//! environment variable and removed when the step ends.

pub mod config;
pub mod credentials;
pub mod error;
pub mod kubeconfig;
pub mod step;
pub mod utils;

pub use config::{BindingSpec, StepConfig};
pub use credentials::{CredentialBinding, CredentialSecret, CredentialStore, FileCredentialStore};
pub use error::{MergeError, MergeErrorKind, StepError};
pub use kubeconfig::{merge, merge_with, serialize, MergeOptions, MergedConfig};
pub use step::{CancelToken, KubeconfigFile, StepRunner};
