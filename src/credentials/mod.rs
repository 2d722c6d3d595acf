pub mod store;
mod types;

pub use store::{resolve_credentials, CredentialStore, FileCredentialStore, StoredCredential};
pub use types::{CredentialBinding, CredentialSecret};
