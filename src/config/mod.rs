mod types;

pub use types::{read_ca_certificate, BindingSpec, StepConfig, DEFAULT_ENV_VAR};
