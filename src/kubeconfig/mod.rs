// src/kubeconfig/mod.rs
mod merge;
pub mod types;

pub use merge::{merge, merge_with, CollisionPolicy, KubeconfigMerger, MergeOptions};
pub use types::{serialize, Context, MergedConfig, NamedCluster, NamedContext, NamedUser, Stanza};
