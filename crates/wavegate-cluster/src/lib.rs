//! Wavegate Cluster - Cluster contexts and collaborator ports
//!
//! This crate owns everything that talks to a target cluster:
//!
//! - [`ClusterApi`] and [`Reconciler`]: the ports the orchestrator drives
//! - [`CredentialProvider`]: short-lived credentials per cluster
//! - [`ClusterContextManager`]: verifies and caches execution contexts before
//!   a wave starts
//! - [`KubectlClient`]: `kubectl`-backed adapter for both ports
//! - [`InMemoryCluster`]: scripted in-process cluster for tests
//!
//! ## Architectural Boundaries
//!
//! - **wavegate-cluster** owns: reaching clusters and classifying their errors
//! - **wavegate-health** owns: deciding when a unit is healthy and when to retry
//! - **wavegate-deployment** owns: the order in which any of this happens

#![deny(unsafe_code)]
#![cfg_attr(feature = "strict-docs", warn(missing_docs))]
#![cfg_attr(not(feature = "strict-docs"), allow(missing_docs))]

pub mod api;
pub mod context;
pub mod credentials;
pub mod error;
pub mod kubectl;
pub mod memory;

pub use api::{ApplyOutcome, ClusterApi, Reconciler};
pub use context::{ClusterContextManager, ClusterSpec, ResolvedContext};
pub use credentials::{
    ClusterCredentialProvider, CredentialProvider, CredentialSource, Credentials, VaultConfig,
};
pub use error::{ClusterError, Result};
pub use kubectl::KubectlClient;
pub use memory::{ClusterCall, InMemoryCluster};
