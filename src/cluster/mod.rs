//! Cluster-topology generation: deterministic addressing, script
//! rendering, and the builder that turns a [`crate::config::ClusterDescriptor`]
//! into one master and N agent node specs.

pub mod address;
pub mod template;
pub mod topology;
