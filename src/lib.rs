//! Zookeeper operator - converges Zookeeper ensembles from a custom resource
//!
//! A `Zookeeper` object lists the members of an ensemble. For every member
//! the operator keeps one Deployment and one Service in the object's
//! namespace, updates them when fields it owns drift, and deletes them when
//! the member is removed from the list.
//!
//! # Modules
//!
//! - [`crd`] - Custom Resource Definition (Zookeeper)
//! - [`ensemble`] - Validation and default filling for Zookeeper specs
//! - [`workload`] - Deployment and Service builders for ensemble nodes
//! - [`controller`] - Kubernetes controller reconciliation logic
//! - [`error`] - Error types for the operator

#![deny(missing_docs)]

pub mod controller;
pub mod crd;
pub mod ensemble;
pub mod error;
pub mod workload;

pub use error::Error;

/// Result type alias using our custom Error type
pub type Result<T> = std::result::Result<T, Error>;
