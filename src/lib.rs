//! Credential health probe for Azure Managed Service Identity.
//!
//! Repeatedly acquires tokens for the system-assigned and a user-assigned
//! identity through the instance metadata endpoint, lists virtual machines
//! through Azure Resource Manager with an environment credential, and logs
//! whether everything still works.

pub mod arm;
pub mod config;
pub mod error;
pub mod identity;
pub mod logging;
pub mod probe;
pub mod token;

pub use config::{Args, PodIdentity, ProbeConfig};
pub use error::ProbeError;
pub use probe::{IterationReport, ProbeLoop, Transition};
