//! Azure Monitor metrics connector
//!
//! Invoked periodically by a host scheduler: resolves an input's service
//! principal, walks the subscription's resource groups and forwards the
//! metrics of every resource for the current time window.

pub mod azure;
pub mod checkpoint;
pub mod collector;
pub mod config;
pub mod credentials;
pub mod fanout;
pub mod sink;

/// Version injected at compile time via AZMON_VERSION env var (set by CI/CD),
/// or "dev" for local builds.
pub const VERSION: &str = match option_env!("AZMON_VERSION") {
    Some(v) => v,
    None => "dev",
};
