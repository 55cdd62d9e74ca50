//! cgmgr - cgroup placement for a container runtime
//!
//! This library decides where sandboxes, containers and their conmon
//! supervisors live in the cgroup tree, using either systemd or the cgroup
//! filesystem directly.
//!
//! # Modules
//!
//! - `cgroups` - manager capability, both backends, slice expansion, memory admission
//! - `config` - manager configuration
//! - `metrics` - Prometheus counters for OOM kills
//! - `tracing` - logging setup for binaries
//!
//! # Quick Start
//!
//! ```ignore
//! use cgmgr::{new_manager, CgroupConfig};
//!
//! let manager = new_manager(&CgroupConfig::default())?;
//! let path = manager.container_cgroup_path("machine.slice", "abc123");
//! assert_eq!(path, "machine.slice:crio:abc123");
//! ```

pub mod cgroups;
pub mod config;
pub mod metrics;
pub mod tracing;

// Re-export commonly used types at crate root for convenience
pub use cgroups::{new_manager, CgroupError, CgroupManager};
pub use config::CgroupConfig;
