//! Memory admission check for parent cgroups
//!
//! Before a sandbox is placed under a parent, the parent's memory ceiling is
//! read from the cgroup filesystem. A parent that cannot hold even the
//! minimum footprint would get its first workload OOM-killed right away, so
//! it is rejected up front.

use std::fs;
use std::io;
use std::path::PathBuf;

use tracing::debug;

use super::error::{CgroupError, Result};
use super::hierarchy::under;

/// Smallest memory ceiling a parent may have: 12 MiB
pub const MIN_MEMORY_LIMIT: u64 = 12 * 1024 * 1024;

/// Memory ceiling of a cgroup
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum MemoryCeiling {
    /// No ceiling configured (file absent, empty or `max`)
    Unlimited,
    /// Ceiling in bytes; zero is a real value, not "unset"
    Bytes(u64),
}

/// Reads memory ceilings below a fixed memory root
#[derive(Debug, Clone)]
pub struct MemoryVerifier {
    memory_path: PathBuf,
    memory_max_file: String,
}

impl MemoryVerifier {
    pub fn new(memory_path: impl Into<PathBuf>, memory_max_file: impl Into<String>) -> Self {
        Self {
            memory_path: memory_path.into(),
            memory_max_file: memory_max_file.into(),
        }
    }

    fn ceiling_file(&self, cgroup_path: &str) -> PathBuf {
        under(&self.memory_path, cgroup_path).join(&self.memory_max_file)
    }

    /// Read the memory ceiling of an expanded cgroup path
    pub fn ceiling(&self, cgroup_path: &str) -> Result<MemoryCeiling> {
        let file = self.ceiling_file(cgroup_path);
        let content = match fs::read_to_string(&file) {
            Ok(content) => content,
            Err(e) if e.kind() == io::ErrorKind::NotFound => {
                debug!(path = %file.display(), "no memory ceiling file, treating as unlimited");
                return Ok(MemoryCeiling::Unlimited);
            }
            Err(e) => return Err(CgroupError::io(file, e)),
        };

        let value = content.trim();
        if value.is_empty() || value == "max" {
            return Ok(MemoryCeiling::Unlimited);
        }
        value
            .parse::<u64>()
            .map(MemoryCeiling::Bytes)
            .map_err(|_| CgroupError::InvalidCeiling {
                path: file,
                value: value.to_string(),
            })
    }

    /// Fail if the cgroup's ceiling is set and below [`MIN_MEMORY_LIMIT`]
    pub fn verify(&self, cgroup_path: &str) -> Result<()> {
        match self.ceiling(cgroup_path)? {
            MemoryCeiling::Unlimited => Ok(()),
            MemoryCeiling::Bytes(ceiling) if ceiling < MIN_MEMORY_LIMIT => {
                Err(CgroupError::InsufficientMemory {
                    path: self.ceiling_file(cgroup_path),
                    ceiling,
                    minimum: MIN_MEMORY_LIMIT,
                })
            }
            MemoryCeiling::Bytes(_) => Ok(()),
        }
    }
}
