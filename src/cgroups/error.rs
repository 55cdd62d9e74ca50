//! Error types for cgroup placement
//!
//! Every failure carries the parent, entity ID or path it was raised for,
//! so callers can log it without re-deriving state.

use std::fmt;
use std::io;
use std::path::PathBuf;

/// Convenience alias used throughout the cgroups module
pub type Result<T> = std::result::Result<T, CgroupError>;

/// Failure to expand a systemd slice name into its cgroup path
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum ExpandError {
    /// Name does not end in `.slice`
    MissingSuffix(String),
    /// Name contains a `/` separator
    ContainsSeparator(String),
    /// A dash-separated component is empty (e.g. `a--b.slice`)
    EmptyComponent(String),
}

impl fmt::Display for ExpandError {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            ExpandError::MissingSuffix(s) => write!(f, "invalid slice name {:?}: missing .slice suffix", s),
            ExpandError::ContainsSeparator(s) => write!(f, "invalid slice name {:?}: contains '/'", s),
            ExpandError::EmptyComponent(s) => write!(f, "invalid slice name {:?}: empty component", s),
        }
    }
}

impl std::error::Error for ExpandError {}

/// Errors returned by [`CgroupManager`](super::CgroupManager) operations
#[derive(Debug)]
pub enum CgroupError {
    /// Parent does not follow the naming convention of the active manager.
    /// Caller or configuration error; retrying will not help.
    InvalidParent {
        manager: &'static str,
        parent: String,
        reason: &'static str,
    },

    /// Slice name could not be expanded into a cgroup path
    Expansion {
        context: String,
        source: ExpandError,
    },

    /// Parent cgroup memory ceiling is below the admission floor
    InsufficientMemory {
        path: PathBuf,
        ceiling: u64,
        minimum: u64,
    },

    /// Memory ceiling file exists but holds something other than a number or `max`
    InvalidCeiling { path: PathBuf, value: String },

    /// Moving the supervisor into its cgroup failed (D-Bus or cgroupfs write)
    Relocation { entity: String, reason: String },

    /// Supervisor cgroup hint that the cgroupfs manager cannot honour
    InvalidSupervisorCgroup { entity: String, hint: String },

    /// Manager name in configuration is neither `systemd` nor `cgroupfs`
    UnknownManager(String),

    /// Filesystem access under the cgroup mount failed
    Io { path: PathBuf, source: io::Error },
}

impl CgroupError {
    pub(crate) fn io(path: impl Into<PathBuf>, source: io::Error) -> Self {
        CgroupError::Io {
            path: path.into(),
            source,
        }
    }

    /// Whether retrying the same call could succeed without operator action
    pub fn is_retryable(&self) -> bool {
        matches!(self, CgroupError::Expansion { .. } | CgroupError::Io { .. })
    }
}

impl fmt::Display for CgroupError {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            CgroupError::InvalidParent {
                manager,
                parent,
                reason,
            } => write!(
                f,
                "configured with {} cgroup manager, but {}: {}",
                manager, reason, parent
            ),
            CgroupError::Expansion { context, source } => write!(f, "{}: {}", context, source),
            CgroupError::InsufficientMemory {
                path,
                ceiling,
                minimum,
            } => write!(
                f,
                "cgroup {} memory limit ({}) needs to be at least {}",
                path.display(),
                ceiling,
                minimum
            ),
            CgroupError::InvalidCeiling { path, value } => {
                write!(f, "invalid memory limit {:?} in {}", value, path.display())
            }
            CgroupError::Relocation { entity, reason } => {
                write!(f, "failed to move conmon of {} to its cgroup: {}", entity, reason)
            }
            CgroupError::InvalidSupervisorCgroup { entity, hint } => write!(
                f,
                "conmon cgroup {:?} for {} is invalid with the cgroupfs manager",
                hint, entity
            ),
            CgroupError::UnknownManager(name) => write!(f, "invalid cgroup manager: {}", name),
            CgroupError::Io { path, source } => write!(f, "{}: {}", path.display(), source),
        }
    }
}

impl std::error::Error for CgroupError {
    fn source(&self) -> Option<&(dyn std::error::Error + 'static)> {
        match self {
            CgroupError::Expansion { source, .. } => Some(source),
            CgroupError::Io { source, .. } => Some(source),
            _ => None,
        }
    }
}
