//! Transient systemd scopes for already-running processes
//!
//! The supervisor (conmon) is started before its cgroup exists. To hand it
//! over to systemd we ask the service manager to wrap its PID in a transient
//! scope unit:
//!
//! ```text
//! StartTransientUnit("crio-conmon-<id>.scope", "replace", [
//!     PIDs=[pid], Delegate=true, DefaultDependencies=false,
//!     KillSignal=SIGPIPE, After=["crio.service"], Slice=<parent>,
//! ], [])
//!   → job path, completed by JobRemoved(id, job, unit, "done")
//! ```
//!
//! systemd removes the scope when its last process exits, so nobody else has
//! to clean up after it.

use std::sync::mpsc;
use std::thread;
use std::time::Duration;

use tracing::debug;
use zbus::blocking::{Connection, Proxy};
use zbus::zvariant::{OwnedObjectPath, Value};

use super::error::{CgroupError, Result};

const SYSTEMD_DESTINATION: &str = "org.freedesktop.systemd1";
const SYSTEMD_PATH: &str = "/org/freedesktop/systemd1";
const SYSTEMD_MANAGER_INTERFACE: &str = "org.freedesktop.systemd1.Manager";
const UNIT_MODE_REPLACE: &str = "replace";
const JOB_RESULT_DONE: &str = "done";

/// Default bound on a single scope launch, D-Bus round trip and job included
pub const DEFAULT_DBUS_TIMEOUT: Duration = Duration::from_secs(6 * 60);

/// Signal systemd sends the supervisor when the scope is stopped.
///
/// conmon ignores SIGPIPE, so on node shutdown it keeps waiting for its
/// container instead of forwarding SIGTERM.
pub const SUPERVISOR_KILL_SIGNAL: i32 = libc::SIGPIPE;

type Properties<'a> = Vec<(&'a str, Value<'a>)>;

/// Everything needed to start one transient scope
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ScopeUnit {
    /// Unit name, ending in `.scope`
    pub name: String,
    /// Process to move into the scope
    pub pid: u32,
    /// Parent slice; empty lets systemd pick its default
    pub slice: String,
    /// Value of the `KillSignal` property
    pub kill_signal: i32,
    /// Units this scope is ordered after
    pub after: Vec<String>,
}

impl ScopeUnit {
    fn properties(&self) -> Properties<'_> {
        let mut props: Properties<'_> = vec![
            ("PIDs", Value::from(vec![self.pid])),
            ("Delegate", Value::from(true)),
            ("DefaultDependencies", Value::from(false)),
            ("KillSignal", Value::from(self.kill_signal)),
            ("After", Value::from(self.after.clone())),
        ];
        if !self.slice.is_empty() {
            props.push(("Slice", Value::from(self.slice.as_str())));
        }
        props
    }
}

/// Creates transient scopes in the service manager
pub trait ScopeLauncher: Send + Sync {
    /// Start `unit` and wait until systemd reports the job finished.
    /// Errors are returned as a human readable reason.
    fn start(&self, unit: &ScopeUnit) -> std::result::Result<(), String>;
}

/// [`ScopeLauncher`] talking to systemd on the system bus
#[derive(Debug, Clone)]
pub struct DbusScopeLauncher {
    timeout: Duration,
}

impl DbusScopeLauncher {
    pub fn new(timeout: Duration) -> Self {
        Self { timeout }
    }

    pub fn timeout(&self) -> Duration {
        self.timeout
    }
}

impl Default for DbusScopeLauncher {
    fn default() -> Self {
        Self::new(DEFAULT_DBUS_TIMEOUT)
    }
}

impl ScopeLauncher for DbusScopeLauncher {
    fn start(&self, unit: &ScopeUnit) -> std::result::Result<(), String> {
        run_bounded(self.timeout, unit, |unit| start_transient_unit(&unit))
    }
}

/// Run `work` for `unit` on a worker thread and wait at most `timeout`.
///
/// The bus call has no deadline of its own; a wedged worker ends when the
/// bus does.
fn run_bounded<F>(timeout: Duration, unit: &ScopeUnit, work: F) -> std::result::Result<(), String>
where
    F: FnOnce(ScopeUnit) -> std::result::Result<(), String> + Send + 'static,
{
    let (tx, rx) = mpsc::channel();
    let owned = unit.clone();

    thread::Builder::new()
        .name(format!("scope-{}", unit.pid))
        .spawn(move || {
            let _ = tx.send(work(owned));
        })
        .map_err(|e| format!("spawning D-Bus worker: {}", e))?;

    match rx.recv_timeout(timeout) {
        Ok(result) => result,
        Err(mpsc::RecvTimeoutError::Timeout) => Err(format!(
            "timed out after {:?} moving pid {} to systemd unit {}",
            timeout, unit.pid, unit.name
        )),
        Err(mpsc::RecvTimeoutError::Disconnected) => {
            Err(format!("D-Bus worker for unit {} exited without a result", unit.name))
        }
    }
}

fn start_transient_unit(unit: &ScopeUnit) -> std::result::Result<(), String> {
    let conn = Connection::system().map_err(|e| format!("connecting to system bus: {}", e))?;
    let manager = Proxy::new(
        &conn,
        SYSTEMD_DESTINATION,
        SYSTEMD_PATH,
        SYSTEMD_MANAGER_INTERFACE,
    )
    .map_err(|e| format!("creating systemd manager proxy: {}", e))?;

    // Subscribe before starting the job so JobRemoved cannot be missed
    let jobs_removed = manager
        .receive_signal("JobRemoved")
        .map_err(|e| format!("listening for JobRemoved: {}", e))?;
    manager
        .call::<_, _, ()>("Subscribe", &())
        .map_err(|e| format!("subscribing to systemd signals: {}", e))?;

    let aux: Vec<(&str, Properties<'_>)> = Vec::new();
    let job: OwnedObjectPath = manager
        .call(
            "StartTransientUnit",
            &(unit.name.as_str(), UNIT_MODE_REPLACE, unit.properties(), aux),
        )
        .map_err(|e| format!("starting transient unit {}: {}", unit.name, e))?;
    debug!(unit = %unit.name, job = %job.as_str(), "transient unit job queued");

    for msg in jobs_removed {
        let (_id, path, _unit, result): (u32, OwnedObjectPath, String, String) = match msg
            .body()
            .deserialize()
        {
            Ok(body) => body,
            Err(_) => continue,
        };
        if path != job {
            continue;
        }
        return if result == JOB_RESULT_DONE {
            Ok(())
        } else {
            Err(format!(
                "error moving pid {} to systemd unit {}: got {}",
                unit.pid, unit.name, result
            ))
        };
    }

    Err(format!("signal stream closed before job for {} finished", unit.name))
}

/// Run `unit` through `launcher`, wrapping failures for `entity`
pub fn launch(launcher: &dyn ScopeLauncher, entity: &str, unit: &ScopeUnit) -> Result<()> {
    debug!(slice = %unit.slice, unit = %unit.name, pid = unit.pid, "running conmon under slice");
    launcher.start(unit).map_err(|reason| CgroupError::Relocation {
        entity: entity.to_string(),
        reason: format!("failed to add conmon to systemd sandbox cgroup: {}", reason),
    })
}

#[cfg(test)]
mod tests {
    use super::*;

    fn unit(slice: &str) -> ScopeUnit {
        ScopeUnit {
            name: "crio-conmon-abc.scope".to_string(),
            pid: 4242,
            slice: slice.to_string(),
            kill_signal: SUPERVISOR_KILL_SIGNAL,
            after: vec!["crio.service".to_string()],
        }
    }

    fn names<'a>(props: &Properties<'a>) -> Vec<&'a str> {
        props.iter().map(|(name, _)| *name).collect::<Vec<_>>()
    }

    #[test]
    fn test_properties_include_slice_when_set() {
        let u = unit("pod.slice");
        let props = u.properties();
        assert_eq!(
            names(&props),
            vec!["PIDs", "Delegate", "DefaultDependencies", "KillSignal", "After", "Slice"]
        );
        assert_eq!(props[3].1, Value::from(libc::SIGPIPE));
    }

    #[test]
    fn test_properties_omit_empty_slice() {
        let u = unit("");
        assert!(!names(&u.properties()).contains(&"Slice"));
    }

    struct Failing;

    impl ScopeLauncher for Failing {
        fn start(&self, _unit: &ScopeUnit) -> std::result::Result<(), String> {
            Err("connection refused".to_string())
        }
    }

    #[test]
    fn test_launch_wraps_failure() {
        let err = launch(&Failing, "abc", &unit("pod.slice")).unwrap_err();
        match err {
            CgroupError::Relocation { entity, reason } => {
                assert_eq!(entity, "abc");
                assert!(reason.contains("connection refused"));
            }
            other => panic!("unexpected error: {other}"),
        }
    }

    #[test]
    fn test_run_bounded_returns_work_result() {
        let timeout = Duration::from_secs(5);
        assert!(run_bounded(timeout, &unit("pod.slice"), |_| Ok(())).is_ok());
        assert_eq!(
            run_bounded(timeout, &unit("pod.slice"), |u| Err(format!("job for {} failed", u.name))),
            Err("job for crio-conmon-abc.scope failed".to_string())
        );
    }

    #[test]
    fn test_run_bounded_times_out() {
        let reason = run_bounded(Duration::from_millis(50), &unit("pod.slice"), |_| {
            thread::sleep(Duration::from_secs(2));
            Ok(())
        })
        .unwrap_err();
        assert!(reason.starts_with("timed out after"), "{}", reason);
        assert!(reason.contains("crio-conmon-abc.scope"));
    }

    /// Launcher whose bus never answers within its timeout
    struct WedgedBus {
        timeout: Duration,
    }

    impl ScopeLauncher for WedgedBus {
        fn start(&self, unit: &ScopeUnit) -> std::result::Result<(), String> {
            run_bounded(self.timeout, unit, |_| {
                thread::sleep(Duration::from_secs(2));
                Ok(())
            })
        }
    }

    #[test]
    fn test_launch_timeout_is_relocation_error() {
        let bus = WedgedBus {
            timeout: Duration::from_millis(50),
        };
        match launch(&bus, "abc", &unit("pod.slice")).unwrap_err() {
            CgroupError::Relocation { entity, reason } => {
                assert_eq!(entity, "abc");
                assert!(reason.contains("timed out"));
            }
            other => panic!("unexpected error: {other}"),
        }
    }

    #[test]
    fn test_default_timeout() {
        assert_eq!(DbusScopeLauncher::default().timeout(), Duration::from_secs(360));
    }
}
