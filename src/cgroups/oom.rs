//! OOM kill accounting from `memory.events`
//!
//! The kernel keeps a running `oom_kill` count per cgroup. The tracker
//! remembers the last count it saw for each entity and reports only the
//! difference, so polling the same cgroup twice never double counts.

use std::collections::HashMap;
use std::fs;
use std::io;
use std::path::Path;
use std::sync::{Arc, Mutex};

use tracing::info;

use super::error::{CgroupError, Result};
use crate::metrics::MetricsSink;

const MEMORY_EVENTS_FILE: &str = "memory.events";
const OOM_KILL_KEY: &str = "oom_kill";

/// Read the `oom_kill` counter of the cgroup directory `dir`.
/// A missing file or key counts as zero.
pub fn read_oom_kills(dir: &Path) -> Result<u64> {
    let file = dir.join(MEMORY_EVENTS_FILE);
    let content = match fs::read_to_string(&file) {
        Ok(content) => content,
        Err(e) if e.kind() == io::ErrorKind::NotFound => return Ok(0),
        Err(e) => return Err(CgroupError::io(file, e)),
    };

    for line in content.lines() {
        let mut parts = line.split_whitespace();
        if parts.next() == Some(OOM_KILL_KEY) {
            return Ok(parts.next().and_then(|v| v.parse().ok()).unwrap_or(0));
        }
    }
    Ok(0)
}

/// Turns `oom_kill` counters into sink increments
pub struct OomTracker {
    sink: Arc<dyn MetricsSink>,
    seen: Mutex<HashMap<String, u64>>,
}

impl OomTracker {
    pub fn new(sink: Arc<dyn MetricsSink>) -> Self {
        Self {
            sink,
            seen: Mutex::new(HashMap::new()),
        }
    }

    /// Poll the cgroup directory of `name` and report new OOM kills.
    /// Returns how many new kills were reported.
    pub fn observe(&self, name: &str, dir: &Path) -> Result<u64> {
        let count = read_oom_kills(dir)?;

        let new = {
            let mut seen = self.seen.lock().unwrap_or_else(|e| e.into_inner());
            let last = seen.entry(name.to_string()).or_insert(0);
            // a lower count means the cgroup was recreated under the same name
            let new = if count >= *last { count - *last } else { count };
            *last = count;
            new
        };

        if new > 0 {
            info!(name, kills = new, "container ran out of memory");
            for _ in 0..new {
                self.sink.container_oom(name);
            }
        }
        Ok(new)
    }

    /// Drop the state of a removed entity
    pub fn forget(&self, name: &str) {
        self.seen
            .lock()
            .unwrap_or_else(|e| e.into_inner())
            .remove(name);
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::sync::atomic::{AtomicU64, Ordering};

    #[derive(Default)]
    struct CountingSink(AtomicU64);

    impl MetricsSink for CountingSink {
        fn container_oom(&self, _name: &str) {
            self.0.fetch_add(1, Ordering::SeqCst);
        }
    }

    fn write_events(dir: &Path, kills: u64) {
        fs::write(
            dir.join(MEMORY_EVENTS_FILE),
            format!("low 0\nhigh 0\nmax 3\noom 2\noom_kill {}\n", kills),
        )
        .unwrap();
    }

    #[test]
    fn test_missing_events_file_is_zero() {
        let tmp = tempfile::tempdir().unwrap();
        assert_eq!(read_oom_kills(tmp.path()).unwrap(), 0);
    }

    #[test]
    fn test_reports_only_new_kills() {
        let tmp = tempfile::tempdir().unwrap();
        let sink = Arc::new(CountingSink::default());
        let tracker = OomTracker::new(sink.clone());

        write_events(tmp.path(), 2);
        assert_eq!(tracker.observe("web", tmp.path()).unwrap(), 2);
        assert_eq!(tracker.observe("web", tmp.path()).unwrap(), 0);

        write_events(tmp.path(), 3);
        assert_eq!(tracker.observe("web", tmp.path()).unwrap(), 1);
        assert_eq!(sink.0.load(Ordering::SeqCst), 3);
    }

    #[test]
    fn test_recreated_cgroup_reports_from_zero() {
        let tmp = tempfile::tempdir().unwrap();
        let sink = Arc::new(CountingSink::default());
        let tracker = OomTracker::new(sink.clone());

        write_events(tmp.path(), 5);
        assert_eq!(tracker.observe("web", tmp.path()).unwrap(), 5);

        // same name, fresh cgroup, counter restarted
        write_events(tmp.path(), 1);
        assert_eq!(tracker.observe("web", tmp.path()).unwrap(), 1);
        write_events(tmp.path(), 2);
        assert_eq!(tracker.observe("web", tmp.path()).unwrap(), 1);
        assert_eq!(sink.0.load(Ordering::SeqCst), 7);
    }

    #[test]
    fn test_forget_resets_state() {
        let tmp = tempfile::tempdir().unwrap();
        let sink = Arc::new(CountingSink::default());
        let tracker = OomTracker::new(sink.clone());

        write_events(tmp.path(), 1);
        tracker.observe("db", tmp.path()).unwrap();
        tracker.forget("db");
        assert_eq!(tracker.observe("db", tmp.path()).unwrap(), 1);
    }
}
