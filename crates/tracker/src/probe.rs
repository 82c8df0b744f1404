//! Raw probes for each [`crate::entity::Source`] kind, returning a plain
//! bool (true = condition is healthy/up) for `TrackedEntity::record_raw`.

use std::path::Path;
use std::time::Duration;

use tokio::process::Command;
use tokio::time::timeout;
use tracing::{debug, warn};

/// An interface is up per the strict interpretation: `IFF_UP &&
/// IFF_RUNNING`. The caller tracks link state from netlink events and
/// passes the current flag snapshot in; this probe has no I/O of its own.
pub fn interface_probe(up_and_running: bool) -> bool {
    up_and_running
}

/// Fork the configured command and wait up to `timeout` for an exit
/// status. Timeout or signal-kill both count as failure, matching a
/// non-zero exit.
pub async fn script_probe(command: &str, args: &[String], budget: Duration) -> bool {
    let mut cmd = Command::new(command);
    cmd.args(args);
    cmd.kill_on_drop(true);

    match timeout(budget, cmd.status()).await {
        Ok(Ok(status)) => status.success(),
        Ok(Err(e)) => {
            warn!(command, error = %e, "failed to spawn tracked script");
            false
        }
        Err(_) => {
            warn!(command, "tracked script timed out");
            false
        }
    }
}

/// Read a signed integer out of `path`, trimmed of whitespace. A missing
/// file is treated as "delta 0" (i.e. satisfied, contributes nothing)
/// rather than a failure, per the data model.
pub fn file_probe(path: &Path) -> Option<i64> {
    match std::fs::read_to_string(path) {
        Ok(contents) => match contents.trim().parse::<i64>() {
            Ok(v) => Some(v),
            Err(_) => {
                warn!(?path, "tracked file does not contain an integer");
                None
            }
        },
        Err(e) if e.kind() == std::io::ErrorKind::NotFound => {
            debug!(?path, "tracked file absent, treating as no delta");
            None
        }
        Err(e) => {
            warn!(?path, error = %e, "failed to read tracked file");
            None
        }
    }
}

/// Scan `/proc/*/comm` for a process name matching `pattern`.
pub fn process_probe(pattern: &str) -> bool {
    let Ok(entries) = std::fs::read_dir("/proc") else {
        return false;
    };
    for entry in entries.flatten() {
        let Ok(pid) = entry.file_name().to_string_lossy().parse::<u32>() else {
            continue;
        };
        let comm_path = format!("/proc/{pid}/comm");
        if let Ok(comm) = std::fs::read_to_string(&comm_path) {
            if comm.trim() == pattern {
                return true;
            }
        }
    }
    false
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::io::Write;

    #[test]
    fn missing_file_returns_none() {
        assert_eq!(file_probe(Path::new("/nonexistent/tracked-file")), None);
    }

    #[test]
    fn file_with_integer_parses() {
        let mut tmp = tempfile_for_test();
        writeln!(tmp.1, "-5").unwrap();
        assert_eq!(file_probe(&tmp.0), Some(-5));
    }

    fn tempfile_for_test() -> (std::path::PathBuf, std::fs::File) {
        let path = std::env::temp_dir().join(format!("tracker-test-{}", std::process::id()));
        let file = std::fs::File::create(&path).unwrap();
        (path, file)
    }

    #[tokio::test]
    async fn script_probe_reports_success_exit_code() {
        assert!(script_probe("true", &[], Duration::from_secs(1)).await);
        assert!(!script_probe("false", &[], Duration::from_secs(1)).await);
    }
}
