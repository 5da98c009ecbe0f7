//! Single-slot process supervisor.
//!
//! Each named slot holds at most one live application process. The process is
//! started in its own session (`setsid`) so it outlives the run that launched
//! it, and its identity is persisted as `<state_dir>/<name>.json` so a later
//! run can find and stop it. Output goes to `<state_dir>/<name>.log`.
//!
//! An instance is its whole process group: the slot stays live while any
//! member survives, even after the launching shell has exited. Records carry
//! the boot id and process start time, so a pid recycled after a reboot or
//! wraparound is never signalled.
//!
//! `start` never replaces a live instance; callers stop first.

use serde::{Deserialize, Serialize};
use std::collections::HashMap;
use std::fs::OpenOptions;
use std::os::unix::process::CommandExt;
use std::path::{Path, PathBuf};
use std::process::{Child, Command, Stdio};
use std::time::{Duration, Instant};

use crate::error::{Error, Result};
use crate::paths;
use crate::utils::io;

const POLL_INTERVAL: Duration = Duration::from_millis(50);
const KILL_WAIT: Duration = Duration::from_secs(2);

/// How to start the application. Supplied fresh for every deployment.
#[derive(Debug, Clone, Serialize)]
pub struct LaunchSpec {
    pub command: String,
    pub working_dir: PathBuf,
}

/// Persisted identity of the process occupying a slot.
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
pub struct InstanceRecord {
    pub name: String,
    pub pid: u32,
    pub command: String,
    pub working_dir: String,
    pub log_path: String,
    pub started_at: String,
    /// Kernel boot the process was started in.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub boot_id: Option<String>,
    /// Start time in clock ticks since boot (`/proc/<pid>/stat` field 22).
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub start_ticks: Option<u64>,
}

#[derive(Debug, Clone, PartialEq, Serialize)]
#[serde(rename_all = "snake_case", tag = "status")]
pub enum StopOutcome {
    /// Nothing was registered under the name.
    NotRunning,
    /// A record existed but its process had already exited.
    Exited { pid: u32 },
    /// A live process was terminated; `forced` when SIGKILL was needed.
    Stopped { pid: u32, forced: bool },
}

#[derive(Debug, Clone, Serialize)]
pub struct InstanceStatus {
    pub name: String,
    pub running: bool,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub record: Option<InstanceRecord>,
}

/// Lifecycle of one named application slot.
pub trait Supervisor {
    /// Terminate and deregister whatever runs under `name`. No-op when empty.
    fn stop(&mut self, name: &str) -> Result<StopOutcome>;

    /// Launch detached and register under `name`. Fails if the slot is live.
    fn start(&mut self, name: &str, spec: &LaunchSpec) -> Result<InstanceRecord>;

    /// Whether a process is registered under `name` and still alive.
    fn is_running(&mut self, name: &str) -> Result<bool>;
}

/// Supervisor backed by OS processes and record files.
pub struct ProcessSupervisor {
    state_dir: PathBuf,
    stop_timeout: Duration,
    // Children launched by this supervisor, kept so exits can be reaped.
    children: HashMap<String, Child>,
}

impl ProcessSupervisor {
    pub fn new(state_dir: impl Into<PathBuf>, stop_timeout: Duration) -> Self {
        Self {
            state_dir: state_dir.into(),
            stop_timeout,
            children: HashMap::new(),
        }
    }

    /// Read the registered record for a slot, if any.
    pub fn record(&self, name: &str) -> Result<Option<InstanceRecord>> {
        validate_name(name)?;
        let path = paths::instance_record(&self.state_dir, name);
        if !path.exists() {
            return Ok(None);
        }

        let content = io::read_file(&path, &format!("read {}", path.display()))?;
        let record = serde_json::from_str(&content).map_err(|e| {
            Error::internal_json(e.to_string(), Some(format!("parse {}", path.display())))
        })?;
        Ok(Some(record))
    }

    pub fn status(&mut self, name: &str) -> Result<InstanceStatus> {
        let record = self.record(name)?;
        let running = match record {
            Some(ref r) => self.alive(name, r),
            None => false,
        };
        Ok(InstanceStatus {
            name: name.to_string(),
            running,
            record,
        })
    }

    fn write_record(&self, record: &InstanceRecord) -> Result<()> {
        let path = paths::instance_record(&self.state_dir, &record.name);
        let content = serde_json::to_string_pretty(record).map_err(|e| {
            Error::internal_json(e.to_string(), Some("serialize instance record".to_string()))
        })?;
        io::write_file_atomic(&path, &content, &format!("write {}", path.display()))
    }

    fn remove_record(&self, name: &str) -> Result<()> {
        let path = paths::instance_record(&self.state_dir, name);
        io::remove_file_if_exists(&path, &format!("remove {}", path.display()))?;
        Ok(())
    }

    fn alive(&mut self, name: &str, record: &InstanceRecord) -> bool {
        if !owns(record) {
            return false;
        }
        if let Some(child) = self.children.get_mut(name) {
            if child.id() == record.pid {
                if let Ok(None) = child.try_wait() {
                    return true;
                }
                self.children.remove(name);
                return group_alive(record.pid);
            }
        }
        pid_alive(record.pid) || group_alive(record.pid)
    }

    fn wait_for_exit(&mut self, record: &InstanceRecord, timeout: Duration) -> bool {
        let deadline = Instant::now() + timeout;
        loop {
            if !self.alive(&record.name, record) {
                return true;
            }
            if Instant::now() >= deadline {
                return false;
            }
            std::thread::sleep(POLL_INTERVAL);
        }
    }

    fn terminate(&mut self, record: &InstanceRecord) -> Result<bool> {
        let (name, pid) = (record.name.as_str(), record.pid);
        log_status!("supervisor", "Stopping '{}' (pid {})", name, pid);
        signal_group(pid, libc::SIGTERM).map_err(|e| signal_error(name, pid, e))?;
        if self.wait_for_exit(record, self.stop_timeout) {
            return Ok(false);
        }

        log_status!(
            "supervisor",
            "'{}' ignored SIGTERM for {}s, sending SIGKILL",
            name,
            self.stop_timeout.as_secs()
        );
        signal_group(pid, libc::SIGKILL).map_err(|e| signal_error(name, pid, e))?;
        if self.wait_for_exit(record, KILL_WAIT) {
            return Ok(true);
        }

        Err(Error::internal_unexpected(format!(
            "Instance '{}' (pid {}) survived SIGKILL",
            name, pid
        )))
    }

    fn spawn(&self, name: &str, spec: &LaunchSpec, log_path: &Path) -> Result<Child> {
        let launch_err = |e: std::io::Error| Error::launch_failed(name, &spec.command, e.to_string());

        let stdout = OpenOptions::new()
            .create(true)
            .append(true)
            .open(log_path)
            .map_err(launch_err)?;
        let stderr = stdout.try_clone().map_err(launch_err)?;

        let mut cmd = Command::new("sh");
        cmd.arg("-c")
            .arg(&spec.command)
            .current_dir(&spec.working_dir)
            .stdin(Stdio::null())
            .stdout(Stdio::from(stdout))
            .stderr(Stdio::from(stderr));

        // SAFETY: setsid is async-signal-safe and only affects the child.
        unsafe {
            cmd.pre_exec(|| {
                if libc::setsid() == -1 {
                    return Err(std::io::Error::last_os_error());
                }
                Ok(())
            });
        }

        cmd.spawn().map_err(launch_err)
    }
}

impl Supervisor for ProcessSupervisor {
    fn stop(&mut self, name: &str) -> Result<StopOutcome> {
        let Some(record) = self.record(name)? else {
            self.children.remove(name);
            return Ok(StopOutcome::NotRunning);
        };

        let outcome = if !owns(&record) {
            log_status!(
                "supervisor",
                "Record for '{}' (pid {}) is from an earlier boot or the pid was reused, not signalling",
                name,
                record.pid
            );
            StopOutcome::Exited { pid: record.pid }
        } else if self.alive(name, &record) {
            let forced = self.terminate(&record)?;
            StopOutcome::Stopped {
                pid: record.pid,
                forced,
            }
        } else {
            log_status!(
                "supervisor",
                "'{}' (pid {}) had already exited",
                name,
                record.pid
            );
            StopOutcome::Exited { pid: record.pid }
        };

        self.children.remove(name);
        self.remove_record(name)?;
        Ok(outcome)
    }

    fn start(&mut self, name: &str, spec: &LaunchSpec) -> Result<InstanceRecord> {
        if let Some(existing) = self.record(name)? {
            if self.alive(name, &existing) {
                return Err(Error::already_running(name, existing.pid));
            }
            log_status!(
                "supervisor",
                "Clearing stale record for '{}' (pid {} exited)",
                name,
                existing.pid
            );
            self.remove_record(name)?;
        }

        io::ensure_dir(
            &self.state_dir,
            &format!("create {}", self.state_dir.display()),
        )?;
        let log_path = paths::instance_log(&self.state_dir, name);

        log_status!(
            "supervisor",
            "Starting '{}': {} (in {})",
            name,
            spec.command,
            spec.working_dir.display()
        );
        let mut child = self.spawn(name, spec, &log_path)?;

        let pid = child.id();
        let record = InstanceRecord {
            name: name.to_string(),
            pid,
            command: spec.command.clone(),
            working_dir: spec.working_dir.display().to_string(),
            log_path: log_path.display().to_string(),
            started_at: chrono::Utc::now().to_rfc3339(),
            boot_id: boot_id(),
            start_ticks: to_pid(pid).and_then(proc_stat).map(|stat| stat.start_ticks),
        };

        if let Err(err) = self.write_record(&record) {
            // An unregistered process could never be stopped by a later run.
            let _ = signal_group(record.pid, libc::SIGKILL);
            let _ = child.wait();
            return Err(err);
        }

        log_status!("supervisor", "Started '{}' (pid {})", name, record.pid);
        self.children.insert(name.to_string(), child);
        Ok(record)
    }

    fn is_running(&mut self, name: &str) -> Result<bool> {
        match self.record(name)? {
            Some(record) => Ok(self.alive(name, &record)),
            None => Ok(false),
        }
    }
}

/// Slot names become file names: `[A-Za-z0-9._-]+`, not starting with `.`.
pub fn validate_name(name: &str) -> Result<()> {
    let valid_chars = name
        .chars()
        .all(|c| c.is_ascii_alphanumeric() || matches!(c, '.' | '_' | '-'));

    if name.is_empty() || name.starts_with('.') || !valid_chars {
        return Err(Error::validation_invalid_argument(
            "instance",
            format!(
                "'{}' is not a valid instance name (use letters, digits, '.', '_' or '-')",
                name
            ),
        ));
    }
    Ok(())
}

fn signal_error(name: &str, pid: u32, err: std::io::Error) -> Error {
    Error::internal_io(
        err.to_string(),
        Some(format!("signal instance '{}' (pid {})", name, pid)),
    )
}

fn to_pid(pid: u32) -> Option<libc::pid_t> {
    libc::pid_t::try_from(pid).ok().filter(|p| *p > 0)
}

/// Signal the process group led by `pid`, falling back to the single process.
///
/// A process that is already gone counts as delivered.
fn signal_group(pid: u32, signal: libc::c_int) -> std::io::Result<()> {
    let Some(pid) = to_pid(pid) else {
        return Ok(());
    };

    // SAFETY: kill has no memory-safety preconditions.
    if unsafe { libc::kill(-pid, signal) } == 0 {
        return Ok(());
    }
    let err = std::io::Error::last_os_error();
    if err.raw_os_error() != Some(libc::ESRCH) {
        return Err(err);
    }

    // SAFETY: as above.
    if unsafe { libc::kill(pid, signal) } == 0 {
        return Ok(());
    }
    let err = std::io::Error::last_os_error();
    if err.raw_os_error() == Some(libc::ESRCH) {
        Ok(())
    } else {
        Err(err)
    }
}

/// Whether the record still describes the process that was launched.
///
/// Checks the boot id and, while the leader exists, its start time. Without
/// either (non-Linux, older records) the pid is trusted.
fn owns(record: &InstanceRecord) -> bool {
    if let (Some(recorded), Some(current)) = (&record.boot_id, boot_id()) {
        if *recorded != current {
            return false;
        }
    }
    match (record.start_ticks, to_pid(record.pid).and_then(proc_stat)) {
        (Some(recorded), Some(stat)) => stat.start_ticks == recorded,
        _ => true,
    }
}

/// `kill(target, 0)`: true if it exists, even when owned by another user.
fn probe(target: libc::pid_t) -> bool {
    // SAFETY: signal 0 only checks existence and permissions.
    if unsafe { libc::kill(target, 0) } == 0 {
        return true;
    }
    std::io::Error::last_os_error().raw_os_error() == Some(libc::EPERM)
}

/// Whether `pid` names a live, non-zombie process.
fn pid_alive(pid: u32) -> bool {
    let Some(pid) = to_pid(pid) else {
        return false;
    };
    probe(pid) && !proc_stat(pid).is_some_and(|stat| stat.state == 'Z')
}

/// Whether any non-zombie process remains in the group led by `pgid`.
#[cfg(target_os = "linux")]
fn group_alive(pgid: u32) -> bool {
    let Some(pgid) = to_pid(pgid) else {
        return false;
    };
    let Ok(entries) = std::fs::read_dir("/proc") else {
        return probe(-pgid);
    };
    entries
        .flatten()
        .filter_map(|entry| entry.file_name().to_str()?.parse::<libc::pid_t>().ok())
        .filter_map(proc_stat)
        .any(|stat| stat.pgrp == pgid && stat.state != 'Z')
}

#[cfg(not(target_os = "linux"))]
fn group_alive(pgid: u32) -> bool {
    to_pid(pgid).is_some_and(|pgid| probe(-pgid))
}

#[cfg_attr(not(target_os = "linux"), allow(dead_code))]
struct ProcStat {
    state: char,
    pgrp: libc::pid_t,
    start_ticks: u64,
}

#[cfg(target_os = "linux")]
fn proc_stat(pid: libc::pid_t) -> Option<ProcStat> {
    let stat = std::fs::read_to_string(format!("/proc/{}/stat", pid)).ok()?;
    // Format: "pid (comm) state ppid pgrp ..."; comm may itself contain parentheses.
    let (_, rest) = stat.rsplit_once(')')?;
    let fields: Vec<&str> = rest.split_whitespace().collect();
    Some(ProcStat {
        state: fields.first()?.chars().next()?,
        pgrp: fields.get(2)?.parse().ok()?,
        start_ticks: fields.get(19)?.parse().ok()?,
    })
}

#[cfg(not(target_os = "linux"))]
fn proc_stat(_pid: libc::pid_t) -> Option<ProcStat> {
    None
}

#[cfg(target_os = "linux")]
fn boot_id() -> Option<String> {
    std::fs::read_to_string("/proc/sys/kernel/random/boot_id")
        .ok()
        .map(|id| id.trim().to_string())
        .filter(|id| !id.is_empty())
}

#[cfg(not(target_os = "linux"))]
fn boot_id() -> Option<String> {
    None
}
