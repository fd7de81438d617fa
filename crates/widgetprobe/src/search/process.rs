//! Process table and process handles used by connection search.

// Allow expect for Mutex - lock poisoning is truly exceptional
#![allow(clippy::expect_used)]

use std::collections::{HashMap, HashSet};
use std::fmt;
use std::process::Child;
use std::sync::Mutex;
use sysinfo::{Pid, ProcessesToUpdate, System};

/// View of the processes running on this machine
pub trait ProcessTable: fmt::Debug + Send + Sync {
    /// Pid of the process running the search
    fn current_pid(&self) -> u32;

    /// Whether a process with `pid` is running
    fn pid_exists(&self, pid: u32) -> bool;

    /// Pids of every descendant of `pid`
    fn child_pids(&self, pid: u32) -> Vec<u32>;

    /// Pids of processes whose name is `name`
    fn pids_for_name(&self, name: &str) -> Vec<u32>;

    /// Re-read the process table before a new scan
    fn refresh(&self) {}
}

/// Handle to a process the caller launched or attached to
pub trait ProcessHandle: fmt::Debug + Send + Sync {
    /// Process id
    fn pid(&self) -> u32;

    /// Exit code if the process has exited
    fn poll(&self) -> Option<i32>;
}

/// [`ProcessTable`] backed by `sysinfo`
pub struct SystemProcessTable {
    system: Mutex<System>,
}

impl SystemProcessTable {
    /// Snapshot the current process list
    #[must_use]
    pub fn new() -> Self {
        let mut system = System::new();
        system.refresh_processes(ProcessesToUpdate::All, true);
        Self {
            system: Mutex::new(system),
        }
    }
}

impl Default for SystemProcessTable {
    fn default() -> Self {
        Self::new()
    }
}

impl fmt::Debug for SystemProcessTable {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let count = self.system.lock().expect("lock poisoned").processes().len();
        f.debug_struct("SystemProcessTable")
            .field("processes", &count)
            .finish()
    }
}

impl ProcessTable for SystemProcessTable {
    fn current_pid(&self) -> u32 {
        std::process::id()
    }

    fn pid_exists(&self, pid: u32) -> bool {
        let mut system = self.system.lock().expect("lock poisoned");
        system.refresh_processes(ProcessesToUpdate::Some(&[Pid::from_u32(pid)]), true);
        system.process(Pid::from_u32(pid)).is_some()
    }

    fn child_pids(&self, pid: u32) -> Vec<u32> {
        let system = self.system.lock().expect("lock poisoned");
        let mut children: HashMap<u32, Vec<u32>> = HashMap::new();
        for (child, process) in system.processes() {
            if let Some(parent) = process.parent() {
                children
                    .entry(parent.as_u32())
                    .or_default()
                    .push(child.as_u32());
            }
        }
        descendants(pid, &children)
    }

    fn pids_for_name(&self, name: &str) -> Vec<u32> {
        let system = self.system.lock().expect("lock poisoned");
        let mut pids: Vec<u32> = system
            .processes()
            .iter()
            .filter(|(_, process)| process.name() == name)
            .map(|(pid, _)| pid.as_u32())
            .collect();
        pids.sort_unstable();
        pids
    }

    fn refresh(&self) {
        self.system
            .lock()
            .expect("lock poisoned")
            .refresh_processes(ProcessesToUpdate::All, true);
    }
}

/// Recursive descendants of `pid` given a parent → children map
pub(crate) fn descendants(pid: u32, children: &HashMap<u32, Vec<u32>>) -> Vec<u32> {
    let mut found = Vec::new();
    let mut seen = HashSet::from([pid]);
    let mut stack = vec![pid];
    while let Some(current) = stack.pop() {
        for &child in children.get(&current).map(Vec::as_slice).unwrap_or_default() {
            if seen.insert(child) {
                found.push(child);
                stack.push(child);
            }
        }
    }
    found
}

/// [`ProcessHandle`] for a child process spawned with `std::process`
#[derive(Debug)]
pub struct SpawnedProcess {
    pid: u32,
    child: Mutex<Child>,
}

impl SpawnedProcess {
    /// Wrap a spawned child
    #[must_use]
    pub fn new(child: Child) -> Self {
        Self {
            pid: child.id(),
            child: Mutex::new(child),
        }
    }
}

impl ProcessHandle for SpawnedProcess {
    fn pid(&self) -> u32 {
        self.pid
    }

    fn poll(&self) -> Option<i32> {
        match self.child.lock().expect("lock poisoned").try_wait() {
            Ok(Some(status)) => Some(status.code().unwrap_or(-1)),
            Ok(None) | Err(_) => None,
        }
    }
}
