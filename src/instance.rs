//! Best-effort guard against running the same bot twice on one host.
//!
//! The check scans the process table once at startup. Two launches inside the
//! same scan window can both pass it; there is no lock file behind it.

use std::collections::{HashMap, HashSet};
use std::ffi::OsString;
use std::path::Path;

use log::{debug, error};
use sysinfo::{ProcessRefreshKind, ProcessesToUpdate, System, UpdateKind};

use crate::error::BotError;

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ProcessEntry {
    pub pid: u32,
    pub parent: Option<u32>,
    /// `None` when the command line could not be read (exited, access denied).
    pub cmd: Option<String>,
}

pub trait ProcessTable {
    fn snapshot(&mut self) -> Vec<ProcessEntry>;
}

/// Process table of the host, read through `sysinfo`.
#[derive(Default)]
pub struct SysinfoTable {
    system: System,
}

impl ProcessTable for SysinfoTable {
    fn snapshot(&mut self) -> Vec<ProcessEntry> {
        self.system.refresh_processes_specifics(
            ProcessesToUpdate::All,
            true,
            ProcessRefreshKind::nothing().with_cmd(UpdateKind::Always),
        );

        self.system
            .processes()
            .iter()
            // linux lists every thread as its own task
            .filter(|(_, p)| p.thread_kind().is_none())
            .map(|(pid, p)| ProcessEntry {
                pid: pid.as_u32(),
                parent: p.parent().map(|pp| pp.as_u32()),
                cmd: join_cmd(p.cmd()),
            })
            .collect()
    }
}

fn join_cmd(args: &[OsString]) -> Option<String> {
    if args.is_empty() {
        return None;
    }
    Some(
        args.iter()
            .map(|a| a.to_string_lossy())
            .collect::<Vec<_>>()
            .join(" "),
    )
}

/// Name this program was launched as, used to recognise its twins.
pub fn current_program_name() -> String {
    let file_name = |p: &Path| p.file_name().map(|n| n.to_string_lossy().to_string());

    std::env::current_exe()
        .ok()
        .and_then(|exe| file_name(&exe))
        .or_else(|| std::env::args_os().next().and_then(|a| file_name(Path::new(&a))))
        .unwrap_or_else(|| env!("CARGO_PKG_NAME").to_string())
}

/// First process other than us and our ancestors whose command line
/// mentions `program`. Launchers such as `cargo run --bin echobot` are
/// ancestors and never count.
pub fn find_duplicate(entries: &[ProcessEntry], own_pid: u32, program: &str) -> Option<u32> {
    if program.is_empty() {
        return None;
    }
    let lineage = lineage(entries, own_pid);
    entries
        .iter()
        .filter(|e| !lineage.contains(&e.pid))
        .find(|e| e.cmd.as_deref().is_some_and(|cmd| cmd.contains(program)))
        .map(|e| e.pid)
}

fn lineage(entries: &[ProcessEntry], own_pid: u32) -> HashSet<u32> {
    let parents: HashMap<u32, u32> = entries
        .iter()
        .filter_map(|e| e.parent.map(|parent| (e.pid, parent)))
        .collect();

    let mut lineage = HashSet::from([own_pid]);
    let mut pid = own_pid;
    while let Some(&parent) = parents.get(&pid) {
        // stops on pid reuse loops as well as at the root
        if !lineage.insert(parent) {
            break;
        }
        pid = parent;
    }
    lineage
}

pub fn ensure_single_instance<T: ProcessTable>(
    table: &mut T,
    program: &str,
) -> Result<(), BotError> {
    let own_pid = std::process::id();
    let entries = table.snapshot();
    debug!("[instance] scanned {} processes for {:?}", entries.len(), program);

    match find_duplicate(&entries, own_pid, program) {
        Some(pid) => {
            error!("[instance] {} is already running with pid {}, exiting", program, pid);
            Err(BotError::DuplicateInstance { pid })
        }
        None => Ok(()),
    }
}
