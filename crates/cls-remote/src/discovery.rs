use std::path::{Path, PathBuf};

use cls_types::ProcessId;
use sysinfo::{ProcessRefreshKind, System, UpdateKind};

#[cfg(target_os = "macos")]
const EDITOR_EXECUTABLE: &str = "Contents/MacOS/Unity";
#[cfg(target_os = "windows")]
const EDITOR_EXECUTABLE: &str = "Unity.exe";
#[cfg(not(any(target_os = "macos", target_os = "windows")))]
const EDITOR_EXECUTABLE: &str = "Unity";

/// A running editor process that may accept a debugger
#[derive(Clone, Debug, PartialEq, Eq)]
pub struct CandidateProcess {
    pub pid: ProcessId,
    pub project_path: Option<PathBuf>,
}

/// What the matcher needs to know about one OS process
#[derive(Clone, Debug, Default)]
pub struct ProcessInfo<'a> {
    pub pid: ProcessId,
    pub name: &'a str,
    pub exe: Option<&'a Path>,
    pub cmd: &'a [String],
}

/// Enumerate running editor processes
pub fn discover_candidates() -> Vec<CandidateProcess> {
    let mut system = System::new();
    system.refresh_processes_specifics(
        ProcessRefreshKind::new()
            .with_cmd(UpdateKind::Always)
            .with_exe(UpdateKind::Always),
    );

    let mut candidates: Vec<_> = system
        .processes()
        .iter()
        .filter_map(|(pid, process)| {
            match_candidate(
                &ProcessInfo {
                    pid: pid.as_u32(),
                    name: process.name(),
                    exe: process.exe(),
                    cmd: process.cmd(),
                },
                EDITOR_EXECUTABLE,
            )
        })
        .collect();
    candidates.sort_by_key(|c| c.pid);

    tracing::debug!(count = candidates.len(), "Discovered editor processes");
    candidates
}

/// Decide whether a process is an editor we can attach to
pub fn match_candidate(info: &ProcessInfo<'_>, editor_executable: &str) -> Option<CandidateProcess> {
    let editor_name = Path::new(editor_executable).file_name()?;
    let is_editor = match info.exe {
        Some(exe) => exe.ends_with(editor_executable),
        None => Path::new(info.name).as_os_str() == editor_name,
    } || info
        .cmd
        .first()
        .is_some_and(|argv0| Path::new(argv0).ends_with(editor_executable));

    if !is_editor {
        return None;
    }

    // Asset import workers carry -srvPort and share the editor binary
    if info.cmd.iter().any(|arg| arg == "-srvPort") {
        return None;
    }

    let project_path = info
        .cmd
        .iter()
        .position(|arg| arg.eq_ignore_ascii_case("-projectPath"))
        .and_then(|idx| info.cmd.get(idx + 1))
        .map(PathBuf::from);

    Some(CandidateProcess {
        pid: info.pid,
        project_path,
    })
}
