//! Process-tree termination
//!
//! Force-kills an external job together with every process it spawned.
//! The default strategy signals the process group established at spawn
//! time; the `/proc` table walk is kept for children that escaped the
//! group. Both are idempotent: signalling an already-dead target is not an
//! error.

use std::fs;
use tracing::debug;

/// Strategy for killing a job's whole process tree.
pub trait ProcessKiller: Send + Sync {
    fn kill_tree(&self, root_pid: u32);
}

/// Kills the process group the job was spawned into.
///
/// Jobs are started with `setsid`, so the root pid doubles as the group id
/// and one `killpg` reaches every descendant that stayed in the group.
/// When the group cannot be signalled (the child had not entered its own
/// group yet, or already exited) the `/proc` table walk takes over.
#[derive(Clone, Copy, Debug, Default)]
pub struct ProcessGroupKiller;

impl ProcessKiller for ProcessGroupKiller {
    fn kill_tree(&self, root_pid: u32) {
        let pid = root_pid as libc::pid_t;
        if unsafe { libc::killpg(pid, libc::SIGKILL) } != 0 {
            debug!("killpg({pid}) had no live target, walking the process table");
            ProcTableKiller.kill_tree(root_pid);
        }
    }
}

/// Walks the OS process table and kills the root first, then every
/// discovered descendant recursively.
#[derive(Clone, Copy, Debug, Default)]
pub struct ProcTableKiller;

impl ProcessKiller for ProcTableKiller {
    fn kill_tree(&self, root_pid: u32) {
        let children = direct_children(root_pid);
        unsafe {
            libc::kill(root_pid as libc::pid_t, libc::SIGKILL);
        }
        for child in children {
            self.kill_tree(child);
        }
    }
}

/// Direct children of `parent`, read from `/proc/<pid>/stat`.
fn direct_children(parent: u32) -> Vec<u32> {
    let mut children = Vec::new();
    let entries = match fs::read_dir("/proc") {
        Ok(entries) => entries,
        Err(_) => return children,
    };

    for entry in entries.flatten() {
        let name = entry.file_name();
        let pid: u32 = match name.to_str().and_then(|n| n.parse().ok()) {
            Some(pid) => pid,
            None => continue,
        };
        if let Some(ppid) = parent_of(pid) {
            if ppid == parent {
                children.push(pid);
            }
        }
    }
    children
}

/// Parent pid from `/proc/<pid>/stat`; the comm field may contain spaces
/// and parentheses, so fields are taken after the last `)`.
fn parent_of(pid: u32) -> Option<u32> {
    let stat = fs::read_to_string(format!("/proc/{pid}/stat")).ok()?;
    let rest = &stat[stat.rfind(')')? + 1..];
    rest.split_whitespace().nth(1)?.parse().ok()
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::os::unix::process::{CommandExt, ExitStatusExt};
    use std::process::{Command, Stdio};
    use std::time::Duration;

    fn spawn_group(cmd: &str) -> std::process::Child {
        let mut command = Command::new("/bin/sh");
        command
            .arg("-c")
            .arg(cmd)
            .stdout(Stdio::null())
            .stderr(Stdio::null());
        unsafe {
            command.pre_exec(|| {
                if libc::setsid() == -1 {
                    return Err(std::io::Error::last_os_error());
                }
                Ok(())
            });
        }
        command.spawn().expect("spawn test process")
    }

    fn is_alive(pid: u32) -> bool {
        unsafe { libc::kill(pid as libc::pid_t, 0) == 0 }
    }

    #[test]
    fn test_group_kill_reaches_descendants() {
        let mut child = spawn_group("sleep 30 & exec sleep 30");
        let pid = child.id();
        std::thread::sleep(Duration::from_millis(100));

        ProcessGroupKiller.kill_tree(pid);

        let status = child.wait().unwrap();
        assert_eq!(status.signal(), Some(libc::SIGKILL));
        // The backgrounded sleep shared the group and is gone too; give the
        // kernel a moment to reap before probing.
        std::thread::sleep(Duration::from_millis(100));
        assert!(!is_alive(pid));
    }

    #[test]
    fn test_group_kill_is_idempotent() {
        let mut child = spawn_group("exec sleep 30");
        let pid = child.id();

        ProcessGroupKiller.kill_tree(pid);
        child.wait().unwrap();
        // Second kill on a dead tree must not panic or error.
        ProcessGroupKiller.kill_tree(pid);
    }

    #[test]
    fn test_proc_table_kill() {
        let mut child = spawn_group("exec sleep 30");
        let pid = child.id();

        ProcTableKiller.kill_tree(pid);

        let status = child.wait().unwrap();
        assert_eq!(status.signal(), Some(libc::SIGKILL));
        ProcTableKiller.kill_tree(pid);
    }

    #[test]
    fn test_parent_of_self() {
        let pid = std::process::id();
        let parent = parent_of(pid);
        assert!(parent.is_some());
    }
}
