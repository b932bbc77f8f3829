//! Spawns commands on posix using posix_spawn.
//!
//! We don't use Rust's process spawning because we want a child's stdout and
//! stderr on non-blocking pipes that a single thread can poll alongside many
//! other children, and a plain waitpid() we can call with WNOHANG.

use crate::process::Termination;
use std::ffi::{CString, OsStr, OsString};
use std::fs::File;
use std::io::Read;
use std::os::fd::{AsRawFd, FromRawFd, OwnedFd};
use std::os::unix::ffi::OsStrExt;
use std::os::unix::process::ExitStatusExt;

/// posix_spawn and friends return an error number rather than setting errno.
fn check_posix(func: &str, ret: libc::c_int) -> std::io::Result<()> {
    if ret != 0 {
        let err = std::io::Error::from_raw_os_error(ret);
        return Err(std::io::Error::new(err.kind(), format!("{}: {}", func, err)));
    }
    Ok(())
}

fn check_errno(func: &str, ret: libc::c_int) -> std::io::Result<libc::c_int> {
    if ret < 0 {
        let err = std::io::Error::last_os_error();
        return Err(std::io::Error::new(err.kind(), format!("{}: {}", func, err)));
    }
    Ok(ret)
}

/// Wraps libc::posix_spawn_file_actions_t, in particular to implement Drop.
struct PosixSpawnFileActions(libc::posix_spawn_file_actions_t);

impl PosixSpawnFileActions {
    fn new() -> std::io::Result<Self> {
        unsafe {
            let mut actions: libc::posix_spawn_file_actions_t = std::mem::zeroed();
            check_posix(
                "posix_spawn_file_actions_init",
                libc::posix_spawn_file_actions_init(&mut actions),
            )?;
            Ok(Self(actions))
        }
    }

    fn as_ptr(&self) -> *const libc::posix_spawn_file_actions_t {
        &self.0
    }

    fn adddup2(&mut self, fd: i32, newfd: i32) -> std::io::Result<()> {
        unsafe {
            check_posix(
                "posix_spawn_file_actions_adddup2",
                libc::posix_spawn_file_actions_adddup2(&mut self.0, fd, newfd),
            )
        }
    }
}

impl Drop for PosixSpawnFileActions {
    fn drop(&mut self) {
        unsafe { libc::posix_spawn_file_actions_destroy(&mut self.0) };
    }
}

/// A pipe with both ends close-on-exec and the read end non-blocking.
fn pipe() -> std::io::Result<(OwnedFd, OwnedFd)> {
    let mut fds: [libc::c_int; 2] = [0; 2];
    // Safety: pipe() fills both slots on success, and we take ownership once.
    let (read, write) = unsafe {
        check_errno("pipe", libc::pipe(fds.as_mut_ptr()))?;
        (OwnedFd::from_raw_fd(fds[0]), OwnedFd::from_raw_fd(fds[1]))
    };
    for fd in [read.as_raw_fd(), write.as_raw_fd()] {
        unsafe {
            check_errno("fcntl", libc::fcntl(fd, libc::F_SETFD, libc::FD_CLOEXEC))?;
        }
    }
    unsafe {
        let flags = check_errno("fcntl", libc::fcntl(read.as_raw_fd(), libc::F_GETFL))?;
        check_errno(
            "fcntl",
            libc::fcntl(read.as_raw_fd(), libc::F_SETFL, flags | libc::O_NONBLOCK),
        )?;
    }
    Ok((read, write))
}

fn cstring(s: &OsStr) -> std::io::Result<CString> {
    Ok(CString::new(s.as_bytes())?)
}

/// A running child process and the read ends of its output pipes.
pub struct Child {
    pid: libc::pid_t,
    stdout: Option<File>,
    stderr: Option<File>,
}

/// Start `program` (searched in PATH) with `args`, inheriting our environment.
pub fn spawn(program: &OsStr, args: &[OsString]) -> std::io::Result<Child> {
    let (out_read, out_write) = pipe()?;
    let (err_read, err_write) = pipe()?;

    let mut actions = PosixSpawnFileActions::new()?;
    // dup2 clears close-on-exec on the copies, so only 1 and 2 survive exec.
    actions.adddup2(out_write.as_raw_fd(), 1)?;
    actions.adddup2(err_write.as_raw_fd(), 2)?;

    let path = cstring(program)?;
    let argv_owned = std::iter::once(program)
        .chain(args.iter().map(|a| a.as_os_str()))
        .map(cstring)
        .collect::<std::io::Result<Vec<_>>>()?;
    let mut argv: Vec<*mut libc::c_char> = argv_owned
        .iter()
        .map(|a| a.as_ptr() as *mut libc::c_char)
        .collect();
    argv.push(std::ptr::null_mut());

    let env_owned = std::env::vars_os()
        .map(|(k, v)| {
            let mut entry = k;
            entry.push("=");
            entry.push(v);
            cstring(&entry)
        })
        .collect::<std::io::Result<Vec<_>>>()?;
    let mut envp: Vec<*mut libc::c_char> = env_owned
        .iter()
        .map(|e| e.as_ptr() as *mut libc::c_char)
        .collect();
    envp.push(std::ptr::null_mut());

    let mut pid: libc::pid_t = 0;
    unsafe {
        check_posix(
            "posix_spawnp",
            libc::posix_spawnp(
                &mut pid,
                path.as_ptr(),
                actions.as_ptr(),
                std::ptr::null(),
                argv.as_ptr(),
                envp.as_ptr(),
            ),
        )?;
    }

    drop(out_write);
    drop(err_write);
    Ok(Child {
        pid,
        stdout: Some(File::from(out_read)),
        stderr: Some(File::from(err_read)),
    })
}

/// Read what is available on a pipe without blocking.  Returns whether
/// anything arrived; the pipe is dropped at EOF.
fn read_available(pipe: &mut Option<File>, buf: &mut Vec<u8>) -> std::io::Result<bool> {
    let mut chunk = [0u8; 4096];
    let mut any = false;
    loop {
        let Some(file) = pipe.as_mut() else {
            return Ok(any);
        };
        match file.read(&mut chunk) {
            Ok(0) => *pipe = None,
            Ok(n) => {
                buf.extend_from_slice(&chunk[..n]);
                any = true;
            }
            Err(err) if err.kind() == std::io::ErrorKind::WouldBlock => return Ok(any),
            Err(err) if err.kind() == std::io::ErrorKind::Interrupted => {}
            Err(err) => return Err(err),
        }
    }
}

impl Child {
    /// Move pending output into the buffers.  Returns whether any arrived.
    pub fn drain(&mut self, stdout: &mut Vec<u8>, stderr: &mut Vec<u8>) -> std::io::Result<bool> {
        let a = read_available(&mut self.stdout, stdout)?;
        let b = read_available(&mut self.stderr, stderr)?;
        Ok(a || b)
    }

    /// Reap the child if it has exited.
    pub fn try_wait(&mut self) -> std::io::Result<Option<Termination>> {
        let mut status: libc::c_int = 0;
        let ret = unsafe { libc::waitpid(self.pid, &mut status, libc::WNOHANG) };
        if ret == 0 {
            return Ok(None);
        }
        if ret < 0 {
            let err = std::io::Error::last_os_error();
            if err.kind() == std::io::ErrorKind::Interrupted {
                return Ok(None);
            }
            return Err(std::io::Error::new(err.kind(), format!("waitpid: {}", err)));
        }
        let status = std::process::ExitStatus::from_raw(status);
        Ok(Some(match (status.code(), status.signal()) {
            (Some(0), _) => Termination::Success,
            (Some(code), _) => Termination::Exit(code),
            (None, Some(sig)) => Termination::Signal(sig),
            (None, None) => Termination::Exit(-1),
        }))
    }
}
