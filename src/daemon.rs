//! Daemonization: double-fork + `setsid` + standard-stream redirection.
//!
//! Grounded in the original's single-fork-plus-`setsid` shape, extended to the conventional
//! double fork so the daemon can never reacquire a controlling terminal.

use std::ffi::CString;
use std::io;

#[derive(Debug, thiserror::Error)]
pub enum DaemonError {
    #[error("fork failed: {0}")]
    Fork(#[source] io::Error),
    #[error("setsid failed: {0}")]
    Setsid(#[source] io::Error),
    #[error("failed to redirect standard streams: {0}")]
    Redirect(#[source] io::Error),
}

/// Forks twice, detaching the final child into its own session with no controlling terminal,
/// and redirects stdin/stdout/stderr to `/dev/null`. Returns in the grandchild process only; the
/// original process and the intermediate child both call `exit(0)`.
pub fn daemonize() -> Result<(), DaemonError> {
    first_fork()?;

    // SAFETY: setsid is async-signal-safe and has no preconditions beyond "not already a
    // session leader", which is guaranteed since we just forked.
    if unsafe { libc::setsid() } < 0 {
        return Err(DaemonError::Setsid(io::Error::last_os_error()));
    }

    first_fork()?;
    redirect_standard_streams()?;
    Ok(())
}

fn first_fork() -> Result<(), DaemonError> {
    // SAFETY: fork() has no preconditions; we only inspect its integer return value.
    let pid = unsafe { libc::fork() };
    if pid < 0 {
        return Err(DaemonError::Fork(io::Error::last_os_error()));
    }
    if pid > 0 {
        std::process::exit(0);
    }
    Ok(())
}

fn redirect_standard_streams() -> Result<(), DaemonError> {
    let dev_null = CString::new("/dev/null").unwrap();
    // SAFETY: dev_null is a valid NUL-terminated path; the fd returned (if non-negative) is owned
    // by us until dup2'd into 0/1/2 and then closed.
    let fd = unsafe { libc::open(dev_null.as_ptr(), libc::O_RDWR) };
    if fd < 0 {
        return Err(DaemonError::Redirect(io::Error::last_os_error()));
    }
    // SAFETY: fd is the valid descriptor opened above; 0/1/2 are always valid targets for dup2.
    unsafe {
        libc::dup2(fd, libc::STDIN_FILENO);
        libc::dup2(fd, libc::STDOUT_FILENO);
        libc::dup2(fd, libc::STDERR_FILENO);
        if fd > 2 {
            libc::close(fd);
        }
    }
    Ok(())
}
