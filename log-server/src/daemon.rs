//! Classic double-fork detach.
//!
//! Must run before the tokio runtime exists: `fork` only carries the calling
//! thread into the child.

use std::{ffi::CStr, io};

#[cfg(unix)]
const DEV_NULL: &CStr = c"/dev/null";
#[cfg(unix)]
const ROOT_DIR: &CStr = c"/";

/// Detaches from the controlling terminal. Returns only in the final
/// grandchild; both intermediate parents exit with status 0.
#[cfg(unix)]
pub fn detach() -> io::Result<()> {
    fork_and_exit_parent()?;

    // SAFETY: plain syscalls with no pointers; the process is single-threaded here.
    if unsafe { libc::setsid() } < 0 {
        return Err(io::Error::last_os_error());
    }

    fork_and_exit_parent()?;

    // SAFETY: `umask` cannot fail; `chdir` receives a valid NUL-terminated path.
    unsafe {
        libc::umask(0);
        if libc::chdir(ROOT_DIR.as_ptr()) != 0 {
            return Err(io::Error::last_os_error());
        }
    }

    redirect_standard_streams()
}

#[cfg(unix)]
fn fork_and_exit_parent() -> io::Result<()> {
    // SAFETY: called before any runtime threads are started.
    match unsafe { libc::fork() } {
        pid if pid < 0 => Err(io::Error::last_os_error()),
        0 => Ok(()),
        _ => std::process::exit(0),
    }
}

#[cfg(unix)]
fn redirect_standard_streams() -> io::Result<()> {
    // SAFETY: `open` gets a valid C string; `dup2`/`close` operate on the fd it returned.
    unsafe {
        let fd = libc::open(DEV_NULL.as_ptr(), libc::O_RDWR);
        if fd < 0 {
            return Err(io::Error::last_os_error());
        }
        for target in [libc::STDIN_FILENO, libc::STDOUT_FILENO, libc::STDERR_FILENO] {
            if libc::dup2(fd, target) < 0 {
                return Err(io::Error::last_os_error());
            }
        }
        if fd > libc::STDERR_FILENO && libc::close(fd) != 0 {
            return Err(io::Error::last_os_error());
        }
    }
    Ok(())
}

#[cfg(not(unix))]
pub fn detach() -> io::Result<()> {
    Err(io::Error::new(
        io::ErrorKind::Unsupported,
        "detached mode requires a unix platform",
    ))
}
