//! Polite→forceful termination (§4.4, §9). On Unix this is a real two-step
//! escalation: SIGTERM to the child's process group, then SIGKILL if it
//! hasn't exited within the grace window. Windows has no equivalent of a
//! catchable "please exit" signal for an arbitrary process, so there the
//! polite step degrades to the same forceful `TerminateProcess` call — this
//! divergence is intentional and recorded in DESIGN.md.

#[cfg(unix)]
pub(crate) fn terminate_politely(pid: u32) {
    unsafe {
        libc::kill(-(pid as i32), libc::SIGTERM);
    }
}

#[cfg(unix)]
pub(crate) fn terminate_forcefully(pid: u32) {
    unsafe {
        libc::kill(-(pid as i32), libc::SIGKILL);
    }
}

#[cfg(windows)]
pub(crate) fn terminate_politely(pid: u32) {
    terminate_forcefully(pid);
}

#[cfg(windows)]
pub(crate) fn terminate_forcefully(pid: u32) {
    use winapi::um::handleapi::CloseHandle;
    use winapi::um::processthreadsapi::{OpenProcess, TerminateProcess};
    use winapi::um::winnt::PROCESS_TERMINATE;

    unsafe {
        let handle = OpenProcess(PROCESS_TERMINATE, 0, pid);
        if !handle.is_null() {
            TerminateProcess(handle, 1);
            CloseHandle(handle);
        }
    }
}
