// Copyright (c) The emutest Contributors
// SPDX-License-Identifier: MIT OR Apache-2.0

use std::os::unix::process::CommandExt;

/// Puts the child in its own process group, so that it and anything it spawns can be killed
/// together.
pub(super) fn set_process_group(cmd: &mut tokio::process::Command) {
    cmd.as_std_mut().process_group(0);
}

pub(super) fn kill_process_group(pid: u32) {
    let Ok(pid) = libc::pid_t::try_from(pid) else {
        return;
    };
    // A negative pid targets the whole process group. The group may already be gone, in which
    // case kill returns ESRCH.
    unsafe {
        libc::kill(-pid, libc::SIGKILL);
    }
}
