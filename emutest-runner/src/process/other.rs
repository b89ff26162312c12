// Copyright (c) The emutest Contributors
// SPDX-License-Identifier: MIT OR Apache-2.0

pub(super) fn set_process_group(_cmd: &mut tokio::process::Command) {}

// Only the direct child is killed, through `Child::start_kill`.
pub(super) fn kill_process_group(_pid: u32) {}
