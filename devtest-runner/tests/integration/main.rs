// Copyright (c) The devtest Contributors
// SPDX-License-Identifier: MIT OR Apache-2.0

//! End-to-end tests driving devtest-runner through its public API against scripted devices.

mod coverage_run;
mod fixtures;
mod host_run;
