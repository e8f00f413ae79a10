// Copyright (c) The devtest Contributors
// SPDX-License-Identifier: MIT OR Apache-2.0

#![warn(missing_docs)]

//! Host-side orchestration of test runs on remote devices.
//!
//! Test output flows through this crate as a stream of
//! [`ResultEvent`](devtest_metadata::ResultEvent)s delivered to
//! [`EventListener`](listener::EventListener)s:
//!
//! * [`parse`] turns raw test output (Python unittest text, GTest XML, benchmark JSON) into
//!   events.
//! * [`host_test`] resolves host-side test classes into runnable units, and shards them across
//!   invocations.
//! * [`retry`] re-runs a single test that failed to report a result.
//! * [`coverage`] runs instrumentation targets with coverage enabled and reports on the data.
//!
//! Devices are reached only through the [`Device`](device::Device) trait.

pub mod config;
pub mod coverage;
pub mod device;
pub mod errors;
mod helpers;
pub mod host_test;
pub mod listener;
pub mod parse;
pub mod partition;
pub mod remote;
pub mod retry;
#[cfg(test)]
mod test_helpers;

pub use helpers::plural;
