// Copyright (c) The devtest Contributors
// SPDX-License-Identifier: MIT OR Apache-2.0

//! The device collaborator: the transport through which tests are executed.
//!
//! devtest never talks to hardware directly. Everything that needs a device goes through the
//! [`Device`] trait, and every method on it may fail with a [`DeviceUnavailableError`]. That error
//! is terminal for the current invocation and is never retried internally.

use crate::{errors::DeviceUnavailableError, listener::EventListener};
use camino::Utf8PathBuf;
use std::collections::BTreeMap;

/// Describes an instrumentation run to be executed on a device.
#[derive(Clone, Debug, Default, Eq, PartialEq)]
pub struct InstrumentationSpec {
    /// The instrumentation package.
    pub package_name: String,

    /// The instrumentation runner.
    pub runner_name: String,

    /// Restricts the run to a single class.
    pub class_name: Option<String>,

    /// Restricts the run to a single method. Only meaningful with `class_name`.
    pub method_name: Option<String>,

    /// Extra instrumentation arguments.
    pub args: BTreeMap<String, String>,

    /// If true, tests are only enumerated: every test reports start and end without executing.
    pub collect_tests_only: bool,
}

impl InstrumentationSpec {
    /// Creates a spec for the given package and runner.
    pub fn new(package_name: impl Into<String>, runner_name: impl Into<String>) -> Self {
        Self {
            package_name: package_name.into(),
            runner_name: runner_name.into(),
            ..Default::default()
        }
    }

    /// Returns the run name reported for this spec: the package name.
    pub fn run_name(&self) -> &str {
        &self.package_name
    }
}

/// Receives the output of a shell command, possibly in several batches.
pub trait OutputReceiver {
    /// Called with each new batch of complete lines.
    fn add_lines(&mut self, lines: &[String]);

    /// Called once the command has finished and no more output will arrive.
    fn flush(&mut self) {}
}

/// An [`OutputReceiver`] that keeps all output in memory.
#[derive(Clone, Debug, Default)]
pub struct CollectingOutputReceiver {
    lines: Vec<String>,
}

impl CollectingOutputReceiver {
    /// Creates an empty receiver.
    pub fn new() -> Self {
        Self::default()
    }

    /// Returns all lines received so far.
    pub fn lines(&self) -> &[String] {
        &self.lines
    }

    /// Returns all output received so far, joined with newlines.
    pub fn output(&self) -> String {
        self.lines.join("\n")
    }
}

impl OutputReceiver for CollectingOutputReceiver {
    fn add_lines(&mut self, lines: &[String]) {
        self.lines.extend(lines.iter().cloned());
    }
}

/// A device (or other remote execution context) that tests run against.
///
/// Implementations are exclusive per execution context: devtest never runs two units against the
/// same device concurrently.
pub trait Device {
    /// Returns the serial number or other handle identifying this device.
    fn serial(&self) -> &str;

    /// Runs instrumentation tests, reporting results to `listener`.
    fn run_instrumentation_tests(
        &mut self,
        spec: &InstrumentationSpec,
        listener: &mut dyn EventListener,
    ) -> Result<(), DeviceUnavailableError>;

    /// Runs a shell command on the device, streaming its output to `receiver`.
    fn execute_shell_command(
        &mut self,
        command: &str,
        receiver: &mut dyn OutputReceiver,
    ) -> Result<(), DeviceUnavailableError>;

    /// Returns true if the given device-side path exists.
    fn does_file_exist(&mut self, path: &str) -> Result<bool, DeviceUnavailableError>;

    /// Copies a device-side file to a host-side temporary file and returns its path.
    ///
    /// Returns `None` if the file could not be pulled. The caller owns the returned file.
    fn pull_file(&mut self, path: &str) -> Result<Option<Utf8PathBuf>, DeviceUnavailableError>;
}
