// Copyright (c) The devtest Contributors
// SPDX-License-Identifier: MIT OR Apache-2.0

use crate::{
    device::{Device, OutputReceiver},
    errors::DeviceUnavailableError,
};
use indexmap::IndexSet;
use regex::Regex;
use std::{fmt, sync::LazyLock};
use tracing::debug;

/// The shell command listing installed instrumentation targets.
pub const LIST_INSTRUMENTATION_COMMAND: &str = "pm list instrumentation";

static INSTRUMENTATION_LINE_REGEX: LazyLock<Regex> = LazyLock::new(|| {
    Regex::new(r"^instrumentation:(?P<package>[^/\s]+)/(?P<runner>\S+) \(target=(?P<target>[^)\s]+)\)$")
        .expect("instrumentation line regex is valid")
});

/// An instrumentation target installed on a device.
#[derive(Clone, Debug, Eq, Hash, Ord, PartialEq, PartialOrd)]
pub struct InstrumentationTarget {
    /// The package containing the tests.
    pub package_name: String,

    /// The instrumentation runner class.
    pub runner_name: String,

    /// The package under test.
    pub target_name: String,
}

impl InstrumentationTarget {
    /// Creates a new target.
    pub fn new(
        package_name: impl Into<String>,
        runner_name: impl Into<String>,
        target_name: impl Into<String>,
    ) -> Self {
        Self {
            package_name: package_name.into(),
            runner_name: runner_name.into(),
            target_name: target_name.into(),
        }
    }

    /// Parses a single line of `pm list instrumentation` output.
    pub fn parse_line(line: &str) -> Option<Self> {
        let captures = INSTRUMENTATION_LINE_REGEX.captures(line.trim())?;
        Some(Self::new(
            &captures["package"],
            &captures["runner"],
            &captures["target"],
        ))
    }
}

impl fmt::Display for InstrumentationTarget {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}/{}", self.package_name, self.runner_name)
    }
}

/// Collects instrumentation targets from `pm list instrumentation` output.
///
/// Lines that are not instrumentation entries are ignored. Duplicate entries are reported once.
#[derive(Clone, Debug, Default)]
pub struct ListInstrumentationParser {
    targets: IndexSet<InstrumentationTarget>,
}

impl ListInstrumentationParser {
    /// Creates an empty parser.
    pub fn new() -> Self {
        Self::default()
    }

    /// Returns the targets seen so far, in the order they were listed.
    pub fn targets(&self) -> impl Iterator<Item = &InstrumentationTarget> + '_ {
        self.targets.iter()
    }

    /// Consumes the parser, returning the targets in the order they were listed.
    pub fn into_targets(self) -> Vec<InstrumentationTarget> {
        self.targets.into_iter().collect()
    }
}

impl OutputReceiver for ListInstrumentationParser {
    fn add_lines(&mut self, lines: &[String]) {
        self.targets
            .extend(lines.iter().filter_map(|line| InstrumentationTarget::parse_line(line)));
    }
}

/// Lists the instrumentation targets installed on `device`, keeping only those matching the
/// package and runner filters. An empty filter matches everything.
pub fn discover_targets(
    device: &mut dyn Device,
    packages: &[String],
    runners: &[String],
) -> Result<Vec<InstrumentationTarget>, DeviceUnavailableError> {
    let mut parser = ListInstrumentationParser::new();
    device.execute_shell_command(LIST_INSTRUMENTATION_COMMAND, &mut parser)?;
    parser.flush();

    let targets: Vec<_> = parser
        .into_targets()
        .into_iter()
        .filter(|target| {
            (packages.is_empty() || packages.contains(&target.package_name))
                && (runners.is_empty() || runners.contains(&target.runner_name))
        })
        .collect();
    debug!(
        serial = device.serial(),
        count = targets.len(),
        "discovered instrumentation targets"
    );
    Ok(targets)
}
