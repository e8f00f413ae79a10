// Copyright (c) The devtest Contributors
// SPDX-License-Identifier: MIT OR Apache-2.0

use crate::TestIdentifier;
use serde::{Deserialize, Serialize};
use std::{collections::BTreeMap, fmt};

/// Free-form key-value metrics attached to a test or a run.
pub type Metrics = BTreeMap<String, String>;

/// A normalized result event.
///
/// Events for a run are bracketed: `RunStarted` precedes every test event of the run and
/// `RunEnded` follows all of them. For a given [`TestIdentifier`], `TestStarted` precedes
/// `TestEnded`, and a `TestFailed`, if any, occurs between the two.
#[derive(Clone, Debug, Eq, PartialEq, Serialize, Deserialize)]
#[serde(tag = "type", rename_all = "kebab-case")]
pub enum ResultEvent {
    /// A run started.
    #[serde(rename_all = "kebab-case")]
    RunStarted {
        /// The name of the run.
        run_name: String,

        /// The number of tests the run is expected to report.
        expected_count: usize,
    },

    /// The run as a whole failed. Individual test events may still follow.
    RunFailed {
        /// A description of the failure.
        message: String,
    },

    /// A run ended.
    #[serde(rename_all = "kebab-case")]
    RunEnded {
        /// Elapsed time for the run, in milliseconds.
        elapsed_millis: u64,

        /// Metrics reported for the run.
        metrics: Metrics,
    },

    /// A test started.
    TestStarted {
        /// The test that started.
        id: TestIdentifier,
    },

    /// A test failed.
    TestFailed {
        /// The test that failed.
        id: TestIdentifier,

        /// The failure trace.
        trace: String,
    },

    /// A test ended, whether it passed or failed.
    TestEnded {
        /// The test that ended.
        id: TestIdentifier,

        /// Metrics reported for the test.
        metrics: Metrics,
    },
}

impl ResultEvent {
    /// Creates a `RunStarted` event.
    pub fn run_started(run_name: impl Into<String>, expected_count: usize) -> Self {
        Self::RunStarted {
            run_name: run_name.into(),
            expected_count,
        }
    }

    /// Creates a `RunFailed` event.
    pub fn run_failed(message: impl Into<String>) -> Self {
        Self::RunFailed {
            message: message.into(),
        }
    }

    /// Creates a `RunEnded` event.
    pub fn run_ended(elapsed_millis: u64, metrics: Metrics) -> Self {
        Self::RunEnded {
            elapsed_millis,
            metrics,
        }
    }

    /// Creates a `TestStarted` event.
    pub fn test_started(id: TestIdentifier) -> Self {
        Self::TestStarted { id }
    }

    /// Creates a `TestFailed` event.
    pub fn test_failed(id: TestIdentifier, trace: impl Into<String>) -> Self {
        Self::TestFailed {
            id,
            trace: trace.into(),
        }
    }

    /// Creates a `TestEnded` event.
    pub fn test_ended(id: TestIdentifier, metrics: Metrics) -> Self {
        Self::TestEnded { id, metrics }
    }

    /// Returns the test this event refers to, if it is a test-level event.
    pub fn test_id(&self) -> Option<&TestIdentifier> {
        match self {
            Self::TestStarted { id } | Self::TestFailed { id, .. } | Self::TestEnded { id, .. } => {
                Some(id)
            }
            Self::RunStarted { .. } | Self::RunFailed { .. } | Self::RunEnded { .. } => None,
        }
    }

    /// Returns true if this is a run-level event.
    pub fn is_run_event(&self) -> bool {
        self.test_id().is_none()
    }
}

/// The kind of data carried by a logged file.
#[derive(Clone, Copy, Debug, Eq, Hash, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "kebab-case")]
#[non_exhaustive]
pub enum LogDataType {
    /// Coverage execution data produced on the device.
    Coverage,
    /// An HTML report (usually a directory).
    Html,
    /// A CSV report.
    Csv,
    /// An XML report.
    Xml,
    /// Plain text.
    Text,
    /// A zstd-compressed tarball.
    TarZstd,
    /// Anything else.
    Unknown,
}

impl LogDataType {
    /// Returns the file extension conventionally used for this data type.
    pub fn file_ext(self) -> &'static str {
        match self {
            Self::Coverage => "exec",
            Self::Html => "html",
            Self::Csv => "csv",
            Self::Xml => "xml",
            Self::Text => "txt",
            Self::TarZstd => "tar.zst",
            Self::Unknown => "dat",
        }
    }
}

impl fmt::Display for LogDataType {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let s = match self {
            Self::Coverage => "coverage",
            Self::Html => "html",
            Self::Csv => "csv",
            Self::Xml => "xml",
            Self::Text => "text",
            Self::TarZstd => "tar-zstd",
            Self::Unknown => "unknown",
        };
        f.write_str(s)
    }
}
