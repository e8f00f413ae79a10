// Copyright (c) The devtest Contributors
// SPDX-License-Identifier: MIT OR Apache-2.0

//! Errors produced by devtest.

use crate::coverage::CoverageReportFormat;
use camino::Utf8PathBuf;
use config::ConfigError;
use std::{borrow::Cow, fmt, io, time::Duration};
use thiserror::Error;

/// The device under test went away, or could not be communicated with.
///
/// This is distinct from a test failure: it is never retried by devtest and interrupts whatever
/// loop was in progress.
#[derive(Clone, Debug, Error, PartialEq, Eq)]
#[error("device `{serial}` is not available: {reason}")]
pub struct DeviceUnavailableError {
    serial: String,
    reason: String,
}

impl DeviceUnavailableError {
    /// Creates a new error for the given device serial.
    pub fn new(serial: impl Into<String>, reason: impl Into<String>) -> Self {
        Self {
            serial: serial.into(),
            reason: reason.into(),
        }
    }

    /// Returns the serial (or handle) of the device that became unavailable.
    pub fn serial(&self) -> &str {
        &self.serial
    }

    /// Returns the reason the device is unavailable.
    pub fn reason(&self) -> &str {
        &self.reason
    }
}

/// The outcome of a failed test body.
#[derive(Clone, Debug, Error, PartialEq, Eq)]
pub enum TestCaseError {
    /// An assertion or other test-level failure, with its trace.
    #[error("test failed: {0}")]
    Failure(String),

    /// The device became unavailable while the test was running.
    #[error(transparent)]
    DeviceUnavailable(#[from] DeviceUnavailableError),
}

impl TestCaseError {
    /// Creates a test-level failure.
    pub fn failure(trace: impl Into<String>) -> Self {
        Self::Failure(trace.into())
    }
}

/// A fatal error while parsing Python unittest console output.
///
/// The output cannot be trusted after this occurs.
#[derive(Clone, Debug, Error, PartialEq, Eq)]
#[error("failed to parse python-unittest output: expected {expected} on line {line_number}, found `{line}` instead")]
pub struct UnittestParseError {
    expected: Cow<'static, str>,
    line_number: usize,
    line: String,
}

impl UnittestParseError {
    pub(crate) fn new(
        expected: impl Into<Cow<'static, str>>,
        line_number: usize,
        line: impl Into<String>,
    ) -> Self {
        Self {
            expected: expected.into(),
            line_number,
            line: line.into(),
        }
    }

    /// Returns the 1-based line number of the offending line, counted across all fed batches.
    pub fn line_number(&self) -> usize {
        self.line_number
    }

    /// Returns the offending line.
    pub fn line(&self) -> &str {
        &self.line
    }

    /// Returns a description of the token that was expected.
    pub fn expected(&self) -> &str {
        &self.expected
    }
}

/// An error that occurs while parsing a [`ShardPlan`](crate::partition::ShardPlan) from a string.
#[derive(Clone, Debug, Error)]
pub struct ShardPlanParseError {
    message: Cow<'static, str>,
}

impl ShardPlanParseError {
    pub(crate) fn new(message: impl Into<Cow<'static, str>>) -> Self {
        Self {
            message: message.into(),
        }
    }
}

impl fmt::Display for ShardPlanParseError {
    fn fmt(&self, f: &mut fmt::Formatter) -> fmt::Result {
        write!(f, "shard must be in the format \"I/N\":\n{}", self.message)
    }
}

/// An internal consistency error raised while computing a shard.
#[derive(Clone, Debug, Error, PartialEq, Eq)]
pub enum ShardError {
    /// The shard count was zero.
    #[error("shard count must be at least 1")]
    ZeroShardCount,

    /// The shard index was out of range.
    #[error("shard index {index} is out of range for {count} shards")]
    IndexOutOfRange {
        /// The requested index.
        index: usize,
        /// The shard count.
        count: usize,
    },

    /// Re-counting tests after sharding produced more tests than before sharding.
    #[error(
        "test count after sharding ({shard_count}) is higher than the initial count ({total_count})"
    )]
    CountExceeded {
        /// The count for the shard.
        shard_count: usize,
        /// The pre-shard total.
        total_count: usize,
    },

    /// The host test configuration was invalid.
    #[error(transparent)]
    HostTest(#[from] HostTestError),
}

/// An error produced while running or sharding a [`HostTest`](crate::host_test::HostTest).
#[derive(Clone, Debug, Error, PartialEq, Eq)]
pub enum HostTestError {
    /// No test classes were configured.
    #[error("missing test class name")]
    MissingClassName,

    /// A class name was configured that the registry does not know about.
    #[error("could not load test class `{0}`")]
    UnknownClass(String),

    /// A method name was given together with more than one class.
    #[error("method name given with multiple test classes")]
    MethodWithMultipleClasses,

    /// The configured method does not exist on the class.
    #[error("cannot find {class_name}#{method_name}")]
    MethodNotFound {
        /// The class searched.
        class_name: String,
        /// The method that was not found.
        method_name: String,
    },

    /// The class is not a supported kind of test.
    #[error("{0} is not a supported test")]
    UnsupportedClass(String),

    /// Filters were configured but the remote test cannot receive them.
    #[error("{0} does not accept test filters")]
    FiltersNotSupported(String),

    /// Collect-tests-only mode was requested but the remote test cannot honor it.
    #[error("{0} does not support collect-tests-only mode")]
    CollectOnlyNotSupported(String),

    /// The device went away during the run.
    #[error(transparent)]
    DeviceUnavailable(#[from] DeviceUnavailableError),
}

/// An error that occurred while reading devtest configuration.
#[derive(Debug, Error)]
#[error("failed to parse devtest config at `{config_file}`")]
#[non_exhaustive]
pub struct ConfigParseError {
    config_file: Utf8PathBuf,
    #[source]
    kind: ConfigParseErrorKind,
}

impl ConfigParseError {
    pub(crate) fn new(config_file: impl Into<Utf8PathBuf>, kind: ConfigParseErrorKind) -> Self {
        Self {
            config_file: config_file.into(),
            kind,
        }
    }

    /// Returns the config file that failed to parse.
    pub fn config_file(&self) -> &Utf8PathBuf {
        &self.config_file
    }

    /// Returns the kind of error that occurred.
    pub fn kind(&self) -> &ConfigParseErrorKind {
        &self.kind
    }
}

/// The kind of a [`ConfigParseError`].
#[derive(Debug, Error)]
#[non_exhaustive]
pub enum ConfigParseErrorKind {
    /// The layered config could not be built.
    #[error("error building config")]
    BuildError(#[source] Box<ConfigError>),

    /// The config could not be deserialized.
    #[error("error deserializing config")]
    DeserializeError(#[source] Box<ConfigError>),

    /// A config value was invalid.
    #[error("invalid value for `{key}`: {message}")]
    InvalidValue {
        /// The config key.
        key: &'static str,
        /// What was wrong.
        message: String,
    },
}

/// An error produced while generating a coverage report.
#[derive(Debug, Error)]
#[non_exhaustive]
pub enum ReportGenerationError {
    /// A filesystem operation failed.
    #[error("I/O error while generating {format} coverage report")]
    Io {
        /// The report format being generated.
        format: CoverageReportFormat,
        /// The underlying error.
        #[source]
        error: io::Error,
    },

    /// The report tool exited unsuccessfully.
    #[error("failed to generate code coverage report: {stderr}")]
    ToolFailed {
        /// The exit code, if the process exited normally.
        exit_code: Option<i32>,
        /// Standard error from the tool.
        stderr: String,
    },

    /// The report tool did not complete in time and was killed.
    #[error("coverage report generation timed out after {timeout:?}")]
    Timeout {
        /// The timeout that was exceeded.
        timeout: Duration,
    },

    /// Searching for metadata files failed.
    #[error("error searching metadata files under `{dir}`")]
    MetadataWalk {
        /// The directory being searched.
        dir: Utf8PathBuf,
        /// The underlying error.
        #[source]
        error: walkdir::Error,
    },

    /// A metadata glob was invalid.
    #[error("invalid metadata glob `{glob}`")]
    InvalidGlob {
        /// The glob that failed to compile.
        glob: String,
        /// The underlying error.
        #[source]
        error: globset::Error,
    },
}

/// An error produced while compressing a report directory.
#[derive(Debug, Error)]
#[error("failed to compress `{dir}`")]
pub struct CompressionError {
    dir: Utf8PathBuf,
    #[source]
    error: io::Error,
}

impl CompressionError {
    pub(crate) fn new(dir: impl Into<Utf8PathBuf>, error: io::Error) -> Self {
        Self {
            dir: dir.into(),
            error,
        }
    }
}

/// An error produced by a [`CoverageRunner`](crate::coverage::CoverageRunner).
#[derive(Debug, Error)]
#[non_exhaustive]
pub enum CoverageError {
    /// No instrumentation targets matched the configured filters.
    #[error("no instrumentation targets found")]
    NoInstrumentationTargets,

    /// The device went away during the run.
    #[error(transparent)]
    DeviceUnavailable(#[from] DeviceUnavailableError),

    /// The private artifact directory could not be created.
    #[error("failed to create coverage artifact directory")]
    TempDirCreate(#[source] io::Error),

    /// A report could not be generated.
    #[error("failed to generate {format} coverage report")]
    ReportGeneration {
        /// The format being generated.
        format: CoverageReportFormat,
        /// The underlying error.
        #[source]
        error: ReportGenerationError,
    },

    /// A report directory could not be compressed.
    #[error(transparent)]
    Compression(#[from] CompressionError),
}
