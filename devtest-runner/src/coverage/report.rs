// Copyright (c) The devtest Contributors
// SPDX-License-Identifier: MIT OR Apache-2.0

use super::CoverageArtifact;
use crate::{config::CoverageConfig, errors::ReportGenerationError};
use camino::{Utf8Path, Utf8PathBuf};
use devtest_metadata::LogDataType;
use globset::{Glob, GlobSetBuilder};
use serde::Deserialize;
use std::{
    fmt, io,
    time::{Duration, Instant},
};
use tracing::{debug, warn};
use walkdir::WalkDir;

/// A coverage report output format.
#[derive(Clone, Copy, Debug, Deserialize, Eq, Hash, PartialEq)]
#[serde(rename_all = "lowercase")]
pub enum CoverageReportFormat {
    /// A directory of HTML pages.
    Html,
    /// A single CSV file.
    Csv,
    /// A single XML file.
    Xml,
}

impl CoverageReportFormat {
    /// Returns the data type a report in this format is logged with.
    pub fn log_data_type(self) -> LogDataType {
        match self {
            Self::Html => LogDataType::Html,
            Self::Csv => LogDataType::Csv,
            Self::Xml => LogDataType::Xml,
        }
    }

    /// Returns the name of the file the reporter writes into its report directory, or `None` if
    /// the report is the directory itself.
    pub fn report_file_name(self) -> Option<&'static str> {
        match self {
            Self::Html => None,
            Self::Csv => Some("report.csv"),
            Self::Xml => Some("report.xml"),
        }
    }

    fn as_str(self) -> &'static str {
        match self {
            Self::Html => "html",
            Self::Csv => "csv",
            Self::Xml => "xml",
        }
    }
}

impl fmt::Display for CoverageReportFormat {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

/// Generates a human-readable report from collected coverage data.
pub trait ReportGenerator {
    /// Generates a report in `format` from `artifacts`.
    ///
    /// `out_dir` is an empty scratch directory owned by the caller, which deletes it afterwards.
    /// Returns the path to the report, which may be a file or a directory.
    fn generate(
        &self,
        artifacts: &[CoverageArtifact],
        format: CoverageReportFormat,
        out_dir: &Utf8Path,
    ) -> Result<Utf8PathBuf, ReportGenerationError>;
}

const POLL_INTERVAL: Duration = Duration::from_millis(50);

/// Generates reports by running an external reporter program.
///
/// The reporter is invoked as:
///
/// ```text
/// <program> [args...] --metadata-file <f>... --coverage-file <f>... --report-dir <dir> --report-type <format>
/// ```
///
/// and is expected to write `report.csv` or `report.xml` into the report directory, or for HTML
/// reports, to fill the directory with pages.
#[derive(Clone, Debug)]
pub struct CommandReportGenerator {
    program: String,
    args: Vec<String>,
    metadata_dir: Option<Utf8PathBuf>,
    metadata_globs: Vec<String>,
    timeout: Duration,
}

impl CommandReportGenerator {
    /// Creates a generator running `program`, with no metadata files and a five minute timeout.
    pub fn new(program: impl Into<String>) -> Self {
        Self {
            program: program.into(),
            args: Vec::new(),
            metadata_dir: None,
            metadata_globs: Vec::new(),
            timeout: Duration::from_secs(300),
        }
    }

    /// Creates a generator from coverage configuration.
    pub fn from_config(config: &CoverageConfig) -> Self {
        let mut generator = Self::new(config.reporter.clone()).with_timeout(config.report_timeout);
        if let Some(dir) = &config.metadata_dir {
            generator = generator.with_metadata(dir.clone(), config.metadata_globs.iter().cloned());
        }
        generator
    }

    /// Adds arguments passed to the program before the generated ones.
    pub fn with_args<I>(mut self, args: I) -> Self
    where
        I: IntoIterator,
        I::Item: Into<String>,
    {
        self.args.extend(args.into_iter().map(Into::into));
        self
    }

    /// Selects metadata files from `dir` matching any of `globs`.
    pub fn with_metadata<I>(mut self, dir: impl Into<Utf8PathBuf>, globs: I) -> Self
    where
        I: IntoIterator,
        I::Item: Into<String>,
    {
        self.metadata_dir = Some(dir.into());
        self.metadata_globs = globs.into_iter().map(Into::into).collect();
        self
    }

    /// Sets how long the reporter may run before it is killed.
    pub fn with_timeout(mut self, timeout: Duration) -> Self {
        self.timeout = timeout;
        self
    }

    /// Returns the metadata files passed to the reporter, sorted by path.
    pub fn metadata_files(&self) -> Result<Vec<Utf8PathBuf>, ReportGenerationError> {
        let Some(dir) = &self.metadata_dir else {
            return Ok(Vec::new());
        };

        let mut builder = GlobSetBuilder::new();
        for glob in &self.metadata_globs {
            let glob = Glob::new(glob).map_err(|error| ReportGenerationError::InvalidGlob {
                glob: glob.clone(),
                error,
            })?;
            builder.add(glob);
        }
        let glob_set = builder
            .build()
            .map_err(|error| ReportGenerationError::InvalidGlob {
                glob: self.metadata_globs.join(", "),
                error,
            })?;

        let mut files = Vec::new();
        for entry in WalkDir::new(dir).sort_by_file_name() {
            let entry = entry.map_err(|error| ReportGenerationError::MetadataWalk {
                dir: dir.clone(),
                error,
            })?;
            if !entry.file_type().is_file() {
                continue;
            }
            let Ok(relative) = entry.path().strip_prefix(dir) else {
                continue;
            };
            if !glob_set.is_match(relative) {
                continue;
            }
            match Utf8PathBuf::try_from(entry.into_path()) {
                Ok(path) => files.push(path),
                Err(error) => warn!(
                    path = %error.as_path().display(),
                    "skipping metadata file with a non-UTF-8 path",
                ),
            }
        }
        Ok(files)
    }

    fn run_reporter(&self, args: Vec<String>) -> Result<(), RunError> {
        let start = Instant::now();
        let handle = duct::cmd(self.program.as_str(), self.args.iter().chain(&args))
            .stdin_null()
            .stdout_capture()
            .stderr_capture()
            .unchecked()
            .start()
            .map_err(RunError::Io)?;

        loop {
            if let Some(output) = handle.try_wait().map_err(RunError::Io)? {
                if output.status.success() {
                    return Ok(());
                }
                return Err(RunError::Generation(ReportGenerationError::ToolFailed {
                    exit_code: output.status.code(),
                    stderr: String::from_utf8_lossy(&output.stderr).trim_end().to_owned(),
                }));
            }
            if start.elapsed() >= self.timeout {
                if let Err(error) = handle.kill() {
                    warn!(program = %self.program, %error, "failed to kill reporter");
                }
                return Err(RunError::Generation(ReportGenerationError::Timeout {
                    timeout: self.timeout,
                }));
            }
            std::thread::sleep(POLL_INTERVAL);
        }
    }
}

enum RunError {
    Io(io::Error),
    Generation(ReportGenerationError),
}

impl ReportGenerator for CommandReportGenerator {
    fn generate(
        &self,
        artifacts: &[CoverageArtifact],
        format: CoverageReportFormat,
        out_dir: &Utf8Path,
    ) -> Result<Utf8PathBuf, ReportGenerationError> {
        let io_error = |error: io::Error| ReportGenerationError::Io { format, error };

        let report_dir = out_dir.join(format!("{format}-report"));
        std::fs::create_dir_all(&report_dir).map_err(io_error)?;

        let mut args = Vec::new();
        for metadata in self.metadata_files()? {
            args.push("--metadata-file".to_owned());
            args.push(metadata.into_string());
        }
        for artifact in artifacts {
            args.push("--coverage-file".to_owned());
            args.push(artifact.temp_copy.to_string());
        }
        args.extend([
            "--report-dir".to_owned(),
            report_dir.to_string(),
            "--report-type".to_owned(),
            format.to_string(),
        ]);

        debug!(
            program = %self.program,
            %format,
            artifacts = artifacts.len(),
            "generating coverage report",
        );
        self.run_reporter(args).map_err(|error| match error {
            RunError::Io(error) => io_error(error),
            RunError::Generation(error) => error,
        })?;

        match format.report_file_name() {
            None => Ok(report_dir),
            Some(file_name) => {
                let report = out_dir.join(format!("coverage.{}", format.log_data_type().file_ext()));
                std::fs::copy(report_dir.join(file_name), &report).map_err(io_error)?;
                Ok(report)
            }
        }
    }
}
