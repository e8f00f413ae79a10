// Copyright (c) The devtest Contributors
// SPDX-License-Identifier: MIT OR Apache-2.0

use crate::{
    errors::CoverageError,
    listener::{EventListener, TestLog},
};
use camino::{Utf8Path, Utf8PathBuf};
use camino_tempfile::Utf8TempDir;
use devtest_metadata::{LogDataType, ResultEvent};
use tracing::{debug, error, warn};

/// A coverage data file saved during a run.
#[derive(Clone, Debug, Eq, PartialEq)]
pub struct CoverageArtifact {
    /// The path the data was logged from. It may no longer exist.
    pub source: Utf8PathBuf,

    /// The saved copy, inside the collector's private directory.
    pub temp_copy: Utf8PathBuf,
}

/// Forwards events downstream, saving logged coverage data into a private temporary directory
/// instead of forwarding it.
///
/// The directory and everything in it is deleted when the collector is closed or dropped.
pub struct CoverageCollector<'a> {
    downstream: &'a mut dyn EventListener,
    dir: Utf8TempDir,
    artifacts: Vec<CoverageArtifact>,
}

impl<'a> CoverageCollector<'a> {
    /// Creates a new collector forwarding to `downstream`.
    pub fn new(downstream: &'a mut dyn EventListener) -> Result<Self, CoverageError> {
        let dir = camino_tempfile::Builder::new()
            .prefix("devtest-coverage-")
            .tempdir()
            .map_err(CoverageError::TempDirCreate)?;
        debug!(dir = %dir.path(), "created coverage artifact directory");
        Ok(Self {
            downstream,
            dir,
            artifacts: Vec::new(),
        })
    }

    /// Returns the private directory artifacts are saved into.
    pub fn dir(&self) -> &Utf8Path {
        self.dir.path()
    }

    /// Returns the artifacts saved so far, in the order they were logged.
    pub fn artifacts(&self) -> &[CoverageArtifact] {
        &self.artifacts
    }

    /// Returns the downstream listener.
    pub fn downstream(&mut self) -> &mut dyn EventListener {
        &mut *self.downstream
    }

    /// Deletes the private directory. Failures are logged, not returned.
    pub fn close(self) {
        let path = self.dir.path().to_owned();
        if let Err(error) = self.dir.close() {
            warn!(dir = %path, %error, "failed to delete coverage artifact directory");
        }
    }

    fn save(&mut self, log: &TestLog<'_>) -> std::io::Result<Utf8PathBuf> {
        let file_name = format!(
            "{}_{}.{}",
            log.name,
            self.artifacts.len(),
            LogDataType::Coverage.file_ext()
        );
        let temp_copy = self.dir.path().join(file_name);
        std::fs::copy(log.path, &temp_copy)?;
        Ok(temp_copy)
    }
}

impl std::fmt::Debug for CoverageCollector<'_> {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("CoverageCollector")
            .field("dir", &self.dir.path())
            .field("artifacts", &self.artifacts)
            .finish_non_exhaustive()
    }
}

impl EventListener for CoverageCollector<'_> {
    fn report_event(&mut self, event: &ResultEvent) {
        self.downstream.report_event(event);
    }

    fn report_log(&mut self, log: &TestLog<'_>) {
        if log.data_type != LogDataType::Coverage {
            self.downstream.report_log(log);
            return;
        }

        match self.save(log) {
            Ok(temp_copy) => {
                debug!(source = %log.path, %temp_copy, "saved coverage file");
                self.artifacts.push(CoverageArtifact {
                    source: log.path.to_owned(),
                    temp_copy,
                });
            }
            Err(err) => {
                error!(source = %log.path, error = %err, "failed to save coverage file");
            }
        }
    }
}
