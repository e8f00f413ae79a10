// Copyright (c) The devtest Contributors
// SPDX-License-Identifier: MIT OR Apache-2.0

//! Configuration for host test runs and coverage runs.
//!
//! devtest configuration is layered: the embedded [`DevtestConfig::DEFAULT_CONFIG`] is read
//! first, and an optional user-provided TOML file is layered on top of it. Unknown keys are not an
//! error, but are reported through [`ConfigWarnings`].

use crate::{
    coverage::CoverageReportFormat,
    errors::{ConfigParseError, ConfigParseErrorKind},
    partition::ShardPlan,
};
use camino::{Utf8Path, Utf8PathBuf};
use config::{Config, ConfigBuilder, File, FileFormat, builder::DefaultState};
use itertools::Itertools;
use serde::Deserialize;
use std::{
    collections::{BTreeMap, BTreeSet},
    time::Duration,
};
use tracing::{debug, warn};

/// Trait for handling configuration warnings.
///
/// The default implementation, [`DefaultConfigWarnings`], logs warnings through `tracing`.
pub trait ConfigWarnings {
    /// Handle unknown configuration keys found in a config file.
    fn unknown_config_keys(&mut self, config_file: &Utf8Path, unknown: &BTreeSet<String>);
}

/// Logs configuration warnings with `tracing`.
#[derive(Clone, Copy, Debug, Default)]
pub struct DefaultConfigWarnings;

impl ConfigWarnings for DefaultConfigWarnings {
    fn unknown_config_keys(&mut self, config_file: &Utf8Path, unknown: &BTreeSet<String>) {
        if unknown.len() == 1 {
            warn!(
                "in config file {config_file}, ignoring unknown configuration key: {}",
                unknown.iter().join("")
            );
        } else {
            warn!(
                "in config file {config_file}, ignoring unknown configuration keys: {}",
                unknown.iter().join(", ")
            );
        }
    }
}

/// Overall devtest configuration.
#[derive(Clone, Debug, Deserialize)]
#[serde(rename_all = "kebab-case")]
pub struct DevtestConfig {
    /// Host test settings.
    pub host: HostConfig,

    /// Coverage run settings.
    pub coverage: CoverageConfig,
}

impl DevtestConfig {
    /// Contains the default config as a TOML file.
    pub const DEFAULT_CONFIG: &'static str = include_str!("../default-config.toml");

    /// Reads the default config layered under `config_file`, if one is given.
    pub fn from_sources(
        config_file: Option<&Utf8Path>,
        warnings: &mut impl ConfigWarnings,
    ) -> Result<Self, ConfigParseError> {
        let mut builder = Self::make_default_config();
        let origin = match config_file {
            Some(file) => {
                builder = builder.add_source(File::new(file.as_str(), FileFormat::Toml));
                file.to_owned()
            }
            None => Utf8PathBuf::from("<default config>"),
        };
        Self::build(builder, &origin, warnings)
    }

    /// Reads the default config layered under `contents`, a TOML document.
    ///
    /// `origin` is only used for error reporting.
    pub fn from_toml_str(
        contents: &str,
        origin: &Utf8Path,
        warnings: &mut impl ConfigWarnings,
    ) -> Result<Self, ConfigParseError> {
        let builder =
            Self::make_default_config().add_source(File::from_str(contents, FileFormat::Toml));
        Self::build(builder, origin, warnings)
    }

    /// Returns the default config.
    pub fn default_config() -> Result<Self, ConfigParseError> {
        Self::from_sources(None, &mut DefaultConfigWarnings)
    }

    fn make_default_config() -> ConfigBuilder<DefaultState> {
        Config::builder().add_source(File::from_str(Self::DEFAULT_CONFIG, FileFormat::Toml))
    }

    fn build(
        builder: ConfigBuilder<DefaultState>,
        origin: &Utf8Path,
        warnings: &mut impl ConfigWarnings,
    ) -> Result<Self, ConfigParseError> {
        let config = builder.build().map_err(|error| {
            ConfigParseError::new(origin, ConfigParseErrorKind::BuildError(Box::new(error)))
        })?;

        let mut unknown = BTreeSet::new();
        let this: DevtestConfig =
            serde_ignored::deserialize(config, |path: serde_ignored::Path| {
                unknown.insert(path.to_string());
            })
            .map_err(|error| {
                ConfigParseError::new(
                    origin,
                    ConfigParseErrorKind::DeserializeError(Box::new(error)),
                )
            })?;

        if !unknown.is_empty() {
            warnings.unknown_config_keys(origin, &unknown);
        }

        this.validate()
            .map_err(|kind| ConfigParseError::new(origin, kind))?;
        debug!(%origin, "loaded devtest config");
        Ok(this)
    }

    fn validate(&self) -> Result<(), ConfigParseErrorKind> {
        if self.coverage.max_tests_per_chunk == Some(0) {
            return Err(ConfigParseErrorKind::InvalidValue {
                key: "coverage.max-tests-per-chunk",
                message: "must be at least 1".to_owned(),
            });
        }
        if self.coverage.report_formats.is_empty() {
            return Err(ConfigParseErrorKind::InvalidValue {
                key: "coverage.report-formats",
                message: "at least one report format is required".to_owned(),
            });
        }
        Ok(())
    }
}

/// Settings for [`HostTest`](crate::host_test::HostTest).
#[derive(Clone, Debug, Deserialize, Eq, PartialEq)]
#[serde(rename_all = "kebab-case", default)]
pub struct HostConfig {
    /// The test classes to run, in order.
    pub classes: Vec<String>,

    /// Restricts the run to a single method. Only valid with a single class.
    pub method: Option<String>,

    /// Only run tests carrying at least one of these annotations.
    pub include_annotations: BTreeSet<String>,

    /// Never run tests carrying any of these annotations.
    pub exclude_annotations: BTreeSet<String>,

    /// Name filters: `pkg`, `pkg.Cls` or `pkg.Cls#method`.
    pub include_filters: BTreeSet<String>,

    /// Name filters for tests to skip.
    pub exclude_filters: BTreeSet<String>,

    /// Report tests without executing them.
    pub collect_tests_only: bool,

    /// The expected runtime of the whole host test, used to size shards.
    #[serde(with = "humantime_serde")]
    pub runtime_hint: Duration,

    /// Run only one shard of the configured classes.
    pub shard: Option<ShardPlan>,
}

impl Default for HostConfig {
    fn default() -> Self {
        Self {
            classes: Vec::new(),
            method: None,
            include_annotations: BTreeSet::new(),
            exclude_annotations: BTreeSet::new(),
            include_filters: BTreeSet::new(),
            exclude_filters: BTreeSet::new(),
            collect_tests_only: false,
            runtime_hint: Duration::from_secs(60),
            shard: None,
        }
    }
}

/// Settings for [`CoverageRunner`](crate::coverage::CoverageRunner).
#[derive(Clone, Debug, Deserialize, Eq, PartialEq)]
#[serde(rename_all = "kebab-case", default)]
pub struct CoverageConfig {
    /// Only run instrumentation targets in these packages. Empty means all packages.
    pub packages: Vec<String>,

    /// Only run instrumentation targets using these runners. Empty means all runners.
    pub runners: Vec<String>,

    /// Extra arguments passed to every instrumentation run.
    pub instrumentation_args: BTreeMap<String, String>,

    /// The maximum number of tests to run in one instrumentation invocation.
    pub max_tests_per_chunk: Option<usize>,

    /// The report formats to generate.
    pub report_formats: Vec<CoverageReportFormat>,

    /// How long report generation may take before it is killed.
    #[serde(with = "humantime_serde")]
    pub report_timeout: Duration,

    /// The program used to generate reports.
    pub reporter: String,

    /// The directory searched for coverage metadata files.
    pub metadata_dir: Option<Utf8PathBuf>,

    /// Glob patterns, relative to `metadata-dir`, selecting coverage metadata files.
    pub metadata_globs: Vec<String>,
}

impl Default for CoverageConfig {
    fn default() -> Self {
        Self {
            packages: Vec::new(),
            runners: Vec::new(),
            instrumentation_args: BTreeMap::new(),
            max_tests_per_chunk: None,
            report_formats: vec![CoverageReportFormat::Html],
            report_timeout: Duration::from_secs(300),
            reporter: "coverage-report".to_owned(),
            metadata_dir: None,
            metadata_globs: vec!["**/*.em".to_owned()],
        }
    }
}
