// Copyright (c) The devtest Contributors
// SPDX-License-Identifier: MIT OR Apache-2.0

//! Coverage runs over instrumentation targets.
//!
//! A [`CoverageRunner`] discovers the instrumentation targets installed on a device and runs each
//! of them with coverage enabled, optionally split into chunks. If a chunk fails or produces no
//! coverage data, its tests are re-run one at a time through a
//! [`RetryingExecutor`](crate::retry::RetryingExecutor), so that a single crashing test only loses
//! its own coverage. Collected data is then handed to a [`ReportGenerator`] once per report
//! format.

mod collector;
mod compress;
mod report;
mod targets;

pub use collector::*;
pub use compress::*;
pub use report::*;
pub use targets::*;
pub use test::*;

use crate::{
    config::CoverageConfig,
    device::Device,
    errors::{CoverageError, DeviceUnavailableError, ReportGenerationError},
    helpers::plural,
    listener::{CollectingListener, EventListener, ListenerFanOut, RunResult, TestLog},
    remote::RemoteTest,
    retry::RetryingExecutor,
};
use camino::Utf8Path;
use debug_ignore::DebugIgnore;
use devtest_metadata::TestIdentifier;
use tracing::{debug, info, warn};

/// Runs instrumentation targets with coverage enabled and reports on the collected data.
#[derive(Debug)]
pub struct CoverageRunner {
    config: CoverageConfig,
    generator: DebugIgnore<Box<dyn ReportGenerator>>,
    compression: DebugIgnore<Box<dyn CompressionStrategy>>,
    executor: RetryingExecutor,
}

impl CoverageRunner {
    /// Creates a runner that generates reports with a [`CommandReportGenerator`] and compresses
    /// report directories with [`TarZstdCompression`].
    pub fn new(config: CoverageConfig) -> Self {
        let generator = CommandReportGenerator::from_config(&config);
        Self {
            config,
            generator: DebugIgnore(Box::new(generator)),
            compression: DebugIgnore(Box::new(TarZstdCompression::default())),
            executor: RetryingExecutor::new(),
        }
    }

    /// Replaces the report generator.
    pub fn with_report_generator(mut self, generator: impl ReportGenerator + 'static) -> Self {
        self.generator = DebugIgnore(Box::new(generator));
        self
    }

    /// Replaces the compression strategy used for report directories.
    pub fn with_compression(mut self, compression: impl CompressionStrategy + 'static) -> Self {
        self.compression = DebugIgnore(Box::new(compression));
        self
    }

    /// Returns the configuration.
    pub fn config(&self) -> &CoverageConfig {
        &self.config
    }

    /// Runs every matching instrumentation target on `device` and logs one report per configured
    /// format to `listener`.
    ///
    /// Coverage data is collected into a private directory, which is deleted before this returns
    /// whether or not the run succeeded.
    pub fn run(
        &self,
        device: &mut dyn Device,
        listener: &mut dyn EventListener,
    ) -> Result<(), CoverageError> {
        let mut collector = CoverageCollector::new(listener)?;
        let result = self
            .run_targets(device, &mut collector)
            .and_then(|()| self.generate_reports(&mut collector));
        collector.close();
        result
    }

    fn run_targets(
        &self,
        device: &mut dyn Device,
        collector: &mut CoverageCollector<'_>,
    ) -> Result<(), CoverageError> {
        let targets = discover_targets(device, &self.config.packages, &self.config.runners)?;
        if targets.is_empty() {
            return Err(CoverageError::NoInstrumentationTargets);
        }

        for target in &targets {
            let shard_count = self.shard_count(device, target)?;
            info!(
                %target,
                "running with coverage in {shard_count} {}",
                plural::shards_str(shard_count),
            );

            for shard_index in 0..shard_count {
                let mut test = CoverageTest::for_shard(
                    target,
                    &self.config.instrumentation_args,
                    shard_index,
                    shard_count,
                );
                let run = run_and_collect(&mut test, device, collector)?;
                if self.shard_succeeded(device, &run)? {
                    continue;
                }

                let tests = self.collect_tests(device, target, shard_index, shard_count)?;
                let run_failure = run.run_failure_message().unwrap_or_default();
                warn!(
                    %target,
                    shard_index,
                    run_failure = %run_failure,
                    "shard did not produce coverage, re-running {} {} individually",
                    tests.len(),
                    plural::tests_str(tests.len()),
                );
                for id in &tests {
                    let mut test =
                        CoverageTest::for_test(target, &self.config.instrumentation_args, id);
                    self.executor.run_one(&mut test, id, device, collector)?;
                }
            }
        }
        Ok(())
    }

    fn shard_succeeded(
        &self,
        device: &mut dyn Device,
        run: &RunResult,
    ) -> Result<bool, DeviceUnavailableError> {
        if run.is_run_failure() {
            return Ok(false);
        }
        match run.metrics.get(COVERAGE_FILE_METRIC) {
            Some(file) => device.does_file_exist(file),
            None => Ok(false),
        }
    }

    /// Returns the number of chunks `target` is split into.
    ///
    /// A target is split only if a chunk size is configured and its runner supports sharding,
    /// which is detected by checking whether the first of two shards holds fewer tests than the
    /// whole target.
    pub fn shard_count(
        &self,
        device: &mut dyn Device,
        target: &InstrumentationTarget,
    ) -> Result<usize, DeviceUnavailableError> {
        let Some(max_tests) = self.config.max_tests_per_chunk else {
            return Ok(1);
        };

        let total = self.collect_tests(device, target, 0, 1)?.len();
        let half = self.collect_tests(device, target, 0, 2)?.len();
        if half >= total {
            debug!(%target, "runner does not support sharding");
            return Ok(1);
        }
        Ok(total.div_ceil(max_tests.max(1)).max(1))
    }

    /// Lists the tests in one shard of `target` without running them.
    pub fn collect_tests(
        &self,
        device: &mut dyn Device,
        target: &InstrumentationTarget,
        shard_index: usize,
        shard_count: usize,
    ) -> Result<Vec<TestIdentifier>, DeviceUnavailableError> {
        let test = CoverageTest::for_shard(
            target,
            &self.config.instrumentation_args,
            shard_index,
            shard_count,
        );
        let mut spec = test.spec().clone();
        spec.collect_tests_only = true;

        let mut listener = CollectingListener::new();
        device.run_instrumentation_tests(&spec, &mut listener)?;
        Ok(listener
            .current_run()
            .map(|run| run.completed_tests().cloned().collect())
            .unwrap_or_default())
    }

    fn generate_reports(&self, collector: &mut CoverageCollector<'_>) -> Result<(), CoverageError> {
        let scratch = camino_tempfile::Builder::new()
            .prefix("devtest-report-")
            .tempdir()
            .map_err(CoverageError::TempDirCreate)?;
        let result = self.generate_reports_in(scratch.path(), collector);

        let path = scratch.path().to_owned();
        if let Err(error) = scratch.close() {
            warn!(dir = %path, %error, "failed to delete report directory");
        }
        result
    }

    fn generate_reports_in(
        &self,
        scratch: &Utf8Path,
        collector: &mut CoverageCollector<'_>,
    ) -> Result<(), CoverageError> {
        for &format in &self.config.report_formats {
            let out_dir = scratch.join(format.to_string());
            std::fs::create_dir_all(&out_dir).map_err(|error| CoverageError::ReportGeneration {
                format,
                error: ReportGenerationError::Io { format, error },
            })?;

            let report = self
                .generator
                .generate(collector.artifacts(), format, &out_dir)
                .map_err(|error| CoverageError::ReportGeneration { format, error })?;

            let (path, data_type) = if report.is_dir() {
                let archive = self.compression.compress(&report, &out_dir)?;
                (archive, self.compression.log_data_type())
            } else {
                (report, format.log_data_type())
            };

            info!(%format, %path, "logging coverage report");
            collector.downstream().report_log(&TestLog {
                name: COVERAGE_LOG_NAME,
                data_type,
                path: &path,
            });

            if let Err(error) = std::fs::remove_dir_all(&out_dir) {
                warn!(dir = %out_dir, %error, "failed to delete report");
            }
        }
        Ok(())
    }
}

/// Runs `test`, forwarding its events to `collector`, and returns the results of its run.
fn run_and_collect(
    test: &mut dyn RemoteTest,
    device: &mut dyn Device,
    collector: &mut CoverageCollector<'_>,
) -> Result<RunResult, DeviceUnavailableError> {
    let mut results = CollectingListener::new();
    {
        let mut fan_out = ListenerFanOut::new([
            &mut results as &mut dyn EventListener,
            collector as &mut dyn EventListener,
        ]);
        test.run(device, &mut fan_out)?;
    }
    Ok(results.current_run().cloned().unwrap_or_default())
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::{
        device::{InstrumentationSpec, OutputReceiver},
        listener::TestStatus,
    };
    use camino::Utf8PathBuf;
    use camino_tempfile::Utf8TempDir;
    use devtest_metadata::{LogDataType, Metrics, ResultEvent};
    use pretty_assertions::assert_eq;
    use std::{
        collections::BTreeSet,
        sync::{Arc, Mutex},
    };

    const PACKAGE: &str = "com.example.tests";

    struct FakeDevice {
        tests: Vec<TestIdentifier>,
        supports_sharding: bool,
        crashing: BTreeSet<TestIdentifier>,
        offline: bool,
        files: BTreeSet<String>,
        pulled: Utf8TempDir,
        runs: Vec<InstrumentationSpec>,
    }

    impl FakeDevice {
        fn new(test_count: usize) -> Self {
            Self {
                tests: (0..test_count)
                    .map(|i| TestIdentifier::new("com.example.FooTest", format!("test{i}")))
                    .collect(),
                supports_sharding: true,
                crashing: BTreeSet::new(),
                offline: false,
                files: BTreeSet::new(),
                pulled: Utf8TempDir::new().unwrap(),
                runs: Vec::new(),
            }
        }

        fn select(&self, spec: &InstrumentationSpec) -> Vec<TestIdentifier> {
            if let (Some(class), Some(method)) = (&spec.class_name, &spec.method_name) {
                return self
                    .tests
                    .iter()
                    .filter(|id| &id.class_name == class && &id.test_name == method)
                    .cloned()
                    .collect();
            }
            let shard = spec
                .args
                .get("shardIndex")
                .zip(spec.args.get("numShards"))
                .filter(|_| self.supports_sharding)
                .map(|(index, count)| {
                    (
                        index.parse::<usize>().unwrap(),
                        count.parse::<usize>().unwrap(),
                    )
                });
            self.tests
                .iter()
                .enumerate()
                .filter(|(i, _)| shard.is_none_or(|(index, count)| i % count == index))
                .map(|(_, id)| id.clone())
                .collect()
        }

        fn coverage_runs(&self) -> Vec<&InstrumentationSpec> {
            self.runs.iter().filter(|spec| !spec.collect_tests_only).collect()
        }
    }

    impl Device for FakeDevice {
        fn serial(&self) -> &str {
            "fake-1"
        }

        fn run_instrumentation_tests(
            &mut self,
            spec: &InstrumentationSpec,
            listener: &mut dyn EventListener,
        ) -> Result<(), DeviceUnavailableError> {
            if self.offline {
                return Err(DeviceUnavailableError::new(self.serial(), "offline"));
            }
            self.runs.push(spec.clone());
            let selected = self.select(spec);

            listener.report_event(&ResultEvent::run_started(spec.run_name(), selected.len()));
            for id in selected {
                listener.report_event(&ResultEvent::test_started(id.clone()));
                if !spec.collect_tests_only && self.crashing.contains(&id) {
                    listener.report_event(&ResultEvent::run_failed("Process crashed."));
                    listener.report_event(&ResultEvent::run_ended(0, Metrics::new()));
                    return Ok(());
                }
                listener.report_event(&ResultEvent::test_ended(id, Metrics::new()));
            }
            listener.report_event(&ResultEvent::run_ended(10, Metrics::new()));

            if !spec.collect_tests_only
                && let Some(file) = spec.args.get("coverageFile")
            {
                self.files.insert(file.clone());
            }
            Ok(())
        }

        fn execute_shell_command(
            &mut self,
            command: &str,
            receiver: &mut dyn OutputReceiver,
        ) -> Result<(), DeviceUnavailableError> {
            if command == LIST_INSTRUMENTATION_COMMAND {
                receiver.add_lines(&[
                    format!("instrumentation:{PACKAGE}/Runner (target=com.example)"),
                    "instrumentation:com.other.tests/Runner (target=com.other)".to_owned(),
                ]);
            } else if let Some(path) = command.strip_prefix("rm -f ") {
                self.files.remove(path);
            }
            receiver.flush();
            Ok(())
        }

        fn does_file_exist(&mut self, path: &str) -> Result<bool, DeviceUnavailableError> {
            Ok(self.files.contains(path))
        }

        fn pull_file(&mut self, path: &str) -> Result<Option<Utf8PathBuf>, DeviceUnavailableError> {
            let local = self.pulled.path().join(format!("pulled-{}.ec", self.runs.len()));
            std::fs::write(&local, path).unwrap();
            Ok(Some(local))
        }
    }

    #[derive(Clone, Default)]
    struct FakeGenerator {
        calls: Arc<Mutex<Vec<(CoverageReportFormat, Vec<CoverageArtifact>)>>>,
        fail: bool,
    }

    impl ReportGenerator for FakeGenerator {
        fn generate(
            &self,
            artifacts: &[CoverageArtifact],
            format: CoverageReportFormat,
            out_dir: &Utf8Path,
        ) -> Result<Utf8PathBuf, ReportGenerationError> {
            for artifact in artifacts {
                assert!(artifact.temp_copy.is_file(), "artifact exists during generation");
            }
            self.calls.lock().unwrap().push((format, artifacts.to_vec()));
            if self.fail {
                return Err(ReportGenerationError::ToolFailed {
                    exit_code: Some(1),
                    stderr: "no".to_owned(),
                });
            }
            match format {
                CoverageReportFormat::Html => {
                    let dir = out_dir.join("html");
                    std::fs::create_dir(&dir).unwrap();
                    std::fs::write(dir.join("index.html"), "").unwrap();
                    Ok(dir)
                }
                CoverageReportFormat::Csv | CoverageReportFormat::Xml => {
                    let file = out_dir.join(format!("coverage.{format}"));
                    std::fs::write(&file, "").unwrap();
                    Ok(file)
                }
            }
        }
    }

    fn runner(max_tests_per_chunk: Option<usize>, generator: &FakeGenerator) -> CoverageRunner {
        let config = CoverageConfig {
            packages: vec![PACKAGE.to_owned()],
            max_tests_per_chunk,
            report_formats: vec![CoverageReportFormat::Html, CoverageReportFormat::Xml],
            ..CoverageConfig::default()
        };
        CoverageRunner::new(config).with_report_generator(generator.clone())
    }

    #[test]
    fn shard_count_depends_on_sharding_support() {
        let generator = FakeGenerator::default();
        let target = InstrumentationTarget::new(PACKAGE, "Runner", "com.example");

        let mut device = FakeDevice::new(5);
        assert_eq!(runner(None, &generator).shard_count(&mut device, &target), Ok(1));
        assert!(device.runs.is_empty(), "unbounded chunks need no collection");
        assert_eq!(runner(Some(2), &generator).shard_count(&mut device, &target), Ok(3));
        assert_eq!(runner(Some(5), &generator).shard_count(&mut device, &target), Ok(1));

        device.supports_sharding = false;
        assert_eq!(runner(Some(2), &generator).shard_count(&mut device, &target), Ok(1));

        let mut empty = FakeDevice::new(0);
        assert_eq!(runner(Some(2), &generator).shard_count(&mut empty, &target), Ok(1));
    }

    #[test]
    fn sharded_run_collects_every_shard() {
        let generator = FakeGenerator::default();
        let mut device = FakeDevice::new(4);
        let mut listener = CollectingListener::new();
        runner(Some(2), &generator)
            .run(&mut device, &mut listener)
            .unwrap();

        let coverage_runs = device.coverage_runs();
        assert_eq!(coverage_runs.len(), 2);
        assert_eq!(coverage_runs[1].args["shardIndex"], "1");
        assert_eq!(coverage_runs[1].args["numShards"], "2");

        let calls = generator.calls.lock().unwrap();
        assert_eq!(calls.len(), 2);
        assert_eq!(calls[0].0, CoverageReportFormat::Html);
        assert_eq!(calls[0].1.len(), 2, "one artifact per shard");
        for artifact in &calls[0].1 {
            assert!(!artifact.temp_copy.exists(), "artifacts are deleted after the run");
        }

        assert_eq!(
            listener.logs(),
            [
                ("coverage".to_owned(), LogDataType::TarZstd),
                ("coverage".to_owned(), LogDataType::Xml),
            ]
        );
        assert_eq!(listener.runs().len(), 2);
        assert!(
            listener
                .runs()
                .iter()
                .all(|run| run.metrics.contains_key(COVERAGE_FILE_METRIC))
        );
    }

    #[test]
    fn failed_shard_falls_back_to_individual_tests() {
        let generator = FakeGenerator::default();
        let mut device = FakeDevice::new(4);
        let crashing = TestIdentifier::new("com.example.FooTest", "test1");
        device.crashing.insert(crashing.clone());

        let mut listener = CollectingListener::new();
        runner(Some(2), &generator)
            .run(&mut device, &mut listener)
            .unwrap();

        // Shard 0 and 1, then test1 twice and test3 once.
        let coverage_runs = device.coverage_runs();
        let single: Vec<_> = coverage_runs
            .iter()
            .filter_map(|spec| spec.method_name.as_deref())
            .collect();
        assert_eq!(single, ["test1", "test1", "test3"]);

        let calls = generator.calls.lock().unwrap();
        assert_eq!(calls[0].1.len(), 2, "shard 0 and test3 produced coverage");

        let synthetic = listener
            .runs()
            .iter()
            .find(|run| run.name == crashing.class_name)
            .expect("a synthetic run was reported");
        let result = &synthetic.tests[&crashing];
        assert_eq!(result.status, TestStatus::Failed);
        assert!(
            result.trace.as_deref().unwrap().contains("Process crashed."),
            "{result:?}"
        );
    }

    #[test]
    fn unsharded_runner_gets_no_shard_args() {
        let generator = FakeGenerator::default();
        let mut device = FakeDevice::new(4);
        device.supports_sharding = false;
        runner(Some(2), &generator)
            .run(&mut device, &mut CollectingListener::new())
            .unwrap();

        let coverage_runs = device.coverage_runs();
        assert_eq!(coverage_runs.len(), 1);
        assert!(!coverage_runs[0].args.contains_key("numShards"));
    }

    #[test]
    fn no_targets() {
        let generator = FakeGenerator::default();
        let config = CoverageConfig {
            packages: vec!["com.missing".to_owned()],
            ..CoverageConfig::default()
        };
        let err = CoverageRunner::new(config)
            .with_report_generator(generator.clone())
            .run(&mut FakeDevice::new(1), &mut CollectingListener::new())
            .unwrap_err();
        assert!(matches!(err, CoverageError::NoInstrumentationTargets), "{err:?}");
        assert!(generator.calls.lock().unwrap().is_empty());
    }

    #[test]
    fn report_failure_still_cleans_up() {
        let generator = FakeGenerator {
            fail: true,
            ..FakeGenerator::default()
        };
        let err = runner(None, &generator)
            .run(&mut FakeDevice::new(2), &mut CollectingListener::new())
            .unwrap_err();
        assert!(
            matches!(
                err,
                CoverageError::ReportGeneration {
                    format: CoverageReportFormat::Html,
                    ..
                }
            ),
            "{err:?}"
        );

        let calls = generator.calls.lock().unwrap();
        assert_eq!(calls.len(), 1, "generation stops at the first failure");
        for artifact in &calls[0].1 {
            assert!(!artifact.temp_copy.exists());
        }
    }

    #[test]
    fn device_unavailable_propagates() {
        let generator = FakeGenerator::default();
        let mut device = FakeDevice::new(2);
        device.offline = true;
        let err = runner(Some(1), &generator)
            .run(&mut device, &mut CollectingListener::new())
            .unwrap_err();
        assert!(matches!(err, CoverageError::DeviceUnavailable(_)), "{err:?}");
        assert!(generator.calls.lock().unwrap().is_empty());
    }
}
