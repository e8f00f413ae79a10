// Copyright (c) The devtest Contributors
// SPDX-License-Identifier: MIT OR Apache-2.0

use camino::Utf8PathBuf;
use camino_tempfile::Utf8TempDir;
use devtest_metadata::{LogDataType, Metrics, ResultEvent, TestIdentifier};
use devtest_runner::{
    device::{Device, InstrumentationSpec, OutputReceiver},
    errors::DeviceUnavailableError,
    listener::{EventListener, TestLog},
};
use std::{
    collections::{BTreeMap, BTreeSet},
    io::Read,
    sync::Once,
};

pub(crate) fn test_init() {
    static INIT: Once = Once::new();
    INIT.call_once(|| {
        let _ = color_eyre::install();
        let _ = tracing_subscriber::fmt()
            .with_test_writer()
            .with_max_level(tracing::Level::DEBUG)
            .try_init();
    });
}

/// A device whose shell output, files and instrumentation tests are scripted up front.
///
/// Instrumentation runs honor `shardIndex`/`numShards` and single-method selection. When a run
/// passes `coverageFile`, that file is created holding the names of the tests that ran.
pub(crate) struct ScriptedDevice {
    shell_output: BTreeMap<String, Vec<String>>,
    files: BTreeMap<String, String>,
    instrumentation: BTreeMap<String, Vec<TestIdentifier>>,
    crashing: BTreeSet<TestIdentifier>,
    scratch: Utf8TempDir,
    pub(crate) commands: Vec<String>,
    pub(crate) runs: Vec<InstrumentationSpec>,
}

impl ScriptedDevice {
    pub(crate) fn new() -> Self {
        Self {
            shell_output: BTreeMap::new(),
            files: BTreeMap::new(),
            instrumentation: BTreeMap::new(),
            crashing: BTreeSet::new(),
            scratch: Utf8TempDir::new().expect("created scratch dir"),
            commands: Vec::new(),
            runs: Vec::new(),
        }
    }

    pub(crate) fn with_shell_output(mut self, command: &str, output: &str) -> Self {
        self.shell_output.insert(
            command.to_owned(),
            output.lines().map(str::to_owned).collect(),
        );
        self
    }

    pub(crate) fn with_file(mut self, path: &str, contents: &str) -> Self {
        self.files.insert(path.to_owned(), contents.to_owned());
        self
    }

    pub(crate) fn with_instrumentation(mut self, package: &str, class: &str, count: usize) -> Self {
        let tests = (0..count)
            .map(|i| TestIdentifier::new(class, format!("test{i}")))
            .collect();
        self.instrumentation.insert(package.to_owned(), tests);
        self
    }

    pub(crate) fn with_crashing(mut self, id: TestIdentifier) -> Self {
        self.crashing.insert(id);
        self
    }

    fn select(&self, spec: &InstrumentationSpec) -> Vec<TestIdentifier> {
        let tests = self
            .instrumentation
            .get(&spec.package_name)
            .cloned()
            .unwrap_or_default();
        if let (Some(class), Some(method)) = (&spec.class_name, &spec.method_name) {
            return tests
                .into_iter()
                .filter(|id| &id.class_name == class && &id.test_name == method)
                .collect();
        }
        match (spec.args.get("shardIndex"), spec.args.get("numShards")) {
            (Some(index), Some(count)) => {
                let index: usize = index.parse().expect("valid shard index");
                let count: usize = count.parse().expect("valid shard count");
                tests
                    .into_iter()
                    .enumerate()
                    .filter(|(i, _)| i % count == index)
                    .map(|(_, id)| id)
                    .collect()
            }
            _ => tests,
        }
    }
}

impl Device for ScriptedDevice {
    fn serial(&self) -> &str {
        "scripted-1"
    }

    fn run_instrumentation_tests(
        &mut self,
        spec: &InstrumentationSpec,
        listener: &mut dyn EventListener,
    ) -> Result<(), DeviceUnavailableError> {
        self.runs.push(spec.clone());
        let selected = self.select(spec);

        listener.report_event(&ResultEvent::run_started(spec.run_name(), selected.len()));
        let mut ran = Vec::new();
        for id in selected {
            listener.report_event(&ResultEvent::test_started(id.clone()));
            if !spec.collect_tests_only && self.crashing.contains(&id) {
                listener.report_event(&ResultEvent::run_failed("Instrumentation run failed due to 'Process crashed.'"));
                listener.report_event(&ResultEvent::run_ended(0, Metrics::new()));
                return Ok(());
            }
            ran.push(id.test_name.clone());
            listener.report_event(&ResultEvent::test_ended(id, Metrics::new()));
        }
        listener.report_event(&ResultEvent::run_ended(5, Metrics::new()));

        if !spec.collect_tests_only
            && let Some(file) = spec.args.get("coverageFile")
        {
            self.files.insert(file.clone(), ran.join(","));
        }
        Ok(())
    }

    fn execute_shell_command(
        &mut self,
        command: &str,
        receiver: &mut dyn OutputReceiver,
    ) -> Result<(), DeviceUnavailableError> {
        self.commands.push(command.to_owned());
        if let Some(path) = command.strip_prefix("rm -f ") {
            self.files.remove(path);
        } else if let Some(lines) = self.shell_output.get(command) {
            // Deliver output in two batches, as a streaming transport would.
            let (first, second) = lines.split_at(lines.len() / 2);
            receiver.add_lines(first);
            receiver.add_lines(second);
        }
        receiver.flush();
        Ok(())
    }

    fn does_file_exist(&mut self, path: &str) -> Result<bool, DeviceUnavailableError> {
        Ok(self.files.contains_key(path))
    }

    fn pull_file(&mut self, path: &str) -> Result<Option<Utf8PathBuf>, DeviceUnavailableError> {
        let Some(contents) = self.files.get(path) else {
            return Ok(None);
        };
        let local = self
            .scratch
            .path()
            .join(format!("pulled-{}", self.commands.len() + self.runs.len()));
        std::fs::write(&local, contents).expect("wrote pulled file");
        Ok(Some(local))
    }
}

/// The contents of a logged file, captured while it still existed.
#[derive(Clone, Debug, Eq, PartialEq)]
pub(crate) enum CapturedLog {
    /// A plain file.
    File(String),
    /// A compressed archive, by entry path.
    Archive(BTreeSet<String>),
}

/// Captures every logged file.
#[derive(Debug, Default)]
pub(crate) struct LogCapture {
    pub(crate) logs: Vec<(String, LogDataType, CapturedLog)>,
}

impl EventListener for LogCapture {
    fn report_event(&mut self, _event: &ResultEvent) {}

    fn report_log(&mut self, log: &TestLog<'_>) {
        let captured = if log.data_type == LogDataType::TarZstd {
            let file = std::fs::File::open(log.path).expect("opened archive");
            let decoder = zstd::Decoder::new(file).expect("created decoder");
            let mut archive = tar::Archive::new(decoder);
            let entries = archive
                .entries()
                .expect("read entries")
                .map(|entry| {
                    let entry = entry.expect("read entry");
                    entry.path().expect("entry path").to_string_lossy().into_owned()
                })
                .collect();
            CapturedLog::Archive(entries)
        } else {
            let mut contents = String::new();
            std::fs::File::open(log.path)
                .and_then(|mut file| file.read_to_string(&mut contents))
                .expect("read logged file");
            CapturedLog::File(contents)
        };
        self.logs.push((log.name.to_owned(), log.data_type, captured));
    }
}
