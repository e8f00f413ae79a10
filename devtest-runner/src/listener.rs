// Copyright (c) The devtest Contributors
// SPDX-License-Identifier: MIT OR Apache-2.0

//! Listeners consume the [`ResultEvent`] stream produced by parsers and executors.
//!
//! The main trait in this module is [`EventListener`]. [`ListenerFanOut`] forwards each event to
//! an ordered list of listeners, and [`CollectingListener`] records runs for later inspection.

use camino::Utf8Path;
use devtest_metadata::{LogDataType, Metrics, ResultEvent, TestIdentifier};
use indexmap::IndexMap;
use std::fmt;

/// A file logged by a test or by devtest itself, e.g. coverage data or a report.
#[derive(Clone, Copy, Debug)]
pub struct TestLog<'a> {
    /// A short name for the data.
    pub name: &'a str,

    /// What kind of data the file holds.
    pub data_type: LogDataType,

    /// The host-side path to the data. Only valid for the duration of the call.
    pub path: &'a Utf8Path,
}

/// Consumes result events.
///
/// Events are delivered synchronously and in order.
pub trait EventListener {
    /// Reports a single result event.
    fn report_event(&mut self, event: &ResultEvent);

    /// Reports a logged file. The file is only guaranteed to exist for the duration of the call.
    ///
    /// The default implementation ignores the log.
    fn report_log(&mut self, log: &TestLog<'_>) {
        let _ = log;
    }
}

impl<T: EventListener + ?Sized> EventListener for &mut T {
    fn report_event(&mut self, event: &ResultEvent) {
        (**self).report_event(event)
    }

    fn report_log(&mut self, log: &TestLog<'_>) {
        (**self).report_log(log)
    }
}

impl<T: EventListener + ?Sized> EventListener for Box<T> {
    fn report_event(&mut self, event: &ResultEvent) {
        (**self).report_event(event)
    }

    fn report_log(&mut self, log: &TestLog<'_>) {
        (**self).report_log(log)
    }
}

/// Forwards every event to each of an ordered list of listeners.
#[derive(Default)]
pub struct ListenerFanOut<'a> {
    listeners: Vec<&'a mut dyn EventListener>,
}

impl<'a> ListenerFanOut<'a> {
    /// Creates a fan-out over the given listeners, in order.
    pub fn new(listeners: impl IntoIterator<Item = &'a mut dyn EventListener>) -> Self {
        Self {
            listeners: listeners.into_iter().collect(),
        }
    }

    /// Appends a listener to the end of the list.
    pub fn push(&mut self, listener: &'a mut dyn EventListener) {
        self.listeners.push(listener);
    }

    /// Returns the number of listeners.
    pub fn len(&self) -> usize {
        self.listeners.len()
    }

    /// Returns true if there are no listeners.
    pub fn is_empty(&self) -> bool {
        self.listeners.is_empty()
    }
}

impl fmt::Debug for ListenerFanOut<'_> {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("ListenerFanOut")
            .field("listeners", &self.listeners.len())
            .finish()
    }
}

impl EventListener for ListenerFanOut<'_> {
    fn report_event(&mut self, event: &ResultEvent) {
        for listener in &mut self.listeners {
            listener.report_event(event);
        }
    }

    fn report_log(&mut self, log: &TestLog<'_>) {
        for listener in &mut self.listeners {
            listener.report_log(log);
        }
    }
}

/// The status of a single test within a [`RunResult`].
#[derive(Clone, Copy, Debug, Eq, PartialEq)]
pub enum TestStatus {
    /// The test started but has not ended.
    Incomplete,
    /// The test ended without failing.
    Passed,
    /// The test ended after failing.
    Failed,
}

/// The recorded result of one test.
#[derive(Clone, Debug, Eq, PartialEq)]
pub struct TestResult {
    /// The test's status.
    pub status: TestStatus,

    /// The failure trace, if the test failed.
    pub trace: Option<String>,

    /// Metrics reported when the test ended.
    pub metrics: Metrics,
}

/// The recorded results of one run.
#[derive(Clone, Debug, Default, Eq, PartialEq)]
pub struct RunResult {
    /// The name of the run.
    pub name: String,

    /// The number of tests the run said it would report.
    pub expected_count: usize,

    /// The run failure messages, in the order they were reported.
    pub run_failures: Vec<String>,

    /// Elapsed time reported at the end of the run.
    pub elapsed_millis: u64,

    /// Metrics reported at the end of the run.
    pub metrics: Metrics,

    /// Per-test results, in the order the tests started.
    pub tests: IndexMap<TestIdentifier, TestResult>,

    /// True once the run has ended.
    pub complete: bool,
}

impl RunResult {
    /// Returns true if the run reported a run-level failure.
    pub fn is_run_failure(&self) -> bool {
        !self.run_failures.is_empty()
    }

    /// Returns the run failure messages joined into one message, if any were reported.
    pub fn run_failure_message(&self) -> Option<String> {
        (!self.run_failures.is_empty()).then(|| self.run_failures.join("\n"))
    }

    /// Returns the tests that ended, in the order they started.
    pub fn completed_tests(&self) -> impl Iterator<Item = &TestIdentifier> + '_ {
        self.tests
            .iter()
            .filter(|(_, result)| result.status != TestStatus::Incomplete)
            .map(|(id, _)| id)
    }

    /// Returns the number of tests that failed.
    pub fn failed_count(&self) -> usize {
        self.tests
            .values()
            .filter(|result| result.status == TestStatus::Failed)
            .count()
    }
}

/// Records every run reported to it.
#[derive(Clone, Debug, Default)]
pub struct CollectingListener {
    runs: Vec<RunResult>,
    logs: Vec<(String, LogDataType)>,
}

impl CollectingListener {
    /// Creates an empty listener.
    pub fn new() -> Self {
        Self::default()
    }

    /// Returns all runs recorded so far.
    pub fn runs(&self) -> &[RunResult] {
        &self.runs
    }

    /// Returns the most recent run, if any run has started.
    pub fn current_run(&self) -> Option<&RunResult> {
        self.runs.last()
    }

    /// Returns the names and data types of logs reported so far.
    pub fn logs(&self) -> &[(String, LogDataType)] {
        &self.logs
    }

    fn current_run_mut(&mut self) -> &mut RunResult {
        // Events outside of a run bracket are recorded against an unnamed run.
        if self.runs.is_empty() {
            self.runs.push(RunResult::default());
        }
        let last = self.runs.len() - 1;
        &mut self.runs[last]
    }
}

impl EventListener for CollectingListener {
    fn report_event(&mut self, event: &ResultEvent) {
        match event {
            ResultEvent::RunStarted {
                run_name,
                expected_count,
            } => {
                self.runs.push(RunResult {
                    name: run_name.clone(),
                    expected_count: *expected_count,
                    ..Default::default()
                });
            }
            ResultEvent::RunFailed { message } => {
                self.current_run_mut().run_failures.push(message.clone());
            }
            ResultEvent::RunEnded {
                elapsed_millis,
                metrics,
            } => {
                let run = self.current_run_mut();
                run.elapsed_millis = *elapsed_millis;
                run.metrics.extend(metrics.clone());
                run.complete = true;
            }
            ResultEvent::TestStarted { id } => {
                self.current_run_mut().tests.insert(
                    id.clone(),
                    TestResult {
                        status: TestStatus::Incomplete,
                        trace: None,
                        metrics: Metrics::new(),
                    },
                );
            }
            ResultEvent::TestFailed { id, trace } => {
                let run = self.current_run_mut();
                let result = run.tests.entry(id.clone()).or_insert_with(|| TestResult {
                    status: TestStatus::Incomplete,
                    trace: None,
                    metrics: Metrics::new(),
                });
                result.trace = Some(trace.clone());
            }
            ResultEvent::TestEnded { id, metrics } => {
                let run = self.current_run_mut();
                let result = run.tests.entry(id.clone()).or_insert_with(|| TestResult {
                    status: TestStatus::Incomplete,
                    trace: None,
                    metrics: Metrics::new(),
                });
                result.status = if result.trace.is_some() {
                    TestStatus::Failed
                } else {
                    TestStatus::Passed
                };
                result.metrics = metrics.clone();
            }
        }
    }

    fn report_log(&mut self, log: &TestLog<'_>) {
        self.logs.push((log.name.to_owned(), log.data_type));
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use indexmap::IndexSet;
    use maplit::btreemap;
    use pretty_assertions::assert_eq;
    use proptest::prelude::*;
    use test_strategy::proptest;

    #[derive(Default)]
    struct Recorder(Vec<ResultEvent>);

    impl EventListener for Recorder {
        fn report_event(&mut self, event: &ResultEvent) {
            self.0.push(event.clone());
        }
    }

    #[test]
    fn fan_out_preserves_order_for_every_listener() {
        let mut first = Recorder::default();
        let mut second = Recorder::default();
        let events = vec![
            ResultEvent::run_started("run", 0),
            ResultEvent::run_ended(0, Metrics::new()),
        ];
        {
            let mut fan_out = ListenerFanOut::new([
                &mut first as &mut dyn EventListener,
                &mut second as &mut dyn EventListener,
            ]);
            assert_eq!(fan_out.len(), 2);
            for event in &events {
                fan_out.report_event(event);
            }
        }
        assert_eq!(first.0, events);
        assert_eq!(second.0, events);
    }

    #[test]
    fn collecting_listener_records_statuses() {
        let passed = TestIdentifier::new("pkg.Cls", "test_pass");
        let failed = TestIdentifier::new("pkg.Cls", "test_fail");
        let incomplete = TestIdentifier::new("pkg.Cls", "test_crash");

        let mut listener = CollectingListener::new();
        for event in [
            ResultEvent::run_started("pkg", 3),
            ResultEvent::test_started(passed.clone()),
            ResultEvent::test_ended(passed.clone(), Metrics::new()),
            ResultEvent::test_started(failed.clone()),
            ResultEvent::test_failed(failed.clone(), "trace"),
            ResultEvent::test_ended(failed.clone(), Metrics::new()),
            ResultEvent::test_started(incomplete.clone()),
            ResultEvent::run_failed("instrumentation crashed"),
            ResultEvent::run_ended(
                12,
                btreemap! { "coverageFilePath".to_owned() => "/data/coverage.ec".to_owned() },
            ),
        ] {
            listener.report_event(&event);
        }

        let run = listener.current_run().expect("a run was recorded");
        assert_eq!(run.name, "pkg");
        assert!(run.complete);
        assert!(run.is_run_failure());
        assert_eq!(
            run.run_failure_message().as_deref(),
            Some("instrumentation crashed")
        );
        assert_eq!(run.failed_count(), 1);
        assert_eq!(
            run.completed_tests().cloned().collect::<Vec<_>>(),
            vec![passed, failed]
        );
        assert_eq!(run.tests[&incomplete].status, TestStatus::Incomplete);
        assert_eq!(run.metrics["coverageFilePath"], "/data/coverage.ec");
    }

    #[proptest]
    fn completed_tests_keep_start_order(
        #[strategy(prop::collection::vec(any::<TestIdentifier>(), 0..16))] ids: Vec<
            TestIdentifier,
        >,
    ) {
        let mut listener = CollectingListener::new();
        let mut recorder = Recorder::default();
        {
            let mut fan_out = ListenerFanOut::new([
                &mut listener as &mut dyn EventListener,
                &mut recorder as &mut dyn EventListener,
            ]);
            fan_out.report_event(&ResultEvent::run_started("run", ids.len()));
            for id in &ids {
                fan_out.report_event(&ResultEvent::test_started(id.clone()));
                fan_out.report_event(&ResultEvent::test_ended(id.clone(), Metrics::new()));
            }
            fan_out.report_event(&ResultEvent::run_ended(0, Metrics::new()));
        }

        let unique: IndexSet<_> = ids.iter().collect();
        let run = listener.current_run().expect("a run was recorded");
        prop_assert_eq!(
            run.completed_tests().collect::<Vec<_>>(),
            unique.into_iter().collect::<Vec<_>>()
        );
        prop_assert_eq!(recorder.0.len(), ids.len() * 2 + 2);
    }
}
