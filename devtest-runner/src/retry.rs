// Copyright (c) The devtest Contributors
// SPDX-License-Identifier: MIT OR Apache-2.0

//! Re-running a single test until it reports a result.
//!
//! A test that crashes its process, or whose transport drops output, may never report
//! `TestEnded`. [`RetryingExecutor`] runs such a test a bounded number of times, and if it never
//! reports, synthesizes a failed result so that every requested test produces exactly one
//! terminal event.

use crate::{
    device::Device,
    errors::DeviceUnavailableError,
    helpers::plural,
    listener::{EventListener, TestLog},
    remote::RemoteTest,
};
use devtest_metadata::{Metrics, ResultEvent, TestIdentifier};
use tracing::{debug, warn};

/// The maximum number of times a test is run.
pub const MAX_ATTEMPTS: u32 = 2;

/// What happened to a test run through a [`RetryingExecutor`].
#[derive(Clone, Copy, Debug, Eq, PartialEq)]
pub enum RetryOutcome {
    /// The test ran and reported `TestEnded`.
    RanAndObserved,
    /// The test ran but did not report `TestEnded`. Only seen for individual attempts.
    RanButNotObserved,
    /// The test never reported `TestEnded`, and a synthetic failure was reported in its place.
    ExhaustedRetries,
}

/// The result of [`RetryingExecutor::run_one`].
#[derive(Clone, Debug, Eq, PartialEq)]
pub struct RetryReport {
    /// The final outcome.
    pub outcome: RetryOutcome,

    /// The number of times the test was run.
    pub attempts: u32,

    /// The last run failure reported by the test, if any.
    pub last_run_failure: Option<String>,
}

/// A listener that forwards everything downstream while watching for one test to end.
pub struct TrackingListener<'a> {
    expected: &'a TestIdentifier,
    downstream: &'a mut dyn EventListener,
    observed: bool,
    run_failure: Option<String>,
}

impl<'a> TrackingListener<'a> {
    /// Creates a tracker for `expected` that forwards to `downstream`.
    pub fn new(expected: &'a TestIdentifier, downstream: &'a mut dyn EventListener) -> Self {
        Self {
            expected,
            downstream,
            observed: false,
            run_failure: None,
        }
    }

    /// Returns true if `TestEnded` was reported for the expected test.
    pub fn observed(&self) -> bool {
        self.observed
    }

    /// Returns the last run failure message reported, if any.
    pub fn run_failure(&self) -> Option<&str> {
        self.run_failure.as_deref()
    }

    fn into_run_failure(self) -> Option<String> {
        self.run_failure
    }
}

impl EventListener for TrackingListener<'_> {
    fn report_event(&mut self, event: &ResultEvent) {
        match event {
            ResultEvent::TestEnded { id, .. } if id == self.expected => {
                self.observed = true;
            }
            ResultEvent::RunFailed { message } => {
                self.run_failure = Some(message.clone());
            }
            _ => {}
        }
        self.downstream.report_event(event);
    }

    fn report_log(&mut self, log: &TestLog<'_>) {
        self.downstream.report_log(log);
    }
}

/// Runs single tests with a bounded number of attempts.
#[derive(Clone, Debug)]
pub struct RetryingExecutor {
    max_attempts: u32,
}

impl Default for RetryingExecutor {
    fn default() -> Self {
        Self {
            max_attempts: MAX_ATTEMPTS,
        }
    }
}

impl RetryingExecutor {
    /// Creates a new executor.
    pub fn new() -> Self {
        Self::default()
    }

    /// Runs `test`, which is expected to report a result for `expected`, forwarding all events to
    /// `listener`.
    ///
    /// The test is run again if it does not report `TestEnded` for `expected`, up to
    /// [`MAX_ATTEMPTS`] times in total. If no attempt reports it, a synthetic run is reported
    /// containing a single failed test for `expected`.
    ///
    /// A [`DeviceUnavailableError`] is returned immediately and never retried.
    pub fn run_one(
        &self,
        test: &mut dyn RemoteTest,
        expected: &TestIdentifier,
        device: &mut dyn Device,
        listener: &mut dyn EventListener,
    ) -> Result<RetryReport, DeviceUnavailableError> {
        let mut last_run_failure = None;

        for attempt in 1..=self.max_attempts {
            let (outcome, run_failure) = run_attempt(test, expected, device, listener)?;
            if run_failure.is_some() {
                last_run_failure = run_failure;
            }

            match outcome {
                RetryOutcome::RanAndObserved => {
                    debug!(%expected, attempt, "test reported a result");
                    return Ok(RetryReport {
                        outcome,
                        attempts: attempt,
                        last_run_failure,
                    });
                }
                RetryOutcome::RanButNotObserved | RetryOutcome::ExhaustedRetries => {
                    warn!(
                        %expected,
                        attempt,
                        max_attempts = self.max_attempts,
                        run_failure = last_run_failure.as_deref().unwrap_or(""),
                        "test did not report a result",
                    );
                }
            }
        }

        warn!(
            %expected,
            "test did not report a result after {} {}, marking it as failed",
            self.max_attempts,
            plural::attempts_str(self.max_attempts),
        );
        report_not_run(expected, last_run_failure.as_deref(), listener);
        Ok(RetryReport {
            outcome: RetryOutcome::ExhaustedRetries,
            attempts: self.max_attempts,
            last_run_failure,
        })
    }
}

fn run_attempt(
    test: &mut dyn RemoteTest,
    expected: &TestIdentifier,
    device: &mut dyn Device,
    listener: &mut dyn EventListener,
) -> Result<(RetryOutcome, Option<String>), DeviceUnavailableError> {
    let mut tracker = TrackingListener::new(expected, listener);
    test.run(device, &mut tracker)?;
    let outcome = if tracker.observed() {
        RetryOutcome::RanAndObserved
    } else {
        RetryOutcome::RanButNotObserved
    };
    Ok((outcome, tracker.into_run_failure()))
}

/// Reports a complete run in which `id` failed without running.
fn report_not_run(id: &TestIdentifier, run_failure: Option<&str>, listener: &mut dyn EventListener) {
    let trace = format!(
        "Test failed to run. Test run failed due to : {}",
        run_failure.unwrap_or("no result was reported"),
    );

    listener.report_event(&ResultEvent::run_started(id.class_name.clone(), 1));
    listener.report_event(&ResultEvent::test_started(id.clone()));
    listener.report_event(&ResultEvent::test_failed(id.clone(), trace));
    listener.report_event(&ResultEvent::test_ended(id.clone(), Metrics::new()));
    if let Some(message) = run_failure {
        listener.report_event(&ResultEvent::run_failed(message));
    }
    listener.report_event(&ResultEvent::run_ended(0, Metrics::new()));
}
