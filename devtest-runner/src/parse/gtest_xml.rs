// Copyright (c) The devtest Contributors
// SPDX-License-Identifier: MIT OR Apache-2.0

use crate::{helpers::secs_to_millis_rounding, listener::EventListener};
use camino::Utf8Path;
use devtest_metadata::{Metrics, ResultEvent, TestIdentifier};
use quick_xml::{
    Reader,
    events::{BytesStart, Event},
};
use thiserror::Error;
use tracing::{debug, error, warn};

static TESTSUITE_TAG: &[u8] = b"testsuite";
static TESTCASE_TAG: &[u8] = b"testcase";
static FAILURE_TAG: &[u8] = b"failure";

const CRASH_MESSAGE: &str = "Failed to get an xml output from tests, it probably crashed";

/// Parses GTest XML reports (`--gtest_output=xml`).
///
/// Parsing never fails: a document that cannot be read is reported as a crashed run.
#[derive(Clone, Debug)]
pub struct GTestXmlParser {
    run_name: String,
}

impl GTestXmlParser {
    /// Creates a new parser that reports runs under `run_name`.
    pub fn new(run_name: impl Into<String>) -> Self {
        Self {
            run_name: run_name.into(),
        }
    }

    /// Returns the run name.
    pub fn run_name(&self) -> &str {
        &self.run_name
    }

    /// Reads the report at `path` and reports it to `listener`.
    ///
    /// A missing or unreadable file is treated the same as a malformed document. `captured_output`
    /// is the console output of the test binary, attached to the run failure in that case.
    pub fn parse_file(
        &self,
        path: &Utf8Path,
        captured_output: Option<&str>,
        listener: &mut dyn EventListener,
    ) {
        match std::fs::read(path) {
            Ok(document) => self.parse(&document, captured_output, listener),
            Err(error) => {
                debug!(%path, %error, "failed to read GTest XML report");
                self.report_crash(captured_output, listener);
            }
        }
    }

    /// Parses `document` and reports it to `listener`.
    pub fn parse(
        &self,
        document: &[u8],
        captured_output: Option<&str>,
        listener: &mut dyn EventListener,
    ) {
        let report = match std::str::from_utf8(document) {
            Ok(document) => read_report(document),
            Err(error) => Err(ReportReadError::NotUtf8(error)),
        };
        match report {
            Ok(report) => self.report_events(report, listener),
            Err(error) => {
                debug!(run_name = %self.run_name, %error, "malformed GTest XML report");
                self.report_crash(captured_output, listener);
            }
        }
    }

    fn report_events(&self, report: GTestReport, listener: &mut dyn EventListener) {
        let GTestReport {
            expected_count,
            elapsed_millis,
            cases,
        } = report;

        listener.report_event(&ResultEvent::run_started(
            self.run_name.clone(),
            expected_count,
        ));

        let observed_count = cases.len();
        for case in cases {
            listener.report_event(&ResultEvent::test_started(case.id.clone()));
            if let Some(mut trace) = case.failure {
                // Some GTest formats leave "Failed" out of the message.
                if !trace.contains("Failed") {
                    trace.push_str("\nFailed");
                }
                listener.report_event(&ResultEvent::test_failed(case.id.clone(), trace));
            }
            let mut metrics = Metrics::new();
            metrics.insert("runtime".to_owned(), case.time);
            listener.report_event(&ResultEvent::test_ended(case.id, metrics));
        }

        if observed_count < expected_count {
            listener.report_event(&ResultEvent::run_failed(format!(
                "Test run incomplete. Expected {expected_count} tests, received {observed_count}"
            )));
        }
        listener.report_event(&ResultEvent::run_ended(elapsed_millis, Metrics::new()));
    }

    fn report_crash(&self, captured_output: Option<&str>, listener: &mut dyn EventListener) {
        let mut message = CRASH_MESSAGE.to_owned();
        if let Some(output) = captured_output {
            message.push_str("\nlogs:\n");
            message.push_str(output);
            error!(run_name = %self.run_name, "{message}");
        }

        listener.report_event(&ResultEvent::run_started(self.run_name.clone(), 0));
        listener.report_event(&ResultEvent::run_failed(message));
        listener.report_event(&ResultEvent::run_ended(0, Metrics::new()));
    }
}

#[derive(Debug, Error)]
enum ReportReadError {
    #[error("report is not valid UTF-8")]
    NotUtf8(#[source] std::str::Utf8Error),

    #[error("XML error")]
    Xml(#[from] quick_xml::Error),

    #[error("report ended with {0} unclosed elements")]
    Truncated(usize),

    #[error("report has no root element")]
    NoRoot,
}

#[derive(Debug)]
struct GTestReport {
    expected_count: usize,
    elapsed_millis: u64,
    cases: Vec<GTestCase>,
}

#[derive(Debug)]
struct GTestCase {
    id: TestIdentifier,
    time: String,
    failure: Option<String>,
}

impl GTestCase {
    fn from_start(start: &BytesStart<'_>) -> Result<Self, ReportReadError> {
        let class_name = attribute(start, "classname")?.unwrap_or_default();
        let name = attribute(start, "name")?.unwrap_or_default();
        Ok(Self {
            id: TestIdentifier::new(class_name, name),
            time: attribute(start, "time")?.unwrap_or_default(),
            failure: None,
        })
    }

    fn record_failure(&mut self, start: &BytesStart<'_>) -> Result<(), ReportReadError> {
        // Only the first failure is reported.
        if self.failure.is_none() {
            self.failure = Some(attribute(start, "message")?.unwrap_or_default());
        }
        Ok(())
    }
}

/// Reads the whole document into memory before anything is reported, so that a truncated
/// document never produces a partial run.
fn read_report(document: &str) -> Result<GTestReport, ReportReadError> {
    let mut reader = Reader::from_str(document);
    reader.config_mut().trim_text(true);

    let mut report: Option<GTestReport> = None;
    let mut depth = 0usize;
    let mut suite_depth = 0usize;
    let mut current_case: Option<GTestCase> = None;

    loop {
        let event = reader.read_event()?;
        let (start, is_empty) = match &event {
            Event::Start(start) => (start, false),
            Event::Empty(start) => (start, true),
            Event::End(end) => {
                depth = depth.saturating_sub(1);
                let name = end.name();
                if name.as_ref() == TESTSUITE_TAG {
                    suite_depth = suite_depth.saturating_sub(1);
                } else if name.as_ref() == TESTCASE_TAG {
                    if let (Some(case), Some(report)) = (current_case.take(), report.as_mut()) {
                        report.cases.push(case);
                    }
                }
                continue;
            }
            Event::Eof => break,
            _ => continue,
        };

        let name = start.name();
        if let Some(report) = report.as_mut() {
            if name.as_ref() == TESTCASE_TAG && suite_depth > 0 && current_case.is_none() {
                let case = GTestCase::from_start(start)?;
                if is_empty {
                    report.cases.push(case);
                } else {
                    current_case = Some(case);
                }
            } else if name.as_ref() == FAILURE_TAG {
                if let Some(case) = current_case.as_mut() {
                    case.record_failure(start)?;
                }
            }
        } else {
            report = Some(read_root(start)?);
        }

        if name.as_ref() == TESTSUITE_TAG && !is_empty {
            suite_depth += 1;
        }
        if !is_empty {
            depth += 1;
        }
    }

    if depth > 0 {
        return Err(ReportReadError::Truncated(depth));
    }
    report.ok_or(ReportReadError::NoRoot)
}

fn read_root(root: &BytesStart<'_>) -> Result<GTestReport, ReportReadError> {
    let expected_count = match attribute(root, "tests")? {
        Some(tests) => tests.parse().unwrap_or_else(|error| {
            warn!(%tests, %error, "invalid `tests` attribute in GTest XML report, using 0");
            0
        }),
        None => {
            warn!("missing `tests` attribute in GTest XML report, using 0");
            0
        }
    };
    let elapsed_millis = match attribute(root, "time")? {
        Some(time) => match time.parse::<f64>() {
            Ok(secs) => secs_to_millis_rounding(secs),
            Err(error) => {
                warn!(%time, %error, "invalid `time` attribute in GTest XML report, using 0");
                0
            }
        },
        None => {
            warn!("missing `time` attribute in GTest XML report, using 0");
            0
        }
    };

    Ok(GTestReport {
        expected_count,
        elapsed_millis,
        cases: Vec::new(),
    })
}

fn attribute(start: &BytesStart<'_>, name: &str) -> Result<Option<String>, ReportReadError> {
    let attr = start
        .try_get_attribute(name)
        .map_err(quick_xml::Error::from)?;
    match attr {
        Some(attr) => {
            let value = attr.unescape_value().map_err(quick_xml::Error::from)?;
            Ok(Some(value.into_owned()))
        }
        None => Ok(None),
    }
}
