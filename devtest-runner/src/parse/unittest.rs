// Copyright (c) The devtest Contributors
// SPDX-License-Identifier: MIT OR Apache-2.0

use crate::{errors::UnittestParseError, helpers::secs_to_millis_truncating, listener::EventListener};
use devtest_metadata::{Metrics, ResultEvent, TestIdentifier};
use indexmap::IndexMap;
use regex::Regex;
use std::sync::LazyLock;
use tracing::debug;

/// The divider printed before each failure header.
pub const EQ_DIVIDER: &str =
    "======================================================================";

/// The divider printed before each traceback and before the summary.
pub const DASH_DIVIDER: &str =
    "----------------------------------------------------------------------";

const TRACEBACK_MARKER: &str = "Traceback (most recent call last):";

static TEST_CASE_REGEX: LazyLock<Regex> = LazyLock::new(|| {
    Regex::new(r"^(?P<name>\S+) \((?P<class>[^()\s]+)\) \.\.\. (?P<status>.+)$")
        .expect("test case regex is valid")
});

static FAIL_HEADER_REGEX: LazyLock<Regex> = LazyLock::new(|| {
    Regex::new(r"^(?:ERROR|FAIL): (?P<name>\S+) \((?P<class>[^()\s]+)\)$")
        .expect("fail header regex is valid")
});

static SUMMARY_REGEX: LazyLock<Regex> = LazyLock::new(|| {
    Regex::new(r"^Ran (?P<count>\d+) tests? in (?P<time>\d+(?:\.\d+)?)s$")
        .expect("summary regex is valid")
});

/// Where a [`UnittestParser`] is in the output grammar.
#[derive(Clone, Copy, Debug, Eq, PartialEq)]
pub enum ParserState {
    /// Reading per-test status lines.
    TestCase,
    /// Reading a failure header.
    FailMessage,
    /// Accumulating a traceback.
    TestTraceback,
    /// Expecting the `Ran N tests in Ts` line.
    TestSummary,
    /// Expecting the final `OK` or `FAILED` line.
    TestStatus,
    /// All events have been emitted. Further input is ignored.
    Complete,
}

#[derive(Clone, Debug, Eq, PartialEq)]
enum CaseOutcome {
    Passed,
    // Reported as ERROR or FAIL, traceback not seen yet.
    Pending,
    Failed(String),
}

/// An incremental parser for Python unittest console output.
///
/// Output may be fed in any number of batches, split at arbitrary line boundaries. Events are
/// only produced once the final status line has been seen (or immediately, if the output starts
/// with a traceback). Any unexpected line is a fatal [`UnittestParseError`]: the output cannot be
/// trusted after that.
#[derive(Clone, Debug)]
pub struct UnittestParser {
    run_name: String,
    state: ParserState,
    // The number of lines seen so far, including empty ones.
    line_number: usize,
    seen_content: bool,
    results: IndexMap<TestIdentifier, CaseOutcome>,
    current_id: Option<TestIdentifier>,
    traceback: Vec<String>,
    total_count: usize,
    elapsed_millis: u64,
}

impl UnittestParser {
    /// Creates a new parser that reports runs under `run_name`.
    pub fn new(run_name: impl Into<String>) -> Self {
        Self {
            run_name: run_name.into(),
            state: ParserState::TestCase,
            line_number: 0,
            seen_content: false,
            results: IndexMap::new(),
            current_id: None,
            traceback: Vec::new(),
            total_count: 0,
            elapsed_millis: 0,
        }
    }

    /// Returns the run name.
    pub fn run_name(&self) -> &str {
        &self.run_name
    }

    /// Returns the current parser state.
    pub fn state(&self) -> ParserState {
        self.state
    }

    /// Returns true once all events have been produced.
    pub fn is_complete(&self) -> bool {
        self.state == ParserState::Complete
    }

    /// Feeds a batch of lines to the parser, forwarding any resulting events to `listener`.
    ///
    /// Events produced before an error are still forwarded.
    pub fn feed<S: AsRef<str>>(
        &mut self,
        lines: &[S],
        listener: &mut dyn EventListener,
    ) -> Result<(), UnittestParseError> {
        for line in lines {
            for event in self.process_line(line.as_ref())? {
                listener.report_event(&event);
            }
        }
        Ok(())
    }

    /// Advances the parser by one line and returns the events it produced.
    pub fn process_line(&mut self, line: &str) -> Result<Vec<ResultEvent>, UnittestParseError> {
        self.line_number += 1;
        if line.is_empty() {
            return Ok(Vec::new());
        }

        if !self.seen_content {
            self.seen_content = true;
            if line.starts_with(TRACEBACK_MARKER) {
                debug!(run_name = %self.run_name, "output starts with a traceback");
                self.state = ParserState::Complete;
                return Ok(vec![
                    ResultEvent::run_started(self.run_name.clone(), 0),
                    ResultEvent::run_failed("Test execution failed"),
                    ResultEvent::run_ended(0, Metrics::new()),
                ]);
            }
        }

        match self.state {
            ParserState::TestCase => self.test_case(line)?,
            ParserState::FailMessage => self.fail_message(line)?,
            ParserState::TestTraceback => self.traceback_line(line),
            ParserState::TestSummary => self.summary(line)?,
            ParserState::TestStatus => return self.complete_run(line),
            ParserState::Complete => {
                debug!(line, "ignoring output after the final status line");
            }
        }
        Ok(Vec::new())
    }

    fn test_case(&mut self, line: &str) -> Result<(), UnittestParseError> {
        if line.starts_with(EQ_DIVIDER) {
            self.state = ParserState::FailMessage;
            return Ok(());
        }
        if line.starts_with(DASH_DIVIDER) {
            self.state = ParserState::TestSummary;
            return Ok(());
        }

        let captures = TEST_CASE_REGEX
            .captures(line)
            .ok_or_else(|| self.parse_error("test case result", line))?;
        let id = TestIdentifier::new(&captures["class"], &captures["name"]);
        let outcome = match &captures["status"] {
            "ok" | "expected failure" => CaseOutcome::Passed,
            "ERROR" | "FAIL" => CaseOutcome::Pending,
            // Other one or two word statuses, e.g. "unexpected success", record nothing.
            status if status.split(' ').count() <= 2 => {
                debug!(%id, status, "ignoring unrecognized test status");
                return Ok(());
            }
            _ => return Err(self.parse_error("test case status", line)),
        };
        self.results.insert(id, outcome);
        Ok(())
    }

    fn fail_message(&mut self, line: &str) -> Result<(), UnittestParseError> {
        if line.starts_with(DASH_DIVIDER) {
            if self.current_id.is_none() {
                return Err(self.parse_error("failure header", line));
            }
            self.state = ParserState::TestTraceback;
            self.traceback.clear();
            return Ok(());
        }

        let captures = FAIL_HEADER_REGEX
            .captures(line)
            .ok_or_else(|| self.parse_error("failure header", line))?;
        self.current_id = Some(TestIdentifier::new(&captures["class"], &captures["name"]));
        Ok(())
    }

    fn traceback_line(&mut self, line: &str) {
        let next_state = if line.starts_with(DASH_DIVIDER) {
            ParserState::TestSummary
        } else if line.starts_with(EQ_DIVIDER) {
            ParserState::FailMessage
        } else {
            self.traceback.push(line.to_owned());
            return;
        };

        if let Some(id) = self.current_id.take() {
            let trace = self.traceback.join("\n");
            self.traceback.clear();
            self.results.insert(id, CaseOutcome::Failed(trace));
        }
        self.state = next_state;
    }

    fn summary(&mut self, line: &str) -> Result<(), UnittestParseError> {
        let captures = SUMMARY_REGEX
            .captures(line)
            .ok_or_else(|| self.parse_error("Ran <N> tests in <T>s", line))?;
        self.total_count = captures["count"]
            .parse()
            .map_err(|_| self.parse_error("integer", line))?;
        let secs: f64 = captures["time"]
            .parse()
            .map_err(|_| self.parse_error("double", line))?;
        self.elapsed_millis = secs_to_millis_truncating(secs);
        self.state = ParserState::TestStatus;
        Ok(())
    }

    fn complete_run(&mut self, line: &str) -> Result<Vec<ResultEvent>, UnittestParseError> {
        let run_failed = if line.starts_with("FAILED") {
            true
        } else if line.starts_with("OK") {
            false
        } else {
            return Err(self.parse_error("OK or FAILED", line));
        };
        self.state = ParserState::Complete;

        let mut events = Vec::with_capacity(self.results.len() * 3 + 3);
        events.push(ResultEvent::run_started(
            self.run_name.clone(),
            self.total_count,
        ));

        let mut failed_count = 0;
        for (id, outcome) in std::mem::take(&mut self.results) {
            events.push(ResultEvent::test_started(id.clone()));
            match outcome {
                CaseOutcome::Passed => {}
                CaseOutcome::Pending => {
                    failed_count += 1;
                    events.push(ResultEvent::test_failed(
                        id.clone(),
                        format!("{id} reported a failure but no traceback was printed"),
                    ));
                }
                CaseOutcome::Failed(trace) => {
                    failed_count += 1;
                    events.push(ResultEvent::test_failed(id.clone(), trace));
                }
            }
            events.push(ResultEvent::test_ended(id, Metrics::new()));
        }

        if run_failed {
            events.push(ResultEvent::run_failed(format!(
                "Failed {failed_count} tests"
            )));
        }
        events.push(ResultEvent::run_ended(self.elapsed_millis, Metrics::new()));
        Ok(events)
    }

    fn parse_error(&self, expected: &'static str, line: &str) -> UnittestParseError {
        UnittestParseError::new(expected, self.line_number, line)
    }
}
