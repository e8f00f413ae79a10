// Copyright (c) The devtest Contributors
// SPDX-License-Identifier: MIT OR Apache-2.0

use crate::listener::EventListener;
use devtest_metadata::{Metrics, ResultEvent, TestIdentifier};
use serde_json::{Map, Value};
use tracing::{debug, warn};

/// The metric every benchmark entry must report unless configured otherwise.
pub const DEFAULT_REQUIRED_METRIC: &str = "real_time";

/// Parses Google Benchmark JSON output (`--benchmark_format=json`).
///
/// Each entry of the `benchmarks` array is reported as one test of class `class_name`, with
/// the entry's fields as its metrics. The `context` object is returned as run metrics.
#[derive(Clone, Debug)]
pub struct BenchmarkParser {
    class_name: String,
    required_metrics: Vec<String>,
}

impl BenchmarkParser {
    /// Creates a parser that reports benchmarks under `class_name`.
    pub fn new(class_name: impl Into<String>) -> Self {
        Self {
            class_name: class_name.into(),
            required_metrics: vec![DEFAULT_REQUIRED_METRIC.to_owned()],
        }
    }

    /// Replaces the metrics each benchmark entry must carry to count as a pass.
    pub fn with_required_metrics<I>(mut self, metrics: I) -> Self
    where
        I: IntoIterator,
        I::Item: Into<String>,
    {
        self.required_metrics = metrics.into_iter().map(Into::into).collect();
        self
    }

    /// Returns the class name benchmarks are reported under.
    pub fn class_name(&self) -> &str {
        &self.class_name
    }

    /// Parses `output` and reports per-benchmark events to `listener`, returning run metrics.
    ///
    /// This does not report the run bracket: see [`Self::parse_run`] for that.
    ///
    /// On success the returned map holds the flattened `context` plus a `Pass` key set to the
    /// number of benchmark entries. If the `benchmarks` array cannot be read, an `ERROR` key holds
    /// the reason instead. If the document or its `context` cannot be read, the map is empty.
    pub fn parse(&self, output: &str, listener: &mut dyn EventListener) -> Metrics {
        // Benchmark binaries sometimes print a banner before the JSON document.
        let json = output.find('{').map_or(output, |start| &output[start..]);

        let (mut metrics, document) = match parse_context(json) {
            Ok(parsed) => parsed,
            Err(message) => {
                warn!(class_name = %self.class_name, %message, "failed to parse benchmark context");
                listener.report_event(&ResultEvent::run_failed(format!(
                    "Failed to Parse context: {message}"
                )));
                return Metrics::new();
            }
        };

        match self.report_benchmarks(&document, listener) {
            Ok(count) => {
                metrics.insert("Pass".to_owned(), count.to_string());
            }
            Err(message) => {
                warn!(class_name = %self.class_name, %message, "failed to parse benchmark results");
                listener.report_event(&ResultEvent::run_failed(format!(
                    "Failed to parse benchmarks results: {message}"
                )));
                metrics.insert("ERROR".to_owned(), message);
            }
        }
        metrics
    }

    /// Like [`Self::parse`], but brackets the events in a run named `run_name`.
    ///
    /// The returned metrics are also reported when the run ends.
    pub fn parse_run(
        &self,
        run_name: &str,
        expected_count: usize,
        output: &str,
        listener: &mut dyn EventListener,
    ) -> Metrics {
        listener.report_event(&ResultEvent::run_started(run_name, expected_count));
        let metrics = self.parse(output, listener);
        listener.report_event(&ResultEvent::run_ended(0, metrics.clone()));
        metrics
    }

    fn report_benchmarks(
        &self,
        document: &Map<String, Value>,
        listener: &mut dyn EventListener,
    ) -> Result<usize, String> {
        let benchmarks = match document.get("benchmarks") {
            Some(Value::Array(benchmarks)) => benchmarks,
            Some(_) => return Err("`benchmarks` is not an array".to_owned()),
            None => return Err("missing `benchmarks`".to_owned()),
        };

        for (index, entry) in benchmarks.iter().enumerate() {
            let entry = entry
                .as_object()
                .ok_or_else(|| format!("benchmark {index} is not an object"))?;
            let name = entry
                .get("name")
                .and_then(Value::as_str)
                .ok_or_else(|| format!("benchmark {index} has no name"))?;

            let id = TestIdentifier::new(self.class_name.clone(), name);
            listener.report_event(&ResultEvent::test_started(id.clone()));
            match self.entry_metrics(entry) {
                Ok(metrics) => {
                    debug!(%id, "benchmark completed");
                    listener.report_event(&ResultEvent::test_ended(id, metrics));
                }
                Err(message) => {
                    listener.report_event(&ResultEvent::test_failed(
                        id.clone(),
                        format!("Test failed to generate proper results: {message}"),
                    ));
                    listener.report_event(&ResultEvent::test_ended(id, Metrics::new()));
                }
            }
        }
        Ok(benchmarks.len())
    }

    fn entry_metrics(&self, entry: &Map<String, Value>) -> Result<Metrics, String> {
        let missing: Vec<&str> = self
            .required_metrics
            .iter()
            .filter(|metric| !entry.contains_key(metric.as_str()))
            .map(String::as_str)
            .collect();
        if !missing.is_empty() {
            return Err(format!("missing {}", missing.join(", ")));
        }
        Ok(flatten(entry))
    }
}

fn parse_context(json: &str) -> Result<(Metrics, Map<String, Value>), String> {
    let document: Value = serde_json::from_str(json).map_err(|error| error.to_string())?;
    let Value::Object(document) = document else {
        return Err("top-level value is not an object".to_owned());
    };
    match document.get("context") {
        Some(Value::Object(context)) => Ok((flatten(context), document)),
        Some(_) => Err("`context` is not an object".to_owned()),
        None => Err("missing `context`".to_owned()),
    }
}

/// Flattens a JSON object into string metrics: strings as-is, everything else as compact JSON.
fn flatten(object: &Map<String, Value>) -> Metrics {
    object
        .iter()
        .map(|(key, value)| {
            let value = match value {
                Value::String(s) => s.clone(),
                other => other.to_string(),
            };
            (key.clone(), value)
        })
        .collect()
}
