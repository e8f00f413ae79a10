// Copyright (c) The devtest Contributors
// SPDX-License-Identifier: MIT OR Apache-2.0

use crate::fixtures::*;
use camino::Utf8Path;
use color_eyre::eyre::{Result, ensure};
use devtest_metadata::{LogDataType, TestIdentifier};
use devtest_runner::{
    config::{DefaultConfigWarnings, DevtestConfig},
    coverage::{CommandReportGenerator, CoverageRunner, LIST_INSTRUMENTATION_COMMAND},
    errors::CoverageError,
    listener::{CollectingListener, EventListener, ListenerFanOut, TestStatus},
};
use indoc::indoc;
use pretty_assertions::assert_eq;

const PACKAGE: &str = "com.example.tests";
const CLASS: &str = "com.example.FooTest";

const INSTRUMENTATION_LIST: &str = indoc! {"
    instrumentation:com.example.tests/androidx.test.runner.AndroidJUnitRunner (target=com.example)
    instrumentation:com.other.tests/androidx.test.runner.AndroidJUnitRunner (target=com.other)
"};

/// Writes the concatenated coverage files as the XML report, and a placeholder HTML page.
const CONCAT_REPORTER: &str = indoc! {r#"
    prev=""
    files=""
    for arg in "$@"; do
        case "$prev" in
            --coverage-file) files="$files $arg" ;;
            --report-dir) dir="$arg" ;;
            --report-type) kind="$arg" ;;
        esac
        prev="$arg"
    done
    case "$kind" in
        html) echo "<html></html>" > "$dir/index.html" ;;
        xml) for f in $files; do cat "$f"; echo; done > "$dir/report.xml" ;;
        *) exit 2 ;;
    esac
"#};

fn load_config(contents: &str) -> Result<DevtestConfig> {
    Ok(DevtestConfig::from_toml_str(
        contents,
        Utf8Path::new("devtest.toml"),
        &mut DefaultConfigWarnings,
    )?)
}

#[cfg(unix)]
#[test]
fn crashing_chunk_keeps_coverage_from_other_tests() -> Result<()> {
    test_init();

    let config = load_config(indoc! {r#"
        [coverage]
        packages = ["com.example.tests"]
        max-tests-per-chunk = 2
        report-formats = ["html", "xml"]
        reporter = "sh"

        [coverage.instrumentation-args]
        size = "small"
    "#})?;
    let crashing = TestIdentifier::new(CLASS, "test2");
    let mut device = ScriptedDevice::new()
        .with_shell_output(LIST_INSTRUMENTATION_COMMAND, INSTRUMENTATION_LIST)
        .with_instrumentation(PACKAGE, CLASS, 4)
        .with_crashing(crashing.clone());

    let generator = CommandReportGenerator::from_config(&config.coverage).with_args([
        "-c",
        CONCAT_REPORTER,
        "reporter",
    ]);
    let runner = CoverageRunner::new(config.coverage.clone()).with_report_generator(generator);

    let mut results = CollectingListener::new();
    let mut capture = LogCapture::default();
    {
        let mut listener = ListenerFanOut::new([
            &mut results as &mut dyn EventListener,
            &mut capture as &mut dyn EventListener,
        ]);
        runner.run(&mut device, &mut listener)?;
    }

    // Chunk 0 holds test0 and test2. It crashes, so test0 and test2 are re-run individually.
    // Chunk 1 holds test1 and test3.
    let coverage_runs: Vec<_> = device
        .runs
        .iter()
        .filter(|spec| !spec.collect_tests_only)
        .collect();
    ensure!(
        coverage_runs
            .iter()
            .all(|spec| spec.args["size"] == "small" && spec.args["coverage"] == "true"),
        "configured and coverage arguments are passed to every run"
    );
    let single: Vec<_> = coverage_runs
        .iter()
        .filter_map(|spec| spec.method_name.as_deref())
        .collect();
    assert_eq!(single, ["test0", "test2", "test2"]);

    assert_eq!(capture.logs.len(), 2);
    let (name, data_type, html) = &capture.logs[0];
    assert_eq!((name.as_str(), *data_type), ("coverage", LogDataType::TarZstd));
    match html {
        CapturedLog::Archive(entries) => ensure!(
            entries.contains("html-report/index.html"),
            "archive holds the HTML report: {entries:?}"
        ),
        other => panic!("expected an archive, found {other:?}"),
    }
    assert_eq!(
        capture.logs[1],
        (
            "coverage".to_owned(),
            LogDataType::Xml,
            CapturedLog::File("test0\ntest1,test3\n".to_owned()),
        )
    );

    let synthetic = results
        .runs()
        .iter()
        .find(|run| run.name == CLASS)
        .expect("a synthetic run was reported for the crashing test");
    let result = &synthetic.tests[&crashing];
    assert_eq!(result.status, TestStatus::Failed);
    ensure!(
        result
            .trace
            .as_deref()
            .is_some_and(|trace| trace.contains("Process crashed.")),
        "trace names the crash: {result:?}"
    );
    Ok(())
}

#[test]
fn unmatched_packages_fail_the_run() -> Result<()> {
    test_init();

    let config = load_config(indoc! {r#"
        [coverage]
        packages = ["com.missing.tests"]
    "#})?;
    let mut device =
        ScriptedDevice::new().with_shell_output(LIST_INSTRUMENTATION_COMMAND, INSTRUMENTATION_LIST);

    let err = CoverageRunner::new(config.coverage)
        .run(&mut device, &mut CollectingListener::new())
        .expect_err("no targets match");
    ensure!(
        matches!(err, CoverageError::NoInstrumentationTargets),
        "unexpected error: {err:?}"
    );
    assert_eq!(device.commands, [LIST_INSTRUMENTATION_COMMAND]);
    Ok(())
}
