// Copyright (c) The devtest Contributors
// SPDX-License-Identifier: MIT OR Apache-2.0

use crate::fixtures::*;
use camino::Utf8Path;
use color_eyre::eyre::{Result, ensure};
use devtest_metadata::ResultEvent;
use devtest_runner::{
    config::{DefaultConfigWarnings, DevtestConfig},
    device::{CollectingOutputReceiver, Device},
    errors::DeviceUnavailableError,
    host_test::{HostTest, TestClass, TestMethod, TestRegistry},
    listener::{CollectingListener, EventListener, TestStatus},
    parse::{DASH_DIVIDER, EQ_DIVIDER, GTestXmlParser, UnittestParser},
    remote::RemoteTest,
};
use indoc::{formatdoc, indoc};
use pretty_assertions::assert_eq;
use std::sync::Arc;

static MATH_TEST_REPORT: &str = indoc! {r#"
    <?xml version="1.0" encoding="UTF-8"?>
    <testsuites tests="3" failures="1" disabled="0" errors="0" time="0.0015" name="AllTests">
      <testsuite name="MathTest" tests="3" failures="1" time="0.001">
        <testcase name="Add" status="run" time="0" classname="MathTest" />
        <testcase name="Sub" status="run" time="0.001" classname="MathTest">
          <failure message="math_test.cc:12&#x0A;Value of: 1 - 1" type=""><![CDATA[details]]></failure>
        </testcase>
        <testcase name="Mul" status="run" time="0" classname="MathTest" />
      </testsuite>
    </testsuites>
"#};

/// Runs a native GTest binary on the device and parses the XML report it leaves behind.
struct GTestBinary {
    name: &'static str,
    report: &'static str,
}

impl RemoteTest for GTestBinary {
    fn name(&self) -> &str {
        self.name
    }

    fn run(
        &mut self,
        device: &mut dyn Device,
        listener: &mut dyn EventListener,
    ) -> Result<(), DeviceUnavailableError> {
        let mut output = CollectingOutputReceiver::new();
        device.execute_shell_command(
            &format!("/data/local/tmp/{} --gtest_output=xml:{}", self.name, self.report),
            &mut output,
        )?;

        let parser = GTestXmlParser::new(self.name);
        match device.pull_file(self.report)? {
            Some(local) => parser.parse_file(&local, Some(&output.output()), listener),
            None => parser.parse(b"", Some(&output.output()), listener),
        }
        Ok(())
    }
}

/// Runs a Python unittest module on the device and parses its console output.
struct PythonUnittest {
    name: &'static str,
    command: &'static str,
}

impl RemoteTest for PythonUnittest {
    fn name(&self) -> &str {
        self.name
    }

    fn run(
        &mut self,
        device: &mut dyn Device,
        listener: &mut dyn EventListener,
    ) -> Result<(), DeviceUnavailableError> {
        let mut output = CollectingOutputReceiver::new();
        device.execute_shell_command(self.command, &mut output)?;

        let mut parser = UnittestParser::new(self.name);
        if let Err(error) = parser.feed(output.lines(), listener) {
            listener.report_event(&ResultEvent::run_failed(error.to_string()));
        }
        Ok(())
    }
}

const PYTHON_COMMAND: &str = "python3 -m unittest -v pkg.cls_test";

fn registry() -> Arc<TestRegistry> {
    let mut registry = TestRegistry::new();
    registry
        .register(TestClass::remote("native.MathTest", || GTestBinary {
            name: "native.MathTest",
            report: "/data/local/tmp/math_test.xml",
        }))
        .register(TestClass::remote("py.Suite", || PythonUnittest {
            name: "py.Suite",
            command: PYTHON_COMMAND,
        }))
        .register(TestClass::test_case(
            "host.SmokeTest",
            [TestMethod::passing("testBoots"), TestMethod::passing("testShell")],
        ));
    Arc::new(registry)
}

fn device() -> ScriptedDevice {
    let python_output = formatdoc! {"
            test_a (pkg.Cls) ... ok
            test_b (pkg.Cls) ... FAIL
            {eq}
            FAIL: test_b (pkg.Cls)
            {dash}
            Traceback (most recent call last):
            AssertionError: 1 != 2

            {dash}
            Ran 2 tests in 0.5s

            FAILED (failures=1)
        ",
        eq = EQ_DIVIDER,
        dash = DASH_DIVIDER,
    };
    ScriptedDevice::new()
        .with_file("/data/local/tmp/math_test.xml", MATH_TEST_REPORT)
        .with_shell_output(PYTHON_COMMAND, &python_output)
}

fn load_config(contents: &str) -> Result<DevtestConfig> {
    Ok(DevtestConfig::from_toml_str(
        contents,
        Utf8Path::new("devtest.toml"),
        &mut DefaultConfigWarnings,
    )?)
}

#[test]
fn host_test_runs_native_and_python_classes() -> Result<()> {
    test_init();

    let config = load_config(indoc! {r#"
        [host]
        classes = ["native.MathTest", "py.Suite", "host.SmokeTest"]
    "#})?;
    let host_test = HostTest::from_config(registry(), &config.host)?;
    assert_eq!(host_test.count_test_cases()?, 4);

    let mut device = device();
    let mut listener = CollectingListener::new();
    host_test.run(&mut device, &mut listener)?;

    let runs = listener.runs();
    let names: Vec<_> = runs.iter().map(|run| run.name.as_str()).collect();
    assert_eq!(names, ["native.MathTest", "py.Suite", "host.SmokeTest"]);
    ensure!(runs.iter().all(|run| run.complete), "every run is closed");

    let native = &runs[0];
    assert_eq!(native.expected_count, 3);
    assert_eq!(native.tests.len(), 3);
    assert_eq!(native.failed_count(), 1);

    let python = &runs[1];
    assert_eq!(python.expected_count, 2);
    assert_eq!(python.failed_count(), 1);
    ensure!(python.is_run_failure(), "failed python run reports a run failure");
    let failed = python
        .tests
        .values()
        .find(|result| result.status == TestStatus::Failed)
        .expect("one python test failed");
    assert_eq!(
        failed.trace.as_deref(),
        Some("Traceback (most recent call last):\nAssertionError: 1 != 2")
    );

    let smoke = &runs[2];
    assert_eq!(smoke.failed_count(), 0);
    assert_eq!(smoke.completed_tests().count(), 2);
    Ok(())
}

#[test]
fn missing_gtest_report_is_a_run_failure() -> Result<()> {
    test_init();

    let config = load_config(indoc! {r#"
        [host]
        classes = ["native.MathTest"]
    "#})?;
    let host_test = HostTest::from_config(registry(), &config.host)?;

    let mut device = ScriptedDevice::new();
    let mut listener = CollectingListener::new();
    host_test.run(&mut device, &mut listener)?;

    let run = listener.current_run().expect("a run was reported");
    ensure!(run.complete, "run is closed");
    ensure!(run.is_run_failure(), "missing report fails the run");
    assert_eq!(run.tests.len(), 0);
    Ok(())
}

#[test]
fn configured_shard_only_runs_its_classes() -> Result<()> {
    test_init();

    let config = load_config(indoc! {r#"
        [host]
        classes = ["native.MathTest", "py.Suite", "host.SmokeTest"]
        shard = "1/2"
        runtime-hint = "40s"
    "#})?;
    let host_test = HostTest::from_config(registry(), &config.host)?;
    assert_eq!(host_test.class_names(), ["py.Suite"]);

    let mut device = device();
    let mut listener = CollectingListener::new();
    host_test.run(&mut device, &mut listener)?;

    assert_eq!(device.commands, [PYTHON_COMMAND]);
    assert_eq!(listener.runs().len(), 1);
    assert_eq!(listener.runs()[0].name, "py.Suite");
    Ok(())
}
