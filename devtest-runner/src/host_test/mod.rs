// Copyright (c) The devtest Contributors
// SPDX-License-Identifier: MIT OR Apache-2.0

//! Running host-side test classes against a device.
//!
//! A [`HostTest`] is configured with a list of class names, looked up in a [`TestRegistry`]. The
//! classes are resolved into [`TestUnit`]s by a [`TestUnitResolver`] and run in order. A host test
//! can also be sharded across separate invocations ([`HostTest::shard`]) or split into one host
//! test per class ([`HostTest::split`]).

mod descriptor;
mod filter;
mod resolve;

pub use descriptor::*;
pub use filter::*;
pub use resolve::*;

use crate::{
    config::HostConfig,
    device::Device,
    errors::{HostTestError, ShardError, TestCaseError},
    helpers::plural,
    listener::EventListener,
    partition::ShardPlan,
};
use devtest_metadata::{Metrics, ResultEvent, TestIdentifier};
use std::{sync::Arc, time::Duration, time::Instant};
use tracing::{debug, info};

/// The name reported for the placeholder test of a malformed class.
pub const INITIALIZATION_ERROR: &str = "initializationError";

/// Runs a list of registered test classes.
#[derive(Clone, Debug)]
pub struct HostTest {
    registry: Arc<TestRegistry>,
    classes: Vec<String>,
    method: Option<String>,
    filter: TestFilter,
    collect_tests_only: bool,
    runtime_hint: Duration,
    skip_class_check: bool,
}

impl HostTest {
    /// Creates a host test from configuration.
    pub fn new(registry: Arc<TestRegistry>, config: &HostConfig) -> Self {
        let mut filter = TestFilter::new();
        for include in &config.include_filters {
            filter.add_include_filter(include.as_str());
        }
        for exclude in &config.exclude_filters {
            filter.add_exclude_filter(exclude.as_str());
        }
        for annotation in &config.include_annotations {
            filter.add_include_annotation(annotation.as_str());
        }
        for annotation in &config.exclude_annotations {
            filter.add_exclude_annotation(annotation.as_str());
        }

        Self {
            registry,
            classes: config.classes.clone(),
            method: config.method.clone(),
            filter,
            collect_tests_only: config.collect_tests_only,
            runtime_hint: config.runtime_hint,
            skip_class_check: false,
        }
    }

    /// Creates a host test from configuration, narrowed to the configured shard if there is one.
    pub fn from_config(registry: Arc<TestRegistry>, config: &HostConfig) -> Result<Self, ShardError> {
        let host_test = Self::new(registry, config);
        match config.shard {
            Some(plan) => host_test.shard(plan.count(), plan.index()),
            None => Ok(host_test),
        }
    }

    /// Returns the configured class names.
    pub fn class_names(&self) -> &[String] {
        &self.classes
    }

    /// Returns the filter applied to test methods.
    pub fn filter(&self) -> &TestFilter {
        &self.filter
    }

    /// Returns a mutable reference to the filter applied to test methods.
    pub fn filter_mut(&mut self) -> &mut TestFilter {
        &mut self.filter
    }

    /// Returns the expected runtime of this host test.
    pub fn runtime_hint(&self) -> Duration {
        self.runtime_hint
    }

    /// Enables or disables collect-tests-only mode.
    pub fn set_collect_tests_only(&mut self, collect_tests_only: bool) {
        self.collect_tests_only = collect_tests_only;
    }

    fn resolver(&self) -> TestUnitResolver<'_> {
        TestUnitResolver::new(&self.registry, &self.filter).with_method(self.method.as_deref())
    }

    /// Resolves the configured classes into units.
    pub fn resolve(&self) -> Result<ResolvedUnits, HostTestError> {
        self.resolver().resolve(&self.classes)
    }

    /// Returns the number of tests this host test is expected to report.
    pub fn count_test_cases(&self) -> Result<usize, HostTestError> {
        Ok(self.resolve()?.total_count())
    }

    fn check_classes(&self) -> Result<(), HostTestError> {
        if self.classes.is_empty() && !self.skip_class_check {
            return Err(HostTestError::MissingClassName);
        }
        if self.method.is_some() && self.classes.len() > 1 {
            return Err(HostTestError::MethodWithMultipleClasses);
        }
        Ok(())
    }

    /// Runs every configured class in order, reporting to `listener`.
    ///
    /// Configuration errors are reported before anything runs, except for unsupported classes,
    /// which fail when they are reached.
    pub fn run(
        &self,
        device: &mut dyn Device,
        listener: &mut dyn EventListener,
    ) -> Result<(), HostTestError> {
        self.check_classes()?;
        let resolver = self.resolver();
        let classes = resolver.classes(&self.classes)?;

        for class in classes {
            let unit = resolver.resolve_class(class)?;
            debug!(
                unit = %unit.identity(),
                "running {} {}",
                unit.test_count(),
                plural::tests_str(unit.test_count()),
            );
            self.run_unit(class, &unit, device, listener)?;
        }
        Ok(())
    }

    fn run_unit(
        &self,
        class: &TestClass,
        unit: &TestUnit,
        device: &mut dyn Device,
        listener: &mut dyn EventListener,
    ) -> Result<(), HostTestError> {
        match unit {
            TestUnit::Remote { .. } => self.run_remote(class, device, listener),
            TestUnit::Suite {
                name,
                methods,
                errors,
            } => self.run_methods(name, methods, errors, device, listener),
            TestUnit::Class { name, methods } => {
                self.run_methods(name, methods, &[], device, listener)
            }
            TestUnit::Method { id } => self.run_methods(
                class.name(),
                std::slice::from_ref(id),
                &[],
                device,
                listener,
            ),
            TestUnit::Malformed { name, errors } => {
                report_malformed(name, errors, listener);
                Ok(())
            }
            TestUnit::Unsupported { name } => Err(HostTestError::UnsupportedClass(name.clone())),
        }
    }

    fn run_remote(
        &self,
        class: &TestClass,
        device: &mut dyn Device,
        listener: &mut dyn EventListener,
    ) -> Result<(), HostTestError> {
        let factory = match class.kind() {
            TestClassKind::Remote(factory) | TestClassKind::RemoteTestCase { factory, .. } => {
                factory
            }
            _ => return Err(HostTestError::UnsupportedClass(class.name().to_owned())),
        };

        let mut test = factory();
        let mut filter = self.filter.clone();
        if let Some(method) = &self.method {
            filter.add_include_filter(format!("{}#{method}", class.name()));
        }
        test.apply_filter(&filter)?;
        if self.collect_tests_only {
            test.set_collect_tests_only()?;
        }
        test.run(device, listener)?;
        Ok(())
    }

    fn run_methods(
        &self,
        run_name: &str,
        ids: &[TestIdentifier],
        errors: &[(TestIdentifier, String)],
        device: &mut dyn Device,
        listener: &mut dyn EventListener,
    ) -> Result<(), HostTestError> {
        // Look everything up before the run starts, so a lookup failure never leaves an open
        // bracket.
        let methods = ids
            .iter()
            .map(|id| {
                let class = self
                    .registry
                    .get(&id.class_name)
                    .ok_or_else(|| HostTestError::UnknownClass(id.class_name.clone()))?;
                let method =
                    class
                        .method(&id.test_name)
                        .ok_or_else(|| HostTestError::MethodNotFound {
                            class_name: id.class_name.clone(),
                            method_name: id.test_name.clone(),
                        })?;
                Ok((id, method))
            })
            .collect::<Result<Vec<_>, HostTestError>>()?;

        let start = Instant::now();
        listener.report_event(&ResultEvent::run_started(
            run_name,
            methods.len() + errors.len(),
        ));

        if self.collect_tests_only {
            for (id, _) in methods {
                listener.report_event(&ResultEvent::test_started(id.clone()));
                listener.report_event(&ResultEvent::test_ended(id.clone(), Metrics::new()));
            }
            report_initialization_errors(errors, listener);
            listener.report_event(&ResultEvent::run_ended(0, Metrics::new()));
            return Ok(());
        }

        for (id, method) in methods {
            listener.report_event(&ResultEvent::test_started(id.clone()));
            match method.invoke(device) {
                Ok(()) => {}
                Err(TestCaseError::Failure(trace)) => {
                    listener.report_event(&ResultEvent::test_failed(id.clone(), trace));
                }
                Err(TestCaseError::DeviceUnavailable(error)) => {
                    info!(%id, %error, "device became unavailable, ending run");
                    let message = error.to_string();
                    listener.report_event(&ResultEvent::test_failed(id.clone(), message.clone()));
                    listener.report_event(&ResultEvent::test_ended(id.clone(), Metrics::new()));
                    listener.report_event(&ResultEvent::run_failed(message));
                    listener.report_event(&ResultEvent::run_ended(
                        elapsed_millis(start),
                        Metrics::new(),
                    ));
                    return Err(error.into());
                }
            }
            listener.report_event(&ResultEvent::test_ended(id.clone(), Metrics::new()));
        }
        report_initialization_errors(errors, listener);

        listener.report_event(&ResultEvent::run_ended(elapsed_millis(start), Metrics::new()));
        Ok(())
    }

    /// Returns the host test for one shard out of `shard_count`, assigning whole classes to
    /// shards round-robin in configuration order.
    ///
    /// If the shard receives no classes, a stub is returned that runs nothing and has a zero
    /// runtime hint.
    pub fn shard(&self, shard_count: usize, shard_index: usize) -> Result<HostTest, ShardError> {
        let plan = ShardPlan::new(shard_index, shard_count)?;
        if self.classes.is_empty() {
            return Err(HostTestError::MissingClassName.into());
        }
        self.check_classes()?;

        let total_count = self.count_test_cases()?;
        let classes: Vec<String> = plan.select(&self.classes).cloned().collect();
        if classes.is_empty() {
            debug!(%plan, "no classes in shard, returning a stub");
            return Ok(HostTest {
                classes,
                runtime_hint: Duration::ZERO,
                skip_class_check: true,
                ..self.clone()
            });
        }

        let mut shard = HostTest {
            classes,
            ..self.clone()
        };
        let shard_count = shard.count_test_cases()?;
        if shard_count > total_count {
            return Err(ShardError::CountExceeded {
                shard_count,
                total_count,
            });
        }
        shard.runtime_hint = if shard_count == 0 {
            Duration::ZERO
        } else {
            prorate(self.runtime_hint, shard_count, total_count)
        };
        Ok(shard)
    }

    /// Splits this host test into one host test per class.
    ///
    /// Returns `None` if there is only one class.
    pub fn split(&self) -> Result<Option<Vec<HostTest>>, HostTestError> {
        if self.classes.is_empty() {
            return Err(HostTestError::MissingClassName);
        }
        self.check_classes()?;
        if self.classes.len() == 1 {
            return Ok(None);
        }

        let class_count = self.classes.len();
        let tests = self
            .classes
            .iter()
            .map(|class| HostTest {
                classes: vec![class.clone()],
                runtime_hint: prorate(self.runtime_hint, 1, class_count),
                ..self.clone()
            })
            .collect();
        Ok(Some(tests))
    }
}

fn report_malformed(name: &str, errors: &[String], listener: &mut dyn EventListener) {
    let id = TestIdentifier::new(name, INITIALIZATION_ERROR);
    let errors: Vec<_> = errors.iter().map(|error| (id.clone(), error.clone())).collect();
    listener.report_event(&ResultEvent::run_started(name, errors.len()));
    report_initialization_errors(&errors, listener);
    listener.report_event(&ResultEvent::run_ended(0, Metrics::new()));
}

fn report_initialization_errors(
    errors: &[(TestIdentifier, String)],
    listener: &mut dyn EventListener,
) {
    for (id, error) in errors {
        listener.report_event(&ResultEvent::test_started(id.clone()));
        listener.report_event(&ResultEvent::test_failed(id.clone(), error.clone()));
        listener.report_event(&ResultEvent::test_ended(id.clone(), Metrics::new()));
    }
}

fn prorate(hint: Duration, part: usize, total: usize) -> Duration {
    if total == 0 {
        return Duration::ZERO;
    }
    let millis = hint.as_millis() * part as u128 / total as u128;
    Duration::from_millis(u64::try_from(millis).unwrap_or(u64::MAX))
}

fn elapsed_millis(start: Instant) -> u64 {
    u64::try_from(start.elapsed().as_millis()).unwrap_or(u64::MAX)
}
