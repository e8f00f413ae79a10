// Copyright (c) The devtest Contributors
// SPDX-License-Identifier: MIT OR Apache-2.0

use super::{
    INITIALIZATION_ERROR,
    descriptor::{TestClass, TestClassKind, TestMethod, TestRegistry},
    filter::TestFilter,
};
use crate::errors::HostTestError;
use devtest_metadata::TestIdentifier;
use indexmap::IndexSet;

/// A runnable unit discovered from a configured class.
#[derive(Clone, Debug, Eq, PartialEq)]
pub enum TestUnit {
    /// A composite suite, expanded into the methods of its member classes and run as one bracket.
    Suite {
        /// The suite class name.
        name: String,
        /// The member methods, in run order.
        methods: Vec<TestIdentifier>,
        /// Initialization errors of malformed member classes, reported after the methods.
        errors: Vec<(TestIdentifier, String)>,
    },

    /// A classic or annotated class, expanded into its filtered methods.
    Class {
        /// The class name.
        name: String,
        /// The filtered methods, in declaration order.
        methods: Vec<TestIdentifier>,
    },

    /// A single method, selected by name.
    Method {
        /// The method's identifier.
        id: TestIdentifier,
    },

    /// An opaque remote test, run atomically.
    Remote {
        /// The class name.
        name: String,
        /// The number of tests this unit counts as.
        weight: usize,
    },

    /// A malformed annotated class. Each initialization error is reported as a failed test.
    Malformed {
        /// The class name.
        name: String,
        /// The initialization errors.
        errors: Vec<String>,
    },

    /// A class that cannot be run. Counts as one test, and fails at run time.
    Unsupported {
        /// The class name.
        name: String,
    },
}

impl TestUnit {
    /// Returns a stable identity for this unit: `class#method` for a method, the class name
    /// otherwise.
    pub fn identity(&self) -> String {
        match self {
            Self::Method { id } => id.to_string(),
            Self::Suite { name, .. }
            | Self::Class { name, .. }
            | Self::Remote { name, .. }
            | Self::Malformed { name, .. }
            | Self::Unsupported { name } => name.clone(),
        }
    }

    /// Returns the class name this unit was resolved from.
    pub fn class_name(&self) -> &str {
        match self {
            Self::Method { id } => &id.class_name,
            Self::Suite { name, .. }
            | Self::Class { name, .. }
            | Self::Remote { name, .. }
            | Self::Malformed { name, .. }
            | Self::Unsupported { name } => name,
        }
    }

    /// Returns the number of tests this unit is expected to report.
    pub fn test_count(&self) -> usize {
        match self {
            Self::Suite {
                methods, errors, ..
            } => methods.len() + errors.len(),
            Self::Class { methods, .. } => methods.len(),
            Self::Method { .. } | Self::Unsupported { .. } => 1,
            Self::Remote { weight, .. } => *weight,
            Self::Malformed { errors, .. } => errors.len(),
        }
    }
}

/// The units resolved from a list of class names, in configuration order.
#[derive(Clone, Debug, Default, Eq, PartialEq)]
pub struct ResolvedUnits {
    units: Vec<TestUnit>,
}

impl ResolvedUnits {
    /// Returns the units.
    pub fn units(&self) -> &[TestUnit] {
        &self.units
    }

    /// Returns the total number of tests across all units.
    pub fn total_count(&self) -> usize {
        self.units.iter().map(TestUnit::test_count).sum()
    }

    /// Consumes `self`, returning the units.
    pub fn into_units(self) -> Vec<TestUnit> {
        self.units
    }
}

/// Turns configured class names into runnable [`TestUnit`]s.
#[derive(Clone, Copy, Debug)]
pub struct TestUnitResolver<'a> {
    registry: &'a TestRegistry,
    filter: &'a TestFilter,
    method: Option<&'a str>,
}

impl<'a> TestUnitResolver<'a> {
    /// Creates a resolver over `registry`, applying `filter` to every method.
    pub fn new(registry: &'a TestRegistry, filter: &'a TestFilter) -> Self {
        Self {
            registry,
            filter,
            method: None,
        }
    }

    /// Restricts resolution to a single method name.
    pub fn with_method(mut self, method: Option<&'a str>) -> Self {
        self.method = method;
        self
    }

    /// Looks up the named classes, failing if any is not registered.
    pub fn classes<S: AsRef<str>>(
        &self,
        class_names: &[S],
    ) -> Result<Vec<&'a TestClass>, HostTestError> {
        class_names
            .iter()
            .map(|name| self.lookup(name.as_ref()))
            .collect()
    }

    /// Resolves the named classes into units, in order.
    pub fn resolve<S: AsRef<str>>(&self, class_names: &[S]) -> Result<ResolvedUnits, HostTestError> {
        let units = self
            .classes(class_names)?
            .into_iter()
            .map(|class| self.resolve_class(class))
            .collect::<Result<_, _>>()?;
        Ok(ResolvedUnits { units })
    }

    /// Resolves a single class into a unit.
    pub fn resolve_class(&self, class: &TestClass) -> Result<TestUnit, HostTestError> {
        let name = class.name().to_owned();
        let unit = match class.kind() {
            TestClassKind::Remote(_) => TestUnit::Remote { name, weight: 1 },
            TestClassKind::RemoteTestCase { methods, .. } => TestUnit::Remote {
                weight: self.test_case_methods(class, methods)?.len(),
                name,
            },
            TestClassKind::TestCase(methods) => {
                let methods = self.test_case_methods(class, methods)?;
                match (self.method, methods.as_slice()) {
                    (Some(_), [id]) => TestUnit::Method { id: id.clone() },
                    _ => TestUnit::Class { name, methods },
                }
            }
            TestClassKind::Suite(_) => {
                let mut contents = SuiteContents::default();
                self.expand_suite(class, &mut contents)?;
                TestUnit::Suite {
                    name,
                    methods: contents.methods.into_iter().collect(),
                    errors: contents.errors,
                }
            }
            TestClassKind::Annotated { errors, .. } if !errors.is_empty() => TestUnit::Malformed {
                name,
                errors: errors.clone(),
            },
            TestClassKind::Annotated { methods, .. } => {
                let methods = self.annotated_methods(class, methods);
                match (self.method, methods.as_slice()) {
                    (Some(_), [id]) => TestUnit::Method { id: id.clone() },
                    _ => TestUnit::Class { name, methods },
                }
            }
            TestClassKind::Unsupported => TestUnit::Unsupported { name },
        };
        Ok(unit)
    }

    fn lookup(&self, name: &str) -> Result<&'a TestClass, HostTestError> {
        self.registry
            .get(name)
            .ok_or_else(|| HostTestError::UnknownClass(name.to_owned()))
    }

    fn expand_suite(
        &self,
        suite: &TestClass,
        contents: &mut SuiteContents,
    ) -> Result<(), HostTestError> {
        if !contents.visited.insert(suite.name().to_owned()) {
            return Ok(());
        }
        let TestClassKind::Suite(members) = suite.kind() else {
            return Ok(());
        };

        for member in members {
            let member = self.lookup(member)?;
            match member.kind() {
                TestClassKind::Suite(_) => self.expand_suite(member, contents)?,
                TestClassKind::TestCase(member_methods)
                | TestClassKind::RemoteTestCase {
                    methods: member_methods,
                    ..
                } => {
                    contents
                        .methods
                        .extend(self.test_case_methods(member, member_methods)?);
                }
                TestClassKind::Annotated { errors, .. } if !errors.is_empty() => {
                    let id = TestIdentifier::new(member.name(), INITIALIZATION_ERROR);
                    contents
                        .errors
                        .extend(errors.iter().map(|error| (id.clone(), error.clone())));
                }
                TestClassKind::Annotated {
                    methods: member_methods,
                    ..
                } => {
                    contents
                        .methods
                        .extend(self.annotated_methods(member, member_methods));
                }
                TestClassKind::Remote(_) | TestClassKind::Unsupported => {
                    return Err(HostTestError::UnsupportedClass(member.name().to_owned()));
                }
            }
        }
        Ok(())
    }

    /// Returns the filtered methods of an annotated class. A selected method name acts as a
    /// filter here rather than a requirement.
    fn annotated_methods(&self, class: &TestClass, methods: &[TestMethod]) -> Vec<TestIdentifier> {
        methods
            .iter()
            .filter(|method| self.method.is_none_or(|name| method.name() == name))
            .filter(|method| self.should_run(class, method))
            .map(|method| TestIdentifier::new(class.name(), method.name()))
            .collect()
    }

    /// Returns the filtered classic test methods of `class`: public methods named `test*`.
    fn test_case_methods(
        &self,
        class: &TestClass,
        methods: &[TestMethod],
    ) -> Result<Vec<TestIdentifier>, HostTestError> {
        let candidates: Vec<&TestMethod> = match self.method {
            Some(method_name) => {
                let method = class.method(method_name).ok_or_else(|| {
                    HostTestError::MethodNotFound {
                        class_name: class.name().to_owned(),
                        method_name: method_name.to_owned(),
                    }
                })?;
                vec![method]
            }
            None => methods.iter().collect(),
        };

        Ok(candidates
            .into_iter()
            .filter(|method| method.name().starts_with("test"))
            .filter(|method| self.should_run(class, method))
            .map(|method| TestIdentifier::new(class.name(), method.name()))
            .collect())
    }

    fn should_run(&self, class: &TestClass, method: &TestMethod) -> bool {
        let annotations = class
            .annotations()
            .iter()
            .chain(method.annotations())
            .map(String::as_str);
        self.filter
            .should_run(class.name(), method.name(), annotations)
    }
}

#[derive(Debug, Default)]
struct SuiteContents {
    visited: IndexSet<String>,
    methods: IndexSet<TestIdentifier>,
    errors: Vec<(TestIdentifier, String)>,
}
