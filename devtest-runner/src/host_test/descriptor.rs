// Copyright (c) The devtest Contributors
// SPDX-License-Identifier: MIT OR Apache-2.0

//! Statically registered test classes.
//!
//! Host tests are looked up by name in a [`TestRegistry`]. Each registered [`TestClass`] declares
//! what kind of test it is, and that kind decides how it is counted and run.

use crate::{device::Device, errors::TestCaseError, remote::RemoteTest};
use indexmap::IndexMap;
use std::{collections::BTreeSet, fmt, sync::Arc};

/// The body of a test method.
pub type TestBody = Arc<dyn Fn(&mut dyn Device) -> Result<(), TestCaseError> + Send + Sync>;

/// Creates a fresh instance of a remote test for each run.
pub type RemoteTestFactory = Arc<dyn Fn() -> Box<dyn RemoteTest> + Send + Sync>;

/// A single test method.
#[derive(Clone)]
pub struct TestMethod {
    name: String,
    annotations: BTreeSet<String>,
    body: TestBody,
}

impl TestMethod {
    /// Creates a new method with the given body.
    pub fn new(
        name: impl Into<String>,
        body: impl Fn(&mut dyn Device) -> Result<(), TestCaseError> + Send + Sync + 'static,
    ) -> Self {
        Self {
            name: name.into(),
            annotations: BTreeSet::new(),
            body: Arc::new(body),
        }
    }

    /// Creates a method that always passes.
    pub fn passing(name: impl Into<String>) -> Self {
        Self::new(name, |_| Ok(()))
    }

    /// Adds an annotation to this method.
    pub fn with_annotation(mut self, annotation: impl Into<String>) -> Self {
        self.annotations.insert(annotation.into());
        self
    }

    /// Returns the method name.
    pub fn name(&self) -> &str {
        &self.name
    }

    /// Returns the annotations on this method.
    pub fn annotations(&self) -> &BTreeSet<String> {
        &self.annotations
    }

    /// Runs the method body.
    pub fn invoke(&self, device: &mut dyn Device) -> Result<(), TestCaseError> {
        (self.body)(device)
    }
}

impl fmt::Debug for TestMethod {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("TestMethod")
            .field("name", &self.name)
            .field("annotations", &self.annotations)
            .finish_non_exhaustive()
    }
}

/// What kind of test a [`TestClass`] is.
#[derive(Clone)]
pub enum TestClassKind {
    /// An opaque test run atomically. Counts as one test.
    Remote(RemoteTestFactory),

    /// An opaque test that also declares classic test methods. It is run atomically, but counts
    /// as its filtered methods.
    RemoteTestCase {
        /// Creates the test.
        factory: RemoteTestFactory,
        /// The declared methods.
        methods: Vec<TestMethod>,
    },

    /// A classic test case. Methods whose names start with `test` are tests.
    TestCase(Vec<TestMethod>),

    /// A composite suite of other registered classes, run as a single bracket.
    Suite(Vec<String>),

    /// An annotated test class, where every declared method is a test.
    ///
    /// A class with initialization errors is malformed: each error is reported as one failed
    /// `initializationError` test, regardless of filters.
    Annotated {
        /// The declared test methods.
        methods: Vec<TestMethod>,
        /// Initialization errors, if the class is malformed.
        errors: Vec<String>,
    },

    /// Not a test devtest knows how to run.
    Unsupported,
}

impl fmt::Debug for TestClassKind {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Self::Remote(_) => f.write_str("Remote"),
            Self::RemoteTestCase { methods, .. } => f
                .debug_struct("RemoteTestCase")
                .field("methods", methods)
                .finish_non_exhaustive(),
            Self::TestCase(methods) => f.debug_tuple("TestCase").field(methods).finish(),
            Self::Suite(members) => f.debug_tuple("Suite").field(members).finish(),
            Self::Annotated { methods, errors } => f
                .debug_struct("Annotated")
                .field("methods", methods)
                .field("errors", errors)
                .finish(),
            Self::Unsupported => f.write_str("Unsupported"),
        }
    }
}

/// A registered test class.
#[derive(Clone, Debug)]
pub struct TestClass {
    name: String,
    annotations: BTreeSet<String>,
    kind: TestClassKind,
}

impl TestClass {
    /// Creates a class of the given kind.
    pub fn new(name: impl Into<String>, kind: TestClassKind) -> Self {
        Self {
            name: name.into(),
            annotations: BTreeSet::new(),
            kind,
        }
    }

    /// Creates a classic test case.
    pub fn test_case(name: impl Into<String>, methods: impl IntoIterator<Item = TestMethod>) -> Self {
        Self::new(name, TestClassKind::TestCase(methods.into_iter().collect()))
    }

    /// Creates an annotated test class.
    pub fn annotated(name: impl Into<String>, methods: impl IntoIterator<Item = TestMethod>) -> Self {
        Self::new(
            name,
            TestClassKind::Annotated {
                methods: methods.into_iter().collect(),
                errors: Vec::new(),
            },
        )
    }

    /// Creates a malformed annotated test class.
    pub fn malformed<I>(name: impl Into<String>, errors: I) -> Self
    where
        I: IntoIterator,
        I::Item: Into<String>,
    {
        Self::new(
            name,
            TestClassKind::Annotated {
                methods: Vec::new(),
                errors: errors.into_iter().map(Into::into).collect(),
            },
        )
    }

    /// Creates a composite suite of other registered classes.
    pub fn suite<I>(name: impl Into<String>, members: I) -> Self
    where
        I: IntoIterator,
        I::Item: Into<String>,
    {
        Self::new(
            name,
            TestClassKind::Suite(members.into_iter().map(Into::into).collect()),
        )
    }

    /// Creates an opaque remote test.
    pub fn remote<F, T>(name: impl Into<String>, factory: F) -> Self
    where
        F: Fn() -> T + Send + Sync + 'static,
        T: RemoteTest + 'static,
    {
        Self::new(
            name,
            TestClassKind::Remote(Arc::new(move || Box::new(factory()) as Box<dyn RemoteTest>)),
        )
    }

    /// Creates an opaque remote test that also declares classic test methods.
    pub fn remote_test_case<F, T>(
        name: impl Into<String>,
        factory: F,
        methods: impl IntoIterator<Item = TestMethod>,
    ) -> Self
    where
        F: Fn() -> T + Send + Sync + 'static,
        T: RemoteTest + 'static,
    {
        Self::new(
            name,
            TestClassKind::RemoteTestCase {
                factory: Arc::new(move || Box::new(factory()) as Box<dyn RemoteTest>),
                methods: methods.into_iter().collect(),
            },
        )
    }

    /// Creates a class that is not a supported test.
    pub fn unsupported(name: impl Into<String>) -> Self {
        Self::new(name, TestClassKind::Unsupported)
    }

    /// Adds an annotation to this class. Class annotations apply to every method.
    pub fn with_annotation(mut self, annotation: impl Into<String>) -> Self {
        self.annotations.insert(annotation.into());
        self
    }

    /// Returns the fully qualified class name.
    pub fn name(&self) -> &str {
        &self.name
    }

    /// Returns the class annotations.
    pub fn annotations(&self) -> &BTreeSet<String> {
        &self.annotations
    }

    /// Returns the kind of class.
    pub fn kind(&self) -> &TestClassKind {
        &self.kind
    }

    /// Returns the declared method called `name`, if any.
    pub fn method(&self, name: &str) -> Option<&TestMethod> {
        let methods = match &self.kind {
            TestClassKind::RemoteTestCase { methods, .. }
            | TestClassKind::TestCase(methods)
            | TestClassKind::Annotated { methods, .. } => methods,
            TestClassKind::Remote(_) | TestClassKind::Suite(_) | TestClassKind::Unsupported => {
                return None;
            }
        };
        methods.iter().find(|method| method.name == name)
    }
}

/// The set of test classes devtest can run, by name.
#[derive(Clone, Debug, Default)]
pub struct TestRegistry {
    classes: IndexMap<String, TestClass>,
}

impl TestRegistry {
    /// Creates an empty registry.
    pub fn new() -> Self {
        Self::default()
    }

    /// Registers a class, replacing any class with the same name.
    pub fn register(&mut self, class: TestClass) -> &mut Self {
        self.classes.insert(class.name.clone(), class);
        self
    }

    /// Looks up a class by name.
    pub fn get(&self, name: &str) -> Option<&TestClass> {
        self.classes.get(name)
    }

    /// Returns the number of registered classes.
    pub fn len(&self) -> usize {
        self.classes.len()
    }

    /// Returns true if no classes are registered.
    pub fn is_empty(&self) -> bool {
        self.classes.is_empty()
    }
}

impl FromIterator<TestClass> for TestRegistry {
    fn from_iter<I: IntoIterator<Item = TestClass>>(iter: I) -> Self {
        let mut registry = Self::new();
        for class in iter {
            registry.register(class);
        }
        registry
    }
}
