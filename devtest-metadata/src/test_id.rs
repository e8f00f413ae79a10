// Copyright (c) The devtest Contributors
// SPDX-License-Identifier: MIT OR Apache-2.0

use crate::TestIdentifierParseError;
use serde::{Deserialize, Serialize};
use std::{fmt, str::FromStr};

/// Identifies a single test case: the suite (class) it belongs to plus the case (method) name.
///
/// Identity is value-based over both fields, so identifiers can be used as map keys.
#[derive(Clone, Debug, Eq, Hash, Ord, PartialEq, PartialOrd, Serialize, Deserialize)]
#[serde(rename_all = "kebab-case")]
pub struct TestIdentifier {
    /// The suite or class name, e.g. `com.example.FooTest`.
    pub class_name: String,

    /// The test case or method name, e.g. `testBar`.
    pub test_name: String,
}

impl TestIdentifier {
    /// Creates a new identifier.
    pub fn new(class_name: impl Into<String>, test_name: impl Into<String>) -> Self {
        Self {
            class_name: class_name.into(),
            test_name: test_name.into(),
        }
    }

    /// Returns the package portion of the class name, i.e. everything before the last `.`.
    ///
    /// Returns an empty string for classes in the default package.
    pub fn package_name(&self) -> &str {
        match self.class_name.rfind('.') {
            Some(idx) => &self.class_name[..idx],
            None => "",
        }
    }
}

impl fmt::Display for TestIdentifier {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}#{}", self.class_name, self.test_name)
    }
}

impl FromStr for TestIdentifier {
    type Err = TestIdentifierParseError;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        let (class_name, test_name) = s
            .split_once('#')
            .ok_or_else(|| TestIdentifierParseError::new(s, "expected the format class#test"))?;
        if class_name.is_empty() {
            return Err(TestIdentifierParseError::new(s, "class name is empty"));
        }
        if test_name.is_empty() {
            return Err(TestIdentifierParseError::new(s, "test name is empty"));
        }
        if test_name.contains('#') {
            return Err(TestIdentifierParseError::new(
                s,
                "test name must not contain `#`",
            ));
        }
        Ok(Self::new(class_name, test_name))
    }
}

#[cfg(feature = "proptest1")]
mod proptest_impls {
    use super::TestIdentifier;
    use proptest::prelude::*;

    impl Arbitrary for TestIdentifier {
        type Parameters = ();
        type Strategy = BoxedStrategy<Self>;

        fn arbitrary_with(_: Self::Parameters) -> Self::Strategy {
            (
                "[a-z]{1,6}(\\.[a-z]{1,6}){0,2}\\.[A-Z][a-zA-Z]{0,8}",
                "test[A-Z_][a-zA-Z0-9_]{0,10}",
            )
                .prop_map(|(class_name, test_name)| TestIdentifier::new(class_name, test_name))
                .boxed()
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use test_case::test_case;

    #[test]
    fn display_round_trips_through_from_str() {
        let id = TestIdentifier::new("com.example.FooTest", "testBar");
        assert_eq!(id.to_string(), "com.example.FooTest#testBar");
        assert_eq!("com.example.FooTest#testBar".parse::<TestIdentifier>(), Ok(id));
    }

    #[test_case("com.example.FooTest", "com.example" ; "nested package")]
    #[test_case("FooTest", "" ; "default package")]
    fn package_name(class_name: &str, expected: &str) {
        let id = TestIdentifier::new(class_name, "testBar");
        assert_eq!(id.package_name(), expected);
    }

    #[test_case("FooTest" ; "missing separator")]
    #[test_case("#testBar" ; "empty class")]
    #[test_case("FooTest#" ; "empty test")]
    #[test_case("FooTest#a#b" ; "extra separator")]
    fn from_str_errors(input: &str) {
        let err = input
            .parse::<TestIdentifier>()
            .expect_err("input should fail to parse");
        assert_eq!(err.input(), input);
    }
}
