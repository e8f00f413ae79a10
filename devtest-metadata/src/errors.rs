// Copyright (c) The devtest Contributors
// SPDX-License-Identifier: MIT OR Apache-2.0

use thiserror::Error;

/// An error that occurs while parsing a [`TestIdentifier`](crate::TestIdentifier) from its
/// `class#test` string form.
#[derive(Clone, Debug, Error, PartialEq, Eq)]
#[error("invalid test identifier `{input}`: {reason}")]
pub struct TestIdentifierParseError {
    input: String,
    reason: &'static str,
}

impl TestIdentifierParseError {
    pub(crate) fn new(input: impl Into<String>, reason: &'static str) -> Self {
        Self {
            input: input.into(),
            reason,
        }
    }

    /// Returns the input that failed to parse.
    pub fn input(&self) -> &str {
        &self.input
    }
}
