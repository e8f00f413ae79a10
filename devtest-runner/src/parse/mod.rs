// Copyright (c) The devtest Contributors
// SPDX-License-Identifier: MIT OR Apache-2.0

//! Parsers that turn raw device-side test output into [`ResultEvent`](devtest_metadata::ResultEvent)s.
//!
//! Each parser handles one format and has its own failure policy:
//!
//! * [`UnittestParser`] reads Python unittest console output incrementally. Unexpected tokens are
//!   fatal.
//! * [`GTestXmlParser`] reads GTest XML reports. A malformed document degrades to a failed run.
//! * [`BenchmarkParser`] reads Google Benchmark JSON. A malformed document degrades to a failed
//!   run, and a malformed entry degrades to a failed test.

mod benchmark;
mod gtest_xml;
mod unittest;

pub use benchmark::*;
pub use gtest_xml::*;
pub use unittest::*;
