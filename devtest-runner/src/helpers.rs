// Copyright (c) The devtest Contributors
// SPDX-License-Identifier: MIT OR Apache-2.0

//! General support code for devtest-runner.

/// Utilities for pluralizing various words based on count or plurality.
pub mod plural {
    /// Returns "test" if `count` is 1, otherwise "tests".
    pub fn tests_str(count: usize) -> &'static str {
        if count == 1 { "test" } else { "tests" }
    }

    /// Returns "shard" if `count` is 1, otherwise "shards".
    pub fn shards_str(count: usize) -> &'static str {
        if count == 1 { "shard" } else { "shards" }
    }

    /// Returns "attempt" if `count` is 1, otherwise "attempts".
    pub fn attempts_str(count: u32) -> &'static str {
        if count == 1 { "attempt" } else { "attempts" }
    }
}

/// Converts seconds to milliseconds, dropping anything below millisecond precision.
///
/// Used for Python unittest summaries. Negative and NaN inputs map to 0.
pub(crate) fn secs_to_millis_truncating(secs: f64) -> u64 {
    // `as` saturates and maps NaN to 0.
    (secs * 1000.0).trunc() as u64
}

/// Converts seconds to milliseconds, rounding to the nearest millisecond.
///
/// Used for GTest XML reports. Negative and NaN inputs map to 0.
pub(crate) fn secs_to_millis_rounding(secs: f64) -> u64 {
    (secs * 1000.0).round() as u64
}
