// Copyright (c) The devtest Contributors
// SPDX-License-Identifier: MIT OR Apache-2.0

//! Support for partitioning test units across separate invocations.
//!
//! Only count-based (round-robin) sharding is supported: item `i` of a collection, in discovery
//! order, belongs to shard `i % count`. The partition is a pure function of the input order, so
//! re-computing it with the same inputs always yields the same shards.

use crate::errors::{ShardError, ShardPlanParseError};
use serde::{Deserialize, Deserializer};
use std::{fmt, str::FromStr};

/// One shard out of a fixed number of shards.
#[derive(Clone, Copy, Debug, Eq, Hash, PartialEq)]
pub struct ShardPlan {
    index: usize,
    count: usize,
}

impl ShardPlan {
    /// Creates a new shard plan. `index` is zero-based and must be less than `count`.
    pub fn new(index: usize, count: usize) -> Result<Self, ShardError> {
        if count == 0 {
            return Err(ShardError::ZeroShardCount);
        }
        if index >= count {
            return Err(ShardError::IndexOutOfRange { index, count });
        }
        Ok(Self { index, count })
    }

    /// Returns every shard plan for `count` shards, in index order.
    pub fn all(count: usize) -> impl Iterator<Item = Self> + use<> {
        (0..count).map(move |index| Self { index, count })
    }

    /// Returns the zero-based index of this shard.
    pub fn index(&self) -> usize {
        self.index
    }

    /// Returns the total number of shards.
    pub fn count(&self) -> usize {
        self.count
    }

    /// Returns true if the item at position `position` (in discovery order) belongs to this shard.
    pub fn contains(&self, position: usize) -> bool {
        position % self.count == self.index
    }

    /// Returns the items that belong to this shard, preserving their relative order.
    pub fn select<I>(&self, items: I) -> impl Iterator<Item = I::Item> + use<I>
    where
        I: IntoIterator,
    {
        let plan = *self;
        items
            .into_iter()
            .enumerate()
            .filter_map(move |(position, item)| plan.contains(position).then_some(item))
    }
}

impl fmt::Display for ShardPlan {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}/{}", self.index, self.count)
    }
}

impl FromStr for ShardPlan {
    type Err = ShardPlanParseError;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        // The string looks like "<index>/<count>", with a zero-based index.
        let (index_str, count_str) = s.split_once('/').ok_or_else(|| {
            ShardPlanParseError::new(format!("expected input '{s}' to be in the format I/N"))
        })?;

        let index: usize = index_str.parse().map_err(|err| {
            ShardPlanParseError::new(format!("failed to parse index '{index_str}': {err}"))
        })?;
        let count: usize = count_str.parse().map_err(|err| {
            ShardPlanParseError::new(format!("failed to parse count '{count_str}': {err}"))
        })?;

        Self::new(index, count).map_err(|err| ShardPlanParseError::new(err.to_string()))
    }
}

impl<'de> Deserialize<'de> for ShardPlan {
    fn deserialize<D>(deserializer: D) -> Result<Self, D::Error>
    where
        D: Deserializer<'de>,
    {
        let s = String::deserialize(deserializer)?;
        s.parse().map_err(serde::de::Error::custom)
    }
}
