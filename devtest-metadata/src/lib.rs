// Copyright (c) The devtest Contributors
// SPDX-License-Identifier: MIT OR Apache-2.0

#![warn(missing_docs)]

//! Data model shared between devtest result producers and consumers.
//!
//! Every parser and executor in `devtest-runner` reports what happened as a stream of
//! [`ResultEvent`]s keyed by [`TestIdentifier`]. The types here are plain data: they carry no
//! runner logic and can be serialized for storage or transport.

mod errors;
mod events;
mod test_id;

pub use errors::*;
pub use events::*;
pub use test_id::*;
