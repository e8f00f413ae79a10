// Copyright (c) The devtest Contributors
// SPDX-License-Identifier: MIT OR Apache-2.0

use crate::listener::EventListener;
use devtest_metadata::{ResultEvent, TestIdentifier};
use std::collections::HashMap;

/// Records every event verbatim.
#[derive(Debug, Default)]
pub(crate) struct EventRecorder {
    pub(crate) events: Vec<ResultEvent>,
}

impl EventListener for EventRecorder {
    fn report_event(&mut self, event: &ResultEvent) {
        self.events.push(event.clone());
    }
}

/// Checks that `events` forms exactly one well-formed run bracket.
pub(crate) fn check_bracketed(events: &[ResultEvent]) -> Result<(), String> {
    let (first, rest) = events.split_first().ok_or("no events")?;
    if !matches!(first, ResultEvent::RunStarted { .. }) {
        return Err(format!("first event is {first:?}"));
    }
    let (last, middle) = rest.split_last().ok_or("no RunEnded")?;
    if !matches!(last, ResultEvent::RunEnded { .. }) {
        return Err(format!("last event is {last:?}"));
    }

    let mut open: HashMap<&TestIdentifier, bool> = HashMap::new();
    for event in middle {
        match event {
            ResultEvent::RunStarted { .. } | ResultEvent::RunEnded { .. } => {
                return Err(format!("nested run event {event:?}"));
            }
            ResultEvent::RunFailed { .. } => {}
            ResultEvent::TestStarted { id } => {
                if open.insert(id, true) == Some(true) {
                    return Err(format!("{id} started twice"));
                }
            }
            ResultEvent::TestFailed { id, .. } => {
                if open.get(id) != Some(&true) {
                    return Err(format!("{id} failed outside of its bracket"));
                }
            }
            ResultEvent::TestEnded { id, .. } => {
                if open.insert(id, false) != Some(true) {
                    return Err(format!("{id} ended without starting"));
                }
            }
        }
    }
    match open.iter().find(|(_, is_open)| **is_open) {
        Some((id, _)) => Err(format!("{id} never ended")),
        None => Ok(()),
    }
}
