// Copyright (c) The devtest Contributors
// SPDX-License-Identifier: MIT OR Apache-2.0

use std::collections::BTreeSet;

/// Name and annotation filters applied to test methods.
///
/// Name filters take one of three forms: a package (`com.example`), a class
/// (`com.example.FooTest`) or a single method (`com.example.FooTest#testBar`). A method runs if:
///
/// * it matches no exclude filter and carries no excluded annotation,
/// * it matches at least one include filter, if any are set, and
/// * it carries at least one included annotation, if any are set.
///
/// Annotations are collected from both the method and its class.
#[derive(Clone, Debug, Default, Eq, PartialEq)]
pub struct TestFilter {
    include_filters: BTreeSet<String>,
    exclude_filters: BTreeSet<String>,
    include_annotations: BTreeSet<String>,
    exclude_annotations: BTreeSet<String>,
}

impl TestFilter {
    /// Creates an empty filter, which matches everything.
    pub fn new() -> Self {
        Self::default()
    }

    /// Adds an include name filter.
    pub fn add_include_filter(&mut self, filter: impl Into<String>) -> &mut Self {
        self.include_filters.insert(filter.into());
        self
    }

    /// Adds an exclude name filter.
    pub fn add_exclude_filter(&mut self, filter: impl Into<String>) -> &mut Self {
        self.exclude_filters.insert(filter.into());
        self
    }

    /// Adds an annotation that tests must carry.
    pub fn add_include_annotation(&mut self, annotation: impl Into<String>) -> &mut Self {
        self.include_annotations.insert(annotation.into());
        self
    }

    /// Adds an annotation that excludes tests carrying it.
    pub fn add_exclude_annotation(&mut self, annotation: impl Into<String>) -> &mut Self {
        self.exclude_annotations.insert(annotation.into());
        self
    }

    /// Returns the include name filters.
    pub fn include_filters(&self) -> &BTreeSet<String> {
        &self.include_filters
    }

    /// Returns the exclude name filters.
    pub fn exclude_filters(&self) -> &BTreeSet<String> {
        &self.exclude_filters
    }

    /// Returns the included annotations.
    pub fn include_annotations(&self) -> &BTreeSet<String> {
        &self.include_annotations
    }

    /// Returns the excluded annotations.
    pub fn exclude_annotations(&self) -> &BTreeSet<String> {
        &self.exclude_annotations
    }

    /// Returns true if any include or exclude name filters are set.
    pub fn has_name_filters(&self) -> bool {
        !self.include_filters.is_empty() || !self.exclude_filters.is_empty()
    }

    /// Returns true if the method `method_name` on `class_name` should run.
    pub fn should_run<'a>(
        &self,
        class_name: &str,
        method_name: &str,
        annotations: impl IntoIterator<Item = &'a str>,
    ) -> bool {
        let matches = |filter: &String| name_matches(filter, class_name, method_name);
        if self.exclude_filters.iter().any(matches) {
            return false;
        }
        if !self.include_filters.is_empty() && !self.include_filters.iter().any(matches) {
            return false;
        }

        let mut included = self.include_annotations.is_empty();
        for annotation in annotations {
            if self.exclude_annotations.contains(annotation) {
                return false;
            }
            included |= self.include_annotations.contains(annotation);
        }
        included
    }
}

fn name_matches(filter: &str, class_name: &str, method_name: &str) -> bool {
    match filter.split_once('#') {
        Some((class, method)) => class == class_name && method == method_name,
        None => {
            let package = class_name.rsplit_once('.').map_or("", |(package, _)| package);
            filter == class_name || filter == package
        }
    }
}
