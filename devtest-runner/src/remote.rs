// Copyright (c) The devtest Contributors
// SPDX-License-Identifier: MIT OR Apache-2.0

use crate::{
    device::Device,
    errors::{DeviceUnavailableError, HostTestError},
    host_test::TestFilter,
    listener::EventListener,
};

/// A test that runs as a single opaque unit against a device.
///
/// Implementations report their own run brackets to the listener. The only error they return is
/// [`DeviceUnavailableError`]: test failures are reported as events.
pub trait RemoteTest {
    /// Returns a name for this test, used in error messages.
    fn name(&self) -> &str;

    /// Runs the test.
    fn run(
        &mut self,
        device: &mut dyn Device,
        listener: &mut dyn EventListener,
    ) -> Result<(), DeviceUnavailableError>;

    /// Restricts which tests run.
    ///
    /// The default implementation accepts only a filter without name filters.
    fn apply_filter(&mut self, filter: &TestFilter) -> Result<(), HostTestError> {
        if filter.has_name_filters() {
            Err(HostTestError::FiltersNotSupported(self.name().to_owned()))
        } else {
            Ok(())
        }
    }

    /// Switches the test into collect-tests-only mode, where tests are reported but not executed.
    ///
    /// The default implementation does not support this mode.
    fn set_collect_tests_only(&mut self) -> Result<(), HostTestError> {
        Err(HostTestError::CollectOnlyNotSupported(self.name().to_owned()))
    }
}
