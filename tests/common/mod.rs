//! Common test infrastructure for the integration suites.

pub mod harness;
pub mod logging;

#[allow(unused_imports)]
pub use harness::{bounded_config, fixture, fixture_with_config, Fixture};
pub use logging::init_logging;
