//! Unit tests for individual components

mod audit_test;
mod config_test;
mod error_test;
mod model_test;
mod sink_test;
mod util_test;
