//! Builders to construct the scheduling service from configuration.

pub mod service_builder;

pub use service_builder::MirrorSchedulingServiceBuilder;
