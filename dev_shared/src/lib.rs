//! Shared testing utilities: temporary files, an in-memory repository transport, a POM builder, and fixtures.

pub mod fs;
pub mod transport;
pub mod pom;
