//! Command surface consumed by front ends.
//!
//! Versioned modules (currently `v1`) group the commands so the interface
//! stays stable while the controllers underneath change.

pub mod v1;
