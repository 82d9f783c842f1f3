//! Core library for the Whitetail advisor.
//!
//! - [`agents`] holds provider configuration and the per-vendor backends.
//! - [`model_manager`] turns user requests into normalised AI replies.
//! - [`session`] keeps one conversation per provider and the loading flag.
//! - [`map_layer`] caches synthetic deer-density overlays per viewport.
//! - [`geo`] geocodes addresses and describes property boundaries.
//! - [`api`] exposes the command surface front ends call into.
//! - [`errors`] keeps the central error catalogue with human friendly metadata.
//! - [`logging`] records structured diagnostics in memory and via `log`.

pub mod agents;
pub mod api;
pub mod env;
pub mod errors;
pub mod geo;
pub mod logging;
pub mod map_layer;
pub mod media;
pub mod model_manager;
pub mod models;
pub mod session;
pub mod workers;
