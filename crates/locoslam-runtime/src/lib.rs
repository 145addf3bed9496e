//! `locoslam-runtime` – the running mapping service.
//!
//! Wires the spatial core to the robot and to remote callers, and keeps the
//! map fresh.
//!
//! # Modules
//!
//! - [`service`] – [`SlamService`][service::SlamService]: every remote
//!   operation (transforms, obstacle edits, map updates, resets) over one
//!   owned map.
//! - [`service_loop`] – [`ServiceLoop`][service_loop::ServiceLoop]: the
//!   single-consumer loop that interleaves remote calls with periodic
//!   refreshes, and the [`RefreshHook`][service_loop::RefreshHook] that
//!   decides when it stops.
//! - [`refresh_guard`] – [`RefreshGuard`][refresh_guard::RefreshGuard]:
//!   escalates reporting once refreshes keep failing.
//! - [`telemetry`] – [`init_tracing`][telemetry::init_tracing]: global
//!   `tracing` subscriber with an optional OTLP span exporter.

pub mod refresh_guard;
pub mod service;
pub mod service_loop;
pub mod telemetry;

pub use refresh_guard::RefreshGuard;
pub use service::{RefreshReport, SlamService, SlamSettings};
pub use service_loop::{DefaultRefresh, LoopControl, RefreshHook, ServiceLoop};
pub use telemetry::{LogFormat, TracerProviderGuard, init_tracing};
