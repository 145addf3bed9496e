//! `locoslam-middleware` – the remote call boundary.
//!
//! Carries JSON requests between the mapping service, its callers, the robot
//! and the name registry without caring what the calls mean.
//!
//! # Modules
//!
//! - [`rpc`] – the [`RpcHandler`] seam and the single-consumer
//!   [`CallQueue`] that serialises remote calls onto the service loop.
//! - [`server`] – [`RpcServer`]: WebSocket server that feeds every text frame
//!   to a handler.
//! - [`client`] – [`RpcClient`]: request/response client with a per-call
//!   timeout.
//! - [`robot`] – the [`RobotSource`] collaborator trait, its remote
//!   implementation and a handler that exposes any source over the wire.
//! - [`sim`] – [`SimRobot`]: in-memory robot for headless runs and tests.
//! - [`discovery`] – [`NameServer`] plus `register` / `lookup` helpers.

pub mod client;
pub mod discovery;
pub mod robot;
pub mod rpc;
pub mod server;
pub mod sim;

pub use client::RpcClient;
pub use discovery::NameServer;
pub use robot::{RemoteRobot, RobotHandler, RobotSource};
pub use rpc::{CallQueue, RemoteCall, RpcHandler, call_queue};
pub use server::{BoundServer, RpcServer};
pub use sim::SimRobot;
