//! opsdeck - module ordering and offline sync engine for the operations
//! dashboard
//!
//! Two subsystems share one persistent key-value store:
//!
//! - [`order`] keeps a per-role, user-customizable ordering of the dashboard
//!   modules from [`registry`], with pin and in-progress flags.
//! - [`queue`] records mutations made while offline and replays them in
//!   order through [`handlers`] once [`orchestrator`] sees connectivity
//!   return.

pub mod api;
pub mod config;
pub mod connectivity;
pub mod error;
pub mod handlers;
pub mod models;
pub mod orchestrator;
pub mod order;
pub mod queue;
pub mod registry;
pub mod store;
