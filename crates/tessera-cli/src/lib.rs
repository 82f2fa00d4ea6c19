//! Scripted multi-peer simulations of the Tessera pipelines.
//!
//! Drives several in-process clients over a simulated network so the
//! session, membership and message flows can be watched in the logs without
//! a server.

#![forbid(unsafe_code)]
#![deny(missing_docs)]

pub mod scenario;

pub use scenario::{GROUP_NAME, Report, Scenario, ScenarioConfig, ScenarioError, run};
