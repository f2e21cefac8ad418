//! onion-layer core - platform-independent service lifecycle control
//!
//! This crate provides the host traits, configurations, error types and the
//! lifecycle controller shared by the process host and the facade crate.

mod config;
mod controller;
mod error;
mod service;

pub use config::*;
pub use controller::{ControllerStatus, Epoch, ServiceLifecycleController};
pub use error::*;
pub use service::*;
