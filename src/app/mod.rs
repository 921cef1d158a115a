//! Application layer: hexagonal ports, the sample pipeline service,
//! protocol orchestration, side-effect dispatch and manual dosing.

pub mod commands;
pub mod dispatch;
pub mod dose;
pub mod events;
pub mod orchestrator;
pub mod ports;
pub mod service;
