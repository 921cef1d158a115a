//! GlucoGuard monitoring core.
//!
//! Glucose forecasting (constant-velocity Kalman filter), threshold
//! classification, and the three emergency protocols with their alarm,
//! caregiver-alert and drug-delivery side effects.  Everything outside the
//! core reaches it through the port traits in [`app::ports`].

#![deny(unused_must_use)]

pub mod adapters;
pub mod alarm;
pub mod app;
pub mod classify;
pub mod config;
pub mod error;
pub mod estimator;
pub mod fsm;
pub mod sensors;
