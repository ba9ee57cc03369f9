//! Firmware update support.
//!
//! The update itself runs through the transfer session; this module holds
//! the checks that decide whether a firmware may be flashed at all.

pub mod gate;

pub use gate::{check, classify, Classification, GateDecision, NewDeviceReason};
