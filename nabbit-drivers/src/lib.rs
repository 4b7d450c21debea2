//! Ear, tag reader and button drivers
//!
//! This crate implements the hardware side of the traits and models in
//! nabbit-core:
//!
//! - Ear motors on H-bridge pins, two-ear encoder controller, and the
//!   `/dev/ear*` kernel driver protocol
//! - CR14 and ST25R391x tag reader state machines
//! - Async button edge source

#![cfg_attr(not(test), no_std)]
#![deny(unsafe_code)]

pub mod button;
pub mod ears;
pub mod rfid;
