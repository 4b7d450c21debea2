//! Board-agnostic core logic for the nabbit rabbit daemon
//!
//! This crate contains all robot logic that does not depend on a specific
//! device node, socket or runtime:
//!
//! - Robot state machine (asleep / idle / interactive / playing)
//! - Choreography bytecode interpreter
//! - Closed-loop ear axis controller and notch detection
//! - Tag block layout, flags and application table
//! - Button click sequence state machine
//! - Hardware abstraction traits and configuration types

#![cfg_attr(not(test), no_std)]
#![deny(unsafe_code)]

pub mod button;
pub mod choreography;
pub mod config;
pub mod ears;
pub mod state;
pub mod tag;
pub mod traits;
