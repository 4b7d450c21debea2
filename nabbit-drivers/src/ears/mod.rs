//! Ear drivers
//!
//! Two ways to drive the ears:
//!
//! - [`EncoderEars`]: closed-loop control over two H-bridge motors
//!   ([`PinMotor`]) with encoder edges fed by the caller
//! - [`EarCommand`] / [`EarReport`]: the byte protocol of the kernel ear
//!   driver exposed as `/dev/ear0` and `/dev/ear1`

pub mod chardev;
pub mod encoder;
pub mod pins;

pub use chardev::{EarCommand, EarReport};
pub use encoder::{EarUpdate, EncoderEars};
pub use pins::PinMotor;
