#![feature(int_roundings)]

//! Domain vocabulary for the Mirage generation platform.
//!
//! This crate is dependency-light on purpose: everything in it is pure
//! data and pure logic (job kinds, the job state machine, parameter
//! validation, pricing). Anything that talks to the network or the
//! database lives in the sibling crates.

pub mod billing;
pub mod error;
pub mod job;
pub mod pricing;
pub mod types;

pub use billing::BillingMode;
pub use error::CoreError;
pub use job::{GenerationParams, JobKind, JobState, Resolution};
