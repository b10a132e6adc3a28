//! Wardling Core Library
//!
//! This crate provides the core functionality for the Wardling application,
//! including spatial reach detection, session orchestration, voice dialogue,
//! and telemetry.

pub mod dialogue;
pub mod session;
pub mod spatial;
pub mod telemetry;
