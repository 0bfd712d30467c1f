//! Orchestrate Claude - code-generator integration.
//!
//! The code-generating assistant is treated strictly as a subprocess: a
//! configured executable is invoked with the agent name and prompt, its
//! stdout is the contract (§9 "External tool embedding"). This crate owns no
//! business logic beyond spawning that process and mapping its exit status
//! and output into the `orchestrate_core::Generator` trait.

pub mod client;

pub use client::ClaudeCliGenerator;
