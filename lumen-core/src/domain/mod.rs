//! Core domain types
//!
//! This module contains the structures shared between the coordination
//! client (wire format) and the agent (execution). They describe what a job
//! is, how its edit pipeline is staged, and what travels over the
//! emulated push channel.

pub mod job;
pub mod message;
pub mod pipeline;
