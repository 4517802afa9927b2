//! Data Transfer Objects
//!
//! Request and response bodies for the coordination service's messaging
//! endpoints. Job envelopes and result payloads live in `domain::job`
//! because the agent works with them directly.

pub mod messaging;
