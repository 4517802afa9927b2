//! Repository layer
//!
//! Repositories are the agent's view of the coordination service. They
//! expose only the calls each component needs, without business logic,
//! and are trait-based so the controller and transport can be driven by
//! in-memory fakes in tests.

mod jobs;
mod messages;

// Re-export traits
pub use jobs::JobRepository;
pub use messages::MessageRepository;
