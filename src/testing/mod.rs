//! Collaborator abstractions and test doubles.
//!
//! The engine reaches outside the process in two places: a rollback resets
//! the working tree through version control, and agent-based replanning
//! asks an agent for a new plan. This module holds the traits for both and
//! mocks with controllable behavior.
//!
//! # Example
//!
//! ```rust,ignore
//! use ratchet::testing::{MockAgentProcess, MockGitOperations};
//!
//! let git = MockGitOperations::new().with_commit_hash("abc123");
//! let agent = MockAgentProcess::new().with_response("[]");
//! ```

pub mod mocks;
pub mod traits;

pub use mocks::*;
pub use traits::*;
