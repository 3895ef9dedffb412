//! History stores for Unison agent loops.
//!
//! Each agent's committed steps are kept append-only under its identity.

pub mod in_memory;
pub mod file_backend;

pub use in_memory::InMemoryHistory;
pub use file_backend::FileHistory;
