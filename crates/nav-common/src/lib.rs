//! Common utilities and data structures shared by the navigation crates
//!
//! Every long-lived navigation structure allocates through the
//! [`NavAllocator`] facade defined here, so a single injected allocator can
//! account for (or fail) all graph and search-state memory.

pub mod alloc;
mod buffer;

pub use alloc::{
    AllocEvent, AllocHint, AllocStats, FailingAllocator, NavAllocator, SharedAllocator,
    SystemAllocator, TrackingAllocator, default_allocator,
};
pub use buffer::{NavBox, NavBuffer};

/// Error types for the library
#[derive(thiserror::Error, Debug, Clone, PartialEq, Eq)]
pub enum Error {
    #[error("out of memory: failed to allocate {size} bytes ({hint} memory)")]
    OutOfMemory { size: usize, hint: AllocHint },

    #[error("invalid configuration: {0}")]
    InvalidConfig(String),

    #[error("navigation manager not ready: {0}")]
    NotReady(String),

    #[error("graph error: {0}")]
    Graph(String),

    #[error("detour error: {0}")]
    Detour(String),
}

/// Result type for navigation operations
pub type Result<T> = std::result::Result<T, Error>;
