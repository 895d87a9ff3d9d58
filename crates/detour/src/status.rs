//! Status codes for Detour operations

/// Result type for Detour operations
pub type Result<T> = std::result::Result<T, Status>;

/// Failure codes returned by Detour operations
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Status {
    /// Provided parameter was invalid
    InvalidParam,
    /// Operation ran out of memory
    OutOfMemory,
    /// Operation exceeded buffer capacity
    BufferTooSmall,
    /// Value already exists
    AlreadyExists,
    /// Value does not exist or is not found
    NotFound,
}

impl std::error::Error for Status {}

impl std::fmt::Display for Status {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            Status::InvalidParam => write!(f, "Invalid parameter"),
            Status::OutOfMemory => write!(f, "Out of memory"),
            Status::BufferTooSmall => write!(f, "Buffer too small"),
            Status::AlreadyExists => write!(f, "Value already exists"),
            Status::NotFound => write!(f, "Value not found"),
        }
    }
}

impl From<Status> for nav_common::Error {
    fn from(status: Status) -> Self {
        nav_common::Error::Detour(status.to_string())
    }
}
