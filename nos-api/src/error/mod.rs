//! Error handling module for the NOS virtual memory manager
//!
//! Errors here describe failures confined to one process's fault resolution
//! or to a single collaborator call. Conditions that mean the kernel's own
//! bookkeeping is inconsistent are not represented: they panic.

use core::fmt;
use alloc::string::{String, ToString};

/// Common error type used throughout the paging subsystem
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum Error {
    /// The physical page pool is exhausted and nothing could be reclaimed
    OutOfMemory,
    /// Every swap slot is in use
    SwapFull,
    /// Device or file I/O failed
    IoError(String),
    /// A backing file returned fewer bytes than the page needs
    ShortRead {
        /// Bytes the page declared
        expected: usize,
        /// Bytes the file actually produced
        actual: usize,
    },
    /// Access to an address with no backing and no stack-growth justification
    InvalidAccess(usize),
    /// Access violating the page's permissions
    ProtectionViolation(usize),
    /// The virtual page already has a hardware mapping
    AlreadyMapped(usize),
    /// Resource not found
    NotFound(String),
    /// Invalid argument
    InvalidArgument(String),
}

impl fmt::Display for Error {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Error::OutOfMemory => write!(f, "Out of memory"),
            Error::SwapFull => write!(f, "Swap space exhausted"),
            Error::IoError(msg) => write!(f, "I/O error: {}", msg),
            Error::ShortRead { expected, actual } => {
                write!(f, "Short read: expected {} bytes, got {}", expected, actual)
            }
            Error::InvalidAccess(addr) => write!(f, "Invalid access at {:#x}", addr),
            Error::ProtectionViolation(addr) => write!(f, "Protection violation at {:#x}", addr),
            Error::AlreadyMapped(addr) => write!(f, "Page {:#x} is already mapped", addr),
            Error::NotFound(msg) => write!(f, "Not found: {}", msg),
            Error::InvalidArgument(msg) => write!(f, "Invalid argument: {}", msg),
        }
    }
}

/// Result type for operations that can fail
pub type Result<T> = core::result::Result<T, Error>;

/// Creates a new invalid argument error
pub fn invalid_argument(msg: &str) -> Error {
    Error::InvalidArgument(msg.to_string())
}

/// Creates a new I/O error
pub fn io_error(msg: &str) -> Error {
    Error::IoError(msg.to_string())
}

/// Creates a new not found error
pub fn not_found(msg: &str) -> Error {
    Error::NotFound(msg.to_string())
}

#[cfg(test)]
mod tests {
    use super::*;
    use alloc::format;

    #[test]
    fn test_error_display() {
        assert_eq!(format!("{}", Error::OutOfMemory), "Out of memory");
        assert_eq!(format!("{}", Error::InvalidAccess(0xc000_0000)), "Invalid access at 0xc0000000");
        assert_eq!(
            format!("{}", Error::ShortRead { expected: 10, actual: 3 }),
            "Short read: expected 10 bytes, got 3"
        );
        assert_eq!(format!("{}", io_error("disk")), "I/O error: disk");
    }

    #[test]
    fn test_error_helpers() {
        assert_eq!(invalid_argument("bad"), Error::InvalidArgument("bad".to_string()));
        assert_eq!(not_found("frame"), Error::NotFound("frame".to_string()));
    }
}
