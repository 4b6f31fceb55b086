//! Error types for MarlinDB.

use crate::page::PageId;
use thiserror::Error;

/// Result type alias using MarlinError.
pub type Result<T> = std::result::Result<T, MarlinError>;

/// Errors that can occur in MarlinDB operations.
#[derive(Debug, Error)]
pub enum MarlinError {
    // I/O errors
    #[error("I/O error: {0}")]
    Io(#[from] std::io::Error),

    // Buffer pool errors
    #[error("Buffer pool full, unable to allocate frame")]
    BufferPoolFull,

    #[error("Page not found: {0}")]
    PageNotFound(PageId),

    #[error("Page still pinned: {0}")]
    PagePinned(PageId),

    // B+ tree errors
    #[error("Key too large: {size} bytes (max {max})")]
    KeyTooLarge { size: usize, max: usize },

    #[error("Invalid node type on page {0}")]
    InvalidNodeType(PageId),

    #[error("B+ tree corrupted: {0}")]
    TreeCorrupted(String),

    #[error("Index root registry page is full")]
    RegistryFull,

    // Configuration errors
    #[error("Invalid parameter: {name} = {value}")]
    InvalidParameter { name: String, value: String },

    // Internal errors
    #[error("Internal error: {0}")]
    Internal(String),
}
