//! Page identifiers and constants for MarlinDB storage.

use serde::{Deserialize, Serialize};

/// Default page size in bytes (16 KB).
pub const PAGE_SIZE: usize = 16 * 1024;

/// Unique identifier for a page within the database.
///
/// PageId consists of a file ID and a page number within that file.
/// File 0 is reserved for catalog pages (the index root registry lives
/// there); index files use file IDs 1 and up.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub struct PageId {
    /// File identifier.
    pub file_id: u32,
    /// Page number within the file (0-indexed).
    pub page_num: u32,
}

impl PageId {
    /// Serialized size of a page id in bytes.
    pub const ENCODED_SIZE: usize = 8;

    /// Sentinel meaning "no page". Encodes as all-ones, so zeroed pages
    /// never decode to it by accident.
    pub const INVALID: PageId = PageId {
        file_id: u32::MAX,
        page_num: u32::MAX,
    };

    /// Creates a new PageId.
    pub fn new(file_id: u32, page_num: u32) -> Self {
        Self { file_id, page_num }
    }

    /// Returns true if this is not the INVALID sentinel.
    pub fn is_valid(&self) -> bool {
        *self != Self::INVALID
    }

    /// Serializes to the fixed 8-byte on-page form: page number in the
    /// low four bytes, file id in the high four, little-endian.
    pub fn to_bytes(&self) -> [u8; Self::ENCODED_SIZE] {
        let mut buf = [0u8; Self::ENCODED_SIZE];
        buf[..4].copy_from_slice(&self.page_num.to_le_bytes());
        buf[4..].copy_from_slice(&self.file_id.to_le_bytes());
        buf
    }

    /// Deserializes from the fixed 8-byte on-page form.
    pub fn from_bytes(buf: &[u8]) -> Self {
        Self {
            page_num: u32::from_le_bytes([buf[0], buf[1], buf[2], buf[3]]),
            file_id: u32::from_le_bytes([buf[4], buf[5], buf[6], buf[7]]),
        }
    }
}

impl std::fmt::Display for PageId {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        if self.is_valid() {
            write!(f, "{}.{}", self.file_id, self.page_num)
        } else {
            f.write_str("-")
        }
    }
}

/// Page types in MarlinDB storage.
///
/// The tag is the first byte of every formatted page and must stay stable:
/// readers dispatch on it.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[repr(u8)]
pub enum PageType {
    /// Unallocated/free page.
    Free = 0,
    /// B+ tree leaf page.
    BTreeLeaf = 1,
    /// B+ tree internal page.
    BTreeInternal = 2,
    /// Index root registry page.
    IndexRoots = 3,
}

impl PageType {
    /// Decodes a tag byte, returning None for unknown values.
    pub fn from_u8(tag: u8) -> Option<Self> {
        match tag {
            0 => Some(PageType::Free),
            1 => Some(PageType::BTreeLeaf),
            2 => Some(PageType::BTreeInternal),
            3 => Some(PageType::IndexRoots),
            _ => None,
        }
    }
}
