//! Error types for MXF container I/O.

use crate::file::Position;
use crate::ul::Ul;
use std::io;
use thiserror::Error;
use uuid::Uuid;

/// Errors that can occur during MXF operations.
#[derive(Error, Debug)]
pub enum MxfError {
    /// End of data reached while decoding a key or length.
    #[error("Truncated key/length at offset {offset}")]
    TruncatedKl {
        /// File offset of the first byte of the key.
        offset: Position,
    },

    /// A value field is shorter than its declared length.
    #[error("Truncated value: need {needed} bytes, have {available}")]
    TruncatedValue {
        /// Bytes the declared length requires.
        needed: u64,
        /// Bytes actually present.
        available: u64,
    },

    /// A BER length field is structurally invalid.
    #[error("Malformed length: {0}")]
    MalformedLength(String),

    /// A length does not fit the requested field or the signed length range.
    #[error("Length {length} exceeds limit {limit}")]
    LengthOverflow {
        /// The offending length.
        length: u64,
        /// Largest value the target field can carry.
        limit: u64,
    },

    /// A key was not found in the type registry.
    #[error("Unknown universal label {0}")]
    UnknownUl(Ul),

    /// A primer-local tag has no mapping.
    #[error("Unknown local tag 0x{0:04x}")]
    UnknownTag(u16),

    /// A strong reference's target UUID was never seen in the partition.
    #[error("Unresolved strong reference to {uuid}")]
    DanglingStrongRef {
        /// The target UUID that never appeared as an InstanceUID.
        uuid: Uuid,
    },

    /// A value is too large to materialise on this platform.
    #[error("Value of {size} bytes exceeds the addressable chunk size")]
    ChunkTooLarge {
        /// Requested materialisation size.
        size: u64,
    },

    /// Invalid partition structure.
    #[error("Invalid partition: {0}")]
    InvalidPartition(String),

    /// Invalid local set structure inside a metadata set.
    #[error("Invalid set: {0}")]
    InvalidSet(String),

    /// An operation needed a file or state the KLV item does not have.
    #[error("KLV item has no {0}")]
    Unattached(&'static str),

    /// A reserved or negative position was passed where a real one is required.
    #[error("Invalid file position {0}")]
    BadPosition(Position),

    /// Read syscall failure, tagged with the offset at which it occurred.
    #[error("Read failed at offset {offset}: {source}")]
    ReadFailed {
        /// Offset at which the read was attempted.
        offset: Position,
        /// Underlying IO error.
        source: io::Error,
    },

    /// Write syscall failure, tagged with the offset at which it occurred.
    #[error("Write failed at offset {offset}: {source}")]
    WriteFailed {
        /// Offset at which the write was attempted.
        offset: Position,
        /// Underlying IO error.
        source: io::Error,
    },

    /// IO error with no position context.
    #[error("IO error: {0}")]
    Io(#[from] io::Error),
}

/// Result type for MXF operations.
pub type Result<T> = std::result::Result<T, MxfError>;

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_error_display() {
        let err = MxfError::TruncatedKl { offset: 1000 };
        assert!(err.to_string().contains("1000"));

        let err = MxfError::LengthOverflow {
            length: 300,
            limit: 255,
        };
        assert!(err.to_string().contains("300"));
        assert!(err.to_string().contains("255"));

        let err = MxfError::UnknownTag(0x3c0a);
        assert_eq!(err.to_string(), "Unknown local tag 0x3c0a");
    }

    #[test]
    fn test_io_conversion() {
        let io_err = io::Error::new(io::ErrorKind::UnexpectedEof, "eof");
        let err: MxfError = io_err.into();
        assert!(matches!(err, MxfError::Io(_)));
    }
}
