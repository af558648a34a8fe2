//! Error types for Kerberos crypto operations

use thiserror::Error;

/// Broad classes of failure, used by the transport to pick a recovery path.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ErrorClass {
    /// Unknown enctype or bad key length. Setup or rekey must abort.
    Negotiation,
    /// Checksum or MIC mismatch. Drop the packet without comment.
    Integrity,
    /// Lengths, offsets or fragment counts out of range for one operation.
    Bounds,
    /// The underlying cipher or hash refused its input.
    Primitive,
}

/// Errors from key derivation and the buffer codec
#[derive(Debug, Error, Clone, PartialEq, Eq)]
pub enum Krb5Error {
    /// Enctype id is not in the registry
    #[error("unknown enctype: {etype}")]
    UnknownEnctype {
        /// The id that was looked up
        etype: u32,
    },

    /// Key material has the wrong length for the enctype
    #[error("invalid key length: expected {expected}, got {actual}")]
    InvalidKeyLength {
        /// Length the enctype requires
        expected: usize,
        /// Length that was supplied
        actual: usize,
    },

    /// Checksum did not match. Deliberately carries no detail.
    #[error("integrity check failed")]
    IntegrityCheckFailed,

    /// Region cannot hold the confounder and checksum
    #[error("message too short: {len} bytes, need at least {min}")]
    MessageTooShort {
        /// Length of the region
        len: usize,
        /// Minimum acceptable length
        min: usize,
    },

    /// Ciphertext is not a whole number of blocks for a padded enctype
    #[error("ciphertext length {len} is not a multiple of {block_len}")]
    MisalignedCiphertext {
        /// Length of the ciphertext
        len: usize,
        /// Cipher block length
        block_len: usize,
    },

    /// Padding recovered after a successful checksum was not well formed
    #[error("invalid padding")]
    InvalidPadding,

    /// Data region is not where the layout requires it
    #[error("data at offset {actual} must start at {expected}")]
    MisplacedData {
        /// Required start offset
        expected: usize,
        /// Start offset supplied
        actual: usize,
    },

    /// Supplied confounder is not `conf_len` bytes
    #[error("confounder must be {expected} bytes, got {actual}")]
    InvalidConfounder {
        /// Confounder length of the enctype
        expected: usize,
        /// Length supplied
        actual: usize,
    },

    /// Secure region is too small for the encoded output
    #[error("buffer too small: need {needed} bytes, have {available}")]
    BufferTooSmall {
        /// Bytes the operation would write
        needed: usize,
        /// Bytes reserved by the caller
        available: usize,
    },

    /// Range extends past the end of the buffer
    #[error("range {offset}+{len} out of bounds for buffer of {buffer_len}")]
    OutOfBounds {
        /// Start of the range
        offset: usize,
        /// Length of the range
        len: usize,
        /// Total buffer length
        buffer_len: usize,
    },

    /// Range spans more fragments than a single operation may address
    #[error("range spans {count} fragments, limit is {max}")]
    TooManyFragments {
        /// Fragments touched by the range
        count: usize,
        /// Fragment limit
        max: usize,
    },

    /// Cipher or hash primitive rejected the input
    #[error("{algorithm} failed: {reason}")]
    Primitive {
        /// Algorithm that failed
        algorithm: &'static str,
        /// What went wrong
        reason: &'static str,
    },
}

impl Krb5Error {
    /// Class of this error.
    pub fn class(&self) -> ErrorClass {
        match self {
            Self::UnknownEnctype { .. } | Self::InvalidKeyLength { .. } => ErrorClass::Negotiation,
            Self::IntegrityCheckFailed => ErrorClass::Integrity,
            Self::MessageTooShort { .. }
            | Self::MisalignedCiphertext { .. }
            | Self::InvalidPadding
            | Self::MisplacedData { .. }
            | Self::InvalidConfounder { .. }
            | Self::BufferTooSmall { .. }
            | Self::OutOfBounds { .. }
            | Self::TooManyFragments { .. } => ErrorClass::Bounds,
            Self::Primitive { .. } => ErrorClass::Primitive,
        }
    }

    /// Returns true if the connection cannot continue with its keys.
    ///
    /// Integrity and bounds errors only cost the packet in hand.
    pub fn is_fatal(&self) -> bool {
        matches!(self.class(), ErrorClass::Negotiation | ErrorClass::Primitive)
    }
}
