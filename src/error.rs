use thiserror::Error;

/// Errors that can occur during store operations. The list is likely to
/// stay as is but marked as non-exhaustive to allow for future additions
/// without breaking the API.
#[derive(Error, Debug, PartialEq)]
#[cfg_attr(feature = "defmt", derive(defmt::Format))]
#[non_exhaustive]
pub enum Error {
    /// The partition offset has to be aligned to the flash erase unit.
    #[error("invalid partition offset")]
    InvalidPartitionOffset,

    /// The partition size has to be a whole number of flash pages, at
    /// least two of them, and each page must be able to hold the
    /// largest configured record behind its page header.
    #[error("invalid partition size")]
    InvalidPartitionSize,

    /// The flash driver's program or read granularity does not match
    /// the 16-bit word layout.
    #[error("unsupported flash geometry")]
    UnsupportedFlash,

    /// Page sequence numbering is violated, the rotation target was not
    /// erased, or the scan found no usable write position.
    #[error("storage structure corrupt")]
    Corrupt,

    /// The store has not been initialized yet.
    #[error("store not initialized")]
    NotReady,

    /// Payload is empty or longer than the configured maximum.
    #[error("invalid payload size")]
    PayloadSize,

    /// Record id out of range.
    #[error("invalid record id")]
    InvalidUid,

    /// The flash driver reported a program, erase or read failure.
    #[error("flash driver error")]
    Flash,

    /// Data read back from flash does not match its checksum.
    #[error("checksum mismatch")]
    Crc,

    /// A record with an out-of-range id was found during the scan.
    #[error("invalid record data")]
    Data,
}
