//! Error types for tpcfast-core.

use thiserror::Error;

/// Result type alias for tpcfast operations.
pub type Result<T> = std::result::Result<T, Error>;

/// Core error types for tpcfast operations.
#[derive(Error, Debug, Clone, PartialEq)]
pub enum Error {
    /// Slice index outside `[0, count)`.
    #[error("invalid slice index: {slice} (detector has {count} slices)")]
    InvalidSlice { slice: usize, count: usize },

    /// Row index outside `[0, count)`.
    #[error("invalid row index: {row} (detector has {count} rows)")]
    InvalidRow { row: usize, count: usize },

    /// Construction protocol violation.
    #[error("construction error: {0}")]
    Construction(#[from] ConstructionError),

    /// The flat region does not hold a valid transform.
    #[error("region layout error: {0}")]
    Layout(#[from] LayoutError),

    /// Configuration error.
    #[error("configuration error: {0}")]
    ConfigError(String),
}

/// Errors raised while driving the two-phase construction.
#[derive(Error, Debug, Clone, PartialEq, Eq)]
pub enum ConstructionError {
    /// `start` was called with zero rows.
    #[error("number of rows must be positive")]
    ZeroRows,

    /// More rows than the region header can describe.
    #[error("too many rows: {0}")]
    TooManyRows(usize),

    /// Row index outside the reserved range.
    #[error("row index {row} out of range (0..{count})")]
    RowOutOfRange { row: usize, count: usize },

    /// Slice index outside the fixed slice range.
    #[error("slice index {slice} out of range (0..{count})")]
    SliceOutOfRange { slice: usize, count: usize },

    /// A row was declared with no pads.
    #[error("row {row} needs at least one pad")]
    InvalidPadCount { row: usize },

    /// `finish` was called before every row was initialized.
    #[error("only {set} of {expected} rows were initialized")]
    IncompleteRows { set: usize, expected: usize },

    /// `finish` was called before the drift volume lengths were set.
    #[error("TPC geometry was not set")]
    GeometryNotSet,

    /// `finish` was called before the drift calibration was set.
    #[error("drift calibration was not set")]
    CalibrationNotSet,

    /// The distortion engine rejected its input.
    #[error("distortion engine: {0}")]
    Distortion(String),
}

/// Errors raised when a byte region is adopted as a transform.
#[derive(Error, Debug, Clone, PartialEq, Eq)]
pub enum LayoutError {
    /// Region shorter than its declared contents.
    #[error("region too small: need {needed} bytes, have {actual}")]
    TooSmall { needed: usize, actual: usize },

    /// Region base address violates the required alignment.
    #[error("region base {address:#x} is not aligned to {alignment} bytes")]
    Misaligned { address: usize, alignment: usize },

    /// Region does not start with the expected magic number.
    #[error("bad region magic: {0:#010x}")]
    BadMagic(u32),

    /// Region was written by an incompatible layout version.
    #[error("unsupported region version: {0}")]
    UnsupportedVersion(u32),

    /// Region holds a different number of slices.
    #[error("region holds {found} slices, expected {expected}")]
    SliceCount { found: usize, expected: usize },

    /// Region holds no rows.
    #[error("region holds no rows")]
    NoRows,

    /// Region was built with a different distortion engine.
    #[error("region holds distortion kind {found}, expected {expected}")]
    DistortionKind { found: u32, expected: u32 },

    /// A section offset points outside the region or is misaligned.
    #[error("{section} section [{start}, {end}) invalid in a {size}-byte region")]
    BadSection {
        section: &'static str,
        start: usize,
        end: usize,
        size: usize,
    },

    /// The nested distortion sub-region is malformed.
    #[error("invalid distortion sub-region: {0}")]
    Distortion(String),
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_error_messages() {
        let err = Error::InvalidRow { row: 7, count: 4 };
        let expected = "invalid row index: 7 (detector has 4 rows)";
        assert_eq!(err.to_string(), expected);

        let err: Error = ConstructionError::IncompleteRows {
            set: 2,
            expected: 3,
        }
        .into();
        assert!(err.to_string().contains("only 2 of 3 rows"));
    }

    #[test]
    fn test_layout_error_conversion() {
        let err: Error = LayoutError::BadMagic(0xdead_beef).into();
        assert!(matches!(err, Error::Layout(LayoutError::BadMagic(_))));
        assert!(err.to_string().contains("0xdeadbeef"));
    }
}
