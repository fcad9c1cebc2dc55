//! tpcfast-io: Snapshot files and hit I/O for tpcfast.
//!
//! A snapshot stores a finished transform as its calibration record
//! followed by the relocatable region verbatim. Reading maps the file with
//! memmap2 and uses the region in place.
//!

mod error;
mod reader;
pub mod snapshot;
mod writer;

pub use error::{Error, Result};
pub use reader::{read_hits_csv, MappedFileReader, MappedRegion, SnapshotReader};
pub use snapshot::{CalibrationRecord, SnapshotHeader, SNAPSHOT_MAGIC, SNAPSHOT_VERSION};
pub use writer::{rewrite_calibration, SnapshotWriter, SpacePointWriter};
