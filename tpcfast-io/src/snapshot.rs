//! Snapshot file format.
//!
//! ```text
//! SnapshotHeader (72 bytes) | zero padding | region (region_size bytes)
//! ```
//!
//! All fields are little-endian. `region_offset` is a multiple of the
//! region alignment, so a page-aligned memory map of the file yields an
//! aligned region without copying.

use crate::{Error, Result};
use bytemuck::{Pod, Zeroable};
use std::mem::size_of;
use tpcfast_core::flat::align_up;
use tpcfast_core::{Calibration, FlatBuffer};

/// Magic bytes at the start of every snapshot.
pub const SNAPSHOT_MAGIC: [u8; 8] = *b"TPCFSNAP";

/// Snapshot format version.
pub const SNAPSHOT_VERSION: u32 = 1;

/// Size of the snapshot header in bytes.
pub const SNAPSHOT_HEADER_SIZE: usize = size_of::<SnapshotHeader>();

/// Calibration as stored in a snapshot.
#[repr(C)]
#[derive(Debug, Clone, Copy, PartialEq, Default, Pod, Zeroable)]
pub struct CalibrationRecord {
    /// Calibration time stamp.
    pub time_stamp: i64,
    /// T0 [time bin].
    pub t0: f32,
    /// Drift velocity [cm/time bin].
    pub v_drift: f32,
    /// Drift velocity slope in y [1/time bin].
    pub v_drift_corr_y: f32,
    /// Drift length offset [cm].
    pub l_drift_corr: f32,
    /// Time-of-flight coefficient.
    pub tof_corr: f32,
    /// Primary vertex z [cm].
    pub prim_vtx_z: f32,
    /// Alignment shift in z [cm].
    pub alignment_z: f32,
    /// Zero; pads the record to 40 bytes.
    pub reserved: f32,
}

impl From<&Calibration> for CalibrationRecord {
    fn from(c: &Calibration) -> Self {
        Self {
            time_stamp: c.time_stamp,
            t0: c.t0,
            v_drift: c.v_drift,
            v_drift_corr_y: c.v_drift_corr_y,
            l_drift_corr: c.l_drift_corr,
            tof_corr: c.tof_corr,
            prim_vtx_z: c.prim_vtx_z,
            alignment_z: c.alignment_z,
            reserved: 0.0,
        }
    }
}

impl From<CalibrationRecord> for Calibration {
    fn from(r: CalibrationRecord) -> Self {
        Self {
            time_stamp: r.time_stamp,
            t0: r.t0,
            v_drift: r.v_drift,
            v_drift_corr_y: r.v_drift_corr_y,
            l_drift_corr: r.l_drift_corr,
            tof_corr: r.tof_corr,
            prim_vtx_z: r.prim_vtx_z,
            alignment_z: r.alignment_z,
        }
    }
}

/// Header at offset zero of a snapshot file.
#[repr(C)]
#[derive(Debug, Clone, Copy, PartialEq, Pod, Zeroable)]
pub struct SnapshotHeader {
    /// [`SNAPSHOT_MAGIC`].
    pub magic: [u8; 8],
    /// [`SNAPSHOT_VERSION`].
    pub version: u32,
    /// Distortion engine tag of the stored region.
    pub distortion_kind: u32,
    /// File offset of the region.
    pub region_offset: u64,
    /// Size of the region in bytes.
    pub region_size: u64,
    /// Calibration applied on load.
    pub calibration: CalibrationRecord,
}

impl SnapshotHeader {
    /// Header for a region of `region_size` bytes.
    #[must_use]
    pub fn new(distortion_kind: u32, region_size: usize, calibration: &Calibration) -> Self {
        Self {
            magic: SNAPSHOT_MAGIC,
            version: SNAPSHOT_VERSION,
            distortion_kind,
            region_offset: region_offset() as u64,
            region_size: region_size as u64,
            calibration: calibration.into(),
        }
    }

    /// Reads and validates a header from the start of `bytes`.
    ///
    /// `file_size` bounds the region; pass `None` to skip that check.
    ///
    /// # Errors
    /// Returns [`Error::InvalidFormat`] for a short, foreign or inconsistent
    /// header.
    pub fn parse(bytes: &[u8], file_size: Option<u64>) -> Result<Self> {
        let head = bytes.get(..SNAPSHOT_HEADER_SIZE).ok_or_else(|| {
            Error::InvalidFormat(format!(
                "{} bytes is too short for a snapshot header",
                bytes.len()
            ))
        })?;
        let header: Self = bytemuck::pod_read_unaligned(head);
        if header.magic != SNAPSHOT_MAGIC {
            return Err(Error::InvalidFormat("not a tpcfast snapshot".to_string()));
        }
        if header.version != SNAPSHOT_VERSION {
            return Err(Error::InvalidFormat(format!(
                "unsupported snapshot version {}",
                header.version
            )));
        }
        let offset = header.region_offset;
        let aligned = offset.is_multiple_of(FlatBuffer::ALIGNMENT as u64);
        if offset < SNAPSHOT_HEADER_SIZE as u64 || !aligned {
            return Err(Error::InvalidFormat(format!("bad region offset {offset}")));
        }
        if let Some(size) = file_size {
            let end = header.region_offset.checked_add(header.region_size);
            if end.is_none_or(|end| end > size) {
                return Err(Error::InvalidFormat(format!(
                    "region [{}, +{}) exceeds the {size}-byte file",
                    header.region_offset, header.region_size
                )));
            }
        }
        Ok(header)
    }

    /// Stored calibration.
    #[must_use]
    pub fn calibration(&self) -> Calibration {
        self.calibration.into()
    }
}

/// File offset at which the region starts.
#[must_use]
pub fn region_offset() -> usize {
    align_up(SNAPSHOT_HEADER_SIZE, FlatBuffer::ALIGNMENT)
}
