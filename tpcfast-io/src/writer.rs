//! Snapshot and space point writers.

use crate::snapshot::{CalibrationRecord, SnapshotHeader, SNAPSHOT_HEADER_SIZE};
use crate::Result;
use log::debug;
use std::fs::{File, OpenOptions};
use std::io::{BufWriter, Read, Seek, SeekFrom, Write};
use std::mem::offset_of;
use std::path::Path;
use tpcfast_core::{Calibration, DistortionModel, SpacePointBatch, TpcFastTransform};

/// Writer for snapshot files.
pub struct SnapshotWriter {
    writer: BufWriter<File>,
}

impl SnapshotWriter {
    /// Creates a new snapshot file, truncating an existing one.
    ///
    /// # Errors
    /// Returns an error if the file cannot be created.
    pub fn create<P: AsRef<Path>>(path: P) -> Result<Self> {
        let file = File::create(path)?;
        let writer = BufWriter::new(file);
        Ok(Self { writer })
    }

    /// Writes the calibration and the region of a finished transform.
    ///
    /// # Errors
    /// Returns an error if writing fails.
    pub fn write<D, R>(&mut self, transform: &TpcFastTransform<D, R>) -> Result<()>
    where
        D: DistortionModel,
        R: AsRef<[u8]>,
    {
        let region = transform.flat_bytes();
        let header = SnapshotHeader::new(D::KIND, region.len(), transform.calibration());
        self.writer.write_all(bytemuck::bytes_of(&header))?;

        #[allow(clippy::cast_possible_truncation)]
        let padding = header.region_offset as usize - SNAPSHOT_HEADER_SIZE;
        self.writer.write_all(&vec![0u8; padding])?;
        self.writer.write_all(region)?;
        self.writer.flush()?;

        debug!(
            "wrote snapshot: {}-byte region, calibration time stamp {}",
            region.len(),
            transform.time_stamp()
        );
        Ok(())
    }
}

/// Replaces the calibration record of an existing snapshot.
///
/// The region is left untouched.
///
/// # Errors
/// Returns an error if the file is not a snapshot or cannot be rewritten.
pub fn rewrite_calibration<P: AsRef<Path>>(path: P, calibration: &Calibration) -> Result<()> {
    let mut file = OpenOptions::new().read(true).write(true).open(path)?;
    let file_size = file.metadata()?.len();

    let mut head = [0u8; SNAPSHOT_HEADER_SIZE];
    file.read_exact(&mut head)?;
    let header = SnapshotHeader::parse(&head, Some(file_size))?;

    let record = CalibrationRecord::from(calibration);
    let offset = offset_of!(SnapshotHeader, calibration) as u64;
    file.seek(SeekFrom::Start(offset))?;
    file.write_all(bytemuck::bytes_of(&record))?;
    file.flush()?;

    debug!(
        "calibration time stamp {} -> {}",
        header.calibration.time_stamp, calibration.time_stamp
    );
    Ok(())
}

/// Writer for transformed space points.
pub struct SpacePointWriter {
    writer: BufWriter<File>,
}

impl SpacePointWriter {
    /// Creates a new file writer.
    ///
    /// # Errors
    /// Returns an error if the file cannot be created.
    pub fn create<P: AsRef<Path>>(path: P) -> Result<Self> {
        let file = File::create(path)?;
        let writer = BufWriter::new(file);
        Ok(Self { writer })
    }

    /// Writes points as CSV.
    ///
    /// # Errors
    /// Returns an error if writing fails.
    pub fn write_points_csv(&mut self, points: &SpacePointBatch) -> Result<()> {
        writeln!(self.writer, "hit,slice,row,x,y,z")?;

        for i in 0..points.len() {
            writeln!(
                self.writer,
                "{},{},{},{},{},{}",
                points.hit_index[i],
                points.slice[i],
                points.row[i],
                points.x[i],
                points.y[i],
                points.z[i]
            )?;
        }

        self.writer.flush()?;
        Ok(())
    }

    /// Flushes the writer.
    ///
    /// # Errors
    /// Returns an error if flushing fails.
    pub fn flush(&mut self) -> Result<()> {
        self.writer.flush()?;
        Ok(())
    }
}
