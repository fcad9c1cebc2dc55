//! Memory-mapped snapshot reader and hit input.
//!

use crate::snapshot::SnapshotHeader;
use crate::{Error, Result};
use log::{debug, trace};
use memmap2::Mmap;
use std::fs::File;
use std::io::{BufRead, BufReader};
use std::ops::Range;
use std::path::{Path, PathBuf};
use std::sync::Arc;
use tpcfast_core::{Calibration, DistortionModel, PadHitBatch, TpcFastTransform};

/// A memory-mapped file reader.
///
/// Uses memmap2 to efficiently access file contents without
/// loading the entire file into memory.
pub struct MappedFileReader {
    mmap: Arc<Mmap>,
    path: PathBuf,
}

impl MappedFileReader {
    /// Opens a file for memory-mapped reading.
    ///
    /// # Errors
    /// Returns an error if the file cannot be opened or memory-mapped.
    pub fn open<P: AsRef<Path>>(path: P) -> Result<Self> {
        let file = File::open(&path)?;
        // SAFETY: The file is opened read-only and we assume it is not modified concurrently.
        // This is the standard safety contract for memory mapping.
        #[allow(unsafe_code)]
        let mmap = unsafe { Mmap::map(&file)? };
        Ok(Self {
            mmap: Arc::new(mmap),
            path: path.as_ref().to_path_buf(),
        })
    }

    /// Returns the file contents as a byte slice.
    #[must_use]
    pub fn as_bytes(&self) -> &[u8] {
        &self.mmap[..]
    }

    /// Returns the file size in bytes.
    #[must_use]
    pub fn len(&self) -> usize {
        self.mmap.len()
    }

    /// Returns true if the file is empty.
    #[must_use]
    pub fn is_empty(&self) -> bool {
        self.mmap.is_empty()
    }

    /// Path of the mapped file.
    #[must_use]
    pub fn path(&self) -> &Path {
        &self.path
    }
}

/// A byte range of a shared file mapping.
///
/// Keeps the mapping alive for as long as a transform reads from it.
#[derive(Clone)]
pub struct MappedRegion {
    mmap: Arc<Mmap>,
    range: Range<usize>,
}

impl AsRef<[u8]> for MappedRegion {
    fn as_ref(&self) -> &[u8] {
        &self.mmap[self.range.clone()]
    }
}

/// Reader for snapshot files.
pub struct SnapshotReader {
    reader: MappedFileReader,
    header: SnapshotHeader,
}

impl SnapshotReader {
    /// Opens and validates a snapshot.
    ///
    /// # Errors
    /// Returns an error if the file cannot be mapped or is not a snapshot.
    pub fn open<P: AsRef<Path>>(path: P) -> Result<Self> {
        let reader = MappedFileReader::open(path)?;
        let header = SnapshotHeader::parse(reader.as_bytes(), Some(reader.len() as u64))?;
        debug!(
            "opened snapshot {}: {}-byte region at offset {}",
            reader.path().display(),
            header.region_size,
            header.region_offset
        );
        Ok(Self { reader, header })
    }

    /// Snapshot header.
    #[must_use]
    pub fn header(&self) -> &SnapshotHeader {
        &self.header
    }

    /// Stored calibration.
    #[must_use]
    pub fn calibration(&self) -> Calibration {
        self.header.calibration()
    }

    /// The raw region bytes.
    #[must_use]
    pub fn region_bytes(&self) -> &[u8] {
        &self.reader.as_bytes()[self.region_range()]
    }

    #[allow(clippy::cast_possible_truncation)]
    fn region_range(&self) -> Range<usize> {
        // bounded by the file length at open
        let start = self.header.region_offset as usize;
        start..start + self.header.region_size as usize
    }

    /// Adopts the region in place, reading straight from the mapping.
    ///
    /// # Errors
    /// Returns an error if the region was built with another distortion
    /// engine or is malformed.
    pub fn transform<D: DistortionModel>(&self) -> Result<TpcFastTransform<D, MappedRegion>> {
        if self.header.distortion_kind != D::KIND {
            return Err(Error::InvalidFormat(format!(
                "snapshot holds distortion kind {:#010x}, expected {:#010x}",
                self.header.distortion_kind,
                D::KIND
            )));
        }
        let region = MappedRegion {
            mmap: Arc::clone(&self.reader.mmap),
            range: self.region_range(),
        };
        Ok(TpcFastTransform::from_region(region, self.calibration())?)
    }

    /// Copies the region into owned storage.
    ///
    /// # Errors
    /// Same as [`SnapshotReader::transform`].
    pub fn load<D: DistortionModel>(&self) -> Result<TpcFastTransform<D>> {
        Ok(self.transform::<D>()?.to_owned_region())
    }
}

/// Reads raw hits from CSV with the columns `slice,row,pad,time`.
///
/// Blank lines and `#` comments are skipped, as is a header on the first
/// other line. A hit whose slice or row does not fit `u16` (a negative
/// index, say) is skipped; the transform rejects it anyway.
///
/// # Errors
/// Returns [`Error::InvalidFormat`] for a malformed line.
pub fn read_hits_csv<P: AsRef<Path>>(path: P) -> Result<PadHitBatch> {
    let reader = BufReader::new(File::open(path)?);
    let mut batch = PadHitBatch::default();
    let mut first = true;
    let mut skipped = 0usize;
    for (index, line) in reader.lines().enumerate() {
        let line = line?;
        let line = line.trim();
        if line.is_empty() || line.starts_with('#') {
            continue;
        }
        let header = first && line.starts_with(|c: char| c.is_ascii_alphabetic());
        first = false;
        if header {
            continue;
        }
        let bad = |what: &str| Error::InvalidFormat(format!("line {}: {what}", index + 1));
        let fields: Vec<&str> = line.split(',').map(str::trim).collect();
        let [slice, row, pad, time] = fields.as_slice() else {
            return Err(bad("expected 4 columns"));
        };
        let slice: i64 = slice.parse().map_err(|_| bad("bad slice"))?;
        let row: i64 = row.parse().map_err(|_| bad("bad row"))?;
        let pad = pad.parse().map_err(|_| bad("bad pad"))?;
        let time = time.parse().map_err(|_| bad("bad time"))?;
        let (Ok(slice), Ok(row)) = (u16::try_from(slice), u16::try_from(row)) else {
            trace!("line {}: slice {slice} row {row} out of range", index + 1);
            skipped += 1;
            continue;
        };
        batch.push(slice, row, pad, time);
    }
    debug!("read {} hits, skipped {skipped}", batch.len());
    Ok(batch)
}
