//! Relocatable flat region.
//!
//! A finalized transform keeps all of its geometry in one contiguous byte
//! region:
//!
//! ```text
//! RegionHeader | SliceInfo[36] | RowInfo[n] | pad | distortion sub-region
//! ```
//!
//! Every cross-reference inside the region is an offset from the region
//! base, so the bytes can be copied, memory-mapped or moved to another
//! address space and read back without any pointer fix-up. The only
//! requirement on the new location is the region alignment.

use crate::error::LayoutError;
use crate::geometry::{RowInfo, SliceInfo, NUMBER_OF_SLICES};
use bytemuck::{Pod, Zeroable};
use std::fmt;
use std::mem::{align_of, size_of};
use std::ops::Range;

/// Magic number at the start of every region ("TPCF").
pub const REGION_MAGIC: u32 = u32::from_le_bytes(*b"TPCF");

/// Layout version written into the region header.
pub const REGION_VERSION: u32 = 1;

/// Lower bound for the region alignment.
pub const MIN_REGION_ALIGNMENT: usize = 16;

/// Size of the region header in bytes.
pub const HEADER_SIZE: usize = size_of::<RegionHeader>();

/// Header at offset zero of the region.
#[repr(C)]
#[derive(Debug, Clone, Copy, PartialEq, Pod, Zeroable)]
pub struct RegionHeader {
    /// [`REGION_MAGIC`].
    pub magic: u32,
    /// [`REGION_VERSION`].
    pub version: u32,
    /// Number of pad rows.
    pub number_of_rows: u32,
    /// Number of slices, always [`NUMBER_OF_SLICES`].
    pub number_of_slices: u32,
    /// [`DistortionModel::KIND`](crate::DistortionModel::KIND) of the nested engine.
    pub distortion_kind: u32,
    /// Drift length of the A side [cm].
    pub z_length_a: f32,
    /// Drift length of the C side [cm].
    pub z_length_c: f32,
    /// Reserved, zero.
    pub reserved: u32,
    /// Offset of the slice table.
    pub slices_offset: u64,
    /// Offset of the row table.
    pub rows_offset: u64,
    /// Offset of the distortion sub-region.
    pub distortion_offset: u64,
    /// Size of the distortion sub-region.
    pub distortion_size: u64,
    /// Size of the whole region.
    pub total_size: u64,
}

/// Rounds `value` up to a multiple of `alignment` (a power of two).
#[inline]
#[must_use]
pub const fn align_up(value: usize, alignment: usize) -> usize {
    (value + alignment - 1) & !(alignment - 1)
}

/// Address-independent description of a region.
#[derive(Debug, Clone, Copy, PartialEq)]
pub struct RegionLayout {
    /// Number of pad rows.
    pub number_of_rows: usize,
    /// Offset of the slice table.
    pub slices_offset: usize,
    /// Offset of the row table.
    pub rows_offset: usize,
    /// Offset of the distortion sub-region.
    pub distortion_offset: usize,
    /// Size of the distortion sub-region.
    pub distortion_size: usize,
    /// Size of the whole region.
    pub total_size: usize,
    /// Drift length of the A side [cm].
    pub z_length_a: f32,
    /// Drift length of the C side [cm].
    pub z_length_c: f32,
}

impl RegionLayout {
    /// Alignment a region must satisfy for a distortion engine alignment.
    #[must_use]
    pub fn region_alignment(distortion_alignment: usize) -> usize {
        MIN_REGION_ALIGNMENT
            .max(align_of::<RegionHeader>())
            .max(align_of::<SliceInfo>())
            .max(align_of::<RowInfo>())
            .max(distortion_alignment)
    }

    /// Plans the layout of a new region.
    #[must_use]
    pub fn plan(
        number_of_rows: usize,
        distortion_size: usize,
        distortion_alignment: usize,
        z_length_a: f32,
        z_length_c: f32,
    ) -> Self {
        let slices_offset = align_up(HEADER_SIZE, align_of::<SliceInfo>());
        let rows_offset = align_up(
            slices_offset + NUMBER_OF_SLICES * size_of::<SliceInfo>(),
            align_of::<RowInfo>(),
        );
        let rows_end = rows_offset + number_of_rows * size_of::<RowInfo>();
        let distortion_offset = align_up(rows_end, distortion_alignment.max(1));
        let total_size = align_up(
            distortion_offset + distortion_size,
            Self::region_alignment(distortion_alignment),
        );
        Self {
            number_of_rows,
            slices_offset,
            rows_offset,
            distortion_offset,
            distortion_size,
            total_size,
            z_length_a,
            z_length_c,
        }
    }

    /// Header describing this layout.
    #[must_use]
    #[allow(clippy::cast_possible_truncation)]
    pub fn header(&self, distortion_kind: u32) -> RegionHeader {
        RegionHeader {
            magic: REGION_MAGIC,
            version: REGION_VERSION,
            number_of_rows: self.number_of_rows as u32,
            number_of_slices: NUMBER_OF_SLICES as u32,
            distortion_kind,
            z_length_a: self.z_length_a,
            z_length_c: self.z_length_c,
            reserved: 0,
            slices_offset: self.slices_offset as u64,
            rows_offset: self.rows_offset as u64,
            distortion_offset: self.distortion_offset as u64,
            distortion_size: self.distortion_size as u64,
            total_size: self.total_size as u64,
        }
    }

    /// Byte range of the slice table.
    #[must_use]
    pub fn slices_range(&self) -> Range<usize> {
        self.slices_offset..self.slices_offset + NUMBER_OF_SLICES * size_of::<SliceInfo>()
    }

    /// Byte range of the row table.
    #[must_use]
    pub fn rows_range(&self) -> Range<usize> {
        self.rows_offset..self.rows_offset + self.number_of_rows * size_of::<RowInfo>()
    }

    /// Byte range of the distortion sub-region.
    #[must_use]
    pub fn distortion_range(&self) -> Range<usize> {
        self.distortion_offset..self.distortion_offset + self.distortion_size
    }

    /// Reads and validates the layout of an existing region.
    ///
    /// Checks the base alignment, the header, and that every section lies
    /// inside the region in ascending order with its own alignment.
    ///
    /// # Errors
    /// Returns a [`LayoutError`] describing the first violation found.
    pub fn parse(
        bytes: &[u8],
        distortion_alignment: usize,
        distortion_kind: u32,
    ) -> Result<Self, LayoutError> {
        let alignment = Self::region_alignment(distortion_alignment);
        let address = bytes.as_ptr() as usize;
        if !address.is_multiple_of(alignment) {
            return Err(LayoutError::Misaligned { address, alignment });
        }

        let head = bytes.get(..HEADER_SIZE).ok_or(LayoutError::TooSmall {
            needed: HEADER_SIZE,
            actual: bytes.len(),
        })?;
        let header: RegionHeader = bytemuck::pod_read_unaligned(head);

        if header.magic != REGION_MAGIC {
            return Err(LayoutError::BadMagic(header.magic));
        }
        if header.version != REGION_VERSION {
            return Err(LayoutError::UnsupportedVersion(header.version));
        }
        if header.number_of_slices as usize != NUMBER_OF_SLICES {
            return Err(LayoutError::SliceCount {
                found: header.number_of_slices as usize,
                expected: NUMBER_OF_SLICES,
            });
        }
        if header.number_of_rows == 0 {
            return Err(LayoutError::NoRows);
        }
        if header.distortion_kind != distortion_kind {
            return Err(LayoutError::DistortionKind {
                found: header.distortion_kind,
                expected: distortion_kind,
            });
        }

        let to_usize = |value: u64| usize::try_from(value).unwrap_or(usize::MAX);
        let total_size = to_usize(header.total_size);
        if bytes.len() < total_size {
            return Err(LayoutError::TooSmall {
                needed: total_size,
                actual: bytes.len(),
            });
        }

        let number_of_rows = header.number_of_rows as usize;
        let slices_end = check_section(
            "slice",
            to_usize(header.slices_offset),
            Some(NUMBER_OF_SLICES * size_of::<SliceInfo>()),
            align_of::<SliceInfo>(),
            HEADER_SIZE,
            total_size,
        )?;
        let rows_end = check_section(
            "row",
            to_usize(header.rows_offset),
            number_of_rows.checked_mul(size_of::<RowInfo>()),
            align_of::<RowInfo>(),
            slices_end,
            total_size,
        )?;
        check_section(
            "distortion",
            to_usize(header.distortion_offset),
            Some(to_usize(header.distortion_size)),
            distortion_alignment.max(1),
            rows_end,
            total_size,
        )?;

        Ok(Self {
            number_of_rows,
            slices_offset: to_usize(header.slices_offset),
            rows_offset: to_usize(header.rows_offset),
            distortion_offset: to_usize(header.distortion_offset),
            distortion_size: to_usize(header.distortion_size),
            total_size,
            z_length_a: header.z_length_a,
            z_length_c: header.z_length_c,
        })
    }
}

/// Validates one section and returns its end offset.
fn check_section(
    section: &'static str,
    start: usize,
    len: Option<usize>,
    alignment: usize,
    lower_bound: usize,
    size: usize,
) -> Result<usize, LayoutError> {
    let end = len.and_then(|len| start.checked_add(len));
    let aligned = start.is_multiple_of(alignment);
    match end {
        Some(end) if start >= lower_bound && end <= size && aligned => Ok(end),
        _ => Err(LayoutError::BadSection {
            section,
            start,
            end: end.unwrap_or(usize::MAX),
            size,
        }),
    }
}

#[repr(C, align(64))]
#[derive(Clone, Copy, Pod, Zeroable)]
struct Block([u8; 64]);

/// Internally owned, zero-initialized region storage.
///
/// The storage starts on a [`FlatBuffer::ALIGNMENT`]-byte boundary, which
/// covers every region alignment produced by the engines in this crate.
#[derive(Clone, Default)]
pub struct FlatBuffer {
    blocks: Vec<Block>,
    len: usize,
}

impl FlatBuffer {
    /// Alignment of the storage start in bytes.
    pub const ALIGNMENT: usize = align_of::<Block>();

    /// Allocates `len` zeroed bytes.
    #[must_use]
    pub fn zeroed(len: usize) -> Self {
        Self {
            blocks: vec![Block([0; 64]); len.div_ceil(size_of::<Block>())],
            len,
        }
    }

    /// Copies `bytes` into new aligned storage.
    #[must_use]
    pub fn from_bytes(bytes: &[u8]) -> Self {
        let mut buffer = Self::zeroed(bytes.len());
        buffer.as_bytes_mut().copy_from_slice(bytes);
        buffer
    }

    /// Returns the length in bytes.
    #[must_use]
    pub fn len(&self) -> usize {
        self.len
    }

    /// Returns true if the buffer holds no bytes.
    #[must_use]
    pub fn is_empty(&self) -> bool {
        self.len == 0
    }

    /// Returns the contents as a byte slice.
    #[must_use]
    pub fn as_bytes(&self) -> &[u8] {
        &bytemuck::cast_slice::<Block, u8>(&self.blocks)[..self.len]
    }

    /// Returns the contents as a mutable byte slice.
    pub fn as_bytes_mut(&mut self) -> &mut [u8] {
        &mut bytemuck::cast_slice_mut::<Block, u8>(&mut self.blocks)[..self.len]
    }
}

impl AsRef<[u8]> for FlatBuffer {
    fn as_ref(&self) -> &[u8] {
        self.as_bytes()
    }
}

impl AsMut<[u8]> for FlatBuffer {
    fn as_mut(&mut self) -> &mut [u8] {
        self.as_bytes_mut()
    }
}

impl PartialEq for FlatBuffer {
    fn eq(&self, other: &Self) -> bool {
        self.as_bytes() == other.as_bytes()
    }
}

impl Eq for FlatBuffer {}

impl fmt::Debug for FlatBuffer {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("FlatBuffer")
            .field("len", &self.len)
            .finish_non_exhaustive()
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn planned() -> RegionLayout {
        RegionLayout::plan(3, 40, 16, 250.0, 249.5)
    }

    fn write_region(layout: &RegionLayout, kind: u32) -> FlatBuffer {
        let header = layout.header(kind);
        let mut buffer = FlatBuffer::zeroed(layout.total_size);
        buffer.as_bytes_mut()[..HEADER_SIZE].copy_from_slice(bytemuck::bytes_of(&header));
        buffer
    }

    #[test]
    fn test_align_up() {
        assert_eq!(align_up(0, 16), 0);
        assert_eq!(align_up(1, 16), 16);
        assert_eq!(align_up(16, 16), 16);
        assert_eq!(align_up(17, 8), 24);
    }

    #[test]
    fn test_plan_sections_are_ordered_and_aligned() {
        let layout = planned();
        assert!(layout.slices_offset >= HEADER_SIZE);
        assert!(layout.slices_range().end <= layout.rows_offset);
        assert!(layout.rows_range().end <= layout.distortion_offset);
        assert_eq!(layout.distortion_offset % 16, 0);
        assert_eq!(layout.total_size % 16, 0);
        assert!(layout.distortion_range().end <= layout.total_size);
    }

    #[test]
    fn test_flat_buffer_alignment() {
        let buffer = FlatBuffer::zeroed(100);
        assert_eq!(buffer.len(), 100);
        let address = buffer.as_bytes().as_ptr() as usize;
        assert_eq!(address % FlatBuffer::ALIGNMENT, 0);
        assert!(buffer.as_bytes().iter().all(|&b| b == 0));
        assert!(FlatBuffer::default().is_empty());

        let copy = FlatBuffer::from_bytes(&[1, 2, 3]);
        assert_eq!(copy.as_bytes(), &[1, 2, 3]);
    }

    #[test]
    fn test_parse_round_trip() {
        let layout = planned();
        let buffer = write_region(&layout, 7);
        let parsed = RegionLayout::parse(buffer.as_bytes(), 16, 7).unwrap();
        assert_eq!(parsed, layout);
    }

    #[test]
    fn test_parse_rejects_bad_regions() {
        let layout = planned();
        let buffer = write_region(&layout, 7);

        assert!(matches!(
            RegionLayout::parse(buffer.as_bytes(), 16, 8),
            Err(LayoutError::DistortionKind { .. })
        ));
        assert!(matches!(
            RegionLayout::parse(&buffer.as_bytes()[..layout.total_size - 16], 16, 7),
            Err(LayoutError::TooSmall { .. })
        ));
        assert!(matches!(
            RegionLayout::parse(&buffer.as_bytes()[..8], 16, 7),
            Err(LayoutError::TooSmall { .. })
        ));

        let mut corrupt = buffer.clone();
        corrupt.as_bytes_mut()[0] ^= 0xff;
        assert!(matches!(
            RegionLayout::parse(corrupt.as_bytes(), 16, 7),
            Err(LayoutError::BadMagic(_))
        ));
    }

    #[test]
    fn test_parse_rejects_misaligned_base() {
        let layout = planned();
        let buffer = write_region(&layout, 7);
        let mut shifted = FlatBuffer::zeroed(layout.total_size + 4);
        shifted.as_bytes_mut()[4..].copy_from_slice(buffer.as_bytes());
        assert!(matches!(
            RegionLayout::parse(&shifted.as_bytes()[4..], 16, 7),
            Err(LayoutError::Misaligned { alignment: 16, .. })
        ));
    }

    #[test]
    fn test_parse_rejects_overlapping_sections() {
        let layout = planned();
        let mut header = layout.header(7);
        header.rows_offset = header.slices_offset;
        let mut buffer = FlatBuffer::zeroed(layout.total_size);
        buffer.as_bytes_mut()[..HEADER_SIZE].copy_from_slice(bytemuck::bytes_of(&header));
        assert!(matches!(
            RegionLayout::parse(buffer.as_bytes(), 16, 7),
            Err(LayoutError::BadSection { section: "row", .. })
        ));
    }
}
