//! Slice and row geometry records of the drift chamber.
//!
//! Both records are `#[repr(C)]` plain-old-data so that they can live
//! inside the relocatable region and be read back from any base address.

use bytemuck::{Pod, Zeroable};

#[cfg(feature = "serde")]
use serde::{Deserialize, Serialize};

/// Number of TPC slices (inner + outer sector of one angular segment).
pub const NUMBER_OF_SLICES: usize = 36;

/// Number of slices on each side of the central electrode.
pub const SLICES_PER_SIDE: usize = NUMBER_OF_SLICES / 2;

/// Angular width of one sector in degrees.
#[allow(clippy::cast_precision_loss)]
pub const SECTOR_WIDTH_DEG: f32 = 360.0 / SLICES_PER_SIDE as f32;

/// Rotation of one slice's local frame into the global frame.
#[repr(C)]
#[derive(Debug, Clone, Copy, PartialEq, Pod, Zeroable)]
#[cfg_attr(feature = "serde", derive(Serialize, Deserialize))]
pub struct SliceInfo {
    /// Sine of the sector angle.
    pub sin_alpha: f32,
    /// Cosine of the sector angle.
    pub cos_alpha: f32,
}

impl Default for SliceInfo {
    fn default() -> Self {
        Self::from_alpha(0.0)
    }
}

impl SliceInfo {
    /// Creates the slice rotation for an angle in radians.
    #[must_use]
    pub fn from_alpha(alpha: f32) -> Self {
        let (sin_alpha, cos_alpha) = alpha.sin_cos();
        Self {
            sin_alpha,
            cos_alpha,
        }
    }

    /// Nominal rotation of a slice: the centre of sector `slice mod 18`.
    ///
    /// Both sides share the same 18 sector angles.
    #[must_use]
    #[allow(clippy::cast_precision_loss)]
    pub fn nominal(slice: usize) -> Self {
        let sector = (slice % SLICES_PER_SIDE) as f32;
        Self::from_alpha(((sector + 0.5) * SECTOR_WIDTH_DEG).to_radians())
    }

    /// Rotates a local `(x, y)` point into the global frame.
    #[inline]
    #[must_use]
    pub fn to_global(&self, x: f32, y: f32) -> (f32, f32) {
        (
            x * self.cos_alpha - y * self.sin_alpha,
            x * self.sin_alpha + y * self.cos_alpha,
        )
    }

    /// Global y of a local point; used by the drift velocity correction.
    #[inline]
    #[must_use]
    pub fn global_y(&self, x: f32, y: f32) -> f32 {
        y * self.cos_alpha + x * self.sin_alpha
    }
}

/// Geometry of one pad row.
#[repr(C)]
#[derive(Debug, Clone, Copy, PartialEq, Default, Pod, Zeroable)]
#[cfg_attr(feature = "serde", derive(Serialize, Deserialize))]
pub struct RowInfo {
    /// Local x of the row [cm].
    pub x: f32,
    /// Maximal pad number = number of pads - 1.
    pub max_pad: i32,
    /// Pad width [cm].
    pub pad_width: f32,
}

impl RowInfo {
    /// Creates a row from its pad count.
    #[must_use]
    #[allow(clippy::cast_possible_wrap)]
    pub fn new(x: f32, number_of_pads: u32, pad_width: f32) -> Self {
        Self {
            x,
            max_pad: number_of_pads as i32 - 1,
            pad_width,
        }
    }

    /// Number of pads in the row.
    #[inline]
    #[must_use]
    pub fn number_of_pads(&self) -> i32 {
        self.max_pad + 1
    }

    /// Pad coordinate of the row centre.
    #[inline]
    #[must_use]
    #[allow(clippy::cast_precision_loss)]
    pub fn pad_center(&self) -> f32 {
        0.5 * self.max_pad as f32
    }
}

/// Half-volume of the detector a slice belongs to.
///
/// The C side is the mirror image of the A side: pads and the drift
/// direction are both flipped there. Every side-dependent sign in the
/// transform goes through this type.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum Side {
    /// Slices `0..18`.
    A,
    /// Slices `18..36`.
    C,
}

impl Side {
    /// Side of a slice index. The index is not range checked.
    #[inline]
    #[must_use]
    pub fn of_slice(slice: usize) -> Self {
        if slice >= SLICES_PER_SIDE {
            Side::C
        } else {
            Side::A
        }
    }

    /// Pad mirroring: identity on the A side, negation on the C side.
    #[inline]
    #[must_use]
    pub fn mirror(self, value: f32) -> f32 {
        match self {
            Side::A => value,
            Side::C => -value,
        }
    }

    /// Returns true for the C side.
    #[inline]
    #[must_use]
    pub fn is_c_side(self) -> bool {
        self == Side::C
    }
}
