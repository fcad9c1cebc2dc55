//! Distortion correction engines.
//!
//! The transform treats the distortion engine as a black box that lives in
//! its own nested sub-region of the flat buffer. [`DistortionModel`] is the
//! seam: an engine writes itself into the sub-region once, validates a
//! sub-region it is handed, and answers queries against those bytes only.

use crate::error::{ConstructionError, LayoutError, Result};
use bytemuck::{Pod, Zeroable};
use std::mem::size_of;

/// Local correction of a drift coordinate `(x, u, v)`.
#[repr(C)]
#[derive(Debug, Clone, Copy, PartialEq, Default, Pod, Zeroable)]
pub struct Distortion {
    /// Correction of local x [cm].
    pub dx: f32,
    /// Correction of u [cm].
    pub du: f32,
    /// Correction of v [cm].
    pub dv: f32,
}

impl Distortion {
    /// Creates a correction.
    #[must_use]
    pub fn new(dx: f32, du: f32, dv: f32) -> Self {
        Self { dx, du, dv }
    }

    #[inline]
    fn lerp(self, other: Self, t: f32) -> Self {
        Self {
            dx: self.dx + (other.dx - self.dx) * t,
            du: self.du + (other.du - self.du) * t,
            dv: self.dv + (other.dv - self.dv) * t,
        }
    }
}

/// A distortion engine with a flat, relocatable representation.
pub trait DistortionModel {
    /// Tag stored in the region header to detect mismatched engines.
    const KIND: u32;

    /// Alignment in bytes the sub-region start must satisfy.
    const BUFFER_ALIGNMENT: usize;

    /// Size of the flat sub-region in bytes.
    fn flat_size(&self) -> usize;

    /// Returns false if the engine cannot serve a detector with this many rows.
    fn covers_rows(&self, number_of_rows: usize) -> bool {
        let _ = number_of_rows;
        true
    }

    /// Writes the engine into `out`, which is exactly `flat_size()` bytes.
    ///
    /// # Errors
    /// Returns an error if `out` has the wrong size.
    fn write_flat(&self, out: &mut [u8]) -> Result<()>;

    /// Validates a sub-region before it is queried by a region with
    /// `number_of_rows` rows.
    ///
    /// # Errors
    /// Returns an error if the bytes do not hold a valid engine for that
    /// many rows.
    fn check_flat(flat: &[u8], number_of_rows: usize) -> std::result::Result<(), LayoutError>;

    /// Correction at `(u, v)` for the given slice and row.
    fn distortion(flat: &[u8], slice: usize, row: usize, u: f32, v: f32) -> Distortion;
}

/// Engine that applies no correction.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub struct NoDistortion;

impl DistortionModel for NoDistortion {
    const KIND: u32 = 0;
    const BUFFER_ALIGNMENT: usize = 1;

    fn flat_size(&self) -> usize {
        0
    }

    fn write_flat(&self, out: &mut [u8]) -> Result<()> {
        if out.is_empty() {
            Ok(())
        } else {
            Err(ConstructionError::Distortion(format!(
                "no-distortion engine has no flat data, got {} bytes",
                out.len()
            ))
            .into())
        }
    }

    fn check_flat(flat: &[u8], _rows: usize) -> std::result::Result<(), LayoutError> {
        if flat.is_empty() {
            Ok(())
        } else {
            Err(LayoutError::Distortion(format!(
                "expected an empty sub-region, got {} bytes",
                flat.len()
            )))
        }
    }

    #[inline]
    fn distortion(_flat: &[u8], _slice: usize, _row: usize, _u: f32, _v: f32) -> Distortion {
        Distortion::default()
    }
}

#[repr(C)]
#[derive(Debug, Clone, Copy, PartialEq, Pod, Zeroable)]
struct GridHeader {
    number_of_rows: u32,
    nodes_u: u32,
    nodes_v: u32,
    reserved: u32,
    u_min: f32,
    u_max: f32,
    v_min: f32,
    v_max: f32,
}

const GRID_HEADER_SIZE: usize = size_of::<GridHeader>();
const NODE_SIZE: usize = size_of::<Distortion>();

impl GridHeader {
    fn node_count(&self) -> Option<usize> {
        (self.number_of_rows as usize)
            .checked_mul(self.nodes_u as usize)?
            .checked_mul(self.nodes_v as usize)
    }

    #[allow(clippy::neg_cmp_op_on_partial_ord)]
    fn validate(&self) -> std::result::Result<(), String> {
        if self.nodes_u < 2 || self.nodes_v < 2 {
            return Err(format!(
                "grid needs at least 2x2 nodes, got {}x{}",
                self.nodes_u, self.nodes_v
            ));
        }
        // `!(a < b)` also rejects NaN bounds
        if !(self.u_min < self.u_max) || !(self.v_min < self.v_max) {
            return Err(format!(
                "empty grid range u=[{}, {}], v=[{}, {}]",
                self.u_min, self.u_max, self.v_min, self.v_max
            ));
        }
        Ok(())
    }
}

/// Cell index and fractional position of `value` on a regular axis.
#[inline]
#[allow(
    clippy::cast_precision_loss,
    clippy::cast_possible_truncation,
    clippy::cast_sign_loss
)]
fn locate(value: f32, min: f32, max: f32, nodes: usize) -> (usize, f32) {
    let cells = nodes - 1;
    let t = ((value - min) / (max - min) * cells as f32).clamp(0.0, cells as f32);
    let index = (t as usize).min(cells - 1);
    (index, t - index as f32)
}

fn evaluate(
    header: &GridHeader,
    nodes: &[Distortion],
    row: usize,
    u: f32,
    v: f32,
) -> Distortion {
    if row >= header.number_of_rows as usize {
        return Distortion::default();
    }
    let nu = header.nodes_u as usize;
    let nv = header.nodes_v as usize;
    let (iu, tu) = locate(u, header.u_min, header.u_max, nu);
    let (iv, tv) = locate(v, header.v_min, header.v_max, nv);

    let base = row * nu * nv;
    let node = |i_u: usize, i_v: usize| {
        nodes
            .get(base + i_v * nu + i_u)
            .copied()
            .unwrap_or_default()
    };
    let lower = node(iu, iv).lerp(node(iu + 1, iv), tu);
    let upper = node(iu, iv + 1).lerp(node(iu + 1, iv + 1), tu);
    lower.lerp(upper, tv)
}

fn grid_view(flat: &[u8]) -> Option<(&GridHeader, &[Distortion])> {
    let header: &GridHeader = bytemuck::try_from_bytes(flat.get(..GRID_HEADER_SIZE)?).ok()?;
    header.validate().ok()?;
    let end = GRID_HEADER_SIZE + header.node_count()?.checked_mul(NODE_SIZE)?;
    let nodes = bytemuck::try_cast_slice(flat.get(GRID_HEADER_SIZE..end)?).ok()?;
    Some((header, nodes))
}

/// Per-row regular `(u, v)` grid of corrections, interpolated bilinearly.
///
/// Positions outside the grid range are clamped to its edge. All slices
/// share the same per-row maps.
#[derive(Debug, Clone, PartialEq)]
pub struct GridDistortion {
    header: GridHeader,
    nodes: Vec<Distortion>,
}

impl GridDistortion {
    /// A 2x2 all-zero grid for every row.
    #[must_use]
    #[allow(clippy::cast_possible_truncation)]
    pub fn zero(number_of_rows: usize) -> Self {
        let header = GridHeader {
            number_of_rows: number_of_rows as u32,
            nodes_u: 2,
            nodes_v: 2,
            reserved: 0,
            u_min: 0.0,
            u_max: 1.0,
            v_min: 0.0,
            v_max: 1.0,
        };
        Self {
            header,
            nodes: vec![Distortion::default(); number_of_rows * 4],
        }
    }

    /// Number of rows covered by the grid.
    #[must_use]
    pub fn number_of_rows(&self) -> usize {
        self.header.number_of_rows as usize
    }

    /// Grid nodes along u and v.
    #[must_use]
    pub fn nodes(&self) -> (usize, usize) {
        (self.header.nodes_u as usize, self.header.nodes_v as usize)
    }

    /// Evaluates the correction without going through the flat form.
    #[must_use]
    pub fn get(&self, row: usize, u: f32, v: f32) -> Distortion {
        evaluate(&self.header, &self.nodes, row, u, v)
    }
}

impl DistortionModel for GridDistortion {
    const KIND: u32 = u32::from_le_bytes(*b"GRID");
    const BUFFER_ALIGNMENT: usize = 16;

    fn flat_size(&self) -> usize {
        GRID_HEADER_SIZE + self.nodes.len() * NODE_SIZE
    }

    fn covers_rows(&self, number_of_rows: usize) -> bool {
        self.number_of_rows() == number_of_rows
    }

    fn write_flat(&self, out: &mut [u8]) -> Result<()> {
        if out.len() != self.flat_size() {
            return Err(ConstructionError::Distortion(format!(
                "grid needs {} bytes, got {}",
                self.flat_size(),
                out.len()
            ))
            .into());
        }
        let (head, body) = out.split_at_mut(GRID_HEADER_SIZE);
        head.copy_from_slice(bytemuck::bytes_of(&self.header));
        body.copy_from_slice(bytemuck::cast_slice(&self.nodes));
        Ok(())
    }

    fn check_flat(flat: &[u8], rows: usize) -> std::result::Result<(), LayoutError> {
        let head = flat.get(..GRID_HEADER_SIZE).ok_or_else(|| {
            LayoutError::Distortion(format!("{} bytes cannot hold a grid header", flat.len()))
        })?;
        let header: &GridHeader = bytemuck::try_from_bytes(head)
            .map_err(|e| LayoutError::Distortion(format!("grid header: {e}")))?;
        header.validate().map_err(LayoutError::Distortion)?;
        if header.number_of_rows as usize != rows {
            return Err(LayoutError::Distortion(format!(
                "grid covers {} rows, region has {rows}",
                header.number_of_rows
            )));
        }
        let overflow = || LayoutError::Distortion("grid size overflows".to_string());
        let needed = header
            .node_count()
            .and_then(|n| n.checked_mul(NODE_SIZE))
            .and_then(|n| n.checked_add(GRID_HEADER_SIZE))
            .ok_or_else(overflow)?;
        if flat.len() < needed {
            return Err(LayoutError::Distortion(format!(
                "grid needs {needed} bytes, sub-region has {}",
                flat.len()
            )));
        }
        Ok(())
    }

    #[inline]
    fn distortion(flat: &[u8], _slice: usize, row: usize, u: f32, v: f32) -> Distortion {
        match grid_view(flat) {
            Some((header, nodes)) => evaluate(header, nodes, row, u, v),
            None => Distortion::default(),
        }
    }
}

/// Builder for [`GridDistortion`].
#[derive(Debug, Clone)]
pub struct GridDistortionBuilder {
    header: GridHeader,
    nodes: Vec<Distortion>,
}

impl GridDistortionBuilder {
    /// Reserves a zeroed grid of `nodes_u x nodes_v` nodes per row.
    ///
    /// The default ranges are `u = [-1, 1]` and `v = [0, 1]`.
    ///
    /// # Errors
    /// Returns an error for zero rows or fewer than two nodes per axis.
    pub fn new(number_of_rows: usize, nodes_u: usize, nodes_v: usize) -> Result<Self> {
        if number_of_rows == 0 {
            let reason = "grid needs at least one row".to_string();
            return Err(ConstructionError::Distortion(reason).into());
        }
        let to_u32 = |n: usize| {
            let reason = format!("grid dimension {n} too large");
            u32::try_from(n).map_err(|_| ConstructionError::Distortion(reason))
        };
        let header = GridHeader {
            number_of_rows: to_u32(number_of_rows)?,
            nodes_u: to_u32(nodes_u)?,
            nodes_v: to_u32(nodes_v)?,
            reserved: 0,
            u_min: -1.0,
            u_max: 1.0,
            v_min: 0.0,
            v_max: 1.0,
        };
        if nodes_u < 2 || nodes_v < 2 {
            return Err(ConstructionError::Distortion(format!(
                "grid needs at least 2x2 nodes, got {nodes_u}x{nodes_v}"
            ))
            .into());
        }
        let count = header.node_count().ok_or_else(|| {
            ConstructionError::Distortion("grid node count overflows".to_string())
        })?;
        Ok(Self {
            header,
            nodes: vec![Distortion::default(); count],
        })
    }

    /// Sets the u range covered by the grid [cm].
    #[must_use]
    pub fn with_u_range(mut self, min: f32, max: f32) -> Self {
        self.header.u_min = min;
        self.header.u_max = max;
        self
    }

    /// Sets the v range covered by the grid [cm].
    #[must_use]
    pub fn with_v_range(mut self, min: f32, max: f32) -> Self {
        self.header.v_min = min;
        self.header.v_max = max;
        self
    }

    fn node_index(&self, row: usize, iu: usize, iv: usize) -> Result<usize> {
        let nu = self.header.nodes_u as usize;
        let nv = self.header.nodes_v as usize;
        if row >= self.header.number_of_rows as usize || iu >= nu || iv >= nv {
            return Err(ConstructionError::Distortion(format!(
                "node (row {row}, u {iu}, v {iv}) outside the {nu}x{nv} grid"
            ))
            .into());
        }
        Ok((row * nv + iv) * nu + iu)
    }

    /// Sets one node.
    ///
    /// # Errors
    /// Returns an error if the node lies outside the grid.
    pub fn set_node(
        &mut self,
        row: usize,
        iu: usize,
        iv: usize,
        value: Distortion,
    ) -> Result<&mut Self> {
        let index = self.node_index(row, iu, iv)?;
        self.nodes[index] = value;
        Ok(self)
    }

    /// Fills every node of a row from a function of the node's `(u, v)`.
    ///
    /// # Errors
    /// Returns an error if the row lies outside the grid.
    #[allow(clippy::cast_precision_loss)]
    pub fn fill_row<F>(&mut self, row: usize, mut f: F) -> Result<&mut Self>
    where
        F: FnMut(f32, f32) -> Distortion,
    {
        let h = self.header;
        let nu = h.nodes_u as usize;
        let nv = h.nodes_v as usize;
        let step_u = (h.u_max - h.u_min) / (nu - 1) as f32;
        let step_v = (h.v_max - h.v_min) / (nv - 1) as f32;
        for iv in 0..nv {
            for iu in 0..nu {
                let index = self.node_index(row, iu, iv)?;
                self.nodes[index] = f(
                    h.u_min + step_u * iu as f32,
                    h.v_min + step_v * iv as f32,
                );
            }
        }
        Ok(self)
    }

    /// Finishes the grid.
    ///
    /// # Errors
    /// Returns an error if a range is empty or not finite.
    pub fn build(self) -> Result<GridDistortion> {
        self.header
            .validate()
            .map_err(ConstructionError::Distortion)?;
        Ok(GridDistortion {
            header: self.header,
            nodes: self.nodes,
        })
    }
}
