//! JSON geometry configuration.
//!
//! A geometry document describes the pad rows, optional slice rotations,
//! the drift lengths, a calibration and an optional distortion grid:
//!
//! ```json
//! {
//!   "z_length_a": 250.0,
//!   "z_length_c": 250.0,
//!   "rows": [{ "x": 85.225, "pads": 66, "pad_width": 0.416 }],
//!   "slices": [{ "slice": 3, "alpha_deg": 70.2 }],
//!   "calibration": { "v_drift": 0.516, "t0": 8.5 },
//!   "distortion": {
//!     "nodes_u": 3, "nodes_v": 2,
//!     "u_range": [-20.0, 20.0], "v_range": [0.0, 250.0],
//!     "nodes": [{ "row": 0, "iu": 1, "iv": 0, "dx": 0.0, "du": 0.1, "dv": -0.2 }]
//!   }
//! }
//! ```
//!
//! Everything except `rows` may be omitted.

use crate::builder::TransformBuilder;
use crate::calibration::Calibration;
use crate::distortion::{Distortion, GridDistortion, GridDistortionBuilder};
use crate::error::{Error, Result};
use crate::transform::TpcFastTransform;
use serde::{Deserialize, Serialize};
use std::fs::File;
use std::io::BufReader;
use std::path::Path;

/// One pad row.
#[derive(Debug, Clone, Copy, PartialEq, Serialize, Deserialize)]
pub struct RowConfig {
    /// Local x of the row [cm].
    pub x: f32,
    /// Number of pads.
    pub pads: u32,
    /// Pad width [cm].
    pub pad_width: f32,
}

/// Rotation override of one slice.
#[derive(Debug, Clone, Copy, PartialEq, Serialize, Deserialize)]
pub struct SliceOverride {
    /// Slice index.
    pub slice: usize,
    /// Rotation angle [degrees].
    pub alpha_deg: f32,
}

/// One grid node of the distortion map.
#[derive(Debug, Clone, Copy, PartialEq, Serialize, Deserialize)]
pub struct NodeConfig {
    /// Row index.
    pub row: usize,
    /// Node index along u.
    pub iu: usize,
    /// Node index along v.
    pub iv: usize,
    /// Shift in x [cm].
    #[serde(default)]
    pub dx: f32,
    /// Shift in u [cm].
    #[serde(default)]
    pub du: f32,
    /// Shift in v [cm].
    #[serde(default)]
    pub dv: f32,
}

/// Distortion grid. Nodes that are not listed stay zero.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct DistortionConfig {
    /// Number of nodes along u, at least 2.
    pub nodes_u: usize,
    /// Number of nodes along v, at least 2.
    pub nodes_v: usize,
    /// u range covered by the grid [cm].
    pub u_range: [f32; 2],
    /// v range covered by the grid [cm].
    pub v_range: [f32; 2],
    /// Non-zero nodes.
    pub nodes: Vec<NodeConfig>,
}

impl Default for DistortionConfig {
    fn default() -> Self {
        Self {
            nodes_u: 2,
            nodes_v: 2,
            u_range: [-1.0, 1.0],
            v_range: [0.0, 250.0],
            nodes: Vec::new(),
        }
    }
}

impl DistortionConfig {
    /// Builds the grid for a detector with `number_of_rows` rows.
    ///
    /// # Errors
    /// Returns an error if the grid shape or a node is invalid.
    pub fn build(&self, number_of_rows: usize) -> Result<GridDistortion> {
        let mut grid = GridDistortionBuilder::new(number_of_rows, self.nodes_u, self.nodes_v)?
            .with_u_range(self.u_range[0], self.u_range[1])
            .with_v_range(self.v_range[0], self.v_range[1]);
        for node in &self.nodes {
            grid.set_node(
                node.row,
                node.iu,
                node.iv,
                Distortion::new(node.dx, node.du, node.dv),
            )?;
        }
        grid.build()
    }
}

/// Detector geometry and calibration loaded from JSON.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct GeometryConfig {
    /// Drift length of the A side [cm].
    pub z_length_a: f32,
    /// Drift length of the C side [cm].
    pub z_length_c: f32,
    /// Pad rows, innermost first.
    pub rows: Vec<RowConfig>,
    /// Slices not listed keep their nominal sector rotation.
    pub slices: Vec<SliceOverride>,
    /// Initial calibration.
    pub calibration: Calibration,
    /// Distortion grid; all zero when absent.
    pub distortion: Option<DistortionConfig>,
}

impl Default for GeometryConfig {
    fn default() -> Self {
        Self {
            z_length_a: 250.0,
            z_length_c: 250.0,
            rows: Vec::new(),
            slices: Vec::new(),
            calibration: Calibration::default(),
            distortion: None,
        }
    }
}

impl GeometryConfig {
    /// Load configuration from a JSON file.
    ///
    /// # Errors
    /// Returns [`Error::ConfigError`] if the file cannot be read or parsed.
    pub fn from_file<P: AsRef<Path>>(path: P) -> Result<Self> {
        let path = path.as_ref();
        let file = File::open(path)
            .map_err(|e| Error::ConfigError(format!("{}: {e}", path.display())))?;
        let config: Self = serde_json::from_reader(BufReader::new(file))
            .map_err(|e| Error::ConfigError(format!("{}: {e}", path.display())))?;
        config.validate()?;
        Ok(config)
    }

    /// Load configuration from a JSON string.
    ///
    /// # Errors
    /// Returns [`Error::ConfigError`] if the document is invalid.
    pub fn from_json(json: &str) -> Result<Self> {
        let config: Self =
            serde_json::from_str(json).map_err(|e| Error::ConfigError(e.to_string()))?;
        config.validate()?;
        Ok(config)
    }

    /// Serializes the configuration as pretty-printed JSON.
    ///
    /// # Errors
    /// Returns [`Error::ConfigError`] if serialization fails.
    pub fn to_json(&self) -> Result<String> {
        serde_json::to_string_pretty(self).map_err(|e| Error::ConfigError(e.to_string()))
    }

    fn validate(&self) -> Result<()> {
        if self.rows.is_empty() {
            return Err(Error::ConfigError("geometry has no rows".to_string()));
        }
        Ok(())
    }

    /// Drives the construction protocol with this geometry.
    ///
    /// # Errors
    /// Returns an error if a row or slice entry is invalid.
    pub fn builder(&self) -> Result<TransformBuilder> {
        let mut builder = TransformBuilder::start(self.rows.len())?;
        for (index, row) in self.rows.iter().enumerate() {
            builder.set_row(index, row.x, row.pads, row.pad_width)?;
        }
        for entry in &self.slices {
            builder.set_slice_alpha(entry.slice, entry.alpha_deg.to_radians())?;
        }
        builder
            .set_geometry(self.z_length_a, self.z_length_c)
            .set_calibration(self.calibration);
        Ok(builder)
    }

    /// The configured distortion grid, or an all-zero grid.
    ///
    /// # Errors
    /// Returns an error if the grid is invalid.
    pub fn distortion(&self) -> Result<GridDistortion> {
        match &self.distortion {
            Some(grid) => grid.build(self.rows.len()),
            None => Ok(GridDistortion::zero(self.rows.len())),
        }
    }

    /// Builds the finished transform.
    ///
    /// # Errors
    /// Returns an error if the configuration does not describe a valid
    /// detector.
    pub fn build(&self) -> Result<TpcFastTransform> {
        self.builder()?.finish(self.distortion()?)
    }
}

/// Loads a standalone calibration document.
///
/// # Errors
/// Returns [`Error::ConfigError`] if the file cannot be read or parsed.
pub fn load_calibration<P: AsRef<Path>>(path: P) -> Result<Calibration> {
    let path = path.as_ref();
    let file =
        File::open(path).map_err(|e| Error::ConfigError(format!("{}: {e}", path.display())))?;
    serde_json::from_reader(BufReader::new(file))
        .map_err(|e| Error::ConfigError(format!("{}: {e}", path.display())))
}
