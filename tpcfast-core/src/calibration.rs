//! Drift calibration parameters.

#[cfg(feature = "serde")]
use serde::{Deserialize, Serialize};

/// Speed of light in cm/ns.
pub const SPEED_OF_LIGHT_CM_PER_NS: f32 = 29.979_246;

/// Snapshot of the drift model coefficients.
///
/// The drift length of a signal with time bin `t` at global `y` is
///
/// `L(t, y) = (t - t0) * (v_drift + v_drift_corr_y * y) + l_drift_corr`
///
/// The whole snapshot is replaced at once; `time_stamp` lets callers
/// detect a stale calibration.
#[derive(Debug, Clone, Copy, PartialEq)]
#[cfg_attr(feature = "serde", derive(Serialize, Deserialize), serde(default))]
pub struct Calibration {
    /// Time stamp of the calibration.
    pub time_stamp: i64,
    /// T0 [time bin].
    pub t0: f32,
    /// Drift velocity [cm/time bin].
    pub v_drift: f32,
    /// Drift velocity correction per global y [1/time bin].
    pub v_drift_corr_y: f32,
    /// Drift length correction [cm].
    pub l_drift_corr: f32,
    /// Time-of-flight coefficient, nominally `v_drift / c` in time-bin units.
    pub tof_corr: f32,
    /// Z of the primary vertex [cm].
    pub prim_vtx_z: f32,
    /// Global Z shift of the detector [cm], applied last.
    pub alignment_z: f32,
}

impl Default for Calibration {
    fn default() -> Self {
        Self {
            time_stamp: 0,
            t0: 0.0,
            v_drift: 1.0, // unit drift velocity: one cm per time bin
            v_drift_corr_y: 0.0,
            l_drift_corr: 0.0,
            tof_corr: 0.0,
            prim_vtx_z: 0.0,
            alignment_z: 0.0,
        }
    }
}

impl Calibration {
    /// Creates a calibration with default values.
    #[must_use]
    pub fn new() -> Self {
        Self::default()
    }

    /// Sets the time stamp.
    #[must_use]
    pub fn with_time_stamp(mut self, time_stamp: i64) -> Self {
        self.time_stamp = time_stamp;
        self
    }

    /// Sets T0.
    #[must_use]
    pub fn with_t0(mut self, t0: f32) -> Self {
        self.t0 = t0;
        self
    }

    /// Sets the drift velocity and its linear y correction.
    #[must_use]
    pub fn with_drift_velocity(mut self, v_drift: f32, v_drift_corr_y: f32) -> Self {
        self.v_drift = v_drift;
        self.v_drift_corr_y = v_drift_corr_y;
        self
    }

    /// Sets the drift length correction.
    #[must_use]
    pub fn with_drift_length_correction(mut self, l_drift_corr: f32) -> Self {
        self.l_drift_corr = l_drift_corr;
        self
    }

    /// Sets the time-of-flight coefficient.
    #[must_use]
    pub fn with_tof_correction(mut self, tof_corr: f32) -> Self {
        self.tof_corr = tof_corr;
        self
    }

    /// Derives the time-of-flight coefficient from the drift velocity.
    ///
    /// `tof_corr = v_drift / (c * time_bin_ns)`.
    #[must_use]
    pub fn with_tof_from_drift(mut self, time_bin_ns: f32) -> Self {
        self.tof_corr = self.v_drift / (SPEED_OF_LIGHT_CM_PER_NS * time_bin_ns);
        self
    }

    /// Sets the primary vertex Z.
    #[must_use]
    pub fn with_primary_vertex_z(mut self, prim_vtx_z: f32) -> Self {
        self.prim_vtx_z = prim_vtx_z;
        self
    }

    /// Sets the global Z alignment shift.
    #[must_use]
    pub fn with_alignment_z(mut self, alignment_z: f32) -> Self {
        self.alignment_z = alignment_z;
        self
    }

    /// Drift velocity at global `y`.
    #[inline]
    #[must_use]
    pub fn drift_velocity(&self, global_y: f32) -> f32 {
        self.v_drift + self.v_drift_corr_y * global_y
    }

    /// Drift length [cm] of a signal at time bin `time`.
    #[inline]
    #[must_use]
    pub fn drift_length(&self, time: f32, global_y: f32) -> f32 {
        (time - self.t0) * self.drift_velocity(global_y) + self.l_drift_corr
    }

    /// Time bin of a signal with drift length `length`; exact inverse of
    /// [`Calibration::drift_length`].
    #[inline]
    #[must_use]
    pub fn drift_time(&self, length: f32, global_y: f32) -> f32 {
        self.t0 + (length - self.l_drift_corr) / self.drift_velocity(global_y)
    }
}
