use approx::{assert_abs_diff_eq, assert_relative_eq};
use tpcfast_core::{
    Calibration, Distortion, GridDistortion, GridDistortionBuilder, PadHitBatch, Side,
    SliceInfo, TpcFastTransform, TransformBuilder, NUMBER_OF_SLICES,
};

const ROWS: usize = 16;

fn calibration() -> Calibration {
    Calibration::new()
        .with_time_stamp(42)
        .with_t0(2.5)
        .with_drift_velocity(0.516, 1e-4)
        .with_drift_length_correction(-0.3)
        .with_tof_from_drift(200.0)
        .with_primary_vertex_z(0.7)
        .with_alignment_z(0.02)
}

#[allow(clippy::cast_precision_loss)]
fn distortion() -> GridDistortion {
    let mut grid = GridDistortionBuilder::new(ROWS, 5, 4)
        .unwrap()
        .with_u_range(-40.0, 40.0)
        .with_v_range(0.0, 250.0);
    for row in 0..ROWS {
        let dx = 0.01 * row as f32;
        let map = |u: f32, v: f32| Distortion::new(dx, 0.002 * u, -0.001 * v);
        grid.fill_row(row, map).unwrap();
    }
    grid.build().unwrap()
}

#[allow(clippy::cast_precision_loss, clippy::cast_possible_truncation)]
fn detector() -> TpcFastTransform {
    let mut builder = TransformBuilder::start(ROWS).unwrap();
    for row in 0..ROWS {
        let x = 85.0 + 1.5 * row as f32;
        let pads = 66 + 2 * row as u32;
        builder.set_row(row, x, pads, 0.416).unwrap();
    }
    builder
        .set_geometry(249.7, 249.7)
        .set_calibration(calibration());
    builder.finish(distortion()).unwrap()
}

#[test]
fn test_every_slice_is_queryable() {
    let transform = detector();
    for slice in 0..NUMBER_OF_SLICES {
        for row in [0, ROWS / 2, ROWS - 1] {
            let point = transform.transform(slice, row, 20.0, 200.0).unwrap();
            assert!([point.x, point.y, point.z].iter().all(|c| c.is_finite()));
            match Side::of_slice(slice) {
                Side::A => assert!(point.z > 0.0, "slice {slice} row {row}: {point:?}"),
                Side::C => assert!(point.z < 0.0, "slice {slice} row {row}: {point:?}"),
            }
        }
    }
}

#[test]
fn test_nominal_sector_rotation() {
    let transform = detector();
    for slice in 0..NUMBER_OF_SLICES {
        let info = transform.slice_info(slice).unwrap();
        let expected = SliceInfo::nominal(slice);
        assert_relative_eq!(info.sin_alpha, expected.sin_alpha);
        assert_relative_eq!(info.cos_alpha, expected.cos_alpha);
    }
    // both sides share the sector angles
    assert_eq!(transform.slice_info(3), transform.slice_info(21));
    let first = transform.slice_info(0).unwrap();
    let expected = 10.0_f32.to_radians().sin();
    assert_relative_eq!(first.sin_alpha, expected, epsilon = 1e-6);
}

#[test]
fn test_global_points_keep_radius() {
    let transform = detector();
    for slice in [0, 5, 18, 29] {
        let local = transform.transform(slice, 7, 30.0, 300.0).unwrap();
        let global = transform.transform_to_global(slice, 7, 30.0, 300.0).unwrap();
        let radius = local.x.hypot(local.y);
        assert_relative_eq!(global.x.hypot(global.y), radius, max_relative = 1e-5);
        assert_abs_diff_eq!(local.z, global.z);
    }
}

#[test]
fn test_mirrored_rows_have_opposite_y() {
    let mut transform = detector();
    // without a y-dependent drift velocity both sides see the same v
    transform.set_calibration(calibration().with_drift_velocity(0.516, 0.0));
    for row in 0..ROWS {
        let a_side = transform.transform(4, row, 10.0, 150.0).unwrap();
        let c_side = transform.transform(22, row, 10.0, 150.0).unwrap();
        assert!(a_side.y * c_side.y < 0.0, "row {row}");
    }
}

#[test]
#[allow(clippy::cast_possible_truncation)]
fn test_batch_matches_single_queries() {
    let transform = detector();
    let mut hits = PadHitBatch::with_capacity(1000);
    for i in 0..1000_u16 {
        let slice = i % 40;
        let row = (i / 40) % 18;
        hits.push(slice, row, f32::from(i % 70), f32::from(i % 500));
    }

    let (points, stats) = transform.transform_batch(&hits);
    assert_eq!(stats.transformed + stats.rejected, hits.len());
    assert_eq!(points.len(), stats.transformed);
    assert!(stats.rejected > 0);

    for (k, &source) in points.hit_index.iter().enumerate() {
        let expected = transform
            .transform(
                usize::from(hits.slice[source]),
                usize::from(hits.row[source]),
                hits.pad[source],
                hits.time[source],
            )
            .unwrap();
        assert_eq!(points.point(k), Some(expected));
    }
}

#[test]
fn test_concurrent_queries_agree() {
    let transform = detector();
    let reference: Vec<_> = (0..ROWS)
        .map(|row| transform.transform(11, row, 12.5, 321.0).unwrap())
        .collect();

    std::thread::scope(|scope| {
        for _ in 0..4 {
            scope.spawn(|| {
                for (row, expected) in reference.iter().enumerate() {
                    let point = transform.transform(11, row, 12.5, 321.0).unwrap();
                    assert_eq!(point, *expected);
                }
            });
        }
    });
}

#[test]
fn test_uv_round_trips_through_pad_time() {
    let transform = detector();
    for slice in [0, 17, 18, 35] {
        let (u, v) = transform.pad_time_to_uv(slice, 3, 17.25, 412.0).unwrap();
        let (pad, time) = transform.uv_to_pad_time(slice, 3, u, v).unwrap();
        assert_abs_diff_eq!(pad, 17.25, epsilon = 1e-3);
        assert_relative_eq!(time, 412.0, max_relative = 1e-5);

        let (y, z) = transform.uv_to_yz(slice, 3, u, v).unwrap();
        let (u2, v2) = transform.yz_to_uv(slice, 3, y, z).unwrap();
        assert_abs_diff_eq!(u2, u, epsilon = 1e-4);
        assert_abs_diff_eq!(v2, v, epsilon = 1e-3);
    }
}
