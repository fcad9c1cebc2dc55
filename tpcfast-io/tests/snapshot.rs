use approx::assert_abs_diff_eq;
use tempfile::NamedTempFile;
use tpcfast_core::{
    Calibration, Distortion, GridDistortion, GridDistortionBuilder, NoDistortion,
    TpcFastTransform, TransformBuilder,
};
use tpcfast_io::{rewrite_calibration, Error, SnapshotReader, SnapshotWriter};

#[allow(clippy::cast_precision_loss)]
fn transform() -> TpcFastTransform {
    let rows = 3;
    let mut grid = GridDistortionBuilder::new(rows, 3, 3)
        .unwrap()
        .with_u_range(-15.0, 15.0)
        .with_v_range(0.0, 250.0);
    let mut builder = TransformBuilder::start(rows).unwrap();
    for row in 0..rows {
        builder.set_row(row, 85.0 + 2.0 * row as f32, 66, 0.416).unwrap();
        grid.fill_row(row, |u, v| Distortion::new(0.01, 0.003 * u, 0.001 * v))
            .unwrap();
    }
    builder.set_geometry(250.0, 250.0).set_calibration(
        Calibration::new()
            .with_time_stamp(1000)
            .with_drift_velocity(0.516, 0.0)
            .with_tof_from_drift(200.0),
    );
    builder.finish(grid.build().unwrap()).unwrap()
}

fn write(transform: &TpcFastTransform) -> NamedTempFile {
    let file = NamedTempFile::new().unwrap();
    SnapshotWriter::create(file.path())
        .unwrap()
        .write(transform)
        .unwrap();
    file
}

#[test]
fn test_snapshot_round_trip_in_place() {
    let original = transform();
    let file = write(&original);

    let reader = SnapshotReader::open(file.path()).unwrap();
    assert_eq!(reader.calibration(), *original.calibration());
    assert_eq!(reader.region_bytes(), original.flat_bytes());

    let mapped = reader.transform::<GridDistortion>().unwrap();
    for (slice, row) in [(0, 0), (9, 1), (18, 2), (35, 0)] {
        assert_eq!(
            mapped.transform(slice, row, 30.0, 250.0).unwrap(),
            original.transform(slice, row, 30.0, 250.0).unwrap()
        );
    }
}

#[test]
fn test_mapping_outlives_reader() {
    let original = transform();
    let file = write(&original);

    let mapped = {
        let reader = SnapshotReader::open(file.path()).unwrap();
        reader.transform::<GridDistortion>().unwrap()
    };
    assert_eq!(mapped.number_of_rows(), 3);
    assert_eq!(
        mapped.transform(4, 1, 12.0, 80.0).unwrap(),
        original.transform(4, 1, 12.0, 80.0).unwrap()
    );
}

#[test]
fn test_load_copies_region() {
    let original = transform();
    let file = write(&original);
    let loaded = SnapshotReader::open(file.path())
        .unwrap()
        .load::<GridDistortion>()
        .unwrap();
    assert_eq!(loaded.region(), original.region());
}

#[test]
fn test_wrong_distortion_kind() {
    let file = write(&transform());
    let reader = SnapshotReader::open(file.path()).unwrap();
    assert!(matches!(
        reader.transform::<NoDistortion>(),
        Err(Error::InvalidFormat(_))
    ));
}

#[test]
fn test_rewrite_calibration_keeps_region() {
    let original = transform();
    let file = write(&original);

    let recalibrated = original
        .calibration()
        .with_time_stamp(2000)
        .with_drift_velocity(0.55, 0.0);
    rewrite_calibration(file.path(), &recalibrated).unwrap();

    let reader = SnapshotReader::open(file.path()).unwrap();
    assert_eq!(reader.calibration(), recalibrated);
    assert_eq!(reader.region_bytes(), original.flat_bytes());

    let mapped = reader.transform::<GridDistortion>().unwrap();
    assert_eq!(mapped.time_stamp(), 2000);
    let (_, v) = mapped.pad_time_to_uv(0, 0, 10.0, 100.0).unwrap();
    assert_abs_diff_eq!(v, 55.0, epsilon = 1e-4);
}

#[test]
fn test_truncated_snapshot() {
    let file = write(&transform());
    let bytes = std::fs::read(file.path()).unwrap();
    let truncated = NamedTempFile::new().unwrap();
    std::fs::write(truncated.path(), &bytes[..bytes.len() - 16]).unwrap();
    assert!(matches!(
        SnapshotReader::open(truncated.path()),
        Err(Error::InvalidFormat(_))
    ));
    let calibration = Calibration::default();
    assert!(rewrite_calibration(truncated.path(), &calibration).is_err());
}
