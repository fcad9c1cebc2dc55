use tpcfast_core::{
    Calibration, Distortion, Error, FlatBuffer, GridDistortion, GridDistortionBuilder, LayoutError,
    NoDistortion, TpcFastTransform, TransformBuilder,
};

const ROWS: usize = 4;

#[allow(clippy::cast_precision_loss)]
fn grid() -> GridDistortion {
    let mut grid = GridDistortionBuilder::new(ROWS, 3, 3)
        .unwrap()
        .with_u_range(-15.0, 15.0)
        .with_v_range(0.0, 250.0);
    for row in 0..ROWS {
        let du = row as f32 * 0.1;
        let map = |u: f32, v: f32| Distortion::new(0.05, 0.01 * u + du, 0.002 * v);
        grid.fill_row(row, map).unwrap();
    }
    grid.build().unwrap()
}

#[allow(clippy::cast_precision_loss)]
fn original() -> TpcFastTransform {
    let mut builder = TransformBuilder::start(ROWS).unwrap();
    for row in 0..ROWS {
        builder.set_row(row, 85.0 + row as f32, 66, 0.416).unwrap();
    }
    builder.set_geometry(250.0, 249.5).set_calibration(
        Calibration::new()
            .with_drift_velocity(0.516, 2e-4)
            .with_t0(3.0)
            .with_tof_from_drift(200.0),
    );
    builder.finish(grid()).unwrap()
}

const QUERIES: [(usize, usize, f32, f32); 6] = [
    (0, 0, 10.0, 100.0),
    (5, 1, 32.5, 250.0),
    (17, 2, 0.0, 480.0),
    (18, 3, 65.0, 12.0),
    (27, 0, 20.0, 333.0),
    (35, 3, 44.4, 9.0),
];

fn assert_same_results<R1, R2>(
    a: &TpcFastTransform<GridDistortion, R1>,
    b: &TpcFastTransform<GridDistortion, R2>,
) where
    R1: AsRef<[u8]>,
    R2: AsRef<[u8]>,
{
    for (slice, row, pad, time) in QUERIES {
        let left = a.transform(slice, row, pad, time).unwrap();
        let right = b.transform(slice, row, pad, time).unwrap();
        assert_eq!(left.x.to_bits(), right.x.to_bits());
        assert_eq!(left.y.to_bits(), right.y.to_bits());
        assert_eq!(left.z.to_bits(), right.z.to_bits());
    }
}

#[test]
fn test_clone_into_external_buffer() {
    let transform = original();
    let mut storage = FlatBuffer::zeroed(transform.flat_size() + 128);
    let copy = transform.clone_into(storage.as_bytes_mut()).unwrap();

    assert_eq!(copy.flat_bytes(), transform.flat_bytes());
    assert_ne!(copy.flat_bytes().as_ptr(), transform.flat_bytes().as_ptr());
    assert_eq!(copy.calibration(), transform.calibration());
    assert_same_results(&transform, &copy);
}

#[test]
fn test_clone_into_rejects_small_or_misaligned_buffer() {
    let transform = original();

    let mut small = FlatBuffer::zeroed(transform.flat_size() - 1);
    assert!(matches!(
        transform.clone_into(small.as_bytes_mut()),
        Err(Error::Layout(LayoutError::TooSmall { .. }))
    ));

    let mut storage = FlatBuffer::zeroed(transform.flat_size() + 8);
    assert!(matches!(
        transform.clone_into(&mut storage.as_bytes_mut()[8..]),
        Err(Error::Layout(LayoutError::Misaligned { .. }))
    ));
}

#[test]
fn test_relocate_to_new_allocation() {
    let transform = original();
    let reference = transform.to_owned_region();
    let old_base = transform.flat_bytes().as_ptr() as usize;

    let moved = transform
        .relocate(|region| {
            let target = FlatBuffer::from_bytes(region.as_bytes());
            drop(region);
            target
        })
        .unwrap();

    assert_eq!(moved.flat_bytes(), reference.flat_bytes());
    assert_ne!(moved.flat_bytes().as_ptr() as usize, old_base);
    assert_same_results(&reference, &moved);
}

#[test]
fn test_release_and_adopt() {
    let transform = original();
    let expected = transform.transform(3, 2, 12.0, 90.0).unwrap();

    let (region, calibration) = transform.into_region();
    let adopted = TpcFastTransform::<GridDistortion, _>::from_region(region, calibration).unwrap();
    assert_eq!(adopted.transform(3, 2, 12.0, 90.0).unwrap(), expected);

    let bytes = adopted.flat_bytes();
    let borrowed = TpcFastTransform::<GridDistortion, _>::from_region(bytes, calibration).unwrap();
    let owned = borrowed.to_owned_region();
    assert_eq!(owned.region(), adopted.region());
}

#[test]
fn test_copies_have_independent_calibration() {
    let transform = original();
    let mut copy = transform.to_owned_region();
    copy.set_calibration(Calibration::new().with_drift_velocity(0.6, 0.0));
    copy.set_time_stamp(99);

    assert_eq!(transform.time_stamp(), 0);
    assert_ne!(
        copy.transform(1, 1, 10.0, 200.0).unwrap(),
        transform.transform(1, 1, 10.0, 200.0).unwrap()
    );
}

#[test]
fn test_adopt_rejects_foreign_regions() {
    let transform = original();
    let calibration = *transform.calibration();

    assert!(matches!(
        TpcFastTransform::<NoDistortion, _>::from_region(transform.flat_bytes(), calibration),
        Err(Error::Layout(LayoutError::DistortionKind { .. }))
    ));

    let mut corrupt = transform.to_owned_region().into_region().0;
    corrupt.as_bytes_mut()[4] = 9;
    assert!(matches!(
        TpcFastTransform::<GridDistortion, _>::from_region(corrupt, calibration),
        Err(Error::Layout(LayoutError::UnsupportedVersion(_)))
    ));

    let truncated = &transform.flat_bytes()[..transform.flat_size() / 2];
    assert!(matches!(
        TpcFastTransform::<GridDistortion, _>::from_region(truncated, calibration),
        Err(Error::Layout(LayoutError::TooSmall { .. }))
    ));
}

#[test]
fn test_adopt_validates_nested_grid() {
    let transform = original();
    let layout = *transform.layout();
    let mut damaged = transform.to_owned_region().into_region().0;
    // first node count of the grid header
    let nodes_u = layout.distortion_offset + 4;
    damaged.as_bytes_mut()[nodes_u..nodes_u + 4].copy_from_slice(&1_u32.to_ne_bytes());
    assert!(matches!(
        TpcFastTransform::<GridDistortion, _>::from_region(damaged, *transform.calibration()),
        Err(Error::Layout(LayoutError::Distortion(_)))
    ));
}

#[test]
fn test_adopt_rejects_grid_for_other_row_count() {
    let transform = original();
    let layout = *transform.layout();
    let mut damaged = transform.to_owned_region().into_region().0;
    // row count of the grid header; the shorter grid is otherwise valid
    let rows = layout.distortion_offset;
    let fewer = u32::try_from(ROWS - 1).unwrap();
    damaged.as_bytes_mut()[rows..rows + 4].copy_from_slice(&fewer.to_ne_bytes());
    assert!(matches!(
        TpcFastTransform::<GridDistortion, _>::from_region(damaged, *transform.calibration()),
        Err(Error::Layout(LayoutError::Distortion(_)))
    ));
}

#[test]
fn test_region_alignment() {
    assert_eq!(TpcFastTransform::<GridDistortion>::region_alignment(), 16);
    assert_eq!(TpcFastTransform::<NoDistortion>::region_alignment(), 16);
    let transform = original();
    assert_eq!(transform.flat_size() % 16, 0);
}
