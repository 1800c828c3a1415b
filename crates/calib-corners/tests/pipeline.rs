use calib_corners::aprilgrid::{render_aprilgrid, AprilGridRenderParams};
use calib_corners::chessboard::{render_checkerboard, ChessboardParams, CheckerboardRenderParams};
use calib_corners::core::{AprilGrid, Checkerboard, GrayImage, RawImage, TargetGeometry};
use calib_corners::pose::{init_cam_poses, CameraModel, PoseInitParams, PoseInitializer};
use calib_corners::{
    BackendConfig, CachePaths, CancelToken, CornerCache, CornerDetectionRun, DetectionStrategy,
    DispatchError, FrameId, InMemoryDataset, PipelineContext,
};
use nalgebra::Vector3;

fn init_logger() {
    let _ = env_logger::builder().is_test(true).try_init();
}

/// Copy `img` onto a larger white canvas at `(dx, dy)`.
fn shifted(img: &GrayImage, dx: usize, dy: usize) -> GrayImage {
    let mut out = GrayImage::filled(img.width + dx + 8, img.height + dy + 8, 235);
    for y in 0..img.height {
        for x in 0..img.width {
            out.set(x + dx, y + dy, img.get(x, y));
        }
    }
    out
}

fn aprilgrid(tag_size: f64) -> TargetGeometry {
    AprilGrid::new(7, 4, tag_size, 0.3, 0, "16h5").unwrap().into()
}

fn aprilgrid_dataset() -> InMemoryDataset {
    let TargetGeometry::AprilGrid(grid) = aprilgrid(0.0946) else {
        unreachable!()
    };
    let (img, _) = render_aprilgrid(&grid, &AprilGridRenderParams::default()).unwrap();

    let mut ds = InMemoryDataset::new(2);
    for (k, ts) in [1_000i64, 2_000, 3_000, 4_000].into_iter().enumerate() {
        let frame = shifted(&img, 3 * k, 2 * k);
        ds.insert(ts, 0, RawImage::mono8(frame.width, frame.height, frame.data.clone()).unwrap());
        // Second camera is missing one frame and delivers 16-bit data.
        if ts != 3_000 {
            ds.insert(ts, 1, frame.to_raw16());
        }
    }
    ds
}

fn run(
    ctx: &PipelineContext,
    ds: &InMemoryDataset,
    strategy: &DetectionStrategy,
    cache: Option<CachePaths>,
) -> calib_corners::DetectionOutcome {
    let mut r = CornerDetectionRun::new(ctx, ds, strategy);
    if let Some(paths) = cache {
        r = r.with_cache(paths);
    }
    r.run().unwrap()
}

#[test]
fn aprilgrid_frames_yield_all_corners() {
    init_logger();
    let ds = aprilgrid_dataset();
    let strategy = DetectionStrategy::for_target(&aprilgrid(0.0946)).unwrap();
    let ctx = PipelineContext::new(2, 1).unwrap();
    let out = run(&ctx, &ds, &strategy, None);

    assert_eq!(out.cache.accepted.len(), 7);
    assert!(!out.cache.accepted.contains_key(&FrameId::new(3_000, 1)));
    for (frame, data) in &out.cache.accepted {
        assert_eq!(data.len(), 112, "frame {frame:?}");
        assert!(data.is_consistent());
    }
    // Same content, same corners regardless of bit depth.
    let a = &out.cache.accepted[&FrameId::new(2_000, 0)];
    let b = &out.cache.accepted[&FrameId::new(2_000, 1)];
    assert_eq!(a.corners, b.corners);
    assert_eq!(a.seq, 1);

    // Integer shifts move every corner by the same offset.
    let f0 = &out.cache.accepted[&FrameId::new(1_000, 0)];
    let f3 = &out.cache.accepted[&FrameId::new(4_000, 0)];
    for (p0, p3) in f0.corners.iter().zip(&f3.corners) {
        assert!(((p3 - p0) - nalgebra::Vector2::new(9.0, 6.0)).norm() < 0.05);
    }
}

#[test]
fn detection_is_deterministic_and_independent_of_workers() {
    init_logger();
    let ds = aprilgrid_dataset();
    let strategy = DetectionStrategy::for_target(&aprilgrid(0.0946)).unwrap();

    let single = run(&PipelineContext::new(1, 1).unwrap(), &ds, &strategy, None);
    let again = run(&PipelineContext::new(1, 1).unwrap(), &ds, &strategy, None);
    let many = run(&PipelineContext::new(4, 1).unwrap(), &ds, &strategy, None);
    let chunked = run(&PipelineContext::new(3, 3).unwrap(), &ds, &strategy, None);

    assert_eq!(single.cache, again.cache);
    assert_eq!(single.cache, many.cache);
    assert_eq!(single.cache, chunked.cache);
}

#[test]
fn second_run_loads_the_cache() {
    init_logger();
    let dir = tempfile::tempdir().unwrap();
    let paths = CachePaths::in_dir(dir.path());
    let ds = aprilgrid_dataset();
    let strategy = DetectionStrategy::for_target(&aprilgrid(0.0946)).unwrap();
    let ctx = PipelineContext::new(2, 2).unwrap();

    let first = run(&ctx, &ds, &strategy, Some(paths.clone()));
    assert!(!first.from_cache);
    assert!(paths.bin.exists() && paths.json.exists());

    let second = run(&ctx, &ds, &strategy, Some(paths));
    assert!(second.from_cache);
    assert_eq!(second.cache, first.cache);
}

#[test]
fn changed_tag_size_invalidates_the_cache() {
    init_logger();
    let dir = tempfile::tempdir().unwrap();
    let paths = CachePaths::in_dir(dir.path());
    let ds = aprilgrid_dataset();
    let ctx = PipelineContext::new(2, 2).unwrap();

    let original = DetectionStrategy::for_target(&aprilgrid(0.0946)).unwrap();
    run(&ctx, &ds, &original, Some(paths.clone()));

    let resized = DetectionStrategy::for_target(&aprilgrid(0.05)).unwrap();
    let out = run(&ctx, &ds, &resized, Some(paths.clone()));
    assert!(!out.from_cache);

    // The rewritten cache now belongs to the new target.
    let mut reloaded = CornerCache::default();
    assert!(reloaded.try_load(&paths, &resized).unwrap());
    assert!(CornerCache::default().try_load(&paths, &original).is_err());
}

#[test]
fn cache_of_another_backend_is_not_used() {
    init_logger();
    let dir = tempfile::tempdir().unwrap();
    let paths = CachePaths::in_dir(dir.path());
    let board = Checkerboard::new(5, 7, 0.024).unwrap();
    let (img, _) = render_checkerboard(&board, &CheckerboardRenderParams::default()).unwrap();
    let mut ds = InMemoryDataset::new(1);
    ds.insert(0, 0, img.to_raw16());

    let target: TargetGeometry = board.into();
    let chess = DetectionStrategy::new(
        &target,
        &BackendConfig::CheckerboardChess(ChessboardParams::default()),
    )
    .unwrap();
    let grid = DetectionStrategy::for_target(&target).unwrap();
    let ctx = PipelineContext::new(1, 1).unwrap();

    let stale = CornerCache::default();
    stale.save(&paths, &chess).unwrap();

    let out = run(&ctx, &ds, &grid, Some(paths.clone()));
    assert!(!out.from_cache);
    assert_eq!(out.cache.accepted[&FrameId::new(0, 0)].len(), 35);
    assert!(CornerCache::default().try_load(&paths, &grid).unwrap());
}

#[test]
fn cancelled_run_writes_no_cache() {
    init_logger();
    let dir = tempfile::tempdir().unwrap();
    let paths = CachePaths::in_dir(dir.path());
    let ds = aprilgrid_dataset();
    let strategy = DetectionStrategy::for_target(&aprilgrid(0.0946)).unwrap();
    let ctx = PipelineContext::new(2, 1).unwrap();

    let token = CancelToken::new();
    token.cancel();
    let err = CornerDetectionRun::new(&ctx, &ds, &strategy)
        .with_cache(paths.clone())
        .with_cancel(token)
        .run()
        .unwrap_err();
    assert!(matches!(err, DispatchError::Cancelled));
    assert!(!paths.bin.exists());
    assert!(!paths.json.exists());
}

#[test]
fn poses_from_detected_checkerboard() {
    init_logger();
    // 24 px squares of 24 mm seen from 1 m with f = 1000 px.
    let board = Checkerboard::new(5, 7, 0.024).unwrap();
    let params = CheckerboardRenderParams::default();
    let (img, layout) = render_checkerboard(&board, &params).unwrap();
    let origin = layout.corner_position(0, 0);

    let mut ds = InMemoryDataset::new(1);
    ds.insert(42, 0, RawImage::mono8(img.width, img.height, img.data.clone()).unwrap());

    let target: TargetGeometry = board.into();
    let strategy = DetectionStrategy::for_target(&target).unwrap();
    let ctx = PipelineContext::new(1, 1).unwrap();
    let out = run(&ctx, &ds, &strategy, None);

    let camera = CameraModel::Pinhole {
        fx: 1000.0,
        fy: 1000.0,
        cx: origin.x,
        cy: origin.y,
    };
    let init = PoseInitializer::new(PoseInitParams::default()).unwrap();
    let set = init_cam_poses(&out.cache.accepted, &target, &[camera], &init);

    assert_eq!(set.failures, 0);
    let pose = &set.poses[&FrameId::new(42, 0)];
    assert_eq!(pose.num_inliers, 35);
    assert!(pose.residuals.iter().all(|r| *r < 0.5));
    let t = pose.camera_from_target.translation.vector;
    assert!((t - Vector3::new(0.0, 0.0, 1.0)).norm() < 1e-2, "{t}");
    assert!(pose.camera_from_target.rotation.angle() < 2e-2);
}
