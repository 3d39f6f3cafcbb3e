use super::*;
use crate::foundation::core::MAX_DEPTH;

fn gradient_output(w: u32, h: u32) -> RenderOutput {
    let mut out = RenderOutput::cleared(w, h, PixelRect::full(w, h)).unwrap();
    for i in 0..(w * h) as usize {
        out.color[i * 4..i * 4 + 4].copy_from_slice(&[i as u8, 0, 0, 255]);
        out.depth[i] = i as f32 / 100.0;
    }
    out
}

fn job(region: PixelRect) -> TransferJob {
    TransferJob {
        output: gradient_output(4, 4),
        region,
        target: Contribution::new(1, 4, 4).unwrap(),
    }
}

#[test]
fn copy_region_copies_only_the_region() {
    let c = copy_region(job(PixelRect::new(1, 2, 2, 1))).unwrap();
    assert_eq!(c.valid, PixelRect::new(1, 2, 2, 1));
    assert_eq!(c.pixel(1, 2), ([9, 0, 0, 255], 0.09));
    assert_eq!(c.pixel(2, 2), ([10, 0, 0, 255], 0.10));
    assert_eq!(c.pixel(0, 2), ([0, 0, 0, 0], MAX_DEPTH));
    assert_eq!(c.pixel(1, 3), ([0, 0, 0, 0], MAX_DEPTH));
}

#[test]
fn copy_region_rejects_mismatched_target() {
    let mut j = job(PixelRect::full(4, 4));
    j.target = Contribution::new(1, 2, 2).unwrap();
    assert!(matches!(
        copy_region(j),
        Err(PipelineError::StateMismatch(_))
    ));
    assert!(copy_region(job(PixelRect::new(3, 3, 2, 1))).is_err());
}

#[test]
fn cpu_device_completes_through_the_fence() {
    let mut dev = CpuReadbackDevice::new(Some(1)).unwrap();
    let mut fence = dev.submit(job(PixelRect::full(4, 4)));
    match fence.wait(None) {
        FenceStatus::Complete(c) => assert_eq!(c.valid, PixelRect::full(4, 4)),
        other => panic!("unexpected {other:?}"),
    }
    assert!(matches!(fence.poll(), FenceStatus::Failed(_)));
}

#[test]
fn cpu_device_rejects_zero_threads() {
    assert!(CpuReadbackDevice::new(Some(0)).is_err());
}

#[test]
fn deferred_device_completes_out_of_order() {
    let (mut dev, ctl) = DeferredReadbackDevice::new();
    let mut a = dev.submit(job(PixelRect::full(4, 4)));
    let mut b = dev.submit(job(PixelRect::new(0, 0, 1, 1)));
    assert_eq!(ctl.pending_ids(), vec![0, 1]);

    assert!(ctl.complete(1));
    assert!(matches!(a.poll(), FenceStatus::Pending));
    assert!(matches!(b.poll(), FenceStatus::Complete(_)));

    assert!(ctl.fail(0, "device lost"));
    match a.poll() {
        FenceStatus::Failed(msg) => assert!(msg.contains("device lost")),
        other => panic!("unexpected {other:?}"),
    }
    assert!(!ctl.complete(0));
}

#[test]
fn deferred_bounded_wait_stays_pending_and_unbounded_wait_forces_copy() {
    let (mut dev, _ctl) = DeferredReadbackDevice::new();
    let mut f = dev.submit(job(PixelRect::full(4, 4)));
    assert!(matches!(
        f.wait(Some(Duration::from_millis(5))),
        FenceStatus::Pending
    ));
    assert!(matches!(f.wait(None), FenceStatus::Complete(_)));
}
