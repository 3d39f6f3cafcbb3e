use super::*;
use crate::readback::device::DeferredReadbackDevice;
use crate::readback::slot::SlotPoolOpts;
use crate::sync::GlobalFrameState;
use crate::view::View;

fn ticket(seq: u64, w: u32, h: u32) -> FrameTicket {
    FrameTicket {
        frame: GlobalFrameState {
            seq: FrameSeq(seq),
            ..GlobalFrameState::default()
        },
        view: View::new(ViewId(0), w, h),
    }
}

fn output(w: u32, h: u32, shade: u8) -> RenderOutput {
    let mut out = RenderOutput::cleared(w, h, PixelRect::full(w, h)).unwrap();
    out.color.fill(shade);
    out.depth.fill(0.5);
    out
}

fn pool() -> SlotPool {
    SlotPool::new(SlotPoolOpts::default())
}

fn begin(p: &mut AsyncReadbackPipeline, seq: u64, pool: &mut SlotPool) -> usize {
    match p.begin_frame(ticket(seq, 4, 4), pool).unwrap() {
        BeginFrame::Slot(i) => i,
        BeginFrame::Blocked => panic!("frame {seq} unexpectedly blocked"),
    }
}

fn consume(p: &mut AsyncReadbackPipeline, pool: &mut SlotPool) -> (u64, Result<u8, String>) {
    let taken = p.take_front_for_composite().unwrap().unwrap();
    let seq = taken.ticket.seq().0;
    let (shade, buffers) = match taken.contribution {
        Ok(c) => (Ok(c.color[0]), Some(c)),
        Err(e) => (Err(e), None),
    };
    p.release(taken.slot, buffers, pool).unwrap();
    (seq, shade)
}

#[test]
fn asynchronicity_above_bound_is_rejected() {
    assert!(AsyncReadbackPipeline::new(ViewId(0), 0, MAX_ASYNC_FRAMES + 1).is_err());
}

#[test]
fn outstanding_frames_never_exceed_k_plus_one() {
    for k in 0..=MAX_ASYNC_FRAMES {
        let mut pool = pool();
        let (mut dev, _ctl) = DeferredReadbackDevice::new();
        let mut p = AsyncReadbackPipeline::new(ViewId(0), 0, k).unwrap();
        for seq in 1..=(k as u64 + 1) {
            let i = begin(&mut p, seq, &mut pool);
            p.submit_transfer(i, output(4, 4, 1), true, &mut dev).unwrap();
        }
        assert_eq!(p.outstanding(), k + 1);
        assert_eq!(
            p.begin_frame(ticket(99, 4, 4), &mut pool).unwrap(),
            BeginFrame::Blocked
        );
        assert_eq!(p.outstanding(), k + 1);
    }
}

#[test]
fn zero_asynchronicity_blocks_until_drained_and_consumed() {
    let mut pool = pool();
    let (mut dev, _ctl) = DeferredReadbackDevice::new();
    let mut p = AsyncReadbackPipeline::new(ViewId(0), 0, 0).unwrap();

    let i = begin(&mut p, 1, &mut pool);
    assert_eq!(
        p.begin_frame(ticket(2, 4, 4), &mut pool).unwrap(),
        BeginFrame::Blocked
    );
    p.submit_transfer(i, output(4, 4, 7), true, &mut dev).unwrap();
    assert_eq!(
        p.begin_frame(ticket(2, 4, 4), &mut pool).unwrap(),
        BeginFrame::Blocked
    );

    p.drain(i, DrainMode::Blocking).unwrap();
    assert_eq!(p.slot(i).unwrap().state(), SlotState::Ready);
    assert_eq!(consume(&mut p, &mut pool), (1, Ok(7)));
    assert_eq!(begin(&mut p, 2, &mut pool), 0);
}

#[test]
fn consumption_is_fifo_even_when_transfers_finish_out_of_order() {
    let mut pool = pool();
    let (mut dev, ctl) = DeferredReadbackDevice::new();
    let mut p = AsyncReadbackPipeline::new(ViewId(0), 0, 2).unwrap();
    for (seq, shade) in [(1, 10), (2, 20), (3, 30)] {
        let i = begin(&mut p, seq, &mut pool);
        p.submit_transfer(i, output(4, 4, shade), true, &mut dev).unwrap();
    }

    ctl.complete(2);
    ctl.complete(1);
    assert_eq!(p.ready_prefix(), 0);
    assert_eq!(p.outstanding_seqs(), vec![FrameSeq(1), FrameSeq(2), FrameSeq(3)]);

    ctl.complete(0);
    assert_eq!(p.ready_prefix(), 3);
    assert_eq!(consume(&mut p, &mut pool), (1, Ok(10)));
    assert_eq!(consume(&mut p, &mut pool), (2, Ok(20)));
    assert_eq!(consume(&mut p, &mut pool), (3, Ok(30)));
    assert_eq!(p.outstanding(), 0);
}

#[test]
fn take_front_requires_ready() {
    let mut pool = pool();
    let (mut dev, _ctl) = DeferredReadbackDevice::new();
    let mut p = AsyncReadbackPipeline::new(ViewId(0), 0, 1).unwrap();
    assert!(p.take_front_for_composite().unwrap().is_none());
    let i = begin(&mut p, 1, &mut pool);
    p.submit_transfer(i, output(4, 4, 1), true, &mut dev).unwrap();
    assert!(p.take_front_for_composite().is_err());
}

#[test]
fn failed_transfer_frees_the_slot_and_reallocates_buffers() {
    let mut pool = pool();
    let (mut dev, ctl) = DeferredReadbackDevice::new();
    let mut p = AsyncReadbackPipeline::new(ViewId(0), 0, 0).unwrap();

    let i = begin(&mut p, 1, &mut pool);
    p.submit_transfer(i, output(4, 4, 1), true, &mut dev).unwrap();
    ctl.fail(0, "device lost");
    assert!(p.poll_ready(i));
    let (seq, res) = consume(&mut p, &mut pool);
    assert_eq!(seq, 1);
    assert!(res.unwrap_err().contains("device lost"));
    assert_eq!(pool.stats().live_bytes, 0);

    let i = begin(&mut p, 2, &mut pool);
    assert_eq!(pool.stats().allocations, 2);
    p.submit_transfer(i, output(4, 4, 2), true, &mut dev).unwrap();
    p.drain(i, DrainMode::Blocking).unwrap();
    assert_eq!(consume(&mut p, &mut pool), (2, Ok(2)));
}

#[test]
fn mismatched_output_is_a_state_mismatch() {
    let mut pool = pool();
    let (mut dev, _ctl) = DeferredReadbackDevice::new();
    let mut p = AsyncReadbackPipeline::new(ViewId(0), 0, 0).unwrap();

    let i = begin(&mut p, 1, &mut pool);
    let err = p
        .submit_transfer(i, output(8, 4, 1), true, &mut dev)
        .unwrap_err();
    assert!(matches!(err, PipelineError::StateMismatch(_)));
    assert_eq!(p.slot(i).unwrap().state(), SlotState::Ready);
    let (_, res) = consume(&mut p, &mut pool);
    assert!(res.is_err());
    // buffers stayed with the slot
    assert_eq!(pool.stats().live_bytes, Contribution::byte_len(4, 4));
}

#[test]
fn bounded_drain_times_out_as_transfer_error() {
    let mut pool = pool();
    let (mut dev, _ctl) = DeferredReadbackDevice::new();
    let mut p = AsyncReadbackPipeline::new(ViewId(0), 0, 0).unwrap();
    let i = begin(&mut p, 1, &mut pool);
    p.submit_transfer(i, output(4, 4, 1), true, &mut dev).unwrap();

    let err = p
        .drain(i, DrainMode::Bounded(Duration::from_millis(5)))
        .unwrap_err();
    assert!(matches!(err, PipelineError::Transfer(_)));
    assert!(p.poll_ready(i));
}

#[test]
fn sparse_readback_limits_the_valid_rect() {
    let mut pool = pool();
    let (mut dev, _ctl) = DeferredReadbackDevice::new();
    let mut p = AsyncReadbackPipeline::new(ViewId(0), 0, 0).unwrap();

    let i = begin(&mut p, 1, &mut pool);
    let mut out = output(4, 4, 3);
    out.viewport = PixelRect::new(0, 0, 2, 2);
    p.submit_transfer(i, out.clone(), true, &mut dev).unwrap();
    p.drain(i, DrainMode::Blocking).unwrap();
    let taken = p.take_front_for_composite().unwrap().unwrap();
    let c = taken.contribution.unwrap();
    assert_eq!(c.valid, PixelRect::new(0, 0, 2, 2));
    p.release(taken.slot, Some(c), &mut pool).unwrap();

    let i = begin(&mut p, 2, &mut pool);
    p.submit_transfer(i, out, false, &mut dev).unwrap();
    p.drain(i, DrainMode::Blocking).unwrap();
    let taken = p.take_front_for_composite().unwrap().unwrap();
    assert_eq!(taken.contribution.unwrap().valid, PixelRect::full(4, 4));
}

#[test]
fn teardown_resets_ring_and_returns_buffers() {
    let mut pool = pool();
    let (mut dev, _ctl) = DeferredReadbackDevice::new();
    let mut p = AsyncReadbackPipeline::new(ViewId(0), 0, 1).unwrap();
    let a = begin(&mut p, 1, &mut pool);
    p.submit_transfer(a, output(4, 4, 1), true, &mut dev).unwrap();
    let _b = begin(&mut p, 2, &mut pool);

    p.teardown(&mut pool);
    assert_eq!(p.outstanding(), 0);
    assert!(p.slot_states().iter().all(|s| *s == SlotState::Free));
    assert_eq!(pool.stats().live_bytes, 0);

    // resized frames get fresh buffers starting at slot 0
    let i = match p.begin_frame(ticket(3, 8, 2), &mut pool).unwrap() {
        BeginFrame::Slot(i) => i,
        BeginFrame::Blocked => panic!("blocked after teardown"),
    };
    assert_eq!(i, 0);
    assert_eq!(pool.stats().live_bytes, Contribution::byte_len(8, 2));
}
