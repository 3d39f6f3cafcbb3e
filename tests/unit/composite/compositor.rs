use super::*;
use crate::comm::{LocalCluster, SoloComm};
use crate::composite::context::TilePolicy;
use crate::foundation::core::{MAX_DEPTH, ViewId};

const TIMEOUT: Duration = Duration::from_secs(5);
const BG: Rgba8 = [0, 0, 0, 255];

/// Rank `r` covers column band `r` at depth `0.5 - r/10`, so higher ranks are nearer.
fn band(rank: usize, ranks: usize, w: u32, h: u32) -> Contribution {
    let mut c = Contribution::new(rank, w, h).unwrap();
    let bw = w / ranks as u32;
    c.valid = PixelRect::new(0, 0, bw * (rank as u32 + 1), h);
    c.depth.fill(0.5 - rank as f32 / 10.0);
    for px in c.color.chunks_mut(4) {
        px.copy_from_slice(&[rank as u8 * 40, 0, 0, 255]);
    }
    c
}

fn run(
    ranks: usize,
    strategy: CompositeStrategy,
    policy: TilePolicy,
    drop_rank: Option<usize>,
) -> Vec<CompositeOutcome> {
    let (w, h) = (8, 6);
    LocalCluster::run(ranks, |mut comm| {
        let rank = comm.rank();
        let mut ctx = CompositeContext::new(ViewId(0));
        ctx.ensure(&mut comm, policy, 0, w, h, TIMEOUT).unwrap();
        let c = band(rank, ranks, w, h);
        let local = if drop_rank == Some(rank) {
            Err("render failed".to_owned())
        } else {
            Ok(&c)
        };
        SortLastCompositor::new(strategy, BG, TIMEOUT)
            .composite(&mut comm, &mut ctx, FrameSeq(1), local)
            .unwrap()
    })
}

fn delivered(out: &CompositeOutcome) -> &CompositedTile {
    match out {
        CompositeOutcome::Delivered(t) => t,
        other => panic!("expected pixels, got {other:?}"),
    }
}

#[test]
fn nearest_rank_wins_each_pixel() {
    let out = run(3, CompositeStrategy::Sequential, TilePolicy::Authority, None);
    let tile = delivered(&out[0]);
    assert_eq!(tile.rect, PixelRect::full(8, 6));
    // columns 0..2 are covered by every rank, the nearest is rank 2
    assert_eq!(&tile.color[0..4], &[80, 0, 0, 255]);
    assert_eq!(tile.depth[0], 0.3);
    // columns 6..8 are covered by nobody
    assert_eq!(&tile.color[7 * 4..8 * 4], &BG);
    assert_eq!(tile.depth[7], MAX_DEPTH);
    assert_eq!(out[1], CompositeOutcome::NotOwner);
    assert_eq!(out[2], CompositeOutcome::NotOwner);
}

#[test]
fn strategies_agree_for_any_rank_count() {
    for ranks in 1..=5 {
        for policy in [TilePolicy::Authority, TilePolicy::Bands] {
            let seq = run(ranks, CompositeStrategy::Sequential, policy, None);
            let tree = run(ranks, CompositeStrategy::BinaryTree, policy, None);
            assert_eq!(seq, tree, "{ranks} ranks, {policy:?}");
        }
    }
}

#[test]
fn bands_deliver_disjoint_tiles_that_stitch_to_the_full_image() {
    let whole = run(3, CompositeStrategy::Sequential, TilePolicy::Authority, None);
    let whole = delivered(&whole[0]);
    let banded = run(3, CompositeStrategy::BinaryTree, TilePolicy::Bands, None);

    let mut stitched = vec![0u8; whole.color.len()];
    for out in &banded {
        let t = delivered(out);
        let start = PixelRect::pixel_index(8, 0, t.rect.y) * 4;
        stitched[start..start + t.color.len()].copy_from_slice(&t.color);
    }
    assert_eq!(stitched, whole.color);
}

#[test]
fn one_missing_contribution_drops_the_frame_everywhere() {
    for strategy in [CompositeStrategy::Sequential, CompositeStrategy::BinaryTree] {
        let out = run(4, strategy, TilePolicy::Bands, Some(3));
        for o in &out {
            assert!(matches!(o, CompositeOutcome::Dropped(_)), "{strategy:?}: {o:?}");
        }
    }
}

#[test]
fn mismatched_contribution_invalidates_the_context() {
    let mut comm = SoloComm::new();
    let mut ctx = CompositeContext::new(ViewId(0));
    ctx.ensure(&mut comm, TilePolicy::Authority, 0, 4, 4, TIMEOUT)
        .unwrap();
    let wrong = Contribution::new(0, 5, 4).unwrap();
    let out = SortLastCompositor::new(CompositeStrategy::Sequential, BG, TIMEOUT)
        .composite(&mut comm, &mut ctx, FrameSeq(1), Ok(&wrong))
        .unwrap();
    assert!(matches!(out, CompositeOutcome::Dropped(_)));
    assert!(!ctx.is_valid());
}

#[test]
fn single_rank_composite_is_the_contribution_itself() {
    let mut comm = SoloComm::new();
    let mut ctx = CompositeContext::new(ViewId(2));
    ctx.ensure(&mut comm, TilePolicy::Authority, 0, 8, 6, TIMEOUT)
        .unwrap();
    let mut c = band(0, 1, 8, 6);
    c.valid = PixelRect::full(8, 6);
    let out = SortLastCompositor::new(CompositeStrategy::BinaryTree, BG, TIMEOUT)
        .composite(&mut comm, &mut ctx, FrameSeq(3), Ok(&c))
        .unwrap();
    let tile = delivered(&out);
    assert_eq!(tile.color, c.color);
    assert_eq!(tile.depth, c.depth);
}
