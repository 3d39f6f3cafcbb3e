use super::*;
use crate::comm::{Channel, LocalCluster, LocalComm, SoloComm, Tag};
use crate::foundation::core::{DVec3, FrameSeq, ViewId};
use crate::view::ViewParams;

const TIMEOUT: Duration = Duration::from_secs(5);

fn unit_box(offset: f64) -> Aabb {
    Aabb::new(DVec3::splat(offset), DVec3::splat(offset + 1.0))
}

#[test]
fn solo_first_round_renders_and_later_identical_rounds_skip() {
    let mut comm = SoloComm::new();
    let mut reg = ViewRegistry::new();
    reg.set_view_count(1).unwrap();
    let mut sync = CrossRankSynchronizer::new(0, TIMEOUT, false);

    let first = sync.synchronize(&mut comm, &mut reg, 1).unwrap();
    assert!(first.render);
    assert_eq!(first.state.seq, FrameSeq(1));
    assert_eq!(first.change.added, vec![ViewId(0)]);

    let second = sync.synchronize(&mut comm, &mut reg, 1).unwrap();
    assert!(!second.render);
    assert_eq!(second.state.seq, FrameSeq(1));

    sync.set_modified(true);
    let third = sync.synchronize(&mut comm, &mut reg, 1).unwrap();
    assert!(third.render);
    assert_eq!(third.state.seq, FrameSeq(2));
}

#[test]
fn continuous_rendering_always_renders() {
    let mut comm = SoloComm::new();
    let mut reg = ViewRegistry::new();
    let mut sync = CrossRankSynchronizer::new(0, TIMEOUT, true);
    for i in 1..=3 {
        let out = sync.synchronize(&mut comm, &mut reg, 1).unwrap();
        assert!(out.render);
        assert_eq!(out.state.seq, FrameSeq(i));
    }
}

#[test]
fn ranks_agree_on_bounds_timesteps_and_views() {
    let out = LocalCluster::run(3, |mut comm| {
        let rank = comm.rank();
        let mut reg = ViewRegistry::new();
        let mut sync = CrossRankSynchronizer::new(0, TIMEOUT, false);
        if rank == 0 {
            reg.set_view_count(1).unwrap();
            reg.update_view(
                ViewId(0),
                ViewParams {
                    width: 40,
                    height: 30,
                    ..ViewParams::default()
                },
            )
            .unwrap();
            sync.request_timestep(7);
        }
        sync.set_local_bounds(unit_box(rank as f64 * 2.0));
        let out = sync
            .synchronize(&mut comm, &mut reg, 3 + rank as u32)
            .unwrap();
        (out.state, reg.views().to_vec())
    });

    let (state0, views0) = &out[0];
    assert_eq!(state0.num_timesteps, 5);
    // requested 7 is clamped to the last timestep
    assert_eq!(state0.timestep, 4);
    // union box spans [0, 5]^3
    assert_eq!(state0.bounds.center, DVec3::splat(2.5));
    assert!((state0.bounds.radius - (75.0f64).sqrt() / 2.0).abs() < 1e-9);
    assert_eq!(views0.len(), 1);
    assert_eq!((views0[0].width, views0[0].height), (40, 30));
    for (state, views) in &out[1..] {
        assert_eq!(state, state0);
        assert_eq!(views, views0);
    }
}

#[test]
fn empty_bounds_everywhere_give_negative_radius() {
    let out = LocalCluster::run(2, |mut comm| {
        let mut reg = ViewRegistry::new();
        let mut sync = CrossRankSynchronizer::new(1, TIMEOUT, false);
        sync.synchronize(&mut comm, &mut reg, 1).unwrap().state
    });
    assert!(out.iter().all(|s| s.bounds.radius == -1.0));
}

#[test]
fn failed_round_commits_nothing_on_any_rank() {
    let out = LocalCluster::run(3, |mut comm| {
        let rank = comm.rank();
        let mut reg = ViewRegistry::new();
        let mut sync = CrossRankSynchronizer::new(0, Duration::from_millis(150), false);
        if rank == 0 {
            reg.set_view_count(2).unwrap();
        }
        if rank == 2 {
            // rank 2 skips this round entirely; the others must abandon it
            return (true, 0usize, reg.view_count());
        }
        let res = sync.synchronize(&mut comm, &mut reg, 1);
        (res.is_err(), sync.state().seq.0 as usize, reg.view_count())
    });
    for (failed, seq, views) in out {
        assert!(failed);
        assert_eq!(seq, 0);
        assert_eq!(views, 0);
    }
}

#[test]
fn staged_views_survive_an_abandoned_round() {
    let out = LocalCluster::run(2, |mut comm| {
        let rank = comm.rank();
        let mut reg = ViewRegistry::new();
        // rank 1 waits long enough to see rank 0's second attempt
        let timeout = Duration::from_millis(if rank == 0 { 150 } else { 5_000 });
        let mut sync = CrossRankSynchronizer::new(0, timeout, false);
        if rank == 0 {
            reg.set_view_count(1).unwrap();
            let first = sync.synchronize(&mut comm, &mut reg, 1);
            assert!(first.is_err());
        } else {
            // burn one round without participating
            sync.round += 1;
        }
        sync.synchronize(&mut comm, &mut reg, 1).unwrap();
        reg.view_count()
    });
    assert_eq!(out, vec![1, 1]);
}

/// Swallows the first frame proposal sent to `victim`.
struct LoseProposal {
    inner: LocalComm,
    victim: Rank,
    lost: bool,
}

impl Communicator for LoseProposal {
    fn rank(&self) -> Rank {
        self.inner.rank()
    }

    fn size(&self) -> usize {
        self.inner.size()
    }

    fn send(&mut self, dst: Rank, tag: Tag, payload: Vec<u8>) -> PipelineResult<()> {
        let proposal = tag.channel == Channel::Sync && tag.reply && tag.sub == 0;
        if proposal && dst == self.victim && !self.lost {
            self.lost = true;
            return Ok(());
        }
        self.inner.send(dst, tag, payload)
    }

    fn recv(&mut self, src: Rank, tag: Tag, timeout: Duration) -> PipelineResult<Vec<u8>> {
        self.inner.recv(src, tag, timeout)
    }

    fn abort(&mut self, dst: Rank, tag: Tag, reason: &str) -> PipelineResult<()> {
        self.inner.abort(dst, tag, reason)
    }
}

#[test]
fn a_lost_proposal_is_abandoned_by_every_rank() {
    let out = LocalCluster::run(3, |comm| {
        let mut comm = LoseProposal {
            inner: comm,
            victim: 2,
            lost: false,
        };
        let mut reg = ViewRegistry::new();
        let mut sync = CrossRankSynchronizer::new(0, Duration::from_millis(200), true);
        if comm.rank() == 0 {
            reg.set_view_count(1).unwrap();
        }
        let first = sync.synchronize(&mut comm, &mut reg, 1);
        let after_first = (first.is_err(), sync.state().seq, reg.view_count());
        let second = sync.synchronize(&mut comm, &mut reg, 1).unwrap();
        (after_first, second.state.seq, reg.view_count())
    });
    for (after_first, seq, views) in out {
        assert_eq!(after_first, (true, FrameSeq(0), 0));
        assert_eq!(seq, FrameSeq(1));
        assert_eq!(views, 1);
    }
}

#[test]
fn an_abandoned_proposal_does_not_hide_the_next_change() {
    let out = LocalCluster::run(2, |comm| {
        let mut comm = LoseProposal {
            inner: comm,
            victim: 1,
            lost: false,
        };
        let mut reg = ViewRegistry::new();
        let mut sync = CrossRankSynchronizer::new(0, Duration::from_millis(200), false);
        if comm.rank() == 0 {
            reg.set_view_count(1).unwrap();
        }
        assert!(sync.synchronize(&mut comm, &mut reg, 1).is_err());
        // same staged state as the abandoned round, so it must still render
        sync.synchronize(&mut comm, &mut reg, 1).unwrap().render
    });
    assert_eq!(out, vec![true, true]);
}
