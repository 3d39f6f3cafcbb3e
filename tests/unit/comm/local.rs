use super::*;
use crate::comm::transport::Channel;

const SHORT: Duration = Duration::from_millis(200);

#[test]
fn out_of_order_tags_are_stashed_and_matched_later() {
    let mut comms = LocalCluster::new(2);
    let mut b = comms.pop().unwrap();
    let mut a = comms.pop().unwrap();

    a.send(1, Tag::new(Channel::Sync, 2), vec![2]).unwrap();
    a.send(1, Tag::new(Channel::Composite, 7), vec![7]).unwrap();

    assert_eq!(
        b.recv(0, Tag::new(Channel::Composite, 7), SHORT).unwrap(),
        vec![7]
    );
    assert_eq!(b.recv(0, Tag::new(Channel::Sync, 2), SHORT).unwrap(), vec![2]);
}

#[test]
fn stale_rounds_are_discarded() {
    let mut comms = LocalCluster::new(2);
    let mut b = comms.pop().unwrap();
    let mut a = comms.pop().unwrap();

    a.send(1, Tag::new(Channel::Sync, 1), vec![1]).unwrap();
    a.send(1, Tag::new(Channel::Sync, 3), vec![3]).unwrap();

    assert_eq!(b.recv(0, Tag::new(Channel::Sync, 3), SHORT).unwrap(), vec![3]);
    assert!(b.recv(0, Tag::new(Channel::Sync, 1), SHORT).is_err());
}

#[test]
fn abort_fails_matching_receive() {
    let mut comms = LocalCluster::new(2);
    let mut b = comms.pop().unwrap();
    let mut a = comms.pop().unwrap();

    let tag = Tag::new(Channel::Sync, 4).reply();
    a.abort(1, tag, "gather timed out").unwrap();
    let err = b.recv(0, tag, SHORT).unwrap_err();
    assert!(err.to_string().contains("gather timed out"));
    assert!(err.is_frame_local());
}

#[test]
fn receive_times_out() {
    let mut comms = LocalCluster::new(2);
    let mut b = comms.pop().unwrap();
    let _a = comms.pop().unwrap();

    let err = b
        .recv(0, Tag::new(Channel::Ready, 0), Duration::from_millis(20))
        .unwrap_err();
    assert!(err.to_string().contains("timed out"));
}

#[test]
fn dropped_peer_reports_disconnect() {
    let mut comms = LocalCluster::new(2);
    let b = comms.pop().unwrap();
    let mut a = comms.pop().unwrap();
    drop(b);

    let err = a.send(1, Tag::new(Channel::Sync, 0), vec![]).unwrap_err();
    assert!(err.to_string().contains("disconnected"));
}

#[test]
fn run_returns_results_in_rank_order() {
    let out = LocalCluster::run(3, |comm| comm.rank() * 10 + comm.size());
    assert_eq!(out, vec![3, 13, 23]);
}

#[test]
fn solo_comm_loops_back() {
    let mut c = SoloComm::new();
    let tag = Tag::new(Channel::Context, 0);
    c.send(0, tag, vec![9]).unwrap();
    assert_eq!(c.recv(0, tag, SHORT).unwrap(), vec![9]);
    assert!(c.recv(0, tag, SHORT).is_err());
    assert!(c.send(1, tag, vec![]).is_err());
}
