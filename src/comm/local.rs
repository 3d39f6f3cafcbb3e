use crate::comm::transport::{Communicator, Tag};
use crate::foundation::core::Rank;
use crate::foundation::error::{PipelineError, PipelineResult};
use std::collections::VecDeque;
use std::sync::mpsc::{self, Receiver, RecvTimeoutError, Sender};
use std::time::{Duration, Instant};

#[derive(Debug)]
enum Body {
    Data(Vec<u8>),
    Abort(String),
}

#[derive(Debug)]
struct Envelope {
    src: Rank,
    tag: Tag,
    body: Body,
}

/// In-process rank endpoint backed by `std::sync::mpsc`.
///
/// Every endpoint owns one inbox. Envelopes that do not match the current receive are stashed and
/// matched by later receives.
pub struct LocalComm {
    rank: Rank,
    peers: Vec<Option<Sender<Envelope>>>,
    inbox: Receiver<Envelope>,
    stash: VecDeque<Envelope>,
}

impl std::fmt::Debug for LocalComm {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("LocalComm")
            .field("rank", &self.rank)
            .field("size", &self.peers.len())
            .field("stashed", &self.stash.len())
            .finish()
    }
}

impl LocalComm {
    fn take_stashed(&mut self, src: Rank, tag: &Tag) -> Option<Envelope> {
        self.stash.retain(|e| !e.tag.is_stale_for(tag));
        let pos = self
            .stash
            .iter()
            .position(|e| e.src == src && e.tag == *tag)?;
        self.stash.remove(pos)
    }

    fn push(&mut self, dst: Rank, env: Envelope) -> PipelineResult<()> {
        if dst == self.rank {
            self.stash.push_back(env);
            return Ok(());
        }
        let tx = self
            .peers
            .get(dst)
            .and_then(Option::as_ref)
            .ok_or_else(|| PipelineError::validation(format!("rank {dst} is out of range")))?;
        tx.send(env)
            .map_err(|_| PipelineError::comm(format!("rank {dst} disconnected")))
    }
}

fn open(src: Rank, tag: &Tag, env: Envelope) -> PipelineResult<Vec<u8>> {
    match env.body {
        Body::Data(bytes) => Ok(bytes),
        Body::Abort(reason) => Err(PipelineError::comm(format!(
            "rank {src} aborted {:?} round {}: {reason}",
            tag.channel, tag.round
        ))),
    }
}

impl Communicator for LocalComm {
    fn rank(&self) -> Rank {
        self.rank
    }

    fn size(&self) -> usize {
        self.peers.len()
    }

    fn send(&mut self, dst: Rank, tag: Tag, payload: Vec<u8>) -> PipelineResult<()> {
        let env = Envelope {
            src: self.rank,
            tag,
            body: Body::Data(payload),
        };
        self.push(dst, env)
    }

    fn recv(&mut self, src: Rank, tag: Tag, timeout: Duration) -> PipelineResult<Vec<u8>> {
        if src >= self.peers.len() {
            return Err(PipelineError::validation(format!(
                "rank {src} is out of range"
            )));
        }
        if let Some(env) = self.take_stashed(src, &tag) {
            return open(src, &tag, env);
        }
        if src == self.rank {
            return Err(PipelineError::comm(format!(
                "no local message for {:?} round {}",
                tag.channel, tag.round
            )));
        }

        let deadline = Instant::now() + timeout;
        loop {
            let left = deadline.saturating_duration_since(Instant::now());
            let env = match self.inbox.recv_timeout(left) {
                Ok(env) => env,
                Err(RecvTimeoutError::Timeout) => {
                    return Err(PipelineError::comm(format!(
                        "timed out after {timeout:?} waiting for rank {src} ({:?} round {})",
                        tag.channel, tag.round
                    )));
                }
                Err(RecvTimeoutError::Disconnected) => {
                    return Err(PipelineError::comm("all peers disconnected"));
                }
            };
            if env.src == src && env.tag == tag {
                return open(src, &tag, env);
            }
            if !env.tag.is_stale_for(&tag) {
                self.stash.push_back(env);
            }
        }
    }

    fn abort(&mut self, dst: Rank, tag: Tag, reason: &str) -> PipelineResult<()> {
        let env = Envelope {
            src: self.rank,
            tag,
            body: Body::Abort(reason.to_owned()),
        };
        self.push(dst, env)
    }
}

/// Builder for a set of connected in-process ranks.
pub struct LocalCluster;

impl LocalCluster {
    /// `size` connected endpoints, index `i` being rank `i`.
    pub fn new(size: usize) -> Vec<LocalComm> {
        let (senders, inboxes): (Vec<_>, Vec<_>) = (0..size).map(|_| mpsc::channel()).unzip();
        inboxes
            .into_iter()
            .enumerate()
            .map(|(rank, inbox)| LocalComm {
                rank,
                peers: senders
                    .iter()
                    .enumerate()
                    .map(|(i, tx)| (i != rank).then(|| tx.clone()))
                    .collect(),
                inbox,
                stash: VecDeque::new(),
            })
            .collect()
    }

    /// Run `f` on `size` scoped threads, one per rank, and collect the results in rank order.
    ///
    /// A panic on any rank is re-raised on the caller.
    pub fn run<T, F>(size: usize, f: F) -> Vec<T>
    where
        T: Send,
        F: Fn(LocalComm) -> T + Sync,
    {
        let comms = Self::new(size);
        let f = &f;
        std::thread::scope(|scope| {
            let handles: Vec<_> = comms
                .into_iter()
                .map(|comm| scope.spawn(move || f(comm)))
                .collect();
            handles
                .into_iter()
                .map(|h| match h.join() {
                    Ok(v) => v,
                    Err(payload) => std::panic::resume_unwind(payload),
                })
                .collect()
        })
    }
}

/// Communicator for a single rank. Collectives degenerate to local copies.
#[derive(Debug, Default)]
pub struct SoloComm {
    stash: VecDeque<(Tag, Vec<u8>)>,
}

impl SoloComm {
    /// New single-rank communicator.
    pub fn new() -> Self {
        Self::default()
    }
}

impl Communicator for SoloComm {
    fn rank(&self) -> Rank {
        0
    }

    fn size(&self) -> usize {
        1
    }

    fn send(&mut self, dst: Rank, tag: Tag, payload: Vec<u8>) -> PipelineResult<()> {
        if dst != 0 {
            return Err(PipelineError::validation(format!(
                "rank {dst} is out of range"
            )));
        }
        self.stash.push_back((tag, payload));
        Ok(())
    }

    fn recv(&mut self, src: Rank, tag: Tag, _timeout: Duration) -> PipelineResult<Vec<u8>> {
        if src != 0 {
            return Err(PipelineError::validation(format!(
                "rank {src} is out of range"
            )));
        }
        self.stash.retain(|(t, _)| !t.is_stale_for(&tag));
        let pos = self
            .stash
            .iter()
            .position(|(t, _)| *t == tag)
            .ok_or_else(|| {
                PipelineError::comm(format!(
                    "no local message for {:?} round {}",
                    tag.channel, tag.round
                ))
            })?;
        self.stash
            .remove(pos)
            .map(|(_, bytes)| bytes)
            .ok_or_else(|| PipelineError::comm("stash out of sync"))
    }

    fn abort(&mut self, _dst: Rank, _tag: Tag, _reason: &str) -> PipelineResult<()> {
        Ok(())
    }
}

#[cfg(test)]
#[path = "../../tests/unit/comm/local.rs"]
mod tests;
