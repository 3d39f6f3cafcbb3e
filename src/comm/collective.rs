use crate::comm::transport::{Communicator, Tag};
use crate::foundation::core::Rank;
use crate::foundation::error::{PipelineError, PipelineResult};
use serde::Serialize;
use serde::de::DeserializeOwned;
use std::time::Duration;

/// Typed collectives over a [`Communicator`], rooted at one rank.
///
/// Every rank must call the same sequence of collectives with the same tags. Two-phase
/// collectives use `tag` for the gather half and `tag.reply()` for the broadcast half. When the
/// root fails to gather, it aborts the reply on every other rank so that all ranks fail together.
pub struct Collective<'a> {
    comm: &'a mut dyn Communicator,
    root: Rank,
    timeout: Duration,
}

fn encode<T: Serialize>(value: &T) -> PipelineResult<Vec<u8>> {
    Ok(serde_json::to_vec(value)?)
}

fn decode<T: DeserializeOwned>(bytes: &[u8]) -> PipelineResult<T> {
    Ok(serde_json::from_slice(bytes)?)
}

impl<'a> Collective<'a> {
    /// Collectives rooted at `root`, each receive bounded by `timeout`.
    pub fn new(
        comm: &'a mut dyn Communicator,
        root: Rank,
        timeout: Duration,
    ) -> PipelineResult<Self> {
        if root >= comm.size() {
            return Err(PipelineError::validation(format!(
                "root rank {root} is out of range for {} ranks",
                comm.size()
            )));
        }
        Ok(Self {
            comm,
            root,
            timeout,
        })
    }

    /// This rank.
    pub fn rank(&self) -> Rank {
        self.comm.rank()
    }

    /// Number of ranks.
    pub fn size(&self) -> usize {
        self.comm.size()
    }

    /// `true` on the root rank.
    pub fn is_root(&self) -> bool {
        self.comm.rank() == self.root
    }

    /// Send an abort for `tag` to every non-root rank. Delivery failures are ignored.
    pub fn abort_peers(&mut self, tag: Tag, reason: &str) {
        for dst in 0..self.comm.size() {
            if dst != self.comm.rank()
                && let Err(e) = self.comm.abort(dst, tag, reason)
            {
                tracing::debug!(dst, error = %e, "abort not delivered");
            }
        }
    }

    /// Root sends `value` to every rank; every rank returns the root's value.
    ///
    /// On the root a failed send is reported after all peers were attempted.
    pub fn broadcast<T>(&mut self, tag: Tag, value: Option<&T>) -> PipelineResult<T>
    where
        T: Serialize + DeserializeOwned + Clone,
    {
        if self.is_root() {
            let value = value.ok_or_else(|| {
                PipelineError::validation("broadcast root must provide a value")
            })?;
            let bytes = encode(value)?;
            let mut first_err = None;
            for dst in 0..self.comm.size() {
                if dst == self.root {
                    continue;
                }
                if let Err(e) = self.comm.send(dst, tag, bytes.clone()) {
                    first_err.get_or_insert(e);
                }
            }
            return match first_err {
                Some(e) => Err(e),
                None => Ok(value.clone()),
            };
        }
        let bytes = self.comm.recv(self.root, tag, self.timeout)?;
        decode(&bytes)
    }

    /// Every rank sends `value` to the root. The root returns all values in rank order.
    ///
    /// On failure the root aborts `tag.reply()` on all peers before returning the error.
    pub fn gather<T>(&mut self, tag: Tag, value: &T) -> PipelineResult<Option<Vec<T>>>
    where
        T: Serialize + DeserializeOwned + Clone,
    {
        if !self.is_root() {
            self.comm.send(self.root, tag, encode(value)?)?;
            return Ok(None);
        }
        let mut out = Vec::with_capacity(self.comm.size());
        for src in 0..self.comm.size() {
            if src == self.root {
                out.push(value.clone());
                continue;
            }
            let got = self
                .comm
                .recv(src, tag, self.timeout)
                .and_then(|bytes| decode::<T>(&bytes));
            match got {
                Ok(v) => out.push(v),
                Err(e) => {
                    self.abort_peers(tag.reply(), &e.to_string());
                    return Err(e);
                }
            }
        }
        Ok(Some(out))
    }

    /// Fold all ranks' values with `op` in rank order; every rank returns the result.
    pub fn all_reduce<T, F>(&mut self, tag: Tag, value: T, op: F) -> PipelineResult<T>
    where
        T: Serialize + DeserializeOwned + Clone,
        F: Fn(T, T) -> T,
    {
        let reduced = match self.gather(tag, &value)? {
            Some(all) => all.into_iter().reduce(op),
            None => None,
        };
        self.broadcast(tag.reply(), reduced.as_ref())
    }

    /// Every rank returns every rank's value in rank order.
    pub fn all_gather<T>(&mut self, tag: Tag, value: &T) -> PipelineResult<Vec<T>>
    where
        T: Serialize + DeserializeOwned + Clone,
    {
        let all = self.gather(tag, value)?;
        self.broadcast(tag.reply(), all.as_ref())
    }
}
