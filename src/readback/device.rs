use crate::composite::Contribution;
use crate::foundation::core::PixelRect;
use crate::foundation::error::{PipelineError, PipelineResult};
use crate::renderer::RenderOutput;
use std::collections::HashMap;
use std::sync::mpsc::{self, Receiver, RecvTimeoutError, TryRecvError};
use std::sync::{Arc, Mutex};
use std::time::Duration;

/// Result of querying a completion handle.
#[derive(Debug)]
pub enum FenceStatus {
    /// Transfer still in flight.
    Pending,
    /// Transfer finished; the filled buffers are handed back.
    Complete(Contribution),
    /// Transfer failed; the buffers are lost.
    Failed(String),
}

/// Fence for one submitted transfer.
///
/// After `Complete` or `Failed` has been returned once, later queries report `Failed`.
pub trait CompletionHandle: Send {
    /// Non-blocking query.
    fn poll(&mut self) -> FenceStatus;

    /// Wait for completion, at most `timeout` when given.
    fn wait(&mut self, timeout: Option<Duration>) -> FenceStatus;
}

/// One transfer request: copy `region` of `output` into `target`.
#[derive(Debug)]
pub struct TransferJob {
    /// Rendered framebuffer.
    pub output: RenderOutput,
    /// Rectangle to copy; becomes the contribution's valid rectangle.
    pub region: PixelRect,
    /// Slot buffers, moved in and handed back through the fence.
    pub target: Contribution,
}

/// Asynchronous copy engine from a renderer's framebuffer to slot buffers.
pub trait ReadbackDevice: Send {
    /// Start a transfer. Never blocks.
    fn submit(&mut self, job: TransferJob) -> Box<dyn CompletionHandle>;
}

/// Copy the rows of `job.region` and stamp the valid rectangle.
pub fn copy_region(job: TransferJob) -> PipelineResult<Contribution> {
    let TransferJob {
        output,
        region,
        mut target,
    } = job;
    output.check_buffers()?;
    if !target.fits(output.width, output.height) {
        return Err(PipelineError::state_mismatch(format!(
            "slot buffers are {}x{}, framebuffer is {}x{}",
            target.width, target.height, output.width, output.height
        )));
    }
    if !PixelRect::full(output.width, output.height).contains_rect(region) {
        return Err(PipelineError::state_mismatch(format!(
            "readback region {region:?} exceeds {}x{}",
            output.width, output.height
        )));
    }

    let stride = output.width;
    let w = region.width as usize;
    for y in region.y..region.bottom() {
        let i = PixelRect::pixel_index(stride, region.x, y);
        target.color[i * 4..(i + w) * 4].copy_from_slice(&output.color[i * 4..(i + w) * 4]);
        target.depth[i..i + w].copy_from_slice(&output.depth[i..i + w]);
    }
    target.valid = region;
    Ok(target)
}

fn build_thread_pool(threads: Option<usize>) -> PipelineResult<rayon::ThreadPool> {
    if let Some(n) = threads
        && n == 0
    {
        return Err(PipelineError::validation(
            "readback 'threads' must be >= 1 when set",
        ));
    }
    let mut builder = rayon::ThreadPoolBuilder::new().thread_name(|i| format!("readback-{i}"));
    if let Some(n) = threads {
        builder = builder.num_threads(n);
    }
    builder
        .build()
        .map_err(|e| PipelineError::validation(format!("failed to build readback pool: {e}")))
}

/// Copies on a dedicated `rayon` pool; the fence is a one-shot channel.
pub struct CpuReadbackDevice {
    pool: Arc<rayon::ThreadPool>,
}

impl std::fmt::Debug for CpuReadbackDevice {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("CpuReadbackDevice")
            .field("threads", &self.pool.current_num_threads())
            .finish()
    }
}

impl CpuReadbackDevice {
    /// Device with `threads` copy workers (rayon default when `None`).
    pub fn new(threads: Option<usize>) -> PipelineResult<Self> {
        Ok(Self {
            pool: Arc::new(build_thread_pool(threads)?),
        })
    }
}

struct ChannelFence {
    rx: Option<Receiver<PipelineResult<Contribution>>>,
}

impl ChannelFence {
    fn settle(&mut self, got: PipelineResult<Contribution>) -> FenceStatus {
        self.rx = None;
        match got {
            Ok(c) => FenceStatus::Complete(c),
            Err(e) => FenceStatus::Failed(e.to_string()),
        }
    }
}

impl CompletionHandle for ChannelFence {
    fn poll(&mut self) -> FenceStatus {
        let Some(rx) = self.rx.as_ref() else {
            return FenceStatus::Failed("fence already consumed".to_owned());
        };
        match rx.try_recv() {
            Ok(got) => self.settle(got),
            Err(TryRecvError::Empty) => FenceStatus::Pending,
            Err(TryRecvError::Disconnected) => {
                self.rx = None;
                FenceStatus::Failed("copy worker vanished".to_owned())
            }
        }
    }

    fn wait(&mut self, timeout: Option<Duration>) -> FenceStatus {
        let Some(rx) = self.rx.as_ref() else {
            return FenceStatus::Failed("fence already consumed".to_owned());
        };
        let got = match timeout {
            None => rx.recv().map_err(|_| RecvTimeoutError::Disconnected),
            Some(t) => rx.recv_timeout(t),
        };
        match got {
            Ok(got) => self.settle(got),
            Err(RecvTimeoutError::Timeout) => FenceStatus::Pending,
            Err(RecvTimeoutError::Disconnected) => {
                self.rx = None;
                FenceStatus::Failed("copy worker vanished".to_owned())
            }
        }
    }
}

impl ReadbackDevice for CpuReadbackDevice {
    fn submit(&mut self, job: TransferJob) -> Box<dyn CompletionHandle> {
        let (tx, rx) = mpsc::sync_channel(1);
        self.pool.spawn(move || {
            // receiver may be gone after a bounded drain gave up
            let _ = tx.send(copy_region(job));
        });
        Box::new(ChannelFence { rx: Some(rx) })
    }
}

/// Identifier of a transfer held by a [`DeferredReadbackDevice`].
pub type TransferId = u64;

#[derive(Default)]
struct DeferredShared {
    next_id: TransferId,
    pending: HashMap<TransferId, TransferJob>,
    settled: HashMap<TransferId, PipelineResult<Contribution>>,
}

/// Device whose transfers complete only when told to.
///
/// Lets tests complete transfers in any order, fail them, or leave them pending.
pub struct DeferredReadbackDevice {
    shared: Arc<Mutex<DeferredShared>>,
}

/// Remote control for a [`DeferredReadbackDevice`].
#[derive(Clone)]
pub struct DeferredController {
    shared: Arc<Mutex<DeferredShared>>,
}

impl std::fmt::Debug for DeferredController {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("DeferredController")
            .field("pending", &self.pending_ids())
            .finish()
    }
}

impl DeferredReadbackDevice {
    /// New device plus its controller.
    pub fn new() -> (Self, DeferredController) {
        let shared = Arc::new(Mutex::new(DeferredShared::default()));
        (
            Self {
                shared: shared.clone(),
            },
            DeferredController { shared },
        )
    }
}

fn lock(shared: &Mutex<DeferredShared>) -> std::sync::MutexGuard<'_, DeferredShared> {
    shared.lock().unwrap_or_else(|poisoned| poisoned.into_inner())
}

impl DeferredController {
    /// Ids of submitted transfers that were neither completed nor failed, oldest first.
    pub fn pending_ids(&self) -> Vec<TransferId> {
        let mut ids: Vec<_> = lock(&self.shared).pending.keys().copied().collect();
        ids.sort_unstable();
        ids
    }

    /// Perform transfer `id` now. Returns `false` for unknown ids.
    pub fn complete(&self, id: TransferId) -> bool {
        let mut s = lock(&self.shared);
        let Some(job) = s.pending.remove(&id) else {
            return false;
        };
        s.settled.insert(id, copy_region(job));
        true
    }

    /// Perform every pending transfer.
    pub fn complete_all(&self) {
        for id in self.pending_ids() {
            self.complete(id);
        }
    }

    /// Fail transfer `id`, losing its buffers. Returns `false` for unknown ids.
    pub fn fail(&self, id: TransferId, reason: &str) -> bool {
        let mut s = lock(&self.shared);
        if s.pending.remove(&id).is_none() {
            return false;
        }
        s.settled
            .insert(id, Err(PipelineError::transfer(reason.to_owned())));
        true
    }
}

struct DeferredFence {
    id: TransferId,
    shared: Arc<Mutex<DeferredShared>>,
    done: bool,
}

impl CompletionHandle for DeferredFence {
    fn poll(&mut self) -> FenceStatus {
        if self.done {
            return FenceStatus::Failed("fence already consumed".to_owned());
        }
        let got = lock(&self.shared).settled.remove(&self.id);
        match got {
            None => FenceStatus::Pending,
            Some(Ok(c)) => {
                self.done = true;
                FenceStatus::Complete(c)
            }
            Some(Err(e)) => {
                self.done = true;
                FenceStatus::Failed(e.to_string())
            }
        }
    }

    fn wait(&mut self, timeout: Option<Duration>) -> FenceStatus {
        let status = self.poll();
        if !matches!(status, FenceStatus::Pending) {
            return status;
        }
        match timeout {
            // an unbounded drain performs the copy in place
            None => {
                let job = lock(&self.shared).pending.remove(&self.id);
                self.done = true;
                match job.map(copy_region) {
                    Some(Ok(c)) => FenceStatus::Complete(c),
                    Some(Err(e)) => FenceStatus::Failed(e.to_string()),
                    None => FenceStatus::Failed("transfer vanished".to_owned()),
                }
            }
            Some(t) => {
                std::thread::sleep(t);
                self.poll()
            }
        }
    }
}

impl ReadbackDevice for DeferredReadbackDevice {
    fn submit(&mut self, job: TransferJob) -> Box<dyn CompletionHandle> {
        let mut s = lock(&self.shared);
        let id = s.next_id;
        s.next_id += 1;
        s.pending.insert(id, job);
        Box::new(DeferredFence {
            id,
            shared: self.shared.clone(),
            done: false,
        })
    }
}

#[cfg(test)]
#[path = "../../tests/unit/readback/device.rs"]
mod tests;
