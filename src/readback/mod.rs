//! Frame slots, readback devices and the per-view asynchronous readback ring.

pub(crate) mod device;
pub(crate) mod pipeline;
pub(crate) mod slot;

pub use device::{
    CompletionHandle, CpuReadbackDevice, DeferredController, DeferredReadbackDevice, FenceStatus,
    ReadbackDevice, TransferId, TransferJob, copy_region,
};
pub use pipeline::{AsyncReadbackPipeline, BeginFrame, DrainMode, MAX_ASYNC_FRAMES, TakenFrame};
pub use slot::{FrameSlot, FrameTicket, SlotPool, SlotPoolOpts, SlotPoolStats, SlotState};
