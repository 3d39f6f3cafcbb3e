use crate::composite::{CompositeStrategy, TilePolicy};
use crate::foundation::core::{Rank, Rgba8};
use crate::foundation::error::{PipelineError, PipelineResult};
use crate::readback::{MAX_ASYNC_FRAMES, SlotPoolOpts};
use std::path::Path;
use std::time::Duration;

/// Pipeline settings. Every field has a default, unknown keys are rejected.
#[derive(Clone, Debug, PartialEq, serde::Serialize, serde::Deserialize)]
#[serde(default, deny_unknown_fields)]
pub struct PipelineConfig {
    /// Frames in flight per view beyond the one being rendered (`0..=2`).
    pub asynchronicity: usize,
    /// Granularity the sparse readback rectangle is snapped to.
    pub tile_size: u32,
    /// Read back only the projected bounds of the local geometry.
    pub sparse_readback: bool,
    /// Rank that decides the frame state.
    pub authority_rank: Rank,
    /// Color of pixels no rank covers.
    pub background: Rgba8,
    /// Fragment exchange pattern.
    pub strategy: CompositeStrategy,
    /// Display tile assignment.
    pub tile_policy: TilePolicy,
    /// Render every tick even when nothing changed.
    pub continuous_rendering: bool,
    /// Timeout for every collective and fragment receive.
    pub sync_timeout_ms: u64,
    /// Bound on blocking drains; unbounded when `None`.
    pub drain_timeout_ms: Option<u64>,
    /// Live byte budget of the slot pool.
    pub max_slot_bytes: usize,
    /// Sleep after each completed frame.
    pub frame_delay_ms: u64,
    /// Copy workers of the CPU readback device (rayon default when `None`).
    pub readback_threads: Option<usize>,
}

impl Default for PipelineConfig {
    fn default() -> Self {
        Self {
            asynchronicity: 0,
            tile_size: 64,
            sparse_readback: true,
            authority_rank: 0,
            background: [0, 0, 0, 0],
            strategy: CompositeStrategy::Sequential,
            tile_policy: TilePolicy::Authority,
            continuous_rendering: false,
            sync_timeout_ms: 10_000,
            drain_timeout_ms: None,
            max_slot_bytes: SlotPoolOpts::default().max_live_bytes,
            frame_delay_ms: 0,
            readback_threads: None,
        }
    }
}

impl PipelineConfig {
    /// Parse and validate JSON.
    pub fn from_json_str(s: &str) -> PipelineResult<Self> {
        let cfg: Self = serde_json::from_str(s)?;
        cfg.validate()?;
        Ok(cfg)
    }

    /// Read, parse and validate a JSON file.
    pub fn from_path(path: impl AsRef<Path>) -> PipelineResult<Self> {
        let path = path.as_ref();
        let text = std::fs::read_to_string(path).map_err(|e| {
            PipelineError::validation(format!("read config {}: {e}", path.display()))
        })?;
        Self::from_json_str(&text)
    }

    /// Check ranges that serde cannot express.
    pub fn validate(&self) -> PipelineResult<()> {
        if self.asynchronicity > MAX_ASYNC_FRAMES {
            return Err(PipelineError::validation(format!(
                "asynchronicity must be <= {MAX_ASYNC_FRAMES}, got {}",
                self.asynchronicity
            )));
        }
        if self.tile_size == 0 {
            return Err(PipelineError::validation("tile_size must be >= 1"));
        }
        if self.sync_timeout_ms == 0 {
            return Err(PipelineError::validation("sync_timeout_ms must be > 0"));
        }
        if self.drain_timeout_ms == Some(0) {
            return Err(PipelineError::validation(
                "drain_timeout_ms must be > 0 when set",
            ));
        }
        if self.readback_threads == Some(0) {
            return Err(PipelineError::validation(
                "readback_threads must be >= 1 when set",
            ));
        }
        if self.max_slot_bytes == 0 {
            return Err(PipelineError::validation("max_slot_bytes must be > 0"));
        }
        Ok(())
    }

    /// Collective and fragment receive timeout.
    pub fn sync_timeout(&self) -> Duration {
        Duration::from_millis(self.sync_timeout_ms)
    }

    /// Drain bound, if any.
    pub fn drain_timeout(&self) -> Option<Duration> {
        self.drain_timeout_ms.map(Duration::from_millis)
    }

    /// Slot pool options derived from the byte budget.
    pub fn slot_pool_opts(&self) -> SlotPoolOpts {
        SlotPoolOpts {
            max_live_bytes: self.max_slot_bytes,
            max_retained_bytes: self.max_slot_bytes.min(SlotPoolOpts::default().max_retained_bytes),
        }
    }
}
