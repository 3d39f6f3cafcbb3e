use crate::foundation::core::{FrameSeq, PixelRect, ViewId};
use crate::foundation::error::{PipelineError, PipelineResult};
use crate::view::View;
use std::path::{Path, PathBuf};
use std::sync::{Arc, Mutex};

/// One composited tile of one view, as handed downstream.
#[derive(Clone, Debug, PartialEq)]
pub struct CompositedImage {
    /// View the tile belongs to.
    pub view: ViewId,
    /// Frame the pixels were rendered for.
    pub seq: FrameSeq,
    /// Timestep the pixels were rendered at.
    pub timestep: u32,
    /// Full view width.
    pub width: u32,
    /// Full view height.
    pub height: u32,
    /// Tile rectangle in view coordinates.
    pub tile: PixelRect,
    /// RGBA8 over `tile`, top-left origin.
    pub color: Vec<u8>,
    /// Depth over `tile`.
    pub depth: Vec<f32>,
    /// Camera the frame was rendered with.
    pub view_state: View,
}

/// Downstream consumer of composited images.
///
/// Calls arrive on the tile owner only, once per `(view, seq)` and in strictly increasing `seq`
/// per view.
pub trait CompositeSink: Send {
    /// A view's tile of frame `seq` is ready.
    fn on_view_composited(
        &mut self,
        view: ViewId,
        image: &CompositedImage,
        seq: FrameSeq,
    ) -> PipelineResult<()>;

    /// Every view of frame `seq` has been handled on this rank.
    fn on_frame_complete(&mut self, _seq: FrameSeq) -> PipelineResult<()> {
        Ok(())
    }
}

/// Everything an [`InMemorySink`] saw.
#[derive(Clone, Debug, Default)]
pub struct SinkLog {
    /// Delivered images in arrival order.
    pub images: Vec<CompositedImage>,
    /// Completed frames in arrival order.
    pub completed: Vec<FrameSeq>,
}

/// Keeps every delivered image; clones share the same log.
#[derive(Clone, Debug, Default)]
pub struct InMemorySink {
    log: Arc<Mutex<SinkLog>>,
}

impl InMemorySink {
    /// Empty sink.
    pub fn new() -> Self {
        Self::default()
    }

    /// Copy of the log so far.
    pub fn snapshot(&self) -> SinkLog {
        match self.log.lock() {
            Ok(log) => log.clone(),
            Err(poisoned) => poisoned.into_inner().clone(),
        }
    }

    /// Sequence numbers delivered for `view`, in arrival order.
    pub fn seqs(&self, view: ViewId) -> Vec<FrameSeq> {
        self.snapshot()
            .images
            .iter()
            .filter(|i| i.view == view)
            .map(|i| i.seq)
            .collect()
    }

    fn with_log<R>(&self, f: impl FnOnce(&mut SinkLog) -> R) -> PipelineResult<R> {
        let mut log = self
            .log
            .lock()
            .map_err(|_| PipelineError::Other(anyhow::anyhow!("sink log poisoned")))?;
        Ok(f(&mut log))
    }
}

impl CompositeSink for InMemorySink {
    fn on_view_composited(
        &mut self,
        _view: ViewId,
        image: &CompositedImage,
        _seq: FrameSeq,
    ) -> PipelineResult<()> {
        self.with_log(|log| log.images.push(image.clone()))
    }

    fn on_frame_complete(&mut self, seq: FrameSeq) -> PipelineResult<()> {
        self.with_log(|log| log.completed.push(seq))
    }
}

/// Writes each delivered tile as `view{v}_frame{seq:05}_y{tile.y}.png` under a directory.
#[derive(Clone, Debug)]
pub struct PngSink {
    dir: PathBuf,
    written: Vec<PathBuf>,
}

impl PngSink {
    /// Sink writing into `dir`, which is created if missing.
    pub fn new(dir: impl AsRef<Path>) -> PipelineResult<Self> {
        let dir = dir.as_ref().to_path_buf();
        std::fs::create_dir_all(&dir).map_err(|e| {
            PipelineError::validation(format!("create output dir {}: {e}", dir.display()))
        })?;
        Ok(Self {
            dir,
            written: Vec::new(),
        })
    }

    /// Files written so far.
    pub fn written(&self) -> &[PathBuf] {
        &self.written
    }
}

impl CompositeSink for PngSink {
    fn on_view_composited(
        &mut self,
        view: ViewId,
        out: &CompositedImage,
        seq: FrameSeq,
    ) -> PipelineResult<()> {
        let path = self.dir.join(format!(
            "view{}_frame{:05}_y{}.png",
            view.0, seq.0, out.tile.y
        ));
        image::save_buffer_with_format(
            &path,
            &out.color,
            out.tile.width,
            out.tile.height,
            image::ColorType::Rgba8,
            image::ImageFormat::Png,
        )
        .map_err(|e| PipelineError::Other(anyhow::anyhow!("write {}: {e}", path.display())))?;
        tracing::debug!(path = %path.display(), "wrote composited tile");
        self.written.push(path);
        Ok(())
    }
}
