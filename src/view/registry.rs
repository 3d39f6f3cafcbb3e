use crate::foundation::core::ViewId;
use crate::foundation::error::{PipelineError, PipelineResult};
use crate::view::model::{View, ViewParams};

/// Structural differences between two committed view sets.
#[derive(Clone, Debug, Default, PartialEq, Eq)]
pub struct ViewSetChange {
    /// Views that did not exist before.
    pub added: Vec<ViewId>,
    /// Views that no longer exist.
    pub removed: Vec<ViewId>,
    /// Views whose width or height changed.
    pub resized: Vec<ViewId>,
}

impl ViewSetChange {
    /// `true` when outstanding frames must be flushed before new frames start.
    pub fn requires_flush(&self) -> bool {
        !self.added.is_empty() || !self.removed.is_empty() || !self.resized.is_empty()
    }

    /// `true` when the number of views changed.
    pub fn count_changed(&self) -> bool {
        !self.added.is_empty() || !self.removed.is_empty()
    }
}

/// Ordered set of views.
///
/// Edits go to a staged copy. Only [`ViewRegistry::commit`], called by the synchronizer with a
/// snapshot every rank agreed on, changes what [`ViewRegistry::view_data`] returns.
#[derive(Clone, Debug, Default)]
pub struct ViewRegistry {
    committed: Vec<View>,
    staged: Vec<View>,
    dirty: bool,
}

impl ViewRegistry {
    /// Empty registry.
    pub fn new() -> Self {
        Self::default()
    }

    /// Stage a new view count. Fresh views start as 1x1 with identity matrices.
    pub fn set_view_count(&mut self, n: usize) -> PipelineResult<()> {
        let n_u32 = u32::try_from(n)
            .map_err(|_| PipelineError::validation(format!("view count {n} out of range")))?;
        if n == self.staged.len() {
            return Ok(());
        }
        self.staged.truncate(n);
        for i in self.staged.len() as u32..n_u32 {
            self.staged.push(View::new(ViewId(i), 1, 1));
        }
        self.dirty = true;
        Ok(())
    }

    /// Stage new parameters for an existing view.
    pub fn update_view(&mut self, id: ViewId, params: ViewParams) -> PipelineResult<()> {
        if params.width == 0 || params.height == 0 {
            return Err(PipelineError::validation(format!(
                "view {} must have non-zero dimensions, got {}x{}",
                id.0, params.width, params.height
            )));
        }
        let staged_len = self.staged.len();
        let slot = self.staged.get_mut(id.index()).ok_or_else(|| {
            PipelineError::validation(format!(
                "view {} does not exist ({staged_len} staged views)",
                id.0
            ))
        })?;
        *slot = View::from_params(id, params);
        self.dirty = true;
        Ok(())
    }

    /// Committed state of a view.
    pub fn view_data(&self, id: ViewId) -> Option<&View> {
        self.committed.get(id.index())
    }

    /// All committed views in id order.
    pub fn views(&self) -> &[View] {
        &self.committed
    }

    /// Number of committed views.
    pub fn view_count(&self) -> usize {
        self.committed.len()
    }

    /// `true` when staged edits have not been committed yet.
    pub fn has_staged_changes(&self) -> bool {
        self.dirty
    }

    /// Copy of the staged views, as proposed by the authority.
    pub fn staged_snapshot(&self) -> Vec<View> {
        self.staged.clone()
    }

    /// Replace the committed state with an agreed snapshot.
    ///
    /// Light positions are transformed into each view's model frame here, once per frame.
    pub fn commit(&mut self, snapshot: Vec<View>) -> ViewSetChange {
        let mut change = ViewSetChange::default();
        for (i, v) in snapshot.iter().enumerate() {
            match self.committed.get(i) {
                None => change.added.push(v.id),
                Some(old) if old.dims_differ(v) => change.resized.push(v.id),
                Some(_) => {}
            }
        }
        for old in self.committed.iter().skip(snapshot.len()) {
            change.removed.push(old.id);
        }

        self.staged = snapshot.clone();
        self.dirty = false;
        self.committed = snapshot;
        for v in &mut self.committed {
            v.transform_lights();
        }
        change
    }
}

#[cfg(test)]
#[path = "../../tests/unit/view/registry.rs"]
mod tests;
