use tilecl_ir::{AnchorId, AnchorScope};

/// Concrete range along one dimension, resolved from an anchor region.
#[derive(new, Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord)]
pub struct ResolvedRange {
    /// First index.
    pub offset: i64,
    /// Number of indices.
    pub len: i64,
}

/// An anchor reached during an execution.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct AnchorEvent {
    /// Anchor that was reached.
    pub anchor: AnchorId,
    /// Granularity of the anchor.
    pub scope: AnchorScope,
    /// Name of the tensor the region belongs to.
    pub tensor: String,
    /// Index of the selected variant.
    pub variant: usize,
    /// Region marked as ready, one range per dimension.
    pub ranges: Vec<ResolvedRange>,
    /// Worker that reached the anchor.
    pub worker: usize,
}

impl AnchorEvent {
    /// Number of elements of the region.
    pub fn num_elems(&self) -> i64 {
        self.ranges.iter().map(|range| range.len.max(0)).product()
    }
}

/// Receives the anchors reached by the workers of an execution.
pub trait AnchorObserver: Sync {
    /// Called by the worker that reached the anchor, before it moves to the next statement.
    fn on_anchor(&self, event: AnchorEvent);
}

/// Observer ignoring every event.
#[derive(Debug, Default, Clone, Copy)]
pub struct NoopObserver;

impl AnchorObserver for NoopObserver {
    fn on_anchor(&self, _event: AnchorEvent) {}
}

/// Observer keeping every event.
#[derive(Debug, Default)]
pub struct AnchorLog {
    events: spin::Mutex<Vec<AnchorEvent>>,
}

impl AnchorLog {
    /// Create an empty log.
    pub fn new() -> Self {
        Self::default()
    }

    /// Remove and return the recorded events.
    pub fn take(&self) -> Vec<AnchorEvent> {
        core::mem::take(&mut *self.events.lock())
    }

    /// Number of recorded events.
    pub fn len(&self) -> usize {
        self.events.lock().len()
    }

    /// Whether no event was recorded.
    pub fn is_empty(&self) -> bool {
        self.len() == 0
    }
}

impl AnchorObserver for AnchorLog {
    fn on_anchor(&self, event: AnchorEvent) {
        self.events.lock().push(event);
    }
}
