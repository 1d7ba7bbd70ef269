//! Unit of work handed from the orchestrator to the upload worker.

use bytes::Bytes;

use crate::segment::{FileType, PreparedSegment};

/// Object name of the first (or only) DOM piece.
pub const DOM_START_OBJECT: &str = "dom.mobs";
/// Object name of the second DOM piece, written only for split captures.
pub const DOM_END_OBJECT: &str = "dom.mobe";
/// Object name of the devtools capture.
pub const DEVTOOLS_OBJECT: &str = "devtools.mob";

/// Which stored piece a buffer is.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum SegmentName {
    /// First (or only) DOM piece.
    DomStart,
    /// Second DOM piece.
    DomEnd,
    /// Devtools capture.
    Devtools,
}

impl SegmentName {
    /// Object name under the session prefix.
    pub fn object_name(&self) -> &'static str {
        match self {
            SegmentName::DomStart => DOM_START_OBJECT,
            SegmentName::DomEnd => DOM_END_OBJECT,
            SegmentName::Devtools => DEVTOOLS_OBJECT,
        }
    }

    /// Full object key, `<session id>/<object name>`.
    pub fn object_key(&self, session_id: &str) -> String {
        format!("{}/{}", session_id, self.object_name())
    }
}

/// Prepared buffers of one session on their way to the object store.
///
/// Built and filled by the orchestrator, then moved through the hand-off queue
/// to the worker; only one side ever holds it.
pub struct Task {
    id: String,
    key: String,
    dom_start: Option<Bytes>,
    dom_end: Option<Bytes>,
    devtools: Option<Bytes>,
}

impl std::fmt::Debug for Task {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("Task")
            .field("id", &self.id)
            .field("encrypted", &!self.key.is_empty())
            .field("dom_start", &self.dom_start.as_ref().map(Bytes::len))
            .field("dom_end", &self.dom_end.as_ref().map(Bytes::len))
            .field("devtools", &self.devtools.as_ref().map(Bytes::len))
            .finish()
    }
}

impl Task {
    /// Start an empty task for a session.
    pub fn new(id: impl Into<String>, key: impl Into<String>) -> Self {
        Self {
            id: id.into(),
            key: key.into(),
            dom_start: None,
            dom_end: None,
            devtools: None,
        }
    }

    /// Session id, used as the object key prefix.
    pub fn id(&self) -> &str {
        &self.id
    }

    /// Session encryption secret; empty when none was requested.
    pub fn key(&self) -> &str {
        &self.key
    }

    /// Store a prepared capture under the slots for its kind.
    pub fn attach(&mut self, kind: FileType, segment: PreparedSegment) {
        match kind {
            FileType::Dom => {
                self.dom_start = Some(segment.first);
                self.dom_end = segment.second;
            }
            FileType::Devtools => {
                self.devtools = Some(segment.first);
            }
        }
    }

    /// True if no capture made it into the task.
    pub fn is_empty(&self) -> bool {
        self.dom_start.is_none() && self.devtools.is_none()
    }

    /// Number of buffers the worker will upload.
    pub fn segment_count(&self) -> usize {
        [&self.dom_start, &self.dom_end, &self.devtools]
            .iter()
            .filter(|s| s.is_some())
            .count()
    }

    /// Total compressed bytes held by the task.
    pub fn total_bytes(&self) -> usize {
        [&self.dom_start, &self.dom_end, &self.devtools]
            .iter()
            .filter_map(|s| s.as_ref().map(Bytes::len))
            .sum()
    }

    /// Consume the task into its present buffers with their object keys.
    pub fn into_uploads(self) -> Vec<(String, Bytes)> {
        let id = self.id;
        [
            (SegmentName::DomStart, self.dom_start),
            (SegmentName::DomEnd, self.dom_end),
            (SegmentName::Devtools, self.devtools),
        ]
        .into_iter()
        .filter_map(|(name, data)| data.map(|d| (name.object_key(&id), d)))
        .collect()
    }
}
