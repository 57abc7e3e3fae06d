use serde::{Deserialize, Serialize};

use crate::{WirePath, WirePoint};

/// Incremental operation against a watermarked remote annotation replica.
///
/// `AppendPoints::offset` is the point count the sender believes the receiver
/// already holds; the receiver skips any overlap so duplicate delivery is
/// harmless, and treats a gap as a desync.
#[derive(Serialize, Deserialize, Clone, Debug, PartialEq)]
#[serde(tag = "type", rename_all = "snake_case")]
pub enum AnnotationDelta {
    Replace { annotations: Vec<WirePath> },
    AddPath { index: usize, path: WirePath },
    AppendPoints { id: String, offset: usize, points: Vec<WirePoint> },
    RemovePath { id: String, index: usize },
    Clear,
}
