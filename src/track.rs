use serde::{Deserialize, Serialize};

/// A resolved, playable track. Immutable once resolved; owned by whichever
/// queue or playlist currently holds it.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct Track {
    pub title: String,
    /// Canonical source URL, also the identity used for prebuffer and cache
    /// comparisons.
    pub url: String,
    pub requested_by: String,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub duration_secs: Option<u64>,
}

