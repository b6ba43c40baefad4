use serde::Serialize;

/// One clip promoted into the library during this run.
#[derive(Debug, Clone, Serialize)]
pub struct CommittedClip {
    pub filename: String,
    pub identifier: String,
    pub title: String,
    /// False when the source was already codec-compatible and went in
    /// untouched.
    pub transcoded: bool,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub sha256: Option<String>,
}

/// Outcome summary for a full pipeline run. Serialized as-is by the
/// control binary's JSON output mode.
#[derive(Debug, Clone, Default, Serialize)]
pub struct RunReport {
    pub station: String,
    /// Leftover staging files swept during startup cleanup.
    pub stale_removed: usize,
    /// True when the library was already at capacity and the run went
    /// straight to playlist emission.
    pub acquisition_skipped: bool,
    pub records_found: usize,
    pub pool_size: usize,
    pub drawn: usize,
    pub committed: Vec<CommittedClip>,
    pub evicted: usize,
    pub playlist_entries: usize,
    pub fallback_used: bool,
}

impl RunReport {
    pub fn committed_filenames(&self) -> Vec<&str> {
        self.committed
            .iter()
            .map(|clip| clip.filename.as_str())
            .collect()
    }
}
