//! Matching job payload.

use serde::{Deserialize, Serialize};

use crate::kernel::jobs::registry::job_types;
use crate::kernel::traits::{Candidate, TrackRef};

/// Score a candidate set against a reference track and start the download
/// of the winner. Producers that already hold search results (HTTP-triggered
/// playlist imports) enqueue this instead of a full `sync`.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct MatchingJob {
    pub track: TrackRef,
    pub candidates: Vec<Candidate>,
}

impl MatchingJob {
    pub const JOB_TYPE: &'static str = job_types::MATCHING;
}
