//! Matching domain: candidate scoring against reference tracks.

pub mod engine;
pub mod handlers;
pub mod jobs;

pub use handlers::register_matching_jobs;
pub use jobs::MatchingJob;
