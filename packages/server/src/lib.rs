//! Harmony core library.
//!
//! A music-automation backend: playlist and artist intents become jobs on a
//! persistent, priority-aware, leased work queue; handlers search a
//! peer-to-peer source for audio, score candidates, download the winners and
//! keep watched artists fresh on a cadence.

pub mod config;
pub mod domains;
pub mod kernel;
pub mod server;

pub use config::Config;
