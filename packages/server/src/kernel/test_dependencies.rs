//! Mock collaborators for tests.
//!
//! Each mock records its calls and can be scripted to fail a fixed number of
//! times before succeeding, which is how the retry scenarios are driven.

use std::sync::atomic::{AtomicUsize, Ordering};
use std::sync::Mutex;
use std::time::Duration;

use async_trait::async_trait;

use super::traits::{
    AlbumRef, Candidate, MetadataProvider, ProviderError, SourceProvider, TrackRef, TransferState,
};

fn clone_provider_error(template: &Mutex<Option<ProviderErrorKind>>) -> Option<ProviderError> {
    template
        .lock()
        .unwrap_or_else(|e| e.into_inner())
        .map(|kind| kind.build())
}

/// Scriptable error shapes, copyable so the mocks can replay them.
#[derive(Debug, Clone, Copy)]
pub enum ProviderErrorKind {
    Dependency,
    RateLimited { retry_after_secs: Option<u64> },
    NotFound,
}

impl ProviderErrorKind {
    fn build(self) -> ProviderError {
        match self {
            ProviderErrorKind::Dependency => {
                ProviderError::Dependency("mock dependency failure".into())
            }
            ProviderErrorKind::RateLimited { retry_after_secs } => ProviderError::RateLimited {
                retry_after: retry_after_secs.map(Duration::from_secs),
            },
            ProviderErrorKind::NotFound => ProviderError::NotFound("mock not found".into()),
        }
    }
}

// =============================================================================
// MockSourceProvider
// =============================================================================

#[derive(Default)]
pub struct MockSourceProvider {
    candidates: Mutex<Vec<Candidate>>,
    searches: Mutex<Vec<String>>,
    downloads: Mutex<Vec<Candidate>>,
    fail_next: AtomicUsize,
    error_kind: Mutex<Option<ProviderErrorKind>>,
    transfer_state: Mutex<Option<TransferState>>,
}

impl MockSourceProvider {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn with_candidates(candidates: Vec<Candidate>) -> Self {
        let mock = Self::new();
        *mock.candidates.lock().unwrap_or_else(|e| e.into_inner()) = candidates;
        mock
    }

    /// Fail the next `n` calls with the given error before succeeding.
    pub fn fail_times(&self, n: usize, kind: ProviderErrorKind) {
        self.fail_next.store(n, Ordering::SeqCst);
        *self.error_kind.lock().unwrap_or_else(|e| e.into_inner()) = Some(kind);
    }

    pub fn set_transfer_state(&self, state: TransferState) {
        *self
            .transfer_state
            .lock()
            .unwrap_or_else(|e| e.into_inner()) = Some(state);
    }

    pub fn searches(&self) -> Vec<String> {
        self.searches
            .lock()
            .unwrap_or_else(|e| e.into_inner())
            .clone()
    }

    pub fn downloads(&self) -> Vec<Candidate> {
        self.downloads
            .lock()
            .unwrap_or_else(|e| e.into_inner())
            .clone()
    }

    fn take_failure(&self) -> Option<ProviderError> {
        let remaining = self.fail_next.load(Ordering::SeqCst);
        if remaining > 0 {
            self.fail_next.store(remaining - 1, Ordering::SeqCst);
            return clone_provider_error(&self.error_kind);
        }
        None
    }
}

#[async_trait]
impl SourceProvider for MockSourceProvider {
    async fn search(&self, query: &str) -> Result<Vec<Candidate>, ProviderError> {
        self.searches
            .lock()
            .unwrap_or_else(|e| e.into_inner())
            .push(query.to_string());

        if let Some(err) = self.take_failure() {
            return Err(err);
        }
        Ok(self
            .candidates
            .lock()
            .unwrap_or_else(|e| e.into_inner())
            .clone())
    }

    async fn download(&self, candidate: &Candidate) -> Result<(), ProviderError> {
        if let Some(err) = self.take_failure() {
            return Err(err);
        }
        self.downloads
            .lock()
            .unwrap_or_else(|e| e.into_inner())
            .push(candidate.clone());
        Ok(())
    }

    async fn download_state(
        &self,
        _username: &str,
        _filename: &str,
    ) -> Result<TransferState, ProviderError> {
        if let Some(err) = self.take_failure() {
            return Err(err);
        }
        Ok(self
            .transfer_state
            .lock()
            .unwrap_or_else(|e| e.into_inner())
            .clone()
            .unwrap_or(TransferState::Complete))
    }
}

// =============================================================================
// MockMetadataProvider
// =============================================================================

#[derive(Default)]
pub struct MockMetadataProvider {
    albums: Mutex<Vec<AlbumRef>>,
    tracks: Mutex<Vec<TrackRef>>,
    lookups: Mutex<Vec<String>>,
    fail_next: AtomicUsize,
    error_kind: Mutex<Option<ProviderErrorKind>>,
}

impl MockMetadataProvider {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn with_albums(albums: Vec<AlbumRef>) -> Self {
        let mock = Self::new();
        *mock.albums.lock().unwrap_or_else(|e| e.into_inner()) = albums;
        mock
    }

    pub fn set_tracks(&self, tracks: Vec<TrackRef>) {
        *self.tracks.lock().unwrap_or_else(|e| e.into_inner()) = tracks;
    }

    pub fn fail_times(&self, n: usize, kind: ProviderErrorKind) {
        self.fail_next.store(n, Ordering::SeqCst);
        *self.error_kind.lock().unwrap_or_else(|e| e.into_inner()) = Some(kind);
    }

    pub fn lookups(&self) -> Vec<String> {
        self.lookups
            .lock()
            .unwrap_or_else(|e| e.into_inner())
            .clone()
    }

    fn take_failure(&self) -> Option<ProviderError> {
        let remaining = self.fail_next.load(Ordering::SeqCst);
        if remaining > 0 {
            self.fail_next.store(remaining - 1, Ordering::SeqCst);
            return clone_provider_error(&self.error_kind);
        }
        None
    }
}

#[async_trait]
impl MetadataProvider for MockMetadataProvider {
    async fn artist_albums(
        &self,
        artist_external_id: &str,
    ) -> Result<Vec<AlbumRef>, ProviderError> {
        self.lookups
            .lock()
            .unwrap_or_else(|e| e.into_inner())
            .push(artist_external_id.to_string());

        if let Some(err) = self.take_failure() {
            return Err(err);
        }
        Ok(self
            .albums
            .lock()
            .unwrap_or_else(|e| e.into_inner())
            .clone())
    }

    async fn album_tracks(&self, _album_id: &str) -> Result<Vec<TrackRef>, ProviderError> {
        if let Some(err) = self.take_failure() {
            return Err(err);
        }
        Ok(self
            .tracks
            .lock()
            .unwrap_or_else(|e| e.into_inner())
            .clone())
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[tokio::test]
    async fn mock_source_fails_then_succeeds() {
        let mock = MockSourceProvider::with_candidates(vec![]);
        mock.fail_times(2, ProviderErrorKind::Dependency);

        assert!(mock.search("a").await.is_err());
        assert!(mock.search("b").await.is_err());
        assert!(mock.search("c").await.is_ok());
        assert_eq!(mock.searches().len(), 3);
    }

    #[tokio::test]
    async fn mock_metadata_records_lookups() {
        let mock = MockMetadataProvider::new();
        mock.artist_albums("spotify:abc").await.unwrap();
        assert_eq!(mock.lookups(), vec!["spotify:abc".to_string()]);
    }
}
