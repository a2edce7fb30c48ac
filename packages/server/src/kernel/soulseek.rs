// =============================================================================
// SlskdClient Adapter (implements SourceProvider trait)
// =============================================================================

//! Adapter from the `slskd` client crate to the [`SourceProvider`] seam.
//!
//! Searches on the daemon are asynchronous: this adapter starts one, lets
//! the daemon collect peer responses for a short window, then normalizes
//! whatever arrived into [`Candidate`]s.

use std::time::Duration;

use async_trait::async_trait;
use slskd::models::DownloadRequest;
use slskd::{SlskdClient, SlskdError};

use super::traits::{Candidate, ProviderError, SourceProvider, TransferState};

fn map_error(err: SlskdError) -> ProviderError {
    match err {
        SlskdError::RateLimited { retry_after } => ProviderError::RateLimited { retry_after },
        SlskdError::NotFound(msg) => ProviderError::NotFound(msg),
        SlskdError::Transport(e) => ProviderError::Dependency(e.to_string()),
        SlskdError::Api { status, body } => {
            ProviderError::Dependency(format!("slskd returned {status}: {body}"))
        }
    }
}

pub struct SoulseekAdapter {
    client: SlskdClient,
    /// How long to let the daemon gather peer responses before reading them.
    search_window: Duration,
}

impl SoulseekAdapter {
    pub fn new(client: SlskdClient) -> Self {
        Self {
            client,
            search_window: Duration::from_secs(5),
        }
    }

    pub fn with_search_window(client: SlskdClient, search_window: Duration) -> Self {
        Self {
            client,
            search_window,
        }
    }
}

#[async_trait]
impl SourceProvider for SoulseekAdapter {
    async fn search(&self, query: &str) -> Result<Vec<Candidate>, ProviderError> {
        let search = self.client.start_search(query).await.map_err(map_error)?;

        tokio::time::sleep(self.search_window).await;

        let responses = self
            .client
            .search_responses(&search.id)
            .await
            .map_err(map_error)?;

        let mut candidates = Vec::new();
        for peer in responses {
            for file in peer.files {
                candidates.push(Candidate {
                    username: peer.username.clone(),
                    filename: file.filename,
                    size: file.size,
                    bit_rate: file.bit_rate,
                    duration_secs: file.length,
                    free_upload_slot: peer.has_free_upload_slot,
                    queue_length: peer.queue_length,
                });
            }
        }
        Ok(candidates)
    }

    async fn download(&self, candidate: &Candidate) -> Result<(), ProviderError> {
        self.client
            .enqueue_downloads(
                &candidate.username,
                &[DownloadRequest {
                    filename: candidate.filename.clone(),
                    size: candidate.size,
                }],
            )
            .await
            .map_err(map_error)
    }

    async fn download_state(
        &self,
        username: &str,
        filename: &str,
    ) -> Result<TransferState, ProviderError> {
        let transfers = self.client.downloads(username).await.map_err(map_error)?;

        let Some(transfer) = transfers.iter().find(|t| t.filename == filename) else {
            return Err(ProviderError::NotFound(format!(
                "no transfer of {filename} from {username}"
            )));
        };

        if transfer.is_complete() {
            return Ok(TransferState::Complete);
        }
        if transfer.is_failed() {
            return Ok(TransferState::Failed(transfer.state.clone()));
        }
        if transfer.bytes_transferred > 0 {
            return Ok(TransferState::InProgress {
                transferred: transfer.bytes_transferred,
                total: transfer.size,
            });
        }
        Ok(TransferState::Queued)
    }
}
