// Spotify implementation of the metadata provider
//
// This is the infrastructure implementation of MetadataProvider.
// What to do with an artist's catalog lives in the watchlist domain.

use std::time::Duration;

use async_trait::async_trait;
use reqwest::{Client, StatusCode};
use serde::Deserialize;
use tokio::sync::RwLock;

use super::traits::{AlbumRef, MetadataProvider, ProviderError, TrackRef};

const ACCOUNTS_URL: &str = "https://accounts.spotify.com/api/token";
const API_BASE: &str = "https://api.spotify.com/v1";

#[derive(Debug, Deserialize)]
struct TokenResponse {
    access_token: String,
    expires_in: u64,
}

#[derive(Debug, Deserialize)]
struct Paging<T> {
    items: Vec<T>,
}

#[derive(Debug, Deserialize)]
struct AlbumItem {
    id: String,
    name: String,
    release_date: Option<String>,
    #[serde(default)]
    total_tracks: i32,
}

#[derive(Debug, Deserialize)]
struct TrackItem {
    name: String,
    #[serde(default)]
    duration_ms: i64,
    #[serde(default)]
    artists: Vec<ArtistItem>,
}

#[derive(Debug, Deserialize)]
struct ArtistItem {
    name: String,
}

struct CachedToken {
    access_token: String,
    expires_at: tokio::time::Instant,
}

/// Spotify Web API client using the client-credentials grant. Tokens are
/// cached until shortly before expiry.
pub struct SpotifyClient {
    client: Client,
    client_id: String,
    client_secret: String,
    token: RwLock<Option<CachedToken>>,
}

impl SpotifyClient {
    pub fn new(client_id: String, client_secret: String) -> Self {
        Self {
            client: Client::new(),
            client_id,
            client_secret,
            token: RwLock::new(None),
        }
    }

    async fn token(&self) -> Result<String, ProviderError> {
        {
            let token = self.token.read().await;
            if let Some(cached) = token.as_ref() {
                if cached.expires_at > tokio::time::Instant::now() {
                    return Ok(cached.access_token.clone());
                }
            }
        }

        let response = self
            .client
            .post(ACCOUNTS_URL)
            .basic_auth(&self.client_id, Some(&self.client_secret))
            .form(&[("grant_type", "client_credentials")])
            .send()
            .await
            .map_err(|e| ProviderError::Dependency(e.to_string()))?;

        if !response.status().is_success() {
            return Err(ProviderError::Dependency(format!(
                "token request failed with {}",
                response.status()
            )));
        }

        let token: TokenResponse = response
            .json()
            .await
            .map_err(|e| ProviderError::Invalid(e.to_string()))?;

        let access_token = token.access_token.clone();
        // Refresh a minute early so in-flight requests never race expiry.
        let expires_at = tokio::time::Instant::now()
            + Duration::from_secs(token.expires_in.saturating_sub(60));
        *self.token.write().await = Some(CachedToken {
            access_token: token.access_token,
            expires_at,
        });

        Ok(access_token)
    }

    async fn get_json<T: for<'de> Deserialize<'de>>(
        &self,
        path: &str,
    ) -> Result<T, ProviderError> {
        let token = self.token().await?;
        let response = self
            .client
            .get(format!("{API_BASE}{path}"))
            .bearer_auth(token)
            .send()
            .await
            .map_err(|e| ProviderError::Dependency(e.to_string()))?;

        match response.status() {
            status if status.is_success() => response
                .json()
                .await
                .map_err(|e| ProviderError::Invalid(e.to_string())),
            StatusCode::TOO_MANY_REQUESTS => {
                let retry_after = response
                    .headers()
                    .get(reqwest::header::RETRY_AFTER)
                    .and_then(|v| v.to_str().ok())
                    .and_then(|v| v.parse::<u64>().ok())
                    .map(Duration::from_secs);
                Err(ProviderError::RateLimited { retry_after })
            }
            StatusCode::NOT_FOUND => Err(ProviderError::NotFound(path.to_string())),
            status => Err(ProviderError::Dependency(format!(
                "spotify returned {status} for {path}"
            ))),
        }
    }
}

#[async_trait]
impl MetadataProvider for SpotifyClient {
    async fn artist_albums(&self, artist_external_id: &str) -> Result<Vec<AlbumRef>, ProviderError> {
        let page: Paging<AlbumItem> = self
            .get_json(&format!(
                "/artists/{artist_external_id}/albums?include_groups=album,single&limit=50"
            ))
            .await?;

        Ok(page
            .items
            .into_iter()
            .map(|a| AlbumRef {
                id: a.id,
                name: a.name,
                release_date: a.release_date,
                total_tracks: a.total_tracks,
            })
            .collect())
    }

    async fn album_tracks(&self, album_id: &str) -> Result<Vec<TrackRef>, ProviderError> {
        let page: Paging<TrackItem> = self
            .get_json(&format!("/albums/{album_id}/tracks?limit=50"))
            .await?;

        Ok(page
            .items
            .into_iter()
            .map(|t| TrackRef {
                artist: t
                    .artists
                    .first()
                    .map(|a| a.name.clone())
                    .unwrap_or_default(),
                title: t.name,
                album: None,
                duration_secs: Some((t.duration_ms / 1000) as i32),
            })
            .collect())
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[tokio::test]
    #[ignore] // Requires API credentials
    async fn artist_albums_live() {
        let client_id = std::env::var("SPOTIFY_CLIENT_ID")
            .expect("SPOTIFY_CLIENT_ID must be set for integration tests");
        let client_secret = std::env::var("SPOTIFY_CLIENT_SECRET")
            .expect("SPOTIFY_CLIENT_SECRET must be set for integration tests");

        let client = SpotifyClient::new(client_id, client_secret);

        // Boards of Canada
        let albums = client
            .artist_albums("2VAvhf61GgLYmC6C8anyX1")
            .await
            .expect("album lookup should succeed");

        assert!(!albums.is_empty());
    }
}
