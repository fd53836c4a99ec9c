//! # Rating Service Client
//!
//! Thin wrapper around the remote rating read endpoint. One call to
//! [`RatingSource::fetch_batch`] is one HTTP request, whatever the number of
//! ids, authenticated with the credentials of the currently active session.
//!
//! ```text
//! GET {api_base}/v1/me/ratings/songs?ids=a,b,c
//! Authorization: Bearer <developer token>
//! Music-User-Token: <user token>
//!
//! { "data": [ { "id": "a", "attributes": { "value": 1 } }, ... ] }
//! ```
//!
//! Tracks without a rating are simply absent from `data`; turning that
//! absence into `unrated` is the cache's job.

use crate::config::CredentialSource;
use crate::rating::{Rating, RatingState};
use log::debug;
use reqwest::blocking::Client;
use serde::Deserialize;
use std::sync::Arc;
use std::time::Duration;
use thiserror::Error;

/// Path of the batched ratings endpoint; writes append `/{id}`
pub const RATINGS_SONGS_PATH: &str = "/v1/me/ratings/songs";

/// Header carrying the listener's session token
pub const MUSIC_USER_TOKEN_HEADER: &str = "Music-User-Token";

const REQUEST_TIMEOUT: Duration = Duration::from_secs(30);

/// Rating service errors
#[derive(Debug, Error)]
pub enum ServiceError {
    #[error("No session credentials available (set developer_token and music_user_token)")]
    MissingCredentials,

    #[error("Rating service returned HTTP {status}: {body}")]
    Status { status: u16, body: String },

    #[error("Network error: {0}")]
    Transport(#[from] reqwest::Error),

    #[error("Unexpected rating response: {0}")]
    Decode(#[from] serde_json::Error),
}

/// Anything that can resolve a batch of track ids to ratings
pub trait RatingSource: Send + Sync {
    /// Fetch ratings for `track_ids` in a single request.
    ///
    /// Only rated tracks are returned; the order follows the service.
    fn fetch_batch(&self, track_ids: &[String]) -> Result<Vec<Rating>, ServiceError>;
}

#[derive(Debug, Deserialize)]
struct RatingsResponse {
    #[serde(default)]
    data: Vec<RawRating>,
}

/// A rating record as the service sends it
#[derive(Debug, Deserialize)]
struct RawRating {
    id: String,
    attributes: RawRatingAttributes,
}

#[derive(Debug, Deserialize)]
struct RawRatingAttributes {
    value: i64,
}

impl From<RawRating> for Rating {
    fn from(raw: RawRating) -> Self {
        Rating::new(raw.id, RatingState::from_service_value(raw.attributes.value))
    }
}

/// Decode a ratings response body into internal ratings
pub fn parse_ratings_response(body: &str) -> Result<Vec<Rating>, ServiceError> {
    let response: RatingsResponse = serde_json::from_str(body)?;
    Ok(response.data.into_iter().map(Rating::from).collect())
}

/// Build the batched read URL for `track_ids`.
///
/// Each id is percent-encoded on its own so commas inside an id cannot be
/// confused with the list separator.
pub fn ratings_url(api_base: &str, track_ids: &[String]) -> String {
    let ids: Vec<_> = track_ids.iter().map(|id| urlencoding::encode(id)).collect();
    format!(
        "{}{RATINGS_SONGS_PATH}?ids={}",
        api_base.trim_end_matches('/'),
        ids.join(",")
    )
}

/// URL of a single track's rating, the target of writes and deletes
pub fn track_rating_url(api_base: &str, track_id: &str) -> String {
    format!(
        "{}{RATINGS_SONGS_PATH}/{}",
        api_base.trim_end_matches('/'),
        urlencoding::encode(track_id)
    )
}

/// HTTP client for the remote rating service
pub struct RatingServiceClient {
    http: Client,
    credentials: Arc<dyn CredentialSource>,
}

impl RatingServiceClient {
    pub fn new(credentials: Arc<dyn CredentialSource>) -> Result<Self, ServiceError> {
        let http = Client::builder()
            .timeout(REQUEST_TIMEOUT)
            .build()?;
        Ok(Self { http, credentials })
    }
}

impl RatingSource for RatingServiceClient {
    fn fetch_batch(&self, track_ids: &[String]) -> Result<Vec<Rating>, ServiceError> {
        if track_ids.is_empty() {
            return Ok(Vec::new());
        }

        let credentials = self.credentials.credentials()
            .ok_or(ServiceError::MissingCredentials)?;
        let url = ratings_url(&self.credentials.api_base_url(), track_ids);
        debug!("Fetching {} ratings: {url}", track_ids.len());

        let response = self.http
            .get(&url)
            .bearer_auth(&credentials.developer_token)
            .header(MUSIC_USER_TOKEN_HEADER, &credentials.music_user_token)
            .send()?;

        let status = response.status();
        let body = response.text()?;
        if !status.is_success() {
            return Err(ServiceError::Status {
                status: status.as_u16(),
                body,
            });
        }

        let ratings = parse_ratings_response(&body)?;
        debug!("Rating service returned {} of {} requested", ratings.len(), track_ids.len());
        Ok(ratings)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::config::{Settings, SharedSettings};

    fn ids(values: &[&str]) -> Vec<String> {
        values.iter().map(|s| s.to_string()).collect()
    }

    #[test]
    fn test_parse_response_translates_values() -> Result<(), ServiceError> {
        let body = r#"{
            "data": [
                { "id": "100", "type": "ratings", "href": "/v1/me/ratings/songs/100", "attributes": { "value": 1 } },
                { "id": "200", "type": "ratings", "href": "/v1/me/ratings/songs/200", "attributes": { "value": -1 } }
            ]
        }"#;

        let ratings = parse_ratings_response(body)?;
        assert_eq!(ratings, vec![
            Rating::new("100", RatingState::Liked),
            Rating::new("200", RatingState::Disliked),
        ]);
        Ok(())
    }

    #[test]
    fn test_parse_response_without_data() -> Result<(), ServiceError> {
        assert!(parse_ratings_response("{}")?.is_empty());
        Ok(())
    }

    #[test]
    fn test_parse_response_rejects_garbage() {
        let err = parse_ratings_response("<html>").unwrap_err();
        assert!(matches!(err, ServiceError::Decode(_)));
    }

    #[test]
    fn test_ratings_url_joins_ids() {
        assert_eq!(
            ratings_url("https://api.music.apple.com", &ids(&["1", "2", "3"])),
            "https://api.music.apple.com/v1/me/ratings/songs?ids=1,2,3"
        );
        assert_eq!(
            ratings_url("http://localhost:8080/", &ids(&["42"])),
            "http://localhost:8080/v1/me/ratings/songs?ids=42"
        );
    }

    /// Split the raw `ids=` value on literal commas, then decode each part
    fn ids_in(url: &str) -> Vec<String> {
        let (_, list) = url.split_once("?ids=").expect("ids query");
        list.split(',')
            .map(|part| urlencoding::decode(part).expect("valid encoding").into_owned())
            .collect()
    }

    #[test]
    fn test_ratings_url_escapes_file_ids() {
        let file_ids = ids(&["a, b.flac", "c&d.flac", "Artist/Album/01 #1.flac"]);

        let url = ratings_url("https://api.music.apple.com", &file_ids);

        assert_eq!(
            url,
            "https://api.music.apple.com/v1/me/ratings/songs?ids=a%2C%20b.flac,c%26d.flac,Artist%2FAlbum%2F01%20%231.flac"
        );
        assert_eq!(ids_in(&url), file_ids);
    }

    #[test]
    fn test_track_rating_url_keeps_id_in_one_segment() {
        assert_eq!(
            track_rating_url("https://api.music.apple.com/", "Artist/Album/01 Song.flac"),
            "https://api.music.apple.com/v1/me/ratings/songs/Artist%2FAlbum%2F01%20Song.flac"
        );
        assert_eq!(
            track_rating_url("http://localhost:8080", "1440818839"),
            "http://localhost:8080/v1/me/ratings/songs/1440818839"
        );
    }

    #[test]
    fn test_fetch_without_credentials_fails_before_network() {
        let settings = Arc::new(SharedSettings::new(Settings::default()));
        let client = RatingServiceClient::new(settings).expect("client builds");

        let err = client.fetch_batch(&ids(&["1"])).unwrap_err();
        assert!(matches!(err, ServiceError::MissingCredentials));
    }

    #[test]
    fn test_fetch_empty_batch_is_noop() -> Result<(), ServiceError> {
        let settings = Arc::new(SharedSettings::new(Settings::default()));
        let client = RatingServiceClient::new(settings)?;
        assert!(client.fetch_batch(&[])?.is_empty());
        Ok(())
    }

    #[test]
    fn test_status_error_message() {
        let err = ServiceError::Status { status: 401, body: "unauthorized".to_string() };
        assert_eq!(err.to_string(), "Rating service returned HTTP 401: unauthorized");
    }
}
