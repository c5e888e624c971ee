//! Remote Sync Gateway
//!
//! Best-effort calls to the music backend: play registration and like/unlike.
//! Failures surface as [`PlaybackError::BackendCallFailure`] and never touch
//! playback state; the reconciler decides what to do with the outcome.
//!
//! Like and unlike are idempotent and go through the transport's retry
//! policy. A play event is sent once so a retry cannot count a play twice.

use bridge_traits::{
    Clock, CredentialProvider, HttpClient, HttpRequest, HttpResponse, RetryPolicy,
    SessionCredentials,
};
use serde::{Deserialize, Serialize};
use std::sync::Arc;
use std::time::Duration;
use tracing::{debug, instrument, warn};

use crate::error::{PlaybackError, Result};
use crate::track::TrackId;

#[derive(Debug, Serialize)]
#[serde(rename_all = "camelCase")]
struct PlayEventRequest<'a> {
    user_id: &'a str,
    track_id: &'a str,
    timestamp: String,
}

#[derive(Debug, Deserialize)]
struct PlayEventResponse {
    liked: bool,
}

#[derive(Debug, Serialize)]
#[serde(rename_all = "camelCase")]
struct TrackIdsRequest<'a> {
    track_ids: Vec<&'a str>,
}

pub(crate) struct RemoteSyncGateway {
    http: Arc<dyn HttpClient>,
    credentials: Arc<dyn CredentialProvider>,
    clock: Arc<dyn Clock>,
    base_url: String,
    timeout: Duration,
    like_retry: RetryPolicy,
}

impl RemoteSyncGateway {
    pub fn new(
        http: Arc<dyn HttpClient>,
        credentials: Arc<dyn CredentialProvider>,
        clock: Arc<dyn Clock>,
        base_url: impl Into<String>,
        timeout: Duration,
    ) -> Self {
        Self {
            http,
            credentials,
            clock,
            base_url: base_url.into(),
            timeout,
            like_retry: RetryPolicy::default(),
        }
    }

    /// Record a play and return whether the user likes the track.
    #[instrument(skip(self), fields(track_id = %track_id))]
    pub async fn register_play(&self, track_id: &TrackId) -> Result<bool> {
        let credentials = self.credentials().await?;
        let body = PlayEventRequest {
            user_id: &credentials.user_id,
            track_id: track_id.as_str(),
            timestamp: self.clock.now().to_rfc3339(),
        };

        let url = format!("{}/play-event", self.base_url);
        let response = self
            .post(&url, &credentials, &body, RetryPolicy::no_retry())
            .await?;
        let parsed: PlayEventResponse = response.json().map_err(|e| {
            PlaybackError::BackendCallFailure(format!("malformed play-event response: {}", e))
        })?;

        debug!(liked = parsed.liked, "Play registered");
        Ok(parsed.liked)
    }

    /// Like or unlike a track.
    #[instrument(skip(self), fields(track_id = %track_id))]
    pub async fn set_liked(&self, track_id: &TrackId, liked: bool) -> Result<()> {
        let credentials = self.credentials().await?;
        let operation = if liked { "like" } else { "unlike" };
        let url = format!("{}/{}/{}", self.base_url, operation, credentials.user_id);
        let body = TrackIdsRequest {
            track_ids: vec![track_id.as_str()],
        };

        self.post(&url, &credentials, &body, self.like_retry.clone())
            .await?;
        debug!(operation, "Like status synced");
        Ok(())
    }

    async fn credentials(&self) -> Result<SessionCredentials> {
        self.credentials
            .credentials()
            .await
            .map_err(|e| PlaybackError::BackendCallFailure(format!("credentials unavailable: {}", e)))?
            .ok_or_else(|| PlaybackError::BackendCallFailure("no signed-in user".to_string()))
    }

    async fn post<T: Serialize>(
        &self,
        url: &str,
        credentials: &SessionCredentials,
        body: &T,
        policy: RetryPolicy,
    ) -> Result<HttpResponse> {
        let request = HttpRequest::post(url)
            .bearer_token(credentials.bearer_token.as_str())
            .header("Accept", "application/json")
            .timeout(self.timeout)
            .json(body)
            .map_err(|e| PlaybackError::BackendCallFailure(e.to_string()))?;

        let response = self
            .http
            .execute_with_retry(request, policy)
            .await
            .map_err(|e| PlaybackError::BackendCallFailure(e.to_string()))?;

        if !response.is_success() {
            warn!(url, status = response.status, "Backend rejected request");
            return Err(PlaybackError::BackendCallFailure(format!(
                "HTTP {} from {}",
                response.status, url
            )));
        }
        Ok(response)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use async_trait::async_trait;
    use bridge_traits::error::Result as BridgeResult;
    use bridge_traits::{BridgeError, FixedClock, HttpMethod, StaticCredentials};
    use chrono::{TimeZone, Utc};
    use mockall::mock;
    use serde_json::{json, Value};

    mock! {
        Http {}

        #[async_trait]
        impl HttpClient for Http {
            async fn execute(&self, request: HttpRequest) -> BridgeResult<HttpResponse>;
            async fn execute_with_retry(
                &self,
                request: HttpRequest,
                policy: RetryPolicy,
            ) -> BridgeResult<HttpResponse>;
        }
    }

    fn gateway(http: MockHttp, credentials: StaticCredentials) -> RemoteSyncGateway {
        let clock = FixedClock(Utc.with_ymd_and_hms(2024, 3, 9, 18, 30, 0).unwrap());
        RemoteSyncGateway::new(
            Arc::new(http),
            Arc::new(credentials),
            Arc::new(clock),
            "https://api.example.com",
            Duration::from_secs(5),
        )
    }

    fn signed_in() -> StaticCredentials {
        StaticCredentials::new(SessionCredentials::new("u-7", "secret-token"))
    }

    #[tokio::test]
    async fn register_play_posts_event_and_parses_like() {
        let mut http = MockHttp::new();
        http.expect_execute_with_retry()
            .withf(|request, policy| {
                let body: Value = request.json_body().unwrap();
                policy.max_attempts == 1
                    && request.method == HttpMethod::Post
                    && request.url == "https://api.example.com/play-event"
                    && request.headers.get("Authorization").map(String::as_str)
                        == Some("Bearer secret-token")
                    && request.timeout == Some(Duration::from_secs(5))
                    && body
                        == json!({
                            "userId": "u-7",
                            "trackId": "t-1",
                            "timestamp": "2024-03-09T18:30:00+00:00",
                        })
            })
            .times(1)
            .returning(|_, _| Ok(HttpResponse::new(200, r#"{"liked":true}"#)));

        let liked = gateway(http, signed_in())
            .register_play(&TrackId::new("t-1"))
            .await
            .unwrap();
        assert!(liked);
    }

    #[tokio::test]
    async fn like_and_unlike_use_user_scoped_paths() {
        let mut http = MockHttp::new();
        http.expect_execute_with_retry()
            .withf(|request, policy| {
                let body: Value = request.json_body().unwrap();
                policy.max_attempts > 1
                    && request.url == "https://api.example.com/like/u-7"
                    && body == json!({ "trackIds": ["t-1"] })
            })
            .times(1)
            .returning(|_, _| Ok(HttpResponse::new(204, "")));
        http.expect_execute_with_retry()
            .withf(|request, _| request.url == "https://api.example.com/unlike/u-7")
            .times(1)
            .returning(|_, _| Ok(HttpResponse::new(200, "{}")));

        let gateway = gateway(http, signed_in());
        gateway.set_liked(&TrackId::new("t-1"), true).await.unwrap();
        gateway.set_liked(&TrackId::new("t-1"), false).await.unwrap();
    }

    #[tokio::test]
    async fn non_success_status_is_a_backend_failure() {
        let mut http = MockHttp::new();
        http.expect_execute_with_retry()
            .returning(|_, _| Ok(HttpResponse::new(503, "unavailable")));

        let err = gateway(http, signed_in())
            .set_liked(&TrackId::new("t-1"), true)
            .await
            .unwrap_err();
        assert!(matches!(err, PlaybackError::BackendCallFailure(msg) if msg.contains("503")));
    }

    #[tokio::test]
    async fn transport_errors_are_backend_failures() {
        let mut http = MockHttp::new();
        http.expect_execute_with_retry()
            .returning(|_, _| Err(BridgeError::OperationFailed("connection reset".into())));

        let err = gateway(http, signed_in())
            .register_play(&TrackId::new("t-1"))
            .await
            .unwrap_err();
        assert!(matches!(err, PlaybackError::BackendCallFailure(_)));
    }

    #[tokio::test]
    async fn malformed_play_response_is_rejected() {
        let mut http = MockHttp::new();
        http.expect_execute_with_retry()
            .returning(|_, _| Ok(HttpResponse::new(200, "not json")));

        let err = gateway(http, signed_in())
            .register_play(&TrackId::new("t-1"))
            .await
            .unwrap_err();
        assert!(matches!(err, PlaybackError::BackendCallFailure(msg) if msg.contains("malformed")));
    }

    #[tokio::test]
    async fn signed_out_user_sends_nothing() {
        let mut http = MockHttp::new();
        http.expect_execute_with_retry().never();

        let err = gateway(http, StaticCredentials::signed_out())
            .register_play(&TrackId::new("t-1"))
            .await
            .unwrap_err();
        assert_eq!(
            err,
            PlaybackError::BackendCallFailure("no signed-in user".to_string())
        );
    }
}
