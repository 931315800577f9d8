//! REST client for the verse analysis service.

use std::time::Duration;
use tracing::{debug, warn};

use crate::channel::{EventSender, SessionEvent};
use crate::config::Endpoints;
use crate::error::ChatError;
use crate::protocol::{AnalysisRequest, AnalysisResponse};
use crate::retry::retry_with_backoff;

/// Starts analysis requests. The outcome arrives later as
/// [`SessionEvent::Analysis`] carrying the same `response_id`.
pub trait AnalysisClient {
    fn request(&mut self, response_id: &str, verse: &str) -> Result<(), ChatError>;
}

/// `POST { bait }` to the analysis endpoint with reqwest.
pub struct RestAnalysisClient {
    client: reqwest::Client,
    url: String,
    retries: u32,
    base_delay: Duration,
    events: EventSender,
}

impl RestAnalysisClient {
    pub fn new(endpoints: &Endpoints, events: EventSender) -> Self {
        Self {
            client: reqwest::Client::new(),
            url: endpoints.analysis_url.clone(),
            retries: endpoints.analysis_retries,
            base_delay: endpoints.retry_base_delay(),
            events,
        }
    }

    /// One analysis round trip.
    ///
    /// # Returns
    /// - `Ok(AnalysisResponse)` on a 2xx reply with a decodable body.
    /// - `Err(ChatError::Transport)` when the request cannot be sent.
    /// - `Err(ChatError::Http)` on a non-2xx reply.
    /// - `Err(ChatError::Decode)` when the body is not the expected JSON.
    pub async fn analyze(
        client: &reqwest::Client,
        url: &str,
        verse: &str,
    ) -> Result<AnalysisResponse, ChatError> {
        let resp = client
            .post(url)
            .json(&AnalysisRequest { bait: verse.to_string() })
            .send()
            .await
            .map_err(|e| ChatError::transport(url, e))?;

        if !resp.status().is_success() {
            return Err(ChatError::Http {
                status: resp.status().as_u16(),
                url: url.to_string(),
            });
        }

        let bytes = resp.bytes().await.map_err(|e| ChatError::transport(url, e))?;
        serde_json::from_slice::<AnalysisResponse>(&bytes).map_err(|e| ChatError::Decode(e.to_string()))
    }
}

impl AnalysisClient for RestAnalysisClient {
    fn request(&mut self, response_id: &str, verse: &str) -> Result<(), ChatError> {
        let runtime = tokio::runtime::Handle::try_current()
            .map_err(|e| ChatError::Runtime(e.to_string()))?;
        let client = self.client.clone();
        let url = self.url.clone();
        let verse = verse.to_string();
        let response_id = response_id.to_string();
        let events = self.events.clone();
        let (retries, base_delay) = (self.retries, self.base_delay);

        debug!(%url, response = %response_id, "analysis requested");
        runtime.spawn(async move {
            let result = retry_with_backoff(
                || RestAnalysisClient::analyze(&client, &url, &verse),
                retries,
                base_delay,
            )
            .await;
            if let Err(e) = &result {
                warn!(%url, error = %e, "analysis request failed");
            }
            let _ = events.send(SessionEvent::Analysis { response_id, result });
        });
        Ok(())
    }
}
