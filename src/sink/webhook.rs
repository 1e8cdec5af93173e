use std::time::Duration;

use reqwest::blocking::Client;

use super::{full_topic, EventSink, SinkError};
use crate::event::DetectionEvent;

pub const TOPIC_HEADER: &str = "X-Chimewatch-Topic";

#[derive(Clone, Debug, Default)]
pub struct WebhookSettings {
    pub url: String,
    pub topic: String,
    pub username: Option<String>,
    pub password: Option<String>,
    /// Sent as a bearer token; takes precedence over username/password
    pub token: Option<String>,
    pub timeout: Duration,
}

/// POSTs each event's JSON payload to a home-automation webhook.
pub struct WebhookSink {
    client: Client,
    settings: WebhookSettings,
}

impl WebhookSink {
    pub fn new(settings: WebhookSettings) -> Result<Self, SinkError> {
        let client = Client::builder()
            .timeout(settings.timeout)
            .connect_timeout(settings.timeout)
            .user_agent(concat!("chimewatch/", env!("CARGO_PKG_VERSION")))
            .build()
            .map_err(|e| SinkError::Transport(e.to_string()))?;
        Ok(Self { client, settings })
    }
}

impl EventSink for WebhookSink {
    fn publish(&mut self, event: &DetectionEvent) -> Result<(), SinkError> {
        let mut request = self
            .client
            .post(&self.settings.url)
            .header(TOPIC_HEADER, full_topic(&self.settings.topic, event))
            .json(event);

        if let Some(token) = &self.settings.token {
            request = request.bearer_auth(token);
        } else if let Some(user) = &self.settings.username {
            request = request.basic_auth(user, self.settings.password.as_ref());
        }

        let response = request
            .send()
            .map_err(|e| SinkError::Transport(e.to_string()))?;
        if !response.status().is_success() {
            return Err(SinkError::Transport(format!(
                "webhook answered {}",
                response.status()
            )));
        }
        log::trace!("Published {} event", event.topic_suffix());
        Ok(())
    }
}
