/// Discord webhook transport for kill messages.
use anyhow::{bail, Context, Result};
use serde::Serialize;
use std::time::Duration;

use crate::config::Config;
use crate::queue::Deliver;

const REQUEST_TIMEOUT: Duration = Duration::from_secs(10);

#[derive(Debug, Serialize)]
struct WebhookPayload<'a> {
    content: &'a str,
    username: &'a str,
    #[serde(skip_serializing_if = "Option::is_none")]
    avatar_url: Option<&'a str>,
}

pub struct DiscordWebhook {
    client: reqwest::Client,
    url: String,
    username: String,
    avatar_url: Option<String>,
}

impl DiscordWebhook {
    pub fn new(config: &Config) -> Result<Self> {
        let client = reqwest::Client::builder()
            .timeout(REQUEST_TIMEOUT)
            .build()
            .context("Failed to build HTTP client")?;
        Ok(Self {
            client,
            url: config.webhook_url.clone(),
            username: config.username.clone(),
            avatar_url: config.avatar_url.clone(),
        })
    }

    fn payload<'a>(&'a self, text: &'a str) -> WebhookPayload<'a> {
        WebhookPayload {
            content: text,
            username: &self.username,
            avatar_url: self.avatar_url.as_deref(),
        }
    }
}

impl Deliver for DiscordWebhook {
    /// Posts one message. Discord answers 204 on success; any 2xx is accepted.
    async fn deliver(&self, text: &str) -> Result<()> {
        let response = self
            .client
            .post(&self.url)
            .json(&self.payload(text))
            .send()
            .await
            .context("Webhook request failed")?;

        let status = response.status();
        if !status.is_success() {
            bail!("Discord webhook returned {status}");
        }
        Ok(())
    }
}
