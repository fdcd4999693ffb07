use super::RemoteChannel;
use crate::consts::ChannelId;
use crate::error::RemoteError;
use async_trait::async_trait;
use reqwest::{Client, Method, StatusCode};
use serde::{Deserialize, Serialize};
use std::time::Duration;
use tracing::{debug, warn};

#[derive(Deserialize, Debug)]
struct ChannelBody {
    name: String,
}

#[derive(Serialize, Debug)]
struct RenameBody<'a> {
    name: &'a str,
}

/// Discord REST client covering the two channel calls we need.
pub struct DiscordRest {
    client: Client,
    token: String,
    api_base: String,
}

impl DiscordRest {
    pub fn new(token: &str, api_version: u8, timeout: Duration) -> Result<Self, RemoteError> {
        let client = Client::builder()
            .timeout(timeout)
            .build()
            .map_err(|err| RemoteError::Transport(err.to_string()))?;
        Ok(Self {
            client,
            token: token.to_string(),
            api_base: format!("https://discord.com/api/v{}", api_version),
        })
    }

    async fn request(
        &self,
        method: Method,
        endpoint: &str,
        body: Option<&RenameBody<'_>>,
    ) -> Result<reqwest::Response, RemoteError> {
        let url = format!("{}{}", self.api_base, endpoint);
        debug!("{} {}", method, url);
        let mut request = self
            .client
            .request(method, url)
            .header("Authorization", format!("Bot {}", self.token));
        if let Some(body) = body {
            request = request.json(body);
        }
        let response = request.send().await.map_err(|err| {
            if err.is_timeout() {
                RemoteError::Timeout
            } else {
                RemoteError::Transport(err.to_string())
            }
        })?;

        if response.status() != StatusCode::OK {
            warn!("{} returned {}", endpoint, response.status());
            return Err(RemoteError::Status(response.status().as_u16()));
        }
        Ok(response)
    }
}

#[async_trait]
impl RemoteChannel for DiscordRest {
    async fn channel_name(&self, id: ChannelId) -> Result<String, RemoteError> {
        let response = self
            .request(Method::GET, &format!("/channels/{}", id), None)
            .await?;
        let body: ChannelBody = response
            .json()
            .await
            .map_err(|err| RemoteError::Malformed(err.to_string()))?;
        Ok(body.name)
    }

    async fn rename_channel(&self, id: ChannelId, name: &str) -> Result<(), RemoteError> {
        self.request(
            Method::PATCH,
            &format!("/channels/{}", id),
            Some(&RenameBody { name }),
        )
        .await?;
        Ok(())
    }
}
