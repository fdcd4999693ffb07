//! Remote channel service: the chat channel whose name carries the status.
mod gateway;
mod rest;

pub use gateway::{Gateway, GatewayConfig};
pub use rest::DiscordRest;

use crate::consts::ChannelId;
use crate::error::RemoteError;
use async_trait::async_trait;

/// Rename notification delivered by the subscription.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ChannelUpdate {
    pub channel_id: ChannelId,
    pub name: String,
}

/// Read and rename a channel.
#[async_trait]
pub trait RemoteChannel: Send + Sync {
    /// Current channel name.
    async fn channel_name(&self, id: ChannelId) -> Result<String, RemoteError>;

    async fn rename_channel(&self, id: ChannelId, name: &str) -> Result<(), RemoteError>;
}
