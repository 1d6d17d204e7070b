//! Channel negotiation: ask the broker which port serves a channel.
//!
//! `GET {scheme}://{host}:{port}{path}?channel={guid}&password={password}`
//! answers `{"port": N}`. One request per session; retrying is the
//! supervisor's job.

use serde::Deserialize;
use tracing::debug;

use crate::config::{BrokerConfig, ChannelCredentials};
use crate::error::NegotiationError;

/// Port the broker assigned to a channel for one session.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Deserialize)]
pub struct ChannelAssignment {
    pub port: u16,
}

/// HTTP client for the channel broker.
#[derive(Clone, Debug)]
pub struct ChannelNegotiator {
    client: reqwest::Client,
    broker: BrokerConfig,
}

impl ChannelNegotiator {
    pub fn new(broker: BrokerConfig) -> Result<Self, reqwest::Error> {
        let client = reqwest::Client::builder()
            .timeout(broker.timeout())
            .build()?;
        Ok(Self { client, broker })
    }

    pub async fn negotiate(
        &self,
        credentials: &ChannelCredentials,
    ) -> Result<ChannelAssignment, NegotiationError> {
        let url = self.broker.channel_url(&credentials.host)?;
        debug!(url = %url, channel = %credentials.guid, "negotiating channel");

        let response = self
            .client
            .get(url)
            .query(&[
                ("channel", credentials.guid.as_str()),
                ("password", credentials.password.as_str()),
            ])
            .send()
            .await?;

        let status = response.status();
        if !status.is_success() {
            return Err(NegotiationError::Status { status });
        }

        let body = response.bytes().await?;
        let assignment: ChannelAssignment =
            serde_json::from_slice(&body).map_err(NegotiationError::Body)?;
        if assignment.port == 0 {
            return Err(NegotiationError::InvalidPort { port: 0 });
        }

        debug!(channel = %credentials.guid, port = assignment.port, "channel assigned");
        Ok(assignment)
    }
}
