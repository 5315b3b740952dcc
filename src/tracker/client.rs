use std::time::Duration;

use reqwest::Client;

use super::error::TrackerError;
use super::response::{AnnounceResponse, TrackerEvent};
use crate::metainfo::InfoHash;
use crate::peer::PeerId;

const HTTP_TIMEOUT: Duration = Duration::from_secs(15);

/// Parameters of one announce.
#[derive(Debug, Clone)]
pub struct Announce {
    pub info_hash: InfoHash,
    pub peer_id: PeerId,
    pub port: u16,
    pub uploaded: u64,
    pub downloaded: u64,
    pub left: u64,
    pub event: TrackerEvent,
}

/// HTTP announce client for a single tracker.
pub struct TrackerClient {
    client: Client,
    url: String,
}

impl TrackerClient {
    pub fn new(url: &str) -> Result<Self, TrackerError> {
        if !url.starts_with("http://") && !url.starts_with("https://") {
            return Err(TrackerError::InvalidUrl(url.to_string()));
        }
        let client = Client::builder()
            .timeout(HTTP_TIMEOUT)
            .build()
            .map_err(TrackerError::Http)?;
        Ok(Self {
            client,
            url: url.to_string(),
        })
    }

    pub fn url(&self) -> &str {
        &self.url
    }

    /// Sends one announce and parses the bencoded response.
    pub async fn announce(&self, announce: &Announce) -> Result<AnnounceResponse, TrackerError> {
        let mut url = format!(
            "{}?info_hash={}&peer_id={}&port={}&uploaded={}&downloaded={}&left={}",
            self.url,
            url_encode(announce.info_hash.as_bytes()),
            url_encode(announce.peer_id.as_bytes()),
            announce.port,
            announce.uploaded,
            announce.downloaded,
            announce.left,
        );
        let event = announce.event.as_str();
        if !event.is_empty() {
            url.push_str("&event=");
            url.push_str(event);
        }

        let response = self.client.get(&url).send().await?;
        let body = response.bytes().await?;
        AnnounceResponse::from_bencode(&body)
    }
}

/// Percent-encodes raw bytes for a query parameter; the info-hash and
/// peer-ID are binary, not UTF-8.
fn url_encode(bytes: &[u8]) -> String {
    bytes
        .iter()
        .map(|&b| {
            if b.is_ascii_alphanumeric() || matches!(b, b'-' | b'_' | b'.' | b'~') {
                (b as char).to_string()
            } else {
                format!("%{:02X}", b)
            }
        })
        .collect()
}
