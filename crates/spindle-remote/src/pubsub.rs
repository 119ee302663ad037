//! Notification channel.
//!
//! The service publishes job events on a PubNub channel. This client
//! long-polls the PubNub subscribe endpoint and forwards every message on
//! an mpsc channel; it never interprets messages beyond their `type`.

use crate::error::RemoteError;
use serde::Deserialize;
use serde_json::Value;
use std::time::Duration;
use tokio::sync::mpsc;
use tokio::task::JoinHandle;

/// Subscription settings returned by `getPubsubSubscription`.
#[derive(Debug, Clone, Default, PartialEq, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct SubscriptionInfo {
    #[serde(default)]
    pub pubnub_subscribe_key: Option<String>,
    #[serde(default)]
    pub pubnub_channel: Option<String>,
    #[serde(default)]
    pub pubnub_user_id: Option<String>,
}

/// One message received on the channel.
#[derive(Debug, Clone, PartialEq)]
pub struct NotificationMessage {
    /// The message's `type` field, empty when absent
    pub message_type: String,
    pub payload: Value,
}

impl NotificationMessage {
    pub fn from_value(payload: Value) -> Self {
        let message_type = payload
            .get("type")
            .and_then(Value::as_str)
            .unwrap_or_default()
            .to_string();
        Self {
            message_type,
            payload,
        }
    }
}

/// Position in the channel's message stream.
#[derive(Debug, Clone, PartialEq, Eq)]
struct Cursor {
    timetoken: String,
    region: u32,
}

impl Cursor {
    fn initial() -> Self {
        Self {
            timetoken: "0".to_string(),
            region: 0,
        }
    }

    fn is_initial(&self) -> bool {
        self.timetoken == "0"
    }
}

#[derive(Deserialize)]
struct SubscribeResponse {
    t: Timetoken,
    #[serde(default)]
    m: Vec<Envelope>,
}

#[derive(Deserialize)]
struct Timetoken {
    t: String,
    #[serde(default)]
    r: u32,
}

#[derive(Deserialize)]
struct Envelope {
    d: Value,
}

fn parse_subscribe_response(
    body: &str,
) -> Result<(Cursor, Vec<NotificationMessage>), RemoteError> {
    let resp: SubscribeResponse = serde_json::from_str(body)?;
    let cursor = Cursor {
        timetoken: resp.t.t,
        region: resp.t.r,
    };
    let messages = resp
        .m
        .into_iter()
        .map(|e| NotificationMessage::from_value(e.d))
        .collect();
    Ok((cursor, messages))
}

pub struct PubsubClient {
    http: reqwest::Client,
    origin: String,
    subscribe_key: String,
    channel: String,
    user_id: String,
}

impl PubsubClient {
    pub const DEFAULT_ORIGIN: &'static str = "https://ps.pndsn.com";
    /// Longer than the server's long-poll hold time
    const POLL_TIMEOUT: Duration = Duration::from_secs(320);
    const INITIAL_BACKOFF: Duration = Duration::from_secs(2);
    const MAX_BACKOFF: Duration = Duration::from_secs(60);

    /// Returns `None` when the subscription has no subscribe key.
    pub fn new(info: &SubscriptionInfo) -> Result<Option<Self>, RemoteError> {
        let Some(subscribe_key) = info.pubnub_subscribe_key.clone() else {
            return Ok(None);
        };
        let http = reqwest::Client::builder()
            .timeout(Self::POLL_TIMEOUT)
            .build()?;
        Ok(Some(Self {
            http,
            origin: Self::DEFAULT_ORIGIN.to_string(),
            subscribe_key,
            channel: info.pubnub_channel.clone().unwrap_or_default(),
            user_id: info.pubnub_user_id.clone().unwrap_or_default(),
        }))
    }

    pub fn with_origin(mut self, origin: impl Into<String>) -> Self {
        self.origin = origin.into();
        self
    }

    fn subscribe_url(&self) -> String {
        format!(
            "{}/v2/subscribe/{}/{}/0",
            self.origin.trim_end_matches('/'),
            self.subscribe_key,
            self.channel
        )
    }

    /// Listen in the background until the receiver is dropped.
    pub fn spawn(self, tx: mpsc::Sender<NotificationMessage>) -> JoinHandle<()> {
        tokio::spawn(async move {
            self.run(tx).await;
        })
    }

    async fn run(self, tx: mpsc::Sender<NotificationMessage>) {
        let mut cursor = Cursor::initial();
        let mut backoff = Self::INITIAL_BACKOFF;

        while !tx.is_closed() {
            match self.subscribe_once(&cursor).await {
                Ok((next, messages)) => {
                    if cursor.is_initial() {
                        tracing::info!("Pubsub connected");
                    }
                    cursor = next;
                    backoff = Self::INITIAL_BACKOFF;
                    for message in messages {
                        tracing::info!("Pubsub message received: {}", message.message_type);
                        if tx.send(message).await.is_err() {
                            return;
                        }
                    }
                }
                Err(e) => {
                    tracing::warn!("Pubsub subscribe failed: {}", e);
                    tokio::time::sleep(backoff).await;
                    backoff = (backoff * 2).min(Self::MAX_BACKOFF);
                }
            }
        }
        tracing::info!("Unsubscribing from pubsub channel");
    }

    async fn subscribe_once(
        &self,
        cursor: &Cursor,
    ) -> Result<(Cursor, Vec<NotificationMessage>), RemoteError> {
        let mut query = vec![
            ("uuid", self.user_id.clone()),
            ("tt", cursor.timetoken.clone()),
        ];
        if !cursor.is_initial() {
            query.push(("tr", cursor.region.to_string()));
        }
        let resp = self.http.get(self.subscribe_url()).query(&query).send().await?;
        let status = resp.status();
        let body = resp.text().await?;
        if !status.is_success() {
            return Err(RemoteError::Status {
                status: status.as_u16(),
                body,
            });
        }
        parse_subscribe_response(&body)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use serde_json::json;

    #[test]
    fn test_parse_handshake() {
        let (cursor, messages) =
            parse_subscribe_response(r#"{"t":{"t":"16904567890123456","r":12},"m":[]}"#).unwrap();
        assert_eq!(cursor.timetoken, "16904567890123456");
        assert_eq!(cursor.region, 12);
        assert!(messages.is_empty());
    }

    #[test]
    fn test_parse_messages() {
        let body = json!({
            "t": {"t": "2", "r": 4},
            "m": [
                {"a": "4", "c": "cr", "d": {"type": "newPendingScriptJob", "scriptJobId": "x"}},
                {"a": "4", "c": "cr", "d": "not an object"}
            ]
        })
        .to_string();
        let (_, messages) = parse_subscribe_response(&body).unwrap();
        assert_eq!(messages.len(), 2);
        assert_eq!(messages[0].message_type, "newPendingScriptJob");
        assert_eq!(messages[1].message_type, "");
    }

    #[test]
    fn test_no_subscribe_key_means_no_client() {
        let info = SubscriptionInfo::default();
        assert!(PubsubClient::new(&info).unwrap().is_none());
    }

    #[test]
    fn test_subscribe_url() {
        let info = SubscriptionInfo {
            pubnub_subscribe_key: Some("sub-c-1".to_string()),
            pubnub_channel: Some("chan".to_string()),
            pubnub_user_id: Some("node".to_string()),
        };
        let client = PubsubClient::new(&info)
            .unwrap()
            .unwrap()
            .with_origin("http://localhost:9000/");
        assert_eq!(
            client.subscribe_url(),
            "http://localhost:9000/v2/subscribe/sub-c-1/chan/0"
        );
    }
}
