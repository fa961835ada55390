//! JSON-RPC client for the Quai node.
//!
//! Implements the three collaborator seams over one transport: chain queries
//! (`ChainQuery`), the mailbox contract surface (`NotificationRegistry`),
//! and payment submission (`TransactionSubmitter`). Also exposes a
//! WebSocket subscription for pushed `NotificationSent` events as an
//! alternative to polling the mailbox.

use crate::error::RpcError;
use crate::keys::{Address, PaymentCode};
use crate::mailbox::{NotificationEvent, NotificationReceipt, NotificationRegistry};
use crate::scanner::{ChainQuery, UnspentOutput};
use crate::wallet::TransactionSubmitter;
use crate::zone::Zone;

use futures_util::{SinkExt, StreamExt};
use reqwest::Client;
use serde::Deserialize;
use serde_json::{Value, json};
use std::time::Duration;
use tokio_tungstenite::{connect_async, tungstenite::Message};
use tracing::{debug, warn};

/// JSON-RPC client bound to one node endpoint and one mailbox deployment.
#[derive(Clone)]
pub struct QuaiRpcClient {
    http_client: Client,
    rpc_url: String,
    ws_url: String,
    mailbox_address: String,
}

impl QuaiRpcClient {
    pub fn new(rpc_url: String, ws_url: String, mailbox_address: String) -> Self {
        let http_client = Client::builder()
            .timeout(Duration::from_secs(30))
            .build()
            .expect("Failed to create HTTP client");

        Self {
            http_client,
            rpc_url,
            ws_url,
            mailbox_address,
        }
    }

    /// Execute one JSON-RPC call and unwrap its `result`.
    pub async fn execute(&self, method: &str, params: Value) -> Result<Value, RpcError> {
        let request_body = json!({
            "jsonrpc": "2.0",
            "id": 1,
            "method": method,
            "params": params,
        });

        let response = self
            .http_client
            .post(&self.rpc_url)
            .header("Content-Type", "application/json")
            .json(&request_body)
            .send()
            .await?;

        if !response.status().is_success() {
            return Err(RpcError::Rpc(format!("HTTP error: {}", response.status())));
        }

        let response_json: Value = response.json().await?;

        if let Some(error) = response_json.get("error") {
            if !error.is_null() {
                return Err(RpcError::Rpc(format!("RPC error: {}", error)));
            }
        }

        response_json
            .get("result")
            .cloned()
            .ok_or(RpcError::NoData)
    }

    /// Subscribe to pushed `NotificationSent` events for `receiver`.
    ///
    /// Push-based counterpart to polling `getNotifications`; each item is a
    /// `(sender, receiver)` pair already filtered to the given receiver.
    pub async fn subscribe_notifications(
        &self,
        receiver: &PaymentCode,
    ) -> Result<
        std::pin::Pin<
            Box<dyn futures_util::Stream<Item = Result<NotificationEvent, RpcError>> + Send>,
        >,
        RpcError,
    > {
        debug!("Attempting WebSocket connection to: {}", self.ws_url);
        let (ws_stream, response) = connect_async(&self.ws_url).await?;
        debug!(
            "WebSocket connection established, response status: {}",
            response.status()
        );
        let (mut ws_sender, ws_receiver) = ws_stream.split();

        let subscribe_message = json!({
            "jsonrpc": "2.0",
            "id": 1,
            "method": "qimailbox_subscribe",
            "params": ["notifications", self.mailbox_address, receiver.as_str()],
        });
        ws_sender
            .send(Message::Text(subscribe_message.to_string()))
            .await?;

        let receiver_filter = receiver.clone();
        let stream = ws_receiver.filter_map(move |msg| {
            let receiver_filter = receiver_filter.clone();
            async move {
                match msg {
                    Ok(Message::Text(text)) => {
                        let parsed: Value = match serde_json::from_str(&text) {
                            Ok(v) => v,
                            Err(e) => return Some(Err(RpcError::Json(e))),
                        };
                        // Subscription confirmations and other frames carry
                        // no params; skip them.
                        let result = parsed.get("params").and_then(|p| p.get("result"))?;
                        match parse_notification_event(result) {
                            Some(event) if event.receiver == receiver_filter => Some(Ok(event)),
                            Some(_) => None,
                            None => {
                                warn!("Skipping unparseable notification event: {}", result);
                                None
                            }
                        }
                    }
                    Ok(Message::Close(_)) => None,
                    Ok(_) => None,
                    Err(e) => Some(Err(RpcError::WebSocket(e))),
                }
            }
        });

        Ok(Box::pin(stream))
    }
}

fn parse_notification_event(result: &Value) -> Option<NotificationEvent> {
    let sender = result.get("sender").and_then(|s| s.as_str())?;
    let receiver = result.get("receiver").and_then(|r| r.as_str())?;
    Some(NotificationEvent {
        sender: PaymentCode::parse(sender).ok()?,
        receiver: PaymentCode::parse(receiver).ok()?,
    })
}

#[derive(Debug, Deserialize)]
struct RpcOutpoint {
    #[serde(rename = "txHash")]
    tx_hash: String,
    index: u32,
    denomination: u8,
}

#[async_trait::async_trait]
impl ChainQuery for QuaiRpcClient {
    async fn get_unspent_outputs(
        &self,
        address: &Address,
        zone: Zone,
    ) -> Result<Vec<UnspentOutput>, RpcError> {
        let result = self
            .execute(
                "qi_getOutpointsByAddress",
                json!([address.as_str(), zone.id()]),
            )
            .await?;

        let outpoints: Vec<RpcOutpoint> = serde_json::from_value(result)?;
        Ok(outpoints
            .into_iter()
            .map(|o| UnspentOutput {
                txid: o.tx_hash,
                index: o.index,
                denomination: o.denomination,
            })
            .collect())
    }

    async fn get_block_height(&self, zone: Zone) -> Result<u64, RpcError> {
        let result = self
            .execute("quai_blockNumber", json!([zone.id()]))
            .await?;

        // Nodes report heights as 0x-prefixed hex strings.
        match &result {
            Value::String(s) => {
                let trimmed = s.trim_start_matches("0x");
                u64::from_str_radix(trimmed, 16)
                    .map_err(|e| RpcError::Rpc(format!("invalid block height '{}': {}", s, e)))
            }
            Value::Number(n) => n.as_u64().ok_or_else(|| {
                RpcError::Rpc(format!("invalid block height: {}", n))
            }),
            other => Err(RpcError::Rpc(format!("invalid block height: {}", other))),
        }
    }
}

#[async_trait::async_trait]
impl NotificationRegistry for QuaiRpcClient {
    async fn notify(
        &self,
        sender: &PaymentCode,
        receiver: &PaymentCode,
    ) -> Result<NotificationReceipt, RpcError> {
        let result = self
            .execute(
                "qimailbox_notify",
                json!([self.mailbox_address, sender.as_str(), receiver.as_str()]),
            )
            .await?;

        let tx_hash = result
            .as_str()
            .map(str::to_string)
            .or_else(|| {
                result
                    .get("txHash")
                    .and_then(|h| h.as_str())
                    .map(str::to_string)
            })
            .ok_or(RpcError::NoData)?;

        Ok(NotificationReceipt { tx_hash })
    }

    async fn get_notifications(&self, receiver: &PaymentCode) -> Result<Vec<String>, RpcError> {
        let result = self
            .execute(
                "qimailbox_getNotifications",
                json!([self.mailbox_address, receiver.as_str()]),
            )
            .await?;

        Ok(serde_json::from_value(result)?)
    }
}

#[async_trait::async_trait]
impl TransactionSubmitter for QuaiRpcClient {
    async fn submit_payment(
        &self,
        recipient: &PaymentCode,
        amount: u128,
        origin: Zone,
        destination: Zone,
    ) -> Result<String, RpcError> {
        let result = self
            .execute(
                "qi_sendTransaction",
                json!([
                    recipient.as_str(),
                    amount.to_string(),
                    origin.id(),
                    destination.id(),
                ]),
            )
            .await?;

        result.as_str().map(str::to_string).ok_or(RpcError::NoData)
    }

    async fn convert_to_quai(
        &self,
        quai_address: &str,
        amount: u128,
    ) -> Result<String, RpcError> {
        let result = self
            .execute(
                "qi_convertToQuai",
                json!([quai_address, amount.to_string()]),
            )
            .await?;

        result.as_str().map(str::to_string).ok_or(RpcError::NoData)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn notification_events_parse_and_reject() {
        use crate::keys::{AddressDeriver, HashDeriver, Identity};
        let code = |b: u8| {
            HashDeriver
                .derive_payment_code(&Identity::from_seed_hex(&format!("{:02x}", b).repeat(32)).unwrap())
        };

        let ok = json!({"sender": code(1).as_str(), "receiver": code(2).as_str()});
        assert!(parse_notification_event(&ok).is_some());

        let bad = json!({"sender": "garbage", "receiver": code(2).as_str()});
        assert!(parse_notification_event(&bad).is_none());
    }
}
