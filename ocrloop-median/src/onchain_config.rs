//! Client and server for `OnchainConfigCodec`

use std::sync::Arc;

use async_trait::async_trait;
use ocrloop_broker::{decode_request, encode_response, unknown_method, ClientConn, Fault, ServiceHandler};
use ocrloop_codec::{OnchainConfig, StandardOnchainConfigCodec};
use serde::{Deserialize, Serialize};
use serde_json::Value as JsonValue;

use crate::error::MedianResult;
use crate::traits::OnchainConfigCodec;

pub const INTERFACE: &str = "OnchainConfigCodec";

const ENCODE: &str = "OnchainConfigCodec/Encode";
const DECODE: &str = "OnchainConfigCodec/Decode";

#[derive(Debug, Serialize, Deserialize)]
struct EncodedConfig {
    #[serde(with = "ocrloop_codec::bytes")]
    encoded: Vec<u8>,
}

#[async_trait]
impl OnchainConfigCodec for StandardOnchainConfigCodec {
    async fn encode(&self, config: &OnchainConfig) -> MedianResult<Vec<u8>> {
        Ok(StandardOnchainConfigCodec::encode(self, config)?)
    }

    async fn decode(&self, encoded: &[u8]) -> MedianResult<OnchainConfig> {
        Ok(StandardOnchainConfigCodec::decode(self, encoded)?)
    }
}

#[derive(Debug, Clone)]
pub struct OnchainConfigCodecClient {
    conn: ClientConn,
}

impl OnchainConfigCodecClient {
    pub fn new(conn: ClientConn) -> Self {
        Self { conn }
    }
}

#[async_trait]
impl OnchainConfigCodec for OnchainConfigCodecClient {
    async fn encode(&self, config: &OnchainConfig) -> MedianResult<Vec<u8>> {
        let reply: EncodedConfig = self.conn.call(ENCODE, config).await?;
        Ok(reply.encoded)
    }

    async fn decode(&self, encoded: &[u8]) -> MedianResult<OnchainConfig> {
        let request = EncodedConfig {
            encoded: encoded.to_vec(),
        };
        Ok(self.conn.call(DECODE, &request).await?)
    }
}

pub struct OnchainConfigCodecServer {
    inner: Arc<dyn OnchainConfigCodec>,
}

impl OnchainConfigCodecServer {
    pub fn new(inner: Arc<dyn OnchainConfigCodec>) -> Self {
        Self { inner }
    }
}

#[async_trait]
impl ServiceHandler for OnchainConfigCodecServer {
    async fn handle(&self, method: &str, payload: JsonValue) -> Result<JsonValue, Fault> {
        match method {
            "Encode" => {
                let config: OnchainConfig = decode_request(payload)?;
                let encoded = self.inner.encode(&config).await?;
                encode_response(&EncodedConfig { encoded })
            }
            "Decode" => {
                let request: EncodedConfig = decode_request(payload)?;
                encode_response(&self.inner.decode(&request.encoded).await?)
            }
            other => Err(unknown_method(INTERFACE, other)),
        }
    }
}
