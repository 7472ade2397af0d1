//! Client and server for `ErrorLog`

use std::sync::Arc;

use async_trait::async_trait;
use ocrloop_broker::{decode_request, encode_response, unknown_method, ClientConn, Fault, ServiceHandler};
use serde::{Deserialize, Serialize};
use serde_json::Value as JsonValue;

use crate::error::MedianResult;
use crate::traits::ErrorLog;

pub const INTERFACE: &str = "ErrorLog";

const SAVE_ERROR: &str = "ErrorLog/SaveError";

#[derive(Debug, Serialize, Deserialize)]
struct SaveErrorRequest {
    message: String,
}

#[derive(Debug, Clone)]
pub struct ErrorLogClient {
    conn: ClientConn,
}

impl ErrorLogClient {
    pub fn new(conn: ClientConn) -> Self {
        Self { conn }
    }
}

#[async_trait]
impl ErrorLog for ErrorLogClient {
    async fn save_error(&self, message: &str) -> MedianResult<()> {
        let request = SaveErrorRequest {
            message: message.to_string(),
        };
        self.conn.call::<_, ()>(SAVE_ERROR, &request).await?;
        Ok(())
    }
}

pub struct ErrorLogServer {
    inner: Arc<dyn ErrorLog>,
}

impl ErrorLogServer {
    pub fn new(inner: Arc<dyn ErrorLog>) -> Self {
        Self { inner }
    }
}

#[async_trait]
impl ServiceHandler for ErrorLogServer {
    async fn handle(&self, method: &str, payload: JsonValue) -> Result<JsonValue, Fault> {
        match method {
            "SaveError" => {
                let request: SaveErrorRequest = decode_request(payload)?;
                encode_response(&self.inner.save_error(&request.message).await?)
            }
            other => Err(unknown_method(INTERFACE, other)),
        }
    }
}
