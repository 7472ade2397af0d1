//! Method routing for freshly registered endpoints

use std::collections::BTreeMap;
use std::sync::Arc;

use async_trait::async_trait;
use ocrloop_ipc::{Fault, FaultKind};
use serde::de::DeserializeOwned;
use serde::Serialize;
use serde_json::Value as JsonValue;

/// Server half of one interface (e.g. `ReportCodec`)
#[async_trait]
pub trait ServiceHandler: Send + Sync + 'static {
    /// Handle `method`, the part after the `/` in `"<Interface>/<Method>"`
    async fn handle(&self, method: &str, payload: JsonValue) -> Result<JsonValue, Fault>;
}

/// Interfaces served behind one service id
pub struct Server {
    name: String,
    interfaces: BTreeMap<String, Arc<dyn ServiceHandler>>,
}

impl Server {
    pub fn new(name: impl Into<String>) -> Self {
        Self {
            name: name.into(),
            interfaces: BTreeMap::new(),
        }
    }

    pub fn name(&self) -> &str {
        &self.name
    }

    /// Register `handler` for `interface`, replacing any earlier handler
    pub fn register(&mut self, interface: impl Into<String>, handler: impl ServiceHandler) -> &mut Self {
        self.interfaces.insert(interface.into(), Arc::new(handler));
        self
    }

    /// Registered interface names, sorted
    pub fn interfaces(&self) -> Vec<String> {
        self.interfaces.keys().cloned().collect()
    }

    pub async fn dispatch(&self, method: &str, payload: JsonValue) -> Result<JsonValue, Fault> {
        let Some((interface, name)) = method.split_once('/') else {
            return Err(Fault::new(
                FaultKind::UnknownMethod,
                format!("malformed method name {:?}", method),
            )
            .with_service(self.name.clone()));
        };

        let handler = self.interfaces.get(interface).ok_or_else(|| {
            Fault::new(
                FaultKind::UnknownMethod,
                format!("interface {} is not served", interface),
            )
            .with_service(self.name.clone())
        })?;

        handler
            .handle(name, payload)
            .await
            .map_err(|fault| fault.with_service(self.name.clone()))
    }
}

/// Decode a request payload, answering with a decode fault on mismatch
pub fn decode_request<T: DeserializeOwned>(payload: JsonValue) -> Result<T, Fault> {
    serde_json::from_value(payload).map_err(|e| Fault::new(FaultKind::Decode, e.to_string()))
}

pub fn encode_response<T: Serialize>(value: &T) -> Result<JsonValue, Fault> {
    serde_json::to_value(value).map_err(|e| Fault::remote(format!("failed to encode response: {}", e)))
}

/// Fault for a method an interface does not implement
pub fn unknown_method(interface: &str, method: &str) -> Fault {
    Fault::new(
        FaultKind::UnknownMethod,
        format!("{}/{} is not implemented", interface, method),
    )
}

#[cfg(test)]
mod tests {
    use super::*;
    use serde_json::json;

    struct Counter;

    #[async_trait]
    impl ServiceHandler for Counter {
        async fn handle(&self, method: &str, payload: JsonValue) -> Result<JsonValue, Fault> {
            match method {
                "Increment" => {
                    let n: u64 = decode_request(payload)?;
                    encode_response(&(n + 1))
                }
                "Fail" => Err(Fault::remote("counter broke")),
                other => Err(unknown_method("Counter", other)),
            }
        }
    }

    fn server() -> Server {
        let mut server = Server::new("Counting");
        server.register("Counter", Counter);
        server
    }

    #[tokio::test]
    async fn test_routes_by_interface() {
        let reply = server().dispatch("Counter/Increment", json!(41)).await.unwrap();
        assert_eq!(reply, json!(42));
        assert_eq!(server().interfaces(), vec!["Counter".to_string()]);
    }

    #[tokio::test]
    async fn test_faults_name_the_endpoint() {
        let fault = server().dispatch("Counter/Fail", JsonValue::Null).await.unwrap_err();
        assert_eq!(fault.kind, FaultKind::Remote);
        assert_eq!(fault.service.as_deref(), Some("Counting"));
    }

    #[tokio::test]
    async fn test_unknown_interface_and_bad_payload() {
        let fault = server().dispatch("Other/Increment", json!(1)).await.unwrap_err();
        assert_eq!(fault.kind, FaultKind::UnknownMethod);

        let fault = server().dispatch("Counter/Increment", json!("x")).await.unwrap_err();
        assert_eq!(fault.kind, FaultKind::Decode);

        let fault = server().dispatch("Increment", json!(1)).await.unwrap_err();
        assert_eq!(fault.kind, FaultKind::UnknownMethod);
    }
}
