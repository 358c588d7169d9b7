// src/telemetry/client.rs
//! Telemetry consumer built on [`AuthenticatedTaskQueue`]

use crate::telemetry::collaborators::{Identity, IdentityResolver, PackageInfo, TelemetrySink};
use crate::telemetry::task_queue::AuthenticatedTaskQueue;
use serde_json::{json, Map, Value};
use std::sync::Arc;
use tracing::debug;

/// Buffers events until identity and package info are known
pub struct TelemetryClient {
    queue: Arc<AuthenticatedTaskQueue<Identity, PackageInfo>>,
    sink: Arc<dyn TelemetrySink>,
}

impl TelemetryClient {
    pub fn new(sink: Arc<dyn TelemetrySink>) -> Self {
        Self {
            queue: Arc::new(AuthenticatedTaskQueue::new("telemetry")),
            sink,
        }
    }

    /// Resolve the gates: package info immediately, identity in the background
    pub fn start(&self, resolver: Arc<dyn IdentityResolver>, package: PackageInfo) {
        self.queue.settle_session(Ok(package));

        let queue = Arc::clone(&self.queue);
        tokio::spawn(async move {
            let identity = resolver.resolve().await;
            if let Err(e) = &identity {
                debug!("Telemetry identity unavailable: {}", e);
            }
            queue.settle_identity(identity);
        });
    }

    /// Record an event; delivery happens once the gates are open
    pub fn track(&self, event: &str, properties: Value) {
        let sink = Arc::clone(&self.sink);
        let event = event.to_string();

        self.queue.push(move |identity, package| async move {
            let mut merged = match properties {
                Value::Object(map) => map,
                Value::Null => Map::new(),
                other => {
                    let mut map = Map::new();
                    map.insert("value".to_string(), other);
                    map
                }
            };
            merged.insert("identity".to_string(), json!(identity));
            merged.insert("package".to_string(), json!(package));

            sink.send(&event, &Value::Object(merged));
            Ok(())
        });
    }

    /// Deliver what can be delivered within the flush timeout
    pub async fn flush_and_close(&self) -> bool {
        self.queue.flush_and_close().await
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::telemetry::collaborators::FixedIdentity;
    use parking_lot::Mutex;

    #[derive(Default)]
    struct RecordingSink {
        events: Mutex<Vec<(String, Value)>>,
    }

    impl TelemetrySink for RecordingSink {
        fn send(&self, event: &str, properties: &Value) {
            self.events.lock().push((event.to_string(), properties.clone()));
        }
    }

    #[tokio::test]
    async fn events_carry_identity_and_package() {
        let sink = Arc::new(RecordingSink::default());
        let client = TelemetryClient::new(sink.clone());

        client.track("upload.started", json!({"recordingId": "r1"}));
        client.start(
            Arc::new(FixedIdentity(Identity {
                id: "u1".to_string(),
                kind: "user".to_string(),
            })),
            PackageInfo::current(),
        );

        assert!(client.flush_and_close().await);

        let events = sink.events.lock();
        assert_eq!(events.len(), 1);
        let (name, props) = &events[0];
        assert_eq!(name, "upload.started");
        assert_eq!(props["recordingId"], "r1");
        assert_eq!(props["identity"]["type"], "user");
        assert_eq!(props["package"]["name"], env!("CARGO_PKG_NAME"));
    }
}
