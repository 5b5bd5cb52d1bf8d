// Outbound domain events

use async_trait::async_trait;
use bytes::Bytes;
use serde::{Deserialize, Serialize};
use std::sync::Arc;
use tracing::{error, info};

use crate::error::EngineResult;
use crate::model::OrderAggregate;

#[async_trait]
pub trait EventPublisher: Send + Sync + 'static {
    async fn publish(&self, topic: &str, payload: Bytes) -> EngineResult<()>;
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(tag = "type", rename_all = "camelCase")]
pub enum OrderEvent {
    RefundRequested(RefundRequestedEvent),
    RefundFinalized(RefundFinalizedEvent),
}

// A refund was accepted by the supplier and is waiting for payout
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct RefundRequestedEvent {
    pub refund_request_id: i64,
    pub order_id: i64,
    pub supplier_refund_request_id: i64,
    pub provider_order_id: i64,
}

impl RefundRequestedEvent {
    pub fn from_order(order: &OrderAggregate) -> Self {
        Self {
            refund_request_id: order.applicant_refund_request_id,
            order_id: order.applicant_order_id,
            supplier_refund_request_id: order.refund_request_id,
            provider_order_id: order.reseller_order_id,
        }
    }
}

/// Published once the supplier reports a refund as paid out.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct RefundFinalizedEvent {
    pub refund_request_id: i64,
    pub order_id: i64,
    pub paid_amount: f64,
    pub refund_status: String,
    pub refundable_amount: f64,
    pub total_penalty_amount: f64,
    pub provider_order_id: i64,
}

impl RefundFinalizedEvent {
    // Keyed by the applicant's ids, which is what the reseller side tracks
    pub fn from_order(order: &OrderAggregate) -> Self {
        Self {
            refund_request_id: order.applicant_refund_request_id,
            order_id: order.applicant_order_id,
            paid_amount: order.paid_amount,
            refund_status: order.refund_status.clone(),
            refundable_amount: order.refundable_amount,
            total_penalty_amount: order.total_penalty_amount,
            provider_order_id: order.reseller_order_id,
        }
    }
}

/// Serialises order events and hands them to the publisher. Dispatch is
/// fire-and-forget: failures are logged and never reach the caller.
#[derive(Clone)]
pub struct OrderEventDispatcher {
    publisher: Arc<dyn EventPublisher>,
    topic: String,
}

impl OrderEventDispatcher {
    pub fn new(publisher: Arc<dyn EventPublisher>, topic: impl Into<String>) -> Self {
        Self {
            publisher,
            topic: topic.into(),
        }
    }

    pub async fn refund_requested(&self, order: &OrderAggregate) {
        let event = OrderEvent::RefundRequested(RefundRequestedEvent::from_order(order));
        self.dispatch(order.reseller_order_id, &event).await;
    }

    pub async fn refund_finalized(&self, order: &OrderAggregate) {
        let event = OrderEvent::RefundFinalized(RefundFinalizedEvent::from_order(order));
        self.dispatch(order.reseller_order_id, &event).await;
    }

    async fn dispatch(&self, order_id: i64, event: &OrderEvent) {
        let payload = match serde_json::to_vec(event) {
            Ok(payload) => Bytes::from(payload),
            Err(err) => {
                error!(order_id, error = %err, tag = "order_event_error", "cannot encode order event");
                return;
            }
        };

        if let Err(err) = self.publisher.publish(&self.topic, payload).await {
            error!(
                order_id,
                topic = %self.topic,
                error = %err,
                tag = "order_event_error",
                "cannot publish order event"
            );
        }
    }
}

// Default publisher when no broker is wired in
#[derive(Debug, Default, Clone, Copy)]
pub struct TracingEventPublisher;

#[async_trait]
impl EventPublisher for TracingEventPublisher {
    async fn publish(&self, topic: &str, payload: Bytes) -> EngineResult<()> {
        info!(
            topic,
            payload = %String::from_utf8_lossy(&payload),
            tag = "event_published",
            "event published"
        );
        Ok(())
    }
}

#[cfg(test)]
pub(crate) mod recorder {
    use super::*;
    use crate::error::EngineError;
    use parking_lot::Mutex;

    #[derive(Default)]
    pub struct RecordingPublisher {
        pub published: Mutex<Vec<(String, Bytes)>>,
        pub fail: Mutex<bool>,
    }

    impl RecordingPublisher {
        pub fn events(&self) -> Vec<OrderEvent> {
            self.published
                .lock()
                .iter()
                .map(|(_, payload)| serde_json::from_slice(payload).expect("valid event"))
                .collect()
        }
    }

    #[async_trait]
    impl EventPublisher for RecordingPublisher {
        async fn publish(&self, topic: &str, payload: Bytes) -> EngineResult<()> {
            if *self.fail.lock() {
                return Err(EngineError::Upstream("broker down".to_string()));
            }
            self.published.lock().push((topic.to_string(), payload));
            Ok(())
        }
    }
}
