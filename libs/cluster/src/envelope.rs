//! Wire Envelope
//!
//! Every message that crosses node boundaries travels inside an [`Envelope`].
//! The envelope carries routing metadata plus an opaque payload; the cluster
//! core never looks inside payload bytes, only the registered handler does.
//!
//! A request envelope is either one-way (no `reply_to`, no `correlation_id`)
//! or two-way (both present). `payload` and `payloads` are mutually
//! exclusive: a batched call uses `payloads`, everything else `payload`.

use std::time::{Duration, SystemTime, UNIX_EPOCH};

use serde::{Deserialize, Serialize};

/// Whether an envelope asks for work or carries the answer back.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub enum Action {
    Request,
    Response,
}

/// A fault raised on the serving node, carried back to the caller.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct RemoteFault {
    pub message: String,
}

impl RemoteFault {
    pub fn new(message: impl Into<String>) -> Self {
        Self {
            message: message.into(),
        }
    }
}

/// Wire envelope for inter-node messages.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct Envelope {
    /// Destination node name
    pub to: String,
    /// Request or response
    pub action: Action,
    /// Registered method name on the destination node
    pub method: String,
    /// Correlates a response with its pending request; absent on one-way
    #[serde(skip_serializing_if = "Option::is_none")]
    pub correlation_id: Option<i64>,
    /// Node the response should be published to; absent on one-way
    #[serde(skip_serializing_if = "Option::is_none")]
    pub reply_to: Option<String>,
    /// Single encoded request or response value
    #[serde(skip_serializing_if = "Option::is_none")]
    pub payload: Option<Vec<u8>>,
    /// Encoded values of a batched call, in caller order
    #[serde(skip_serializing_if = "Option::is_none")]
    pub payloads: Option<Vec<Vec<u8>>>,
    /// Fault raised on the serving node; set instead of payload(s)
    #[serde(skip_serializing_if = "Option::is_none")]
    pub fault: Option<RemoteFault>,
    /// Creation instant, milliseconds since the Unix epoch
    pub created_at_ms: u64,
    /// End-to-end budget granted by the caller, milliseconds
    pub timeout_ms: u64,
}

/// Current wall-clock time in milliseconds since the Unix epoch.
pub fn unix_time_ms() -> u64 {
    SystemTime::now()
        .duration_since(UNIX_EPOCH)
        .map(|elapsed| elapsed.as_millis() as u64)
        .unwrap_or(0)
}

impl Envelope {
    /// A one-way request carrying a single payload.
    pub fn request(to: impl Into<String>, method: impl Into<String>, timeout_ms: u64) -> Self {
        Self {
            to: to.into(),
            action: Action::Request,
            method: method.into(),
            correlation_id: None,
            reply_to: None,
            payload: None,
            payloads: None,
            fault: None,
            created_at_ms: unix_time_ms(),
            timeout_ms,
        }
    }

    /// A response headed back to `reply_to` of `request`, with the same
    /// method, correlation id and budget. Payload is filled in by the caller.
    pub fn response_to(request: &Envelope, reply_to: String) -> Self {
        Self {
            to: reply_to,
            action: Action::Response,
            method: request.method.clone(),
            correlation_id: request.correlation_id,
            reply_to: None,
            payload: None,
            payloads: None,
            fault: None,
            created_at_ms: request.created_at_ms,
            timeout_ms: request.timeout_ms,
        }
    }

    /// Mark as two-way: responses go to `reply_to` under `correlation_id`.
    pub fn with_reply(mut self, reply_to: impl Into<String>, correlation_id: i64) -> Self {
        self.reply_to = Some(reply_to.into());
        self.correlation_id = Some(correlation_id);
        self
    }

    pub fn with_payload(mut self, payload: Vec<u8>) -> Self {
        debug_assert!(self.payloads.is_none());
        self.payload = Some(payload);
        self
    }

    pub fn with_payloads(mut self, payloads: Vec<Vec<u8>>) -> Self {
        debug_assert!(self.payload.is_none());
        self.payloads = Some(payloads);
        self
    }

    pub fn with_fault(mut self, fault: RemoteFault) -> Self {
        self.payload = None;
        self.payloads = None;
        self.fault = Some(fault);
        self
    }

    /// True when the sender expects an answer.
    pub fn expects_reply(&self) -> bool {
        self.reply_to.is_some() && self.correlation_id.is_some()
    }

    /// Milliseconds elapsed since the envelope was created. Clock skew
    /// between nodes can make this zero even for old envelopes; the budget
    /// check is an optimization, correctness comes from the caller's own
    /// timeout.
    pub fn elapsed_ms(&self) -> u64 {
        unix_time_ms().saturating_sub(self.created_at_ms)
    }

    /// Time left of the caller's budget, or `None` once it is exhausted.
    pub fn remaining_budget(&self) -> Option<Duration> {
        let elapsed = self.elapsed_ms();
        if elapsed >= self.timeout_ms {
            None
        } else {
            Some(Duration::from_millis(self.timeout_ms - elapsed))
        }
    }
}
