//! The per-invocation exchange: messages, endpoint bookkeeping and the
//! continuation handle.

use std::fmt;

use bytes::Bytes;
use serde::{Deserialize, Serialize};
use serde_json::Value;
use uuid::Uuid;

use crate::continuation::{Continuation, SavedPosition, StepOutcome};
use crate::error::ContinuationError;
use crate::fault::Fault;
use crate::message::{Direction, Message, Properties};

/// Unique identifier of one logical invocation.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize)]
pub struct ExchangeId(Uuid);

impl ExchangeId {
    #[must_use]
    pub fn new() -> Self {
        Self(Uuid::new_v4())
    }

    #[must_use]
    pub fn as_uuid(&self) -> &Uuid {
        &self.0
    }
}

impl Default for ExchangeId {
    fn default() -> Self {
        Self::new()
    }
}

impl fmt::Display for ExchangeId {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        self.0.fmt(f)
    }
}

/// A named network target an outbound invocation can be sent to.
#[derive(Debug, Clone, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub struct EndpointRef {
    pub name: String,
    pub address: String,
}

impl EndpointRef {
    #[must_use]
    pub fn new(name: impl Into<String>, address: impl Into<String>) -> Self {
        Self {
            name: name.into(),
            address: address.into(),
        }
    }
}

impl fmt::Display for EndpointRef {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}@{}", self.name, self.address)
    }
}

// ---------------------------------------------------------------------------
// Exchange
// ---------------------------------------------------------------------------

/// State of one logical invocation, threaded through every attempt.
///
/// The exchange owns its messages and at most one [`Continuation`]. A retried
/// attempt reuses the exchange with fresh messages (see
/// [`Exchange::begin_retry`]).
pub struct Exchange {
    id: ExchangeId,
    in_message: Option<Message>,
    out_message: Option<Message>,
    fault_message: Option<Message>,
    active: Direction,
    one_way: bool,
    synchronous: bool,
    properties: Properties,
    attempt: u32,
    endpoint: Option<EndpointRef>,
    original_endpoint: Option<EndpointRef>,
    tried: Vec<EndpointRef>,
    request_content: Option<Bytes>,
    continuation: Option<Continuation>,
    in_interceptor: bool,
}

impl Exchange {
    /// Creates an empty exchange on its first attempt.
    #[must_use]
    pub fn new() -> Self {
        Self {
            id: ExchangeId::new(),
            in_message: None,
            out_message: None,
            fault_message: None,
            active: Direction::Out,
            one_way: false,
            synchronous: true,
            properties: Properties::new(),
            attempt: 1,
            endpoint: None,
            original_endpoint: None,
            tried: Vec::new(),
            request_content: None,
            continuation: None,
            in_interceptor: false,
        }
    }

    /// Creates an exchange driving an incoming request.
    #[must_use]
    pub fn inbound(message: Message) -> Self {
        let mut exchange = Self::new();
        exchange.active = Direction::In;
        exchange.set_in_message(message);
        exchange
    }

    /// Creates an exchange driving an outgoing request to `endpoint`.
    ///
    /// The request payload is captured so retried attempts can resend it.
    #[must_use]
    pub fn outbound(message: Message, endpoint: EndpointRef) -> Self {
        let mut exchange = Self::new();
        exchange.request_content = message.content().cloned();
        exchange.set_out_message(message);
        exchange.original_endpoint = Some(endpoint.clone());
        exchange.endpoint = Some(endpoint.clone());
        exchange.tried.push(endpoint);
        exchange
    }

    #[must_use]
    pub fn with_one_way(mut self, one_way: bool) -> Self {
        self.one_way = one_way;
        self
    }

    #[must_use]
    pub fn with_synchronous(mut self, synchronous: bool) -> Self {
        self.synchronous = synchronous;
        self
    }

    #[must_use]
    pub fn id(&self) -> ExchangeId {
        self.id
    }

    #[must_use]
    pub fn is_one_way(&self) -> bool {
        self.one_way
    }

    #[must_use]
    pub fn is_synchronous(&self) -> bool {
        self.synchronous
    }

    /// Attempt number, starting at 1.
    #[must_use]
    pub fn attempt(&self) -> u32 {
        self.attempt
    }

    // -- messages --

    /// Direction of the message the executor is driving.
    #[must_use]
    pub fn active_direction(&self) -> Direction {
        self.active
    }

    pub fn set_active_direction(&mut self, direction: Direction) {
        self.active = direction;
    }

    /// The message the executor is currently driving.
    #[must_use]
    pub fn message(&self) -> Option<&Message> {
        match self.active {
            Direction::In => self.in_message.as_ref(),
            Direction::Out => self.out_message.as_ref(),
            Direction::Fault => self.fault_message.as_ref(),
        }
    }

    pub fn message_mut(&mut self) -> Option<&mut Message> {
        match self.active {
            Direction::In => self.in_message.as_mut(),
            Direction::Out => self.out_message.as_mut(),
            Direction::Fault => self.fault_message.as_mut(),
        }
    }

    #[must_use]
    pub fn in_message(&self) -> Option<&Message> {
        self.in_message.as_ref()
    }

    #[must_use]
    pub fn out_message(&self) -> Option<&Message> {
        self.out_message.as_ref()
    }

    #[must_use]
    pub fn fault_message(&self) -> Option<&Message> {
        self.fault_message.as_ref()
    }

    pub fn set_in_message(&mut self, mut message: Message) {
        message.bind(self.id);
        message.set_direction(Direction::In);
        self.in_message = Some(message);
    }

    pub fn set_out_message(&mut self, mut message: Message) {
        message.bind(self.id);
        message.set_direction(Direction::Out);
        self.out_message = Some(message);
    }

    // -- properties --

    #[must_use]
    pub fn properties(&self) -> &Properties {
        &self.properties
    }

    #[must_use]
    pub fn property(&self, key: &str) -> Option<&Value> {
        self.properties.get(key)
    }

    pub fn set_property(&mut self, key: impl Into<String>, value: impl Into<Value>) {
        self.properties.insert(key.into(), value.into());
    }

    pub fn remove_property(&mut self, key: &str) -> Option<Value> {
        self.properties.remove(key)
    }

    // -- fault flow --

    /// Diverts the exchange into fault flow: the active message is marked
    /// faulted and a fault message carrying `fault` is attached.
    pub fn enter_fault_flow(&mut self, fault: Fault) {
        if let Some(message) = self.message_mut() {
            message.mark_faulted(fault.clone());
        }
        let mut fault_message = Message::new(Direction::Fault);
        fault_message.bind(self.id);
        fault_message.mark_faulted(fault);
        self.fault_message = Some(fault_message);
    }

    #[must_use]
    pub fn is_in_fault_flow(&self) -> bool {
        self.fault_message.is_some()
    }

    /// The fault currently being handled, if any.
    #[must_use]
    pub fn fault(&self) -> Option<&Fault> {
        self.fault_message.as_ref().and_then(Message::fault)
    }

    // -- endpoints --

    #[must_use]
    pub fn endpoint(&self) -> Option<&EndpointRef> {
        self.endpoint.as_ref()
    }

    #[must_use]
    pub fn original_endpoint(&self) -> Option<&EndpointRef> {
        self.original_endpoint.as_ref()
    }

    /// Every target attempted so far, in attempt order.
    #[must_use]
    pub fn tried_endpoints(&self) -> &[EndpointRef] {
        &self.tried
    }

    #[must_use]
    pub fn request_content(&self) -> Option<&Bytes> {
        self.request_content.as_ref()
    }

    /// Points the exchange back at the endpoint of its first attempt.
    pub fn restore_original_endpoint(&mut self) {
        if let Some(original) = &self.original_endpoint {
            self.endpoint = Some(original.clone());
        }
    }

    /// Prepares the next attempt against `target`.
    ///
    /// Fault flow is cleared, a fresh outbound message is built whose content
    /// is a new handle onto the original request payload, any response from
    /// the previous attempt is dropped and the attempt counter advances.
    pub fn begin_retry(&mut self, target: EndpointRef) {
        let content = self.request_content.clone();
        let mut fresh = match &self.out_message {
            Some(previous) => previous.fresh_attempt(content),
            None => {
                let mut message = Message::new(Direction::Out);
                if let Some(content) = content {
                    message.set_content(content);
                }
                message
            }
        };
        fresh.bind(self.id);

        self.fault_message = None;
        self.in_message = None;
        self.out_message = Some(fresh);
        self.active = Direction::Out;
        self.attempt += 1;
        self.endpoint = Some(target.clone());
        self.tried.push(target);
        if let Some(continuation) = &self.continuation {
            continuation.reset();
        }
    }

    // -- continuation --

    #[must_use]
    pub fn continuation(&self) -> Option<&Continuation> {
        self.continuation.as_ref()
    }

    /// Returns the exchange's continuation, creating it on first request.
    pub fn continuation_or_create(&mut self) -> Continuation {
        let (id, in_interceptor) = (self.id, self.in_interceptor);
        self.continuation
            .get_or_insert_with(|| Continuation::new(id, in_interceptor))
            .clone()
    }

    /// Explicitly creates the exchange's continuation.
    ///
    /// # Errors
    ///
    /// Returns [`ContinuationError::DuplicateContinuation`] if one exists.
    pub fn create_continuation(&mut self) -> Result<Continuation, ContinuationError> {
        if self.continuation.is_some() {
            return Err(ContinuationError::DuplicateContinuation { exchange: self.id });
        }
        Ok(self.continuation_or_create())
    }

    /// Detaches the continuation from the exchange.
    pub fn release_continuation(&mut self) -> Option<Continuation> {
        self.continuation.take()
    }

    // -- executor integration --

    /// Marks the start of an interceptor call.
    pub fn enter_interceptor(&mut self) {
        self.in_interceptor = true;
        if let Some(continuation) = &self.continuation {
            continuation.enter_interceptor();
        }
    }

    /// Marks the normal end of an interceptor call, parking the position
    /// produced by `park` if the interceptor suspended.
    pub fn leave_interceptor(&mut self, park: impl FnOnce() -> SavedPosition) -> StepOutcome {
        self.in_interceptor = false;
        match &self.continuation {
            Some(continuation) => continuation.leave_interceptor(park),
            None => StepOutcome::Continue,
        }
    }

    /// Marks the end of an interceptor call that raised a fault.
    pub fn abort_interceptor(&mut self) {
        self.in_interceptor = false;
        if let Some(continuation) = &self.continuation {
            continuation.abort_interceptor();
        }
    }
}

impl Default for Exchange {
    fn default() -> Self {
        Self::new()
    }
}

impl fmt::Debug for Exchange {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("Exchange")
            .field("id", &self.id)
            .field("attempt", &self.attempt)
            .field("active", &self.active)
            .field("endpoint", &self.endpoint)
            .field("in_fault_flow", &self.is_in_fault_flow())
            .field("continuation", &self.continuation)
            .finish_non_exhaustive()
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn request() -> Exchange {
        Exchange::outbound(
            Message::with_content(Direction::Out, "get-quote"),
            EndpointRef::new("primary", "http://10.0.0.1:9000"),
        )
    }

    #[test]
    fn outbound_records_endpoints_and_binds_message() {
        let exchange = request();
        assert_eq!(exchange.attempt(), 1);
        assert_eq!(exchange.endpoint(), exchange.original_endpoint());
        assert_eq!(exchange.tried_endpoints().len(), 1);
        assert_eq!(
            exchange.message().and_then(Message::exchange_id),
            Some(exchange.id())
        );
    }

    #[test]
    fn fault_message_present_only_in_fault_flow() {
        let mut exchange = request();
        assert!(!exchange.is_in_fault_flow());

        exchange.enter_fault_flow(Fault::transport("refused"));
        assert!(exchange.is_in_fault_flow());
        assert_eq!(exchange.message().map(Message::direction), Some(Direction::Fault));
        assert_eq!(exchange.fault().map(Fault::reason), Some("refused"));

        exchange.begin_retry(EndpointRef::new("backup", "http://10.0.0.2:9000"));
        assert!(!exchange.is_in_fault_flow());
        assert!(exchange.fault().is_none());
    }

    #[test]
    fn retry_builds_fresh_message_over_original_payload() {
        let mut exchange = request();
        if let Some(message) = exchange.message_mut() {
            message.add_header("x-attempt", "1");
            message.set_content("mutated by marshalling");
        }
        exchange.set_in_message(Message::with_content(Direction::In, "partial response"));
        exchange.enter_fault_flow(Fault::transport("reset"));

        let backup = EndpointRef::new("backup", "http://10.0.0.2:9000");
        exchange.begin_retry(backup.clone());

        let message = exchange.message().unwrap();
        assert_eq!(message.direction(), Direction::Out);
        assert!(message.headers().is_empty());
        assert_eq!(message.content().map(|b| b.as_ref()), Some(&b"get-quote"[..]));
        assert!(exchange.in_message().is_none());
        assert_eq!(exchange.attempt(), 2);
        assert_eq!(exchange.endpoint(), Some(&backup));
        assert_eq!(exchange.tried_endpoints().len(), 2);

        exchange.restore_original_endpoint();
        assert_eq!(exchange.endpoint().map(|e| e.name.as_str()), Some("primary"));
    }

    #[test]
    fn second_explicit_continuation_is_rejected() {
        let mut exchange = request();
        let first = exchange.create_continuation().unwrap();
        assert!(matches!(
            exchange.create_continuation(),
            Err(ContinuationError::DuplicateContinuation { .. })
        ));
        assert_eq!(exchange.continuation_or_create().exchange_id(), first.exchange_id());
    }

    #[test]
    fn continuation_created_inside_interceptor_can_suspend() {
        let mut exchange = request();
        exchange.enter_interceptor();
        let continuation = exchange.continuation_or_create();
        assert!(continuation.suspend(0));
        let outcome = exchange.leave_interceptor(|| {
            SavedPosition::new(crate::chain::Chain::empty(), 1)
        });
        assert_eq!(outcome, StepOutcome::Parked);
        assert!(continuation.has_saved_position());
    }

    #[test]
    fn continuation_created_outside_interceptor_cannot_suspend() {
        let mut exchange = request();
        let continuation = exchange.continuation_or_create();
        assert!(!continuation.suspend(0));
    }
}
