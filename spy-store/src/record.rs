//! Received message records.

use std::sync::{Arc, Mutex, OnceLock, PoisonError};
use std::time::SystemTime;

use bytes::Bytes;
use spy_primitives::{MessageId, Qos, SubscriptionId};

use crate::format::Formatter;
use crate::{FormatError, StoreError, StoreResult};

/// Reference-counted record shared between the all-messages list and the
/// filtered view.
pub type SharedRecord = Arc<MessageRecord>;

#[derive(Debug, Clone)]
struct FormattedPayload {
    formatter: Formatter,
    text: Arc<str>,
}

/// One message as handed over by the broker client, immutable once built.
///
/// The only interior state is the formatted-payload cache and the
/// subscription back-reference, which may be bound once.
#[derive(Debug)]
pub struct MessageRecord {
    id: MessageId,
    topic: String,
    payload: Bytes,
    qos: Qos,
    retained: bool,
    received_at: SystemTime,
    subscription: OnceLock<SubscriptionId>,
    formatted: Mutex<Option<FormattedPayload>>,
}

impl MessageRecord {
    /// Creates a builder for a message received on `topic`.
    #[must_use]
    pub fn builder(topic: impl Into<String>, payload: impl Into<Bytes>) -> MessageRecordBuilder {
        MessageRecordBuilder {
            topic: topic.into(),
            payload: payload.into(),
            qos: Qos::default(),
            retained: false,
            received_at: SystemTime::now(),
            subscription: None,
        }
    }

    /// Returns the store-local sequence number.
    #[must_use]
    pub fn id(&self) -> MessageId {
        self.id
    }

    /// Returns the topic the message was published on.
    #[must_use]
    pub fn topic(&self) -> &str {
        &self.topic
    }

    /// Returns the raw payload bytes.
    #[must_use]
    pub fn payload(&self) -> &Bytes {
        &self.payload
    }

    /// Returns the delivery QoS.
    #[must_use]
    pub fn qos(&self) -> Qos {
        self.qos
    }

    /// Returns whether the broker flagged the message as retained.
    #[must_use]
    pub fn retained(&self) -> bool {
        self.retained
    }

    /// Returns when the message was received.
    #[must_use]
    pub fn received_at(&self) -> SystemTime {
        self.received_at
    }

    /// Returns the subscription that first matched the message, if bound.
    #[must_use]
    pub fn subscription(&self) -> Option<SubscriptionId> {
        self.subscription.get().copied()
    }

    /// Binds the first matching subscription. Returns `false` if a
    /// subscription was already bound, in which case it is left untouched.
    pub fn bind_subscription(&self, subscription: SubscriptionId) -> bool {
        self.subscription.set(subscription).is_ok()
    }

    /// Formats the payload with `formatter`, reusing the cached text when the
    /// same formatter was applied last.
    ///
    /// # Errors
    ///
    /// Returns [`FormatError`] when the payload cannot be converted. The
    /// previously cached text, if any, is kept.
    pub fn format(&self, formatter: Formatter) -> Result<Arc<str>, FormatError> {
        if let Some(cached) = self.cached() {
            if cached.formatter == formatter {
                return Ok(cached.text);
            }
        }

        let text: Arc<str> = Arc::from(formatter.apply(&self.payload)?);
        *self.formatted.lock().unwrap_or_else(PoisonError::into_inner) = Some(FormattedPayload {
            formatter,
            text: Arc::clone(&text),
        });
        Ok(text)
    }

    /// Returns the last successfully formatted text, or the payload as lossy
    /// UTF-8 if nothing has been formatted yet.
    #[must_use]
    pub fn formatted_payload(&self) -> Arc<str> {
        self.cached().map_or_else(
            || Arc::from(String::from_utf8_lossy(&self.payload).as_ref()),
            |cached| cached.text,
        )
    }

    /// Returns the formatter that produced the cached text, if any.
    #[must_use]
    pub fn last_formatter(&self) -> Option<Formatter> {
        self.cached().map(|cached| cached.formatter)
    }

    fn cached(&self) -> Option<FormattedPayload> {
        self.formatted
            .lock()
            .unwrap_or_else(PoisonError::into_inner)
            .clone()
    }
}

/// Builder used to assemble [`MessageRecord`] instances.
#[derive(Debug, Clone)]
pub struct MessageRecordBuilder {
    topic: String,
    payload: Bytes,
    qos: Qos,
    retained: bool,
    received_at: SystemTime,
    subscription: Option<SubscriptionId>,
}

impl MessageRecordBuilder {
    /// Sets the delivery QoS.
    #[must_use]
    pub fn qos(mut self, qos: Qos) -> Self {
        self.qos = qos;
        self
    }

    /// Sets the QoS from its numeric level.
    ///
    /// # Errors
    ///
    /// Returns [`StoreError::Primitive`] when `level` is above 2.
    pub fn qos_level(self, level: u8) -> StoreResult<Self> {
        Ok(self.qos(Qos::try_from(level)?))
    }

    /// Sets the retained flag.
    #[must_use]
    pub fn retained(mut self, retained: bool) -> Self {
        self.retained = retained;
        self
    }

    /// Overrides the receive timestamp.
    #[must_use]
    pub fn received_at(mut self, received_at: SystemTime) -> Self {
        self.received_at = received_at;
        self
    }

    /// Records the subscription that first matched the message.
    #[must_use]
    pub fn subscription(mut self, subscription: SubscriptionId) -> Self {
        self.subscription = Some(subscription);
        self
    }

    /// Returns the topic the record will carry.
    #[must_use]
    pub fn topic(&self) -> &str {
        &self.topic
    }

    /// Checks the builder without consuming it.
    ///
    /// # Errors
    ///
    /// Returns [`StoreError::InvalidRecord`] when the topic is empty.
    pub fn validate(&self) -> StoreResult<()> {
        if self.topic.is_empty() {
            return Err(StoreError::InvalidRecord("message topic must not be empty"));
        }
        Ok(())
    }

    /// Finalises the builder, assigning `id`.
    ///
    /// # Errors
    ///
    /// Returns [`StoreError::InvalidRecord`] when the topic is empty.
    pub fn build(self, id: MessageId) -> StoreResult<MessageRecord> {
        self.validate()?;

        let subscription = OnceLock::new();
        if let Some(value) = self.subscription {
            let _ = subscription.set(value);
        }

        Ok(MessageRecord {
            id,
            topic: self.topic,
            payload: self.payload,
            qos: self.qos,
            retained: self.retained,
            received_at: self.received_at,
            subscription,
            formatted: Mutex::new(None),
        })
    }
}
