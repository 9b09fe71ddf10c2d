use thiserror::Error;

use crate::encoder::Segment;

/// Whether a delivery failure is worth retrying.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ErrorClass {
    /// Retrying cannot help: bad credentials, malformed request, or a
    /// provider-reported permanent failure.
    Fatal,
    /// May succeed on retry: network failure, timeout, server-side hiccup.
    Transient,
}

/// A classified provider failure.
#[derive(Error, Debug, Clone)]
#[error("{class:?} provider error: {message}")]
pub struct ProviderError {
    pub message: String,
    pub class: ErrorClass,
}

impl ProviderError {
    pub fn fatal(message: impl Into<String>) -> Self {
        Self {
            message: message.into(),
            class: ErrorClass::Fatal,
        }
    }

    pub fn transient(message: impl Into<String>) -> Self {
        Self {
            message: message.into(),
            class: ErrorClass::Transient,
        }
    }

    pub fn is_fatal(&self) -> bool {
        self.class == ErrorClass::Fatal
    }
}

/// Declarative status-code classifier shared by provider adapters, so the
/// dispatcher itself never hard-codes per-vendor status lists.
#[derive(Debug, Clone)]
pub struct StatusClassifier {
    fatal: Vec<u16>,
    transient: Vec<u16>,
    unknown: ErrorClass,
}

impl Default for StatusClassifier {
    fn default() -> Self {
        Self {
            fatal: vec![400, 401, 403],
            transient: vec![408, 429],
            unknown: ErrorClass::Transient,
        }
    }
}

impl StatusClassifier {
    pub fn with_fatal(mut self, status: u16) -> Self {
        self.fatal.push(status);
        self
    }

    pub fn with_transient(mut self, status: u16) -> Self {
        self.transient.push(status);
        self
    }

    pub fn with_unknown(mut self, class: ErrorClass) -> Self {
        self.unknown = class;
        self
    }

    /// Classify an HTTP-equivalent status code. 5xx is always transient;
    /// unlisted codes fall back to the table's `unknown` class.
    pub fn classify(&self, status: u16) -> ErrorClass {
        if self.fatal.contains(&status) {
            ErrorClass::Fatal
        } else if self.transient.contains(&status) || (500..600).contains(&status) {
            ErrorClass::Transient
        } else {
            self.unknown
        }
    }

    pub fn error_for(&self, status: u16, message: impl Into<String>) -> ProviderError {
        ProviderError {
            message: message.into(),
            class: self.classify(status),
        }
    }
}

/// One request/response speech-to-text vendor.
///
/// Adapters own request encoding and response parsing; errors come back
/// already classified so the retry loop stays provider-agnostic.
#[async_trait::async_trait]
pub trait BatchProvider: Send + Sync {
    /// Stable identifier used for pending-queue redelivery lookup.
    fn id(&self) -> &str;

    /// Deliver one segment and return the recognized text.
    async fn transcribe(&self, segment: &Segment) -> Result<String, ProviderError>;
}
