//! Error handling for Jingle negotiation
//!
//! Every public entry point of the negotiation engine returns a
//! [`NegotiationError`]. Each variant maps onto one machine-checkable
//! [`ErrorCode`] so the signaling layer can translate failures into the
//! appropriate Jingle/XMPP reason without string matching.

use std::fmt;
use thiserror::Error;

use crate::content::PayloadFormat;

/// Result type alias for negotiation operations
pub type Result<T> = std::result::Result<T, NegotiationError>;

/// Reason code carried by every negotiation failure
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum ErrorCode {
    /// Unclassified internal failure
    General,
    /// Malformed or semantically invalid input
    IllegalArgument,
    /// Operation denied by policy
    NotEnoughPrivileges,
    /// Account must be registered first
    RegistrationRequired,
    /// Authentication with a collaborator failed
    AuthenticationFailed,
}

impl fmt::Display for ErrorCode {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            ErrorCode::General => write!(f, "general-error"),
            ErrorCode::IllegalArgument => write!(f, "illegal-argument"),
            ErrorCode::NotEnoughPrivileges => write!(f, "not-enough-privileges"),
            ErrorCode::RegistrationRequired => write!(f, "registration-required"),
            ErrorCode::AuthenticationFailed => write!(f, "authentication-failed"),
        }
    }
}

/// Errors raised while negotiating content, transport and encryption
#[derive(Error, Debug, Clone)]
pub enum NegotiationError {
    /// No local device resolved to an active content
    #[error("No active device: {message}")]
    NoActiveDevice { message: String },

    /// The offer produced no valid answer content at all
    #[error("Invalid offer: {message}")]
    InvalidOffer {
        message: String,
        remote_formats: Vec<PayloadFormat>,
    },

    /// No format is shared between the peers
    #[error("No matching format: {message}")]
    NoMatchingFormat { message: String },

    /// A transport namespace this side cannot speak
    #[error("Unsupported Jingle transport: {namespace}")]
    UnsupportedTransport { namespace: String },

    /// A content disagrees with the transport already selected for the call
    #[error("Transport mismatch: call uses {selected}, content '{content}' offered {offered}")]
    TransportMismatch {
        content: String,
        selected: String,
        offered: String,
    },

    /// The initiator never revealed its transport choice
    #[error("Transport not specified after {waited_ms}ms: the initiator is expected to specify the transport in their offer")]
    TransportNotSpecified { waited_ms: u64 },

    /// Relay channel allocation failed or returned a malformed answer
    #[error("Failed to allocate relay channel for {media}: {reason}")]
    RelayAllocation { media: String, reason: String },

    /// A directive to the relay could not be delivered
    #[error("Relay directive failed: {reason}")]
    RelayDirective { reason: String },

    /// SRTP keying setup failed
    #[error("Encryption error: {reason}")]
    Encryption { reason: String },

    /// Stream factory or stream handle failure
    #[error("Media stream error: {reason}")]
    Stream { reason: String },

    /// Operation not valid in the current negotiation state
    #[error("Invalid state: {message}")]
    InvalidState { message: String },

    /// Malformed or semantically invalid peer content
    #[error("Illegal argument: {message}")]
    IllegalArgument { message: String },

    /// Configuration could not be loaded or failed validation
    #[error("Configuration error: {message}")]
    Config { message: String },

    /// The negotiation session task is gone
    #[error("Session closed: {message}")]
    SessionClosed { message: String },

    /// Internal error
    #[error("Internal error: {message}")]
    Internal { message: String },
}

impl NegotiationError {
    /// Create a new no-active-device error
    pub fn no_active_device(message: impl Into<String>) -> Self {
        Self::NoActiveDevice {
            message: message.into(),
        }
    }

    /// Create a new invalid offer error carrying the formats the peer offered
    pub fn invalid_offer(message: impl Into<String>, remote_formats: Vec<PayloadFormat>) -> Self {
        Self::InvalidOffer {
            message: message.into(),
            remote_formats,
        }
    }

    /// Create a new no-matching-format error
    pub fn no_matching_format(message: impl Into<String>) -> Self {
        Self::NoMatchingFormat {
            message: message.into(),
        }
    }

    /// Create a new unsupported transport error
    pub fn unsupported_transport(namespace: impl Into<String>) -> Self {
        Self::UnsupportedTransport {
            namespace: namespace.into(),
        }
    }

    /// Create a new relay allocation error
    pub fn relay_allocation(media: impl fmt::Display, reason: impl Into<String>) -> Self {
        Self::RelayAllocation {
            media: media.to_string(),
            reason: reason.into(),
        }
    }

    /// Create a new relay directive error
    pub fn relay_directive(reason: impl Into<String>) -> Self {
        Self::RelayDirective {
            reason: reason.into(),
        }
    }

    /// Create a new encryption error
    pub fn encryption(reason: impl Into<String>) -> Self {
        Self::Encryption {
            reason: reason.into(),
        }
    }

    /// Create a new stream error
    pub fn stream(reason: impl Into<String>) -> Self {
        Self::Stream {
            reason: reason.into(),
        }
    }

    /// Create a new invalid state error
    pub fn invalid_state(message: impl Into<String>) -> Self {
        Self::InvalidState {
            message: message.into(),
        }
    }

    /// Create a new illegal argument error
    pub fn illegal_argument(message: impl Into<String>) -> Self {
        Self::IllegalArgument {
            message: message.into(),
        }
    }

    /// Create a new configuration error
    pub fn config(message: impl Into<String>) -> Self {
        Self::Config {
            message: message.into(),
        }
    }

    /// Create a new internal error
    pub fn internal(message: impl Into<String>) -> Self {
        Self::Internal {
            message: message.into(),
        }
    }

    /// The reason code for this failure
    pub fn code(&self) -> ErrorCode {
        match self {
            Self::InvalidOffer { .. }
            | Self::NoMatchingFormat { .. }
            | Self::UnsupportedTransport { .. }
            | Self::TransportMismatch { .. }
            | Self::IllegalArgument { .. }
            | Self::Config { .. } => ErrorCode::IllegalArgument,
            Self::NoActiveDevice { .. }
            | Self::TransportNotSpecified { .. }
            | Self::RelayAllocation { .. }
            | Self::RelayDirective { .. }
            | Self::Encryption { .. }
            | Self::Stream { .. }
            | Self::InvalidState { .. }
            | Self::SessionClosed { .. }
            | Self::Internal { .. } => ErrorCode::General,
        }
    }

    /// Whether the failure aborts the whole negotiation round
    ///
    /// Per-content problems are recovered by dropping the content; these
    /// are the ones that cannot be.
    pub fn is_fatal_for_round(&self) -> bool {
        matches!(
            self,
            Self::InvalidOffer { .. }
                | Self::NoActiveDevice { .. }
                | Self::TransportNotSpecified { .. }
                | Self::RelayAllocation { .. }
                | Self::IllegalArgument { .. }
                | Self::UnsupportedTransport { .. }
        )
    }
}

impl From<toml::de::Error> for NegotiationError {
    fn from(err: toml::de::Error) -> Self {
        Self::config(err.to_string())
    }
}

impl From<std::io::Error> for NegotiationError {
    fn from(err: std::io::Error) -> Self {
        Self::config(format!("I/O error: {}", err))
    }
}

/// Context information for an error
#[derive(Debug, Clone)]
pub struct ErrorContext {
    /// Component where the error occurred
    pub component: String,
    /// Operation that was being performed
    pub operation: String,
    /// Additional context information
    pub details: Option<String>,
}

impl ErrorContext {
    /// Create a new error context
    pub fn new<S: Into<String>, T: Into<String>>(component: S, operation: T) -> Self {
        ErrorContext {
            component: component.into(),
            operation: operation.into(),
            details: None,
        }
    }

    /// Add details to the context
    pub fn with_details<S: Into<String>>(mut self, details: S) -> Self {
        self.details = Some(details.into());
        self
    }
}

impl fmt::Display for ErrorContext {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "in component '{}' during operation '{}'", self.component, self.operation)?;
        if let Some(details) = &self.details {
            write!(f, " ({})", details)?;
        }
        Ok(())
    }
}

/// Extension trait for adding context to negotiation results
///
/// The reason code of the wrapped error is preserved; only the
/// human-readable message is extended.
pub trait ErrorExt<T> {
    /// Add context to an error
    fn context(self, ctx: ErrorContext) -> Result<T>;

    /// Add simple context with component and operation
    fn with_context<S: Into<String>, U: Into<String>>(self, component: S, operation: U) -> Result<T>;
}

impl<T> ErrorExt<T> for Result<T> {
    fn context(self, ctx: ErrorContext) -> Result<T> {
        self.map_err(|e| e.annotate(&ctx))
    }

    fn with_context<S: Into<String>, U: Into<String>>(self, component: S, operation: U) -> Result<T> {
        self.context(ErrorContext::new(component, operation))
    }
}

impl NegotiationError {
    fn annotate(self, ctx: &ErrorContext) -> Self {
        let suffix = format!(" [{}]", ctx);
        match self {
            Self::NoActiveDevice { message } => Self::NoActiveDevice { message: message + &suffix },
            Self::InvalidOffer { message, remote_formats } => Self::InvalidOffer {
                message: message + &suffix,
                remote_formats,
            },
            Self::NoMatchingFormat { message } => Self::NoMatchingFormat { message: message + &suffix },
            Self::RelayAllocation { media, reason } => Self::RelayAllocation { media, reason: reason + &suffix },
            Self::RelayDirective { reason } => Self::RelayDirective { reason: reason + &suffix },
            Self::Encryption { reason } => Self::Encryption { reason: reason + &suffix },
            Self::Stream { reason } => Self::Stream { reason: reason + &suffix },
            Self::InvalidState { message } => Self::InvalidState { message: message + &suffix },
            Self::IllegalArgument { message } => Self::IllegalArgument { message: message + &suffix },
            Self::Config { message } => Self::Config { message: message + &suffix },
            Self::SessionClosed { message } => Self::SessionClosed { message: message + &suffix },
            Self::Internal { message } => Self::Internal { message: message + &suffix },
            other => other,
        }
    }
}
