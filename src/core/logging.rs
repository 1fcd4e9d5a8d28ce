// ! Structured logging for vibe sockets
// !
// ! Module provides structured error logging with categorization,
// ! context preservation, and integration with the metrics system.

use serde_json::{Value, json};
use std::collections::HashMap;
use tracing::{error, info, warn};

use crate::core::error::VibeError;
use crate::core::metrics::global_metrics;

/// Log level for error reporting
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ErrorLogLevel {
    /// Critical errors that require immediate attention
    Critical,
    /// Errors that affect functionality but system can continue
    Error,
    /// Warnings about potential issues
    Warning,
    /// Informational error context
    Info,
}

impl From<&VibeError> for ErrorLogLevel {
    fn from(error: &VibeError) -> Self {
        match error {
            VibeError::Internal(_) => ErrorLogLevel::Critical,

            VibeError::Transport(_)
            | VibeError::Protocol(_)
            | VibeError::Serialization(_)
            | VibeError::MalformedFrame(_)
            | VibeError::NegotiationExhausted(_)
            | VibeError::HeartbeatFailure(_) => ErrorLogLevel::Error,

            VibeError::Connection(_)
            | VibeError::ConnectTimeout(_)
            | VibeError::TransportSendFailure(_)
            | VibeError::Timeout(_)
            | VibeError::Io(_) => ErrorLogLevel::Warning,

            #[cfg(feature = "client")]
            VibeError::Http(_) | VibeError::WebSocket(_) => ErrorLogLevel::Warning,

            VibeError::InvalidUri(_)
            | VibeError::Url(_)
            | VibeError::Configuration(_)
            | VibeError::UnknownSocket(_)
            | VibeError::UnsupportedTransport(_)
            | VibeError::SocketClosed(_)
            | VibeError::Rejected(_)
            | VibeError::Cancelled(_) => ErrorLogLevel::Info,
        }
    }
}

/// Extended error context for logging
#[derive(Debug, Clone)]
pub struct ErrorContext {
    /// Operation being performed when error occurred
    pub operation: String,
    /// Transport name (ws, stream, longpoll)
    pub transport: Option<String>,
    /// Socket or transport instance id
    pub socket_id: Option<String>,
    /// Event type being handled, if any
    pub event_type: Option<String>,
    /// Additional context data
    pub extra: HashMap<String, Value>,
}

impl Default for ErrorContext {
    fn default() -> Self {
        Self {
            operation: "unknown".to_string(),
            transport: None,
            socket_id: None,
            event_type: None,
            extra: HashMap::new(),
        }
    }
}

impl ErrorContext {
    /// Create a new error context
    pub fn new(operation: impl Into<String>) -> Self {
        Self {
            operation: operation.into(),
            ..Default::default()
        }
    }

    /// Set transport name
    pub fn with_transport(mut self, transport: impl Into<String>) -> Self {
        self.transport = Some(transport.into());
        self
    }

    /// Set socket id
    pub fn with_socket_id(mut self, socket_id: impl Into<String>) -> Self {
        self.socket_id = Some(socket_id.into());
        self
    }

    /// Set event type
    pub fn with_event_type(mut self, event_type: impl Into<String>) -> Self {
        self.event_type = Some(event_type.into());
        self
    }

    /// Add extra context data
    pub fn with_extra(mut self, key: impl Into<String>, value: impl Into<Value>) -> Self {
        self.extra.insert(key.into(), value.into());
        self
    }
}

/// Error logging with metrics integration
pub struct ErrorLogger;

impl ErrorLogger {
    /// Log an error with full context and metrics
    pub fn log_error(error: &VibeError, context: ErrorContext) {
        let category = error.category();
        let recoverable = error.is_recoverable();

        global_metrics().record_error(error, &context.operation);

        let log_data = json!({
            "error_category": category,
            "error_recoverable": recoverable,
            "error_message": error.to_string(),
            "operation": context.operation,
            "transport": context.transport,
            "socket_id": context.socket_id,
            "event_type": context.event_type,
            "extra_context": context.extra,
        });
        let log_data = serde_json::to_string(&log_data).unwrap_or_default();

        match ErrorLogLevel::from(error) {
            ErrorLogLevel::Critical => error!(
                target: "vibe_errors",
                error_category = category,
                error_recoverable = recoverable,
                operation = context.operation.as_str(),
                "CRITICAL vibe error: {} - {}",
                error,
                log_data
            ),
            ErrorLogLevel::Error => error!(
                target: "vibe_errors",
                error_category = category,
                error_recoverable = recoverable,
                operation = context.operation.as_str(),
                "vibe error: {} - {}",
                error,
                log_data
            ),
            ErrorLogLevel::Warning => warn!(
                target: "vibe_errors",
                error_category = category,
                error_recoverable = recoverable,
                operation = context.operation.as_str(),
                "vibe warning: {} - {}",
                error,
                log_data
            ),
            ErrorLogLevel::Info => info!(
                target: "vibe_errors",
                error_category = category,
                error_recoverable = recoverable,
                operation = context.operation.as_str(),
                "vibe info: {} - {}",
                error,
                log_data
            ),
        }
    }

    /// Log a retry attempt with context
    pub fn log_retry_attempt(
        error: &VibeError,
        attempt: u32,
        max_attempts: Option<u32>,
        will_retry: bool,
        context: &ErrorContext,
    ) {
        let category = error.category();
        global_metrics().record_retry_attempt(&context.operation, attempt, category, will_retry);

        let max = max_attempts.map_or_else(|| "unbounded".to_string(), |m| m.to_string());

        if will_retry {
            warn!(
                target: "vibe_retries",
                error_category = category,
                retry_attempt = attempt,
                operation = context.operation.as_str(),
                socket_id = context.socket_id.as_deref(),
                "Retry attempt {}/{}: {}",
                attempt,
                max,
                error
            );
        } else {
            error!(
                target: "vibe_retries",
                error_category = category,
                retry_attempt = attempt,
                operation = context.operation.as_str(),
                socket_id = context.socket_id.as_deref(),
                "Retry failed (final) after {} attempts: {}",
                attempt,
                error
            );
        }
    }

    /// Log successful recovery after retries
    pub fn log_retry_success(total_attempts: u32, context: &ErrorContext) {
        global_metrics().record_retry_attempt(&context.operation, total_attempts, "success", false);

        info!(
            target: "vibe_retries",
            operation = context.operation.as_str(),
            total_attempts = total_attempts,
            "Operation '{}' succeeded after {} attempts",
            context.operation,
            total_attempts
        );
    }
}

impl VibeError {
    /// Log this error with structured context
    pub fn log_with_context(&self, context: ErrorContext) {
        ErrorLogger::log_error(self, context);
    }

    /// Log this error with basic context
    pub fn log_error(&self, operation: &str) {
        ErrorLogger::log_error(self, ErrorContext::new(operation));
    }
}

/// Install a `tracing` fmt subscriber honouring `RUST_LOG`, falling back to `default_filter`.
///
/// Returns `false` when a global subscriber was already installed.
#[cfg(feature = "tracing-subscriber")]
pub fn init_tracing(default_filter: &str) -> bool {
    use tracing_subscriber::EnvFilter;

    let filter =
        EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new(default_filter));
    tracing_subscriber::fmt()
        .with_env_filter(filter)
        .try_init()
        .is_ok()
}
