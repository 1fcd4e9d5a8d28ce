// ! Metrics collection for vibe sockets
// !
// ! Module provides structured counters for errors, connection attempts,
// ! message traffic and retries, readable as a snapshot for diagnostics.

use std::collections::HashMap;
use std::sync::atomic::{AtomicU64, Ordering};
use std::sync::{Arc, PoisonError, RwLock};
use tracing::{debug, warn};

use crate::core::error::VibeError;

type CounterMap = Arc<RwLock<HashMap<String, AtomicU64>>>;

/// Metrics collector for socket and transport operations
#[derive(Debug, Clone, Default)]
pub struct MetricsCollector {
    /// Error counters by category and recoverability
    error_counters: CounterMap,
    /// Message counters by transport and direction
    message_counters: CounterMap,
    /// Connection attempt counters
    connection_counters: CounterMap,
    /// Retry attempt counters
    retry_counters: CounterMap,
}

impl MetricsCollector {
    /// Create a new metrics collector
    pub fn new() -> Self {
        Self::default()
    }

    /// Record an error occurrence
    pub fn record_error(&self, error: &VibeError, context: &str) {
        let category = error.category();
        let recoverable = error.is_recoverable();

        let key = format!(
            "vibe_errors_total:category={category}:recoverable={recoverable}:context={context}"
        );
        Self::increment(&self.error_counters, &key);

        let category_key = format!("vibe_errors_by_category:{category}");
        Self::increment(&self.error_counters, &category_key);

        debug!(
            target: "vibe_metrics",
            error_category = category,
            error_recoverable = recoverable,
            error_context = context,
            "Error recorded in metrics"
        );
    }

    /// Record a frame crossing a transport
    pub fn record_message(&self, transport: &str, direction: &str) {
        let key = format!("vibe_messages_total:transport={transport}:direction={direction}");
        Self::increment(&self.message_counters, &key);
    }

    /// Record a connection attempt
    pub fn record_connection_attempt(&self, transport: &str, success: bool) {
        let key = format!("vibe_connections_total:transport={transport}:success={success}");
        Self::increment(&self.connection_counters, &key);

        debug!(
            target: "vibe_metrics",
            transport_type = transport,
            connection_success = success,
            "Connection attempt recorded in metrics"
        );
    }

    /// Record a retry attempt
    pub fn record_retry_attempt(
        &self,
        operation: &str,
        attempt: u32,
        error_category: &str,
        will_retry: bool,
    ) {
        let key = format!(
            "vibe_retries_total:operation={operation}:attempt={attempt}:error_category={error_category}:will_retry={will_retry}"
        );
        Self::increment(&self.retry_counters, &key);
    }

    /// Get current error metrics
    pub fn error_metrics(&self) -> HashMap<String, u64> {
        Self::snapshot(&self.error_counters)
    }

    /// Get current message metrics
    pub fn message_metrics(&self) -> HashMap<String, u64> {
        Self::snapshot(&self.message_counters)
    }

    /// Get current connection metrics
    pub fn connection_metrics(&self) -> HashMap<String, u64> {
        Self::snapshot(&self.connection_counters)
    }

    /// Get current retry metrics
    pub fn retry_metrics(&self) -> HashMap<String, u64> {
        Self::snapshot(&self.retry_counters)
    }

    /// Get all metrics
    pub fn all_metrics(&self) -> MetricsSummary {
        MetricsSummary {
            errors: self.error_metrics(),
            messages: self.message_metrics(),
            connections: self.connection_metrics(),
            retries: self.retry_metrics(),
        }
    }

    /// Reset all metrics (useful for testing)
    pub fn reset(&self) {
        for counters in [
            &self.error_counters,
            &self.message_counters,
            &self.connection_counters,
            &self.retry_counters,
        ] {
            counters
                .write()
                .unwrap_or_else(PoisonError::into_inner)
                .clear();
        }

        warn!(target: "vibe_metrics", "Metrics collector reset");
    }

    fn increment(counters: &CounterMap, key: &str) {
        // Fast path: the counter usually exists already
        {
            let guard = counters.read().unwrap_or_else(PoisonError::into_inner);
            if let Some(counter) = guard.get(key) {
                counter.fetch_add(1, Ordering::Relaxed);
                return;
            }
        }

        let mut guard = counters.write().unwrap_or_else(PoisonError::into_inner);
        guard
            .entry(key.to_string())
            .or_insert_with(|| AtomicU64::new(0))
            .fetch_add(1, Ordering::Relaxed);
    }

    fn snapshot(counters: &CounterMap) -> HashMap<String, u64> {
        counters
            .read()
            .unwrap_or_else(PoisonError::into_inner)
            .iter()
            .map(|(k, v)| (k.clone(), v.load(Ordering::Relaxed)))
            .collect()
    }
}

/// Summary of all metrics
#[derive(Debug, Clone)]
pub struct MetricsSummary {
    pub errors: HashMap<String, u64>,
    pub messages: HashMap<String, u64>,
    pub connections: HashMap<String, u64>,
    pub retries: HashMap<String, u64>,
}

/// Global metrics collector instance
static GLOBAL_METRICS: once_cell::sync::Lazy<MetricsCollector> =
    once_cell::sync::Lazy::new(MetricsCollector::new);

/// Get the global metrics collector
pub fn global_metrics() -> &'static MetricsCollector {
    &GLOBAL_METRICS
}
