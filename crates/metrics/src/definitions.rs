//! Metric name and label definitions.
//!
//! Centralizing these definitions keeps metric names consistent across the
//! connection, pipeline and dispatch code, and documents what is exported.

/// Connection lifecycle metrics
pub mod connection {
    /// Current connection state (0 connecting, 1 open, 2 closing,
    /// 3 closed-recoverable, 4 closed-terminal)
    pub const STATE: &str = "warelay_connection_state";
    /// Total number of connection attempts started
    pub const ATTEMPTS_TOTAL: &str = "warelay_connection_attempts_total";
    /// Total number of recoverable disconnects
    pub const RECONNECTS_TOTAL: &str = "warelay_connection_reconnects_total";
    /// Total number of credential rotations persisted
    pub const CREDENTIAL_WRITES_TOTAL: &str = "warelay_credential_writes_total";
    /// Total number of pairing challenges forwarded
    pub const PAIRING_CHALLENGES_TOTAL: &str = "warelay_pairing_challenges_total";
}

/// Inbound pipeline metrics
pub mod inbound {
    /// Total raw events taken from the transport queue
    pub const RECEIVED_TOTAL: &str = "warelay_inbound_received_total";
    /// Events dropped by the router (label: reason)
    pub const DROPPED_TOTAL: &str = "warelay_inbound_dropped_total";
    /// Events rejected by the allow-list or keyword filter
    pub const FILTERED_TOTAL: &str = "warelay_inbound_filtered_total";
    /// Events accepted and handed to the dispatcher
    pub const ACCEPTED_TOTAL: &str = "warelay_inbound_accepted_total";
    /// Messages whose timestamp had to be estimated
    pub const TIMESTAMP_ESTIMATED_TOTAL: &str = "warelay_inbound_timestamp_estimated_total";
}

/// Dispatch sink metrics
pub mod dispatch {
    /// Delivery attempts per sink (labels: sink, success)
    pub const DELIVERIES_TOTAL: &str = "warelay_dispatch_deliveries_total";
    /// Delivery duration per sink in seconds (label: sink)
    pub const DURATION_SECONDS: &str = "warelay_dispatch_duration_seconds";
    /// Webhook deliveries currently in flight
    pub const WEBHOOK_IN_FLIGHT: &str = "warelay_dispatch_webhook_in_flight";
}

/// Common label keys
pub mod labels {
    pub const SINK: &str = "sink";
    pub const SUCCESS: &str = "success";
    pub const REASON: &str = "reason";
    pub const KIND: &str = "kind";
}

/// Histogram bucket boundaries
pub mod buckets {
    /// Sink delivery buckets (in seconds), 1ms to 30s
    pub const DISPATCH_DURATION: &[f64] = &[
        0.001, 0.005, 0.01, 0.025, 0.05, 0.1, 0.25, 0.5, 1.0, 2.5, 5.0, 10.0, 30.0,
    ];
}
