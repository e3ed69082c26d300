//! Metrics recorder initialization and configuration.

use std::net::SocketAddr;

use tracing::info;

use crate::Result;

/// Handle describing the installed metrics exporter.
#[derive(Debug, Clone, Default)]
pub struct MetricsHandle {
    listen: Option<SocketAddr>,
}

impl MetricsHandle {
    /// Address of the Prometheus scrape endpoint, when one is serving.
    #[must_use]
    pub fn listen_addr(&self) -> Option<SocketAddr> {
        self.listen
    }
}

/// Configuration for the metrics system.
#[derive(Debug, Clone, Default)]
pub struct MetricsRecorderConfig {
    /// Whether metrics collection is enabled
    pub enabled: bool,
    /// Address the scrape endpoint binds to
    pub listen: Option<SocketAddr>,
    /// Global labels to add to all metrics
    pub global_labels: Vec<(String, String)>,
}

/// Initialize the metrics system.
///
/// Call once at startup, from inside the Tokio runtime: the Prometheus
/// exporter spawns its HTTP listener on it. Without the `prometheus` feature
/// the facade keeps its no-op recorder.
///
/// # Errors
///
/// Returns an error if the exporter cannot be built or bound.
pub fn init_metrics(config: MetricsRecorderConfig) -> Result<MetricsHandle> {
    if !config.enabled {
        info!("metrics collection is disabled");
        return Ok(MetricsHandle::default());
    }

    #[cfg(feature = "prometheus")]
    {
        let listen = config.listen.ok_or(crate::Error::MissingListenAddress)?;
        install_prometheus(listen, config.global_labels)?;
        info!(%listen, "prometheus metrics exporter listening");
        Ok(MetricsHandle {
            listen: Some(listen),
        })
    }

    #[cfg(not(feature = "prometheus"))]
    {
        info!("metrics feature not enabled at compile time");
        Ok(MetricsHandle::default())
    }
}

#[cfg(feature = "prometheus")]
fn install_prometheus(listen: SocketAddr, global_labels: Vec<(String, String)>) -> Result<()> {
    use {
        crate::{buckets, dispatch},
        metrics_exporter_prometheus::{Matcher, PrometheusBuilder},
    };

    let mut builder = PrometheusBuilder::new()
        .with_http_listener(listen)
        .set_buckets_for_metric(
            Matcher::Full(dispatch::DURATION_SECONDS.to_string()),
            buckets::DISPATCH_DURATION,
        )?;

    for (key, value) in global_labels {
        builder = builder.add_global_label(key, value);
    }

    builder.install()?;
    Ok(())
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn disabled_installs_nothing() {
        let handle = init_metrics(MetricsRecorderConfig::default()).unwrap();
        assert!(handle.listen_addr().is_none());
    }

    #[cfg(feature = "prometheus")]
    #[test]
    fn enabled_without_address_is_rejected() {
        let config = MetricsRecorderConfig {
            enabled: true,
            listen: None,
            global_labels: Vec::new(),
        };
        assert!(matches!(
            init_metrics(config),
            Err(crate::Error::MissingListenAddress)
        ));
    }
}
