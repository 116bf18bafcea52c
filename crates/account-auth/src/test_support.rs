//! Shared fixtures for unit tests

use std::sync::Arc;
use std::time::Duration;

use transport::{HttpTransport, Transport, TransportConfig};

/// Transport that fails fast: no retries, short timeouts.
pub fn http_transport() -> Arc<HttpTransport> {
    Arc::new(
        HttpTransport::new(TransportConfig {
            connect_timeout: Duration::from_secs(2),
            timeout: Duration::from_secs(5),
            max_retry: 0,
            retry_delay: Duration::ZERO,
            headers: Vec::new(),
        })
        .unwrap(),
    )
}

pub fn transport() -> Arc<dyn Transport> {
    http_transport()
}
