//! Origin-gated message channel between UI endpoints and the native process

pub mod message;

pub use message::{FileContent, Push, Request};

use std::fmt;

use serde::{Deserialize, Serialize};

use crate::core::config::AppConfig;
use crate::host::Transport;

/// Opaque handle to one UI surface
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize)]
#[serde(transparent)]
pub struct EndpointId(pub u64);

impl fmt::Display for EndpointId {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "endpoint#{}", self.0)
    }
}

/// Whether traffic for `endpoint` may pass: its current address must start
/// with the trusted origin.
pub fn admits<T: Transport + ?Sized>(transport: &T, config: &AppConfig, endpoint: EndpointId) -> bool {
    match transport.current_address(endpoint) {
        Some(address) if config.is_trusted(&address) => true,
        address => {
            tracing::debug!("Dropping traffic for {}: untrusted address {:?}", endpoint, address);
            false
        }
    }
}

/// Push a message to an endpoint if it still points at the trusted origin
pub fn deliver<T: Transport + ?Sized>(
    transport: &T,
    config: &AppConfig,
    endpoint: EndpointId,
    push: &Push,
) {
    if !admits(transport, config, endpoint) {
        return;
    }
    if let Err(e) = transport.send(endpoint, push) {
        tracing::warn!("Failed to deliver {} to {}: {:#}", push.channel(), endpoint, e);
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::cell::RefCell;
    use std::collections::HashMap;

    #[derive(Default)]
    struct FakeTransport {
        addresses: HashMap<EndpointId, String>,
        sent: RefCell<Vec<(EndpointId, Push)>>,
    }

    impl Transport for FakeTransport {
        fn send(&self, endpoint: EndpointId, push: &Push) -> anyhow::Result<()> {
            self.sent.borrow_mut().push((endpoint, push.clone()));
            Ok(())
        }

        fn current_address(&self, endpoint: EndpointId) -> Option<String> {
            self.addresses.get(&endpoint).cloned()
        }

        fn set_address(&self, _endpoint: EndpointId, _address: Option<&str>) {}
    }

    const ORIGIN: &str = "https://app.inkbridge.io";

    fn config() -> AppConfig {
        AppConfig {
            app_url: ORIGIN.to_string(),
            ..AppConfig::default()
        }
    }

    #[test]
    fn test_admits_only_trusted_prefix() {
        let mut transport = FakeTransport::default();
        transport.addresses.insert(EndpointId(1), "https://app.inkbridge.io/#/doc".into());
        transport.addresses.insert(EndpointId(2), "https://example.com/".into());

        assert!(admits(&transport, &config(), EndpointId(1)));
        assert!(!admits(&transport, &config(), EndpointId(2)));
        // No known address yet
        assert!(!admits(&transport, &config(), EndpointId(3)));
    }

    #[test]
    fn test_deliver_drops_pushes_to_untrusted_endpoints() {
        let mut transport = FakeTransport::default();
        transport.addresses.insert(EndpointId(1), ORIGIN.into());
        transport.addresses.insert(EndpointId(2), "file:///tmp/page.html".into());

        deliver(&transport, &config(), EndpointId(1), &Push::Version("1.0.0".into()));
        deliver(&transport, &config(), EndpointId(2), &Push::Version("1.0.0".into()));

        let sent = transport.sent.borrow();
        assert_eq!(sent.len(), 1);
        assert_eq!(sent[0].0, EndpointId(1));
    }
}
