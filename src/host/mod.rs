//! Host-side collaborators: message transport and native windows

pub mod protocol;
pub mod stdio;

pub use protocol::HostEvent;
pub use stdio::StdioHost;

use std::path::Path;

use anyhow::Result;

use crate::channel::{EndpointId, Push};
use crate::core::config::AppConfig;

/// Delivers pushes to UI endpoints and reports where each one points
pub trait Transport {
    /// Send a push to an endpoint
    fn send(&self, endpoint: EndpointId, push: &Push) -> Result<()>;

    /// Address currently loaded by an endpoint, if known
    fn current_address(&self, endpoint: EndpointId) -> Option<String>;

    /// Record the address an endpoint moved to, or forget it on `None`.
    ///
    /// Called by the bridge while handling the host event that reported it,
    /// so requests queued before a navigation are gated on the old address.
    fn set_address(&self, endpoint: EndpointId, address: Option<&str>);
}

/// Native window operations the bridge asks the host to perform
pub trait WindowHost {
    fn create_window(&self, endpoint: EndpointId, url: &str) -> Result<()>;

    fn close_window(&self, endpoint: EndpointId) -> Result<()>;

    fn focus(&self, endpoint: EndpointId) -> Result<()>;

    /// Register a path with the OS recent documents list
    fn add_recent_document(&self, path: &Path) -> Result<()>;

    /// Answer a settings request from the settings dialog
    fn send_settings(&self, settings: &AppConfig) -> Result<()>;
}

/// Everything the bridge needs from its host
pub trait Host: Transport + WindowHost {}

impl<T: Transport + WindowHost> Host for T {}
