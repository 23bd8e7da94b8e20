//! Newline-delimited JSON protocol spoken with the native window host

use std::path::{Path, PathBuf};

use serde::{Deserialize, Serialize};

use crate::channel::{EndpointId, Push, Request};
use crate::core::config::AppConfig;

/// Events read from the host, one JSON object per line
#[derive(Debug, Clone, PartialEq, Deserialize, Serialize)]
#[serde(tag = "event", rename_all = "camelCase")]
pub enum HostEvent {
    /// A window the host opened on its own
    WindowCreated { endpoint: EndpointId, address: String },
    /// An endpoint is loading a new address
    Navigated { endpoint: EndpointId, address: String },
    WindowClosed { endpoint: EndpointId },
    /// A request sent by the page loaded in an endpoint
    Message { endpoint: EndpointId, message: Request },
    /// Open a local file in a new window
    OpenFile { path: PathBuf },
    /// Create an empty local file and open it in a new window
    NewFile { path: PathBuf },
    NewWindow,
    /// A page asked to open a link in a new window
    OpenExternal { url: String },
    GetSettings,
    SetSettings { settings: AppConfig },
    AllWindowsClosed,
}

impl HostEvent {
    /// Parse one protocol line
    pub fn parse(line: &str) -> serde_json::Result<Self> {
        serde_json::from_str(line)
    }
}

/// Commands written to the host, one JSON object per line
#[derive(Debug, Serialize)]
#[serde(tag = "command", rename_all = "camelCase")]
pub enum HostCommand<'a> {
    Send { endpoint: EndpointId, message: &'a Push },
    CreateWindow { endpoint: EndpointId, url: &'a str },
    CloseWindow { endpoint: EndpointId },
    Focus { endpoint: EndpointId },
    AddRecentDocument { path: &'a Path },
    Settings { settings: &'a AppConfig },
}

impl HostCommand<'_> {
    /// Serialize as a single protocol line, without the trailing newline
    pub fn to_line(&self) -> serde_json::Result<String> {
        serde_json::to_string(self)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::channel::FileContent;
    use serde_json::json;

    #[test]
    fn test_parse_host_events() {
        let created = HostEvent::parse(
            r#"{"event":"windowCreated","endpoint":3,"address":"https://app.inkbridge.io"}"#,
        )
        .unwrap();
        assert_eq!(
            created,
            HostEvent::WindowCreated {
                endpoint: EndpointId(3),
                address: "https://app.inkbridge.io".to_string(),
            }
        );

        let message = HostEvent::parse(
            r#"{"event":"message","endpoint":3,"message":{"channel":"stopWatching","payload":"/tmp/a.md"}}"#,
        )
        .unwrap();
        assert_eq!(
            message,
            HostEvent::Message {
                endpoint: EndpointId(3),
                message: Request::StopWatching(PathBuf::from("/tmp/a.md")),
            }
        );

        assert_eq!(
            HostEvent::parse(r#"{"event":"allWindowsClosed"}"#).unwrap(),
            HostEvent::AllWindowsClosed
        );
    }

    #[test]
    fn test_set_settings_accepts_partial_settings() {
        let event =
            HostEvent::parse(r#"{"event":"setSettings","settings":{"app_url":"http://localhost:8080"}}"#)
                .unwrap();
        match event {
            HostEvent::SetSettings { settings } => {
                assert_eq!(settings.app_url, "http://localhost:8080");
                assert_eq!(settings.watch.reconnect_backoff_secs, 10);
            }
            other => panic!("expected setSettings, got {other:?}"),
        }
    }

    #[test]
    fn test_malformed_line_is_an_error() {
        assert!(HostEvent::parse("not json").is_err());
        assert!(HostEvent::parse(r#"{"event":"reboot"}"#).is_err());
    }

    #[test]
    fn test_command_lines() {
        let push = Push::File(FileContent {
            path: PathBuf::from("/tmp/a.md"),
            content: "X".to_string(),
        });
        let line = HostCommand::Send {
            endpoint: EndpointId(7),
            message: &push,
        }
        .to_line()
        .unwrap();
        let value: serde_json::Value = serde_json::from_str(&line).unwrap();
        assert_eq!(
            value,
            json!({
                "command": "send",
                "endpoint": 7,
                "message": { "channel": "file", "payload": { "path": "/tmp/a.md", "content": "X" } }
            })
        );

        let line = HostCommand::CreateWindow {
            endpoint: EndpointId(7),
            url: "https://app.inkbridge.io",
        }
        .to_line()
        .unwrap();
        assert_eq!(
            line,
            r#"{"command":"createWindow","endpoint":7,"url":"https://app.inkbridge.io"}"#
        );
    }
}
