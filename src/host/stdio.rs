//! Stdio host adapter
//!
//! The native window shell spawns this process and exchanges
//! newline-delimited JSON on stdin/stdout:
//! - each inbound line is one [`HostEvent`]
//! - each outbound line is one [`HostCommand`]
//!
//! Logging goes to stderr so it never interleaves with protocol lines.

use std::cell::RefCell;
use std::collections::HashMap;
use std::path::Path;

use anyhow::{Context, Result};
use tokio::io::{AsyncBufRead, AsyncBufReadExt, AsyncWriteExt, BufReader};
use tokio::sync::mpsc::{self, UnboundedReceiver, UnboundedSender};

use super::protocol::{HostCommand, HostEvent};
use super::{Transport, WindowHost};
use crate::channel::{EndpointId, Push};
use crate::core::config::AppConfig;

/// Host reached over this process's stdin and stdout
pub struct StdioHost {
    lines: UnboundedSender<String>,
    /// Last address of every endpoint, as applied by the bridge
    addresses: RefCell<HashMap<EndpointId, String>>,
}

impl StdioHost {
    /// Spawn the stdin reader and stdout writer tasks.
    ///
    /// The returned receiver yields host events until stdin closes.
    pub fn start() -> (Self, UnboundedReceiver<HostEvent>) {
        let (events_tx, events_rx) = mpsc::unbounded_channel();
        let (lines_tx, lines_rx) = mpsc::unbounded_channel();

        tokio::spawn(async move {
            let stdin = BufReader::new(tokio::io::stdin());
            if let Err(e) = read_events(stdin, events_tx).await {
                tracing::error!("Host reader stopped: {:#}", e);
            }
        });
        tokio::spawn(async move {
            if let Err(e) = write_lines(lines_rx).await {
                tracing::error!("Host writer stopped: {:#}", e);
            }
        });

        (
            Self {
                lines: lines_tx,
                addresses: RefCell::default(),
            },
            events_rx,
        )
    }

    fn write(&self, command: HostCommand<'_>) -> Result<()> {
        let line = command.to_line().context("Failed to serialize host command")?;
        self.lines
            .send(line)
            .map_err(|_| anyhow::anyhow!("Host writer is closed"))
    }
}

/// Forward host events in arrival order. Address bookkeeping is left to the
/// bridge so it stays in step with the events that precede it.
async fn read_events<R>(reader: R, events: UnboundedSender<HostEvent>) -> Result<()>
where
    R: AsyncBufRead + Unpin,
{
    let mut lines = reader.lines();
    while let Some(line) = lines
        .next_line()
        .await
        .context("Failed to read from stdin")?
    {
        let line = line.trim();
        if line.is_empty() {
            continue;
        }
        let event = match HostEvent::parse(line) {
            Ok(event) => event,
            Err(e) => {
                tracing::warn!("Skipping malformed host line: {}", e);
                continue;
            }
        };
        if events.send(event).is_err() {
            break;
        }
    }
    tracing::info!("Host closed stdin");
    Ok(())
}

async fn write_lines(mut lines: UnboundedReceiver<String>) -> Result<()> {
    let mut stdout = tokio::io::stdout();
    while let Some(line) = lines.recv().await {
        stdout
            .write_all(line.as_bytes())
            .await
            .context("Failed to write to stdout")?;
        stdout.write_all(b"\n").await?;
        stdout.flush().await.context("Failed to flush stdout")?;
    }
    Ok(())
}

impl Transport for StdioHost {
    fn send(&self, endpoint: EndpointId, push: &Push) -> Result<()> {
        self.write(HostCommand::Send {
            endpoint,
            message: push,
        })
    }

    fn current_address(&self, endpoint: EndpointId) -> Option<String> {
        self.addresses.borrow().get(&endpoint).cloned()
    }

    fn set_address(&self, endpoint: EndpointId, address: Option<&str>) {
        let mut addresses = self.addresses.borrow_mut();
        match address {
            Some(address) => {
                addresses.insert(endpoint, address.to_string());
            }
            None => {
                addresses.remove(&endpoint);
            }
        }
    }
}

impl WindowHost for StdioHost {
    fn create_window(&self, endpoint: EndpointId, url: &str) -> Result<()> {
        self.write(HostCommand::CreateWindow { endpoint, url })
    }

    fn close_window(&self, endpoint: EndpointId) -> Result<()> {
        self.write(HostCommand::CloseWindow { endpoint })
    }

    fn focus(&self, endpoint: EndpointId) -> Result<()> {
        self.write(HostCommand::Focus { endpoint })
    }

    fn add_recent_document(&self, path: &Path) -> Result<()> {
        self.write(HostCommand::AddRecentDocument { path })
    }

    fn send_settings(&self, settings: &AppConfig) -> Result<()> {
        self.write(HostCommand::Settings { settings })
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::channel::Request;

    fn host() -> (StdioHost, UnboundedReceiver<String>) {
        let (lines_tx, lines_rx) = mpsc::unbounded_channel();
        let host = StdioHost {
            lines: lines_tx,
            addresses: RefCell::default(),
        };
        (host, lines_rx)
    }

    #[test]
    fn test_addresses_follow_bridge_updates() {
        let (host, _lines) = host();
        let endpoint = EndpointId(4);
        assert_eq!(host.current_address(endpoint), None);

        host.set_address(endpoint, Some("https://app.inkbridge.io"));
        assert_eq!(
            host.current_address(endpoint).as_deref(),
            Some("https://app.inkbridge.io")
        );

        host.set_address(endpoint, Some("https://example.com/"));
        assert_eq!(host.current_address(endpoint).as_deref(), Some("https://example.com/"));

        host.set_address(endpoint, None);
        assert_eq!(host.current_address(endpoint), None);
    }

    #[tokio::test]
    async fn test_reader_forwards_events_in_order() {
        let input = concat!(
            r#"{"event":"windowCreated","endpoint":1,"address":"https://evil.example/"}"#,
            "\n",
            "garbage\n",
            "\n",
            r#"{"event":"message","endpoint":1,"message":{"channel":"getVersion"}}"#,
            "\n",
            r#"{"event":"navigated","endpoint":1,"address":"https://app.inkbridge.io/"}"#,
            "\n",
        );
        let (events_tx, mut events_rx) = mpsc::unbounded_channel();
        read_events(input.as_bytes(), events_tx).await.unwrap();

        let mut events = Vec::new();
        while let Ok(event) = events_rx.try_recv() {
            events.push(event);
        }
        assert_eq!(
            events,
            vec![
                HostEvent::WindowCreated {
                    endpoint: EndpointId(1),
                    address: "https://evil.example/".to_string(),
                },
                HostEvent::Message {
                    endpoint: EndpointId(1),
                    message: Request::GetVersion,
                },
                HostEvent::Navigated {
                    endpoint: EndpointId(1),
                    address: "https://app.inkbridge.io/".to_string(),
                },
            ]
        );
    }

    #[tokio::test]
    async fn test_commands_queue_as_lines() {
        let (host, mut lines_rx) = host();

        host.focus(EndpointId(2)).unwrap();
        host.send(EndpointId(2), &Push::Version("0.1.0".to_string()))
            .unwrap();

        assert_eq!(
            lines_rx.recv().await.unwrap(),
            r#"{"command":"focus","endpoint":2}"#
        );
        assert_eq!(
            lines_rx.recv().await.unwrap(),
            r#"{"command":"send","endpoint":2,"message":{"channel":"version","payload":"0.1.0"}}"#
        );
    }
}
