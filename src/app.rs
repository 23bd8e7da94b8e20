//! Bridge coordinator: owns every endpoint session and runs the event loop
//!
//! All state lives on one logical thread. File reads, writes and observer
//! backoffs run as spawned tasks and report back through the internal event
//! channel, each completion tagged with the endpoint and watch context it
//! was issued for.

use std::collections::HashMap;
use std::ops::ControlFlow;
use std::path::PathBuf;

use anyhow::Result;
use tokio::sync::mpsc::{self, UnboundedReceiver, UnboundedSender};

use crate::channel::{self, EndpointId, FileContent, Push, Request};
use crate::core::config::AppConfig;
use crate::core::error::SyncError;
use crate::core::observer::{ChangeSink, ObserverFactory, ObserverSignal};
use crate::core::watch::{self, ContextId, Observation, WatchContext};
use crate::host::{Host, HostEvent};

/// Version reported to endpoints on handshake
pub const VERSION: &str = env!("CARGO_PKG_VERSION");

/// Endpoint ids the bridge assigns start here, clear of host-assigned ids
const FIRST_BRIDGE_ENDPOINT: u64 = 1 << 32;

/// Work deferred until an endpoint has completed its handshake
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum PendingAction {
    OpenFile(PathBuf),
    NewFile(PathBuf),
}

/// Per-endpoint binding
#[derive(Default)]
struct Session {
    ready: bool,
    watch: Option<WatchContext>,
    pending: Vec<PendingAction>,
}

impl Session {
    /// Drop the current binding; pending actions survive for the next page
    fn rebind(&mut self) {
        if let Some(mut ctx) = self.watch.take() {
            ctx.release();
        }
        self.ready = false;
    }

    /// The bound context, if it is the one `context` refers to
    fn context_mut(&mut self, context: ContextId) -> Option<&mut WatchContext> {
        self.watch.as_mut().filter(|ctx| ctx.id() == context)
    }
}

/// Completions and signals fed back into the coordinator
#[derive(Debug)]
pub enum Event {
    ReadCompleted {
        endpoint: EndpointId,
        context: ContextId,
        result: Result<String, SyncError>,
    },
    WriteCompleted {
        endpoint: EndpointId,
        context: ContextId,
        result: Result<(), SyncError>,
    },
    FileCreated {
        endpoint: EndpointId,
        path: PathBuf,
        result: Result<(), SyncError>,
    },
    Observer {
        endpoint: EndpointId,
        context: ContextId,
        signal: ObserverSignal,
    },
    Reconnect {
        endpoint: EndpointId,
        context: ContextId,
    },
}

/// Process-wide coordinator
pub struct Bridge<H: Host> {
    config: AppConfig,
    config_path: Option<PathBuf>,
    host: H,
    observers: Box<dyn ObserverFactory>,
    sessions: HashMap<EndpointId, Session>,
    events_tx: UnboundedSender<Event>,
    events_rx: UnboundedReceiver<Event>,
    next_context: u64,
    next_endpoint: u64,
    applying_settings: bool,
}

impl<H: Host> Bridge<H> {
    /// Create a new bridge
    pub fn new(config: AppConfig, host: H, observers: Box<dyn ObserverFactory>) -> Self {
        let (events_tx, events_rx) = mpsc::unbounded_channel();
        Self {
            config,
            config_path: None,
            host,
            observers,
            sessions: HashMap::new(),
            events_tx,
            events_rx,
            next_context: 0,
            next_endpoint: FIRST_BRIDGE_ENDPOINT,
            applying_settings: false,
        }
    }

    /// Persist settings changes to this file
    pub fn with_config_path(mut self, path: Option<PathBuf>) -> Self {
        self.config_path = path;
        self
    }

    #[cfg(test)]
    pub fn host(&self) -> &H {
        &self.host
    }

    /// Run until the host closes or every window is gone
    pub async fn run(mut self, mut host_events: UnboundedReceiver<HostEvent>) -> Result<()> {
        loop {
            tokio::select! {
                biased;
                Some(event) = self.events_rx.recv() => self.handle(event),
                next = host_events.recv() => match next {
                    Some(event) => {
                        if self.handle_host(event).is_break() {
                            break;
                        }
                    }
                    None => break,
                },
            }
        }

        for (_, mut session) in self.sessions.drain() {
            session.rebind();
        }
        tracing::info!("Bridge stopped");
        Ok(())
    }

    /// Open a window on the trusted origin, optionally with work to do once
    /// its page is ready
    pub fn open_window(&mut self, pending: Option<PendingAction>) -> EndpointId {
        let endpoint = EndpointId(self.next_endpoint);
        self.next_endpoint += 1;

        let session = Session {
            pending: pending.into_iter().collect(),
            ..Session::default()
        };
        self.sessions.insert(endpoint, session);
        tracing::info!("Opening window {}", endpoint);
        if let Err(e) = self.host.create_window(endpoint, &self.config.app_url) {
            tracing::warn!("Failed to create window {}: {:#}", endpoint, e);
        }
        endpoint
    }

    /// Handle an event coming from the host
    pub fn handle_host(&mut self, event: HostEvent) -> ControlFlow<()> {
        match event {
            HostEvent::WindowCreated { endpoint, address } => {
                self.host.set_address(endpoint, Some(address.as_str()));
                if !self.sessions.contains_key(&endpoint) {
                    tracing::info!("Window created: {}", endpoint);
                    self.sessions.insert(endpoint, Session::default());
                }
            }
            HostEvent::Navigated { endpoint, address } => {
                self.host.set_address(endpoint, Some(address.as_str()));
                if let Some(session) = self.sessions.get_mut(&endpoint) {
                    tracing::debug!("{} navigated, rebinding", endpoint);
                    session.rebind();
                }
            }
            HostEvent::WindowClosed { endpoint } => {
                self.host.set_address(endpoint, None);
                if let Some(mut session) = self.sessions.remove(&endpoint) {
                    tracing::info!("Window closed: {}", endpoint);
                    session.rebind();
                }
            }
            HostEvent::Message { endpoint, message } => self.on_request(endpoint, message),
            HostEvent::OpenFile { path } => {
                self.open_window(Some(PendingAction::OpenFile(path)));
            }
            HostEvent::NewFile { path } => {
                self.open_window(Some(PendingAction::NewFile(path)));
            }
            HostEvent::NewWindow => {
                self.open_window(None);
            }
            HostEvent::OpenExternal { url } => {
                tracing::info!("Opening external link: {}", url);
                if let Err(e) = open::that(&url) {
                    tracing::warn!("Failed to open {}: {}", url, e);
                }
            }
            HostEvent::GetSettings => {
                if let Err(e) = self.host.send_settings(&self.config) {
                    tracing::warn!("Failed to send settings: {:#}", e);
                }
            }
            HostEvent::SetSettings { settings } => self.apply_settings(settings),
            HostEvent::AllWindowsClosed => {
                if !self.applying_settings {
                    return ControlFlow::Break(());
                }
                self.applying_settings = false;
                self.open_window(None);
            }
        }
        ControlFlow::Continue(())
    }

    /// Handle an internal completion or observer signal
    pub fn handle(&mut self, event: Event) {
        match event {
            Event::ReadCompleted {
                endpoint,
                context,
                result,
            } => self.on_read(endpoint, context, result),
            Event::WriteCompleted {
                endpoint,
                context,
                result,
            } => self.on_write(endpoint, context, result),
            Event::FileCreated {
                endpoint,
                path,
                result,
            } => match result {
                Ok(()) => self.open_file(endpoint, path),
                Err(e) => self.deliver(endpoint, &Push::Error(e.to_string())),
            },
            Event::Observer {
                endpoint,
                context,
                signal,
            } => self.on_signal(endpoint, context, signal),
            Event::Reconnect { endpoint, context } => self.on_reconnect(endpoint, context),
        }
    }

    fn on_request(&mut self, endpoint: EndpointId, request: Request) {
        if !channel::admits(&self.host, &self.config, endpoint) {
            return;
        }
        if !self.sessions.contains_key(&endpoint) {
            tracing::debug!("Ignoring request from unknown {}", endpoint);
            return;
        }

        match request {
            Request::GetVersion => self.on_ready(endpoint),
            Request::StartWatching(path) => self.watch(endpoint, path),
            Request::StopWatching(path) => self.unwatch(endpoint, &path),
            Request::SaveFile(file) => self.save(endpoint, file),
        }
    }

    fn on_ready(&mut self, endpoint: EndpointId) {
        self.deliver(endpoint, &Push::Version(VERSION.to_string()));

        let Some(session) = self.sessions.get_mut(&endpoint) else {
            return;
        };
        if session.ready {
            return;
        }
        session.ready = true;
        let pending = std::mem::take(&mut session.pending);
        tracing::debug!("{} ready, {} pending action(s)", endpoint, pending.len());

        for action in pending {
            match action {
                PendingAction::OpenFile(path) => self.open_file(endpoint, path),
                PendingAction::NewFile(path) => {
                    let tx = self.events_tx.clone();
                    tokio::spawn(async move {
                        let result = watch::write_text(&path, "").await;
                        let _ = tx.send(Event::FileCreated {
                            endpoint,
                            path,
                            result,
                        });
                    });
                }
            }
        }
    }

    fn open_file(&mut self, endpoint: EndpointId, path: PathBuf) {
        if !self.sessions.contains_key(&endpoint) {
            return;
        }
        self.watch(endpoint, path.clone());
        if let Err(e) = self.host.focus(endpoint) {
            tracing::warn!("Failed to focus {}: {:#}", endpoint, e);
        }

        self.config.add_recent_file(path.clone());
        if let Some(config_path) = &self.config_path {
            if let Err(e) = self.config.save_to(config_path) {
                tracing::warn!("Failed to save recent files: {:#}", e);
            }
        }
        if let Err(e) = self.host.add_recent_document(&path) {
            tracing::warn!("Failed to add recent document: {:#}", e);
        }
    }

    /// Bind a fresh watch context for `path`, releasing the previous one
    pub fn watch(&mut self, endpoint: EndpointId, path: PathBuf) {
        if !self.sessions.contains_key(&endpoint) {
            return;
        }
        self.next_context += 1;
        let id = ContextId(self.next_context);
        let mut ctx = WatchContext::new(id, path.clone(), self.observers.create());
        let sink = self.sink(endpoint, id);

        let Some(session) = self.sessions.get_mut(&endpoint) else {
            return;
        };
        if let Some(mut old) = session.watch.take() {
            old.release();
        }
        let started = ctx.start(sink);
        if let Err(e) = &started {
            tracing::warn!("{:#}", e);
            ctx.suspend();
        }
        session.watch = Some(ctx);

        if started.is_err() {
            self.schedule_reconnect(endpoint, id);
        }
        self.spawn_read(endpoint, id, path);
    }

    /// Release the active watch if it is on `path`
    pub fn unwatch(&mut self, endpoint: EndpointId, path: &std::path::Path) {
        let Some(ctx) = self
            .sessions
            .get_mut(&endpoint)
            .and_then(|session| session.watch.as_mut())
        else {
            return;
        };
        if ctx.path() == path {
            ctx.release();
        }
    }

    /// Persist content from the UI if it targets the active watch and is new
    pub fn save(&mut self, endpoint: EndpointId, file: FileContent) {
        let Some(ctx) = self
            .sessions
            .get_mut(&endpoint)
            .and_then(|session| session.watch.as_mut())
        else {
            tracing::debug!("Ignoring save for {}: nothing watched", file.path.display());
            return;
        };
        if !ctx.accept_save(&file.path, &file.content) {
            return;
        }

        let context = ctx.id();
        let tx = self.events_tx.clone();
        tokio::spawn(async move {
            let result = watch::write_text(&file.path, &file.content).await;
            let _ = tx.send(Event::WriteCompleted {
                endpoint,
                context,
                result,
            });
        });
    }

    fn on_read(&mut self, endpoint: EndpointId, context: ContextId, result: Result<String, SyncError>) {
        let Some(ctx) = self
            .sessions
            .get_mut(&endpoint)
            .and_then(|session| session.context_mut(context))
            .filter(|ctx| ctx.is_watching())
        else {
            tracing::debug!("Discarding stale read for {} ({})", endpoint, context);
            return;
        };

        let push = match ctx.observe(result) {
            Observation::Unchanged => {
                tracing::debug!("{} unchanged", ctx.path().display());
                return;
            }
            Observation::Changed(content) => Push::File(FileContent {
                path: ctx.path().to_path_buf(),
                content,
            }),
            Observation::Failed(e) => {
                tracing::debug!("Read of {} failed: {}", e.path().display(), e);
                Push::Error(e.to_string())
            }
        };
        self.deliver(endpoint, &push);
    }

    fn on_write(&mut self, endpoint: EndpointId, context: ContextId, result: Result<(), SyncError>) {
        let Err(e) = result else {
            return;
        };
        let current = self
            .sessions
            .get_mut(&endpoint)
            .and_then(|session| session.context_mut(context))
            .is_some();
        if current {
            self.deliver(endpoint, &Push::Error(e.to_string()));
        } else {
            tracing::warn!("Write to {} failed after its watch ended: {}", e.path().display(), e);
        }
    }

    fn on_signal(&mut self, endpoint: EndpointId, context: ContextId, signal: ObserverSignal) {
        let Some(ctx) = self
            .sessions
            .get_mut(&endpoint)
            .and_then(|session| session.context_mut(context))
            .filter(|ctx| ctx.is_watching())
        else {
            return;
        };

        match signal {
            ObserverSignal::Changed => {
                let path = ctx.path().to_path_buf();
                self.spawn_read(endpoint, context, path);
            }
            ObserverSignal::Failed(reason) => {
                tracing::warn!("Watcher for {} failed: {}", ctx.path().display(), reason);
                if ctx.suspend() {
                    self.schedule_reconnect(endpoint, context);
                }
            }
        }
    }

    fn on_reconnect(&mut self, endpoint: EndpointId, context: ContextId) {
        let sink = self.sink(endpoint, context);
        let Some(ctx) = self
            .sessions
            .get_mut(&endpoint)
            .and_then(|session| session.context_mut(context))
            .filter(|ctx| ctx.is_watching())
        else {
            return;
        };

        match ctx.reconnect(sink) {
            Ok(()) => {
                tracing::info!("Reconnected watcher for {}", ctx.path().display());
                // Catch up on anything that changed while disconnected
                let path = ctx.path().to_path_buf();
                self.spawn_read(endpoint, context, path);
            }
            Err(e) => {
                tracing::warn!("{:#}", e);
                if ctx.suspend() {
                    self.schedule_reconnect(endpoint, context);
                }
            }
        }
    }

    fn apply_settings(&mut self, settings: AppConfig) {
        // Recent files are not part of the settings dialog
        let recent_files = std::mem::take(&mut self.config.recent_files);
        self.config = AppConfig {
            recent_files,
            ..settings
        };
        self.observers.reconfigure(&self.config.watch);
        if let Some(config_path) = &self.config_path {
            if let Err(e) = self.config.save_to(config_path) {
                tracing::warn!("Failed to save settings: {:#}", e);
            }
        }

        self.applying_settings = true;
        let endpoints: Vec<EndpointId> = self.sessions.keys().copied().collect();
        for endpoint in endpoints {
            if let Some(mut session) = self.sessions.remove(&endpoint) {
                session.rebind();
            }
            if let Err(e) = self.host.close_window(endpoint) {
                tracing::warn!("Failed to close {}: {:#}", endpoint, e);
            }
        }
    }

    fn sink(&self, endpoint: EndpointId, context: ContextId) -> ChangeSink {
        let tx = self.events_tx.clone();
        ChangeSink::new(move |signal| {
            let _ = tx.send(Event::Observer {
                endpoint,
                context,
                signal,
            });
        })
    }

    fn spawn_read(&self, endpoint: EndpointId, context: ContextId, path: PathBuf) {
        let tx = self.events_tx.clone();
        tokio::spawn(async move {
            let result = watch::read_text(&path).await;
            let _ = tx.send(Event::ReadCompleted {
                endpoint,
                context,
                result,
            });
        });
    }

    fn schedule_reconnect(&self, endpoint: EndpointId, context: ContextId) {
        let tx = self.events_tx.clone();
        let backoff = self.config.watch.reconnect_backoff();
        tracing::debug!("Reconnecting {} in {:?}", context, backoff);
        tokio::spawn(async move {
            tokio::time::sleep(backoff).await;
            let _ = tx.send(Event::Reconnect { endpoint, context });
        });
    }

    fn deliver(&self, endpoint: EndpointId, push: &Push) {
        channel::deliver(&self.host, &self.config, endpoint, push);
    }

    /// Process internal events until none arrive for a short while
    #[cfg(test)]
    pub async fn settle(&mut self) {
        while let Ok(Some(event)) =
            tokio::time::timeout(std::time::Duration::from_millis(200), self.events_rx.recv()).await
        {
            self.handle(event);
        }
    }

    #[cfg(test)]
    fn is_ready(&self, endpoint: EndpointId) -> bool {
        self.sessions.get(&endpoint).is_some_and(|s| s.ready)
    }

    #[cfg(test)]
    fn baseline(&self, endpoint: EndpointId) -> Option<String> {
        self.sessions
            .get(&endpoint)
            .and_then(|s| s.watch.as_ref())
            .and_then(|ctx| ctx.last_known().map(str::to_string))
    }
}
