use crate::error::GloveError;
use crate::handler::NotificationHandler;
use futures::FutureExt;
use log::{debug, info, warn};
use std::fmt;
use std::future::Future;
use std::time::Duration;
use tokio::sync::mpsc;
use tokio::time;
use uuid::Uuid;

#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub enum ConnectionState {
    Scanning,
    Connected,
    Subscribed,
    Disconnected,
    Failed,
}

impl fmt::Display for ConnectionState {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let name = match self {
            ConnectionState::Scanning => "scanning",
            ConnectionState::Connected => "connected",
            ConnectionState::Subscribed => "subscribed",
            ConnectionState::Disconnected => "disconnected",
            ConnectionState::Failed => "failed",
        };
        f.write_str(name)
    }
}

/// Events a link can queue before it has to wait for the session.
pub const EVENT_QUEUE_LEN: usize = 64;

/// Events a link pushes to the session, in delivery order.
#[derive(Clone, Debug, PartialEq, Eq)]
pub enum LinkEvent {
    Notification(Vec<u8>),
    Disconnected,
}

/// State shared between the session and the notification handler.
#[derive(Clone, Copy, Debug, Default, PartialEq, Eq)]
pub struct SessionFlags {
    /// Set once the subscription is confirmed and the "Listening" banner is out.
    pub listening: bool,
    /// Set when the link reports a disconnect.
    pub disconnected: bool,
}

#[derive(Clone, Debug, PartialEq, Eq)]
pub struct ServiceSummary {
    pub uuid: Uuid,
    pub characteristics: Vec<CharacteristicSummary>,
}

#[derive(Clone, Debug, PartialEq, Eq)]
pub struct CharacteristicSummary {
    pub uuid: Uuid,
    pub properties: Vec<&'static str>,
}

#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub enum ExitReason {
    Disconnected,
    Interrupted,
}

/// The parts of a connected peripheral the session needs.
#[allow(async_fn_in_trait)]
pub trait Link {
    async fn is_connected(&self) -> bool;
    async fn services(&self) -> Vec<ServiceSummary>;
    async fn subscribe(&self, characteristic: Uuid) -> Result<(), GloveError>;
    async fn unsubscribe(&self, characteristic: Uuid) -> Result<(), GloveError>;
    async fn disconnect(&self) -> Result<(), GloveError>;
}

pub struct Session<L: Link> {
    link: L,
    events: mpsc::Receiver<LinkEvent>,
    characteristic: Uuid,
    state: ConnectionState,
    flags: SessionFlags,
    poll_interval: Duration,
    discovery_delay: Duration,
}

impl<L: Link> Session<L> {
    /// `link` must already be connected; `events` is where it delivers.
    pub fn new(
        link: L,
        events: mpsc::Receiver<LinkEvent>,
        characteristic: Uuid,
        poll_interval: Duration,
        discovery_delay: Duration,
    ) -> Self {
        Self {
            link,
            events,
            characteristic,
            state: ConnectionState::Connected,
            flags: SessionFlags::default(),
            poll_interval,
            discovery_delay,
        }
    }

    pub fn state(&self) -> ConnectionState {
        self.state
    }

    pub fn flags(&self) -> SessionFlags {
        self.flags
    }

    fn transition(&mut self, next: ConnectionState) {
        debug!("Session {} -> {}", self.state, next);
        self.state = next;
    }

    /// Runs until the link drops or `shutdown` resolves.
    ///
    /// Fails only if the subscription can't be set up; everything after that
    /// ends in [`ConnectionState::Disconnected`].
    pub async fn run<F>(
        &mut self,
        handler: &mut NotificationHandler,
        shutdown: F,
    ) -> Result<ExitReason, GloveError>
    where
        F: Future<Output = ()>,
    {
        self.print_services().await;

        println!("\nSubscribing to notifications on {} ...", self.characteristic);
        if let Err(e) = self.link.subscribe(self.characteristic).await {
            println!("\n*** Failed to start notifications (likely disconnected): {e} ***\n");
            self.transition(ConnectionState::Failed);
            if let Err(e) = self.link.disconnect().await {
                debug!("Disconnect after failed subscribe failed: {e}");
            }
            return Err(e);
        }
        self.transition(ConnectionState::Subscribed);

        // Anything that arrived while subscribing is decoded but not shown.
        while let Some(Some(event)) = self.events.recv().now_or_never() {
            self.dispatch(event, handler).await;
        }

        println!("Listening (Ctrl+C to stop)...\n");
        self.flags.listening = true;

        let reason = self.listen(handler, shutdown).await;
        self.cleanup().await;
        Ok(reason)
    }

    async fn listen<F>(&mut self, handler: &mut NotificationHandler, shutdown: F) -> ExitReason
    where
        F: Future<Output = ()>,
    {
        tokio::pin!(shutdown);
        loop {
            if self.flags.disconnected || !self.link.is_connected().await {
                println!("Exiting listen loop");
                return ExitReason::Disconnected;
            }
            tokio::select! {
                biased;
                _ = &mut shutdown => {
                    info!("Interrupted, leaving listen loop");
                    return ExitReason::Interrupted;
                }
                event = self.events.recv() => match event {
                    Some(event) => self.dispatch(event, handler).await,
                    None => self.mark_disconnected(),
                },
                _ = time::sleep(self.poll_interval) => {}
            }
        }
    }

    async fn dispatch(&mut self, event: LinkEvent, handler: &mut NotificationHandler) {
        match event {
            LinkEvent::Notification(payload) => {
                handler.on_notify(&payload, &self.flags).await;
            }
            LinkEvent::Disconnected => self.mark_disconnected(),
        }
    }

    fn mark_disconnected(&mut self) {
        if !self.flags.disconnected {
            println!("\n*** DISCONNECTED from board ***\n");
            self.flags.disconnected = true;
        }
    }

    async fn cleanup(&mut self) {
        match self.link.unsubscribe(self.characteristic).await {
            Ok(()) => println!("Stopped notifications."),
            Err(e) => {
                warn!("Unsubscribe failed: {e}");
                println!("Stopping notifications failed after disconnect: {e}");
            }
        }
        if let Err(e) = self.link.disconnect().await {
            debug!("Disconnect after cleanup failed: {e}");
        }
        self.transition(ConnectionState::Disconnected);
    }

    async fn print_services(&self) {
        let mut services = self.link.services().await;
        if services.is_empty() {
            // Discovery may still be finishing; look once more.
            time::sleep(self.discovery_delay).await;
            services = self.link.services().await;
        }

        println!("\nServices/Characteristics discovered:");
        for service in &services {
            println!("Service {}", service.uuid);
            for chr in &service.characteristics {
                println!("  Char {}  [{}]", chr.uuid, chr.properties.join(","));
            }
        }
    }
}
