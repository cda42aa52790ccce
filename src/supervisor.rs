use crate::transport::{LinkEvent, Transport, TransportLink};
use bytes::Bytes;
use std::fmt;
use std::sync::atomic::{AtomicU8, Ordering};
use std::sync::Arc;
use std::time::Duration;
use tokio::sync::mpsc;
use tokio_util::sync::CancellationToken;

#[derive(Clone, Copy, Debug, PartialEq, Eq)]
#[repr(u8)]
pub enum ConnectionState {
    Disconnected = 0,
    Connecting = 1,
    Connected = 2,
    Reconnecting = 3,
    Failed = 4,
}

impl ConnectionState {
    fn from_u8(raw: u8) -> Self {
        match raw {
            1 => ConnectionState::Connecting,
            2 => ConnectionState::Connected,
            3 => ConnectionState::Reconnecting,
            4 => ConnectionState::Failed,
            _ => ConnectionState::Disconnected,
        }
    }
}

impl fmt::Display for ConnectionState {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let label = match self {
            ConnectionState::Disconnected => "disconnected",
            ConnectionState::Connecting => "connecting",
            ConnectionState::Connected => "connected",
            ConnectionState::Reconnecting => "reconnecting",
            ConnectionState::Failed => "failed",
        };
        f.write_str(label)
    }
}

/// Connection state cell. The supervisor is the only writer; the pipeline
/// handle and observers read it.
#[derive(Clone, Debug)]
pub struct SharedConnectionState {
    inner: Arc<AtomicU8>,
}

impl SharedConnectionState {
    pub(crate) fn new() -> Self {
        Self {
            inner: Arc::new(AtomicU8::new(ConnectionState::Disconnected as u8)),
        }
    }

    pub fn get(&self) -> ConnectionState {
        ConnectionState::from_u8(self.inner.load(Ordering::SeqCst))
    }

    fn set(&self, state: ConnectionState) {
        self.inner.store(state as u8, Ordering::SeqCst);
    }
}

#[derive(Debug)]
pub(crate) enum SupervisorEvent {
    StateChanged {
        old: ConnectionState,
        new: ConnectionState,
        error: Option<String>,
    },
    Message {
        topic: String,
        payload: Bytes,
    },
}

#[derive(Debug)]
pub(crate) enum SupervisorCommand {
    Reconnect,
}

#[derive(Clone, Debug)]
pub(crate) struct SupervisorConfig {
    pub topic: String,
    pub retry_max_attempts: u32,
    pub retry_delay: Duration,
}

/// Keeps one logical subscription alive across transient broker failures:
/// connect, subscribe, watch the link, and retry with a bounded budget.
pub(crate) struct ConnectionSupervisor {
    transport: Arc<dyn Transport>,
    config: SupervisorConfig,
    state: SharedConnectionState,
    events: mpsc::UnboundedSender<SupervisorEvent>,
    commands: mpsc::UnboundedReceiver<SupervisorCommand>,
    cancel: CancellationToken,
    attempts: u32,
}

enum Recovery {
    Retry,
    Stopped,
}

impl ConnectionSupervisor {
    pub(crate) fn new(
        transport: Arc<dyn Transport>,
        config: SupervisorConfig,
        state: SharedConnectionState,
        events: mpsc::UnboundedSender<SupervisorEvent>,
        commands: mpsc::UnboundedReceiver<SupervisorCommand>,
        cancel: CancellationToken,
    ) -> Self {
        Self {
            transport,
            config,
            state,
            events,
            commands,
            cancel,
            attempts: 0,
        }
    }

    pub(crate) async fn run(mut self) {
        let sensor_topic = format!("{}/sensor", self.config.topic);

        'outer: loop {
            self.transition(ConnectionState::Connecting, None);

            let connected = tokio::select! {
                _ = self.cancel.cancelled() => break 'outer,
                result = self.transport.connect() => result,
            };

            let mut link = match connected {
                Ok(link) => link,
                Err(err) => {
                    tracing::warn!(error = %err, "broker connect failed");
                    match self.back_off(err.to_string()).await {
                        Recovery::Retry => continue 'outer,
                        Recovery::Stopped => break 'outer,
                    }
                }
            };

            self.attempts = 0;
            self.transition(ConnectionState::Connected, None);

            if let Err(err) = link.subscribe(&sensor_topic).await {
                tracing::warn!(error = %err, topic = %sensor_topic, "subscribe failed");
                link.close().await;
                match self.back_off(err.to_string()).await {
                    Recovery::Retry => continue 'outer,
                    Recovery::Stopped => break 'outer,
                }
            }
            tracing::info!(topic = %sensor_topic, "subscribed to sensor feed");

            loop {
                tokio::select! {
                    _ = self.cancel.cancelled() => {
                        link.close().await;
                        break 'outer;
                    }
                    cmd = self.commands.recv() => {
                        if cmd.is_none() {
                            link.close().await;
                            break 'outer;
                        }
                        // Reconnect requests are only meaningful from Failed.
                    }
                    event = link.next_event() => match event {
                        LinkEvent::Message { topic, payload } => {
                            let _ = self.events.send(SupervisorEvent::Message { topic, payload });
                        }
                        LinkEvent::Closed { reason } => {
                            tracing::warn!(error = %reason, "connection lost");
                            link.close().await;
                            match self.back_off(reason.to_string()).await {
                                Recovery::Retry => continue 'outer,
                                Recovery::Stopped => break 'outer,
                            }
                        }
                    }
                }
            }
        }

        self.transition(ConnectionState::Disconnected, None);
    }

    /// One failure: either schedule a retry after the fixed delay, or give
    /// up once the budget is spent and wait for an external reconnect.
    async fn back_off(&mut self, error: String) -> Recovery {
        self.attempts += 1;

        if self.attempts >= self.config.retry_max_attempts {
            self.transition(ConnectionState::Failed, Some(error));
            return tokio::select! {
                _ = self.cancel.cancelled() => Recovery::Stopped,
                cmd = self.commands.recv() => match cmd {
                    Some(SupervisorCommand::Reconnect) => {
                        self.attempts = 0;
                        Recovery::Retry
                    }
                    None => Recovery::Stopped,
                },
            };
        }

        self.transition(ConnectionState::Reconnecting, Some(error));
        tokio::select! {
            _ = self.cancel.cancelled() => Recovery::Stopped,
            _ = tokio::time::sleep(self.config.retry_delay) => Recovery::Retry,
        }
    }

    fn transition(&self, new: ConnectionState, error: Option<String>) {
        let old = self.state.get();
        if old == new {
            return;
        }
        self.state.set(new);
        tracing::debug!(%old, %new, "connection state changed");
        let _ = self.events.send(SupervisorEvent::StateChanged { old, new, error });
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::transport::testing::{FakeLink, FakeTransport, ScriptedConnect};
    use crate::transport::TransportError;

    fn spawn_supervisor(
        transport: Arc<FakeTransport>,
        retry_max_attempts: u32,
    ) -> (
        mpsc::UnboundedReceiver<SupervisorEvent>,
        mpsc::UnboundedSender<SupervisorCommand>,
        CancellationToken,
        SharedConnectionState,
    ) {
        let (event_tx, event_rx) = mpsc::unbounded_channel();
        let (command_tx, command_rx) = mpsc::unbounded_channel();
        let cancel = CancellationToken::new();
        let state = SharedConnectionState::new();
        let supervisor = ConnectionSupervisor::new(
            transport,
            SupervisorConfig {
                topic: "tank-a".into(),
                retry_max_attempts,
                retry_delay: Duration::from_secs(5),
            },
            state.clone(),
            event_tx,
            command_rx,
            cancel.clone(),
        );
        tokio::spawn(supervisor.run());
        (event_rx, command_tx, cancel, state)
    }

    async fn wait_for_state(
        events: &mut mpsc::UnboundedReceiver<SupervisorEvent>,
        target: ConnectionState,
    ) {
        while let Some(event) = events.recv().await {
            if let SupervisorEvent::StateChanged { new, .. } = event {
                if new == target {
                    return;
                }
            }
        }
        panic!("event stream ended before reaching {target}");
    }

    #[tokio::test(start_paused = true)]
    async fn exhausts_retry_budget_then_fails() {
        let transport = FakeTransport::new();
        let (mut events, _commands, _cancel, state) = spawn_supervisor(transport.clone(), 5);

        let mut states = Vec::new();
        while let Some(event) = events.recv().await {
            if let SupervisorEvent::StateChanged { new, .. } = event {
                states.push(new);
                if new == ConnectionState::Failed {
                    break;
                }
            }
        }

        assert_eq!(transport.connect_attempts(), 5);
        assert_eq!(
            states,
            vec![
                ConnectionState::Connecting,
                ConnectionState::Reconnecting,
                ConnectionState::Connecting,
                ConnectionState::Reconnecting,
                ConnectionState::Connecting,
                ConnectionState::Reconnecting,
                ConnectionState::Connecting,
                ConnectionState::Reconnecting,
                ConnectionState::Connecting,
                ConnectionState::Failed,
            ]
        );

        // No further retry may be scheduled once the budget is exhausted.
        tokio::time::sleep(Duration::from_secs(60)).await;
        assert_eq!(transport.connect_attempts(), 5);
        assert_eq!(state.get(), ConnectionState::Failed);
    }

    #[tokio::test(start_paused = true)]
    async fn manual_reconnect_resets_attempts_and_reenters_connecting() {
        let transport = FakeTransport::new();
        let (mut events, commands, _cancel, state) = spawn_supervisor(transport.clone(), 2);

        wait_for_state(&mut events, ConnectionState::Failed).await;
        assert_eq!(transport.connect_attempts(), 2);

        let (link_tx, link) = FakeLink::pair();
        transport.queue(ScriptedConnect::Link(link));
        commands.send(SupervisorCommand::Reconnect).unwrap();

        wait_for_state(&mut events, ConnectionState::Connecting).await;
        wait_for_state(&mut events, ConnectionState::Connected).await;
        assert_eq!(transport.connect_attempts(), 3);
        assert_eq!(state.get(), ConnectionState::Connected);
        drop(link_tx);
    }

    #[tokio::test(start_paused = true)]
    async fn stop_cancels_pending_retry_timer() {
        let transport = FakeTransport::new();
        let (mut events, _commands, cancel, state) = spawn_supervisor(transport.clone(), 5);

        wait_for_state(&mut events, ConnectionState::Reconnecting).await;
        assert_eq!(transport.connect_attempts(), 1);

        cancel.cancel();
        wait_for_state(&mut events, ConnectionState::Disconnected).await;

        // The pending retry timer must be dead: advancing past the delay
        // schedules nothing.
        tokio::time::sleep(Duration::from_secs(60)).await;
        assert_eq!(transport.connect_attempts(), 1);
        assert_eq!(state.get(), ConnectionState::Disconnected);
        assert!(events.try_recv().is_err());
    }

    #[tokio::test(start_paused = true)]
    async fn subscribe_failure_is_retry_eligible() {
        let transport = FakeTransport::new();
        transport.queue(ScriptedConnect::Link(FakeLink::with_subscribe_error()));
        let (link_tx, link) = FakeLink::pair();
        transport.queue(ScriptedConnect::Link(link));

        let (mut events, _commands, _cancel, state) = spawn_supervisor(transport.clone(), 5);

        wait_for_state(&mut events, ConnectionState::Connected).await;
        wait_for_state(&mut events, ConnectionState::Reconnecting).await;
        wait_for_state(&mut events, ConnectionState::Connected).await;
        assert_eq!(transport.connect_attempts(), 2);
        assert_eq!(state.get(), ConnectionState::Connected);
        drop(link_tx);
    }

    #[tokio::test(start_paused = true)]
    async fn connection_loss_triggers_reconnect() {
        let transport = FakeTransport::new();
        let (link_tx, link) = FakeLink::pair();
        transport.queue(ScriptedConnect::Link(link));
        let (link_tx2, link2) = FakeLink::pair();
        transport.queue(ScriptedConnect::Link(link2));

        let (mut events, _commands, _cancel, _state) = spawn_supervisor(transport.clone(), 5);

        wait_for_state(&mut events, ConnectionState::Connected).await;
        link_tx
            .send(LinkEvent::Closed {
                reason: TransportError::ConnectionLost("keep alive timeout".into()),
            })
            .unwrap();

        wait_for_state(&mut events, ConnectionState::Reconnecting).await;
        wait_for_state(&mut events, ConnectionState::Connected).await;
        assert_eq!(transport.connect_attempts(), 2);
        drop(link_tx2);
    }

    #[tokio::test(start_paused = true)]
    async fn messages_are_forwarded_while_connected() {
        let transport = FakeTransport::new();
        let (link_tx, link) = FakeLink::pair();
        transport.queue(ScriptedConnect::Link(link));

        let (mut events, _commands, _cancel, _state) = spawn_supervisor(transport.clone(), 5);
        wait_for_state(&mut events, ConnectionState::Connected).await;

        link_tx
            .send(LinkEvent::Message {
                topic: "tank-a/sensor".into(),
                payload: Bytes::from_static(b"{\"ph\":7.0}"),
            })
            .unwrap();

        loop {
            match events.recv().await.expect("event stream open") {
                SupervisorEvent::Message { topic, payload } => {
                    assert_eq!(topic, "tank-a/sensor");
                    assert_eq!(payload.as_ref(), b"{\"ph\":7.0}");
                    break;
                }
                SupervisorEvent::StateChanged { .. } => {}
            }
        }
        drop(link_tx);
    }
}
