use std::{sync::Arc, time::Duration};

use tracing::{debug, info, warn};

use crate::{
    common::{ChannelId, PlayerError, PlayerResult, SessionId},
    configs::VoiceConfig,
    voice::transport::{TransportEvent, VoiceHandle, VoiceTransport},
};

/// Owns the voice connection for one session: joins, channel moves, the
/// reconnect backoff schedule and final teardown. Not a task of its own; the
/// session actor drives it and pumps the event receivers it returns.
pub struct ConnectionManager {
    transport: Arc<dyn VoiceTransport>,
    config: VoiceConfig,
    session: SessionId,
    /// Target channel. Survives a dropped or failed connection so reconnect
    /// attempts know where to go.
    channel: Option<ChannelId>,
    handle: Option<Box<dyn VoiceHandle>>,
    /// Set when the transport reported a drop; the held handle is dead until
    /// a rejoin succeeds, so `ensure` must not hand it out.
    pending_reconnect: bool,
    reconnect_attempts: u32,
}

impl ConnectionManager {
    pub fn new(transport: Arc<dyn VoiceTransport>, config: VoiceConfig, session: SessionId) -> Self {
        Self {
            transport,
            config,
            session,
            channel: None,
            handle: None,
            pending_reconnect: false,
            reconnect_attempts: 0,
        }
    }

    pub fn is_connected(&self) -> bool {
        self.handle.is_some() && !self.pending_reconnect
    }

    pub fn channel(&self) -> Option<&ChannelId> {
        if self.is_connected() {
            self.channel.as_ref()
        } else {
            None
        }
    }

    /// True between a reported drop and the rejoin that heals it.
    pub fn needs_reconnect(&self) -> bool {
        self.pending_reconnect
    }

    /// Connect to `channel` if not already there. Returns the transport event
    /// receiver for a fresh join (the caller pumps it), `None` when the
    /// existing connection already serves that channel.
    pub async fn ensure(
        &mut self,
        channel: &ChannelId,
    ) -> PlayerResult<Option<flume::Receiver<TransportEvent>>> {
        if self.is_connected() {
            match &self.channel {
                Some(current) if current == channel => return Ok(None),
                Some(current) => info!(
                    "session {} moving from channel {} to {}",
                    self.session, current, channel
                ),
                None => {}
            }
        }

        let ready_timeout = Duration::from_millis(self.config.ready_timeout_ms);
        self.join(channel.clone(), ready_timeout).await.map(Some)
    }

    /// Called when the transport reports a drop. Returns the backoff delay
    /// before the next reconnect attempt, or `None` once attempts are
    /// exhausted and the session must be destroyed.
    pub fn on_disconnected(&mut self) -> Option<Duration> {
        self.channel.as_ref()?;
        self.pending_reconnect = true;
        if self.reconnect_attempts >= self.config.max_reconnect_attempts {
            warn!(
                "session {} exhausted {} reconnect attempts",
                self.session, self.reconnect_attempts
            );
            return None;
        }

        let delays = &self.config.reconnect_delays_ms;
        let delay_ms = if delays.is_empty() {
            1000
        } else {
            // Clamp to the last entry once the schedule runs out.
            delays[(self.reconnect_attempts as usize).min(delays.len() - 1)]
        };
        self.reconnect_attempts += 1;
        debug!(
            "session {} reconnect attempt {} in {}ms",
            self.session, self.reconnect_attempts, delay_ms
        );
        Some(Duration::from_millis(delay_ms))
    }

    /// Rejoin the last channel. Success resets the attempt counter.
    pub async fn reconnect(&mut self) -> PlayerResult<flume::Receiver<TransportEvent>> {
        let channel = self.channel.clone().ok_or_else(|| {
            PlayerError::StateConflict("no previous channel to reconnect to".to_string())
        })?;

        let ready_timeout = Duration::from_millis(self.config.reconnect_ready_timeout_ms);
        self.join(channel, ready_timeout).await
    }

    pub async fn teardown(&mut self) {
        if let Some(handle) = self.handle.take() {
            handle.disconnect().await;
        }
        self.channel = None;
        self.pending_reconnect = false;
        self.reconnect_attempts = 0;
    }

    async fn join(
        &mut self,
        channel: ChannelId,
        ready_timeout: Duration,
    ) -> PlayerResult<flume::Receiver<TransportEvent>> {
        // Release whatever handle is being replaced, dead or alive.
        if let Some(old) = self.handle.take() {
            old.disconnect().await;
        }
        self.channel = Some(channel.clone());

        let handle = self.transport.connect(&self.session, &channel).await?;
        let events = handle.events();
        wait_for_ready(&events, ready_timeout).await?;

        info!("session {} connected to channel {}", self.session, channel);
        self.handle = Some(handle);
        self.pending_reconnect = false;
        self.reconnect_attempts = 0;
        Ok(events)
    }
}

async fn wait_for_ready(
    events: &flume::Receiver<TransportEvent>,
    timeout: Duration,
) -> PlayerResult<()> {
    match tokio::time::timeout(timeout, events.recv_async()).await {
        Ok(Ok(TransportEvent::Ready)) => Ok(()),
        Ok(Ok(TransportEvent::Disconnected { reason })) => {
            Err(PlayerError::TransientUpstream(format!(
                "voice connection dropped during handshake: {}",
                reason
            )))
        }
        Ok(Err(_)) => Err(PlayerError::TransientUpstream(
            "voice transport closed during handshake".to_string(),
        )),
        Err(_) => Err(PlayerError::TransientUpstream(format!(
            "voice connection not ready within {:?}",
            timeout
        ))),
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use async_trait::async_trait;
    use parking_lot::Mutex;
    use std::sync::atomic::{AtomicU32, Ordering};

    struct MockTransport {
        connects: Mutex<Vec<ChannelId>>,
        disconnects: Arc<AtomicU32>,
        /// Emit `Ready` immediately on connect.
        ready: bool,
    }

    impl MockTransport {
        fn ready() -> Arc<Self> {
            Arc::new(Self {
                connects: Mutex::new(Vec::new()),
                disconnects: Arc::new(AtomicU32::new(0)),
                ready: true,
            })
        }

        fn silent() -> Arc<Self> {
            Arc::new(Self {
                connects: Mutex::new(Vec::new()),
                disconnects: Arc::new(AtomicU32::new(0)),
                ready: false,
            })
        }
    }

    struct MockHandle {
        events: flume::Receiver<TransportEvent>,
        // Keeps the channel open so the silent case blocks instead of erroring.
        _events_tx: flume::Sender<TransportEvent>,
        disconnects: Arc<AtomicU32>,
    }

    #[async_trait]
    impl VoiceTransport for MockTransport {
        async fn connect(
            &self,
            _session: &SessionId,
            channel: &ChannelId,
        ) -> PlayerResult<Box<dyn VoiceHandle>> {
            self.connects.lock().push(channel.clone());
            let (tx, rx) = flume::unbounded();
            if self.ready {
                let _ = tx.send(TransportEvent::Ready);
            }
            Ok(Box::new(MockHandle {
                events: rx,
                _events_tx: tx,
                disconnects: self.disconnects.clone(),
            }))
        }
    }

    #[async_trait]
    impl VoiceHandle for MockHandle {
        fn events(&self) -> flume::Receiver<TransportEvent> {
            self.events.clone()
        }

        async fn disconnect(&self) {
            self.disconnects.fetch_add(1, Ordering::SeqCst);
        }
    }

    fn manager(transport: Arc<MockTransport>) -> ConnectionManager {
        ConnectionManager::new(
            transport,
            VoiceConfig::default(),
            SessionId::from("session-1".to_string()),
        )
    }

    fn chan(id: &str) -> ChannelId {
        ChannelId::from(id.to_string())
    }

    #[tokio::test]
    async fn ensure_joins_once_per_channel() {
        let transport = MockTransport::ready();
        let mut mgr = manager(transport.clone());

        let first = mgr.ensure(&chan("vc-1")).await.unwrap();
        assert!(first.is_some());
        assert!(mgr.is_connected());

        let second = mgr.ensure(&chan("vc-1")).await.unwrap();
        assert!(second.is_none());
        assert_eq!(transport.connects.lock().len(), 1);
    }

    #[tokio::test]
    async fn ensure_moves_between_channels() {
        let transport = MockTransport::ready();
        let mut mgr = manager(transport.clone());

        mgr.ensure(&chan("vc-1")).await.unwrap();
        let moved = mgr.ensure(&chan("vc-2")).await.unwrap();

        assert!(moved.is_some());
        assert_eq!(mgr.channel(), Some(&chan("vc-2")));
        assert_eq!(transport.connects.lock().len(), 2);
        assert_eq!(transport.disconnects.load(Ordering::SeqCst), 1);
    }

    #[tokio::test]
    async fn ensure_rejoins_instead_of_reusing_a_dead_link() {
        let transport = MockTransport::ready();
        let mut mgr = manager(transport.clone());
        mgr.ensure(&chan("vc-1")).await.unwrap();

        // Transport reported a drop; the held handle is dead.
        assert!(mgr.on_disconnected().is_some());
        assert!(!mgr.is_connected());
        assert_eq!(mgr.channel(), None);

        let rejoined = mgr.ensure(&chan("vc-1")).await.unwrap();
        assert!(rejoined.is_some());
        assert!(mgr.is_connected());
        assert_eq!(transport.connects.lock().len(), 2);
        // The dead handle was released, not leaked.
        assert_eq!(transport.disconnects.load(Ordering::SeqCst), 1);
    }

    #[tokio::test]
    async fn reconnect_releases_the_replaced_handle() {
        let transport = MockTransport::ready();
        let mut mgr = manager(transport.clone());
        mgr.ensure(&chan("vc-1")).await.unwrap();

        assert!(mgr.on_disconnected().is_some());
        mgr.reconnect().await.unwrap();

        assert!(mgr.is_connected());
        assert!(!mgr.needs_reconnect());
        assert_eq!(transport.connects.lock().len(), 2);
        assert_eq!(transport.disconnects.load(Ordering::SeqCst), 1);
    }

    #[tokio::test(start_paused = true)]
    async fn join_fails_when_ready_never_arrives() {
        let transport = MockTransport::silent();
        let mut mgr = manager(transport);

        let err = mgr.ensure(&chan("vc-1")).await.unwrap_err();
        assert!(matches!(err, PlayerError::TransientUpstream(_)));
        assert!(!mgr.is_connected());
    }

    #[tokio::test(start_paused = true)]
    async fn failed_reconnect_keeps_the_target_channel() {
        let ready = MockTransport::ready();
        let mut mgr = manager(ready);
        mgr.ensure(&chan("vc-1")).await.unwrap();
        assert!(mgr.on_disconnected().is_some());

        // Swap in a transport that never completes the handshake.
        let silent: Arc<dyn VoiceTransport> = MockTransport::silent();
        mgr.transport = silent;
        assert!(mgr.reconnect().await.is_err());

        // The channel survives the failure, so the schedule can continue.
        assert!(mgr.on_disconnected().is_some());
        assert!(mgr.reconnect().await.is_err());
    }

    #[tokio::test]
    async fn backoff_schedule_clamps_then_exhausts() {
        let transport = MockTransport::ready();
        let mut mgr = ConnectionManager::new(
            transport,
            VoiceConfig {
                max_reconnect_attempts: 7,
                reconnect_delays_ms: vec![1000, 2000, 5000],
                ..VoiceConfig::default()
            },
            SessionId::from("session-1".to_string()),
        );
        mgr.ensure(&chan("vc-1")).await.unwrap();

        let mut delays = Vec::new();
        while let Some(delay) = mgr.on_disconnected() {
            delays.push(delay.as_millis() as u64);
        }
        assert_eq!(delays, vec![1000, 2000, 5000, 5000, 5000, 5000, 5000]);
        assert!(mgr.on_disconnected().is_none());
    }

    #[tokio::test]
    async fn reconnect_rejoins_last_channel_and_resets_attempts() {
        let transport = MockTransport::ready();
        let mut mgr = manager(transport.clone());
        mgr.ensure(&chan("vc-1")).await.unwrap();

        assert!(mgr.on_disconnected().is_some());
        assert!(mgr.on_disconnected().is_some());
        mgr.reconnect().await.unwrap();

        // Counter reset, the full schedule is available again.
        let mut count = 0;
        while mgr.on_disconnected().is_some() {
            count += 1;
        }
        assert_eq!(count, VoiceConfig::default().max_reconnect_attempts);
        assert_eq!(transport.connects.lock().len(), 2);
    }

    #[tokio::test]
    async fn reconnect_without_prior_join_is_a_conflict() {
        let mut mgr = manager(MockTransport::ready());
        let err = mgr.reconnect().await.unwrap_err();
        assert!(matches!(err, PlayerError::StateConflict(_)));
    }

    #[tokio::test]
    async fn teardown_disconnects_and_clears() {
        let transport = MockTransport::ready();
        let mut mgr = manager(transport.clone());
        mgr.ensure(&chan("vc-1")).await.unwrap();

        mgr.teardown().await;
        assert!(!mgr.is_connected());
        assert_eq!(transport.disconnects.load(Ordering::SeqCst), 1);
    }
}
