use std::sync::Arc;

use dashmap::{DashMap, mapref::entry::Entry};
use tracing::{info, warn};

use crate::{
    common::SessionId,
    configs::Config,
    player::{PlayerController, PlayerHandle},
    process::{KillSignal, ProcessSupervisor},
    sources::{StreamProvider, YtDlpExtractor},
    voice::{AudioSink, VoiceTransport},
};

/// Builds the audio sink for a newly created session. Sinks are platform
/// glue; the engine only sees the trait.
pub trait SinkFactory: Send + Sync {
    fn create(&self, session: &SessionId) -> Arc<dyn AudioSink>;
}

/// One playback engine instance: every live session, plus the shared
/// extractor stack behind them.
pub struct SessionRegistry {
    sessions: DashMap<SessionId, PlayerHandle>,
    provider: StreamProvider,
    supervisor: Arc<ProcessSupervisor>,
    transport: Arc<dyn VoiceTransport>,
    sink_factory: Arc<dyn SinkFactory>,
    config: Config,
}

impl SessionRegistry {
    pub fn new(
        config: Config,
        transport: Arc<dyn VoiceTransport>,
        sink_factory: Arc<dyn SinkFactory>,
    ) -> Self {
        let supervisor = Arc::new(ProcessSupervisor::new());
        let extractor = Arc::new(YtDlpExtractor::new(
            config.stream.clone(),
            supervisor.clone(),
        ));
        Self {
            sessions: DashMap::new(),
            provider: StreamProvider::new(extractor, &config.stream),
            supervisor,
            transport,
            sink_factory,
            config,
        }
    }

    /// Build a registry on top of an already-constructed provider. Tests use
    /// this to slot in a mock extractor.
    pub fn with_provider(
        config: Config,
        provider: StreamProvider,
        supervisor: Arc<ProcessSupervisor>,
        transport: Arc<dyn VoiceTransport>,
        sink_factory: Arc<dyn SinkFactory>,
    ) -> Self {
        Self {
            sessions: DashMap::new(),
            provider,
            supervisor,
            transport,
            sink_factory,
            config,
        }
    }

    pub fn supervisor(&self) -> &Arc<ProcessSupervisor> {
        &self.supervisor
    }

    /// Fetch the session's player, spawning one on first use. A handle whose
    /// controller already exited (destroyed, exhausted reconnects) is
    /// replaced transparently.
    pub fn get_or_create(&self, session: &SessionId) -> PlayerHandle {
        match self.sessions.entry(session.clone()) {
            Entry::Occupied(mut occupied) => {
                if occupied.get().is_closed() {
                    info!("session {} had ended, respawning", session);
                    let handle = self.spawn_controller(session);
                    occupied.insert(handle.clone());
                    handle
                } else {
                    occupied.get().clone()
                }
            }
            Entry::Vacant(vacant) => {
                info!("session {} created", session);
                let handle = self.spawn_controller(session);
                vacant.insert(handle.clone());
                handle
            }
        }
    }

    pub fn get(&self, session: &SessionId) -> Option<PlayerHandle> {
        self.sessions
            .get(session)
            .map(|entry| entry.clone())
            .filter(|handle| !handle.is_closed())
    }

    /// Tear down one session and forget it.
    pub async fn remove_and_destroy(&self, session: &SessionId) {
        if let Some((_, handle)) = self.sessions.remove(session) {
            if let Err(err) = handle.destroy().await {
                warn!("session {} destroy failed: {}", session, err);
            }
        }
    }

    /// Sessions whose controller is still running.
    pub fn active_sessions(&self) -> Vec<SessionId> {
        self.sessions
            .iter()
            .filter(|entry| !entry.value().is_closed())
            .map(|entry| entry.key().clone())
            .collect()
    }

    /// Engine shutdown: destroy every session, then reap any extractor
    /// processes still alive.
    pub async fn shutdown(&self) {
        let sessions: Vec<SessionId> = self
            .sessions
            .iter()
            .map(|entry| entry.key().clone())
            .collect();
        for session in sessions {
            self.remove_and_destroy(&session).await;
        }
        self.supervisor.cleanup_all(KillSignal::Graceful);
        info!("registry shut down");
    }

    fn spawn_controller(&self, session: &SessionId) -> PlayerHandle {
        PlayerController::spawn(
            session.clone(),
            self.provider.clone(),
            self.sink_factory.create(session),
            self.transport.clone(),
            self.config.player.clone(),
            self.config.voice.clone(),
        )
    }
}
