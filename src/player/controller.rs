use std::{sync::Arc, time::Duration};

use tokio::sync::mpsc;
use tracing::{debug, info, warn};

use crate::{
    common::{ChannelId, PlayerError, PlayerResult, SessionId},
    configs::{PlayerConfig, VoiceConfig},
    player::{
        commands::{EnqueueOutcome, PlayerCommand, PlayerMessage},
        context::{PlayerContext, PrebufferedStream},
        handle::PlayerHandle,
        state::{LoopMode, PlaybackPhase, PlayerStateView, PlaylistSummary},
    },
    sources::StreamProvider,
    track::Track,
    voice::{AudioSink, ConnectionManager, SinkEvent, TransportEvent, VoiceTransport},
};

const MAILBOX_CAPACITY: usize = 64;

/// The per-session actor. Owns the queue, the playback state machine and the
/// voice connection; everything reaches it through one mailbox, so command
/// handling never races sink or transport events.
pub struct PlayerController {
    session: SessionId,
    ctx: PlayerContext,
    provider: StreamProvider,
    sink: Arc<dyn AudioSink>,
    conn: ConnectionManager,
    config: PlayerConfig,
    idle_timeout: Duration,
    tx: mpsc::Sender<PlayerMessage>,
}

impl PlayerController {
    pub fn spawn(
        session: SessionId,
        provider: StreamProvider,
        sink: Arc<dyn AudioSink>,
        transport: Arc<dyn VoiceTransport>,
        player_config: PlayerConfig,
        voice_config: VoiceConfig,
    ) -> PlayerHandle {
        let (tx, rx) = mpsc::channel(MAILBOX_CAPACITY);

        let sink_events = sink.events();
        let sink_tx = tx.clone();
        tokio::spawn(async move {
            while let Ok(event) = sink_events.recv_async().await {
                if sink_tx.send(PlayerMessage::Sink(event)).await.is_err() {
                    break;
                }
            }
        });

        let idle_timeout = Duration::from_millis(voice_config.idle_timeout_ms);
        let controller = Self {
            conn: ConnectionManager::new(transport, voice_config, session.clone()),
            session,
            ctx: PlayerContext::new(),
            provider: provider.clone(),
            sink,
            config: player_config,
            idle_timeout,
            tx: tx.clone(),
        };
        tokio::spawn(controller.run(rx));

        PlayerHandle::new(tx, provider)
    }

    async fn run(mut self, mut rx: mpsc::Receiver<PlayerMessage>) {
        info!("session {} controller started", self.session);
        // A session that never plays anything still times out.
        self.arm_idle_timer();
        while let Some(message) = rx.recv().await {
            if !self.handle(message).await {
                break;
            }
        }
        self.teardown().await;
        info!("session {} controller stopped", self.session);
    }

    /// Returns false when the session is over and the task must exit.
    async fn handle(&mut self, message: PlayerMessage) -> bool {
        match message {
            PlayerMessage::Command(command) => return self.handle_command(command).await,
            PlayerMessage::StartNext => self.start_next().await,
            PlayerMessage::RetryStart { epoch } => self.handle_retry(epoch),
            PlayerMessage::StreamReady { epoch, stream } => {
                self.handle_stream_ready(epoch, stream).await;
            }
            PlayerMessage::PrebufferReady { track, stream } => {
                self.handle_prebuffer_ready(track, stream);
            }
            PlayerMessage::Sink(event) => self.handle_sink_event(event).await,
            PlayerMessage::Transport(event) => {
                if !self.handle_transport_event(event).await {
                    return false;
                }
            }
            PlayerMessage::ReconnectNow => {
                if !self.handle_reconnect().await {
                    return false;
                }
            }
            PlayerMessage::IdleTimeout { generation } => {
                if generation == self.ctx.idle_generation
                    && self.ctx.phase == PlaybackPhase::Idle
                    && self.ctx.current.is_none()
                {
                    info!(
                        "session {} idle for {:?}, dropping the voice connection",
                        self.session, self.idle_timeout
                    );
                    // Only the connection goes; queue, playlists and settings
                    // stay until the session itself is destroyed.
                    self.conn.teardown().await;
                }
            }
        }
        true
    }

    async fn handle_command(&mut self, command: PlayerCommand) -> bool {
        match command {
            PlayerCommand::Enqueue {
                track,
                channel,
                reply,
            } => {
                let result = self.place_track(track, &channel).await;
                let _ = reply.send(result);
            }
            PlayerCommand::Skip { reply } => {
                let playing = matches!(
                    self.ctx.phase,
                    PlaybackPhase::Playing | PlaybackPhase::Paused
                );
                let result = match self.ctx.current.take() {
                    Some(track) if playing => {
                        // The stop raises TrackEnd; with `current` already
                        // cleared that single signal advances the queue
                        // without a loop-mode re-insert.
                        self.sink.stop().await;
                        info!("session {} skipped \"{}\"", self.session, track.title);
                        Ok(track)
                    }
                    other => {
                        self.ctx.current = other;
                        Err(PlayerError::StateConflict(
                            "nothing is playing".to_string(),
                        ))
                    }
                };
                let _ = reply.send(result);
            }
            PlayerCommand::Stop { reply } => {
                self.ctx.queue.clear();
                self.ctx.prebuffered = None;
                self.ctx.current = None;
                self.ctx.phase = PlaybackPhase::Idle;
                self.ctx.epoch += 1;
                self.sink.stop().await;
                self.arm_idle_timer();
                let _ = reply.send(Ok(()));
            }
            PlayerCommand::Pause { reply } => {
                let result = if self.ctx.phase == PlaybackPhase::Playing {
                    self.sink.pause().await;
                    self.ctx.phase = PlaybackPhase::Paused;
                    Ok(())
                } else {
                    Err(PlayerError::StateConflict("not currently playing".to_string()))
                };
                let _ = reply.send(result);
            }
            PlayerCommand::Resume { reply } => {
                let result = if self.ctx.phase == PlaybackPhase::Paused {
                    self.sink.resume().await;
                    self.ctx.phase = PlaybackPhase::Playing;
                    Ok(())
                } else {
                    Err(PlayerError::StateConflict("not paused".to_string()))
                };
                let _ = reply.send(result);
            }
            PlayerCommand::SetVolume { volume, reply } => {
                let clamped = volume.clamp(0, 200) as u32;
                self.ctx.volume = clamped;
                self.sink.set_gain(self.ctx.gain()).await;
                let _ = reply.send(Ok(clamped));
            }
            PlayerCommand::SetLoop { mode, reply } => {
                self.ctx.loop_mode = mode;
                let _ = reply.send(Ok(()));
            }
            PlayerCommand::SetAutoplay { enabled, reply } => {
                self.ctx.autoplay = enabled;
                let _ = reply.send(Ok(()));
            }
            PlayerCommand::Prepare { channel, reply } => {
                let result = self.connect(&channel).await;
                if result.is_ok() {
                    // Restart the idle countdown from the join.
                    self.arm_idle_timer();
                }
                let _ = reply.send(result);
            }
            PlayerCommand::QueueTrack { position, reply } => {
                let track = position
                    .checked_sub(1)
                    .and_then(|index| self.ctx.queue.get(index).cloned());
                let _ = reply.send(Ok(track));
            }
            PlayerCommand::Shuffle { reply } => {
                self.ctx.queue.shuffle();
                self.refresh_prebuffer();
                let _ = reply.send(Ok(()));
            }
            PlayerCommand::RemoveTrack { position, reply } => {
                let result = position
                    .checked_sub(1)
                    .and_then(|index| self.ctx.queue.remove_at(index))
                    .ok_or_else(|| {
                        PlayerError::NotFound(format!("no track at position {}", position))
                    });
                if result.is_ok() {
                    self.refresh_prebuffer();
                }
                let _ = reply.send(result);
            }
            PlayerCommand::MoveTrack { from, to, reply } => {
                let moved = match (from.checked_sub(1), to.checked_sub(1)) {
                    (Some(from), Some(to)) => self.ctx.queue.move_track(from, to),
                    _ => false,
                };
                let result = if moved {
                    self.refresh_prebuffer();
                    Ok(())
                } else {
                    Err(PlayerError::NotFound(format!(
                        "cannot move track from position {} to {}",
                        from, to
                    )))
                };
                let _ = reply.send(result);
            }
            PlayerCommand::NowPlaying { reply } => {
                let _ = reply.send(Ok(self.ctx.current.clone()));
            }
            PlayerCommand::StateView { reply } => {
                let _ = reply.send(Ok(self.state_view()));
            }
            PlayerCommand::SavePlaylist { name, reply } => {
                let _ = reply.send(self.save_playlist(&name));
            }
            PlayerCommand::LoadPlaylist {
                name,
                channel,
                reply,
            } => {
                let result = self.load_playlist(&name, &channel).await;
                let _ = reply.send(result);
            }
            PlayerCommand::ListPlaylists { reply } => {
                let mut summaries: Vec<PlaylistSummary> = self
                    .ctx
                    .playlists
                    .iter()
                    .map(|(name, tracks)| PlaylistSummary {
                        name: name.clone(),
                        track_count: tracks.len(),
                    })
                    .collect();
                summaries.sort_by(|a, b| a.name.cmp(&b.name));
                let _ = reply.send(Ok(summaries));
            }
            PlayerCommand::DeletePlaylist { name, reply } => {
                let _ = reply.send(Ok(self.ctx.playlists.remove(&name).is_some()));
            }
            PlayerCommand::Destroy { reply } => {
                let _ = reply.send(Ok(()));
                return false;
            }
        }
        true
    }

    async fn place_track(
        &mut self,
        track: Track,
        channel: &ChannelId,
    ) -> PlayerResult<EnqueueOutcome> {
        self.connect(channel).await?;
        self.cancel_idle_timer();

        let position = if self.ctx.phase == PlaybackPhase::Idle {
            self.ctx.queue.push_front(track.clone());
            self.ctx.phase = PlaybackPhase::Starting;
            self.send_self(PlayerMessage::StartNext);
            0
        } else {
            let position = self.ctx.queue.enqueue(track.clone());
            self.refresh_prebuffer();
            position
        };

        info!(
            "session {} queued \"{}\" at position {}",
            self.session, track.title, position
        );
        Ok(EnqueueOutcome { track, position })
    }

    /// Pull the next queue item onto the deck. Never holds the mailbox: a
    /// prebuffer miss hands acquisition to a background task that reports
    /// back through `StreamReady`.
    async fn start_next(&mut self) {
        let Some(track) = self.ctx.queue.pop_front() else {
            if self.ctx.autoplay {
                // No recommendation source is wired in yet.
                debug!(
                    "session {} queue drained with autoplay on, going idle",
                    self.session
                );
            }
            self.ctx.current = None;
            self.ctx.phase = PlaybackPhase::Idle;
            self.ctx.epoch += 1;
            self.arm_idle_timer();
            return;
        };

        self.ctx.phase = PlaybackPhase::Starting;
        self.ctx.epoch += 1;
        self.ctx.retry_count = 0;
        self.ctx.current = Some(track.clone());

        if let Some(stream) = self.ctx.take_prebuffered(&track) {
            debug!("session {} using prebuffered stream", self.session);
            self.begin_playback(stream).await;
            return;
        }
        self.spawn_acquisition(track);
    }

    /// Open the deck track's stream off the actor. The result comes back
    /// epoch-tagged; anything that invalidates the start (stop, skip, a new
    /// track) bumps the epoch and the stale stream is dropped, which kills
    /// its subprocess through the guard.
    fn spawn_acquisition(&self, track: Track) {
        let epoch = self.ctx.epoch;
        let provider = self.provider.clone();
        let tx = self.tx.clone();
        tokio::spawn(async move {
            let stream = provider.open_stream(&track).await;
            let _ = tx.send(PlayerMessage::StreamReady { epoch, stream }).await;
        });
    }

    async fn handle_stream_ready(
        &mut self,
        epoch: u64,
        stream: PlayerResult<crate::sources::AudioStream>,
    ) {
        if epoch != self.ctx.epoch || self.ctx.phase != PlaybackPhase::Starting {
            return;
        }
        let Some(track) = self.ctx.current.clone() else {
            return;
        };

        match stream {
            Ok(stream) => self.begin_playback(stream).await,
            Err(err)
                if err.is_retryable() && self.ctx.retry_count < self.config.max_track_retries =>
            {
                warn!(
                    "session {}: failed to start \"{}\" ({}), retrying",
                    self.session, track.title, err
                );
                self.schedule_retry();
            }
            Err(err) => {
                warn!(
                    "session {}: giving up on \"{}\": {}",
                    self.session, track.title, err
                );
                self.ctx.current = None;
                self.send_self(PlayerMessage::StartNext);
            }
        }
    }

    async fn begin_playback(&mut self, stream: crate::sources::AudioStream) {
        let Some(track) = self.ctx.current.clone() else {
            return;
        };
        self.sink.set_gain(self.ctx.gain()).await;
        if let Err(err) = self.sink.play(stream).await {
            warn!(
                "session {}: sink rejected \"{}\": {}",
                self.session, track.title, err
            );
            self.ctx.current = None;
            self.send_self(PlayerMessage::StartNext);
            return;
        }
        info!("session {}: now playing \"{}\"", self.session, track.title);
        self.ctx.phase = PlaybackPhase::Playing;
        self.spawn_prebuffer();
    }

    fn handle_retry(&mut self, epoch: u64) {
        if epoch != self.ctx.epoch || self.ctx.phase != PlaybackPhase::Starting {
            return;
        }
        let Some(track) = self.ctx.current.clone() else {
            return;
        };
        debug!(
            "session {} retry attempt {} for \"{}\"",
            self.session, self.ctx.retry_count, track.title
        );
        self.spawn_acquisition(track);
    }

    async fn handle_sink_event(&mut self, event: SinkEvent) {
        if !matches!(
            self.ctx.phase,
            PlaybackPhase::Playing | PlaybackPhase::Paused
        ) {
            return;
        }

        match event {
            SinkEvent::TrackEnd => {
                if let Some(finished) = self.ctx.current.take() {
                    match self.ctx.loop_mode {
                        LoopMode::Track => self.ctx.queue.push_front(finished),
                        LoopMode::Queue => {
                            self.ctx.queue.enqueue(finished);
                        }
                        LoopMode::Off => {}
                    }
                }
                self.start_next().await;
            }
            SinkEvent::Error(message) => {
                let err = PlayerError::classify(&message);
                let title = self
                    .ctx
                    .current
                    .as_ref()
                    .map(|t| t.title.clone())
                    .unwrap_or_default();
                if err.is_retryable() && self.ctx.retry_count < self.config.max_track_retries {
                    warn!(
                        "session {}: playback of \"{}\" failed ({}), retrying",
                        self.session, title, err
                    );
                    self.ctx.phase = PlaybackPhase::Starting;
                    self.schedule_retry();
                } else {
                    warn!(
                        "session {}: playback of \"{}\" failed permanently: {}",
                        self.session, title, err
                    );
                    // Error advancement never re-inserts, whatever the loop mode.
                    self.ctx.current = None;
                    self.start_next().await;
                }
            }
        }
    }

    async fn handle_transport_event(&mut self, event: TransportEvent) -> bool {
        match event {
            TransportEvent::Ready => true,
            TransportEvent::Disconnected { reason } => {
                warn!("session {} voice dropped: {}", self.session, reason);
                match self.conn.on_disconnected() {
                    Some(delay) => {
                        if self.ctx.phase == PlaybackPhase::Playing {
                            self.sink.pause().await;
                        }
                        let tx = self.tx.clone();
                        tokio::spawn(async move {
                            tokio::time::sleep(delay).await;
                            let _ = tx.send(PlayerMessage::ReconnectNow).await;
                        });
                        true
                    }
                    None => false,
                }
            }
        }
    }

    async fn handle_reconnect(&mut self) -> bool {
        // An ensure() during the backoff may already have rejoined.
        if !self.conn.needs_reconnect() {
            return true;
        }
        match self.conn.reconnect().await {
            Ok(events) => {
                self.spawn_transport_pump(events);
                if self.ctx.phase == PlaybackPhase::Playing {
                    self.sink.resume().await;
                }
                true
            }
            Err(err) => {
                warn!("session {} reconnect failed: {}", self.session, err);
                match self.conn.on_disconnected() {
                    Some(delay) => {
                        let tx = self.tx.clone();
                        tokio::spawn(async move {
                            tokio::time::sleep(delay).await;
                            let _ = tx.send(PlayerMessage::ReconnectNow).await;
                        });
                        true
                    }
                    None => false,
                }
            }
        }
    }

    fn handle_prebuffer_ready(&mut self, track: Track, stream: PlayerResult<crate::sources::AudioStream>) {
        let still_next = self
            .ctx
            .queue
            .peek_front()
            .map(|next| next.url == track.url)
            .unwrap_or(false);
        if !still_next {
            // Dropping the stream releases its subprocess.
            return;
        }
        match stream {
            Ok(stream) => {
                debug!(
                    "session {} prebuffered \"{}\"",
                    self.session, track.title
                );
                self.ctx.prebuffered = Some(PrebufferedStream { track, stream });
            }
            Err(err) => {
                debug!(
                    "session {} prebuffer of \"{}\" failed: {}",
                    self.session, track.title, err
                );
            }
        }
    }

    fn save_playlist(&mut self, name: &str) -> PlayerResult<usize> {
        let name = name.trim();
        if name.is_empty() || name.len() > self.config.max_playlist_name_len {
            return Err(PlayerError::StateConflict(format!(
                "playlist name must be 1-{} characters",
                self.config.max_playlist_name_len
            )));
        }
        if !self.ctx.playlists.contains_key(name)
            && self.ctx.playlists.len() >= self.config.max_playlists
        {
            return Err(PlayerError::StateConflict(format!(
                "playlist limit of {} reached",
                self.config.max_playlists
            )));
        }

        let mut tracks = Vec::new();
        if let Some(current) = &self.ctx.current {
            tracks.push(current.clone());
        }
        tracks.extend(self.ctx.queue.snapshot());
        if tracks.is_empty() {
            return Err(PlayerError::StateConflict(
                "nothing playing or queued to save".to_string(),
            ));
        }

        let count = tracks.len();
        self.ctx.playlists.insert(name.to_string(), tracks);
        Ok(count)
    }

    async fn load_playlist(&mut self, name: &str, channel: &ChannelId) -> PlayerResult<usize> {
        let tracks = self
            .ctx
            .playlists
            .get(name)
            .cloned()
            .ok_or_else(|| PlayerError::NotFound(format!("no playlist named \"{}\"", name)))?;

        self.connect(channel).await?;
        self.cancel_idle_timer();

        let count = tracks.len();
        for track in tracks {
            self.ctx.queue.enqueue(track);
        }
        if self.ctx.phase == PlaybackPhase::Idle {
            self.ctx.phase = PlaybackPhase::Starting;
            self.send_self(PlayerMessage::StartNext);
        } else {
            self.refresh_prebuffer();
        }
        Ok(count)
    }

    fn state_view(&self) -> PlayerStateView {
        PlayerStateView {
            phase: self.ctx.phase,
            current: self.ctx.current.clone(),
            queue: self.ctx.queue.snapshot(),
            loop_mode: self.ctx.loop_mode,
            volume: self.ctx.volume,
            autoplay: self.ctx.autoplay,
            connected_channel: self.conn.channel().cloned(),
        }
    }

    async fn connect(&mut self, channel: &ChannelId) -> PlayerResult<()> {
        if let Some(events) = self.conn.ensure(channel).await? {
            self.spawn_transport_pump(events);
        }
        Ok(())
    }

    fn spawn_transport_pump(&self, events: flume::Receiver<TransportEvent>) {
        let tx = self.tx.clone();
        tokio::spawn(async move {
            while let Ok(event) = events.recv_async().await {
                if tx.send(PlayerMessage::Transport(event)).await.is_err() {
                    break;
                }
            }
        });
    }

    /// Open the upcoming track's stream in the background so the handoff at
    /// track end is gapless.
    fn spawn_prebuffer(&mut self) {
        let Some(next) = self.ctx.queue.peek_front().cloned() else {
            return;
        };
        if self
            .ctx
            .prebuffered
            .as_ref()
            .map(|pb| pb.track.url == next.url)
            .unwrap_or(false)
        {
            return;
        }
        self.ctx.prebuffered = None;

        let provider = self.provider.clone();
        let tx = self.tx.clone();
        tokio::spawn(async move {
            let stream = provider.open_stream(&next).await;
            let _ = tx
                .send(PlayerMessage::PrebufferReady { track: next, stream })
                .await;
        });
    }

    /// Drop a prebuffer that no longer matches the queue front and, when
    /// something is on the deck, start one for the new front.
    fn refresh_prebuffer(&mut self) {
        let matches_front = match (&self.ctx.prebuffered, self.ctx.queue.peek_front()) {
            (Some(pb), Some(next)) => pb.track.url == next.url,
            (Some(_), None) => false,
            (None, _) => true,
        };
        if !matches_front {
            self.ctx.prebuffered = None;
        }
        if matches!(
            self.ctx.phase,
            PlaybackPhase::Playing | PlaybackPhase::Paused
        ) {
            self.spawn_prebuffer();
        }
    }

    fn schedule_retry(&mut self) {
        self.ctx.retry_count += 1;
        let delay = Duration::from_secs(1u64 << (self.ctx.retry_count - 1).min(6));
        debug!(
            "session {} retry {}/{} in {:?}",
            self.session, self.ctx.retry_count, self.config.max_track_retries, delay
        );
        let epoch = self.ctx.epoch;
        let tx = self.tx.clone();
        tokio::spawn(async move {
            tokio::time::sleep(delay).await;
            let _ = tx.send(PlayerMessage::RetryStart { epoch }).await;
        });
    }

    fn arm_idle_timer(&mut self) {
        self.ctx.idle_generation += 1;
        let generation = self.ctx.idle_generation;
        let timeout = self.idle_timeout;
        let tx = self.tx.clone();
        tokio::spawn(async move {
            tokio::time::sleep(timeout).await;
            let _ = tx.send(PlayerMessage::IdleTimeout { generation }).await;
        });
    }

    fn cancel_idle_timer(&mut self) {
        self.ctx.idle_generation += 1;
    }

    fn send_self(&self, message: PlayerMessage) {
        if self.tx.try_send(message).is_err() {
            warn!("session {} mailbox full, dropped internal message", self.session);
        }
    }

    async fn teardown(&mut self) {
        self.ctx.prebuffered = None;
        self.ctx.queue.clear();
        self.ctx.current = None;
        self.sink.stop().await;
        self.conn.teardown().await;
    }
}
