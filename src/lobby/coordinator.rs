//! Session coordinator
//!
//! Owns one peer's side of the lobby protocol: join-or-create, team
//! assignment, first-claim leader election, readiness aggregation, and the
//! hand-off to the countdown and the bot populator.
//!
//! Replicated state is never accumulated from message deltas. Every
//! `PropertiesChanged` re-reads the directory snapshot, so a lost signal is
//! healed by the next one. One-shot effects (activation, bot spawns) are
//! guarded by flags instead, since they cannot be re-derived.

use std::sync::Arc;
use std::time::Duration;

use tokio::time::{interval, Instant, MissedTickBehavior};
use tracing::{debug, info, warn};

use crate::config::LobbyConfig;
use crate::lobby::bots::{BotFillPlan, BotPopulator};
use crate::lobby::countdown::{CountdownState, MatchStartTimer};
use crate::lobby::hooks::LobbyHooks;
use crate::lobby::player::{AvatarKind, PeerAttribute, PeerAttributes, PeerId, PeerRecord, Team};
use crate::lobby::room::{SessionHandle, SessionSnapshot, SessionTally};
use crate::lobby::store::PeerAttributeStore;
use crate::metrics::LobbyMetrics;
use crate::net::directory::{DirectoryError, SessionDirectory};
use crate::net::protocol::{BotSpawn, LobbyMessage};
use crate::net::transport::{BroadcastTransport, Incoming, TransportError};

/// Upper bound on transport events handled by a single `poll`
const MAX_EVENTS_PER_POLL: usize = 1024;

/// Ticks `run` keeps draining after activation while announced bots are pending
const BOT_SETTLE_TICKS: u32 = 50;

/// Collaborators injected into every coordinator
#[derive(Clone)]
pub struct LobbyContext {
    pub directory: Arc<dyn SessionDirectory>,
    pub hooks: Arc<dyn LobbyHooks>,
    pub metrics: Arc<LobbyMetrics>,
}

/// How the local peer ended up in its session
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum JoinOutcome {
    Joined,
    Created,
}

/// Hand-off to gameplay once the session activates
#[derive(Debug, Clone, PartialEq)]
pub struct MatchStart {
    pub session: SessionHandle,
    pub local_peer: PeerId,
    /// The local peer's record at activation
    pub local: PeerAttributes,
    /// Every human peer at activation, in join order
    pub roster: Vec<PeerRecord>,
}

impl MatchStart {
    pub fn is_leader(&self) -> bool {
        self.local.is_leader
    }
}

/// Join a random matching session, falling back to a single create.
///
/// Two peers racing through here can both miss each other and create
/// separate sessions; nothing deduplicates them.
pub async fn join_or_create(
    directory: &dyn SessionDirectory,
    peer_id: PeerId,
    capacity: usize,
    filter_bucket: u32,
) -> Result<(SessionHandle, JoinOutcome), DirectoryError> {
    match directory.join_random(peer_id, filter_bucket, capacity).await {
        Ok(handle) => Ok((handle, JoinOutcome::Joined)),
        Err(DirectoryError::NotFound) => {
            debug!("No open session for bucket {}, creating one", filter_bucket);
            let handle = directory.create(peer_id, capacity, filter_bucket).await?;
            Ok((handle, JoinOutcome::Created))
        }
        Err(e) => Err(e),
    }
}

/// Broadcast and account for it. Failures are logged, never propagated.
fn send(transport: &dyn BroadcastTransport, metrics: &LobbyMetrics, message: &LobbyMessage) {
    match transport.broadcast(message) {
        Ok(()) => LobbyMetrics::incr(&metrics.broadcasts_sent),
        Err(e) => {
            LobbyMetrics::incr(&metrics.broadcast_failures);
            warn!(
                "Peer {}: broadcast {} failed: {}",
                transport.local_peer(),
                message.kind(),
                e
            );
        }
    }
}

/// One peer's lobby state machine
pub struct SessionCoordinator {
    config: LobbyConfig,
    session: SessionHandle,
    peer_id: PeerId,
    transport: Box<dyn BroadcastTransport>,
    ctx: LobbyContext,
    store: PeerAttributeStore,
    timer: MatchStartTimer,
    bots: BotPopulator,
    /// Last snapshot read from the directory
    view: SessionSnapshot,
    activation_sent: bool,
    match_start: Option<MatchStart>,
    expected_bots: usize,
    leader_missing: bool,
    left: bool,
}

impl SessionCoordinator {
    /// Find or form a session and announce the local peer in it
    pub async fn join_or_create(
        config: LobbyConfig,
        mut transport: Box<dyn BroadcastTransport>,
        ctx: LobbyContext,
    ) -> Result<Self, LobbyError> {
        config.validate().map_err(LobbyError::InvalidConfig)?;
        let peer_id = transport.local_peer();

        let (session, outcome) = match join_or_create(
            ctx.directory.as_ref(),
            peer_id,
            config.capacity,
            config.filter_bucket,
        )
        .await
        {
            Ok(result) => result,
            Err(e) => {
                LobbyMetrics::incr(&ctx.metrics.join_failures);
                warn!("Peer {} cannot form a session: {}", peer_id, e);
                return Err(LobbyError::CannotFormSession(e));
            }
        };

        match outcome {
            JoinOutcome::Joined => LobbyMetrics::incr(&ctx.metrics.sessions_joined),
            JoinOutcome::Created => LobbyMetrics::incr(&ctx.metrics.sessions_created),
        }
        info!("Peer {} {:?} session {}", peer_id, outcome, session.id);

        if let Err(e) = transport.connect(&session) {
            ctx.directory.leave(&session, peer_id);
            return Err(LobbyError::Transport(e));
        }
        ctx.hooks.on_session_entered(&session);

        let mut coordinator = Self::new(config, session, transport, ctx);
        coordinator.on_joined();
        Ok(coordinator)
    }

    fn new(
        config: LobbyConfig,
        session: SessionHandle,
        transport: Box<dyn BroadcastTransport>,
        ctx: LobbyContext,
    ) -> Self {
        let peer_id = transport.local_peer();
        let store = PeerAttributeStore::new(ctx.directory.clone(), session, peer_id);
        Self {
            timer: MatchStartTimer::new(config.countdown),
            bots: BotPopulator::new(config.bot_seed),
            view: SessionSnapshot::empty(session.capacity),
            config,
            session,
            peer_id,
            transport,
            ctx,
            store,
            activation_sent: false,
            match_start: None,
            expected_bots: 0,
            leader_missing: false,
            left: false,
        }
    }

    pub fn peer_id(&self) -> PeerId {
        self.peer_id
    }

    pub fn session(&self) -> &SessionHandle {
        &self.session
    }

    pub fn state(&self) -> CountdownState {
        self.timer.state()
    }

    pub fn is_leader(&self) -> bool {
        self.store.local().is_leader
    }

    pub fn local_attributes(&self) -> &PeerAttributes {
        self.store.local()
    }

    /// Last directory snapshot this peer observed
    pub fn view(&self) -> &SessionSnapshot {
        &self.view
    }

    pub fn tally(&self) -> SessionTally {
        self.view.tally()
    }

    pub fn match_start(&self) -> Option<&MatchStart> {
        self.match_start.as_ref()
    }

    pub fn bots_instantiated(&self) -> bool {
        self.bots.bots_instantiated()
    }

    /// Announced bots not yet observed by this peer
    pub fn pending_bots(&self) -> usize {
        self.expected_bots.saturating_sub(self.bots.observed_count())
    }

    /// Publish the join record: alternating team, default avatar, leader
    /// claim if nobody holds it yet.
    fn on_joined(&mut self) {
        let snapshot = self.read_snapshot().unwrap_or_else(|| self.view.clone());

        let observed = snapshot
            .peers
            .iter()
            .filter(|p| p.peer_id != self.peer_id)
            .count();

        let counts = snapshot.team_counts();
        let team_capacity = self.session.team_capacity();
        let mut team = Team::from_index(observed + 1);
        if counts.get(team) >= team_capacity && counts.get(team.other()) < team_capacity {
            warn!(
                "Peer {}: {:?} already full ({}), joining {:?}",
                self.peer_id,
                team,
                team_capacity,
                team.other()
            );
            team = team.other();
        }

        let claim_leader = !snapshot.has_leader();
        let attributes = PeerAttributes {
            team: Some(team),
            avatar: AvatarKind::default(),
            ready: false,
            is_leader: claim_leader,
        };
        self.store.write_all(&attributes);

        info!(
            "Peer {} joined as #{} on {:?}{}",
            self.peer_id,
            observed + 1,
            team,
            if claim_leader { " (leader)" } else { "" }
        );

        self.view = snapshot;
        self.signal_changed();
    }

    /// Move to the other team unless it is full. Rejection is silent.
    pub fn request_team_change(&mut self, target: Team) -> bool {
        if self.store.local().team == Some(target) {
            return false;
        }

        self.refresh_view();
        let count = self.view.team_counts().get(target);
        if count >= self.session.team_capacity() {
            LobbyMetrics::incr(&self.ctx.metrics.team_changes_rejected);
            debug!(
                "Peer {}: team change to {:?} rejected ({}/{})",
                self.peer_id,
                target,
                count,
                self.session.team_capacity()
            );
            return false;
        }

        self.store.write(PeerAttribute::Team(target));
        self.signal_changed();
        true
    }

    pub fn request_avatar_change(&mut self, avatar: AvatarKind) {
        self.store.write(PeerAttribute::Avatar(avatar));
        self.signal_changed();
    }

    /// One-way: there is no way to unready within a session
    pub fn set_ready(&mut self) {
        if self.store.local().ready {
            return;
        }
        self.store.write(PeerAttribute::Ready(true));
        self.signal_changed();
    }

    /// Drain the transport. Returns the number of events handled.
    pub fn poll(&mut self) -> usize {
        let mut handled = 0;
        while handled < MAX_EVENTS_PER_POLL {
            let Some(incoming) = self.transport.try_recv() else {
                break;
            };
            handled += 1;

            match incoming {
                Incoming::Message { sender, message } => {
                    LobbyMetrics::incr(&self.ctx.metrics.messages_received);
                    self.handle_message(sender, message);
                }
                Incoming::PeerDeparted(peer_id) => self.on_peer_departed(peer_id),
            }
        }
        handled
    }

    /// Advance the countdown by `dt`
    pub fn advance(&mut self, dt: Duration) {
        if self.timer.tick(dt) {
            info!("Peer {}: countdown expired", self.peer_id);
        }
        self.try_activate();
    }

    /// Drive the processing loop until activation, then hand off.
    ///
    /// Keeps draining briefly after activation so announced bots are seen.
    pub async fn run(&mut self) -> Result<MatchStart, LobbyError> {
        let mut ticker = interval(self.config.tick_interval);
        ticker.set_missed_tick_behavior(MissedTickBehavior::Delay);
        let mut last = Instant::now();
        let mut settle_ticks = 0;

        loop {
            ticker.tick().await;
            let now = Instant::now();
            let dt = now - last;
            last = now;

            self.poll();
            self.advance(dt);

            if !self.transport.is_connected() {
                return Err(LobbyError::Transport(TransportError::NotConnected));
            }

            if let Some(start) = &self.match_start {
                if self.pending_bots() == 0 || settle_ticks >= BOT_SETTLE_TICKS {
                    if self.pending_bots() > 0 {
                        warn!(
                            "Peer {}: handing off with {} announced bots unseen",
                            self.peer_id,
                            self.pending_bots()
                        );
                    }
                    return Ok(start.clone());
                }
                settle_ticks += 1;
            }
        }
    }

    /// Leave the session and the broadcast group
    pub fn leave(mut self) {
        self.depart();
    }

    /// Directory before transport: a peer handling the departure notice
    /// must not find this peer in its next snapshot
    fn depart(&mut self) {
        if self.left {
            return;
        }
        self.left = true;

        info!("Peer {} leaving session {}", self.peer_id, self.session.id);
        self.ctx.directory.leave(&self.session, self.peer_id);
        self.transport.disconnect();
    }

    pub(crate) fn handle_message(&mut self, sender: PeerId, message: LobbyMessage) {
        match message {
            LobbyMessage::PropertiesChanged => self.on_properties_changed(),
            LobbyMessage::StartTimer => {
                if self.timer.start() {
                    LobbyMetrics::incr(&self.ctx.metrics.timer_starts);
                    debug!("Peer {}: countdown started by {}", self.peer_id, sender);
                }
            }
            LobbyMessage::StopTimer => {
                if self.timer.stop() {
                    LobbyMetrics::incr(&self.ctx.metrics.timer_stops);
                    info!("Peer {}: countdown stopped by {}", self.peer_id, sender);
                    // A stale stop from a departure that has since been refilled
                    self.refresh_view();
                    self.evaluate();
                }
            }
            LobbyMessage::Activate => self.on_activate(sender),
            LobbyMessage::InstantiateBot(spawn) => self.on_bot_announced(spawn),
        }
    }

    fn on_properties_changed(&mut self) {
        self.refresh_view();
        self.evaluate();
    }

    fn on_peer_departed(&mut self, peer_id: PeerId) {
        let departed = self.view.remove(peer_id);
        self.refresh_view();
        // The directory may lag the transport
        self.view.remove(peer_id);

        if departed.is_some_and(|p| p.attributes.is_leader) {
            warn!("Peer {}: leader {} departed", self.peer_id, peer_id);
        } else {
            debug!("Peer {}: {} departed", self.peer_id, peer_id);
        }

        let tally = self.view.tally();
        if self.timer.is_counting_down() && !tally.is_full() {
            info!(
                "Peer {}: session dropped to {}/{}, stopping countdown",
                self.peer_id, tally.connected, tally.capacity
            );
            self.broadcast(&LobbyMessage::StopTimer);
        }

        self.evaluate();
    }

    /// Recompute from the current view and feed the countdown
    fn evaluate(&mut self) {
        let tally = self.view.tally();
        self.check_leader(&tally);

        if tally.is_full() && self.timer.is_idle() && self.timer.start() {
            LobbyMetrics::incr(&self.ctx.metrics.timer_starts);
            info!(
                "Peer {}: session full ({}/{}), countdown {:?}",
                self.peer_id,
                tally.connected,
                tally.capacity,
                self.timer.duration()
            );
            if self.is_leader() {
                self.broadcast(&LobbyMessage::StartTimer);
            }
        }

        if tally.all_ready() && self.timer.all_ready() {
            LobbyMetrics::incr(&self.ctx.metrics.all_ready_shortcuts);
            info!(
                "Peer {}: all {} peers ready, starting",
                self.peer_id, tally.connected
            );
        }

        self.try_activate();
    }

    fn check_leader(&mut self, tally: &SessionTally) {
        if tally.leader_present {
            self.leader_missing = false;
            return;
        }

        if !self.leader_missing {
            warn!("Peer {}: session {} has no leader", self.peer_id, self.session.id);
            self.leader_missing = true;
        }

        if self.config.reelect_on_leader_departure
            && !self.is_leader()
            && self.view.lowest_peer() == Some(self.peer_id)
        {
            info!("Peer {}: claiming leadership (lowest id present)", self.peer_id);
            self.store.write(PeerAttribute::Leader(true));
            self.signal_changed();
        }
    }

    /// Starting -> Started, leader-gated and at most once
    fn try_activate(&mut self) {
        if !self.timer.is_starting() || !self.is_leader() || self.activation_sent {
            return;
        }
        self.activation_sent = true;

        self.ctx.directory.close(&self.session);
        info!("Peer {}: activating session {}", self.peer_id, self.session.id);
        self.broadcast(&LobbyMessage::Activate);
    }

    fn on_activate(&mut self, sender: PeerId) {
        if self.match_start.is_some() {
            debug!("Peer {}: duplicate Activate from {}", self.peer_id, sender);
            return;
        }

        self.refresh_view();
        self.timer.mark_started();
        LobbyMetrics::incr(&self.ctx.metrics.activations);

        let plan = BotFillPlan::from_counts(self.session.capacity, self.view.team_counts());
        self.expected_bots = plan.total();

        let start = MatchStart {
            session: self.session,
            local_peer: self.peer_id,
            local: *self.store.local(),
            roster: self.view.peers.clone(),
        };
        info!(
            "Peer {}: match started with {} peers, {} bots to fill",
            self.peer_id,
            start.roster.len(),
            plan.total()
        );
        self.ctx.hooks.on_match_start(&start);
        self.match_start = Some(start);

        if self.is_leader() {
            let transport = self.transport.as_ref();
            let metrics = self.ctx.metrics.as_ref();
            let spawns = self.bots.populate(&plan, transport, |spawn| {
                send(transport, metrics, &LobbyMessage::InstantiateBot(*spawn));
            });
            LobbyMetrics::add(&metrics.bots_spawned, spawns.len() as u64);
        }
    }

    fn on_bot_announced(&mut self, spawn: BotSpawn) {
        if !self.bots.observe(&spawn) {
            debug!("Peer {}: duplicate bot {}", self.peer_id, spawn.id);
            return;
        }
        self.ctx.hooks.on_bot_instantiated(&spawn, self.is_leader());
    }

    fn read_snapshot(&self) -> Option<SessionSnapshot> {
        match self.ctx.directory.snapshot(&self.session) {
            Ok(snapshot) => Some(snapshot),
            Err(e) => {
                warn!("Peer {}: snapshot unavailable: {}", self.peer_id, e);
                None
            }
        }
    }

    fn refresh_view(&mut self) {
        if let Some(snapshot) = self.read_snapshot() {
            self.view = snapshot;
        }
    }

    fn signal_changed(&self) {
        self.broadcast(&LobbyMessage::PropertiesChanged);
    }

    fn broadcast(&self, message: &LobbyMessage) {
        send(self.transport.as_ref(), &self.ctx.metrics, message);
    }

    /// Throw away queued events, as if the transport had lost them
    #[cfg(test)]
    pub(crate) fn discard_pending(&mut self) -> usize {
        std::iter::from_fn(|| self.transport.try_recv()).count()
    }
}

impl Drop for SessionCoordinator {
    fn drop(&mut self) {
        self.depart();
    }
}

/// Coordinator errors
#[derive(Debug, thiserror::Error)]
pub enum LobbyError {
    #[error("Cannot form session: {0}")]
    CannotFormSession(#[from] DirectoryError),
    #[error("Transport error: {0}")]
    Transport(#[from] TransportError),
    #[error("Invalid configuration: {0}")]
    InvalidConfig(String),
}

#[cfg(test)]
mod tests {
    use std::sync::atomic::{AtomicUsize, Ordering};

    use async_trait::async_trait;
    use uuid::Uuid;

    use super::*;
    use crate::lobby::hooks::recording::RecordingHooks;
    use crate::lobby::manager::InMemoryDirectory;
    use crate::net::transport::LocalBus;

    struct Harness {
        directory: InMemoryDirectory,
        bus: LocalBus,
        metrics: Arc<LobbyMetrics>,
        config: LobbyConfig,
    }

    impl Harness {
        fn new(capacity: usize) -> Self {
            Self::with_config(LobbyConfig {
                capacity,
                countdown: Duration::from_secs(1),
                bot_seed: Some(42),
                ..Default::default()
            })
        }

        fn with_config(config: LobbyConfig) -> Self {
            Self {
                directory: InMemoryDirectory::new(config.max_sessions),
                bus: LocalBus::new(),
                metrics: Arc::new(LobbyMetrics::new()),
                config,
            }
        }

        async fn join_as(&self, peer_id: PeerId) -> (SessionCoordinator, RecordingHooks) {
            let hooks = RecordingHooks::default();
            let ctx = LobbyContext {
                directory: Arc::new(self.directory.clone()),
                hooks: Arc::new(hooks.clone()),
                metrics: self.metrics.clone(),
            };
            let transport = Box::new(self.bus.endpoint(peer_id));
            let coordinator = SessionCoordinator::join_or_create(self.config.clone(), transport, ctx)
                .await
                .unwrap();
            (coordinator, hooks)
        }

        async fn join(&self) -> (SessionCoordinator, RecordingHooks) {
            self.join_as(Uuid::new_v4()).await
        }

        /// Join `n` peers one after another, letting the session settle between joins
        async fn join_many(&self, n: usize) -> (Vec<SessionCoordinator>, Vec<RecordingHooks>) {
            let mut peers = Vec::new();
            let mut hooks = Vec::new();
            for _ in 0..n {
                let (peer, hook) = self.join().await;
                peers.push(peer);
                hooks.push(hook);
                pump(&mut peers);
            }
            (peers, hooks)
        }
    }

    /// Deliver messages until every peer is quiescent
    fn pump(peers: &mut [SessionCoordinator]) {
        loop {
            let handled: usize = peers.iter_mut().map(|p| p.poll()).sum();
            if handled == 0 {
                break;
            }
        }
    }

    fn leaders(peers: &[SessionCoordinator]) -> usize {
        peers.iter().filter(|p| p.is_leader()).count()
    }

    #[tokio::test]
    async fn test_three_peer_scenario() {
        let harness = Harness::new(6);
        let (mut peers, hooks) = harness.join_many(3).await;

        // A -> (0+1)%2, B -> (1+1)%2, C -> (2+1)%2
        assert_eq!(peers[0].local_attributes().team, Some(Team::Blue));
        assert_eq!(peers[1].local_attributes().team, Some(Team::Red));
        assert_eq!(peers[2].local_attributes().team, Some(Team::Blue));
        assert!(peers[0].is_leader());
        assert_eq!(leaders(&peers), 1);

        for peer in peers.iter_mut() {
            peer.set_ready();
        }
        pump(&mut peers);

        for (peer, hook) in peers.iter().zip(&hooks) {
            assert_eq!(peer.state(), CountdownState::Started);
            assert_eq!(hook.match_starts(), 1);
            assert_eq!(peer.match_start().unwrap().roster.len(), 3);
            assert_eq!(peer.pending_bots(), 0);

            let bots = hook.bots();
            assert_eq!(bots.len(), 3);
            assert_eq!(bots.iter().filter(|(s, _)| s.team == Team::Red).count(), 2);
            assert_eq!(bots.iter().filter(|(s, _)| s.team == Team::Blue).count(), 1);
        }

        // Only the leader drives the bots
        assert!(hooks[0].bots().iter().all(|(_, authoritative)| *authoritative));
        assert!(hooks[1].bots().iter().all(|(_, authoritative)| !*authoritative));
        assert!(hooks[2].bots().iter().all(|(_, authoritative)| !*authoritative));

        // 3 peers + 3 bots fill the session
        let counts = peers[0].view().team_counts();
        let plan = BotFillPlan::from_counts(6, counts);
        assert_eq!(counts.total() + plan.total(), 6);
        assert_eq!(LobbyMetrics::get(&harness.metrics.bots_spawned), 3);

        let snapshot = harness.directory.snapshot(peers[0].session()).unwrap();
        assert!(!snapshot.is_open);
    }

    #[tokio::test]
    async fn test_countdown_waits_for_full_session() {
        let harness = Harness::new(6);
        let mut peers = Vec::new();

        for _ in 0..5 {
            peers.push(harness.join().await.0);
            pump(&mut peers);
            assert!(peers.iter().all(|p| p.state() == CountdownState::Idle));
        }

        peers.push(harness.join().await.0);
        pump(&mut peers);

        for peer in &peers {
            assert!(matches!(peer.state(), CountdownState::CountingDown { .. }));
        }
        assert_eq!(leaders(&peers), 1);
    }

    #[tokio::test]
    async fn test_departure_stops_countdown_everywhere() {
        let harness = Harness::new(6);
        let (mut peers, _hooks) = harness.join_many(6).await;
        assert!(peers.iter().all(|p| matches!(p.state(), CountdownState::CountingDown { .. })));

        let departing = peers.pop().unwrap();
        departing.leave();
        pump(&mut peers);

        for peer in &peers {
            assert_eq!(peer.state(), CountdownState::Idle);
            assert_eq!(peer.tally().connected, 5);
        }
        assert!(LobbyMetrics::get(&harness.metrics.timer_stops) >= 5);

        // Refilling restarts with the full duration
        peers.push(harness.join().await.0);
        pump(&mut peers);
        for peer in &peers {
            assert_eq!(peer.state(), CountdownState::CountingDown { remaining: Duration::from_secs(1) });
        }
    }

    #[tokio::test]
    async fn test_dropped_peer_leaves_directory() {
        let harness = Harness::new(4);
        let (mut peers, _hooks) = harness.join_many(3).await;

        // Dropped without leave(), as when its task is aborted
        drop(peers.pop().unwrap());
        pump(&mut peers);

        for peer in peers.iter_mut() {
            peer.set_ready();
        }
        pump(&mut peers);

        for peer in &peers {
            assert_eq!(peer.tally().connected, 2);
            assert_eq!(peer.tally().ready, 2);
            assert_eq!(peer.state(), CountdownState::Started);
        }
        let snapshot = harness.directory.snapshot(peers[0].session()).unwrap();
        assert_eq!(snapshot.connected_count(), 2);
    }

    #[tokio::test]
    async fn test_stale_stop_timer_restarts_full_session() {
        let harness = Harness::new(4);
        let (mut peers, _hooks) = harness.join_many(4).await;
        assert!(peers.iter().all(|p| p.timer.is_counting_down()));

        let sender = peers[3].peer_id();
        peers[1].handle_message(sender, LobbyMessage::StopTimer);

        assert_eq!(peers[1].tally().connected, 4);
        assert_eq!(
            peers[1].state(),
            CountdownState::CountingDown { remaining: Duration::from_secs(1) }
        );
        pump(&mut peers);
        assert!(peers.iter().all(|p| p.timer.is_counting_down()));
    }

    #[tokio::test]
    async fn test_countdown_expiry_activates() {
        let harness = Harness::new(2);
        let (mut peers, hooks) = harness.join_many(2).await;

        for peer in peers.iter_mut() {
            peer.advance(Duration::from_millis(500));
        }
        pump(&mut peers);
        assert!(peers.iter().all(|p| p.match_start().is_none()));

        for peer in peers.iter_mut() {
            peer.advance(Duration::from_millis(500));
        }
        pump(&mut peers);

        for (peer, hook) in peers.iter().zip(&hooks) {
            assert!(peer.match_start().is_some());
            assert_eq!(hook.match_starts(), 1);
            // 1v1 is already balanced
            assert!(hook.bots().is_empty());
        }
        assert_eq!(LobbyMetrics::get(&harness.metrics.all_ready_shortcuts), 0);
    }

    #[tokio::test]
    async fn test_all_ready_shortcut_before_full() {
        let harness = Harness::new(4);
        let (mut peers, hooks) = harness.join_many(2).await;

        for peer in peers.iter_mut() {
            peer.set_ready();
        }
        pump(&mut peers);

        assert_eq!(LobbyMetrics::get(&harness.metrics.timer_starts), 0);
        for (peer, hook) in peers.iter().zip(&hooks) {
            assert_eq!(peer.state(), CountdownState::Started);
            assert_eq!(hook.bots().len(), 2);
        }
    }

    #[tokio::test]
    async fn test_partial_ready_does_not_start() {
        let harness = Harness::new(4);
        let (mut peers, _hooks) = harness.join_many(3).await;

        peers[0].set_ready();
        peers[1].set_ready();
        pump(&mut peers);

        assert!(peers.iter().all(|p| p.state() == CountdownState::Idle));
        assert_eq!(peers[2].tally().ready, 2);
    }

    #[tokio::test]
    async fn test_duplicate_activate_is_ignored() {
        let harness = Harness::new(4);
        let (mut peers, hooks) = harness.join_many(2).await;
        let leader_id = peers[0].peer_id();

        for peer in peers.iter_mut() {
            peer.set_ready();
        }
        pump(&mut peers);
        assert_eq!(hooks[0].bots().len(), 2);

        peers[0].handle_message(leader_id, LobbyMessage::Activate);
        peers[1].handle_message(leader_id, LobbyMessage::Activate);
        pump(&mut peers);

        assert_eq!(hooks[0].match_starts(), 1);
        assert_eq!(hooks[1].match_starts(), 1);
        assert_eq!(hooks[0].bots().len(), 2);
        assert_eq!(hooks[1].bots().len(), 2);
        assert_eq!(LobbyMetrics::get(&harness.metrics.bots_spawned), 2);
    }

    #[tokio::test]
    async fn test_duplicate_bot_announcement_spawns_once() {
        let harness = Harness::new(2);
        let (mut peer, hooks) = harness.join().await;
        let spawn = BotSpawn {
            id: 77,
            avatar: AvatarKind::Scout,
            team: Team::Red,
        };

        peer.handle_message(peer.peer_id(), LobbyMessage::InstantiateBot(spawn));
        peer.handle_message(peer.peer_id(), LobbyMessage::InstantiateBot(spawn));

        assert_eq!(hooks.bots(), vec![(spawn, true)]);
    }

    #[tokio::test]
    async fn test_team_change_rejected_when_full() {
        let harness = Harness::new(2);
        let (mut peers, _hooks) = harness.join_many(2).await;
        let sent_before = LobbyMetrics::get(&harness.metrics.broadcasts_sent);

        assert!(!peers[0].request_team_change(Team::Red));

        assert_eq!(peers[0].local_attributes().team, Some(Team::Blue));
        assert_eq!(LobbyMetrics::get(&harness.metrics.team_changes_rejected), 1);
        assert_eq!(LobbyMetrics::get(&harness.metrics.broadcasts_sent), sent_before);
    }

    #[tokio::test]
    async fn test_team_change_accepted_with_room() {
        let harness = Harness::new(4);
        let (mut peers, _hooks) = harness.join_many(2).await;

        assert!(peers[0].request_team_change(Team::Red));
        pump(&mut peers);

        let counts = peers[1].view().team_counts();
        assert_eq!(counts.get(Team::Red), 2);
        assert_eq!(counts.get(Team::Blue), 0);
        // Already there
        assert!(!peers[0].request_team_change(Team::Red));
    }

    #[tokio::test]
    async fn test_join_falls_back_to_other_team_when_full() {
        let harness = Harness::new(4);
        let (mut peers, _hooks) = harness.join_many(3).await;
        // Blue = {A, C}, Red = {B}
        let b = peers.remove(1);
        b.leave();
        pump(&mut peers);

        // Alternation would put D on Blue, which is full
        let (d, _) = harness.join().await;
        peers.push(d);
        pump(&mut peers);

        assert_eq!(peers[2].local_attributes().team, Some(Team::Red));
        let counts = peers[0].view().team_counts();
        assert!(counts.get(Team::Red) <= 2 && counts.get(Team::Blue) <= 2);
    }

    #[tokio::test]
    async fn test_lost_signal_is_healed_by_next_snapshot() {
        let harness = Harness::new(4);
        let (mut peers, _hooks) = harness.join_many(2).await;
        let a_id = peers[0].peer_id();

        peers[0].set_ready();
        peers[1].discard_pending();
        pump(&mut peers);
        assert!(!peers[1].view().get(a_id).unwrap().attributes.ready);

        peers[0].request_avatar_change(AvatarKind::Heavy);
        pump(&mut peers);

        let a = peers[1].view().get(a_id).unwrap();
        assert!(a.attributes.ready);
        assert_eq!(a.attributes.avatar, AvatarKind::Heavy);
    }

    #[tokio::test]
    async fn test_leader_departure_is_not_repaired() {
        let harness = Harness::new(4);
        let (mut peers, hooks) = harness.join_many(3).await;

        let leader = peers.remove(0);
        assert!(leader.is_leader());
        leader.leave();
        pump(&mut peers);

        assert_eq!(leaders(&peers), 0);

        for peer in peers.iter_mut() {
            peer.set_ready();
        }
        pump(&mut peers);

        // Everyone is ready but nobody may activate
        for peer in &peers {
            assert_eq!(peer.state(), CountdownState::Starting);
            assert!(peer.match_start().is_none());
        }
        assert_eq!(hooks[1].match_starts(), 0);
    }

    #[tokio::test]
    async fn test_leader_reelection_when_enabled() {
        let harness = Harness::with_config(LobbyConfig {
            capacity: 4,
            reelect_on_leader_departure: true,
            bot_seed: Some(3),
            ..Default::default()
        });
        let (mut peers, hooks) = harness.join_many(3).await;

        let leader = peers.remove(0);
        leader.leave();
        pump(&mut peers);

        assert_eq!(leaders(&peers), 1);
        let lowest = peers.iter().map(|p| p.peer_id()).min().unwrap();
        assert!(peers.iter().find(|p| p.peer_id() == lowest).unwrap().is_leader());

        for peer in peers.iter_mut() {
            peer.set_ready();
        }
        pump(&mut peers);

        for peer in &peers {
            assert_eq!(peer.state(), CountdownState::Started);
        }
        // 2 humans left in a 2v2
        assert_eq!(hooks[1].bots().len(), 2);
    }

    #[tokio::test]
    async fn test_single_leader_after_sequential_joins() {
        let harness = Harness::new(6);
        let (peers, _hooks) = harness.join_many(6).await;

        let snapshot = harness.directory.snapshot(peers[0].session()).unwrap();
        assert_eq!(snapshot.leaders().count(), 1);
        assert_eq!(leaders(&peers), 1);

        let counts = snapshot.team_counts();
        assert_eq!(counts.get(Team::Red), 3);
        assert_eq!(counts.get(Team::Blue), 3);
    }

    #[tokio::test]
    async fn test_buckets_do_not_mix() {
        let harness = Harness::new(4);
        let (a, _) = harness.join().await;

        let other = Harness {
            directory: harness.directory.clone(),
            bus: harness.bus.clone(),
            metrics: harness.metrics.clone(),
            config: LobbyConfig {
                filter_bucket: 9,
                ..harness.config.clone()
            },
        };
        let (b, _) = other.join().await;

        assert_ne!(a.session().id, b.session().id);
        assert_eq!(LobbyMetrics::get(&harness.metrics.sessions_created), 2);
    }

    #[tokio::test]
    async fn test_entering_session_connects_chat() {
        let harness = Harness::new(2);
        let (_peer, hooks) = harness.join().await;

        assert_eq!(
            hooks.events().first(),
            Some(&crate::lobby::hooks::recording::HookEvent::SessionEntered)
        );
    }

    #[tokio::test]
    async fn test_run_hands_off_match_start() {
        let harness = Harness::with_config(LobbyConfig {
            capacity: 2,
            countdown: Duration::from_millis(30),
            tick_interval: Duration::from_millis(5),
            bot_seed: Some(5),
            ..Default::default()
        });
        let (mut a, _) = harness.join().await;
        let (mut b, _) = harness.join().await;

        let (a_start, b_start) = tokio::join!(a.run(), b.run());

        let a_start = a_start.unwrap();
        let b_start = b_start.unwrap();
        assert_eq!(a_start.session, b_start.session);
        assert!(a_start.is_leader() ^ b_start.is_leader());
    }

    struct FailingDirectory {
        creates: AtomicUsize,
        join_error: DirectoryError,
    }

    #[async_trait]
    impl SessionDirectory for FailingDirectory {
        async fn join_random(&self, _: PeerId, _: u32, _: usize) -> Result<SessionHandle, DirectoryError> {
            Err(self.join_error.clone())
        }

        async fn create(&self, _: PeerId, _: usize, _: u32) -> Result<SessionHandle, DirectoryError> {
            self.creates.fetch_add(1, Ordering::SeqCst);
            Err(DirectoryError::Unavailable("create refused".to_string()))
        }

        fn snapshot(&self, _: &SessionHandle) -> Result<SessionSnapshot, DirectoryError> {
            Err(DirectoryError::UnknownSession)
        }

        fn set_self_attribute(&self, _: &SessionHandle, _: PeerId, _: PeerAttribute) {}

        fn leave(&self, _: &SessionHandle, _: PeerId) {}

        fn close(&self, _: &SessionHandle) {}
    }

    #[tokio::test]
    async fn test_create_is_attempted_once_after_not_found() {
        let directory = FailingDirectory {
            creates: AtomicUsize::new(0),
            join_error: DirectoryError::NotFound,
        };

        let result = join_or_create(&directory, Uuid::new_v4(), 4, 0).await;

        assert_eq!(result, Err(DirectoryError::Unavailable("create refused".to_string())));
        assert_eq!(directory.creates.load(Ordering::SeqCst), 1);
    }

    #[tokio::test]
    async fn test_other_join_errors_do_not_create() {
        let directory = Arc::new(FailingDirectory {
            creates: AtomicUsize::new(0),
            join_error: DirectoryError::Unavailable("offline".to_string()),
        });
        let metrics = Arc::new(LobbyMetrics::new());
        let ctx = LobbyContext {
            directory: directory.clone(),
            hooks: Arc::new(RecordingHooks::default()),
            metrics: metrics.clone(),
        };
        let bus = LocalBus::new();
        let config = LobbyConfig {
            capacity: 4,
            ..Default::default()
        };

        let result =
            SessionCoordinator::join_or_create(config, Box::new(bus.endpoint(Uuid::new_v4())), ctx).await;

        assert!(matches!(result, Err(LobbyError::CannotFormSession(DirectoryError::Unavailable(_)))));
        assert_eq!(directory.creates.load(Ordering::SeqCst), 0);
        assert_eq!(LobbyMetrics::get(&metrics.join_failures), 1);
    }

    #[tokio::test]
    async fn test_invalid_config_rejected() {
        let harness = Harness::new(2);
        let ctx = LobbyContext {
            directory: Arc::new(harness.directory.clone()),
            hooks: Arc::new(RecordingHooks::default()),
            metrics: harness.metrics.clone(),
        };
        let config = LobbyConfig {
            capacity: 3,
            ..Default::default()
        };

        let result =
            SessionCoordinator::join_or_create(config, Box::new(harness.bus.endpoint(Uuid::new_v4())), ctx).await;

        assert!(matches!(result, Err(LobbyError::InvalidConfig(_))));
        assert_eq!(harness.directory.session_count(), 0);
    }
}
