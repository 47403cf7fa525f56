//! Simulated game-server lifecycle and telemetry for the dashboard.
//! No process is managed; state changes and metrics are local.

use chrono::{DateTime, Local, Utc};
use parking_lot::RwLock;
use rand::seq::SliceRandom;
use rand::Rng;
use serde::Serialize;
use std::collections::VecDeque;
use std::sync::Arc;
use std::time::Duration;
use thiserror::Error;
use tokio_util::sync::CancellationToken;
use tracing::{debug, info};

use crate::config::GameConfig;
use crate::message_log::EntryKind;
use crate::session::ConsoleSession;

/// Bars shown in the dashboard's resource chart.
pub const SAMPLE_LIMIT: usize = 12;
pub const EVENT_LIMIT: usize = 20;

const PLAYER_NAMES: &[&str] = &["Steve", "Alex", "Notch", "Jeb", "Dinnerbone", "Grumm"];

#[derive(Clone, Copy, Debug, PartialEq, Eq, Serialize)]
#[serde(rename_all = "lowercase")]
pub enum ServerStatus {
    Online,
    Offline,
    Starting,
}

#[derive(Clone, Debug, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct ServerInfo {
    pub status: ServerStatus,
    pub cpu: u8,
    pub memory: u8,
    pub players: u32,
    pub max_players: u32,
    pub uptime: String,
}

#[derive(Clone, Debug, PartialEq, Eq, Serialize)]
pub struct ResourceSample {
    pub time: String,
    pub cpu: u8,
    pub memory: u8,
}

#[derive(Clone, Copy, Debug, PartialEq, Eq, Serialize)]
#[serde(rename_all = "lowercase")]
pub enum EventKind {
    Join,
    Leave,
    System,
}

#[derive(Clone, Debug, PartialEq, Eq, Serialize)]
pub struct ServerEvent {
    pub time: String,
    pub message: String,
    #[serde(rename = "type")]
    pub kind: EventKind,
}

/// Chart samples oldest first, events newest first.
#[derive(Clone, Debug, Serialize)]
pub struct ServerHistory {
    pub samples: Vec<ResourceSample>,
    pub events: Vec<ServerEvent>,
}

#[derive(Debug, Error, PartialEq, Eq)]
pub enum LifecycleError {
    #[error("server is already online")]
    AlreadyOnline,
    #[error("server is already offline")]
    AlreadyOffline,
    #[error("server is still starting")]
    Starting,
}

#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub enum LifecycleAction {
    Start,
    Stop,
    Restart,
}

impl LifecycleAction {
    pub fn as_str(self) -> &'static str {
        match self {
            LifecycleAction::Start => "start",
            LifecycleAction::Stop => "stop",
            LifecycleAction::Restart => "restart",
        }
    }
}

struct Inner {
    status: ServerStatus,
    cpu: u8,
    memory: u8,
    players: u32,
    started_at: Option<DateTime<Utc>>,
    // Bumped on every action so a stale restart timer cannot flip the status.
    generation: u64,
    samples: VecDeque<ResourceSample>,
    events: VecDeque<ServerEvent>,
}

impl Inner {
    fn go_online(&mut self) {
        self.status = ServerStatus::Online;
        self.cpu = 12;
        self.memory = 45;
        self.started_at = Some(Utc::now());
    }

    fn record(&mut self, kind: EventKind, message: impl Into<String>) {
        self.events.push_front(ServerEvent {
            time: clock(),
            message: message.into(),
            kind,
        });
        self.events.truncate(EVENT_LIMIT);
    }
}

#[derive(Clone)]
pub struct GameServer {
    inner: Arc<RwLock<Inner>>,
    max_players: u32,
    restart_delay: Duration,
    console: Option<Arc<ConsoleSession>>,
}

impl GameServer {
    pub fn new(config: &GameConfig) -> Self {
        let mut inner = Inner {
            status: ServerStatus::Online,
            cpu: 12,
            memory: 45,
            players: 8.min(config.max_players),
            started_at: Some(Utc::now()),
            generation: 0,
            samples: VecDeque::with_capacity(SAMPLE_LIMIT),
            events: VecDeque::with_capacity(EVENT_LIMIT),
        };
        inner.record(EventKind::System, "Server started successfully");
        Self {
            inner: Arc::new(RwLock::new(inner)),
            max_players: config.max_players,
            restart_delay: Duration::from_millis(config.restart_delay_ms),
            console: None,
        }
    }

    /// Mirrors lifecycle changes into the console log.
    pub fn with_console(mut self, session: Arc<ConsoleSession>) -> Self {
        self.console = Some(session);
        self
    }

    pub fn status(&self) -> ServerStatus {
        self.inner.read().status
    }

    /// Current metrics. While online, CPU, memory and player count drift a
    /// little on every read; players coming and going show up as events.
    pub fn info(&self) -> ServerInfo {
        let mut inner = self.inner.write();
        if inner.status == ServerStatus::Online {
            let mut rng = rand::thread_rng();
            inner.cpu = drift(inner.cpu, rng.gen_range(-3..=3), 1, 100);
            inner.memory = drift(inner.memory, rng.gen_range(-1..=1), 10, 95);
            let before = inner.players;
            let players = before as i64 + rng.gen_range(-1..=1);
            inner.players = players.clamp(0, self.max_players as i64) as u32;

            let name = PLAYER_NAMES.choose(&mut rng).copied().unwrap_or("Steve");
            if inner.players > before {
                inner.record(EventKind::Join, format!("Player \"{name}\" joined"));
            } else if inner.players < before {
                inner.record(EventKind::Leave, format!("Player \"{name}\" left"));
            }
        }

        ServerInfo {
            status: inner.status,
            cpu: inner.cpu,
            memory: inner.memory,
            players: inner.players,
            max_players: self.max_players,
            uptime: inner
                .started_at
                .filter(|_| inner.status == ServerStatus::Online)
                .map(uptime_string)
                .unwrap_or_else(|| "0d 0h 0m".to_string()),
        }
    }

    /// Takes one chart sample from the current metrics.
    pub fn record_sample(&self) -> ResourceSample {
        let info = self.info();
        let sample = ResourceSample {
            time: clock(),
            cpu: info.cpu,
            memory: info.memory,
        };
        let mut inner = self.inner.write();
        if inner.samples.len() == SAMPLE_LIMIT {
            inner.samples.pop_front();
        }
        inner.samples.push_back(sample.clone());
        sample
    }

    pub fn history(&self) -> ServerHistory {
        let inner = self.inner.read();
        ServerHistory {
            samples: inner.samples.iter().cloned().collect(),
            events: inner.events.iter().cloned().collect(),
        }
    }

    /// Samples on a fixed period until `shutdown` fires.
    pub async fn run_sampler(self, every: Duration, shutdown: CancellationToken) {
        let mut ticker = tokio::time::interval(every);
        ticker.set_missed_tick_behavior(tokio::time::MissedTickBehavior::Skip);
        loop {
            tokio::select! {
                _ = shutdown.cancelled() => break,
                _ = ticker.tick() => {
                    let sample = self.record_sample();
                    debug!(cpu = sample.cpu, memory = sample.memory, "resource sample");
                }
            }
        }
    }

    pub fn apply(&self, action: LifecycleAction) -> Result<ServerInfo, LifecycleError> {
        match action {
            LifecycleAction::Start => self.start()?,
            LifecycleAction::Stop => self.stop()?,
            LifecycleAction::Restart => self.restart(),
        }
        Ok(self.info())
    }

    pub fn start(&self) -> Result<(), LifecycleError> {
        {
            let mut inner = self.inner.write();
            match inner.status {
                ServerStatus::Online => return Err(LifecycleError::AlreadyOnline),
                ServerStatus::Starting => return Err(LifecycleError::Starting),
                ServerStatus::Offline => {}
            }
            inner.generation += 1;
            inner.go_online();
            inner.record(EventKind::System, "Server started successfully");
        }
        info!("game server started");
        self.announce(EntryKind::Success, "Server started");
        Ok(())
    }

    pub fn stop(&self) -> Result<(), LifecycleError> {
        {
            let mut inner = self.inner.write();
            if inner.status == ServerStatus::Offline {
                return Err(LifecycleError::AlreadyOffline);
            }
            inner.generation += 1;
            inner.status = ServerStatus::Offline;
            inner.cpu = 0;
            inner.memory = 0;
            inner.players = 0;
            inner.started_at = None;
            inner.record(EventKind::System, "Server stopped");
        }
        info!("game server stopped");
        self.announce(EntryKind::Warning, "Server stopped");
        Ok(())
    }

    /// Goes to `Starting` immediately and back online after the restart delay.
    pub fn restart(&self) {
        let generation = {
            let mut inner = self.inner.write();
            inner.generation += 1;
            inner.status = ServerStatus::Starting;
            inner.players = 0;
            inner.record(EventKind::System, "Server restarting");
            inner.generation
        };
        info!(delay_ms = self.restart_delay.as_millis() as u64, "game server restarting");
        self.announce(EntryKind::Info, "Restarting server...");

        let server = self.clone();
        tokio::spawn(async move {
            tokio::time::sleep(server.restart_delay).await;
            let finished = {
                let mut inner = server.inner.write();
                if inner.generation == generation && inner.status == ServerStatus::Starting {
                    inner.go_online();
                    inner.record(EventKind::System, "Server restarted");
                    true
                } else {
                    false
                }
            };
            if finished {
                server.announce(EntryKind::Success, "Server restarted");
            }
        });
    }

    fn announce(&self, kind: EntryKind, text: &str) {
        if let Some(session) = &self.console {
            session.log().append(kind, text);
        }
    }
}

fn clock() -> String {
    Local::now().format("%H:%M:%S").to_string()
}

fn drift(value: u8, delta: i32, min: i32, max: i32) -> u8 {
    (value as i32 + delta).clamp(min, max) as u8
}

fn uptime_string(started_at: DateTime<Utc>) -> String {
    let elapsed = Utc::now().signed_duration_since(started_at);
    let days = elapsed.num_days();
    let hours = elapsed.num_hours() % 24;
    let minutes = elapsed.num_minutes() % 60;
    format!("{}d {}h {}m", days, hours, minutes)
}

#[cfg(test)]
mod tests {
    use super::*;

    fn game() -> GameConfig {
        GameConfig {
            name: "Survival_World".to_string(),
            max_players: 20,
            restart_delay_ms: 2000,
            sample_interval_ms: 5000,
        }
    }

    fn messages(server: &GameServer, kind: EventKind) -> Vec<String> {
        server
            .history()
            .events
            .into_iter()
            .filter(|e| e.kind == kind)
            .map(|e| e.message)
            .collect()
    }

    #[test]
    fn starts_online_with_seed_metrics() {
        let server = GameServer::new(&game());
        let info = server.info();
        assert_eq!(info.status, ServerStatus::Online);
        assert_eq!(info.max_players, 20);
        assert!(info.players <= 20);
        assert!((9..=15).contains(&info.cpu));
        assert_eq!(info.uptime, "0d 0h 0m");
    }

    #[test]
    fn stop_then_start() {
        let server = GameServer::new(&game());
        server.stop().unwrap();
        let info = server.info();
        assert_eq!(info.status, ServerStatus::Offline);
        assert_eq!((info.cpu, info.memory, info.players), (0, 0, 0));
        assert_eq!(server.stop(), Err(LifecycleError::AlreadyOffline));

        server.start().unwrap();
        assert_eq!(server.status(), ServerStatus::Online);
        assert_eq!(server.start(), Err(LifecycleError::AlreadyOnline));
    }

    #[tokio::test(start_paused = true)]
    async fn restart_comes_back_after_delay() {
        let server = GameServer::new(&game());
        let info = server.apply(LifecycleAction::Restart).unwrap();
        assert_eq!(info.status, ServerStatus::Starting);
        assert_eq!(server.start(), Err(LifecycleError::Starting));

        tokio::time::sleep(Duration::from_millis(1999)).await;
        assert_eq!(server.status(), ServerStatus::Starting);
        tokio::time::sleep(Duration::from_millis(2)).await;
        tokio::task::yield_now().await;
        assert_eq!(server.status(), ServerStatus::Online);
    }

    #[tokio::test(start_paused = true)]
    async fn stop_during_restart_wins() {
        let server = GameServer::new(&game());
        server.restart();
        server.stop().unwrap();
        tokio::time::sleep(Duration::from_secs(3)).await;
        tokio::task::yield_now().await;
        assert_eq!(server.status(), ServerStatus::Offline);
    }

    #[test]
    fn metrics_stay_in_bounds() {
        let server = GameServer::new(&GameConfig {
            max_players: 2,
            ..game()
        });
        for _ in 0..500 {
            let info = server.info();
            assert!((1..=100).contains(&info.cpu));
            assert!((10..=95).contains(&info.memory));
            assert!(info.players <= 2);
        }
    }

    #[test]
    fn info_serializes_with_panel_field_names() {
        let server = GameServer::new(&game());
        let json = serde_json::to_value(server.info()).unwrap();
        assert_eq!(json["status"], "online");
        assert_eq!(json["maxPlayers"], 20);
        assert!(json["uptime"].is_string());
    }

    #[test]
    fn lifecycle_changes_are_recorded_newest_first() {
        let server = GameServer::new(&game());
        server.stop().unwrap();
        server.start().unwrap();

        let system = messages(&server, EventKind::System);
        assert_eq!(
            system,
            vec![
                "Server started successfully",
                "Server stopped",
                "Server started successfully",
            ]
        );
    }

    #[test]
    fn player_drift_is_reported_as_join_and_leave_events() {
        let server = GameServer::new(&game());
        let mut counts = vec![8];
        for _ in 0..200 {
            counts.push(server.info().players);
        }
        let history = server.history();
        assert!(history.events.len() <= EVENT_LIMIT);
        for event in &history.events {
            match event.kind {
                EventKind::Join => assert!(event.message.ends_with("joined")),
                EventKind::Leave => assert!(event.message.ends_with("left")),
                EventKind::System => {}
            }
        }
        let moved = counts.windows(2).any(|pair| pair[0] != pair[1]);
        let player_events = history.events.iter().any(|e| e.kind != EventKind::System);
        assert_eq!(moved, player_events);
    }

    #[test]
    fn samples_are_bounded_and_oldest_first() {
        let server = GameServer::new(&game());
        assert!(server.history().samples.is_empty());
        let taken: Vec<ResourceSample> = (0..SAMPLE_LIMIT + 3).map(|_| server.record_sample()).collect();

        let samples = server.history().samples;
        assert_eq!(samples.len(), SAMPLE_LIMIT);
        assert_eq!(samples, taken[3..].to_vec());
    }

    #[test]
    fn offline_samples_read_zero() {
        let server = GameServer::new(&game());
        server.stop().unwrap();
        let sample = server.record_sample();
        assert_eq!((sample.cpu, sample.memory), (0, 0));
    }

    #[tokio::test(start_paused = true)]
    async fn sampler_ticks_until_cancelled() {
        let server = GameServer::new(&game());
        let shutdown = CancellationToken::new();
        let sampler = tokio::spawn(
            server
                .clone()
                .run_sampler(Duration::from_secs(5), shutdown.clone()),
        );

        // First tick is immediate, then one every five seconds.
        tokio::time::sleep(Duration::from_millis(10_500)).await;
        assert_eq!(server.history().samples.len(), 3);

        shutdown.cancel();
        sampler.await.unwrap();
        tokio::time::sleep(Duration::from_secs(30)).await;
        assert_eq!(server.history().samples.len(), 3);
    }

    #[test]
    fn history_serializes_for_the_dashboard() {
        let server = GameServer::new(&game());
        server.record_sample();
        let json = serde_json::to_value(server.history()).unwrap();
        assert_eq!(json["events"][0]["type"], "system");
        assert!(json["samples"][0]["cpu"].is_u64());
        assert!(json["samples"][0]["time"].is_string());
    }
}
