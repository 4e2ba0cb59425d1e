use std::fmt;
use std::sync::Arc;

use tokio::task::{JoinError, JoinSet};
use tokio_util::sync::CancellationToken;

use event_store::{ConnectError, MemoryEventStore, connect_clickhouse};
use ingest::{ConsumerConfig, KafkaConfig, KafkaReader, consume_topic};
use stats_api::{EventStore, EventType, OwnershipLookup, StatsError};
use stats_api_server::{DEFAULT_LOOKUP_TIMEOUT, HttpOwnershipClient, StatsService};

use crate::config::{Effective, StoreKind};
use crate::error::ServerError;

// ═══════════════════════════════════════════════════════════════
//  Lifecycle
// ═══════════════════════════════════════════════════════════════

/// Фазы процесса, строго по порядку; назад не возвращаемся.
#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord)]
pub enum Phase {
    Connecting,
    SchemaReady,
    Serving,
    Draining,
    Stopped,
}

impl fmt::Display for Phase {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(match self {
            Phase::Connecting => "connecting",
            Phase::SchemaReady => "schema-ready",
            Phase::Serving => "serving",
            Phase::Draining => "draining",
            Phase::Stopped => "stopped",
        })
    }
}

#[derive(Debug)]
pub struct Lifecycle {
    phase: Phase,
}

impl Lifecycle {
    pub fn new() -> Self {
        tracing::info!(phase = %Phase::Connecting, "lifecycle");
        Self { phase: Phase::Connecting }
    }

    pub fn phase(&self) -> Phase {
        self.phase
    }

    /// Move forward to `next`; phases may be skipped (e.g. connecting →
    /// stopped on abort), a step backwards is ignored.
    pub fn advance(&mut self, next: Phase) {
        if next <= self.phase {
            tracing::warn!(from = %self.phase, to = %next, "ignored lifecycle step backwards");
            return;
        }
        tracing::info!(from = %self.phase, to = %next, "lifecycle");
        self.phase = next;
    }
}

type TaskExit = (&'static str, Result<(), StatsError>);

// ═══════════════════════════════════════════════════════════════
//  run
// ═══════════════════════════════════════════════════════════════

/// Запуск до Ctrl+C / SIGTERM.
pub async fn run(eff: Effective) -> Result<(), ServerError> {
    tracing::info!("stats-server starting");

    let token = CancellationToken::new();
    let signal_token = token.clone();
    tokio::spawn(async move {
        match shutdown_signal().await {
            Ok(signal) => tracing::info!(signal, "shutdown requested"),
            Err(e) => tracing::error!(error = %e, "signal handler failed, shutting down"),
        }
        signal_token.cancel();
    });

    serve(eff, token).await
}

/// Весь жизненный цикл: connecting → schema-ready → serving → draining →
/// stopped. Отмена `token` в любой фазе ведёт к штатной остановке.
pub async fn serve(eff: Effective, token: CancellationToken) -> Result<(), ServerError> {
    let mut lifecycle = Lifecycle::new();

    let owners: Option<Arc<dyn OwnershipLookup>> = match &eff.posts_service_url {
        Some(url) => {
            let client = HttpOwnershipClient::new(url, DEFAULT_LOOKUP_TIMEOUT).map_err(|e| ServerError::Config {
                context: "posts service",
                detail: e.to_string(),
            })?;
            Some(Arc::new(client))
        }
        None => {
            tracing::warn!("posts service not configured, top users will be empty");
            None
        }
    };

    // --- connecting ---
    let store: Arc<dyn EventStore> = match eff.store {
        StoreKind::Memory => {
            tracing::warn!("using in-memory event store, events are lost on exit");
            Arc::new(MemoryEventStore::new())
        }
        StoreKind::ClickHouse => match connect_clickhouse(&eff.clickhouse, eff.retry, &token).await {
            Ok(store) => Arc::new(store),
            Err(ConnectError::Aborted { target }) => {
                tracing::info!(store = %target, "shutdown requested while connecting");
                lifecycle.advance(Phase::Stopped);
                return Ok(());
            }
            Err(e) => return Err(e.into()),
        },
    };

    // --- schema-ready ---
    if let Err(e) = store.ensure_schema().await {
        close_store(&store).await;
        return Err(e.with_context("ensure schema").into());
    }
    lifecycle.advance(Phase::SchemaReady);

    // --- serving ---
    let mut tasks: JoinSet<TaskExit> = JoinSet::new();

    let service = Arc::new(StatsService::new(store.clone(), owners));
    let api_addr = eff.api_addr.clone();
    let api_token = token.clone();
    tasks.spawn(async move { ("api", stats_api_server::run(&api_addr, service, api_token).await) });

    let consumers = [
        ("views consumer", eff.views_topic.as_str(), EventType::View),
        ("likes consumer", eff.likes_topic.as_str(), EventType::Like),
    ];
    for (name, topic, default_type) in consumers {
        let mut kafka = KafkaConfig::new(eff.brokers.clone(), topic, eff.group_id.as_str());
        kafka.start_from = eff.start_from;
        let reader = Box::new(KafkaReader::new(kafka));
        let cfg = ConsumerConfig::new(topic, default_type);
        let store = store.clone();
        let consumer_token = token.clone();
        tasks.spawn(async move {
            consume_topic(reader, store, cfg, consumer_token).await;
            (name, Ok(()))
        });
        tracing::info!(
            topic = %topic,
            default_type = %default_type,
            group_id = %eff.group_id,
            brokers = ?eff.brokers,
            "spawned consumer"
        );
    }
    lifecycle.advance(Phase::Serving);

    let mut failure: Option<ServerError> = None;
    tokio::select! {
        _ = token.cancelled() => {}
        Some(joined) = tasks.join_next() => failure = task_exit(joined),
    }

    // --- draining ---
    lifecycle.advance(Phase::Draining);
    token.cancel();

    let drained = tokio::time::timeout(eff.shutdown_grace, async {
        while let Some(joined) = tasks.join_next().await {
            if let Some(e) = task_exit(joined) {
                failure.get_or_insert(e);
            }
        }
    })
    .await;
    if drained.is_err() {
        tracing::warn!(
            grace_secs = eff.shutdown_grace.as_secs(),
            remaining = tasks.len(),
            "grace period elapsed, aborting tasks"
        );
        tasks.shutdown().await;
    }

    // --- stopped ---
    close_store(&store).await;
    lifecycle.advance(Phase::Stopped);
    tracing::info!("shutdown complete");

    match failure {
        Some(e) => Err(e),
        None => Ok(()),
    }
}

fn task_exit(joined: Result<TaskExit, JoinError>) -> Option<ServerError> {
    match joined {
        Ok((task, Ok(()))) => {
            tracing::info!(task, "task stopped");
            None
        }
        Ok((task, Err(e))) => {
            tracing::error!(task, error = %e, "task failed");
            Some(ServerError::Task { task, detail: e.to_string() })
        }
        Err(e) => {
            tracing::error!(error = %e, "task panicked");
            Some(ServerError::Join(e))
        }
    }
}

async fn close_store(store: &Arc<dyn EventStore>) {
    if let Err(e) = store.close().await {
        tracing::warn!(error = %e, "store close failed");
    }
}

#[cfg(unix)]
async fn shutdown_signal() -> std::io::Result<&'static str> {
    use tokio::signal::unix::{SignalKind, signal};

    let mut term = signal(SignalKind::terminate())?;
    tokio::select! {
        r = tokio::signal::ctrl_c() => r.map(|_| "ctrl-c"),
        _ = term.recv() => Ok("sigterm"),
    }
}

#[cfg(not(unix))]
async fn shutdown_signal() -> std::io::Result<&'static str> {
    tokio::signal::ctrl_c().await.map(|_| "ctrl-c")
}
