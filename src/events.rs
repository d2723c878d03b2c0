//! Controller event stream.
//!
//! Every observable step of a cycle is published as an [`Event`] on the [`EventBus`]:
//! cycle start, health verdicts, per-service outcomes and skipped cycles. Consumers can
//! subscribe with a filter or read the bounded history.

use crate::error::{Result, SwarmwatchError};
use crate::types::{NodeId, ServiceId};
use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use std::collections::{HashMap, HashSet, VecDeque};
use std::sync::atomic::{AtomicU64, Ordering};
use std::sync::Arc;
use tokio::sync::{mpsc, RwLock};
use tracing::debug;

/// Event type.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum EventType {
    CycleStarted,
    PrimaryHealthy,
    FailoverTriggered,
    ConfigurationError,
    ServiceMigrated,
    ServiceUnchanged,
    ServiceMigrationFailed,
    ClusterUnreachable,
    CycleCompleted,
}

impl EventType {
    /// Whether the event indicates something an operator should look at.
    pub fn is_alert(&self) -> bool {
        matches!(
            self,
            EventType::FailoverTriggered
                | EventType::ConfigurationError
                | EventType::ServiceMigrationFailed
                | EventType::ClusterUnreachable
        )
    }
}

/// Event payload - details about what happened.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum EventPayload {
    /// Nothing beyond the event type and cycle number.
    Empty,
    /// A node verdict.
    Node { node_id: NodeId, hostname: String },
    /// Failover was decided.
    Failover { target_label: String, reason: String },
    /// A per-service outcome.
    Service {
        service_id: ServiceId,
        service_name: String,
        detail: Option<String>,
    },
    /// The cluster could not be read.
    Unreachable { error: String },
    /// End-of-cycle totals.
    Summary {
        succeeded: usize,
        failed: usize,
        skipped: usize,
        duration_ms: u64,
    },
}

/// A single event.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct Event {
    /// Unique event ID.
    pub id: String,
    /// Event type.
    pub event_type: EventType,
    /// When the event occurred.
    pub timestamp: DateTime<Utc>,
    /// Cycle the event belongs to.
    pub cycle: u64,
    /// Event payload.
    pub payload: EventPayload,
}

impl Event {
    /// Create a new event.
    pub fn new(event_type: EventType, cycle: u64, payload: EventPayload) -> Self {
        Self {
            id: uuid::Uuid::new_v4().to_string(),
            event_type,
            timestamp: Utc::now(),
            cycle,
            payload,
        }
    }

    /// Create a per-service event.
    pub fn service(
        event_type: EventType,
        cycle: u64,
        service_id: impl Into<ServiceId>,
        service_name: impl Into<String>,
        detail: Option<String>,
    ) -> Self {
        Self::new(
            event_type,
            cycle,
            EventPayload::Service {
                service_id: service_id.into(),
                service_name: service_name.into(),
                detail,
            },
        )
    }

    /// Service id, for per-service events.
    pub fn service_id(&self) -> Option<&str> {
        match &self.payload {
            EventPayload::Service { service_id, .. } => Some(service_id),
            _ => None,
        }
    }
}

/// Subscription filter.
#[derive(Debug, Clone, Default, Serialize, Deserialize)]
pub struct EventFilter {
    /// Event types to include (empty = all).
    pub event_types: HashSet<EventType>,
    /// Only alert-level events.
    pub alerts_only: bool,
}

impl EventFilter {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn event_types(mut self, types: impl IntoIterator<Item = EventType>) -> Self {
        self.event_types.extend(types);
        self
    }

    pub fn alerts_only(mut self) -> Self {
        self.alerts_only = true;
        self
    }

    pub fn matches(&self, event: &Event) -> bool {
        if !self.event_types.is_empty() && !self.event_types.contains(&event.event_type) {
            return false;
        }
        if self.alerts_only && !event.event_type.is_alert() {
            return false;
        }
        true
    }
}

/// A filtered subscription.
pub struct Subscription {
    pub id: String,
    pub filter: EventFilter,
    receiver: mpsc::Receiver<Event>,
}

impl Subscription {
    pub async fn recv(&mut self) -> Option<Event> {
        self.receiver.recv().await
    }

    pub fn try_recv(&mut self) -> Option<Event> {
        self.receiver.try_recv().ok()
    }
}

/// Event bus statistics.
#[derive(Debug, Clone, Default, Serialize, Deserialize)]
pub struct EventBusStats {
    pub events_published: u64,
    pub events_delivered: u64,
    pub events_dropped: u64,
    pub subscription_count: usize,
}

/// Event bus configuration.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct EventBusConfig {
    /// Per-subscription queue capacity.
    pub subscription_buffer: usize,
    /// Maximum subscriptions.
    pub max_subscriptions: usize,
    /// Event history size.
    pub history_size: usize,
    /// Whether to log all events at debug level.
    pub log_events: bool,
}

impl Default for EventBusConfig {
    fn default() -> Self {
        Self {
            subscription_buffer: 256,
            max_subscriptions: 32,
            history_size: 500,
            log_events: true,
        }
    }
}

/// Internal subscription state.
struct SubscriptionState {
    filter: EventFilter,
    sender: mpsc::Sender<Event>,
}

#[derive(Default)]
struct EventBusStatsInner {
    events_published: AtomicU64,
    events_delivered: AtomicU64,
    events_dropped: AtomicU64,
}

/// The event bus.
pub struct EventBus {
    config: EventBusConfig,
    subscriptions: RwLock<HashMap<String, SubscriptionState>>,
    history: RwLock<VecDeque<Event>>,
    stats: EventBusStatsInner,
}

impl EventBus {
    /// Create a new event bus.
    pub fn new(config: EventBusConfig) -> Arc<Self> {
        Arc::new(Self {
            config,
            subscriptions: RwLock::new(HashMap::new()),
            history: RwLock::new(VecDeque::new()),
            stats: EventBusStatsInner::default(),
        })
    }

    /// Publish an event.
    pub async fn publish(&self, event: Event) {
        self.stats.events_published.fetch_add(1, Ordering::Relaxed);

        if self.config.log_events {
            debug!(
                event_type = ?event.event_type,
                event_id = %event.id,
                cycle = event.cycle,
                "Event published"
            );
        }

        {
            let mut history = self.history.write().await;
            if history.len() >= self.config.history_size {
                history.pop_front();
            }
            history.push_back(event.clone());
        }

        let subscriptions = self.subscriptions.read().await;
        for state in subscriptions.values() {
            if state.filter.matches(&event) {
                if state.sender.try_send(event.clone()).is_ok() {
                    self.stats.events_delivered.fetch_add(1, Ordering::Relaxed);
                } else {
                    self.stats.events_dropped.fetch_add(1, Ordering::Relaxed);
                }
            }
        }
    }

    /// Subscribe to events with a filter.
    pub async fn subscribe(&self, filter: EventFilter) -> Result<Subscription> {
        let mut subscriptions = self.subscriptions.write().await;
        if subscriptions.len() >= self.config.max_subscriptions {
            return Err(SwarmwatchError::Internal(
                "Maximum subscriptions reached".to_string(),
            ));
        }

        let (sender, receiver) = mpsc::channel(self.config.subscription_buffer.max(1));
        let id = uuid::Uuid::new_v4().to_string();

        subscriptions.insert(
            id.clone(),
            SubscriptionState {
                filter: filter.clone(),
                sender,
            },
        );

        Ok(Subscription {
            id,
            filter,
            receiver,
        })
    }

    /// Remove a subscription.
    pub async fn unsubscribe(&self, subscription_id: &str) {
        self.subscriptions.write().await.remove(subscription_id);
    }

    /// Most recent events, oldest first.
    pub async fn history(&self, limit: usize) -> Vec<Event> {
        let history = self.history.read().await;
        let skip = history.len().saturating_sub(limit);
        history.iter().skip(skip).cloned().collect()
    }

    /// Most recent events matching `filter`, oldest first.
    pub async fn query_history(&self, filter: &EventFilter, limit: usize) -> Vec<Event> {
        let history = self.history.read().await;
        let mut matched: Vec<Event> = history
            .iter()
            .rev()
            .filter(|e| filter.matches(e))
            .take(limit)
            .cloned()
            .collect();
        matched.reverse();
        matched
    }

    pub async fn stats(&self) -> EventBusStats {
        EventBusStats {
            events_published: self.stats.events_published.load(Ordering::Relaxed),
            events_delivered: self.stats.events_delivered.load(Ordering::Relaxed),
            events_dropped: self.stats.events_dropped.load(Ordering::Relaxed),
            subscription_count: self.subscriptions.read().await.len(),
        }
    }
}
