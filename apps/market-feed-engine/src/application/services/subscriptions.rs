//! Subscription Driver
//!
//! Partitions the symbol universe across the live connections and queues
//! subscribe/unsubscribe control frames for each shard, pacing every batch
//! so the upstream per-second message limit is respected. Shards are driven
//! concurrently; pacing sleeps happen on the driver's own task, never on the
//! message-delivery path.

use std::collections::BTreeSet;
use std::sync::Arc;

use futures_util::future::join_all;

use super::connection_manager::ConnectionManager;
use crate::domain::connection::ConnectionId;
use crate::domain::feed::{SubscribePacing, SubscriptionAction, SubscriptionCommand};
use crate::domain::partition::{Shard, ShardPlan};
use crate::domain::trade::Symbol;
use crate::infrastructure::metrics;

/// Outcome of one subscription cycle.
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct SubscriptionReport {
    /// The partition that was applied.
    pub plan: ShardPlan,
    /// Subscribe frames queued.
    pub subscribed: usize,
    /// Unsubscribe frames queued.
    pub unsubscribed: usize,
}

/// Drives shard subscriptions over the connection manager.
#[derive(Debug, Clone)]
pub struct SubscriptionDriver {
    connections: Arc<ConnectionManager>,
    capacity: usize,
    pacing: SubscribePacing,
}

impl SubscriptionDriver {
    /// Create a driver assigning up to `capacity` symbols per connection.
    #[must_use]
    pub const fn new(
        connections: Arc<ConnectionManager>,
        capacity: usize,
        pacing: SubscribePacing,
    ) -> Self {
        Self {
            connections,
            capacity,
            pacing,
        }
    }

    /// Per-connection shard capacity.
    #[must_use]
    pub const fn capacity(&self) -> usize {
        self.capacity
    }

    /// Partition `universe` across the currently connected connections and
    /// bring each connection's subscriptions in line with its new shard.
    ///
    /// Symbols already subscribed on a connection are not re-sent; symbols
    /// that moved away are unsubscribed.
    pub async fn subscribe(&self, universe: &[Symbol]) -> SubscriptionReport {
        let live = self.connections.connected_ids();
        let plan = ShardPlan::build(universe, &live, self.capacity);

        metrics::set_unassigned_symbols(plan.unassigned_count());
        if let Some(first) = plan.first_unassigned() {
            tracing::warn!(
                unassigned = plan.unassigned_count(),
                first_symbol = %first,
                connections = live.len(),
                capacity = self.capacity,
                "Symbol universe exceeds connection capacity; trailing symbols are not monitored"
            );
        }

        // Connections outside the plan give up their old shard, so a slot
        // that is reconnecting does not restore symbols now owned elsewhere.
        let planned: BTreeSet<ConnectionId> = plan.shards.iter().map(|s| s.connection).collect();
        let mut released = Vec::new();
        for id in self.connections.slot_ids() {
            if planned.contains(&id) {
                continue;
            }
            if live.contains(&id) {
                released.push(Shard {
                    connection: id,
                    symbols: Vec::new(),
                });
            } else if !self.connections.assigned_shard(id).is_empty() {
                self.connections.assign_shard(id, Vec::new());
                tracing::debug!(connection = %id, "Released shard of offline connection");
            }
        }

        let results = join_all(
            plan.shards
                .iter()
                .chain(released.iter())
                .map(|shard| self.apply_shard(shard)),
        )
        .await;
        let (subscribed, unsubscribed) = results
            .into_iter()
            .fold((0, 0), |(s, u), (ds, du)| (s + ds, u + du));

        tracing::info!(
            connections = live.len(),
            assigned = plan.assigned_count(),
            subscribed,
            unsubscribed,
            "Subscription cycle complete"
        );

        SubscriptionReport {
            plan,
            subscribed,
            unsubscribed,
        }
    }

    async fn apply_shard(&self, shard: &Shard) -> (usize, usize) {
        let id = shard.connection;
        let previous: BTreeSet<Symbol> = self.connections.assigned_shard(id).into_iter().collect();
        let next: BTreeSet<Symbol> = shard.symbols.iter().cloned().collect();

        if !self.connections.assign_shard(id, shard.symbols.clone()) {
            tracing::warn!(connection = %id, "Connection vanished before its shard was applied");
            return (0, 0);
        }

        let mut commands: Vec<SubscriptionCommand> = previous
            .difference(&next)
            .cloned()
            .map(SubscriptionCommand::unsubscribe)
            .collect();
        let removed = commands.len();
        commands.extend(next.difference(&previous).cloned().map(SubscriptionCommand::subscribe));
        let added = commands.len() - removed;

        let sent = self.send(id, commands).await;
        // Unsubscribes go out first.
        let unsubscribed = removed.min(sent);
        let subscribed = sent - unsubscribed;
        tracing::debug!(connection = %id, added, removed, sent, "Shard applied");
        metrics::record_subscription_messages(SubscriptionAction::Subscribe, subscribed as u64);
        metrics::record_subscription_messages(SubscriptionAction::Unsubscribe, unsubscribed as u64);
        (subscribed, unsubscribed)
    }

    /// Unsubscribe every connection from its remembered shard and forget it.
    ///
    /// Used before a scheduled disconnect so upstream releases symbol slots.
    pub async fn unsubscribe_all(&self) -> usize {
        let ids = self.connections.connected_ids();
        let sent = join_all(ids.into_iter().map(|id| async move {
            let symbols = self.connections.assigned_shard(id);
            self.connections.assign_shard(id, Vec::new());
            let commands = symbols.into_iter().map(SubscriptionCommand::unsubscribe).collect();
            self.send(id, commands).await
        }))
        .await
        .into_iter()
        .sum();

        metrics::record_subscription_messages(SubscriptionAction::Unsubscribe, sent as u64);
        tracing::info!(unsubscribed = sent, "Released all subscriptions");
        sent
    }

    async fn send(&self, id: ConnectionId, commands: Vec<SubscriptionCommand>) -> usize {
        let connections = &self.connections;
        send_paced(commands, self.pacing, |command| {
            connections.send_command(id, command)
        })
        .await
    }
}

/// Feed `commands` to `send` one at a time, sleeping `pacing.pause` after
/// every full batch that is followed by more commands. Stops early when
/// `send` reports the channel is gone. Returns the number sent.
pub(crate) async fn send_paced<F>(
    commands: Vec<SubscriptionCommand>,
    pacing: SubscribePacing,
    mut send: F,
) -> usize
where
    F: FnMut(SubscriptionCommand) -> bool + Send,
{
    let total = commands.len();
    let mut sent = 0;
    for command in commands {
        if !send(command) {
            break;
        }
        sent += 1;
        if sent < total && pacing.pause_due(sent) {
            tokio::time::sleep(pacing.pause).await;
        }
    }
    sent
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::time::Duration;
    use tokio::time::Instant;

    fn commands(n: usize) -> Vec<SubscriptionCommand> {
        (0..n)
            .map(|i| SubscriptionCommand::subscribe(format!("S{i:03}")))
            .collect()
    }

    #[tokio::test(start_paused = true)]
    async fn pauses_between_full_batches_only() {
        let pacing = SubscribePacing {
            batch_size: 10,
            pause: Duration::from_secs(1),
        };
        let started = Instant::now();
        let mut seen = Vec::new();

        let sent = send_paced(commands(25), pacing, |c| {
            seen.push(c);
            true
        })
        .await;

        assert_eq!(sent, 25);
        assert_eq!(seen.len(), 25);
        // Pauses after 10 and 20, none after the final partial batch.
        let elapsed = started.elapsed();
        assert!(elapsed >= Duration::from_secs(2) && elapsed < Duration::from_secs(3));
    }

    #[tokio::test(start_paused = true)]
    async fn exact_batch_multiple_has_no_trailing_pause() {
        let started = Instant::now();
        let sent = send_paced(commands(20), SubscribePacing::default(), |_| true).await;
        assert_eq!(sent, 20);
        let elapsed = started.elapsed();
        assert!(elapsed >= Duration::from_secs(1) && elapsed < Duration::from_secs(2));
    }

    #[tokio::test(start_paused = true)]
    async fn stops_when_channel_is_gone() {
        let mut budget = 3;
        let sent = send_paced(commands(10), SubscribePacing::default(), |_| {
            budget -= 1;
            budget >= 0
        })
        .await;
        assert_eq!(sent, 3);
    }
}
