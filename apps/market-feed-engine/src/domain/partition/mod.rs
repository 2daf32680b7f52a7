//! Symbol Partitioning
//!
//! Splits the symbol universe into contiguous alphabetical shards of a fixed
//! capacity, one shard per live connection.
//!
//! # Rules
//!
//! - The universe is sorted and de-duplicated before slicing.
//! - Connections are ordered by their stable id; shard *i* goes to the *i*-th
//!   connection.
//! - When `connections × capacity` is smaller than the universe, the trailing
//!   symbols are left unassigned and reported in [`ShardPlan::unassigned`].
//!
//! The same universe and the same set of connections always produce the same
//! plan.

use super::connection::ConnectionId;
use super::trade::Symbol;

/// Symbols assigned to one connection.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Shard {
    /// Owning connection.
    pub connection: ConnectionId,
    /// Contiguous, sorted slice of the universe.
    pub symbols: Vec<Symbol>,
}

/// Result of partitioning a universe across connections.
#[derive(Debug, Clone, PartialEq, Eq, Default)]
pub struct ShardPlan {
    /// One shard per connection, in connection order.
    pub shards: Vec<Shard>,
    /// Sorted symbols beyond total capacity.
    pub unassigned: Vec<Symbol>,
}

impl ShardPlan {
    /// Partition `universe` across `connections` with `capacity` symbols each.
    #[must_use]
    pub fn build(universe: &[Symbol], connections: &[ConnectionId], capacity: usize) -> Self {
        let mut symbols: Vec<Symbol> = universe.to_vec();
        symbols.sort_unstable();
        symbols.dedup();

        let mut ordered = connections.to_vec();
        ordered.sort_unstable();
        ordered.dedup();

        let mut remaining = symbols.as_slice();
        let mut shards = Vec::with_capacity(ordered.len());

        for connection in ordered {
            let take = capacity.min(remaining.len());
            let (head, tail) = remaining.split_at(take);
            shards.push(Shard {
                connection,
                symbols: head.to_vec(),
            });
            remaining = tail;
        }

        Self {
            shards,
            unassigned: remaining.to_vec(),
        }
    }

    /// Number of symbols assigned to some connection.
    #[must_use]
    pub fn assigned_count(&self) -> usize {
        self.shards.iter().map(|s| s.symbols.len()).sum()
    }

    /// Number of symbols nobody monitors.
    #[must_use]
    pub fn unassigned_count(&self) -> usize {
        self.unassigned.len()
    }

    /// First symbol left unassigned, if any.
    #[must_use]
    pub fn first_unassigned(&self) -> Option<&str> {
        self.unassigned.first().map(String::as_str)
    }

    /// Shard owned by `connection`.
    #[must_use]
    pub fn shard_for(&self, connection: ConnectionId) -> Option<&Shard> {
        self.shards.iter().find(|s| s.connection == connection)
    }
}
