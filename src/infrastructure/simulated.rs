//! Discrete-event network with seeded latency, jitter and packet loss.

use crate::domain::ports::{Outbox, PeerId, Tick};
use crate::domain::transaction::Transaction;
use rand::seq::SliceRandom;
use rand::{Rng, SeedableRng};
use rand_chacha::ChaCha8Rng;
use serde::{Deserialize, Serialize};
use std::collections::{BTreeMap, BTreeSet};
use tracing::trace;

/// Configuration for the simulated network.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct NetworkConfig {
    /// Base delivery delay in ticks.
    pub latency: Tick,
    /// Extra uniformly sampled delay in `0..=jitter` ticks. Any jitter makes
    /// delivery non-FIFO between a pair of peers.
    pub jitter: Tick,
    /// Independent per-message drop probability (0.0 - 1.0).
    pub packet_loss_rate: f64,
    /// Links each node opens to already registered nodes.
    pub connections: usize,
}

impl Default for NetworkConfig {
    fn default() -> Self {
        Self {
            latency: 5,
            jitter: 3,
            packet_loss_rate: 0.0,
            connections: 2,
        }
    }
}

/// A message in flight.
#[derive(Debug, Clone)]
pub struct Envelope {
    pub from: PeerId,
    pub to: PeerId,
    pub tx: Transaction,
}

#[derive(Debug, Default, Clone, PartialEq, Eq)]
pub struct NetworkStats {
    /// Messages scheduled for delivery.
    pub messages_sent: u64,
    /// Messages dropped due to packet loss.
    pub messages_dropped: u64,
    pub messages_delivered: u64,
}

/// Peer registry plus a time-ordered delivery queue.
///
/// Given the same seed and the same sequence of calls, delivery order is
/// identical across runs.
#[derive(Debug)]
pub struct SimulatedNetwork {
    config: NetworkConfig,
    links: BTreeMap<PeerId, BTreeSet<PeerId>>,
    // Keyed by (arrival tick, send sequence) for deterministic ordering.
    queue: BTreeMap<(Tick, u64), Envelope>,
    sequence: u64,
    now: Tick,
    rng: ChaCha8Rng,
    stats: NetworkStats,
}

impl SimulatedNetwork {
    pub fn new(config: NetworkConfig, seed: u64) -> Self {
        Self {
            config,
            links: BTreeMap::new(),
            queue: BTreeMap::new(),
            sequence: 0,
            now: 0,
            rng: ChaCha8Rng::seed_from_u64(seed),
            stats: NetworkStats::default(),
        }
    }

    pub fn config(&self) -> &NetworkConfig {
        &self.config
    }

    /// Registers `peer` and links it to up to `connection_count` randomly
    /// chosen peers registered before it. Links are bidirectional.
    pub fn connect_peer(&mut self, peer: PeerId, connection_count: usize) {
        let mut candidates: Vec<PeerId> = self
            .links
            .keys()
            .copied()
            .filter(|other| *other != peer)
            .collect();
        self.links.entry(peer).or_default();

        candidates.shuffle(&mut self.rng);
        for other in candidates.into_iter().take(connection_count) {
            self.link(peer, other);
        }
    }

    pub fn link(&mut self, a: PeerId, b: PeerId) {
        if a == b {
            return;
        }
        self.links.entry(a).or_default().insert(b);
        self.links.entry(b).or_default().insert(a);
    }

    pub fn peers_of(&self, peer: PeerId) -> Vec<PeerId> {
        self.links
            .get(&peer)
            .map(|set| set.iter().copied().collect())
            .unwrap_or_default()
    }

    /// Whether every registered peer can reach every other one.
    pub fn is_connected(&self) -> bool {
        let Some(start) = self.links.keys().next().copied() else {
            return true;
        };
        let mut reached = BTreeSet::from([start]);
        let mut frontier = vec![start];
        while let Some(peer) = frontier.pop() {
            for next in self.peers_of(peer) {
                if reached.insert(next) {
                    frontier.push(next);
                }
            }
        }
        reached.len() == self.links.len()
    }

    fn should_drop_packet(&mut self) -> bool {
        let rate = self.config.packet_loss_rate.clamp(0.0, 1.0);
        rate > 0.0 && self.rng.gen_bool(rate)
    }

    fn sample_latency(&mut self) -> Tick {
        let jitter = if self.config.jitter > 0 {
            self.rng.gen_range(0..=self.config.jitter)
        } else {
            0
        };
        (self.config.latency + jitter).max(1)
    }

    /// Schedules delivery of `tx` from `from` to `to`, subject to loss.
    pub fn send(&mut self, from: PeerId, to: PeerId, tx: Transaction) {
        if self.should_drop_packet() {
            self.stats.messages_dropped += 1;
            trace!(from, to, tx = %tx.short_id(), "packet lost");
            return;
        }
        let at = self.now + self.sample_latency();
        self.queue
            .insert((at, self.sequence), Envelope { from, to, tx });
        self.sequence += 1;
        self.stats.messages_sent += 1;
    }

    /// Advances the clock by one tick and returns the new time.
    pub fn advance(&mut self) -> Tick {
        self.now += 1;
        self.now
    }

    /// Pops the next envelope whose arrival time has passed.
    pub fn pop_due(&mut self) -> Option<Envelope> {
        let (&(at, _), _) = self.queue.first_key_value()?;
        if at > self.now {
            return None;
        }
        let (_, envelope) = self.queue.pop_first()?;
        self.stats.messages_delivered += 1;
        Some(envelope)
    }

    pub fn now(&self) -> Tick {
        self.now
    }

    pub fn in_flight(&self) -> usize {
        self.queue.len()
    }

    pub fn stats(&self) -> &NetworkStats {
        &self.stats
    }
}

impl Outbox for SimulatedNetwork {
    fn broadcast(&mut self, sender: PeerId, tx: &Transaction, except: Option<PeerId>) {
        for peer in self.peers_of(sender) {
            if Some(peer) != except {
                self.send(sender, peer, tx.clone());
            }
        }
    }
}
