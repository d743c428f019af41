//! Runs each node as its own tokio task.
//!
//! Every node drains a private `mpsc` inbox one message at a time, so a
//! node's ledger is only ever touched by its own task. Deliveries are
//! delayed with `tokio::time::sleep`, and an `interval` drives the node's
//! logical clock and replay trigger.

use crate::application::node::{NodeAgent, Outcome};
use crate::domain::account::AccountState;
use crate::domain::crypto::Address;
use crate::domain::ports::{OrderingPolicy, Outbox, PeerId, Tick};
use crate::domain::transaction::{Transaction, TransactionType};
use crate::error::{LedgerError, Result};
use crate::infrastructure::simulated::NetworkConfig;
use rand::{Rng, SeedableRng};
use rand_chacha::ChaCha8Rng;
use std::sync::Arc;
use std::sync::atomic::{AtomicUsize, Ordering};
use std::time::Duration;
use tokio::sync::{mpsc, oneshot};
use tokio::task::JoinHandle;
use tokio::time::{Instant, MissedTickBehavior};
use tracing::{debug, trace};

/// A node's state as seen from outside its task.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct NodeStatus {
    pub now: Tick,
    pub state: AccountState,
    pub pending: usize,
}

enum Command {
    Deliver {
        tx: Transaction,
        from: PeerId,
    },
    Submit {
        tx: Transaction,
        reply: oneshot::Sender<Outcome>,
    },
    Issue {
        to: Address,
        amount: u64,
        r#type: TransactionType,
        reply: oneshot::Sender<Outcome>,
    },
    Status {
        reply: oneshot::Sender<NodeStatus>,
    },
    Shutdown,
}

/// Outbox handed to a node task. Holds senders for its neighbours only.
struct ChannelOutbox {
    peers: Vec<(PeerId, mpsc::UnboundedSender<Command>)>,
    config: NetworkConfig,
    tick: Duration,
    rng: ChaCha8Rng,
    // Scheduled deliveries not yet processed by their receiver.
    in_flight: Arc<AtomicUsize>,
}

impl Outbox for ChannelOutbox {
    fn broadcast(&mut self, sender: PeerId, tx: &Transaction, except: Option<PeerId>) {
        let ChannelOutbox {
            peers,
            config,
            tick,
            rng,
            in_flight,
        } = self;
        let rate = config.packet_loss_rate.clamp(0.0, 1.0);

        for (peer, inbox) in peers.iter().filter(|(peer, _)| Some(*peer) != except) {
            if rate > 0.0 && rng.gen_bool(rate) {
                trace!(from = sender, to = peer, tx = %tx.short_id(), "packet lost");
                continue;
            }
            let jitter = if config.jitter > 0 {
                rng.gen_range(0..=config.jitter)
            } else {
                0
            };
            let delay = scale_ticks(*tick, config.latency.saturating_add(jitter).max(1));

            let inbox = inbox.clone();
            let tx = tx.clone();
            let in_flight = Arc::clone(in_flight);
            in_flight.fetch_add(1, Ordering::SeqCst);
            tokio::spawn(async move {
                tokio::time::sleep(delay).await;
                if inbox.send(Command::Deliver { tx, from: sender }).is_err() {
                    // Receiver already shut down.
                    in_flight.fetch_sub(1, Ordering::SeqCst);
                }
            });
        }
    }
}

/// Wall-clock length of `count` ticks, saturating at `Duration::MAX`.
pub fn scale_ticks(tick: Duration, count: u64) -> Duration {
    match u32::try_from(count) {
        Ok(count) => tick.checked_mul(count).unwrap_or(Duration::MAX),
        Err(_) if tick.is_zero() => Duration::ZERO,
        Err(_) => Duration::MAX,
    }
}

/// Handle to a set of running node tasks.
pub struct ChannelNetwork<P: OrderingPolicy + 'static> {
    inboxes: Vec<mpsc::UnboundedSender<Command>>,
    tasks: Vec<JoinHandle<NodeAgent<P>>>,
    in_flight: Arc<AtomicUsize>,
}

impl<P: OrderingPolicy + 'static> ChannelNetwork<P> {
    /// Spawns one task per node. `topology[i]` lists the neighbours of node
    /// `i`; `tick` is the wall-clock length of one logical tick.
    pub fn spawn(
        nodes: Vec<NodeAgent<P>>,
        topology: Vec<Vec<PeerId>>,
        config: NetworkConfig,
        tick: Duration,
        seed: u64,
    ) -> Result<Self> {
        if topology.len() != nodes.len() {
            return Err(LedgerError::TransportError(format!(
                "topology lists {} nodes but {} were given",
                topology.len(),
                nodes.len()
            )));
        }

        let (inboxes, receivers): (Vec<_>, Vec<_>) =
            nodes.iter().map(|_| mpsc::unbounded_channel()).unzip();
        let in_flight = Arc::new(AtomicUsize::new(0));

        let mut tasks = Vec::with_capacity(nodes.len());
        for ((node, receiver), neighbours) in nodes.into_iter().zip(receivers).zip(topology) {
            let mut peers = Vec::with_capacity(neighbours.len());
            for peer in neighbours {
                let inbox = inboxes.get(peer).ok_or_else(|| {
                    LedgerError::TransportError(format!("unknown peer {peer}"))
                })?;
                peers.push((peer, inbox.clone()));
            }
            let outbox = ChannelOutbox {
                peers,
                config: config.clone(),
                tick,
                rng: ChaCha8Rng::seed_from_u64(seed.wrapping_add(node.id() as u64)),
                in_flight: Arc::clone(&in_flight),
            };
            tasks.push(tokio::spawn(run_node(node, receiver, outbox, tick)));
        }

        debug!(nodes = tasks.len(), "node tasks spawned");
        Ok(Self {
            inboxes,
            tasks,
            in_flight,
        })
    }

    pub fn len(&self) -> usize {
        self.inboxes.len()
    }

    pub fn is_empty(&self) -> bool {
        self.inboxes.is_empty()
    }

    /// Deliveries scheduled but not yet handled by their receiver.
    pub fn in_flight(&self) -> usize {
        self.in_flight.load(Ordering::SeqCst)
    }

    fn inbox(&self, peer: PeerId) -> Result<&mpsc::UnboundedSender<Command>> {
        self.inboxes
            .get(peer)
            .ok_or_else(|| LedgerError::TransportError(format!("unknown peer {peer}")))
    }

    async fn request<T>(
        &self,
        peer: PeerId,
        command: impl FnOnce(oneshot::Sender<T>) -> Command,
    ) -> Result<T> {
        let (reply, response) = oneshot::channel();
        self.inbox(peer)?
            .send(command(reply))
            .map_err(|_| LedgerError::TransportError(format!("node {peer} has stopped")))?;
        response
            .await
            .map_err(|_| LedgerError::TransportError(format!("node {peer} dropped the request")))
    }

    /// Hands `tx` to `peer` as a local submission.
    pub async fn submit(&self, peer: PeerId, tx: Transaction) -> Result<Outcome> {
        self.request(peer, |reply| Command::Submit { tx, reply })
            .await
    }

    /// Has `peer` create, sign and submit a transaction to `to`.
    pub async fn issue(
        &self,
        peer: PeerId,
        to: Address,
        amount: u64,
        r#type: TransactionType,
    ) -> Result<Outcome> {
        self.request(peer, |reply| Command::Issue {
            to,
            amount,
            r#type,
            reply,
        })
        .await
    }

    pub async fn status(&self, peer: PeerId) -> Result<NodeStatus> {
        self.request(peer, |reply| Command::Status { reply }).await
    }

    /// Nothing in flight and no node holding buffered work.
    pub async fn is_quiescent(&self) -> Result<bool> {
        if self.in_flight() > 0 {
            return Ok(false);
        }
        for peer in 0..self.len() {
            if self.status(peer).await?.pending > 0 {
                return Ok(false);
            }
        }
        Ok(self.in_flight() == 0)
    }

    /// Polls every `poll` until quiescent. Returns `false` if `timeout`
    /// passes first.
    pub async fn wait_until_quiescent(&self, timeout: Duration, poll: Duration) -> Result<bool> {
        let deadline = Instant::now().checked_add(timeout);
        loop {
            if self.is_quiescent().await? {
                return Ok(true);
            }
            if deadline.is_some_and(|deadline| Instant::now() >= deadline) {
                return Ok(false);
            }
            tokio::time::sleep(poll).await;
        }
    }

    /// Every node holds the same balances right now.
    pub async fn converged(&self) -> Result<bool> {
        let mut balances = Vec::with_capacity(self.len());
        for peer in 0..self.len() {
            balances.push(self.status(peer).await?.state.balances());
        }
        Ok(balances.windows(2).all(|pair| pair[0] == pair[1]))
    }

    /// Stops every task and returns the nodes in id order.
    pub async fn shutdown(self) -> Result<Vec<NodeAgent<P>>> {
        for inbox in &self.inboxes {
            let _ = inbox.send(Command::Shutdown);
        }
        let mut nodes = Vec::with_capacity(self.tasks.len());
        for task in self.tasks {
            nodes.push(
                task.await
                    .map_err(|e| LedgerError::TransportError(e.to_string()))?,
            );
        }
        Ok(nodes)
    }
}

async fn run_node<P: OrderingPolicy + 'static>(
    mut node: NodeAgent<P>,
    mut inbox: mpsc::UnboundedReceiver<Command>,
    mut outbox: ChannelOutbox,
    tick: Duration,
) -> NodeAgent<P> {
    let mut clock = tokio::time::interval(tick);
    clock.set_missed_tick_behavior(MissedTickBehavior::Delay);
    let mut now: Tick = 0;

    loop {
        tokio::select! {
            _ = clock.tick() => {
                now += 1;
                node.tick(now, &mut outbox);
            }
            command = inbox.recv() => match command {
                Some(Command::Deliver { tx, from }) => {
                    node.receive(tx, Some(from), now, &mut outbox);
                    outbox.in_flight.fetch_sub(1, Ordering::SeqCst);
                }
                Some(Command::Submit { tx, reply }) => {
                    let _ = reply.send(node.receive(tx, None, now, &mut outbox));
                }
                Some(Command::Issue { to, amount, r#type, reply }) => {
                    let tx = node.generate_tx(to, amount, r#type);
                    let _ = reply.send(node.receive(tx, None, now, &mut outbox));
                }
                Some(Command::Status { reply }) => {
                    let _ = reply.send(NodeStatus {
                        now,
                        state: node.state().clone(),
                        pending: node.pending().len(),
                    });
                }
                Some(Command::Shutdown) | None => break,
            },
        }
    }

    debug!(node = node.id(), now, "node task stopped");
    node
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::application::ledger::LedgerConfig;
    use crate::application::ordering::{AuthorityOrdered, LatencyBased};
    use crate::domain::account::Genesis;
    use crate::domain::crypto::Identity;
    use crate::domain::ports::OrderingPolicyBox;

    fn line(
        n: usize,
        policy: impl Fn(&Identity) -> OrderingPolicyBox,
    ) -> (Vec<NodeAgent<OrderingPolicyBox>>, Vec<Vec<PeerId>>) {
        let identities: Vec<Identity> = (0..n as u64)
            .map(|i| Identity::from_seed(200 + i))
            .collect();
        let genesis = identities
            .iter()
            .fold(Genesis::new(), |g, id| g.with_account(id.address(), 50));
        let authority = &identities[0];
        let policies: Vec<OrderingPolicyBox> = (0..n).map(|_| policy(authority)).collect();
        let nodes = identities
            .into_iter()
            .zip(policies)
            .enumerate()
            .map(|(i, (identity, policy))| {
                NodeAgent::new(i, identity, &genesis, LedgerConfig::default(), policy)
            })
            .collect();
        let topology = (0..n)
            .map(|i| {
                let mut peers = Vec::new();
                if i > 0 {
                    peers.push(i - 1);
                }
                if i + 1 < n {
                    peers.push(i + 1);
                }
                peers
            })
            .collect();
        (nodes, topology)
    }

    fn authority(identity: &Identity) -> OrderingPolicyBox {
        Box::new(AuthorityOrdered::new(identity.address()))
    }

    fn fast() -> NetworkConfig {
        NetworkConfig {
            latency: 1,
            jitter: 1,
            ..Default::default()
        }
    }

    #[test]
    fn test_scale_ticks_saturates() {
        let tick = Duration::from_millis(5);
        assert_eq!(scale_ticks(tick, 3), Duration::from_millis(15));
        assert_eq!(scale_ticks(Duration::MAX, 2), Duration::MAX);
        assert_eq!(scale_ticks(tick, u64::MAX), Duration::MAX);
        assert_eq!(scale_ticks(Duration::ZERO, u64::MAX), Duration::ZERO);
    }

    #[tokio::test]
    async fn test_spawn_rejects_mismatched_topology() {
        let (nodes, _) = line(2, authority);
        let result = ChannelNetwork::spawn(
            nodes,
            vec![vec![1]],
            NetworkConfig::default(),
            Duration::from_millis(1),
            0,
        );
        assert!(matches!(result, Err(LedgerError::TransportError(_))));
    }

    #[tokio::test]
    async fn test_relayed_transaction_is_applied_everywhere() {
        let (nodes, topology) = line(3, authority);
        let receiver = nodes[0].address();
        let network =
            ChannelNetwork::spawn(nodes, topology, fast(), Duration::from_millis(2), 7).unwrap();

        // Node 2 is two hops from the authority.
        let outcome = network
            .issue(2, receiver, 20, TransactionType::Send)
            .await
            .unwrap();
        assert_eq!(outcome, Outcome::Relayed);

        assert!(
            network
                .wait_until_quiescent(Duration::from_secs(5), Duration::from_millis(5))
                .await
                .unwrap()
        );
        assert!(network.converged().await.unwrap());
        assert_eq!(network.in_flight(), 0);

        let nodes = network.shutdown().await.unwrap();
        for node in &nodes {
            assert_eq!(node.balance(&receiver), 70);
            assert_eq!(node.history().len(), 1);
        }
    }

    #[tokio::test]
    async fn test_latency_nodes_settle_on_their_own_clock() {
        let (nodes, topology) = line(3, |_| -> OrderingPolicyBox {
            Box::new(LatencyBased::new(3))
        });
        let receiver = nodes[2].address();
        let network =
            ChannelNetwork::spawn(nodes, topology, fast(), Duration::from_millis(2), 3).unwrap();

        let outcome = network
            .issue(0, receiver, 5, TransactionType::Send)
            .await
            .unwrap();
        assert!(matches!(outcome, Outcome::Deferred(_)));

        assert!(
            network
                .wait_until_quiescent(Duration::from_secs(5), Duration::from_millis(5))
                .await
                .unwrap()
        );
        assert!(network.converged().await.unwrap());
        let status = network.status(1).await.unwrap();
        assert_eq!(status.state.balance(&receiver), 55);
        assert_eq!(status.pending, 0);
        network.shutdown().await.unwrap();
    }
}
