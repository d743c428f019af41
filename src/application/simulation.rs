//! Drives a set of nodes over the discrete-event network.

use crate::application::ledger::LedgerConfig;
use crate::application::node::{NodeAgent, Outcome};
use crate::application::ordering::{AuthorityOrdered, LatencyBased};
use crate::config::{PolicyKind, SimulationConfig};
use crate::domain::account::Genesis;
use crate::domain::crypto::Identity;
use crate::domain::ports::{OrderingPolicy, OrderingPolicyBox, Outbox, PeerId, Stall, Tick};
use crate::domain::transaction::{Transaction, TransactionType};
use crate::error::{LedgerError, Result};
use crate::infrastructure::simulated::{NetworkStats, SimulatedNetwork};
use serde::Deserialize;
use tracing::{debug, info, warn};

/// One scripted client action: at tick `at`, node `node` sends `amount` to
/// node `to`'s address.
#[derive(Debug, Clone, PartialEq, Eq, Deserialize)]
pub struct Submission {
    pub at: Tick,
    pub node: PeerId,
    pub to: PeerId,
    pub amount: u64,
    pub r#type: TransactionType,
}

#[derive(Debug, Clone, PartialEq)]
pub struct RunSummary {
    pub steps: Tick,
    pub quiescent: bool,
    pub converged: bool,
    pub stalled: Vec<(PeerId, Stall)>,
    pub stats: NetworkStats,
}

pub struct Simulation<P: OrderingPolicy> {
    nodes: Vec<NodeAgent<P>>,
    network: SimulatedNetwork,
}

impl Simulation<OrderingPolicyBox> {
    /// Builds nodes, genesis and topology from `config`. Node identities are
    /// derived from the seed, so equal configs give equal runs.
    pub fn from_config(config: &SimulationConfig) -> Result<Self> {
        config.validate()?;

        let identities: Vec<Identity> = (0..config.nodes)
            .map(|i| {
                Identity::from_seed(
                    config
                        .seed
                        .wrapping_add(i as u64)
                        .wrapping_mul(0x517c_c1b7_2722_0a95),
                )
            })
            .collect();

        let genesis = identities.iter().fold(Genesis::new(), |genesis, identity| {
            genesis.with_account(identity.address(), config.genesis_balance)
        });
        let ledger_config = LedgerConfig {
            minter: config.ledger.minter.map(|i| identities[i].address()),
            mint_supply: config.ledger.mint_supply,
        };
        let authority = identities[config.policy.authority.min(config.nodes - 1)].address();

        let mut simulation = Simulation::new(SimulatedNetwork::new(
            config.network.clone(),
            config.seed,
        ));
        for (i, identity) in identities.into_iter().enumerate() {
            let policy: OrderingPolicyBox = match config.policy.kind {
                PolicyKind::Authority => Box::new(AuthorityOrdered::new(authority)),
                PolicyKind::Latency => Box::new(LatencyBased::with_rule(
                    config.policy.delta,
                    config.policy.conflict_rule,
                )),
            };
            simulation.add_node(NodeAgent::new(
                i,
                identity,
                &genesis,
                ledger_config.clone(),
                policy,
            ));
            simulation.connect_peer(i, config.network.connections);
        }

        info!(
            nodes = config.nodes,
            policy = ?config.policy.kind,
            seed = config.seed,
            "simulation built"
        );
        Ok(simulation)
    }
}

impl<P: OrderingPolicy> Simulation<P> {
    pub fn new(network: SimulatedNetwork) -> Self {
        Self {
            nodes: Vec::new(),
            network,
        }
    }

    /// Adds a node. Its id must be the next free index.
    pub fn add_node(&mut self, node: NodeAgent<P>) -> PeerId {
        debug_assert_eq!(node.id(), self.nodes.len());
        self.nodes.push(node);
        self.nodes.len() - 1
    }

    pub fn connect_peer(&mut self, peer: PeerId, connection_count: usize) {
        self.network.connect_peer(peer, connection_count);
    }

    pub fn node(&self, id: PeerId) -> Option<&NodeAgent<P>> {
        self.nodes.get(id)
    }

    pub fn node_mut(&mut self, id: PeerId) -> Option<&mut NodeAgent<P>> {
        self.nodes.get_mut(id)
    }

    pub fn nodes(&self) -> &[NodeAgent<P>] {
        &self.nodes
    }

    pub fn network(&self) -> &SimulatedNetwork {
        &self.network
    }

    pub fn network_mut(&mut self) -> &mut SimulatedNetwork {
        &mut self.network
    }

    /// Hands back the nodes and the network, e.g. to run the same nodes
    /// and topology on another transport.
    pub fn into_parts(self) -> (Vec<NodeAgent<P>>, SimulatedNetwork) {
        (self.nodes, self.network)
    }

    pub fn now(&self) -> Tick {
        self.network.now()
    }

    /// Sends `tx` from `sender` to its peers without processing it locally.
    pub fn broadcast(&mut self, sender: PeerId, tx: &Transaction) {
        self.network.broadcast(sender, tx, None);
    }

    /// Hands a locally created transaction to `peer` now, as if its own
    /// client had submitted it.
    pub fn submit(&mut self, peer: PeerId, tx: Transaction) -> Option<Outcome> {
        let now = self.network.now();
        let node = self.nodes.get_mut(peer)?;
        Some(node.receive(tx, None, now, &mut self.network))
    }

    /// Advances time by `steps` ticks. Each tick delivers every due message,
    /// then lets every node re-evaluate its buffer.
    pub fn run(&mut self, steps: Tick) {
        for _ in 0..steps {
            self.step();
        }
    }

    fn step(&mut self) {
        let now = self.network.advance();
        while let Some(envelope) = self.network.pop_due() {
            if let Some(node) = self.nodes.get_mut(envelope.to) {
                node.receive(envelope.tx, Some(envelope.from), now, &mut self.network);
            }
        }
        for node in &mut self.nodes {
            node.tick(now, &mut self.network);
        }
    }

    /// Nothing in flight and no node holding buffered work.
    pub fn is_quiescent(&self) -> bool {
        self.network.in_flight() == 0 && self.nodes.iter().all(|n| n.pending().is_empty())
    }

    /// Steps until quiescent or `max_steps` elapse. Returns the steps taken.
    pub fn run_until_quiescent(&mut self, max_steps: Tick) -> Tick {
        let mut steps = 0;
        while steps < max_steps && !self.is_quiescent() {
            self.step();
            steps += 1;
        }
        steps
    }

    /// Every node holds the same balances.
    pub fn converged(&self) -> bool {
        let mut balances = self.nodes.iter().map(|n| n.state().balances());
        match balances.next() {
            Some(first) => balances.all(|other| other == first),
            None => true,
        }
    }

    pub fn stalled(&self) -> Vec<(PeerId, Stall)> {
        let now = self.now();
        self.nodes
            .iter()
            .filter_map(|n| n.stall(now).map(|stall| (n.id(), stall)))
            .collect()
    }

    /// Replays `workload` in tick order, then waits up to `max_steps` for the
    /// network to drain.
    pub fn run_workload(
        &mut self,
        mut workload: Vec<Submission>,
        max_steps: Tick,
    ) -> Result<RunSummary> {
        for submission in &workload {
            if let Some(unknown) = [submission.node, submission.to]
                .into_iter()
                .find(|&peer| peer >= self.nodes.len())
            {
                return Err(LedgerError::WorkloadError(format!(
                    "unknown node {unknown} at tick {}",
                    submission.at
                )));
            }
        }
        workload.sort_by_key(|s| s.at);

        let start = self.now();
        for submission in workload {
            while self.now() < submission.at {
                self.step();
            }
            let to = self.nodes[submission.to].address();
            let tx = self.nodes[submission.node].generate_tx(
                to,
                submission.amount,
                submission.r#type,
            );
            let outcome = self.submit(submission.node, tx);
            debug!(node = submission.node, ?outcome, "submitted");
        }
        self.run_until_quiescent(max_steps);

        let summary = RunSummary {
            steps: self.now() - start,
            quiescent: self.is_quiescent(),
            converged: self.converged(),
            stalled: self.stalled(),
            stats: self.network.stats().clone(),
        };
        if summary.converged {
            info!(steps = summary.steps, "nodes converged");
        } else {
            warn!(steps = summary.steps, "nodes diverged");
        }
        for (node, stall) in &summary.stalled {
            warn!(node, waiting_for = ?stall.waiting_for, buffered = stall.buffered, "node stalled");
        }
        Ok(summary)
    }
}
