#![allow(dead_code)]

use replica_ledger::application::ledger::LedgerConfig;
use replica_ledger::application::node::NodeAgent;
use replica_ledger::domain::account::Genesis;
use replica_ledger::domain::crypto::{Address, Identity};
use replica_ledger::domain::ports::{OrderingPolicy, Outbox, PeerId};
use replica_ledger::domain::transaction::{Transaction, TransactionType, TxContents};
use std::io::Error;
use std::path::Path;

/// Writes a workload in which every node pays its right-hand neighbour
/// once per round.
pub fn generate_workload(path: &Path, nodes: usize, rounds: usize) -> Result<(), Error> {
    let mut wtr = csv::WriterBuilder::new().from_path(path)?;
    wtr.write_record(["at", "node", "to", "amount", "type"])?;

    for round in 0..rounds {
        for node in 0..nodes {
            wtr.write_record([
                (1 + round * 3).to_string(),
                node.to_string(),
                ((node + 1) % nodes).to_string(),
                (1 + node).to_string(),
                "send".to_string(),
            ])?;
        }
    }

    wtr.flush()?;
    Ok(())
}

/// Swallows broadcasts. Used when a test hand-delivers transactions.
#[derive(Default)]
pub struct NullOutbox {
    pub broadcasts: usize,
}

impl Outbox for NullOutbox {
    fn broadcast(&mut self, _sender: PeerId, _tx: &Transaction, _except: Option<PeerId>) {
        self.broadcasts += 1;
    }
}

pub struct Fixture {
    pub identities: Vec<Identity>,
    pub client: Identity,
    pub merchant: Address,
    pub genesis: Genesis,
}

/// `nodes` seeded identities plus a funded client holding 100.
pub fn fixture(nodes: usize) -> Fixture {
    let identities: Vec<Identity> = (0..nodes as u64)
        .map(|i| Identity::from_seed(1_000 + i))
        .collect();
    let client = Identity::from_seed(7);
    let merchant = Identity::from_seed(8).address();
    let genesis = Genesis::new().with_account(client.address(), 100);
    Fixture {
        identities,
        client,
        merchant,
        genesis,
    }
}

impl Fixture {
    pub fn node<P: OrderingPolicy>(&self, id: PeerId, policy: P) -> NodeAgent<P> {
        NodeAgent::new(
            id,
            self.identities[id].clone(),
            &self.genesis,
            LedgerConfig::default(),
            policy,
        )
    }

    pub fn payment(&self, amount: u64, nonce: u64) -> Transaction {
        self.signed(&self.client, self.merchant, amount, nonce)
    }

    pub fn signed(&self, signer: &Identity, to: Address, amount: u64, nonce: u64) -> Transaction {
        Transaction::sign(
            TxContents {
                r#type: TransactionType::Send,
                from: signer.address(),
                to,
                amount,
                nonce,
            },
            signer,
        )
    }
}
