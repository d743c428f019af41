use crate::application::node::NodeAgent;
use crate::domain::ports::OrderingPolicy;
use crate::error::Result;
use std::io::Write;

/// Writes each node's view of the ledger as `node,account,balance,nonce`
/// rows, one per non-empty account, in address order.
pub struct AccountWriter<W: Write> {
    writer: csv::Writer<W>,
}

impl<W: Write> AccountWriter<W> {
    pub fn new(sink: W) -> Self {
        Self {
            writer: csv::Writer::from_writer(sink),
        }
    }

    pub fn write_nodes<P: OrderingPolicy>(&mut self, nodes: &[NodeAgent<P>]) -> Result<()> {
        self.writer
            .write_record(["node", "account", "balance", "nonce"])?;
        for node in nodes {
            for (address, account) in node.state().iter() {
                if account.balance == 0 && account.nonce == 0 {
                    continue;
                }
                self.writer.write_record([
                    node.id().to_string(),
                    address.to_string(),
                    account.balance.to_string(),
                    account.nonce.to_string(),
                ])?;
            }
        }
        self.writer.flush()?;
        Ok(())
    }
}
