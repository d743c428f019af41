//! Node-side orchestration: the ledger engine, the ordering policies, the
//! node agent that ties them together, and the discrete-event simulation
//! that drives a set of nodes.

pub mod ledger;
pub mod node;
pub mod ordering;
pub mod simulation;
