//! Domain types: identities, accounts, transactions and the ports the
//! application layer is written against.

pub mod account;
pub mod crypto;
pub mod pending;
pub mod ports;
pub mod transaction;
