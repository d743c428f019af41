pub mod channel;
pub mod simulated;
