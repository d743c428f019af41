pub mod account_writer;
pub mod workload_reader;
