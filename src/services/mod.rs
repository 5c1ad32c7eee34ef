pub mod database;
pub mod ssh;
pub mod transport;
