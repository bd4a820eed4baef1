pub mod checkpoint;
pub mod config;
pub mod history;
pub mod recovery;
pub mod rpc;
pub mod snapshot;
pub mod store;
pub mod version;
pub mod wal;
