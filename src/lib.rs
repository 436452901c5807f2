pub mod compactor;
pub mod config;
pub mod engine;
pub mod legacy;
pub mod limits;
pub mod model;
pub mod observability;
pub mod slot;
pub mod sql;
pub mod store;
pub mod wal;
pub mod wire;
