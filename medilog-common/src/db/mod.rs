//! Database initialization and the asset document store

pub mod init;
pub mod store;

pub use init::*;
pub use store::*;
