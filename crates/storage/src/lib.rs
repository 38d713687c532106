// nodemesh Storage Layer
//
// Registry store interface with pluggable backends

pub mod memory;
pub mod trait_;

#[cfg(feature = "sqlite")]
pub mod sqlite;

pub use memory::{create_memory_store, MemoryRegistryStore};
pub use trait_::*;

#[cfg(feature = "sqlite")]
pub use sqlite::{create_sqlite_store, SqliteRegistryStore};
