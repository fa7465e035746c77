//! C2 (Vector Store Gateway) and C3 (Memory Store).

pub mod retrieval;
pub mod store;
pub mod vectorstore;

pub use store::MemoryStore;
pub use vectorstore::{VectorRecord, VectorStoreGateway};
