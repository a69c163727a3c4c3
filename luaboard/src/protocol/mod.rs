//! Protocol implementations.

pub mod chunked;
pub mod shell;

// Re-export common types
pub use chunked::{CHUNK_SIZE, ChunkedTransfer, DirEntry, TransferConfig};
pub use shell::{Shell, TimeoutScope};
