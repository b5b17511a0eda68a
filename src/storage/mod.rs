pub mod layout;
pub mod output;

// Re-export common types
pub use output::{FsOutputStore, OutputStore, OutputStoreFactory};
