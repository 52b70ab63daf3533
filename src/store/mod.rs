//! The database engine: COW node tree, transactions, watches

mod node;
mod transaction;
mod tree;
mod watch;

pub use node::Node;
pub use transaction::Transaction;
pub use tree::Store;
pub use watch::{Watch, WatchHandler, WatchRegistry};
