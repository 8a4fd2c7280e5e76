pub mod apply;
pub mod changeset;
pub mod cli;
pub mod config;
pub mod copier;
pub mod events;
pub mod filter;
pub mod ingest;
pub mod journal;
pub mod mirror;
pub mod scheduler;
pub mod session;
pub mod watcher;

pub use apply::*;
pub use changeset::*;
pub use config::*;
pub use copier::*;
pub use events::*;
pub use filter::*;
pub use ingest::*;
pub use journal::*;
pub use mirror::*;
pub use scheduler::*;
pub use session::*;
pub use watcher::*;
