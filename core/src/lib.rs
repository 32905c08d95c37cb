pub mod backend;
pub mod registry;
pub mod watcher;
