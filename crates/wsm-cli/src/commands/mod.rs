pub mod common;
pub mod completions;
pub mod config;
pub mod entity;
pub mod queue;
pub mod recovery;
pub mod session;
pub mod sync;
pub mod watch;
