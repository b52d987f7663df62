//! Recurring jobs driven by the scheduler

mod feeds;
mod reconcile;
mod watch_folder;

pub use feeds::*;
pub use reconcile::*;
pub use watch_folder::*;
