//! # weld-sync
//!
//! Moves history between a weld and its bases.
//!
//! [`pull::start`] replays a base's new commits into the weld and
//! [`push::start`] replays weld commits back into a base. Both run as
//! resumable operations driven by [`workflow`]; an interrupted or halted
//! operation continues with [`workflow::invoke`] or [`workflow::drive`].

pub mod bulk;
pub mod error;
pub mod git;
pub mod history;
pub mod mirror;
pub mod operation;
pub mod patch;
pub mod pull;
pub mod push;
pub mod sanitise;
pub mod status;
pub mod store;
pub mod workflow;

pub use error::SyncError;
pub use operation::{Grouping, Stepping, SyncOptions, Verb};
pub use workflow::{Outcome, Session};
