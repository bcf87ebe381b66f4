#![doc = include_str!("../README.md")]

mod appender;
mod error;
pub mod gateway;
mod record;
pub mod store;

pub use crate::appender::*;
pub use crate::error::*;
pub use crate::gateway::{
    ContentGateway, GitHubGateway, GitHubTarget, MemoryGateway, Revision, Snapshot,
};
pub use crate::record::*;

/// An empty record store in the layout the site expects.
pub const EMPTY_STORE: &str = "export const partnersData = [\n];\n";
