pub mod authoring;
mod client;
mod types;

pub use client::*;
pub use types::*;
