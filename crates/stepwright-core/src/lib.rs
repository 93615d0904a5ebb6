mod apply;
pub mod catalog;
pub mod proposal;
pub mod store;
mod tool_call;
mod validation;
mod workflow;

pub use apply::*;
pub use catalog::{ToolCatalog, ToolDefinition};
pub use tool_call::*;
pub use validation::*;
pub use workflow::*;
