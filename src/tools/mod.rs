//! Tool invocation handling
//!
//! The peer may ask for any number of tool calls in one frame. Each call is
//! routed by name to a registered [`ToolHandler`]; the batch resolves only
//! when every routed call has produced a [`ToolResult`](crate::protocol::ToolResult).

pub mod dispatcher;

pub use dispatcher::{FnHandler, ToolDispatcher, ToolHandler, UnknownToolPolicy};
