//! MCP Server
//!
//! JSON-RPC 2.0 over streamable HTTP. The transport resolves each message
//! to a session, the dispatcher routes it to a method handler, and tools
//! call into the application services.

mod dispatcher;
mod protocol;
mod server;
pub mod tools;

pub use dispatcher::Dispatcher;
pub use protocol::{
    InboundMessage, JsonRpcError, JsonRpcRequest, JsonRpcResponse, SUPPORTED_PROTOCOL_VERSIONS,
    ToolDescriptor, ToolResult, negotiate_protocol_version,
};
pub use server::{McpServer, McpServerError, McpState, SESSION_HEADER, router};
pub use tools::{Tool, ToolContext, ToolRegistry};
