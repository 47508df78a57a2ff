//! # relay-core
//!
//! Provider-agnostic chat orchestration with tools served by a stdio
//! JSON-RPC child process.
//!
//! ## Architecture
//!
//! ```text
//! ┌──────────────────────────────────────────────────────────────────┐
//! │                              Engine                              │
//! │  ┌──────────────┐   ┌──────────────────┐   ┌──────────────────┐  │
//! │  │ Conversation │   │ ProviderAdapter  │   │    ToolSource    │  │
//! │  │  + Thinking  │──▶│ (local registry) │◀──│ (McpToolAdapter) │  │
//! │  └──────────────┘   └──────────────────┘   └────────┬─────────┘  │
//! └─────────────────────────────────────────────────────┼────────────┘
//!                                                       ▼
//!                                          RpcTransport ⇄ child process
//! ```
//!
//! Backends implement [`ProviderAdapter`] and are created through a
//! [`ProviderRegistry`]; the engine never sees a wire format.

pub mod engine;
pub mod error;
pub mod mcp;
pub mod message;
pub mod provider;
pub mod scripted;
pub mod thinking;
pub mod tool;

pub use engine::{Engine, EngineBuilder, EngineConfig, EngineSummary, TurnOutcome, TurnRequest};
pub use error::{AgentError, Result};
pub use mcp::{McpServerConfig, McpToolAdapter, RpcTransport, ToolCatalogEntry, ToolCategory};
pub use message::{Conversation, Message, Role};
pub use provider::{
    ChatOptions, ChatResponse, FinishReason, ProviderAdapter, ProviderCore, ProviderRegistry,
    ProviderSettings, TokenUsage,
};
pub use scripted::{ScriptHandle, ScriptedProvider};
pub use thinking::{ThinkingStep, ThinkingStepType, ThinkingTrace};
pub use tool::{
    FnHandler, ToolCall, ToolDefinition, ToolHandler, ToolOutput, ToolRegistry, ToolResult,
    ToolSource, ToolSpec,
};
