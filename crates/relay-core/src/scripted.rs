//! Scripted Provider
//!
//! In-process adapter that replays canned responses and records every call.
//! Used for tests and demos; it never touches the network.

use async_trait::async_trait;
use std::collections::VecDeque;
use std::sync::{Arc, Mutex, MutexGuard, PoisonError};

use crate::error::{AgentError, Result};
use crate::message::Message;
use crate::provider::{ChatOptions, ChatResponse, ProviderAdapter, ProviderCore};

/// One recorded `chat` invocation
#[derive(Clone, Debug)]
pub struct RecordedCall {
    /// Messages exactly as the adapter received them
    pub messages: Vec<Message>,
    /// Names of the tools that would have been put on the wire
    pub offered_tools: Vec<String>,
    pub options: ChatOptions,
}

#[derive(Default)]
struct ScriptState {
    responses: Mutex<VecDeque<Result<ChatResponse>>>,
    calls: Mutex<Vec<RecordedCall>>,
}

fn lock<T>(mutex: &Mutex<T>) -> MutexGuard<'_, T> {
    mutex.lock().unwrap_or_else(PoisonError::into_inner)
}

/// Shared handle for feeding and inspecting a [`ScriptedProvider`] after it
/// has been moved into an engine
#[derive(Clone)]
pub struct ScriptHandle(Arc<ScriptState>);

impl ScriptHandle {
    /// Queue the next response
    pub fn push_response(&self, response: ChatResponse) {
        lock(&self.0.responses).push_back(Ok(response));
    }

    /// Queue a failure for the next call
    pub fn push_error(&self, error: AgentError) {
        lock(&self.0.responses).push_back(Err(error));
    }

    /// Calls made so far, oldest first
    pub fn calls(&self) -> Vec<RecordedCall> {
        lock(&self.0.calls).clone()
    }

    /// Responses not yet consumed
    pub fn remaining(&self) -> usize {
        lock(&self.0.responses).len()
    }
}

/// Adapter replaying a queue of responses
pub struct ScriptedProvider {
    core: ProviderCore,
    state: Arc<ScriptState>,
    tools_supported: bool,
}

impl ScriptedProvider {
    pub fn new(model: impl Into<String>) -> Self {
        Self {
            core: ProviderCore::new(model),
            state: Arc::new(ScriptState::default()),
            tools_supported: true,
        }
    }

    /// Toggle reported function-calling support
    #[must_use]
    pub const fn with_tool_support(mut self, supported: bool) -> Self {
        self.tools_supported = supported;
        self
    }

    pub fn handle(&self) -> ScriptHandle {
        ScriptHandle(Arc::clone(&self.state))
    }
}

#[async_trait]
impl ProviderAdapter for ScriptedProvider {
    fn name(&self) -> &str {
        "scripted"
    }

    fn core(&self) -> &ProviderCore {
        &self.core
    }

    fn core_mut(&mut self) -> &mut ProviderCore {
        &mut self.core
    }

    async fn chat(&self, messages: &[Message], options: &ChatOptions) -> Result<ChatResponse> {
        let offered_tools = self
            .offered_tools(options)
            .into_iter()
            .map(|spec| spec.name)
            .collect();

        lock(&self.state.calls).push(RecordedCall {
            messages: messages.to_vec(),
            offered_tools,
            options: options.clone(),
        });

        lock(&self.state.responses)
            .pop_front()
            .unwrap_or_else(|| Err(AgentError::Provider("script exhausted".into())))
    }

    fn supports_tools(&self) -> bool {
        self.tools_supported
    }
}
