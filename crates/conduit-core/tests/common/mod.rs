//! Mock provider, tool sessions and connector shared by the integration tests.

#![allow(dead_code)]

use std::future::Future;
use std::pin::Pin;
use std::sync::{Arc, Mutex};
use std::time::Duration;

use conduit_core::{Conversation, ConversationEngine};
use conduit_mcp::{
    CollisionPolicy, McpConfig, McpError, McpManager, McpServerConfig, SessionConnector,
};
use conduit_types::provider::{FragmentStream, Provider};
use conduit_types::{
    ApiError, ChatCompletionRequest, ResponseFragment, SessionFuture, ToolCallDelta,
    ToolDescriptor, ToolError, ToolOutput, ToolSession,
};
use futures_util::stream;

// ---------------------------------------------------------------------------
// MockProvider
// ---------------------------------------------------------------------------

/// One step of a scripted model response.
#[derive(Debug, Clone)]
pub enum Step {
    Fragment(ResponseFragment),
    Sleep(u64),
    Fail(String),
}

pub fn text(s: &str) -> Step {
    Step::Fragment(ResponseFragment::text(s))
}

pub fn call(index: usize, id: &str, name: &str, args: &str) -> Step {
    Step::Fragment(ResponseFragment::tool_call(ToolCallDelta {
        index,
        id: Some(id.to_string()),
        name: Some(name.to_string()),
        arguments: Some(args.to_string()),
    }))
}

/// Replays one scripted response per request, in order. Once the script
/// runs out, every further response repeats the last one.
pub struct MockProvider {
    script: Mutex<Vec<Vec<Step>>>,
    last: Mutex<Vec<Step>>,
    pub requests: Mutex<Vec<ChatCompletionRequest>>,
}

impl MockProvider {
    pub fn new(mut script: Vec<Vec<Step>>) -> Arc<Self> {
        script.reverse();
        Arc::new(Self {
            script: Mutex::new(script),
            last: Mutex::new(Vec::new()),
            requests: Mutex::new(Vec::new()),
        })
    }

    pub fn requests(&self) -> Vec<ChatCompletionRequest> {
        self.requests.lock().unwrap().clone()
    }
}

impl Provider for MockProvider {
    fn stream_completion<'a>(
        &'a self,
        request: &'a ChatCompletionRequest,
    ) -> Pin<Box<dyn Future<Output = Result<FragmentStream, ApiError>> + Send + 'a>> {
        self.requests.lock().unwrap().push(request.clone());
        let steps = match self.script.lock().unwrap().pop() {
            Some(steps) => {
                *self.last.lock().unwrap() = steps.clone();
                steps
            }
            None => self.last.lock().unwrap().clone(),
        };
        Box::pin(async move {
            let stream = stream::unfold(steps.into_iter(), |mut iter| async move {
                loop {
                    match iter.next()? {
                        Step::Sleep(ms) => tokio::time::sleep(Duration::from_millis(ms)).await,
                        Step::Fragment(fragment) => return Some((Ok(fragment), iter)),
                        Step::Fail(message) => {
                            return Some((Err(ApiError::Network(message)), iter));
                        }
                    }
                }
            });
            Ok(Box::pin(stream) as FragmentStream)
        })
    }

    fn name(&self) -> &str {
        "mock"
    }
}

// ---------------------------------------------------------------------------
// MockSession
// ---------------------------------------------------------------------------

/// A call as seen by a mock server: `(server, tool, arguments)`.
pub type CallLog = Arc<Mutex<Vec<(String, String, serde_json::Value)>>>;

/// A tool server whose behavior is picked by tool name:
///
/// - `fail_tool` reports `isError`
/// - `broken_tool` fails at the protocol level
/// - `slow_tool` sleeps for ten seconds
/// - anything else echoes its arguments as `key=value` lines
pub struct MockSession {
    name: String,
    tools: Vec<String>,
    calls: CallLog,
    closed: Arc<Mutex<Vec<String>>>,
}

impl ToolSession for MockSession {
    fn server_name(&self) -> &str {
        &self.name
    }

    fn initialize(&self) -> SessionFuture<'_, Result<(), ToolError>> {
        Box::pin(async { Ok(()) })
    }

    fn list_tools(&self) -> SessionFuture<'_, Result<Vec<ToolDescriptor>, ToolError>> {
        Box::pin(async move {
            Ok(self
                .tools
                .iter()
                .map(|name| ToolDescriptor {
                    name: name.clone(),
                    description: format!("{name} on {}", self.name),
                    input_schema: serde_json::json!({"type": "object"}),
                })
                .collect())
        })
    }

    fn call_tool<'a>(
        &'a self,
        name: &'a str,
        arguments: serde_json::Value,
    ) -> SessionFuture<'a, Result<ToolOutput, ToolError>> {
        Box::pin(async move {
            self.calls
                .lock()
                .unwrap()
                .push((self.name.clone(), name.to_string(), arguments.clone()));
            match name {
                "fail_tool" => Ok(ToolOutput::error("tool reported failure")),
                "broken_tool" => Err(ToolError::ExecutionFailed("connection reset".into())),
                "slow_tool" => {
                    tokio::time::sleep(Duration::from_secs(10)).await;
                    Ok(ToolOutput::text("finally"))
                }
                _ => {
                    let rendered = match &arguments {
                        serde_json::Value::Object(map) => map
                            .iter()
                            .map(|(k, v)| format!("{k}={v}"))
                            .collect::<Vec<_>>()
                            .join("\n"),
                        other => other.to_string(),
                    };
                    Ok(ToolOutput::text(rendered))
                }
            }
        })
    }

    fn close(&self) -> SessionFuture<'_, ()> {
        Box::pin(async move {
            self.closed.lock().unwrap().push(self.name.clone());
        })
    }
}

/// Opens a [`MockSession`] per server; the server's `args` are its tool names.
pub struct MockConnector {
    pub calls: CallLog,
    pub opened: Arc<Mutex<Vec<String>>>,
    pub closed: Arc<Mutex<Vec<String>>>,
}

impl SessionConnector for MockConnector {
    fn open<'a>(
        &'a self,
        name: &'a str,
        config: &'a McpServerConfig,
    ) -> Pin<Box<dyn Future<Output = Result<Arc<dyn ToolSession>, McpError>> + Send + 'a>> {
        Box::pin(async move {
            self.opened.lock().unwrap().push(name.to_string());
            Ok(Arc::new(MockSession {
                name: name.to_string(),
                tools: config.args.clone(),
                calls: Arc::clone(&self.calls),
                closed: Arc::clone(&self.closed),
            }) as Arc<dyn ToolSession>)
        })
    }
}

// ---------------------------------------------------------------------------
// Fixture
// ---------------------------------------------------------------------------

pub struct Fixture {
    pub conversation: Conversation,
    pub provider: Arc<MockProvider>,
    pub calls: CallLog,
    pub opened: Arc<Mutex<Vec<String>>>,
    pub closed: Arc<Mutex<Vec<String>>>,
}

impl Fixture {
    pub fn calls(&self) -> Vec<(String, String, serde_json::Value)> {
        self.calls.lock().unwrap().clone()
    }
}

/// A conversation over mock servers, each `(id, tools)`, in config order.
pub fn fixture(
    script: Vec<Vec<Step>>,
    servers: &[(&str, &[&str])],
    configure: impl FnOnce(ConversationEngine) -> ConversationEngine,
) -> Fixture {
    let provider = MockProvider::new(script);
    let calls: CallLog = Arc::new(Mutex::new(Vec::new()));
    let opened = Arc::new(Mutex::new(Vec::new()));
    let closed = Arc::new(Mutex::new(Vec::new()));

    let config = McpConfig {
        servers: servers
            .iter()
            .map(|(id, tools)| {
                (
                    id.to_string(),
                    McpServerConfig::stdio("mock", tools.iter().map(|t| t.to_string()).collect()),
                )
            })
            .collect(),
    };
    let connector = Arc::new(MockConnector {
        calls: Arc::clone(&calls),
        opened: Arc::clone(&opened),
        closed: Arc::clone(&closed),
    });
    let manager = McpManager::with_connector(config, CollisionPolicy::LastWins, connector);
    let engine = configure(ConversationEngine::new(provider.clone(), "gpt-test"));

    Fixture {
        conversation: Conversation::new(engine, manager),
        provider,
        calls,
        opened,
        closed,
    }
}
