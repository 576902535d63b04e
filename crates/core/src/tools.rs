//! Agent Tools
//!
//! The functions a voice agent may call during a conversation, their
//! declared schemas, and the [`ToolInvoker`] that executes them against the
//! configured providers.

use crate::{
    call_control::CallControl,
    error::{ProviderError, ToolError},
    registry::SessionRegistry,
    search::WebSearch,
};
use schemars::JsonSchema;
use serde::{Deserialize, Serialize};
use serde_json::{Value, json};
use std::sync::Arc;
use tracing::{info, warn};

pub const SEARCH: &str = "search";
pub const TRANSFER_CALL: &str = "transfer_call";

/// The tools this service knows how to execute.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum ToolKind {
    Search,
    TransferCall,
}

impl ToolKind {
    pub fn name(self) -> &'static str {
        match self {
            ToolKind::Search => SEARCH,
            ToolKind::TransferCall => TRANSFER_CALL,
        }
    }

    pub fn from_name(name: &str) -> Option<Self> {
        match name {
            SEARCH => Some(ToolKind::Search),
            TRANSFER_CALL => Some(ToolKind::TransferCall),
            _ => None,
        }
    }

    /// The schema declared to the voice agent for this tool.
    pub fn schema(self) -> ToolSchema {
        match self {
            ToolKind::Search => ToolSchema {
                name: SEARCH.to_string(),
                description: "Searches the web and returns the results".to_string(),
                parameters: parameters_schema::<SearchArgs>(),
            },
            ToolKind::TransferCall => ToolSchema {
                name: TRANSFER_CALL.to_string(),
                description: "Transfers the caller to a human. Use it when the caller asks for a person or the call needs one."
                    .to_string(),
                parameters: json!({ "type": "object", "properties": {} }),
            },
        }
    }
}

/// A function declaration as advertised in the session configuration.
#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct ToolSchema {
    pub name: String,
    pub description: String,
    /// JSON Schema of the argument object.
    pub parameters: Value,
}

/// Arguments of the `search` tool.
#[derive(Debug, Deserialize, JsonSchema)]
pub struct SearchArgs {
    /// The query to search for
    pub query: String,
}

fn parameters_schema<T: JsonSchema>() -> Value {
    let mut schema = serde_json::to_value(schemars::schema_for!(T)).unwrap_or_else(|_| json!({}));
    if let Some(object) = schema.as_object_mut() {
        object.remove("$schema");
        object.remove("title");
    }
    schema
}

/// A function call the agent has finished emitting and that awaits a result.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct PendingToolCall {
    pub invocation_id: String,
    pub name: String,
    /// The raw JSON argument text, exactly as the agent produced it.
    pub arguments: String,
}

/// Per-call information available to a tool.
#[derive(Clone)]
pub struct ToolContext {
    pub call_id: Option<String>,
    pub registry: Arc<SessionRegistry>,
}

/// Executes tools by name. Holds no per-call state.
pub struct ToolInvoker {
    search: Arc<dyn WebSearch>,
    call_control: Option<Arc<dyn CallControl>>,
    transfer_destination: Option<String>,
}

impl ToolInvoker {
    pub fn new(search: Arc<dyn WebSearch>) -> Self {
        Self {
            search,
            call_control: None,
            transfer_destination: None,
        }
    }

    /// Enables `transfer_call`, redirecting calls to `destination`.
    pub fn with_transfer(
        mut self,
        call_control: Arc<dyn CallControl>,
        destination: impl Into<String>,
    ) -> Self {
        self.call_control = Some(call_control);
        self.transfer_destination = Some(destination.into());
        self
    }

    /// Runs the tool `name` with the raw JSON `arguments`.
    pub async fn invoke(
        &self,
        name: &str,
        arguments: &str,
        context: &ToolContext,
    ) -> Result<Value, ToolError> {
        match ToolKind::from_name(name) {
            Some(ToolKind::Search) => {
                let args: SearchArgs =
                    serde_json::from_str(arguments).map_err(|e| ToolError::InvalidArguments {
                        tool: SEARCH.to_string(),
                        reason: e.to_string(),
                    })?;
                self.search(&args.query).await
            }
            Some(ToolKind::TransferCall) => self.transfer_call(context).await,
            None => Err(ToolError::NotFound(name.to_string())),
        }
    }

    async fn search(&self, query: &str) -> Result<Value, ToolError> {
        info!(%query, "Performing web search");
        let results = self.search.search(query).await?;
        info!(count = results.len(), "Web search finished");
        Ok(serde_json::to_value(results).unwrap_or_else(|_| json!([])))
    }

    async fn transfer_call(&self, context: &ToolContext) -> Result<Value, ToolError> {
        let call_id = context
            .call_id
            .as_deref()
            .ok_or_else(|| ToolError::PreconditionFailed("the call id is not known yet".into()))?;
        if !context.registry.contains(call_id) {
            return Err(ToolError::PreconditionFailed(format!(
                "call {call_id} is no longer active"
            )));
        }
        let (Some(call_control), Some(destination)) =
            (&self.call_control, self.transfer_destination.as_deref())
        else {
            return Err(ProviderError::NotConfigured("call transfer").into());
        };

        call_control.transfer(call_id, destination).await?;
        Ok(json!({ "status": "transferred", "destination": destination }))
    }
}

/// Serializes an invocation outcome into the text returned to the agent.
///
/// Failures become `{"error": "..."}` so the agent can tell the caller what
/// went wrong instead of waiting for a result that never comes.
pub fn tool_output(result: &Result<Value, ToolError>) -> String {
    match result {
        Ok(value) => value.to_string(),
        Err(err) => {
            warn!(error = %err, "Tool invocation failed");
            json!({ "error": err.to_string() }).to_string()
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::call::CallIdentity;
    use crate::call_control::MockCallControl;
    use crate::search::{MockWebSearch, SearchResult};

    fn context(call_id: Option<&str>, registry: Arc<SessionRegistry>) -> ToolContext {
        ToolContext {
            call_id: call_id.map(str::to_string),
            registry,
        }
    }

    fn registry_with(call_id: &str) -> Arc<SessionRegistry> {
        let registry = Arc::new(SessionRegistry::new());
        registry.register(CallIdentity::new("S1", Some(call_id.to_string())));
        registry
    }

    #[test]
    fn search_schema_requires_query() {
        let schema = ToolKind::Search.schema();
        assert_eq!(schema.name, "search");
        assert_eq!(schema.parameters["type"], "object");
        assert_eq!(schema.parameters["properties"]["query"]["type"], "string");
        assert_eq!(schema.parameters["required"], json!(["query"]));
        assert!(schema.parameters.get("$schema").is_none());
    }

    #[tokio::test]
    async fn search_returns_provider_results() {
        let mut search = MockWebSearch::new();
        search
            .expect_search()
            .withf(|query: &str| query == "sam pullara")
            .times(1)
            .returning(|_| {
                Ok(vec![SearchResult {
                    name: "Sam".into(),
                    url: "https://example.com".into(),
                    date: None,
                    snippet: "hi".into(),
                }])
            });
        let invoker = ToolInvoker::new(Arc::new(search));

        let value = invoker
            .invoke(
                "search",
                r#"{"query":"sam pullara"}"#,
                &context(None, Arc::new(SessionRegistry::new())),
            )
            .await
            .unwrap();
        assert_eq!(value[0]["name"], "Sam");
        assert_eq!(value[0]["url"], "https://example.com");
    }

    #[tokio::test]
    async fn search_without_results_is_empty_success() {
        let mut search = MockWebSearch::new();
        search.expect_search().returning(|_| Ok(vec![]));
        let invoker = ToolInvoker::new(Arc::new(search));

        let result = invoker
            .invoke(
                "search",
                r#"{"query":"nothing"}"#,
                &context(None, Arc::new(SessionRegistry::new())),
            )
            .await;
        assert_eq!(tool_output(&result), "[]");
    }

    #[tokio::test]
    async fn malformed_search_arguments_are_rejected() {
        let mut search = MockWebSearch::new();
        search.expect_search().never();
        let invoker = ToolInvoker::new(Arc::new(search));

        let err = invoker
            .invoke("search", "{not json", &context(None, Arc::new(SessionRegistry::new())))
            .await
            .unwrap_err();
        assert!(matches!(err, ToolError::InvalidArguments { .. }));
    }

    #[tokio::test]
    async fn unknown_tool_is_not_found() {
        let invoker = ToolInvoker::new(Arc::new(MockWebSearch::new()));
        let result = invoker
            .invoke("launch_rockets", "{}", &context(None, Arc::new(SessionRegistry::new())))
            .await;

        assert!(matches!(result, Err(ToolError::NotFound(ref name)) if name == "launch_rockets"));
        let output: Value = serde_json::from_str(&tool_output(&result)).unwrap();
        assert!(output["error"].as_str().unwrap().contains("launch_rockets"));
    }

    #[tokio::test]
    async fn transfer_without_call_id_never_reaches_provider() {
        let mut control = MockCallControl::new();
        control.expect_transfer().never();
        let invoker = ToolInvoker::new(Arc::new(MockWebSearch::new()))
            .with_transfer(Arc::new(control), "+15550199");

        let err = invoker
            .invoke("transfer_call", "{}", &context(None, Arc::new(SessionRegistry::new())))
            .await
            .unwrap_err();
        assert!(matches!(err, ToolError::PreconditionFailed(_)));
    }

    #[tokio::test]
    async fn transfer_of_inactive_call_is_refused() {
        let mut control = MockCallControl::new();
        control.expect_transfer().never();
        let invoker = ToolInvoker::new(Arc::new(MockWebSearch::new()))
            .with_transfer(Arc::new(control), "+15550199");

        let err = invoker
            .invoke(
                "transfer_call",
                "{}",
                &context(Some("C9"), Arc::new(SessionRegistry::new())),
            )
            .await
            .unwrap_err();
        assert!(matches!(err, ToolError::PreconditionFailed(_)));
    }

    #[tokio::test]
    async fn transfer_redirects_active_call() {
        let mut control = MockCallControl::new();
        control
            .expect_transfer()
            .withf(|call_id: &str, destination: &str| call_id == "C1" && destination == "+15550199")
            .times(1)
            .returning(|_, _| Ok(()));
        let invoker = ToolInvoker::new(Arc::new(MockWebSearch::new()))
            .with_transfer(Arc::new(control), "+15550199");

        let value = invoker
            .invoke("transfer_call", "{}", &context(Some("C1"), registry_with("C1")))
            .await
            .unwrap();
        assert_eq!(value["status"], "transferred");
    }

    #[tokio::test]
    async fn transfer_without_call_control_is_a_provider_failure() {
        let invoker = ToolInvoker::new(Arc::new(MockWebSearch::new()));
        let err = invoker
            .invoke("transfer_call", "{}", &context(Some("C1"), registry_with("C1")))
            .await
            .unwrap_err();
        assert!(matches!(
            err,
            ToolError::ProviderFailure(ProviderError::NotConfigured(_))
        ));
    }
}
