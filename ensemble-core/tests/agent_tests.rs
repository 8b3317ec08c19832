//! Agent facade: lifecycle guards, MCP wiring, LLM switching

use std::collections::HashMap;
use std::sync::Arc;

use ensemble_core::mcp::{McpServerConfig, McpTransport};
use ensemble_core::test_utils::MockAdapter;
use ensemble_core::{
    Agent, AgentConfig, Error, LlmAdapter, LlmConfig, LlmProvider, LlmScope, LlmUpdates, Role,
    SystemPromptConfig,
};

fn config() -> AgentConfig {
    AgentConfig {
        system_prompt: SystemPromptConfig::Literal("You are helpful.".into()),
        llm: LlmConfig::new(LlmProvider::OpenAi, "gpt-4o-mini", "sk-test"),
        mcp_servers: HashMap::new(),
        sessions: Default::default(),
        storage: Default::default(),
    }
}

async fn started_agent(config: AgentConfig) -> Agent {
    let agent = Agent::new(config).unwrap();
    agent.start().await.unwrap();
    agent
}

#[tokio::test]
async fn test_methods_fail_before_start() {
    let agent = Agent::new(config()).unwrap();

    let err = agent.run("hi", None, None, None, false).await.unwrap_err();
    assert!(matches!(err, Error::NotStarted));
    assert!(matches!(
        agent.list_sessions().await.unwrap_err(),
        Error::NotStarted
    ));
    assert!(matches!(
        agent.get_all_tools().await.unwrap_err(),
        Error::NotStarted
    ));
}

#[tokio::test]
async fn test_start_is_exactly_once() {
    let agent = started_agent(config()).await;
    assert!(agent.start().await.is_err());
}

#[tokio::test]
async fn test_stop_is_terminal() {
    let agent = started_agent(config()).await;
    agent.stop().await.unwrap();

    assert!(matches!(
        agent.run("hi", None, None, None, false).await.unwrap_err(),
        Error::Stopped
    ));
    assert!(matches!(agent.start().await.unwrap_err(), Error::Stopped));
}

#[tokio::test]
async fn test_invalid_config_rejected_at_construction() {
    let mut bad = config();
    bad.llm.model = "made-up-model".into();
    let err = Agent::new(bad).unwrap_err();
    assert!(err.is_config());
}

// S5: lenient MCP failure — start succeeds, failure is queryable.
#[tokio::test]
async fn test_lenient_mcp_failure_does_not_abort_start() {
    let mut cfg = config();
    cfg.mcp_servers.insert(
        "server_bad".into(),
        McpServerConfig::new(McpTransport::stdio("/nonexistent/mcp-server")),
    );

    let agent = started_agent(cfg).await;
    let failed = agent.get_mcp_failed_connections().await.unwrap();
    assert!(failed.contains_key("server_bad"));
    assert!(agent.get_all_tools().await.unwrap().is_empty());
    assert!(agent.get_mcp_clients().await.unwrap().is_empty());
}

#[tokio::test]
async fn test_strict_mcp_failure_aborts_start() {
    let mut cfg = config();
    cfg.mcp_servers.insert(
        "server_bad".into(),
        McpServerConfig::new(McpTransport::stdio("/nonexistent/mcp-server")).strict(),
    );

    let agent = Agent::new(cfg).unwrap();
    assert!(matches!(agent.start().await.unwrap_err(), Error::Mcp(_)));
}

#[tokio::test]
async fn test_system_prompt_builds() {
    let agent = started_agent(config()).await;
    assert_eq!(agent.get_system_prompt().await.unwrap(), "You are helpful.");
}

#[tokio::test]
async fn test_session_operations_round_trip() {
    let agent = started_agent(config()).await;

    let session = agent.create_session(Some("work")).await.unwrap();
    assert_eq!(session.id(), "work");
    assert!(agent
        .list_sessions()
        .await
        .unwrap()
        .iter()
        .any(|m| m.id == "work"));

    agent.load_session(Some("work")).await.unwrap();
    assert_eq!(agent.current_session_id().unwrap(), "work");

    agent.end_session("work").await.unwrap();
    // Still reachable through the store.
    assert!(agent.get_session("work").await.is_ok());

    agent.delete_session("work").await.unwrap();
    assert!(matches!(
        agent.get_session("work").await.unwrap_err(),
        Error::SessionNotFound(_)
    ));
}

// S6 (control plane): switching to a claude model moves the session to the
// anthropic in-built router while preserving its identity.
#[tokio::test]
async fn test_switch_llm_for_session() {
    let agent = started_agent(config()).await;
    agent.create_session(Some("s1")).await.unwrap();

    let warnings = agent
        .switch_llm(
            LlmUpdates::model("claude-4-sonnet"),
            LlmScope::Session("s1".into()),
        )
        .await
        .unwrap();
    assert!(warnings.is_empty());

    let effective = agent.get_effective_llm(Some("s1")).unwrap();
    assert_eq!(effective.provider, LlmProvider::Anthropic);
    assert_eq!(effective.model, "claude-4-sonnet");
    assert_eq!(
        effective.resolved_router(),
        ensemble_core::LlmRouter::InBuilt
    );
    // Secrets stay masked on the read path.
    assert_eq!(effective.api_key, ensemble_core::config::SECRET_MASK);

    let session = agent.get_session("s1").await.unwrap();
    assert_eq!(session.adapter_model().await, "claude-4-sonnet");

    // Other sessions are untouched.
    let other = agent.get_effective_llm(Some("s2")).unwrap();
    assert_eq!(other.model, "gpt-4o-mini");
}

#[tokio::test]
async fn test_switch_llm_all_scope() {
    let agent = started_agent(config()).await;
    agent.create_session(Some("a")).await.unwrap();
    agent.create_session(Some("b")).await.unwrap();

    agent
        .switch_llm(
            LlmUpdates {
                temperature: Some(0.3),
                ..Default::default()
            },
            LlmScope::All,
        )
        .await
        .unwrap();

    assert_eq!(
        agent.get_effective_llm(Some("a")).unwrap().temperature,
        Some(0.3)
    );
    assert_eq!(
        agent.get_effective_llm(Some("b")).unwrap().temperature,
        Some(0.3)
    );
}

#[tokio::test]
async fn test_switch_llm_rejects_invalid_updates() {
    let agent = started_agent(config()).await;
    agent.create_session(Some("s1")).await.unwrap();

    let err = agent
        .switch_llm(
            LlmUpdates {
                temperature: Some(7.0),
                ..Default::default()
            },
            LlmScope::Session("s1".into()),
        )
        .await
        .unwrap_err();
    assert!(err.is_config());

    // Nothing was applied.
    assert_eq!(agent.get_effective_llm(Some("s1")).unwrap().temperature, None);
}

#[tokio::test]
async fn test_switch_llm_unknown_session() {
    let agent = started_agent(config()).await;
    assert!(matches!(
        agent
            .switch_llm(LlmUpdates::model("gpt-4o"), LlmScope::Session("ghost".into()))
            .await
            .unwrap_err(),
        Error::SessionNotFound(_)
    ));
}

// A full turn through the facade with the LLM swapped out at the builder's
// adapter-factory seam.
#[tokio::test]
async fn test_run_end_to_end_with_injected_adapter() {
    let adapter = MockAdapter::new()
        .with_text("Hi from the mock!")
        .with_text("Still here.");
    let factory_adapter = adapter.clone();

    let agent = Agent::builder()
        .config(config())
        .adapter_factory(move |_| Ok(Arc::new(factory_adapter.clone()) as Arc<dyn LlmAdapter>))
        .build()
        .unwrap();
    agent.start().await.unwrap();

    let reply = agent
        .run("Hello", None, None, Some("s1"), false)
        .await
        .unwrap();
    assert_eq!(reply.as_deref(), Some("Hi from the mock!"));
    assert_eq!(adapter.call_count(), 1);

    let history = agent.get_history(Some("s1")).await.unwrap();
    let roles: Vec<Role> = history.iter().map(|m| m.role).collect();
    assert_eq!(roles, vec![Role::System, Role::User, Role::Assistant]);

    // The second turn runs against the same session and sees the prior log.
    let reply = agent
        .run("Anyone there?", None, None, Some("s1"), false)
        .await
        .unwrap();
    assert_eq!(reply.as_deref(), Some("Still here."));
    assert_eq!(adapter.call_count(), 2);
    assert_eq!(agent.get_history(Some("s1")).await.unwrap().len(), 5);
    assert_eq!(
        agent.get_session_metadata("s1").await.unwrap().message_count,
        5
    );

    agent.stop().await.unwrap();
}

#[tokio::test]
async fn test_execute_unknown_tool_is_typed() {
    let agent = started_agent(config()).await;
    let err = agent
        .execute_tool("missing", serde_json::json!({}))
        .await
        .unwrap_err();
    assert!(matches!(err, Error::Mcp(ensemble_core::McpError::ToolNotFound(_))));
}

#[tokio::test]
async fn test_connect_mcp_server_validates_config() {
    let agent = started_agent(config()).await;
    let err = agent
        .connect_mcp_server("bad", McpServerConfig::new(McpTransport::stdio("")))
        .await
        .unwrap_err();
    assert!(err.is_config());
}

#[tokio::test]
async fn test_remove_unknown_mcp_server() {
    let agent = started_agent(config()).await;
    assert!(agent.remove_mcp_server("ghost").await.is_err());
}
