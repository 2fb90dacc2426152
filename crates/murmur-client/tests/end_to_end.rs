//! Client session against a real server on a loopback port.

use std::sync::Arc;

use serde_json::json;

use murmur_agent::{ScriptedAgent, ScriptedRun, StaticSources};
use murmur_client::{ChatSession, ClientError, HttpTransport, NoDelay, SessionUpdate};
use murmur_core::errors::AgentError;
use murmur_core::sources::Source;
use murmur_core::{Role, Step};
use murmur_server::{start, AppState, ServerConfig, ServerHandle};

async fn serve(runs: Vec<ScriptedRun>, sources: Vec<Source>) -> ServerHandle {
    let state = AppState::new(Arc::new(ScriptedAgent::new(runs)))
        .with_sources(Arc::new(StaticSources::new(sources)));
    start(ServerConfig { port: 0, ..Default::default() }, state)
        .await
        .unwrap()
}

fn session_for(handle: &ServerHandle) -> ChatSession {
    let transport = HttpTransport::new(&handle.base_url()).unwrap();
    ChatSession::new(Arc::new(transport)).with_pacer(Arc::new(NoDelay))
}

#[tokio::test]
async fn streamed_answer_with_citation() {
    let handle = serve(
        vec![ScriptedRun::tokens(&["X", " is", " Y."])],
        vec![Source::new("X is Y").with_lines(3, 4)],
    )
    .await;
    let mut session = session_for(&handle);
    let mut updates = session.subscribe();

    let id = session.send("What is X?").await.unwrap().unwrap();

    let last = session.transcript().last().unwrap();
    assert_eq!(last.role, Role::Assistant);
    assert_eq!(last.content, "X is Y.");
    assert_eq!(session.sources().get("0").unwrap().len(), 1);
    let cited = session.anchored_sources(&id).unwrap();
    assert_eq!(cited[0].lines().unwrap().from, 3);

    let mut tokens = String::new();
    let mut saw_sources = false;
    while let Ok(update) = updates.try_recv() {
        match update {
            SessionUpdate::Token { text, .. } => tokens.push_str(&text),
            SessionUpdate::Sources { index, .. } => {
                assert_eq!(index, "0");
                saw_sources = true;
            }
            _ => {}
        }
    }
    assert_eq!(tokens, "X is Y.");
    assert!(saw_sources);

    handle.shutdown().await;
}

#[tokio::test]
async fn second_turn_sends_whole_history() {
    let handle = serve(
        vec![ScriptedRun::tokens(&["first"]), ScriptedRun::tokens(&["second"])],
        vec![],
    )
    .await;
    let mut session = session_for(&handle);

    session.send("one").await.unwrap();
    session.send("two").await.unwrap();

    let contents: Vec<&str> = session.transcript().iter().map(|m| m.content.as_str()).collect();
    assert_eq!(contents, vec!["one", "first", "two", "second"]);
    assert!(session.sources().is_empty());
}

#[tokio::test]
async fn full_mode_replays_steps() {
    let handle = serve(
        vec![ScriptedRun::with_tools(
            &[
                ("search", json!({"query": "X"}), "X is Y"),
                ("lookup", json!({"id": "Y"}), "Y is a letter"),
            ],
            "X is Y.",
        )],
        vec![],
    )
    .await;
    let mut session = session_for(&handle).with_show_intermediate_steps(true);

    session.send("What is X?").await.unwrap();

    let messages = session.transcript().messages();
    assert_eq!(messages.len(), 4);
    let steps: Vec<Step> = messages.iter().filter_map(Step::from_record).collect();
    assert_eq!(steps.len(), 2);
    assert_eq!(steps[0].action.as_ref().unwrap().name, "search");
    assert_eq!(steps[1].observation, "Y is a letter");
    assert_eq!(messages[3].content, "X is Y.");
}

#[tokio::test]
async fn server_error_surfaces_status_and_message() {
    let handle = serve(
        vec![ScriptedRun::Error(AgentError::with_status("upstream overloaded", 503))],
        vec![],
    )
    .await;
    let mut session = session_for(&handle);

    let err = session.send("What is X?").await.unwrap_err();
    assert_eq!(
        err,
        ClientError::Server {
            status: 503,
            message: "upstream overloaded".into()
        }
    );
    assert!(!session.is_pending());
    assert_eq!(session.transcript().len(), 1);
}

#[tokio::test]
async fn unreachable_server_is_a_transport_error() {
    let handle = serve(vec![], vec![]).await;
    let base = handle.base_url();
    handle.shutdown().await;

    let transport = HttpTransport::new(&base).unwrap();
    let mut session = ChatSession::new(Arc::new(transport));
    let err = session.send("anyone?").await.unwrap_err();
    assert_eq!(err.error_kind(), "transport");
    assert!(!session.is_pending());
}
