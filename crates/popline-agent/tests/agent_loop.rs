mod common;

use std::sync::atomic::{AtomicUsize, Ordering};

use common::{call, fixture, ScriptedProvider};
use popline_agent::{AgentError, ConversationAgent, ProviderResponse, EMPTY_REPLY};
use popline_types::{HistoryTurn, Role, ToolCall, TurnContent};
use serde_json::json;

fn no_op(_: &ToolCall) {}

#[tokio::test]
async fn two_tool_rounds_then_final_text() {
    let fx = fixture();
    let provider = ScriptedProvider::new(vec![
        Ok(ProviderResponse::ToolUse(call(
            "toolu_1",
            "list_sections",
            json!({"active_only": true}),
        ))),
        Ok(ProviderResponse::ToolUse(call(
            "toolu_2",
            "check_section_availability",
            json!({"section_name": "1F-A", "start_date": "2026-02-12", "end_date": "2026-02-15"}),
        ))),
        Ok(ProviderResponse::Text("1F-Aはご利用いただけます。".into())),
    ]);
    let agent = ConversationAgent::new(provider.clone(), fx.facility.clone(), 8);

    let tool_calls = AtomicUsize::new(0);
    let on_tool = |_: &ToolCall| {
        tool_calls.fetch_add(1, Ordering::SeqCst);
    };
    let outcome = agent
        .run_turn("system", &[], "1F-Aは空いていますか", &on_tool)
        .await
        .unwrap();

    assert_eq!(provider.invocations(), 3);
    assert_eq!(tool_calls.load(Ordering::SeqCst), 2);
    assert_eq!(outcome.reply, "1F-Aはご利用いただけます。");

    let kinds: Vec<_> = outcome
        .turns
        .iter()
        .map(|t| match &t.content {
            TurnContent::Text { .. } => "text",
            TurnContent::ToolUse { .. } => "tool_use",
            TurnContent::ToolResult { .. } => "tool_result",
        })
        .collect();
    assert_eq!(
        kinds,
        ["text", "tool_use", "tool_result", "tool_use", "tool_result", "text"]
    );
    assert_eq!(outcome.turns.iter().filter(|t| t.is_tool_result()).count(), 2);
    let last = outcome.turns.last().unwrap();
    assert_eq!(last.role, Role::Assistant);
    assert_eq!(last.text(), Some("1F-Aはご利用いただけます。"));

    // the second tool result reports the range as free
    match &outcome.turns[4].content {
        TurnContent::ToolResult { result } => {
            assert_eq!(result.tool_call_id, "toolu_2");
            let body: serde_json::Value = serde_json::from_str(&result.content).unwrap();
            assert_eq!(body["available"], true);
        }
        other => panic!("unexpected turn: {other:?}"),
    }

    // each request saw everything produced so far
    let seen = provider.seen.lock().unwrap();
    assert_eq!(seen[0].len(), 1);
    assert_eq!(seen[1].len(), 3);
    assert_eq!(seen[2].len(), 5);
}

#[tokio::test]
async fn prior_history_is_sent_but_not_returned() {
    let fx = fixture();
    let provider = ScriptedProvider::new(vec![Ok(ProviderResponse::Text("はい".into()))]);
    let agent = ConversationAgent::new(provider.clone(), fx.facility.clone(), 8);

    let history = vec![
        HistoryTurn::user_text("こんにちは"),
        HistoryTurn::assistant_text("ご用件をどうぞ"),
    ];
    let outcome = agent
        .run_turn("system", &history, "区画を探しています", &no_op)
        .await
        .unwrap();

    assert_eq!(provider.seen.lock().unwrap()[0].len(), 3);
    assert_eq!(outcome.turns.len(), 2);
    assert_eq!(outcome.turns[0].text(), Some("区画を探しています"));
}

#[tokio::test]
async fn unknown_tool_is_fed_back_as_error() {
    let fx = fixture();
    let provider = ScriptedProvider::new(vec![
        Ok(ProviderResponse::ToolUse(call("toolu_1", "book_parking", json!({})))),
        Ok(ProviderResponse::Text("駐車場の予約は承っておりません。".into())),
    ]);
    let agent = ConversationAgent::new(provider.clone(), fx.facility.clone(), 8);

    let outcome = agent
        .run_turn("system", &[], "駐車場を予約したい", &no_op)
        .await
        .unwrap();

    assert_eq!(provider.invocations(), 2);
    match &outcome.turns[2].content {
        TurnContent::ToolResult { result } => {
            assert!(result.is_error);
            assert!(result.content.contains("book_parking"));
        }
        other => panic!("unexpected turn: {other:?}"),
    }
}

#[tokio::test]
async fn provider_failure_aborts_the_turn() {
    let fx = fixture();
    let provider = ScriptedProvider::new(vec![
        Ok(ProviderResponse::ToolUse(call("toolu_1", "list_sections", json!({})))),
        Err(AgentError::Api {
            status: 500,
            message: "overloaded".into(),
        }),
    ]);
    let agent = ConversationAgent::new(provider.clone(), fx.facility.clone(), 8);

    let err = agent
        .run_turn("system", &[], "区画一覧", &no_op)
        .await
        .unwrap_err();
    assert!(matches!(err, AgentError::Api { status: 500, .. }));
    assert_eq!(provider.invocations(), 2);
}

#[tokio::test]
async fn empty_answer_falls_back_to_fixed_reply() {
    let fx = fixture();
    let provider = ScriptedProvider::new(vec![Ok(ProviderResponse::Text("  ".into()))]);
    let agent = ConversationAgent::new(provider, fx.facility.clone(), 8);

    let outcome = agent.run_turn("system", &[], "えっと", &no_op).await.unwrap();
    assert_eq!(outcome.reply, EMPTY_REPLY);
    assert_eq!(outcome.turns[1].text(), Some(EMPTY_REPLY));
}

#[tokio::test]
async fn runaway_tool_loop_is_bounded() {
    let fx = fixture();
    let script = (0..5)
        .map(|i| {
            Ok(ProviderResponse::ToolUse(call(
                &format!("toolu_{i}"),
                "list_sections",
                json!({}),
            )))
        })
        .collect();
    let provider = ScriptedProvider::new(script);
    let agent = ConversationAgent::new(provider.clone(), fx.facility.clone(), 2);

    let err = agent.run_turn("system", &[], "一覧", &no_op).await.unwrap_err();
    assert!(matches!(err, AgentError::ToolRoundsExceeded(2)));
    assert_eq!(provider.invocations(), 3);
}
