//! Generation engine behaviour against a scripted backend.

mod common;

use std::sync::Arc;
use std::time::Duration;

use common::{Script, StubBackend};
use forge_agents::config::EngineConfig;
use forge_agents::engine::{ExecutorStatus, GenerationEngine, StopReason};
use forge_agents::errors::GenerationError;
use forge_agents::service::{ForgeService, Reply};
use serde::Deserialize;
use tokio::time::Instant;
use tokio_util::sync::CancellationToken;

async fn engine(scripts: Vec<Script>) -> (Arc<GenerationEngine>, Arc<common::StubState>) {
    engine_with(scripts, EngineConfig::default()).await
}

async fn engine_with(
    scripts: Vec<Script>,
    config: EngineConfig,
) -> (Arc<GenerationEngine>, Arc<common::StubState>) {
    let (backend, state) = StubBackend::scripted(scripts);
    let engine = GenerationEngine::open(backend, config, None).await.unwrap();
    (Arc::new(engine), state)
}

#[tokio::test(start_paused = true)]
async fn test_transient_failures_retried_with_backoff() {
    let (engine, state) = engine(vec![
        Script::fail("connection refused"),
        Script::fail("connection refused"),
        Script::text("hello world"),
    ])
    .await;

    let started = Instant::now();
    let text = engine.generate("say hello").await.unwrap();
    let waited = started.elapsed();

    assert_eq!(text, "hello world");
    assert_eq!(state.infer_calls(), 3);
    // 1000ms + 2000ms back-off plus up to 500ms jitter each.
    assert!(waited >= Duration::from_millis(3000), "waited {waited:?}");
    assert!(waited <= Duration::from_millis(4000), "waited {waited:?}");
    assert_eq!(engine.status(), ExecutorStatus::Ready);
    // Each failure left the engine in Error, so the next attempt reloaded.
    assert_eq!(state.loads(), 3);
}

#[tokio::test(start_paused = true)]
async fn test_exhaustion_surfaces_generation_failed() {
    let (engine, state) = engine(vec![
        Script::fail("boom"),
        Script::fail("boom"),
        Script::fail("last boom"),
    ])
    .await;

    let err = engine.generate("anything").await.unwrap_err();
    match &err {
        GenerationError::GenerationFailed { attempts, .. } => assert_eq!(*attempts, 3),
        other => panic!("unexpected error: {other:?}"),
    }
    assert!(matches!(err.root(), GenerationError::Backend(m) if m == "last boom"));
    assert_eq!(state.infer_calls(), 3);
    assert_eq!(engine.status(), ExecutorStatus::Error);
    // The failed prompt is not left dangling in the history.
    assert_eq!(engine.history_len(), 0);
}

#[tokio::test(start_paused = true)]
async fn test_mid_stream_failure_is_retried() {
    let (engine, state) = engine(vec![
        Script::BreakMidStream(vec!["par".into(), "tial".into()]),
        Script::text("complete answer"),
    ])
    .await;

    assert_eq!(engine.generate("q").await.unwrap(), "complete answer");
    assert_eq!(state.infer_calls(), 2);
}

#[tokio::test(start_paused = true)]
async fn test_cancellation_is_not_retried() {
    let (engine, state) = engine(vec![Script::text("never")]).await;
    let cancel = CancellationToken::new();
    cancel.cancel();

    let err = engine.generate_with_cancel("q", &cancel).await.unwrap_err();
    assert!(matches!(err, GenerationError::Cancelled));
    assert_eq!(state.infer_calls(), 0);
}

#[tokio::test(start_paused = true)]
async fn test_cancel_during_stream_aborts() {
    let (engine, state) = engine(vec![Script::slow(Duration::from_secs(10), "late")]).await;
    let cancel = CancellationToken::new();
    let trigger = cancel.clone();
    tokio::spawn(async move {
        tokio::time::sleep(Duration::from_secs(1)).await;
        trigger.cancel();
    });

    let err = engine.generate_with_cancel("q", &cancel).await.unwrap_err();
    assert!(err.is_cancelled());
    assert_eq!(state.infer_calls(), 1);
}

#[tokio::test(start_paused = true)]
async fn test_requests_are_single_flight() {
    let scripts = (0..4)
        .map(|i| Script::slow(Duration::from_millis(100), &format!("reply {i}")))
        .collect();
    let (engine, state) = engine(scripts).await;

    let started = Instant::now();
    let tasks: Vec<_> = (0..4)
        .map(|i| {
            let engine = engine.clone();
            tokio::spawn(async move { engine.generate(&format!("prompt {i}")).await })
        })
        .collect();
    for task in tasks {
        assert!(task.await.unwrap().is_ok());
    }

    assert_eq!(state.max_in_flight(), 1);
    assert_eq!(state.infer_calls(), 4);
    assert!(started.elapsed() >= Duration::from_millis(400));
}

#[tokio::test(start_paused = true)]
async fn test_queued_callers_are_admitted_in_arrival_order() {
    let (engine, state) = engine(vec![Script::slow(Duration::from_secs(1), "first")]).await;

    let mut tasks = Vec::new();
    for i in 0..3 {
        let caller = engine.clone();
        tasks.push(tokio::spawn(async move {
            caller.generate(&format!("caller {i}")).await
        }));
        if i == 0 {
            while state.infer_calls() == 0 {
                tokio::task::yield_now().await;
            }
        } else {
            // Let the task reach the admission queue before the next arrives.
            for _ in 0..10 {
                tokio::task::yield_now().await;
            }
        }
    }
    for task in tasks {
        assert!(task.await.unwrap().is_ok());
    }

    let prompts = state.prompts();
    assert_eq!(prompts.len(), 3);
    // Each prompt carries the history of the callers admitted before it.
    for (k, prompt) in prompts.iter().enumerate() {
        assert!(prompt.contains(&format!("caller {k}")), "prompt {k}: {prompt}");
        assert!(!prompt.contains(&format!("caller {}", k + 1)), "prompt {k}: {prompt}");
    }
}

#[tokio::test(start_paused = true)]
async fn test_engine_reinitializes_after_error() {
    let mut config = EngineConfig::default();
    config.retry.max_attempts = 1;
    let (engine, state) = engine_with(vec![Script::fail("boom")], config).await;

    assert!(engine.generate("first").await.is_err());
    assert_eq!(engine.status(), ExecutorStatus::Error);
    assert_eq!(state.loads(), 1);

    assert_eq!(engine.generate("second").await.unwrap(), "ok");
    assert_eq!(engine.status(), ExecutorStatus::Ready);
    assert_eq!(state.loads(), 2);
    assert!(engine.transitions().iter().any(|t| {
        t.from == ExecutorStatus::Error
            && t.to == ExecutorStatus::Processing
            && t.reason.as_deref() == Some("session reinitialized")
    }));
}

#[tokio::test(start_paused = true)]
async fn test_failed_reinitialization_surfaces_invalid_state() {
    let (engine, state) = engine(vec![Script::fail("boom")]).await;
    state.fail_reloads(2);

    // The infer failure moves the engine to Error; the retry then fails to
    // reload and is not attempted again.
    let err = engine.generate("q").await.unwrap_err();
    assert!(
        matches!(&err, GenerationError::InvalidState(m) if m.contains("load failed")),
        "unexpected error: {err:?}"
    );
    assert_eq!(engine.status(), ExecutorStatus::Error);
    assert_eq!(state.loads(), 2);
    assert_eq!(state.infer_calls(), 1);
    assert_eq!(engine.history_len(), 0);

    let started = Instant::now();
    let err = engine.generate("again").await.unwrap_err();
    assert!(matches!(err, GenerationError::InvalidState(_)));
    assert_eq!(started.elapsed(), Duration::ZERO);
    assert_eq!(engine.status(), ExecutorStatus::Error);
    assert_eq!(state.loads(), 3);

    assert_eq!(engine.generate("recovered").await.unwrap(), "ok");
    assert_eq!(engine.status(), ExecutorStatus::Ready);
    assert_eq!(state.loads(), 4);
}

#[tokio::test(start_paused = true)]
async fn test_service_answers_busy_instead_of_queuing() {
    let (engine, state) = engine(vec![Script::slow(Duration::from_secs(5), "long answer")]).await;

    let holder = engine.clone();
    let long = tokio::spawn(async move { holder.generate("long task").await });
    while state.infer_calls() == 0 {
        tokio::task::yield_now().await;
    }

    let service = ForgeService::new(engine.clone());
    assert_eq!(service.ask("quick question").await.unwrap(), Reply::Busy);

    assert_eq!(long.await.unwrap().unwrap(), "long answer");
    assert_eq!(
        service.ask("now?").await.unwrap(),
        Reply::Answer("ok".to_string())
    );
}

#[tokio::test(start_paused = true)]
async fn test_disposed_engine_rejects_requests() {
    let (engine, state) = engine(vec![]).await;
    engine.shutdown().await;

    assert!(engine.is_disposed());
    assert!(matches!(
        engine.generate("q").await,
        Err(GenerationError::Disposed)
    ));
    assert_eq!(state.infer_calls(), 0);
}

#[tokio::test(start_paused = true)]
async fn test_completion_marker_stops_and_reply_is_cleaned() {
    let (engine, _) = engine(vec![Script::reply(&[
        "<|assistant|>\n",
        "The",
        " answer",
        " is 4.",
        "<|end|>",
        "\n<|user|>\nand 5+5?",
    ])])
    .await;

    let outcome = engine
        .generate_detailed("2+2?", &CancellationToken::new())
        .await
        .unwrap();
    assert_eq!(outcome.text, "The answer is 4.");
    assert_eq!(
        outcome.stop_reason,
        StopReason::CompletionMarker("<|end|>".to_string())
    );
    assert_eq!(outcome.tokens, 5);
}

#[tokio::test(start_paused = true)]
async fn test_token_ceiling_stops_stream() {
    let config = EngineConfig {
        max_tokens: Some(3),
        ..EngineConfig::default()
    };
    let tokens: Vec<String> = (0..10).map(|i| format!("t{i} ")).collect();
    let (engine, _) = engine_with(vec![Script::Reply(tokens)], config).await;

    let outcome = engine
        .generate_detailed("count", &CancellationToken::new())
        .await
        .unwrap();
    assert_eq!(outcome.stop_reason, StopReason::TokenLimit);
    assert_eq!(outcome.tokens, 3);
    assert_eq!(outcome.text, "t0 t1 t2");
}

#[tokio::test(start_paused = true)]
async fn test_duplicate_tokens_are_suppressed() {
    let (engine, _) = engine(vec![Script::reply(&[
        "a", " b", " b", " b", " b", " b", " b", " c",
    ])])
    .await;

    assert_eq!(engine.generate("q").await.unwrap(), "a b b b b c");
}

#[tokio::test(start_paused = true)]
async fn test_empty_reply_is_retried() {
    let (engine, state) = engine(vec![Script::text("<|end|>"), Script::text("finally")]).await;
    assert_eq!(engine.generate("q").await.unwrap(), "finally");
    assert_eq!(state.infer_calls(), 2);
}

#[tokio::test(start_paused = true)]
async fn test_conversation_records_both_turns() {
    let (engine, state) = engine(vec![Script::text("first"), Script::text("second")]).await;
    engine.generate("one").await.unwrap();
    engine.generate("two").await.unwrap();
    assert_eq!(engine.history_len(), 4);

    let last_prompt = state.prompts().pop().unwrap();
    assert!(last_prompt.contains("one"));
    assert!(last_prompt.contains("first"));
    assert!(last_prompt.trim_end().ends_with("<|assistant|>"));

    let trail = engine.export_debug_trail().unwrap();
    assert!(trail.contains("second"));
}

#[derive(Debug, Deserialize, PartialEq)]
struct Answer {
    name: String,
}

#[tokio::test(start_paused = true)]
async fn test_structured_output_gets_one_corrective_prompt() {
    let (engine, state) = engine(vec![
        Script::text("Sure! name is x"),
        Script::text("```json\n{\"name\": \"x\"}\n```"),
    ])
    .await;

    let answer: Answer = engine
        .generate_structured("Give the name as JSON", &CancellationToken::new())
        .await
        .unwrap();
    assert_eq!(answer, Answer { name: "x".into() });
    assert_eq!(state.infer_calls(), 2);
    assert!(state.prompts()[1].contains("could not be parsed"));
}

#[tokio::test(start_paused = true)]
async fn test_structured_output_fails_after_correction() {
    let (engine, state) = engine(vec![Script::text("nope"), Script::text("still nope")]).await;

    let err = engine
        .generate_structured::<Answer>("JSON please", &CancellationToken::new())
        .await
        .unwrap_err();
    assert!(matches!(err, GenerationError::ParseFailure(_)));
    assert_eq!(state.infer_calls(), 2);
}

#[tokio::test(start_paused = true)]
async fn test_boolean_answers() {
    let (engine, _) = engine(vec![
        Script::text("Yes, it compiles."),
        Script::text("It is not correct."),
    ])
    .await;
    let cancel = CancellationToken::new();

    assert!(engine.generate_boolean("Does it compile?", &cancel).await.unwrap());
    assert!(!engine.generate_boolean("Correct?", &cancel).await.unwrap());
}
