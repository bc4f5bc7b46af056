//! Cached refinements through `Invoker::refine_cached`.

mod common;

use std::sync::Arc;

use common::{ScriptedBackend, invoker, settings, unauthorized};
use promptly_core::{ErrorCode, Provider};
use promptly_llm::InvocationRequest;

fn refinement_request() -> InvocationRequest {
    InvocationRequest::new(
        Provider::OpenAi,
        "gpt-4o-mini",
        "Rewrite using chain-of-thought, answer in markdown: summarise the memo",
    )
}

#[tokio::test(start_paused = true)]
async fn second_identical_refinement_is_served_from_cache() {
    let backend = Arc::new(ScriptedBackend::new(vec![Ok(
        "**Refined Prompt:**\n```\nThink step by step, then summarise the memo.\n```".into(),
    )]));
    let invoker = invoker(backend.clone(), settings(2, 100, 1_000, 60_000));
    let request = refinement_request();

    let first = invoker
        .refine_cached("summarise the memo", "chain-of-thought", "markdown", &request)
        .await
        .expect("fresh refinement");
    let second = invoker
        .refine_cached("summarise the memo", "chain-of-thought", "markdown", &request)
        .await
        .expect("cached refinement");

    assert_eq!(first.text, "Think step by step, then summarise the memo.");
    assert!(!first.cached);
    assert_eq!(first.attempts, 1);
    assert_eq!(second.text, first.text);
    assert!(second.cached);
    assert_eq!(backend.calls(), 1);

    let stats = invoker.cache().stats();
    assert_eq!(stats.hits, 1);
    assert_eq!(stats.misses, 1);
}

#[tokio::test(start_paused = true)]
async fn different_technique_is_a_different_entry() {
    let backend = Arc::new(ScriptedBackend::new(vec![Ok("one".into()), Ok("two".into())]));
    let invoker = invoker(backend.clone(), settings(2, 100, 1_000, 60_000));
    let request = refinement_request();

    let a = invoker
        .refine_cached("memo", "chain-of-thought", "markdown", &request)
        .await
        .expect("a");
    let b = invoker
        .refine_cached("memo", "few-shot", "markdown", &request)
        .await
        .expect("b");

    assert_eq!((a.text.as_str(), b.text.as_str()), ("one", "two"));
    assert_eq!(backend.calls(), 2);
}

#[tokio::test(start_paused = true)]
async fn failures_are_not_cached() {
    let backend = Arc::new(ScriptedBackend::new(vec![unauthorized(), Ok("works now".into())]));
    let invoker = invoker(backend.clone(), settings(2, 100, 1_000, 60_000));
    let request = refinement_request();

    invoker
        .refine_cached("memo", "chain-of-thought", "markdown", &request)
        .await
        .expect_err("auth failure");
    let retry = invoker
        .refine_cached("memo", "chain-of-thought", "markdown", &request)
        .await
        .expect("second call reaches the backend");

    assert_eq!(retry.text, "works now");
    assert!(!retry.cached);
    assert_eq!(backend.calls(), 2);
}

#[tokio::test(start_paused = true)]
async fn empty_fence_is_a_failure_and_not_cached() {
    let backend = Arc::new(ScriptedBackend::new(vec![Ok("```\n```".into()), Ok("real".into())]));
    let invoker = invoker(backend.clone(), settings(2, 100, 1_000, 60_000));
    let request = refinement_request();

    let err = invoker
        .refine_cached("memo", "chain-of-thought", "markdown", &request)
        .await
        .expect_err("nothing left after recovery");
    assert_eq!(err.code(), ErrorCode::Failed);
    assert!(err.to_string().contains("blocked or filtered"));
    assert!(invoker.cache().is_empty());

    let retry = invoker
        .refine_cached("memo", "chain-of-thought", "markdown", &request)
        .await
        .expect("second call reaches the backend");
    assert_eq!(retry.text, "real");
    assert!(!retry.cached);
    assert_eq!(backend.calls(), 2);
}
