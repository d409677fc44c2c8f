//! End-to-end step loop scenarios against the scripted backend and
//! executor.

use std::sync::Arc;

use serde_json::{json, Value};

use stepgate_agent::{
    ExecutorReply, ScriptedExecutor, StepAgent, StepSpec, StepVerification,
};
use stepgate_backend::{MockBackend, MockCall};
use stepgate_core_types::RunId;
use stepgate_runtime::{AgentRuntime, RuntimeConfig, TokenUsage, UsageRole};
use stepgate_trace::{MemorySink, TraceEventKind, Tracer};
use stepgate_verify::{exists, text_present, url_contains, EventuallyConfig};

fn example_payload() -> Value {
    json!({
        "status": "success",
        "url": "https://example.com/",
        "timestamp": 1u64,
        "viewport": {"width": 1280.0, "height": 800.0},
        "elements": [
            {"id": 1, "role": "heading", "text": "Example Domain",
             "bbox": {"x": 100.0, "y": 50.0, "width": 400.0, "height": 40.0}},
            {"id": 5, "role": "link", "text": "More information...",
             "href": "https://www.iana.org/domains/example",
             "importance": 80,
             "bbox": {"x": 100.0, "y": 200.0, "width": 200.0, "height": 20.0}}
        ]
    })
}

fn iana_payload() -> Value {
    json!({
        "status": "success",
        "url": "https://www.iana.org/domains/example",
        "timestamp": 2u64,
        "viewport": {"width": 1280.0, "height": 800.0},
        "elements": [
            {"id": 2, "role": "heading", "text": "Example Domains",
             "bbox": {"x": 100.0, "y": 50.0, "width": 400.0, "height": 40.0}}
        ]
    })
}

fn agent_with(
    backend: MockBackend,
) -> (StepAgent, Arc<ScriptedExecutor>, Arc<MemorySink>, Arc<MockBackend>) {
    let backend = Arc::new(backend);
    let sink = Arc::new(MemorySink::new());
    let tracer = Tracer::new(RunId::new(), sink.clone());
    let runtime = AgentRuntime::new(
        backend.clone() as Arc<dyn stepgate_backend::Backend>,
        tracer,
        RuntimeConfig::default(),
    );
    let executor = Arc::new(ScriptedExecutor::new());
    let agent = StepAgent::new(runtime, executor.clone());
    (agent, executor, sink, backend)
}

#[tokio::test]
async fn snapshot_gated_click_follows_link() {
    let backend = MockBackend::new();
    backend.push_call_result(example_payload());
    backend.push_call_result(iana_payload());
    let (agent, executor, sink, backend) = agent_with(backend);
    executor.push_text("CLICK(5)");

    let spec = StepSpec::new("follow the More information link")
        .with_snapshot_limit(60)
        .verify(StepVerification::once(
            exists("role=heading"),
            "heading present",
            true,
        ))
        .verify(StepVerification::retried(
            url_contains("iana.org"),
            "reached iana",
            true,
            EventuallyConfig::default().with_timeout(10_000),
        ));

    let report = agent.step("visit iana", &spec).await.unwrap();
    assert!(report.ok, "report: {report:?}");
    assert!(!report.finished);
    assert_eq!(report.verifications.len(), 2);

    // The click landed on element 5's bbox center.
    let clicks: Vec<MockCall> = backend
        .calls()
        .into_iter()
        .filter(|c| matches!(c, MockCall::MouseClick { .. }))
        .collect();
    assert_eq!(clicks.len(), 1);
    match &clicks[0] {
        MockCall::MouseClick { x, y, .. } => {
            assert_eq!(*x, 200.0);
            assert_eq!(*y, 210.0);
        }
        _ => unreachable!(),
    }

    // Two snapshots, one action, two verifications, bracketed by the step.
    let kinds: Vec<TraceEventKind> = sink.events().iter().map(|e| e.kind).collect();
    assert_eq!(
        kinds,
        vec![
            TraceEventKind::StepStart,
            TraceEventKind::Snapshot,
            TraceEventKind::Action,
            TraceEventKind::Snapshot,
            TraceEventKind::Verification,
            TraceEventKind::Verification,
            TraceEventKind::StepEnd,
        ]
    );

    // The executor saw the compact element lines.
    let prompts = executor.prompts();
    assert_eq!(prompts.len(), 1);
    assert!(prompts[0].1.contains("5|link|More information..."));
}

#[tokio::test]
async fn unparseable_action_fails_the_step() {
    let backend = MockBackend::new();
    backend.push_call_result(example_payload());
    let (agent, executor, sink, _) = agent_with(backend);
    executor.push_text("DO_SOMETHING(now)");

    let report = agent
        .step("visit iana", &StepSpec::new("confused step"))
        .await
        .unwrap();
    assert!(!report.ok);
    let error = report.error.unwrap();
    assert!(error.contains("unparseable action"));

    let events = sink.events();
    assert!(events.iter().any(|e| e.kind == TraceEventKind::Error));
    let end = events.last().unwrap();
    assert_eq!(end.kind, TraceEventKind::StepEnd);
    assert_eq!(end.data["ok"], false);
}

#[tokio::test]
async fn click_on_unknown_id_is_element_not_found() {
    let backend = MockBackend::new();
    backend.push_call_result(example_payload());
    let (agent, executor, _, _) = agent_with(backend);
    executor.push_text("CLICK(99)");

    let report = agent
        .step("visit iana", &StepSpec::new("bad click"))
        .await
        .unwrap();
    assert!(!report.ok);
    assert!(report.error.unwrap().contains("element 99 not found"));
}

#[tokio::test]
async fn finish_short_circuits_without_acting() {
    let backend = MockBackend::new();
    backend.push_call_result(example_payload());
    let (agent, executor, sink, backend) = agent_with(backend);
    executor.push_text("FINISH()");

    let report = agent
        .step("already done", &StepSpec::new("confirm done"))
        .await
        .unwrap();
    assert!(report.finished);
    assert!(report.ok);
    assert!(backend
        .calls()
        .iter()
        .all(|c| !matches!(c, MockCall::MouseClick { .. })));
    // Only the initial snapshot; no post-action capture.
    let snapshots = sink
        .events()
        .iter()
        .filter(|e| e.kind == TraceEventKind::Snapshot)
        .count();
    assert_eq!(snapshots, 1);
}

#[tokio::test]
async fn run_halts_on_first_failure_when_asked() {
    let backend = MockBackend::new();
    backend.push_call_result(example_payload());
    let (agent, executor, _, _) = agent_with(backend);
    executor.push_text("garbage");

    let steps = vec![
        StepSpec::new("first step"),
        StepSpec::new("second step (never runs)"),
    ];
    let report = agent.run("task", &steps, true).await.unwrap();
    assert_eq!(report.steps.len(), 1);
    assert!(!report.ok);
    assert!(!report.finished);
}

#[tokio::test]
async fn run_stops_after_terminal_step() {
    let backend = MockBackend::new();
    backend.push_call_result(example_payload());
    let (agent, executor, _, _) = agent_with(backend);
    executor.push_text("FINISH()");

    let steps = vec![
        StepSpec::new("finish now"),
        StepSpec::new("never reached"),
    ];
    let report = agent.run("task", &steps, false).await.unwrap();
    assert_eq!(report.steps.len(), 1);
    assert!(report.finished);
    assert!(report.ok);
}

#[tokio::test]
async fn vision_fallback_rescues_a_failed_verification() {
    let backend = MockBackend::new();
    // initial snapshot, post-action snapshot (still no success marker),
    // post-vision snapshot (success marker present)
    backend.push_call_result(example_payload());
    backend.push_call_result(example_payload());
    backend.push_call_result(json!({
        "status": "success",
        "url": "https://example.com/done",
        "timestamp": 3u64,
        "viewport": {"width": 1280.0, "height": 800.0},
        "elements": [
            {"id": 1, "role": "heading", "text": "Success",
             "bbox": {"x": 0.0, "y": 0.0, "width": 100.0, "height": 20.0}}
        ]
    }));

    let backend = Arc::new(backend);
    let sink = Arc::new(MemorySink::new());
    let tracer = Tracer::new(RunId::new(), sink.clone());
    let runtime = AgentRuntime::new(
        backend.clone() as Arc<dyn stepgate_backend::Backend>,
        tracer,
        RuntimeConfig::default(),
    );
    let executor = Arc::new(ScriptedExecutor::new());
    executor.push_text("CLICK(1)");
    let vision = Arc::new(ScriptedExecutor::new());
    vision.push_text("CLICK_XY(640,400)");

    let agent = StepAgent::new(runtime, executor).with_vision(vision.clone());

    let spec = StepSpec::new("reach the success page").verify(StepVerification::once(
        text_present("Success"),
        "success visible",
        true,
    ));
    let report = agent.step("finish the flow", &spec).await.unwrap();
    assert!(report.ok, "vision rescue should redeem the step: {report:?}");

    // The vision click went to raw coordinates.
    let clicks: Vec<MockCall> = backend
        .calls()
        .into_iter()
        .filter(|c| matches!(c, MockCall::MouseClick { .. }))
        .collect();
    assert_eq!(clicks.len(), 2);
    match &clicks[1] {
        MockCall::MouseClick { x, y, .. } => {
            assert_eq!(*x, 640.0);
            assert_eq!(*y, 400.0);
        }
        _ => unreachable!(),
    }

    // Two action events: the executor's click and the vision click.
    let actions = sink
        .events()
        .iter()
        .filter(|e| e.kind == TraceEventKind::Action)
        .count();
    assert_eq!(actions, 2);
}

#[tokio::test]
async fn executor_usage_feeds_the_accounting_hook() {
    let backend = MockBackend::new();
    backend.push_call_result(example_payload());
    let (agent, executor, _, _) = agent_with(backend);
    executor.push(ExecutorReply::text("FINISH()").with_usage(TokenUsage::new(900, 12), "exec-model"));

    agent
        .step("task", &StepSpec::new("finish"))
        .await
        .unwrap();

    let usage = agent.runtime().usage();
    assert_eq!(usage.for_role(UsageRole::Executor).prompt_tokens, 900);
    assert_eq!(usage.for_model("exec-model").total_tokens, 912);
}
