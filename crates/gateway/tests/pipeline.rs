//! End-to-end runs of the generation pipeline against scripted model
//! streams. No network or model client involved: streams are built in-test
//! and history lives in memory.

use std::sync::Arc;
use std::time::Duration;

use cm_domain::config::Config;
use cm_domain::stream::{ModelEvent, ModelStream};
use cm_domain::OutputMode;
use cm_gateway::cli::replay::replay_stream;
use cm_gateway::runtime::{start_generation, GenerationEvent, GenerationRequest};
use cm_gateway::state::AppState;
use cm_sessions::{ChatHistory, MemoryHistory, Role};
use cm_tools::BuildStatus;
use serde_json::json;
use tokio::sync::{mpsc, oneshot};

struct Harness {
    _dir: tempfile::TempDir,
    state: Arc<AppState>,
    history: Arc<MemoryHistory>,
}

fn harness() -> Harness {
    let dir = tempfile::tempdir().unwrap();
    let mut config = Config::default();
    config.workspace.root = dir.path().join("out");
    config.history.path = dir.path().join("history");
    let history = Arc::new(MemoryHistory::new());
    let state = Arc::new(AppState::with_history(
        Arc::new(config),
        Arc::clone(&history) as Arc<dyn ChatHistory>,
    ));
    Harness {
        _dir: dir,
        state,
        history,
    }
}

fn scripted(events: Vec<ModelEvent>) -> ModelStream {
    Box::pin(async_stream::stream! {
        for e in events {
            yield Ok(e);
        }
    })
}

async fn drain(mut rx: mpsc::Receiver<GenerationEvent>) -> Vec<GenerationEvent> {
    let mut out = Vec::new();
    while let Some(e) = rx.recv().await {
        out.push(e);
    }
    out
}

/// The run guard drops just after the event channel closes.
async fn wait_for_runs_to_clear(state: &AppState) {
    for _ in 0..100 {
        if state.runs.is_empty() && state.usage.is_empty() {
            return;
        }
        tokio::time::sleep(Duration::from_millis(10)).await;
    }
    panic!("run was never unregistered");
}

fn deltas(events: &[GenerationEvent]) -> String {
    events
        .iter()
        .filter_map(|e| match e {
            GenerationEvent::Delta { text } => Some(text.as_str()),
            _ => None,
        })
        .collect()
}

// ━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━
// Completed runs
// ━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━

#[tokio::test]
async fn html_run_streams_persists_and_records_history() {
    let h = harness();
    let mut req = GenerationRequest::new("u1", "42", OutputMode::Html);
    req.prompt = Some("make a page".into());

    let stream = scripted(vec![
        ModelEvent::chunk("Sure:\n"),
        ModelEvent::chunk("```html\n"),
        ModelEvent::chunk("<p>hi</p>\n"),
        ModelEvent::chunk("```"),
        ModelEvent::usage(500),
    ]);
    let (_control, rx) = start_generation(Arc::clone(&h.state), req, stream).unwrap();
    let events = drain(rx).await;

    assert_eq!(
        events.first(),
        Some(&GenerationEvent::Delta {
            text: String::new()
        })
    );
    assert_eq!(events.last(), Some(&GenerationEvent::Done));
    let text = deltas(&events);
    assert!(text.contains("[CODE_BLOCK_START]```html"));
    assert!(text.contains("[CODE_STREAM]<p>hi</p>"));
    assert!(text.contains("```[CODE_BLOCK_END]"));

    let file = h
        .state
        .config
        .workspace
        .task_dir(OutputMode::Html, "42")
        .join("index.html");
    assert_eq!(std::fs::read_to_string(file).unwrap(), "<p>hi</p>");

    let lines = h.history.read("42").await.unwrap();
    assert_eq!(lines.len(), 2);
    assert_eq!(lines[0].role, Role::User);
    assert_eq!(lines[0].content, "make a page");
    assert_eq!(lines[1].role, Role::Ai);
    assert_eq!(lines[1].content, "Sure:\n```html\n<p>hi</p>\n```");
    assert_eq!(lines[1].owner_id, "u1");

    wait_for_runs_to_clear(&h.state).await;
}

#[tokio::test]
async fn multi_file_run_writes_each_kind() {
    let h = harness();
    let req = GenerationRequest::new("u1", "mf", OutputMode::MultiFile);
    let stream = scripted(vec![
        ModelEvent::chunk("Page:\n```html\n<main></main>\n```\n"),
        ModelEvent::chunk("Styles:\n```css\nmain { display: grid; }\n```\n"),
        ModelEvent::chunk("```js\nconsole.log(1);\n```"),
    ]);
    let (_control, rx) = start_generation(Arc::clone(&h.state), req, stream).unwrap();
    let events = drain(rx).await;
    assert_eq!(events.last(), Some(&GenerationEvent::Done));

    let text = deltas(&events);
    for name in ["index.html", "style.css", "script.js"] {
        assert!(text.contains(&format!("[MULTI_FILE_START:{name}]")), "{name}");
        assert!(text.contains(&format!("[MULTI_FILE_END:{name}]")), "{name}");
    }

    let dir = h.state.config.workspace.task_dir(OutputMode::MultiFile, "mf");
    let read = |f: &str| std::fs::read_to_string(dir.join(f)).unwrap();
    assert_eq!(read("index.html"), "<main></main>");
    assert_eq!(read("style.css"), "main { display: grid; }");
    assert_eq!(read("script.js"), "console.log(1);");
}

#[tokio::test]
async fn usage_from_every_source_is_settled_once() {
    let h = harness();
    let mut req = GenerationRequest::new("u1", "t-usage", OutputMode::Html);
    req.model = Some("fast-model".into());

    let ledger = Arc::clone(&h.state.usage);
    let stream: ModelStream = Box::pin(async_stream::stream! {
        yield Ok(ModelEvent::chunk("ok"));
        yield Ok(ModelEvent::usage(500));
        // A nested call on another task reports through the ledger.
        let ledger = Arc::clone(&ledger);
        tokio::spawn(async move { ledger.accumulate("u1", "t-usage", 200) })
            .await
            .unwrap();
    });
    let (_control, rx) = start_generation(Arc::clone(&h.state), req, stream).unwrap();
    let events = drain(rx).await;

    let report = events
        .iter()
        .find_map(|e| match e {
            GenerationEvent::Usage { report } => Some(report.clone()),
            _ => None,
        })
        .unwrap();
    assert_eq!(report.total_tokens, 700);
    assert_eq!(report.points, 1);
    assert_eq!(report.model.as_deref(), Some("fast-model"));

    // Usage is the second-to-last event, just before the terminal one.
    let n = events.len();
    assert!(matches!(events[n - 2], GenerationEvent::Usage { .. }));
    assert!(events[n - 1].is_terminal());

    wait_for_runs_to_clear(&h.state).await;
}

// ━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━
// Tool protocol
// ━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━

#[tokio::test]
async fn tool_run_dedups_requests_writes_files_and_starts_build() {
    let h = harness();
    let req = GenerationRequest::new("u1", "vue1", OutputMode::VueProject);

    let args = json!({"relativeFilePath": "src/App.vue", "content": "<template><p/></template>"})
        .to_string();
    let msg = |v: serde_json::Value| ModelEvent::chunk(v.to_string());
    let events = vec![
        msg(json!({"type": "AI_RESPONSE", "data": "Creating the app."})),
        msg(json!({"type": "TOOL_REQUEST", "id": "c1", "name": "writeFile", "arguments": "{\"rel"})),
        msg(json!({"type": "TOOL_REQUEST", "id": "c1", "name": "writeFile", "arguments": args})),
        msg(json!({"type": "TOOL_EXECUTED", "id": "c1", "name": "writeFile", "arguments": args, "result": "file written: src/App.vue"})),
        msg(json!({"type": "TOOL_REQUEST", "id": "c2", "name": "exit"})),
        msg(json!({"type": "TOOL_EXECUTED", "id": "c2", "name": "exit", "arguments": {}})),
    ];
    let stream = replay_stream(
        Arc::clone(&h.state),
        OutputMode::VueProject,
        "vue1",
        events,
        Duration::ZERO,
    );
    let (_control, rx) = start_generation(Arc::clone(&h.state), req, stream).unwrap();
    let events = drain(rx).await;
    assert_eq!(events.last(), Some(&GenerationEvent::Done));

    let text = deltas(&events);
    assert_eq!(text.matches("[selected tool] write file").count(), 1);
    assert!(text.contains("[tool call] write file src/App.vue\n```vue\n"));
    assert!(text.contains("[execution finished]"));

    let workspace = h.state.config.workspace.task_dir(OutputMode::VueProject, "vue1");
    assert_eq!(
        std::fs::read_to_string(workspace.join("src/App.vue")).unwrap(),
        "<template><p/></template>"
    );

    let lines = h.history.read("vue1").await.unwrap();
    assert_eq!(lines.len(), 1);
    assert!(lines[0].content.starts_with("Creating the app."));
    assert!(!lines[0].content.contains("[selected tool]"));

    // No package.json in the workspace, so the build fails fast.
    assert!(h.state.builds.status(&workspace).is_some());
    for _ in 0..200 {
        if h.state.builds.status(&workspace) != Some(BuildStatus::Running) {
            break;
        }
        tokio::time::sleep(Duration::from_millis(10)).await;
    }
    let result = h.state.builds.last_result(&workspace).unwrap();
    assert!(!result.success);
    assert!(result.error_summary.contains("package.json"));
}

// ━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━
// Interrupted and failed runs
// ━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━

#[tokio::test]
async fn stop_request_interrupts_without_side_effects() {
    let h = harness();
    let req = GenerationRequest::new("owner", "stop", OutputMode::Html);
    let run_id = req.run_id.clone();

    let stream: ModelStream = Box::pin(async_stream::stream! {
        yield Ok(ModelEvent::chunk("```html\n<p>partial"));
        std::future::pending::<()>().await;
        yield Ok(ModelEvent::chunk("never"));
    });
    let (control, mut rx) = start_generation(Arc::clone(&h.state), req, stream).unwrap();

    assert_eq!(
        rx.recv().await,
        Some(GenerationEvent::Delta {
            text: String::new()
        })
    );
    assert!(matches!(rx.recv().await, Some(GenerationEvent::Delta { .. })));

    // Only the owner may stop the run.
    assert!(h.state.runs.cancel_owned(&run_id, "someone-else").is_err());
    assert!(!control.is_cancelled());
    h.state.runs.cancel_owned(&run_id, "owner").unwrap();

    let rest = drain(rx).await;
    assert_eq!(rest.last(), Some(&GenerationEvent::Interrupted));
    assert!(!deltas(&rest).contains("never"));

    wait_for_runs_to_clear(&h.state).await;
    assert!(h.history.read("stop").await.unwrap().is_empty());
    let dir = h.state.config.workspace.task_dir(OutputMode::Html, "stop");
    assert!(!dir.join("index.html").exists());
}

#[tokio::test]
async fn stopped_tool_run_never_builds() {
    let h = harness();
    let req = GenerationRequest::new("u1", "vue-stop", OutputMode::VueProject);
    let run_id = req.run_id.clone();

    let msg = |v: serde_json::Value| ModelEvent::chunk(v.to_string());
    let first = msg(json!({"type": "AI_RESPONSE", "data": "Scaffolding."}));
    let stream: ModelStream = Box::pin(async_stream::stream! {
        yield Ok(first);
        std::future::pending::<()>().await;
    });
    let (_control, mut rx) = start_generation(Arc::clone(&h.state), req, stream).unwrap();
    rx.recv().await.unwrap();
    assert!(matches!(rx.recv().await, Some(GenerationEvent::Delta { .. })));

    h.state.runs.cancel_owned(&run_id, "u1").unwrap();
    assert_eq!(drain(rx).await.last(), Some(&GenerationEvent::Interrupted));
    wait_for_runs_to_clear(&h.state).await;

    let workspace = h.state.config.workspace.task_dir(OutputMode::VueProject, "vue-stop");
    assert_eq!(h.state.builds.status(&workspace), None);
    assert!(h.history.read("vue-stop").await.unwrap().is_empty());
}

#[tokio::test]
async fn stop_between_last_chunk_and_stream_end_wins() {
    let h = harness();
    let req = GenerationRequest::new("u1", "late-stop", OutputMode::Html);
    let run_id = req.run_id.clone();

    let (end_tx, end_rx) = oneshot::channel::<()>();
    let stream: ModelStream = Box::pin(async_stream::stream! {
        yield Ok(ModelEvent::chunk("```html\n<p>all of it</p>\n```"));
        // The stream ends only once the test lets it.
        let _ = end_rx.await;
    });
    let (_control, mut rx) = start_generation(Arc::clone(&h.state), req, stream).unwrap();
    rx.recv().await.unwrap();
    assert!(matches!(rx.recv().await, Some(GenerationEvent::Delta { .. })));

    h.state.runs.cancel_owned(&run_id, "u1").unwrap();
    let _ = end_tx.send(());

    assert_eq!(drain(rx).await.last(), Some(&GenerationEvent::Interrupted));
    wait_for_runs_to_clear(&h.state).await;
    assert!(h.history.read("late-stop").await.unwrap().is_empty());
    let dir = h.state.config.workspace.task_dir(OutputMode::Html, "late-stop");
    assert!(!dir.join("index.html").exists());
}

#[tokio::test]
async fn dropped_receiver_cancels_run() {
    let h = harness();
    let req = GenerationRequest::new("u1", "gone", OutputMode::Html);
    let stream: ModelStream = Box::pin(async_stream::stream! {
        loop {
            yield Ok(ModelEvent::chunk("more "));
            tokio::time::sleep(Duration::from_millis(5)).await;
        }
    });
    let (control, rx) = start_generation(Arc::clone(&h.state), req, stream).unwrap();
    drop(rx);

    wait_for_runs_to_clear(&h.state).await;
    assert!(control.is_cancelled());
    assert_eq!(h.history.total(), 0);
}

#[tokio::test]
async fn upstream_failure_is_reported_and_recorded() {
    let h = harness();
    let req = GenerationRequest::new("u1", "err", OutputMode::MultiFile);
    let stream: ModelStream = Box::pin(async_stream::stream! {
        yield Ok(ModelEvent::chunk("```css\na{}"));
        yield Err(cm_domain::Error::Upstream("connection reset".into()));
    });
    let (_control, rx) = start_generation(Arc::clone(&h.state), req, stream).unwrap();
    let events = drain(rx).await;

    match events.last() {
        Some(GenerationEvent::Error { message }) => assert!(message.contains("connection reset")),
        other => panic!("expected error event, got {other:?}"),
    }

    let lines = h.history.read("err").await.unwrap();
    assert_eq!(lines.len(), 1);
    assert!(lines[0].content.starts_with("AI reply failed:"));
    let dir = h.state.config.workspace.task_dir(OutputMode::MultiFile, "err");
    assert!(!dir.join("style.css").exists());
}

#[tokio::test]
async fn path_like_task_id_is_rejected_before_any_io() {
    let h = harness();
    let req = GenerationRequest::new("u1", "../../../escape", OutputMode::Html);
    let stream = scripted(vec![ModelEvent::chunk("```html\n<p>x</p>\n```")]);

    let err = start_generation(Arc::clone(&h.state), req, stream).unwrap_err();
    assert!(matches!(err, cm_domain::Error::InvalidInput(_)), "{err}");
    assert!(h.state.runs.is_empty());
    assert!(h.state.usage.is_empty());
    assert!(!h.state.config.workspace.root.exists());
    assert_eq!(h.history.total(), 0);
}

#[tokio::test]
async fn late_usage_report_does_not_leak_into_next_run() {
    let h = harness();

    let req = GenerationRequest::new("u1", "bill", OutputMode::Html);
    let stream = scripted(vec![ModelEvent::chunk("one"), ModelEvent::usage(100)]);
    let (_control, rx) = start_generation(Arc::clone(&h.state), req, stream).unwrap();
    drain(rx).await;
    wait_for_runs_to_clear(&h.state).await;

    // A nested call from the first run reports after it finished.
    assert_eq!(h.state.usage.accumulate("u1", "bill", 120), None);
    assert!(h.state.usage.is_empty());

    let req = GenerationRequest::new("u1", "bill", OutputMode::Html);
    let stream = scripted(vec![ModelEvent::chunk("two"), ModelEvent::usage(10)]);
    let (_control, rx) = start_generation(Arc::clone(&h.state), req, stream).unwrap();
    let report = drain(rx)
        .await
        .into_iter()
        .find_map(|e| match e {
            GenerationEvent::Usage { report } => Some(report),
            _ => None,
        })
        .unwrap();
    assert_eq!(report.total_tokens, 10);
}

#[tokio::test]
async fn duplicate_run_id_returns_same_control() {
    let h = harness();
    let req = GenerationRequest::new("u1", "dup", OutputMode::Html);
    let again = h.state.runs.register(&req.run_id, "u1", "dup").unwrap();

    let stream = scripted(vec![ModelEvent::chunk("hello")]);
    let (control, rx) = start_generation(Arc::clone(&h.state), req, stream).unwrap();
    assert!(Arc::ptr_eq(&control, &again));
    assert_eq!(drain(rx).await.last(), Some(&GenerationEvent::Done));
}
