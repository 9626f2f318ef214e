//! Integration tests for the scheduler with mock generators and checkers,
//! plus the HTTP checker client against an in-process axum server.

use std::sync::{Arc, Mutex};
use std::time::Duration;

use axum::routing::{get, post};
use axum::{Json, Router};
use policy::PromptStyle;
use proof_records::ProofRecord;
use scheduler::mocks::{MockGenerator, MockVerifier};
use scheduler::{
    NoopObserver, Problem, ProofVerifier, RemoteBridge, RoundReport, Scheduler, SchedulerConfig,
};
use serde_json::{json, Value};

// ---------------------------------------------------------------------------
// Helpers
// ---------------------------------------------------------------------------

const HEADER: &str = "import Mathlib\nimport Aesop\n\nset_option maxHeartbeats 400000\n";

fn problem(key: &str) -> Problem {
    let record = ProofRecord::new(format!("theorem {key} : True := by"), HEADER);
    Problem::from_record(key, PromptStyle::Default, record)
}

fn config(budget: usize, batch: usize, stop_on_success: bool) -> SchedulerConfig {
    SchedulerConfig {
        max_attempts_per_problem: budget,
        micro_batch_size: batch,
        stop_on_success,
        ..SchedulerConfig::default()
    }
}

/// Map each prompt of each batch back to its problem key.
fn batch_keys(batches: &[Vec<String>], problems: &[Problem]) -> Vec<Vec<String>> {
    batches
        .iter()
        .map(|batch| {
            batch
                .iter()
                .map(|prompt| {
                    problems
                        .iter()
                        .find(|p| &p.prompt == prompt)
                        .map(|p| p.key.clone())
                        .unwrap()
                })
                .collect()
        })
        .collect()
}

// ---------------------------------------------------------------------------
// Scheduling
// ---------------------------------------------------------------------------

#[tokio::test]
async fn test_batches_drain_in_key_order() {
    let mut problems = vec![problem("A").with_budget(5), problem("B").with_budget(2)];
    let generator = MockGenerator::echo();
    let verifier = MockVerifier::rejecting();

    let scheduler = Scheduler::new(config(8, 3, false)).unwrap();
    let result = scheduler
        .run(&mut problems, &generator, &verifier, &mut NoopObserver)
        .await
        .unwrap();

    assert_eq!(
        batch_keys(&generator.batches(), &problems),
        vec![
            vec!["A", "A", "A"],
            vec!["A", "A", "B"],
            vec!["B"],
        ]
    );
    assert_eq!(result.stats.rounds, 3);
    assert_eq!(result.attempts[0].0, "A");
    assert_eq!(result.attempts[0].1.len(), 5);
    assert_eq!(result.attempts[1].1.len(), 2);
    assert_eq!(problems[0].record.count_attempts(), 5);
    assert_eq!(problems[1].record.count_attempts(), 2);
}

#[tokio::test]
async fn test_stop_on_success_freezes_attempts() {
    let mut problems = vec![problem("A")];
    let generator = MockGenerator::echo();
    let verifier = MockVerifier::with_verdicts([false, true, true]);

    let scheduler = Scheduler::new(config(3, 1, true)).unwrap();
    let result = scheduler
        .run(&mut problems, &generator, &verifier, &mut NoopObserver)
        .await
        .unwrap();

    assert_eq!(generator.calls(), 2);
    assert_eq!(verifier.calls().len(), 2);
    let attempts = &result.attempts[0].1;
    assert_eq!(attempts.len(), 2);
    assert!(!attempts[0].success);
    assert!(attempts[1].success);
    assert_eq!(
        problems[0].record.solution(),
        Some(attempts[1].parsed_proof.as_str())
    );
    assert_eq!(result.stats.solved, 1);
}

#[tokio::test]
async fn test_samples_after_success_in_same_batch_are_discarded() {
    let mut problems = vec![problem("A")];
    let generator = MockGenerator::echo();
    let verifier = MockVerifier::with_verdicts([true]);

    let scheduler = Scheduler::new(config(4, 4, true)).unwrap();
    let result = scheduler
        .run(&mut problems, &generator, &verifier, &mut NoopObserver)
        .await
        .unwrap();

    assert_eq!(generator.calls(), 1);
    assert_eq!(result.attempts[0].1.len(), 1);
    assert_eq!(result.stats.discarded, 3);
    assert_eq!(result.stats.samples_generated, 4);
}

#[tokio::test]
async fn test_without_stop_on_success_budget_is_spent() {
    let mut problems = vec![problem("A"), problem("B")];
    let generator = MockGenerator::echo();
    let verifier = MockVerifier::with_verdicts([true; 8]);

    let scheduler = Scheduler::new(config(4, 3, false)).unwrap();
    let result = scheduler
        .run(&mut problems, &generator, &verifier, &mut NoopObserver)
        .await
        .unwrap();

    let generated: usize = generator.batches().iter().map(Vec::len).sum();
    assert_eq!(generated, 8);
    assert_eq!(result.stats.attempts_recorded, 8);
    assert_eq!(problems[0].record.count_successes(), 4);
    assert_eq!(result.stats.solved, 2);
}

#[tokio::test]
async fn test_budget_is_never_exceeded() {
    let mut problems = vec![
        problem("p1").with_budget(7),
        problem("p2").with_budget(1),
        problem("p3").with_budget(4),
    ];
    let generator = MockGenerator::echo();
    let verifier = MockVerifier::rejecting();

    let scheduler = Scheduler::new(config(0, 5, true)).unwrap();
    scheduler
        .run(&mut problems, &generator, &verifier, &mut NoopObserver)
        .await
        .unwrap();

    let keys = batch_keys(&generator.batches(), &problems);
    for (problem, budget) in problems.iter().zip([7, 1, 4]) {
        let slots = keys.iter().flatten().filter(|k| **k == problem.key).count();
        assert_eq!(slots, budget, "slots for {}", problem.key);
        assert_eq!(problem.record.count_attempts(), budget);
    }
    assert!(keys.iter().all(|batch| batch.len() <= 5));
}

#[tokio::test]
async fn test_empty_outputs_consume_budget() {
    let mut problems = vec![problem("A")];
    let generator = MockGenerator::echo();
    generator.push_outputs(["", "```lean4\ntheorem A : True := trivial\n```"]);
    let verifier = MockVerifier::accepting_containing("trivial");

    let scheduler = Scheduler::new(config(2, 2, true)).unwrap();
    let result = scheduler
        .run(&mut problems, &generator, &verifier, &mut NoopObserver)
        .await
        .unwrap();

    assert_eq!(generator.calls(), 1);
    assert_eq!(result.stats.skipped, 1);
    assert_eq!(result.attempts[0].1.len(), 1);
    assert!(result.attempts[0].1[0].success);
    assert_eq!(
        result.attempts[0].1[0].parsed_proof,
        "theorem A : True := trivial"
    );
}

#[tokio::test]
async fn test_inference_failure_consumes_slots_and_continues() {
    let mut problems = vec![problem("A")];
    let generator = MockGenerator::echo();
    generator.push_failure("server overloaded");
    let verifier = MockVerifier::rejecting();

    let scheduler = Scheduler::new(config(4, 2, true)).unwrap();
    let result = scheduler
        .run(&mut problems, &generator, &verifier, &mut NoopObserver)
        .await
        .unwrap();

    assert_eq!(generator.calls(), 2);
    assert_eq!(result.stats.failed_batches, 1);
    assert_eq!(result.stats.skipped, 2);
    assert_eq!(result.attempts[0].1.len(), 2);
}

#[tokio::test]
async fn test_observer_sees_every_round() {
    let mut problems = vec![problem("A"), problem("B")];
    let generator = MockGenerator::echo();
    let verifier = MockVerifier::rejecting();

    let seen = Arc::new(Mutex::new(Vec::new()));
    let sink = Arc::clone(&seen);
    let mut observer = move |report: &RoundReport, problems: &[Problem]| -> anyhow::Result<()> {
        let total: usize = problems.iter().map(|p| p.record.count_attempts()).sum();
        sink.lock().unwrap().push((report.round, total));
        Ok(())
    };

    let scheduler = Scheduler::new(config(2, 3, true)).unwrap();
    scheduler
        .run(&mut problems, &generator, &verifier, &mut observer)
        .await
        .unwrap();

    assert_eq!(*seen.lock().unwrap(), vec![(1, 3), (2, 4)]);
}

#[tokio::test]
async fn test_existing_attempts_are_kept() {
    let mut problems = vec![problem("A")];
    let generator = MockGenerator::echo();
    let verifier = MockVerifier::rejecting();
    let scheduler = Scheduler::new(config(2, 2, true)).unwrap();

    scheduler
        .run(&mut problems, &generator, &verifier, &mut NoopObserver)
        .await
        .unwrap();
    let second = scheduler
        .run(&mut problems, &generator, &verifier, &mut NoopObserver)
        .await
        .unwrap();

    assert_eq!(second.attempts[0].1.len(), 2);
    assert_eq!(problems[0].record.count_attempts(), 4);
}

// ---------------------------------------------------------------------------
// RemoteBridge
// ---------------------------------------------------------------------------

#[derive(Default)]
struct FakeServer {
    ready: bool,
    reinit_ok: bool,
    reinit_calls: usize,
    verified: Vec<String>,
}

async fn spawn_checker_server(state: FakeServer) -> (String, Arc<Mutex<FakeServer>>) {
    let state = Arc::new(Mutex::new(state));

    let status_state = Arc::clone(&state);
    let reinit_state = Arc::clone(&state);
    let verify_state = Arc::clone(&state);

    let app = Router::new()
        .route(
            "/status",
            get(move || {
                let state = Arc::clone(&status_state);
                async move {
                    let ready = state.lock().unwrap().ready;
                    Json(json!({"ready": ready, "process_running": ready}))
                }
            }),
        )
        .route(
            "/reinitialize",
            post(move || {
                let state = Arc::clone(&reinit_state);
                async move {
                    let mut s = state.lock().unwrap();
                    s.reinit_calls += 1;
                    if s.reinit_ok {
                        s.ready = true;
                        (
                            axum::http::StatusCode::OK,
                            Json(json!({"status": "success", "message": "REPL initialized successfully"})),
                        )
                    } else {
                        (
                            axum::http::StatusCode::INTERNAL_SERVER_ERROR,
                            Json(json!({"status": "error", "message": "lake not found"})),
                        )
                    }
                }
            }),
        )
        .route(
            "/verify",
            post(move |Json(body): Json<Value>| {
                let state = Arc::clone(&verify_state);
                async move {
                    let theorem = body["theorem"].as_str().unwrap_or_default().to_string();
                    let reply = if theorem.contains("sorry") {
                        json!({"env": 2, "sorries": [{"pos": {"line": 1, "column": 0}, "goal": "⊢ True"}]})
                    } else if theorem.contains("bad") {
                        json!({"env": 2, "messages": [{"severity": "error", "data": "unknown tactic", "pos": {"line": 3, "column": 2}, "endPos": null}]})
                    } else {
                        json!({"env": 2})
                    };
                    state.lock().unwrap().verified.push(theorem);
                    Json(reply)
                }
            }),
        );

    let listener = tokio::net::TcpListener::bind("127.0.0.1:0").await.unwrap();
    let addr = listener.local_addr().unwrap();
    tokio::spawn(async move {
        axum::serve(listener, app).await.unwrap();
    });
    (format!("http://{addr}"), state)
}

#[tokio::test]
async fn test_remote_bridge_classifies_responses() {
    let (url, state) = spawn_checker_server(FakeServer {
        ready: true,
        ..FakeServer::default()
    })
    .await;
    let bridge = RemoteBridge::new(&url).unwrap();
    let timeout = Duration::from_secs(5);

    let ok = bridge
        .check_proof("theorem t : True := trivial", HEADER, false, timeout)
        .await;
    assert!(ok.verified, "{}", ok.diagnostic);

    let sorry = bridge
        .check_proof("theorem t : True := sorry", HEADER, false, timeout)
        .await;
    assert!(!sorry.verified);
    assert_eq!(sorry.diagnostic.to_string(), "Proof contains unresolved goals");

    let allowed = bridge
        .check_proof("theorem t : True := sorry", HEADER, true, timeout)
        .await;
    assert!(allowed.verified);

    let bad = bridge
        .check_proof("theorem t : True := by bad", HEADER, false, timeout)
        .await;
    assert!(!bad.verified);
    assert!(bad.diagnostic.to_string().contains("unknown tactic"));

    let s = state.lock().unwrap();
    assert_eq!(s.reinit_calls, 0);
    // Header imports are stripped before submission.
    assert!(s.verified[0].starts_with("set_option maxHeartbeats"));
    assert!(s.verified[0].ends_with("\ntheorem t : True := trivial"));
}

#[tokio::test]
async fn test_remote_bridge_reinitializes_once() {
    let (url, state) = spawn_checker_server(FakeServer {
        ready: false,
        reinit_ok: true,
        ..FakeServer::default()
    })
    .await;
    let bridge = RemoteBridge::new(&url).unwrap();

    let outcome = bridge
        .check_proof("theorem t : True := trivial", HEADER, false, Duration::from_secs(5))
        .await;
    assert!(outcome.verified);
    assert_eq!(state.lock().unwrap().reinit_calls, 1);
}

#[tokio::test]
async fn test_remote_bridge_reports_failed_reinitialize() {
    let (url, state) = spawn_checker_server(FakeServer::default()).await;
    let bridge = RemoteBridge::new(&url).unwrap();

    let outcome = bridge
        .check_proof("theorem t : True := trivial", HEADER, false, Duration::from_secs(5))
        .await;
    assert!(!outcome.verified);
    assert_eq!(
        outcome.diagnostic.to_string(),
        "Failed to reinitialize REPL: lake not found"
    );
    let s = state.lock().unwrap();
    assert_eq!(s.reinit_calls, 1);
    assert!(s.verified.is_empty());
}

#[tokio::test]
async fn test_scheduler_with_remote_verifier() {
    let (url, _state) = spawn_checker_server(FakeServer {
        ready: true,
        ..FakeServer::default()
    })
    .await;
    let verifier: Box<dyn ProofVerifier> = Box::new(RemoteBridge::new(&url).unwrap());

    let mut problems = vec![problem("A")];
    let generator = MockGenerator::echo();
    generator.push_outputs(["```lean4\ntheorem A : True := by bad\n```"]);
    generator.push_outputs(["```lean4\ntheorem A : True := trivial\n```"]);

    let scheduler = Scheduler::new(config(3, 1, true)).unwrap();
    let result = scheduler
        .run(&mut problems, &generator, verifier.as_ref(), &mut NoopObserver)
        .await
        .unwrap();

    assert_eq!(result.attempts[0].1.len(), 2);
    assert_eq!(
        problems[0].record.solution(),
        Some("theorem A : True := trivial")
    );
}
