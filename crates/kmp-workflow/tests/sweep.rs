//! Integration tests for the deadline sweep and the resume worker.

mod common;

use chrono::{Duration, Utc};
use serde_json::{Value, json};

use common::Harness;
use kmp_workflow::{
    ApprovalStatus, DeadlineSweep, Edge, InstanceStatus, LogStatus, NodeKind, NodeSpec, ResumeQueue,
    ResumeTask, ResumeWorker, VoteDecision, WorkflowGraph,
};

fn trigger(to: &str) -> NodeSpec {
    NodeSpec::new(NodeKind::Trigger).with_edge(Edge::new(to))
}

fn record(outcome: &str) -> NodeSpec {
    NodeSpec::new(NodeKind::Action)
        .with_action("test.record")
        .with_params(json!({ "outcome": outcome }))
        .with_edge(Edge::new("done"))
}

fn gate(expired_edge: bool) -> NodeSpec {
    let node = NodeSpec::new(NodeKind::Approval)
        .with_params(json!({ "deadline_secs": 3600 }))
        .with_edge(Edge::on("approved", "granted"))
        .with_edge(Edge::on("rejected", "denied"));
    if expired_edge {
        node.with_edge(Edge::on("expired", "lapsed"))
    } else {
        node
    }
}

fn deadline_graph(expired_edge: bool) -> WorkflowGraph {
    WorkflowGraph::new()
        .with_node("start", trigger("gate"))
        .with_node("gate", gate(expired_edge))
        .with_node("granted", record("granted"))
        .with_node("denied", record("denied"))
        .with_node("lapsed", record("lapsed"))
        .with_node("done", NodeSpec::new(NodeKind::End))
}

fn timer_graph() -> WorkflowGraph {
    WorkflowGraph::new()
        .with_node("start", trigger("cooling_off"))
        .with_node(
            "cooling_off",
            NodeSpec::new(NodeKind::Wait)
                .with_params(json!({ "duration_secs": 60 }))
                .with_edge(Edge::new("confirm")),
        )
        .with_node("confirm", record("confirmed"))
        .with_node("done", NodeSpec::new(NodeKind::End))
}

#[tokio::test]
async fn test_sweep_expires_overdue_approval_once() {
    let h = Harness::new();
    h.publish("award-rec", deadline_graph(true));
    let id = h
        .engine
        .start_workflow("award-rec", json!({}))
        .await
        .unwrap()
        .instance_id;
    let approval_id = h.engine.approvals_for(&id).unwrap()[0].id.clone();

    let sweep = DeadlineSweep::new(h.engine.clone(), 50);

    // Nothing is due yet.
    assert!(sweep.run().await.unwrap().is_empty());

    let later = Utc::now() + Duration::hours(2);
    let report = sweep.run_at(later).await.unwrap();
    assert_eq!(report.expired, vec![approval_id.clone()]);
    assert!(report.failures.is_empty());

    assert_eq!(
        h.engine.get_approval(&approval_id).unwrap().status,
        ApprovalStatus::Expired
    );
    assert_eq!(
        h.engine.get_instance(&id).unwrap().status,
        InstanceStatus::Completed
    );
    assert_eq!(h.recorder.calls.lock()[0]["outcome"], json!("lapsed"));

    let gate_log = h
        .engine
        .execution_log(&id)
        .unwrap()
        .into_iter()
        .find(|l| l.node_id == "gate")
        .unwrap();
    assert_eq!(gate_log.status, LogStatus::Done);
    assert_eq!(gate_log.output["expired"], json!(true));

    // A second pass finds nothing.
    assert!(sweep.run_at(later).await.unwrap().is_empty());
    assert_eq!(h.recorder.count(), 1);
}

#[tokio::test]
async fn test_expiry_without_expired_edge_fails_instance() {
    let h = Harness::new();
    h.publish("award-rec", deadline_graph(false));
    let id = h
        .engine
        .start_workflow("award-rec", json!({}))
        .await
        .unwrap()
        .instance_id;

    let sweep = DeadlineSweep::new(h.engine.clone(), 50);
    let report = sweep
        .run_at(Utc::now() + Duration::hours(2))
        .await
        .unwrap();
    assert!(report.expired.is_empty());
    assert_eq!(report.failures.len(), 1);
    assert_eq!(report.failures[0].code, "NoMatchingEdge");
    assert_eq!(report.failures[0].instance_id, id);

    let instance = h.engine.get_instance(&id).unwrap();
    assert_eq!(instance.status, InstanceStatus::Failed);
    assert_eq!(h.recorder.count(), 0);
}

#[tokio::test]
async fn test_vote_after_expiry_is_refused() {
    let h = Harness::new();
    h.publish("award-rec", deadline_graph(true));
    let id = h
        .engine
        .start_workflow("award-rec", json!({}))
        .await
        .unwrap()
        .instance_id;
    let approval_id = h.engine.approvals_for(&id).unwrap()[0].id.clone();

    DeadlineSweep::new(h.engine.clone(), 50)
        .run_at(Utc::now() + Duration::hours(2))
        .await
        .unwrap();

    let err = h
        .aggregator
        .record_vote(&approval_id, "crown", VoteDecision::Approve, None)
        .await
        .unwrap_err();
    assert_eq!(err.code(), "ApprovalNotPending");
}

#[tokio::test]
async fn test_sweep_wakes_due_timer() {
    let h = Harness::new();
    h.publish("cooling-off", timer_graph());
    let id = h
        .engine
        .start_workflow("cooling-off", json!({}))
        .await
        .unwrap()
        .instance_id;

    let sweep = DeadlineSweep::new(h.engine.clone(), 50);
    assert!(sweep.run().await.unwrap().elapsed.is_empty());

    let report = sweep
        .run_at(Utc::now() + Duration::minutes(5))
        .await
        .unwrap();
    assert_eq!(report.elapsed, vec![id.clone()]);
    assert_eq!(
        h.engine.get_instance(&id).unwrap().status,
        InstanceStatus::Completed
    );
    assert_eq!(h.recorder.calls.lock()[0]["outcome"], json!("confirmed"));
}

#[tokio::test]
async fn test_timer_due_while_sibling_branch_runs_still_wakes() {
    let h = Harness::new();
    let graph = WorkflowGraph::new()
        .with_node(
            "start",
            NodeSpec::new(NodeKind::Trigger)
                .with_edge(Edge::new("cooling_off"))
                .with_edge(Edge::new("file_oath")),
        )
        .with_node(
            "cooling_off",
            NodeSpec::new(NodeKind::Wait)
                .with_params(json!({ "duration_secs": 60 }))
                .with_edge(Edge::new("confirm")),
        )
        .with_node("confirm", record("confirmed"))
        .with_node(
            "file_oath",
            NodeSpec::new(NodeKind::Action)
                .with_action("test.block")
                .with_edge(Edge::new("done")),
        )
        .with_node("done", NodeSpec::new(NodeKind::End));
    h.publish("oath-and-wait", graph);

    let engine = h.engine.clone();
    let started = tokio::spawn(async move { engine.start_workflow("oath-and-wait", json!({})).await });
    h.blocker.entered.notified().await;

    // The timer row exists but the instance is still running the oath branch.
    let sweep = DeadlineSweep::new(h.engine.clone(), 50);
    let swept = tokio::spawn(async move { sweep.run_at(Utc::now() + Duration::minutes(5)).await });
    tokio::time::sleep(std::time::Duration::from_millis(50)).await;
    h.blocker.release.notify_one();

    let id = started.await.unwrap().unwrap().instance_id;
    let report = swept.await.unwrap().unwrap();
    assert_eq!(report.elapsed, vec![id.clone()]);
    assert!(report.failures.is_empty());

    let instance = h.engine.get_instance(&id).unwrap();
    assert_eq!(instance.status, InstanceStatus::Completed);
    assert_eq!(h.recorder.calls.lock()[0]["outcome"], json!("confirmed"));
}

#[tokio::test]
async fn test_sweep_closes_timer_of_cancelled_instance() {
    let h = Harness::new();
    h.publish("cooling-off", timer_graph());
    let id = h
        .engine
        .start_workflow("cooling-off", json!({}))
        .await
        .unwrap()
        .instance_id;
    h.engine.cancel_workflow(&id, None).await.unwrap();

    let sweep = DeadlineSweep::new(h.engine.clone(), 50);
    let later = Utc::now() + Duration::minutes(5);
    let report = sweep.run_at(later).await.unwrap();
    assert!(report.elapsed.is_empty());
    assert!(report.failures.is_empty());
    assert!(h.engine.store().due_waits(later, 50).unwrap().is_empty());
    assert_eq!(h.recorder.count(), 0);
}

#[tokio::test]
async fn test_worker_drains_queue() {
    let h = Harness::new();
    h.publish("cooling-off", timer_graph());
    let id = h
        .engine
        .start_workflow("cooling-off", json!({}))
        .await
        .unwrap()
        .instance_id;

    let (queue, rx) = ResumeQueue::channel(8);
    let worker = tokio::spawn(ResumeWorker::new(h.engine.clone(), rx).run());

    queue
        .enqueue(ResumeTask::new(&id, "cooling_off", "elapsed").with_data(json!({ "early": true })))
        .await
        .unwrap();
    // Duplicate delivery is harmless.
    queue
        .enqueue(ResumeTask::new(&id, "cooling_off", "elapsed"))
        .await
        .unwrap();
    queue
        .enqueue(ResumeTask::new("missing", "cooling_off", "elapsed"))
        .await
        .unwrap();
    drop(queue);

    let stats = worker.await.unwrap();
    assert_eq!(stats.advanced, 1);
    assert_eq!(stats.stale, 1);
    assert_eq!(stats.failed, 1);

    let instance = h.engine.get_instance(&id).unwrap();
    assert_eq!(instance.status, InstanceStatus::Completed);
    assert_eq!(instance.context["early"], Value::Bool(true));
}
