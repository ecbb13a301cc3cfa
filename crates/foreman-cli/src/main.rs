//! foreman demo: wires the orchestrator to the in-memory adapters and walks a
//! few issues through their lifecycle.
//!
//! Set `FOREMAN_DEMO_SERVE=1` to keep polling until Ctrl-C afterwards.

use std::sync::Arc;

use anyhow::{Context, Result};
use async_trait::async_trait;
use chrono::{Duration, Utc};
use tracing::info;
use tracing_subscriber::EnvFilter;

use foreman_core::domain::{Issue, IssueCompletionEvent, IssueId, IssueIid, IssueState, ProjectId};
use foreman_core::impls::{InMemoryFleet, InMemoryIssueStore, InMemoryTracker};
use foreman_core::ports::{Clock, SystemClock, UlidGenerator};
use foreman_core::{CompletionListener, ForemanConfig, OrchestratorBuilder};

/// Prints completion events; a real deployment tears the container down here.
struct PrintCompletion;

#[async_trait]
impl CompletionListener for PrintCompletion {
    async fn on_issue_completion(&self, event: &IssueCompletionEvent) -> Result<()> {
        println!("completed: {}", serde_json::to_string(event)?);
        Ok(())
    }
}

fn demo_issue(id: u64, project: u64, minutes_ago: i64, labels: &[&str]) -> Issue {
    let created = Utc::now() - Duration::minutes(minutes_ago);
    Issue {
        id: IssueId::new(id),
        project_id: ProjectId::new(project),
        iid: IssueIid::new(id),
        title: format!("demo issue {id}"),
        description: "generated by the foreman demo".into(),
        labels: labels.iter().map(|s| s.to_string()).collect(),
        state: IssueState::Opened,
        confidential: false,
        created_at: created,
        updated_at: created,
    }
}

#[tokio::main]
async fn main() -> Result<()> {
    let filter = EnvFilter::try_from_default_env()
        .unwrap_or_else(|_| EnvFilter::new("foreman_core=info,foreman=info,warn"));
    tracing_subscriber::fmt().with_env_filter(filter).init();

    let config = ForemanConfig::from_env().context("reading FOREMAN_* configuration")?;
    let trigger = config
        .trigger_labels
        .first()
        .cloned()
        .context("FOREMAN_TRIGGER_LABELS must name at least one label")?;

    let clock: Arc<dyn Clock> = Arc::new(SystemClock);
    let store = Arc::new(InMemoryIssueStore::new());
    let tracker = Arc::new(InMemoryTracker::new(Arc::clone(&clock)));
    let fleet = Arc::new(InMemoryFleet::new(UlidGenerator::new(SystemClock)));

    // Two issues compete in project 10; project 20 runs in parallel.
    tracker.add_issue(demo_issue(1, 10, 30, &["TODO", trigger.as_str()]));
    tracker.add_issue(demo_issue(2, 10, 20, &["TODO", trigger.as_str()]));
    tracker.add_issue(demo_issue(3, 20, 10, &["TODO", trigger.as_str()]));
    // Project 20's container fails once before it comes up.
    fleet.fail_next_creates(1);

    let orchestrator = OrchestratorBuilder::new(config)
        .clock(clock)
        .store(store.clone())
        .tracker(tracker.clone())
        .label_updater(tracker.clone())
        .provisioner(fleet.clone())
        .delegator(fleet.clone())
        .build()?;
    orchestrator.on_issue_completion(Arc::new(PrintCompletion));

    orchestrator.start().await.context("starting orchestrator")?;

    // The agent for issue 1 reports back; a reviewer then accepts the work.
    let record = store
        .all_records()
        .into_iter()
        .find(|r| r.issue_id == IssueId::new(1))
        .context("issue 1 was not recorded")?;
    if let Some(container_id) = &record.container_id {
        orchestrator.report_task_completion(container_id).await?;
        tracker.set_labels(IssueId::new(1), &["DONE", trigger.as_str()]);
    }

    // Label sweep fires the completion; the next pass unblocks issue 2.
    for _ in 0..2 {
        let report = orchestrator.run_cycle().await;
        println!("cycle: {}", serde_json::to_string(&report)?);
    }

    println!("status: {}", serde_json::to_string(&orchestrator.status())?);
    println!(
        "retries pending: {}",
        serde_json::to_string(&orchestrator.get_issues_ready_for_retry())?
    );
    println!("containers created: {}", fleet.created().len());

    if std::env::var_os("FOREMAN_DEMO_SERVE").is_some() {
        info!("serving until Ctrl-C");
        tokio::signal::ctrl_c().await.context("waiting for Ctrl-C")?;
    }
    orchestrator.shutdown_and_join().await;
    Ok(())
}
