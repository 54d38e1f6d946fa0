mod common;

use anyhow::Result;
use common::{ALICE, BOB, Harness};
use mlp_manager::LifecycleError;
use mlp_models::{Money, NotebookSpec, NotebookStatus, ResourceRef, UsageResourceType};
use mlp_runtime::{InMemoryRuntime, RuntimeError, RuntimeGateway, RuntimeOp, RuntimeStatus};
use mlp_storage::{NotebookFilter, NotebookStorage};
use std::time::Duration;

#[tokio::test]
async fn cpu_notebook_stopped_after_thirty_minutes_costs_fifteen_cents() -> Result<()> {
    let h = Harness::new();
    let nb = h.notebooks.create(ALICE, NotebookSpec::new("exploration")).await?;
    assert_eq!(nb.status, NotebookStatus::Running);
    assert!(nb.access_url.as_deref().unwrap_or_default().contains("?token="));

    h.minutes(30);
    let stopped = h.notebooks.stop(ALICE, &nb.id).await?;
    assert_eq!(stopped.status, NotebookStatus::Stopped);
    assert!(stopped.access_url.is_none());

    let records = h.records_for(ResourceRef::Notebook(nb.id.clone())).await;
    assert_eq!(records.len(), 1);
    let record = &records[0];
    assert_eq!(record.resource_type, UsageResourceType::NotebookRuntime);
    assert_eq!(record.duration_minutes(), 30.0);
    assert_eq!(record.cost, Money::from_micros(150_000));
    assert_eq!(record.metadata.cpu_cores, Some(2));
    Ok(())
}

#[tokio::test]
async fn gpu_notebook_is_billed_at_gpu_rate() -> Result<()> {
    let h = Harness::new();
    let nb = h
        .notebooks
        .create(ALICE, NotebookSpec::new("training").with_gpu("tesla-t4"))
        .await?;
    h.minutes(10);
    h.notebooks.stop(ALICE, &nb.id).await?;

    let records = h.records_for(ResourceRef::Notebook(nb.id)).await;
    assert_eq!(records[0].cost, Money::from_micros(200_000));
    assert_eq!(records[0].metadata.gpu_type.as_deref(), Some("tesla-t4"));
    Ok(())
}

#[tokio::test]
async fn stop_start_stop_produces_two_windows() -> Result<()> {
    let h = Harness::new();
    let nb = h.notebooks.create(ALICE, NotebookSpec::new("nb")).await?;
    let resource = ResourceRef::Notebook(nb.id.clone());

    h.minutes(10);
    h.notebooks.stop(ALICE, &nb.id).await?;
    h.minutes(60);
    let restarted = h.notebooks.start(ALICE, &nb.id).await?;
    assert_eq!(restarted.status, NotebookStatus::Running);
    assert_eq!(restarted.runtime_handle, nb.runtime_handle);

    let records = h.records_for(resource.clone()).await;
    assert_eq!(records.len(), 2);
    assert_eq!(records.iter().filter(|r| r.is_open()).count(), 1);

    h.minutes(20);
    h.notebooks.stop(ALICE, &nb.id).await?;
    let records = h.records_for(resource).await;
    assert_eq!(records.len(), 2);
    assert!(records.iter().all(|r| !r.is_open()));
    let minutes: Vec<f64> = records.iter().map(|r| r.duration_minutes()).collect();
    assert_eq!(minutes, vec![10.0, 20.0]);
    Ok(())
}

#[tokio::test]
async fn concurrent_stops_close_one_window() -> Result<()> {
    let h = Harness::with_runtime(
        InMemoryRuntime::new().with_latency(Duration::from_millis(50)),
    );
    let nb = h.notebooks.create(ALICE, NotebookSpec::new("nb")).await?;
    h.minutes(5);

    let (a, b) = tokio::join!(
        h.notebooks.stop(ALICE, &nb.id),
        h.notebooks.stop(ALICE, &nb.id)
    );
    assert_eq!(a?.status, NotebookStatus::Stopped);
    assert_eq!(b?.status, NotebookStatus::Stopped);

    assert_eq!(h.runtime.calls(RuntimeOp::Stop).await, 1);
    let records = h.records_for(ResourceRef::Notebook(nb.id)).await;
    assert_eq!(records.len(), 1);
    assert!(!records[0].is_open());
    Ok(())
}

#[tokio::test]
async fn stop_on_stopped_notebook_makes_no_runtime_call() -> Result<()> {
    let h = Harness::new();
    let nb = h.notebooks.create(ALICE, NotebookSpec::new("nb")).await?;
    h.notebooks.stop(ALICE, &nb.id).await?;
    h.notebooks.stop(ALICE, &nb.id).await?;
    assert_eq!(h.runtime.calls(RuntimeOp::Stop).await, 1);

    h.notebooks.start(ALICE, &nb.id).await?;
    h.notebooks.start(ALICE, &nb.id).await?;
    assert_eq!(h.runtime.calls(RuntimeOp::Start).await, 1);
    Ok(())
}

#[tokio::test]
async fn provisioning_failure_leaves_failed_record_without_window() -> Result<()> {
    let h = Harness::new();
    h.runtime
        .fail_next(RuntimeOp::Provision, RuntimeError::Timeout("sandbox never became healthy".into()))
        .await;

    let err = h
        .notebooks
        .create(ALICE, NotebookSpec::new("nb"))
        .await
        .unwrap_err();
    let id = match &err {
        LifecycleError::Transition { id, status, .. } => {
            assert_eq!(status, "failed");
            id.clone()
        }
        other => panic!("unexpected error {other:?}"),
    };
    assert!(err.is_timeout());

    let stored = h.notebook_store.get_notebook(&id).await?.unwrap();
    assert_eq!(stored.status, NotebookStatus::Failed);
    assert!(stored.runtime_handle.is_none());
    assert!(h.records_for(ResourceRef::Notebook(id)).await.is_empty());
    Ok(())
}

#[tokio::test]
async fn stop_failure_still_ends_billing() -> Result<()> {
    let h = Harness::new();
    let nb = h.notebooks.create(ALICE, NotebookSpec::new("nb")).await?;
    h.minutes(12);
    h.runtime
        .fail_next(
            RuntimeOp::Stop,
            RuntimeError::Api {
                status: 500,
                message: "daemon error".into(),
            },
        )
        .await;

    let err = h.notebooks.stop(ALICE, &nb.id).await.unwrap_err();
    assert!(matches!(err, LifecycleError::Transition { .. }));

    let stored = h.notebook_store.get_notebook(&nb.id).await?.unwrap();
    assert_eq!(stored.status, NotebookStatus::Failed);
    let records = h.records_for(ResourceRef::Notebook(nb.id)).await;
    assert_eq!(records.len(), 1);
    assert_eq!(records[0].duration_minutes(), 12.0);
    assert_eq!(records[0].cost, Money::from_micros(60_000));
    Ok(())
}

#[tokio::test]
async fn start_failure_keeps_notebook_stopped() -> Result<()> {
    let h = Harness::new();
    let nb = h.notebooks.create(ALICE, NotebookSpec::new("nb")).await?;
    h.notebooks.stop(ALICE, &nb.id).await?;
    h.runtime
        .fail_next(RuntimeOp::Start, RuntimeError::Transport("connection refused".into()))
        .await;

    let err = h.notebooks.start(ALICE, &nb.id).await.unwrap_err();
    assert!(matches!(err, LifecycleError::Runtime(_)));
    let stored = h.notebook_store.get_notebook(&nb.id).await?.unwrap();
    assert_eq!(stored.status, NotebookStatus::Stopped);
    let records = h.records_for(ResourceRef::Notebook(nb.id)).await;
    assert!(records.iter().all(|r| !r.is_open()));
    Ok(())
}

#[tokio::test]
async fn other_users_cannot_touch_a_notebook() -> Result<()> {
    let h = Harness::new();
    let nb = h.notebooks.create(ALICE, NotebookSpec::new("nb")).await?;

    for result in [
        h.notebooks.stop(BOB, &nb.id).await,
        h.notebooks.delete(BOB, &nb.id).await,
        h.notebooks.get(BOB, &nb.id).await,
    ] {
        assert!(matches!(result, Err(LifecycleError::Authorization { .. })));
    }
    assert_eq!(h.runtime.calls(RuntimeOp::Stop).await, 0);
    assert_eq!(h.runtime.calls(RuntimeOp::Remove).await, 0);
    assert!(h.notebooks.list(BOB).await?.is_empty());
    assert_eq!(h.notebooks.list(ALICE).await?.len(), 1);
    Ok(())
}

#[tokio::test]
async fn invalid_spec_is_rejected_before_persisting() -> Result<()> {
    let h = Harness::new();
    let err = h
        .notebooks
        .create(ALICE, NotebookSpec::new("nb").with_gpu("a100"))
        .await
        .unwrap_err();
    assert!(matches!(err, LifecycleError::Validation(_)));
    let all = h
        .notebook_store
        .list_notebooks(NotebookFilter {
            include_deleted: true,
            ..Default::default()
        })
        .await?;
    assert!(all.is_empty());
    assert_eq!(h.runtime.calls(RuntimeOp::Provision).await, 0);
    Ok(())
}

#[tokio::test]
async fn delete_removes_container_and_closes_window() -> Result<()> {
    let h = Harness::new();
    let nb = h.notebooks.create(ALICE, NotebookSpec::new("nb")).await?;
    h.minutes(3);

    let deleted = h.notebooks.delete(ALICE, &nb.id).await?;
    assert_eq!(deleted.status, NotebookStatus::Deleted);
    assert!(deleted.runtime_handle.is_none());
    assert_eq!(h.runtime.container_count().await, 0);

    let records = h.records_for(ResourceRef::Notebook(nb.id.clone())).await;
    assert_eq!(records[0].duration_minutes(), 3.0);

    // second delete is a no-op
    h.notebooks.delete(ALICE, &nb.id).await?;
    assert_eq!(h.runtime.calls(RuntimeOp::Remove).await, 1);
    assert!(matches!(
        h.notebooks.get(ALICE, &nb.id).await,
        Err(LifecycleError::NotFound(_))
    ));
    assert!(h.notebooks.list(ALICE).await?.is_empty());
    Ok(())
}

#[tokio::test]
async fn get_bumps_last_accessed_and_logs_tail() -> Result<()> {
    let h = Harness::new();
    let nb = h.notebooks.create(ALICE, NotebookSpec::new("nb")).await?;
    h.minutes(45);
    let seen = h.notebooks.get(ALICE, &nb.id).await?;
    assert!(seen.last_accessed > nb.last_accessed);
    let stored = h.notebook_store.get_notebook(&nb.id).await?.unwrap();
    assert_eq!(stored.last_accessed, seen.last_accessed);

    let logs = h.notebooks.logs(ALICE, &nb.id, 10).await?;
    assert!(logs.contains(&format!("notebook-{}", nb.id)));

    let handle = nb.runtime_handle.unwrap();
    assert_eq!(h.runtime.inspect_status(&handle).await?, RuntimeStatus::Running);
    Ok(())
}
