use anyhow::Result;
use chrono::{Duration, Utc};
use mlp_models::{
    Deployment, DeploymentSpec, Notebook, NotebookSpec, NotebookStatus,
    ResourceRef, UsageMetadata, UsageRecord, UsageResourceType,
};
use mlp_storage::memory::MemoryStorageFactory;
use mlp_storage::{
    DeploymentStorage, NotebookFilter, NotebookStorage, StorageError,
    StorageFactory, UsageFilter, UsageStorage,
};

fn notebook(id: &str, owner: &str) -> Notebook {
    Notebook::new(id.into(), owner.into(), NotebookSpec::new(id), Utc::now())
}

fn open_record(id: &str, nb: &str) -> UsageRecord {
    UsageRecord::open(
        id.into(),
        "alice".into(),
        ResourceRef::Notebook(nb.into()),
        UsageResourceType::NotebookRuntime,
        UsageMetadata::default(),
        Utc::now(),
    )
}

#[tokio::test]
async fn notebook_update_is_compare_and_set() -> Result<()> {
    let storage = MemoryStorageFactory.create_notebook_storage();
    let mut nb = notebook("nb1", "alice");
    storage.insert_notebook(&nb).await?;

    nb.status = NotebookStatus::Running;
    storage.update_notebook(&nb, NotebookStatus::Creating).await?;

    nb.status = NotebookStatus::Stopping;
    let err = storage
        .update_notebook(&nb, NotebookStatus::Creating)
        .await
        .unwrap_err();
    assert!(matches!(err, StorageError::Conflict(_)));

    let stored = storage.get_notebook("nb1").await?.unwrap();
    assert_eq!(stored.status, NotebookStatus::Running);
    Ok(())
}

#[tokio::test]
async fn duplicate_notebook_insert_rejected() -> Result<()> {
    let storage = MemoryStorageFactory.create_notebook_storage();
    storage.insert_notebook(&notebook("nb1", "alice")).await?;
    let err = storage
        .insert_notebook(&notebook("nb1", "bob"))
        .await
        .unwrap_err();
    assert!(matches!(err, StorageError::AlreadyExists(_)));
    Ok(())
}

#[tokio::test]
async fn notebook_filter_hides_deleted_and_applies_age() -> Result<()> {
    let storage = MemoryStorageFactory.create_notebook_storage();
    let mut old = notebook("old", "alice");
    old.status = NotebookStatus::Stopped;
    old.last_accessed = Utc::now() - Duration::hours(48);
    let mut gone = notebook("gone", "alice");
    gone.status = NotebookStatus::Deleted;
    storage.insert_notebook(&old).await?;
    storage.insert_notebook(&gone).await?;
    storage.insert_notebook(&notebook("other", "bob")).await?;

    let mine = storage
        .list_notebooks(NotebookFilter::owned_by("alice"))
        .await?;
    assert_eq!(mine.len(), 1);
    assert_eq!(mine[0].id, "old");

    let idle = storage
        .list_notebooks(NotebookFilter {
            status: Some(NotebookStatus::Stopped),
            last_accessed_before: Some(Utc::now() - Duration::hours(24)),
            ..Default::default()
        })
        .await?;
    assert_eq!(idle.len(), 1);
    Ok(())
}

#[tokio::test]
async fn endpoint_paths_are_unique() -> Result<()> {
    let storage = MemoryStorageFactory.create_deployment_storage();
    let now = Utc::now();
    let a = Deployment::new(
        "d1".into(),
        "alice".into(),
        DeploymentSpec::new("a", "m1"),
        "/api/predict/abc".into(),
        "ml_1".into(),
        now,
    );
    let mut b = a.clone();
    b.id = "d2".into();
    storage.insert_deployment(&a).await?;
    let err = storage.insert_deployment(&b).await.unwrap_err();
    assert!(matches!(err, StorageError::AlreadyExists(_)));

    let found = storage
        .get_deployment_by_endpoint("/api/predict/abc")
        .await?
        .unwrap();
    assert_eq!(found.id, "d1");
    Ok(())
}

#[tokio::test]
async fn at_most_one_open_window_per_resource() -> Result<()> {
    let storage = MemoryStorageFactory.create_usage_storage();
    storage.insert_record(&open_record("u1", "nb1")).await?;
    let err = storage
        .insert_record(&open_record("u2", "nb1"))
        .await
        .unwrap_err();
    assert!(matches!(err, StorageError::Conflict(_)));

    // another resource is unaffected
    storage.insert_record(&open_record("u3", "nb2")).await?;

    let mut rec = storage
        .open_records(&ResourceRef::Notebook("nb1".into()))
        .await?
        .remove(0);
    rec.end_time = Some(Utc::now());
    storage.update_open_record(&rec).await?;

    // closing twice loses the race
    let err = storage.update_open_record(&rec).await.unwrap_err();
    assert!(matches!(err, StorageError::Conflict(_)));

    // a new window may now be opened
    storage.insert_record(&open_record("u4", "nb1")).await?;
    let all = storage
        .list_records(UsageFilter {
            resource: Some(ResourceRef::Notebook("nb1".into())),
            ..Default::default()
        })
        .await?;
    assert_eq!(all.len(), 2);
    assert_eq!(all.iter().filter(|r| r.is_open()).count(), 1);
    Ok(())
}
