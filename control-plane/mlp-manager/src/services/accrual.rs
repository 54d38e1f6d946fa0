use chrono::{DateTime, Datelike, Utc};
use mlp_models::{
    Money, RateClass, ResourceRef, ServingTier, UsageMetadata, UsageRecord,
    UsageResourceType, cost,
};
use mlp_storage::{UsageFilter, UsageStorage};
use std::collections::BTreeMap;
use std::sync::Arc;
use tracing::{debug, info};

use crate::errors::LifecycleError;
use crate::models::{BillingSummary, CostByType};

/// Turns lifecycle transitions into billable usage records.
pub struct UsageAccrualEngine {
    storage: Arc<dyn UsageStorage>,
}

impl UsageAccrualEngine {
    pub fn new(storage: Arc<dyn UsageStorage>) -> Self {
        Self { storage }
    }

    pub async fn health(&self) -> Result<(), LifecycleError> {
        self.storage.health().await.map_err(Into::into)
    }

    /// Open a usage window. Fails with `Conflict` if the resource already
    /// has one.
    pub async fn open_window(
        &self,
        user_id: &str,
        resource: ResourceRef,
        resource_type: UsageResourceType,
        metadata: UsageMetadata,
        now: DateTime<Utc>,
    ) -> Result<UsageRecord, LifecycleError> {
        let record = UsageRecord::open(
            nanoid::nanoid!(),
            user_id.to_string(),
            resource,
            resource_type,
            metadata,
            now,
        );
        self.storage.insert_record(&record).await?;
        debug!(resource = %record.resource, record = %record.id, "usage window opened");
        Ok(record)
    }

    async fn single_open(
        &self,
        resource: &ResourceRef,
    ) -> Result<Option<UsageRecord>, LifecycleError> {
        let mut open = self.storage.open_records(resource).await?;
        match open.len() {
            0 => Ok(None),
            1 => Ok(open.pop()),
            n => Err(LifecycleError::Conflict(format!(
                "{resource} has {n} open usage windows"
            ))),
        }
    }

    pub async fn has_open_window(
        &self,
        resource: &ResourceRef,
    ) -> Result<bool, LifecycleError> {
        Ok(!self.storage.open_records(resource).await?.is_empty())
    }

    /// Close the open window of `resource` at `now`, pricing it with `class`.
    /// Returns `None` when nothing was open.
    pub async fn close_window(
        &self,
        resource: &ResourceRef,
        class: RateClass,
        now: DateTime<Utc>,
    ) -> Result<Option<UsageRecord>, LifecycleError> {
        let Some(mut record) = self.single_open(resource).await? else {
            debug!(%resource, "no open usage window to close");
            return Ok(None);
        };
        record.duration_ms = record.elapsed_ms(now);
        record.cost = cost(class, record.duration_ms);
        record.end_time = Some(now);
        self.storage.update_open_record(&record).await?;
        info!(
            %resource,
            record = %record.id,
            duration_ms = record.duration_ms,
            cost = %record.cost,
            "usage window closed"
        );
        Ok(Some(record))
    }

    /// Project duration and cost onto the open window without closing it.
    pub async fn recompute_open_window(
        &self,
        resource: &ResourceRef,
        class: RateClass,
        now: DateTime<Utc>,
    ) -> Result<Option<UsageRecord>, LifecycleError> {
        let Some(mut record) = self.single_open(resource).await? else {
            return Ok(None);
        };
        record.duration_ms = record.elapsed_ms(now);
        record.cost = cost(class, record.duration_ms);
        self.storage.update_open_record(&record).await?;
        Ok(Some(record))
    }

    /// Record a closed, zero-length charge for one successful prediction.
    pub async fn charge_call(
        &self,
        user_id: &str,
        deployment_id: &str,
        instance_type: &str,
        now: DateTime<Utc>,
    ) -> Result<UsageRecord, LifecycleError> {
        let mut record = UsageRecord::open(
            nanoid::nanoid!(),
            user_id.to_string(),
            ResourceRef::Deployment(deployment_id.to_string()),
            UsageResourceType::ApiCall,
            UsageMetadata {
                instance_type: Some(instance_type.to_string()),
                ..Default::default()
            },
            now,
        );
        record.end_time = Some(now);
        record.cost = ServingTier::from_instance_type(instance_type).price_per_request();
        self.storage.insert_record(&record).await?;
        Ok(record)
    }

    pub async fn usage_since(
        &self,
        user_id: &str,
        since: DateTime<Utc>,
    ) -> Result<Vec<UsageRecord>, LifecycleError> {
        let records = self
            .storage
            .list_records(UsageFilter {
                user_id: Some(user_id.to_string()),
                since: Some(since),
                ..Default::default()
            })
            .await?;
        Ok(records)
    }

    pub async fn cost_by_type(
        &self,
        user_id: &str,
    ) -> Result<Vec<CostByType>, LifecycleError> {
        let records = self
            .storage
            .list_records(UsageFilter {
                user_id: Some(user_id.to_string()),
                ..Default::default()
            })
            .await?;
        let mut grouped: BTreeMap<UsageResourceType, (Money, u64, usize)> =
            BTreeMap::new();
        for r in &records {
            let entry = grouped.entry(r.resource_type).or_default();
            entry.0 += r.cost;
            entry.1 += r.duration_ms;
            entry.2 += 1;
        }
        Ok(grouped
            .into_iter()
            .map(|(resource_type, (total_cost, total_duration_ms, records))| {
                CostByType {
                    resource_type,
                    total_cost,
                    total_duration_ms,
                    total_duration_minutes: total_duration_ms as f64 / 60_000.0,
                    records,
                }
            })
            .collect())
    }

    /// Current calendar month and all-time cost for a user.
    pub async fn billing_summary(
        &self,
        user_id: &str,
        now: DateTime<Utc>,
    ) -> Result<BillingSummary, LifecycleError> {
        let all = self
            .storage
            .list_records(UsageFilter {
                user_id: Some(user_id.to_string()),
                ..Default::default()
            })
            .await?;
        let month_start = month_start(now);
        let total_cost = all.iter().map(|r| r.cost).sum();
        let usage_records: Vec<UsageRecord> = all
            .into_iter()
            .filter(|r| r.start_time >= month_start)
            .collect();
        let current_month_cost = usage_records.iter().map(|r| r.cost).sum();
        Ok(BillingSummary {
            current_month_cost,
            total_cost,
            usage_records,
        })
    }
}

fn month_start(now: DateTime<Utc>) -> DateTime<Utc> {
    now.date_naive()
        .with_day(1)
        .and_then(|d| d.and_hms_opt(0, 0, 0))
        .map(|dt| dt.and_utc())
        .unwrap_or(now)
}

#[cfg(test)]
mod tests {
    use super::*;
    use chrono::{Duration, TimeZone};
    use mlp_storage::memory::MemoryUsageStorage;

    fn engine() -> UsageAccrualEngine {
        UsageAccrualEngine::new(Arc::new(MemoryUsageStorage::new()))
    }

    fn nb(id: &str) -> ResourceRef {
        ResourceRef::Notebook(id.into())
    }

    #[tokio::test]
    async fn close_prices_elapsed_time() {
        let engine = engine();
        let t0 = Utc::now();
        engine
            .open_window(
                "alice",
                nb("n1"),
                UsageResourceType::NotebookRuntime,
                UsageMetadata::default(),
                t0,
            )
            .await
            .unwrap();
        let closed = engine
            .close_window(&nb("n1"), RateClass::Cpu, t0 + Duration::minutes(30))
            .await
            .unwrap()
            .unwrap();
        assert_eq!(closed.duration_ms, 30 * 60_000);
        assert_eq!(closed.duration_minutes(), 30.0);
        assert_eq!(closed.cost, Money::from_micros(150_000));

        // nothing left to close
        let again = engine
            .close_window(&nb("n1"), RateClass::Cpu, t0 + Duration::minutes(31))
            .await
            .unwrap();
        assert!(again.is_none());
    }

    #[tokio::test]
    async fn recompute_keeps_window_open() {
        let engine = engine();
        let t0 = Utc::now();
        engine
            .open_window(
                "alice",
                nb("n1"),
                UsageResourceType::NotebookRuntime,
                UsageMetadata::default(),
                t0,
            )
            .await
            .unwrap();
        let projected = engine
            .recompute_open_window(&nb("n1"), RateClass::Cpu, t0 + Duration::hours(1))
            .await
            .unwrap()
            .unwrap();
        assert!(projected.is_open());
        assert_eq!(projected.cost, Money::from_micros(300_000));
        assert!(engine.has_open_window(&nb("n1")).await.unwrap());
    }

    #[tokio::test]
    async fn summary_splits_current_month() {
        let engine = engine();
        let now = Utc.with_ymd_and_hms(2025, 3, 15, 12, 0, 0).unwrap();
        let last_month = Utc.with_ymd_and_hms(2025, 2, 20, 12, 0, 0).unwrap();
        engine.charge_call("alice", "d1", "gpu-t4", last_month).await.unwrap();
        engine.charge_call("alice", "d1", "gpu-t4", now).await.unwrap();
        engine.charge_call("bob", "d2", "cpu", now).await.unwrap();

        let summary = engine.billing_summary("alice", now).await.unwrap();
        assert_eq!(summary.total_cost, Money::from_micros(20_000));
        assert_eq!(summary.current_month_cost, Money::from_micros(10_000));
        assert_eq!(summary.usage_records.len(), 1);

        let by_type = engine.cost_by_type("alice").await.unwrap();
        assert_eq!(by_type.len(), 1);
        assert_eq!(by_type[0].resource_type, UsageResourceType::ApiCall);
        assert_eq!(by_type[0].records, 2);
    }
}
