//! Dormant-patient recall campaign.

use chrono::{DateTime, Duration, Utc};
use std::sync::Arc;
use tracing::{error, info, warn};

use crate::entities::{DeliveryStatus, MessageKind, NewMessageLog, TemplateType, Tenant};
use crate::gateway::{MessagingGateway, MULTICAST_MAX_RECIPIENTS};
use crate::store::{StoreError, Stores};

use super::{BatchJob, JobOutcome};

/// Patients count as dormant once `last_visit_at` is older than this.
pub const RECALL_DORMANT_DAYS: i64 = 90;

/// Recipients per tenant per run. Matches the provider's multicast cap; a
/// tenant with more eligible patients only reaches the first batch; there
/// is no pagination or carry-over within or across runs.
pub const RECALL_BATCH_LIMIT: usize = MULTICAST_MAX_RECIPIENTS;

pub struct RecallJob {
    stores: Stores,
    gateway: Arc<MessagingGateway>,
    dormant_days: i64,
    batch_limit: usize,
}

impl RecallJob {
    pub fn new(stores: Stores, gateway: Arc<MessagingGateway>) -> Self {
        Self::with_limits(stores, gateway, RECALL_DORMANT_DAYS, RECALL_BATCH_LIMIT)
    }

    pub fn with_limits(
        stores: Stores,
        gateway: Arc<MessagingGateway>,
        dormant_days: i64,
        batch_limit: usize,
    ) -> Self {
        Self {
            stores,
            gateway,
            dormant_days,
            batch_limit: batch_limit.min(MULTICAST_MAX_RECIPIENTS),
        }
    }

    /// Handle one subscribed tenant. Returns the number of patients
    /// contacted, or `None` when the tenant was skipped.
    fn process_tenant(
        &self,
        tenant: &Tenant,
        threshold: DateTime<Utc>,
    ) -> Result<Option<usize>, StoreError> {
        let Some(token) = tenant.access_token() else {
            return Ok(None);
        };
        let Some(content) = self
            .stores
            .templates
            .resolve(tenant.id, TemplateType::Recall)?
        else {
            // No recall template: skip the tenant entirely.
            return Ok(None);
        };

        let patients = self
            .stores
            .patients
            .list_dormant(tenant.id, threshold, self.batch_limit)?;
        if patients.is_empty() {
            return Ok(None);
        }

        let user_ids: Vec<String> = patients
            .iter()
            .map(|patient| patient.channel_user_id.clone())
            .collect();
        let outcome = self.gateway.multicast(token, &user_ids, &content);

        if !outcome.is_sent() {
            warn!(
                "recall multicast failed for tenant {} ({} recipients): {:?}",
                tenant.id,
                user_ids.len(),
                outcome
            );
            return Ok(Some(0));
        }

        // One log row per recipient even though the provider call was a
        // single batched request; the audit trail is per patient.
        for patient in &patients {
            self.stores.logs.append(&NewMessageLog {
                patient_id: patient.id,
                message_type: MessageKind::Recall,
                content: content.clone(),
                status: DeliveryStatus::Sent,
            })?;
        }
        Ok(Some(patients.len()))
    }
}

impl BatchJob for RecallJob {
    fn id(&self) -> &'static str {
        "recall"
    }

    fn run(&self, now: DateTime<Utc>) -> Result<JobOutcome, StoreError> {
        let threshold = now - Duration::days(self.dormant_days);
        let tenants = self.stores.tenants.list_subscribed()?;

        let mut outcome = JobOutcome::default();
        for tenant in &tenants {
            outcome.processed += 1;
            match self.process_tenant(tenant, threshold) {
                Ok(Some(0)) => outcome.failed += 1,
                Ok(Some(contacted)) => outcome.sent += contacted,
                Ok(None) => outcome.skipped += 1,
                Err(err) => {
                    error!("recall for tenant {} aborted: {}", tenant.id, err);
                    outcome.failed += 1;
                }
            }
        }

        info!(
            "recall run: {} tenants, {} patients contacted, {} skipped, {} failed",
            outcome.processed, outcome.sent, outcome.skipped, outcome.failed
        );
        Ok(outcome)
    }
}
