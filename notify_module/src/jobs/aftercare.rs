//! Post-visit follow-up campaign.

use chrono::{DateTime, Duration, Utc};
use std::sync::Arc;
use tracing::{error, info, warn};

use crate::entities::{
    render_display_name, DeliveryStatus, MessageKind, NewMessageLog, PatientStatus, TemplateType,
    Visit,
};
use crate::gateway::MessagingGateway;
use crate::store::{StoreError, Stores};

use super::{BatchJob, JobOutcome};

/// The eligibility window is `[now - 25h, now - 23h)`: deliberately wider
/// than the hourly cadence so scheduler jitter cannot let a visit fall
/// between two runs. The `aftercare_sent` flag alone prevents double sends
/// when consecutive runs both see the same visit.
pub const AFTERCARE_WINDOW_START_HOURS: i64 = 25;
pub const AFTERCARE_WINDOW_END_HOURS: i64 = 23;

pub struct AftercareJob {
    stores: Stores,
    gateway: Arc<MessagingGateway>,
}

impl AftercareJob {
    pub fn new(stores: Stores, gateway: Arc<MessagingGateway>) -> Self {
        Self { stores, gateway }
    }

    /// Handle one eligible visit. Returns what happened so the run can keep
    /// its counters; store faults are reported upward but only abort this
    /// visit, not the batch.
    fn process_visit(&self, visit: &Visit, now: DateTime<Utc>) -> Result<VisitResult, StoreError> {
        let Some(patient) = self.stores.patients.get(visit.patient_id)? else {
            return Ok(VisitResult::Skipped);
        };
        if patient.status != PatientStatus::Active {
            return Ok(VisitResult::Skipped);
        }
        let Some(tenant) = self.stores.tenants.get(patient.tenant_id)? else {
            return Ok(VisitResult::Skipped);
        };
        let Some(token) = tenant.access_token() else {
            return Ok(VisitResult::Skipped);
        };
        let Some(content) = self
            .stores
            .templates
            .resolve(tenant.id, TemplateType::Aftercare)?
        else {
            return Ok(VisitResult::Skipped);
        };

        let message = render_display_name(&content, patient.display_name.as_deref());
        let outcome = self
            .gateway
            .push(token, &patient.channel_user_id, &message);

        if !outcome.is_sent() {
            // Flag stays false; the next hourly run retries while the visit
            // still matches the window.
            warn!(
                "aftercare push failed for visit {} (patient {}): {:?}",
                visit.id, patient.id, outcome
            );
            return Ok(VisitResult::Failed);
        }

        self.stores.visits.mark_aftercare_sent(visit.id, now)?;
        self.stores.logs.append(&NewMessageLog {
            patient_id: patient.id,
            message_type: MessageKind::Aftercare,
            content: message,
            status: DeliveryStatus::Sent,
        })?;
        Ok(VisitResult::Sent)
    }
}

enum VisitResult {
    Sent,
    Skipped,
    Failed,
}

impl BatchJob for AftercareJob {
    fn id(&self) -> &'static str {
        "aftercare"
    }

    fn run(&self, now: DateTime<Utc>) -> Result<JobOutcome, StoreError> {
        let window_start = now - Duration::hours(AFTERCARE_WINDOW_START_HOURS);
        let window_end = now - Duration::hours(AFTERCARE_WINDOW_END_HOURS);
        let visits = self
            .stores
            .visits
            .list_pending_aftercare(window_start, window_end)?;

        let mut outcome = JobOutcome::default();
        for visit in &visits {
            outcome.processed += 1;
            match self.process_visit(visit, now) {
                Ok(VisitResult::Sent) => outcome.sent += 1,
                Ok(VisitResult::Skipped) => outcome.skipped += 1,
                Ok(VisitResult::Failed) => outcome.failed += 1,
                Err(err) => {
                    error!("aftercare visit {} aborted: {}", visit.id, err);
                    outcome.failed += 1;
                }
            }
        }

        info!(
            "aftercare run: {} visits in window, {} sent, {} skipped, {} failed",
            outcome.processed, outcome.sent, outcome.skipped, outcome.failed
        );
        Ok(outcome)
    }
}
