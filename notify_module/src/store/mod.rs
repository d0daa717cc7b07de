//! Entity store interfaces.
//!
//! Handlers and batch jobs depend on these traits only; the Postgres
//! implementations live in [`postgres`]. Every operation is scoped by
//! `tenant_id` directly or through the owning patient; rows from one
//! tenant must never surface in another tenant's queries.

mod postgres;

use std::sync::Arc;

use chrono::{DateTime, Utc};
use uuid::Uuid;

use crate::entities::{NewMessageLog, Patient, PatientStatus, TemplateType, Tenant, Visit};

pub use postgres::{
    PostgresMessageLogStore, PostgresPatientStore, PostgresTemplateStore, PostgresTenantStore,
    PostgresVisitStore,
};

#[derive(Debug, thiserror::Error)]
pub enum StoreError {
    #[error("postgres error: {0}")]
    Postgres(#[from] ::postgres::Error),
    #[error("pool error: {0}")]
    Pool(#[from] r2d2::Error),
    #[error("record not found")]
    NotFound,
    #[error("invalid {column} value: {value}")]
    InvalidColumn { column: &'static str, value: String },
    #[error("config error: {0}")]
    Config(String),
}

pub trait TenantStore: Send + Sync {
    fn get(&self, tenant_id: Uuid) -> Result<Option<Tenant>, StoreError>;

    /// All tenants whose subscription is currently active.
    fn list_subscribed(&self) -> Result<Vec<Tenant>, StoreError>;
}

pub trait PatientStore: Send + Sync {
    fn get(&self, patient_id: Uuid) -> Result<Option<Patient>, StoreError>;

    fn find_by_channel_user(
        &self,
        tenant_id: Uuid,
        channel_user_id: &str,
    ) -> Result<Option<Patient>, StoreError>;

    fn create(
        &self,
        tenant_id: Uuid,
        channel_user_id: &str,
        display_name: Option<&str>,
    ) -> Result<Patient, StoreError>;

    fn set_status(&self, patient_id: Uuid, status: PatientStatus) -> Result<(), StoreError>;

    /// Active patients of one tenant whose `last_visit_at` is older than
    /// `last_visit_before`. Patients with no recorded visit are excluded.
    fn list_dormant(
        &self,
        tenant_id: Uuid,
        last_visit_before: DateTime<Utc>,
        limit: usize,
    ) -> Result<Vec<Patient>, StoreError>;
}

pub trait VisitStore: Send + Sync {
    /// Visits in the half-open window `[window_start, window_end)` that have
    /// not received an aftercare message yet. Spans all tenants.
    fn list_pending_aftercare(
        &self,
        window_start: DateTime<Utc>,
        window_end: DateTime<Utc>,
    ) -> Result<Vec<Visit>, StoreError>;

    fn mark_aftercare_sent(&self, visit_id: Uuid, sent_at: DateTime<Utc>)
        -> Result<(), StoreError>;
}

pub trait TemplateStore: Send + Sync {
    /// Content of the active template for `(tenant_id, template_type)`, or
    /// `None` when no active template exists. When more than one is active
    /// the latest `updated_at` wins (then latest `created_at`); callers can
    /// rely on the selection being stable.
    fn resolve(
        &self,
        tenant_id: Uuid,
        template_type: TemplateType,
    ) -> Result<Option<String>, StoreError>;
}

pub trait MessageLogStore: Send + Sync {
    /// Append-only; entries are never mutated afterwards.
    fn append(&self, entry: &NewMessageLog) -> Result<(), StoreError>;
}

/// Store handles passed explicitly into each handler and job. No ambient
/// session: each logical operation performs and commits its own writes.
#[derive(Clone)]
pub struct Stores {
    pub tenants: Arc<dyn TenantStore>,
    pub patients: Arc<dyn PatientStore>,
    pub visits: Arc<dyn VisitStore>,
    pub templates: Arc<dyn TemplateStore>,
    pub logs: Arc<dyn MessageLogStore>,
}

impl Stores {
    /// Build all five stores over a single shared Postgres pool.
    pub fn postgres(db_url: &str) -> Result<Self, StoreError> {
        let db = postgres::Db::connect(db_url)?;
        Ok(Self {
            tenants: Arc::new(PostgresTenantStore::new(db.clone())),
            patients: Arc::new(PostgresPatientStore::new(db.clone())),
            visits: Arc::new(PostgresVisitStore::new(db.clone())),
            templates: Arc::new(PostgresTemplateStore::new(db.clone())),
            logs: Arc::new(PostgresMessageLogStore::new(db)),
        })
    }
}
