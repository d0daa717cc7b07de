use std::env;
use std::time::Duration;

use chrono::{DateTime, Utc};
use postgres_native_tls::MakeTlsConnector;
use r2d2::{Pool, PooledConnection};
use r2d2_postgres::PostgresConnectionManager;
use tracing::error;
use uuid::Uuid;

use crate::entities::{
    NewMessageLog, Patient, PatientStatus, TemplateType, Tenant, Visit,
};

use super::StoreError;

/// Custom error handler that logs connection errors
#[derive(Debug)]
struct LoggingErrorHandler;

impl r2d2::HandleError<postgres::Error> for LoggingErrorHandler {
    fn handle_error(&self, err: postgres::Error) {
        error!("notify store postgres pool error: {:?}", err);
    }
}

/// Shared connection pool handed to every store.
#[derive(Clone)]
pub(super) struct Db {
    pool: Pool<PostgresConnectionManager<MakeTlsConnector>>,
}

impl Db {
    pub(super) fn connect(db_url: &str) -> Result<Self, StoreError> {
        let config: postgres::Config = db_url.parse()?;

        let mut tls_builder = native_tls::TlsConnector::builder();
        if env::var("DATABASE_TLS_ALLOW_INVALID_CERTS")
            .map(|v| matches!(v.to_lowercase().as_str(), "1" | "true" | "yes"))
            .unwrap_or(false)
        {
            tls_builder.danger_accept_invalid_certs(true);
            tls_builder.danger_accept_invalid_hostnames(true);
        }
        let tls_connector = tls_builder
            .build()
            .map_err(|e| StoreError::Config(e.to_string()))?;
        let tls = MakeTlsConnector::new(tls_connector);

        let manager = PostgresConnectionManager::new(config, tls);
        let pool = Pool::builder()
            .max_size(20)
            .min_idle(Some(2))
            .connection_timeout(Duration::from_secs(5))
            .idle_timeout(Some(Duration::from_secs(60)))
            .error_handler(Box::new(LoggingErrorHandler))
            .build(manager)?;

        Ok(Self { pool })
    }

    fn conn(
        &self,
    ) -> Result<PooledConnection<PostgresConnectionManager<MakeTlsConnector>>, StoreError> {
        Ok(self.pool.get()?)
    }
}

fn parse_column<T>(column: &'static str, value: String) -> Result<T, StoreError>
where
    T: std::str::FromStr,
{
    value
        .parse()
        .map_err(|_| StoreError::InvalidColumn { column, value })
}

fn tenant_from_row(row: &postgres::Row) -> Result<Tenant, StoreError> {
    Ok(Tenant {
        id: row.get(0),
        clinic_name: row.get(1),
        channel_secret: row.get(2),
        channel_access_token: row.get(3),
        subscription_status: parse_column("subscription_status", row.get(4))?,
    })
}

fn patient_from_row(row: &postgres::Row) -> Result<Patient, StoreError> {
    Ok(Patient {
        id: row.get(0),
        tenant_id: row.get(1),
        channel_user_id: row.get(2),
        display_name: row.get(3),
        status: parse_column("status", row.get(4))?,
        last_visit_at: row.get(5),
    })
}

fn visit_from_row(row: &postgres::Row) -> Visit {
    Visit {
        id: row.get(0),
        patient_id: row.get(1),
        visit_date: row.get(2),
        aftercare_sent: row.get(3),
        aftercare_sent_at: row.get(4),
    }
}

pub struct PostgresTenantStore {
    db: Db,
}

impl PostgresTenantStore {
    pub(super) fn new(db: Db) -> Self {
        Self { db }
    }
}

impl super::TenantStore for PostgresTenantStore {
    fn get(&self, tenant_id: Uuid) -> Result<Option<Tenant>, StoreError> {
        let mut conn = self.db.conn()?;
        let row = conn.query_opt(
            "SELECT id, clinic_name, channel_secret, channel_access_token, subscription_status
             FROM tenants WHERE id = $1",
            &[&tenant_id],
        )?;
        row.as_ref().map(tenant_from_row).transpose()
    }

    fn list_subscribed(&self) -> Result<Vec<Tenant>, StoreError> {
        let mut conn = self.db.conn()?;
        let rows = conn.query(
            "SELECT id, clinic_name, channel_secret, channel_access_token, subscription_status
             FROM tenants WHERE subscription_status = 'active'
             ORDER BY created_at",
            &[],
        )?;
        rows.iter().map(tenant_from_row).collect()
    }
}

pub struct PostgresPatientStore {
    db: Db,
}

impl PostgresPatientStore {
    pub(super) fn new(db: Db) -> Self {
        Self { db }
    }
}

impl super::PatientStore for PostgresPatientStore {
    fn get(&self, patient_id: Uuid) -> Result<Option<Patient>, StoreError> {
        let mut conn = self.db.conn()?;
        let row = conn.query_opt(
            "SELECT id, tenant_id, channel_user_id, display_name, status, last_visit_at
             FROM patients WHERE id = $1",
            &[&patient_id],
        )?;
        row.as_ref().map(patient_from_row).transpose()
    }

    fn find_by_channel_user(
        &self,
        tenant_id: Uuid,
        channel_user_id: &str,
    ) -> Result<Option<Patient>, StoreError> {
        let mut conn = self.db.conn()?;
        let row = conn.query_opt(
            "SELECT id, tenant_id, channel_user_id, display_name, status, last_visit_at
             FROM patients WHERE tenant_id = $1 AND channel_user_id = $2",
            &[&tenant_id, &channel_user_id],
        )?;
        row.as_ref().map(patient_from_row).transpose()
    }

    fn create(
        &self,
        tenant_id: Uuid,
        channel_user_id: &str,
        display_name: Option<&str>,
    ) -> Result<Patient, StoreError> {
        let mut conn = self.db.conn()?;
        let id = Uuid::new_v4();
        let row = conn.query_one(
            "INSERT INTO patients (id, tenant_id, channel_user_id, display_name, status, created_at, updated_at)
             VALUES ($1, $2, $3, $4, 'active', NOW(), NOW())
             RETURNING id, tenant_id, channel_user_id, display_name, status, last_visit_at",
            &[&id, &tenant_id, &channel_user_id, &display_name],
        )?;
        patient_from_row(&row)
    }

    fn set_status(&self, patient_id: Uuid, status: PatientStatus) -> Result<(), StoreError> {
        let mut conn = self.db.conn()?;
        let updated = conn.execute(
            "UPDATE patients SET status = $2, updated_at = NOW() WHERE id = $1",
            &[&patient_id, &status.as_str()],
        )?;
        if updated == 0 {
            return Err(StoreError::NotFound);
        }
        Ok(())
    }

    fn list_dormant(
        &self,
        tenant_id: Uuid,
        last_visit_before: DateTime<Utc>,
        limit: usize,
    ) -> Result<Vec<Patient>, StoreError> {
        let mut conn = self.db.conn()?;
        let limit = limit as i64;
        let rows = conn.query(
            "SELECT id, tenant_id, channel_user_id, display_name, status, last_visit_at
             FROM patients
             WHERE tenant_id = $1 AND status = 'active' AND last_visit_at < $2
             ORDER BY last_visit_at
             LIMIT $3",
            &[&tenant_id, &last_visit_before, &limit],
        )?;
        rows.iter().map(patient_from_row).collect()
    }
}

pub struct PostgresVisitStore {
    db: Db,
}

impl PostgresVisitStore {
    pub(super) fn new(db: Db) -> Self {
        Self { db }
    }
}

impl super::VisitStore for PostgresVisitStore {
    fn list_pending_aftercare(
        &self,
        window_start: DateTime<Utc>,
        window_end: DateTime<Utc>,
    ) -> Result<Vec<Visit>, StoreError> {
        let mut conn = self.db.conn()?;
        let rows = conn.query(
            "SELECT id, patient_id, visit_date, aftercare_sent, aftercare_sent_at
             FROM visits
             WHERE visit_date >= $1 AND visit_date < $2 AND aftercare_sent = FALSE
             ORDER BY visit_date",
            &[&window_start, &window_end],
        )?;
        Ok(rows.iter().map(visit_from_row).collect())
    }

    fn mark_aftercare_sent(
        &self,
        visit_id: Uuid,
        sent_at: DateTime<Utc>,
    ) -> Result<(), StoreError> {
        let mut conn = self.db.conn()?;
        let updated = conn.execute(
            "UPDATE visits SET aftercare_sent = TRUE, aftercare_sent_at = $2 WHERE id = $1",
            &[&visit_id, &sent_at],
        )?;
        if updated == 0 {
            return Err(StoreError::NotFound);
        }
        Ok(())
    }
}

pub struct PostgresTemplateStore {
    db: Db,
}

impl PostgresTemplateStore {
    pub(super) fn new(db: Db) -> Self {
        Self { db }
    }
}

impl super::TemplateStore for PostgresTemplateStore {
    fn resolve(
        &self,
        tenant_id: Uuid,
        template_type: TemplateType,
    ) -> Result<Option<String>, StoreError> {
        let mut conn = self.db.conn()?;
        // Multiple active rows should not occur, but the ordering keeps the
        // selection stable when they do.
        let row = conn.query_opt(
            "SELECT content FROM message_templates
             WHERE tenant_id = $1 AND type = $2 AND is_active = TRUE
             ORDER BY updated_at DESC, created_at DESC
             LIMIT 1",
            &[&tenant_id, &template_type.as_str()],
        )?;
        Ok(row.map(|r| r.get(0)))
    }
}

pub struct PostgresMessageLogStore {
    db: Db,
}

impl PostgresMessageLogStore {
    pub(super) fn new(db: Db) -> Self {
        Self { db }
    }
}

impl super::MessageLogStore for PostgresMessageLogStore {
    fn append(&self, entry: &NewMessageLog) -> Result<(), StoreError> {
        let mut conn = self.db.conn()?;
        let id = Uuid::new_v4();
        conn.execute(
            "INSERT INTO message_logs (id, patient_id, message_type, content, status, sent_at)
             VALUES ($1, $2, $3, $4, $5, NOW())",
            &[
                &id,
                &entry.patient_id,
                &entry.message_type.as_str(),
                &entry.content,
                &entry.status.as_str(),
            ],
        )?;
        Ok(())
    }
}
