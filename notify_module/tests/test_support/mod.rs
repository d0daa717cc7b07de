#![allow(dead_code)]

use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::{Arc, Mutex};

use base64::Engine;
use chrono::{DateTime, Utc};
use hmac::{Hmac, Mac};
use sha2::Sha256;
use uuid::Uuid;

use notify_module::entities::{
    MessageTemplate, NewMessageLog, Patient, PatientStatus, SubscriptionStatus, TemplateType,
    Tenant, Visit,
};
use notify_module::store::{
    MessageLogStore, PatientStore, StoreError, Stores, TemplateStore, TenantStore, VisitStore,
};

/// In-memory implementation of all five store traits, shared by the job and
/// webhook tests. Same filtering semantics as the Postgres stores. Cloning
/// shares the underlying state.
#[derive(Clone, Default)]
pub struct MemoryStore {
    inner: Arc<Inner>,
}

#[derive(Default)]
struct Inner {
    tenants: Mutex<Vec<Tenant>>,
    patients: Mutex<Vec<Patient>>,
    visits: Mutex<Vec<Visit>>,
    templates: Mutex<Vec<MessageTemplate>>,
    logs: Mutex<Vec<NewMessageLog>>,
    fail_patient_creates: AtomicBool,
}

impl MemoryStore {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn stores(&self) -> Stores {
        Stores {
            tenants: Arc::new(self.clone()),
            patients: Arc::new(self.clone()),
            visits: Arc::new(self.clone()),
            templates: Arc::new(self.clone()),
            logs: Arc::new(self.clone()),
        }
    }

    /// Make the next patient create fail with a store error. Lets tests
    /// exercise per-event fault isolation.
    pub fn fail_next_patient_create(&self) {
        self.inner.fail_patient_creates.store(true, Ordering::SeqCst);
    }

    pub fn add_tenant(
        &self,
        secret: Option<&str>,
        access_token: Option<&str>,
        subscription: SubscriptionStatus,
    ) -> Uuid {
        let id = Uuid::new_v4();
        self.inner.tenants.lock().unwrap().push(Tenant {
            id,
            clinic_name: format!("clinic-{id}"),
            channel_secret: secret.map(str::to_string),
            channel_access_token: access_token.map(str::to_string),
            subscription_status: subscription,
        });
        id
    }

    pub fn add_patient(
        &self,
        tenant_id: Uuid,
        channel_user_id: &str,
        display_name: Option<&str>,
        status: PatientStatus,
        last_visit_at: Option<DateTime<Utc>>,
    ) -> Uuid {
        let id = Uuid::new_v4();
        self.inner.patients.lock().unwrap().push(Patient {
            id,
            tenant_id,
            channel_user_id: channel_user_id.to_string(),
            display_name: display_name.map(str::to_string),
            status,
            last_visit_at,
        });
        id
    }

    pub fn add_visit(&self, patient_id: Uuid, visit_date: DateTime<Utc>) -> Uuid {
        let id = Uuid::new_v4();
        self.inner.visits.lock().unwrap().push(Visit {
            id,
            patient_id,
            visit_date,
            aftercare_sent: false,
            aftercare_sent_at: None,
        });
        id
    }

    pub fn add_template(
        &self,
        tenant_id: Uuid,
        template_type: TemplateType,
        content: &str,
        is_active: bool,
    ) -> Uuid {
        self.add_template_at(tenant_id, template_type, content, is_active, Utc::now())
    }

    pub fn add_template_at(
        &self,
        tenant_id: Uuid,
        template_type: TemplateType,
        content: &str,
        is_active: bool,
        updated_at: DateTime<Utc>,
    ) -> Uuid {
        let id = Uuid::new_v4();
        self.inner.templates.lock().unwrap().push(MessageTemplate {
            id,
            tenant_id,
            template_type,
            content: content.to_string(),
            is_active,
            created_at: updated_at,
            updated_at,
        });
        id
    }

    pub fn logs(&self) -> Vec<NewMessageLog> {
        self.inner.logs.lock().unwrap().clone()
    }

    pub fn patient(&self, patient_id: Uuid) -> Option<Patient> {
        self.inner
            .patients
            .lock()
            .unwrap()
            .iter()
            .find(|patient| patient.id == patient_id)
            .cloned()
    }

    pub fn patient_by_user(&self, tenant_id: Uuid, channel_user_id: &str) -> Option<Patient> {
        self.inner
            .patients
            .lock()
            .unwrap()
            .iter()
            .find(|patient| {
                patient.tenant_id == tenant_id && patient.channel_user_id == channel_user_id
            })
            .cloned()
    }

    pub fn patient_count(&self) -> usize {
        self.inner.patients.lock().unwrap().len()
    }

    pub fn visit(&self, visit_id: Uuid) -> Option<Visit> {
        self.inner
            .visits
            .lock()
            .unwrap()
            .iter()
            .find(|visit| visit.id == visit_id)
            .cloned()
    }
}

impl TenantStore for MemoryStore {
    fn get(&self, tenant_id: Uuid) -> Result<Option<Tenant>, StoreError> {
        Ok(self
            .inner
            .tenants
            .lock()
            .unwrap()
            .iter()
            .find(|tenant| tenant.id == tenant_id)
            .cloned())
    }

    fn list_subscribed(&self) -> Result<Vec<Tenant>, StoreError> {
        Ok(self
            .inner
            .tenants
            .lock()
            .unwrap()
            .iter()
            .filter(|tenant| tenant.subscription_status == SubscriptionStatus::Active)
            .cloned()
            .collect())
    }
}

impl PatientStore for MemoryStore {
    fn get(&self, patient_id: Uuid) -> Result<Option<Patient>, StoreError> {
        Ok(self.patient(patient_id))
    }

    fn find_by_channel_user(
        &self,
        tenant_id: Uuid,
        channel_user_id: &str,
    ) -> Result<Option<Patient>, StoreError> {
        Ok(self.patient_by_user(tenant_id, channel_user_id))
    }

    fn create(
        &self,
        tenant_id: Uuid,
        channel_user_id: &str,
        display_name: Option<&str>,
    ) -> Result<Patient, StoreError> {
        if self.inner.fail_patient_creates.swap(false, Ordering::SeqCst) {
            return Err(StoreError::Config("injected patient create failure".into()));
        }
        let patient = Patient {
            id: Uuid::new_v4(),
            tenant_id,
            channel_user_id: channel_user_id.to_string(),
            display_name: display_name.map(str::to_string),
            status: PatientStatus::Active,
            last_visit_at: None,
        };
        self.inner.patients.lock().unwrap().push(patient.clone());
        Ok(patient)
    }

    fn set_status(&self, patient_id: Uuid, status: PatientStatus) -> Result<(), StoreError> {
        let mut patients = self.inner.patients.lock().unwrap();
        let patient = patients
            .iter_mut()
            .find(|patient| patient.id == patient_id)
            .ok_or(StoreError::NotFound)?;
        patient.status = status;
        Ok(())
    }

    fn list_dormant(
        &self,
        tenant_id: Uuid,
        last_visit_before: DateTime<Utc>,
        limit: usize,
    ) -> Result<Vec<Patient>, StoreError> {
        let mut dormant: Vec<Patient> = self
            .inner
            .patients
            .lock()
            .unwrap()
            .iter()
            .filter(|patient| {
                patient.tenant_id == tenant_id
                    && patient.status == PatientStatus::Active
                    && patient
                        .last_visit_at
                        .map(|at| at < last_visit_before)
                        .unwrap_or(false)
            })
            .cloned()
            .collect();
        dormant.sort_by_key(|patient| patient.last_visit_at);
        dormant.truncate(limit);
        Ok(dormant)
    }
}

impl VisitStore for MemoryStore {
    fn list_pending_aftercare(
        &self,
        window_start: DateTime<Utc>,
        window_end: DateTime<Utc>,
    ) -> Result<Vec<Visit>, StoreError> {
        let mut pending: Vec<Visit> = self
            .inner
            .visits
            .lock()
            .unwrap()
            .iter()
            .filter(|visit| {
                visit.visit_date >= window_start
                    && visit.visit_date < window_end
                    && !visit.aftercare_sent
            })
            .cloned()
            .collect();
        pending.sort_by_key(|visit| visit.visit_date);
        Ok(pending)
    }

    fn mark_aftercare_sent(
        &self,
        visit_id: Uuid,
        sent_at: DateTime<Utc>,
    ) -> Result<(), StoreError> {
        let mut visits = self.inner.visits.lock().unwrap();
        let visit = visits
            .iter_mut()
            .find(|visit| visit.id == visit_id)
            .ok_or(StoreError::NotFound)?;
        visit.aftercare_sent = true;
        visit.aftercare_sent_at = Some(sent_at);
        Ok(())
    }
}

impl TemplateStore for MemoryStore {
    fn resolve(
        &self,
        tenant_id: Uuid,
        template_type: TemplateType,
    ) -> Result<Option<String>, StoreError> {
        Ok(self
            .inner
            .templates
            .lock()
            .unwrap()
            .iter()
            .filter(|template| {
                template.tenant_id == tenant_id
                    && template.template_type == template_type
                    && template.is_active
            })
            .max_by_key(|template| (template.updated_at, template.created_at))
            .map(|template| template.content.clone()))
    }
}

impl MessageLogStore for MemoryStore {
    fn append(&self, entry: &NewMessageLog) -> Result<(), StoreError> {
        self.inner.logs.lock().unwrap().push(entry.clone());
        Ok(())
    }
}

/// Compute the webhook signature header value for a raw body.
pub fn sign(secret: &str, body: &[u8]) -> String {
    let mut mac = Hmac::<Sha256>::new_from_slice(secret.as_bytes()).unwrap();
    mac.update(body);
    base64::engine::general_purpose::STANDARD.encode(mac.finalize().into_bytes())
}
