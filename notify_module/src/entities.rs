use chrono::{DateTime, Utc};
use uuid::Uuid;

/// Generic honorific used when a patient has no recorded display name.
pub const DEFAULT_HONORIFIC: &str = "患者様";

/// One clinic account. The isolation boundary for all data and credentials:
/// every query below the tenant is scoped by `tenant_id`.
#[derive(Debug, Clone)]
pub struct Tenant {
    pub id: Uuid,
    pub clinic_name: String,
    pub channel_secret: Option<String>,
    pub channel_access_token: Option<String>,
    pub subscription_status: SubscriptionStatus,
}

impl Tenant {
    /// A tenant without an access token is inert for outbound sends.
    pub fn access_token(&self) -> Option<&str> {
        self.channel_access_token
            .as_deref()
            .map(str::trim)
            .filter(|value| !value.is_empty())
    }

    pub fn signing_secret(&self) -> Option<&str> {
        self.channel_secret
            .as_deref()
            .map(str::trim)
            .filter(|value| !value.is_empty())
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum SubscriptionStatus {
    Trial,
    Active,
    Canceled,
}

impl SubscriptionStatus {
    pub fn as_str(&self) -> &'static str {
        match self {
            SubscriptionStatus::Trial => "trial",
            SubscriptionStatus::Active => "active",
            SubscriptionStatus::Canceled => "canceled",
        }
    }
}

impl std::str::FromStr for SubscriptionStatus {
    type Err = UnknownValue;

    fn from_str(value: &str) -> Result<Self, Self::Err> {
        match value {
            "trial" => Ok(SubscriptionStatus::Trial),
            "active" => Ok(SubscriptionStatus::Active),
            "canceled" => Ok(SubscriptionStatus::Canceled),
            other => Err(UnknownValue(other.to_string())),
        }
    }
}

/// A channel contact of one tenant. Created on the first follow event and
/// never hard-deleted; lifecycle is expressed through `status` alone.
#[derive(Debug, Clone)]
pub struct Patient {
    pub id: Uuid,
    pub tenant_id: Uuid,
    pub channel_user_id: String,
    pub display_name: Option<String>,
    pub status: PatientStatus,
    pub last_visit_at: Option<DateTime<Utc>>,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum PatientStatus {
    Active,
    Inactive,
    Blocked,
}

impl PatientStatus {
    pub fn as_str(&self) -> &'static str {
        match self {
            PatientStatus::Active => "active",
            PatientStatus::Inactive => "inactive",
            PatientStatus::Blocked => "blocked",
        }
    }
}

impl std::str::FromStr for PatientStatus {
    type Err = UnknownValue;

    fn from_str(value: &str) -> Result<Self, Self::Err> {
        match value {
            "active" => Ok(PatientStatus::Active),
            "inactive" => Ok(PatientStatus::Inactive),
            "blocked" => Ok(PatientStatus::Blocked),
            other => Err(UnknownValue(other.to_string())),
        }
    }
}

/// One visit of one patient. `aftercare_sent` is the idempotency marker for
/// the aftercare campaign; it flips to true at most once per visit.
#[derive(Debug, Clone)]
pub struct Visit {
    pub id: Uuid,
    pub patient_id: Uuid,
    pub visit_date: DateTime<Utc>,
    pub aftercare_sent: bool,
    pub aftercare_sent_at: Option<DateTime<Utc>>,
}

/// Closed set of template slots. Unknown type strings are a configuration
/// error surfaced when the value is parsed, never a silent skip.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum TemplateType {
    Welcome,
    Aftercare,
    Recall,
    DefaultReply,
    AlertReply,
}

impl TemplateType {
    pub fn as_str(&self) -> &'static str {
        match self {
            TemplateType::Welcome => "welcome",
            TemplateType::Aftercare => "aftercare",
            TemplateType::Recall => "recall",
            TemplateType::DefaultReply => "default_reply",
            TemplateType::AlertReply => "alert_reply",
        }
    }
}

impl std::str::FromStr for TemplateType {
    type Err = UnknownValue;

    fn from_str(value: &str) -> Result<Self, Self::Err> {
        match value {
            "welcome" => Ok(TemplateType::Welcome),
            "aftercare" => Ok(TemplateType::Aftercare),
            "recall" => Ok(TemplateType::Recall),
            "default_reply" => Ok(TemplateType::DefaultReply),
            "alert_reply" => Ok(TemplateType::AlertReply),
            other => Err(UnknownValue(other.to_string())),
        }
    }
}

#[derive(Debug, Clone)]
pub struct MessageTemplate {
    pub id: Uuid,
    pub tenant_id: Uuid,
    pub template_type: TemplateType,
    pub content: String,
    pub is_active: bool,
    pub created_at: DateTime<Utc>,
    pub updated_at: DateTime<Utc>,
}

/// What a `MessageLog` row records as `message_type`.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum MessageKind {
    Welcome,
    Aftercare,
    Recall,
    Reply,
}

impl MessageKind {
    pub fn as_str(&self) -> &'static str {
        match self {
            MessageKind::Welcome => "welcome",
            MessageKind::Aftercare => "aftercare",
            MessageKind::Recall => "recall",
            MessageKind::Reply => "reply",
        }
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum DeliveryStatus {
    Sent,
    Failed,
}

impl DeliveryStatus {
    pub fn as_str(&self) -> &'static str {
        match self {
            DeliveryStatus::Sent => "sent",
            DeliveryStatus::Failed => "failed",
        }
    }
}

/// An outbound send to record. Rows are append-only; the append itself is
/// the audit trail, not a delivery confirmation.
#[derive(Debug, Clone)]
pub struct NewMessageLog {
    pub patient_id: Uuid,
    pub message_type: MessageKind,
    pub content: String,
    pub status: DeliveryStatus,
}

#[derive(Debug, thiserror::Error)]
#[error("unknown value: {0}")]
pub struct UnknownValue(pub String);

/// Substitute the `{name}` placeholder with the patient display name,
/// falling back to a generic honorific.
pub fn render_display_name(content: &str, display_name: Option<&str>) -> String {
    let name = display_name
        .map(str::trim)
        .filter(|value| !value.is_empty())
        .unwrap_or(DEFAULT_HONORIFIC);
    content.replace("{name}", name)
}
