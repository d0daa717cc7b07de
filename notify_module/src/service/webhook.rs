//! Webhook authentication and event dispatch.
//!
//! Once a request is authenticated every event in it is handled in array
//! order, and a failure in one event never aborts the remaining events. The
//! HTTP layer answers 200 regardless of per-event outcomes; the provider
//! acknowledges receipt, not delivery.

use tracing::{debug, error, info, warn};
use uuid::Uuid;

use crate::entities::{
    render_display_name, DeliveryStatus, MessageKind, NewMessageLog, PatientStatus, Tenant,
    TemplateType,
};
use crate::gateway::MessagingGateway;
use crate::store::{StoreError, Stores};
use crate::triage;

use super::events::{EventKind, WebhookEvent, WebhookPayload};
use super::verify::verify_signature;

#[derive(Debug, thiserror::Error)]
pub enum WebhookError {
    #[error("tenant not found")]
    UnknownTenant,
    #[error("invalid signature")]
    InvalidSignature,
    #[error("malformed payload")]
    MalformedPayload,
    #[error(transparent)]
    Store(#[from] StoreError),
}

/// Authenticate and process one raw webhook request for one tenant.
///
/// No event is interpreted and no side effect occurs before the signature
/// check passes. A tenant without a configured secret skips verification -
/// a deliberate trust-on-first-use mode for tenants still onboarding, not
/// an oversight.
pub fn process_webhook(
    stores: &Stores,
    gateway: &MessagingGateway,
    tenant_id: Uuid,
    signature: Option<&str>,
    body: &[u8],
) -> Result<(), WebhookError> {
    let tenant = stores
        .tenants
        .get(tenant_id)?
        .ok_or(WebhookError::UnknownTenant)?;

    if let Some(secret) = tenant.signing_secret() {
        let signature = signature.ok_or(WebhookError::InvalidSignature)?;
        if !verify_signature(secret, signature, body) {
            return Err(WebhookError::InvalidSignature);
        }
    }

    let payload: WebhookPayload =
        serde_json::from_slice(body).map_err(|_| WebhookError::MalformedPayload)?;

    for event in &payload.events {
        if let Err(err) = handle_event(stores, gateway, &tenant, event) {
            error!(
                "webhook event {:?} failed for tenant {}: {}",
                event.kind, tenant.id, err
            );
        }
    }
    Ok(())
}

fn handle_event(
    stores: &Stores,
    gateway: &MessagingGateway,
    tenant: &Tenant,
    event: &WebhookEvent,
) -> Result<(), StoreError> {
    match event.kind {
        EventKind::Follow => handle_follow(stores, gateway, tenant, event),
        EventKind::Unfollow => handle_unfollow(stores, tenant, event),
        EventKind::Message => handle_message(stores, gateway, tenant, event),
        EventKind::Other => {
            debug!("ignoring event kind for tenant {}", tenant.id);
            Ok(())
        }
    }
}

/// Create or reactivate the patient, then send the welcome template when one
/// is active and the tenant can send at all.
fn handle_follow(
    stores: &Stores,
    gateway: &MessagingGateway,
    tenant: &Tenant,
    event: &WebhookEvent,
) -> Result<(), StoreError> {
    let Some(user_id) = event.source.user_id.as_deref() else {
        warn!("follow event without userId for tenant {}", tenant.id);
        return Ok(());
    };

    let patient = match stores.patients.find_by_channel_user(tenant.id, user_id)? {
        Some(existing) => {
            stores
                .patients
                .set_status(existing.id, PatientStatus::Active)?;
            info!("patient {} re-followed tenant {}", existing.id, tenant.id);
            existing
        }
        None => {
            let display_name = event.source.display_name.clone().or_else(|| {
                tenant
                    .access_token()
                    .and_then(|token| gateway.get_profile(token, user_id))
                    .and_then(|profile| profile.display_name)
            });
            let created =
                stores
                    .patients
                    .create(tenant.id, user_id, display_name.as_deref())?;
            info!("patient {} followed tenant {}", created.id, tenant.id);
            created
        }
    };

    let Some(token) = tenant.access_token() else {
        return Ok(());
    };
    let Some(content) = stores.templates.resolve(tenant.id, TemplateType::Welcome)? else {
        return Ok(());
    };

    let message = render_display_name(&content, patient.display_name.as_deref());
    let outcome = gateway.push(token, user_id, &message);
    stores.logs.append(&NewMessageLog {
        patient_id: patient.id,
        message_type: MessageKind::Welcome,
        content: message,
        status: if outcome.is_sent() {
            DeliveryStatus::Sent
        } else {
            DeliveryStatus::Failed
        },
    })?;
    Ok(())
}

/// The patient blocked the channel. Status-only mutation, no send.
fn handle_unfollow(
    stores: &Stores,
    tenant: &Tenant,
    event: &WebhookEvent,
) -> Result<(), StoreError> {
    let Some(user_id) = event.source.user_id.as_deref() else {
        return Ok(());
    };
    match stores.patients.find_by_channel_user(tenant.id, user_id)? {
        Some(patient) => {
            stores
                .patients
                .set_status(patient.id, PatientStatus::Blocked)?;
            info!("patient {} blocked tenant {}", patient.id, tenant.id);
        }
        None => {
            debug!("unfollow from unknown user for tenant {}", tenant.id);
        }
    }
    Ok(())
}

/// Triage the inbound text and reply on the branch's template, falling back
/// to the branch's hard-coded string when no template is active.
fn handle_message(
    stores: &Stores,
    gateway: &MessagingGateway,
    tenant: &Tenant,
    event: &WebhookEvent,
) -> Result<(), StoreError> {
    let text = event
        .message
        .as_ref()
        .and_then(|message| message.text.as_deref())
        .unwrap_or("");

    let triaged = triage::classify(text);
    let Some(template_type) = triaged.template_type() else {
        return Ok(());
    };
    let Some(reply_token) = event.reply_token.as_deref() else {
        warn!("message event without replyToken for tenant {}", tenant.id);
        return Ok(());
    };
    let Some(token) = tenant.access_token() else {
        return Ok(());
    };

    let content = match stores.templates.resolve(tenant.id, template_type)? {
        Some(content) => content,
        None => triaged
            .fallback_reply()
            .unwrap_or(triage::DEFAULT_FALLBACK_REPLY)
            .to_string(),
    };

    let outcome = gateway.reply(token, reply_token, &content);
    if matches!(triaged, triage::Triage::Alert) {
        info!(
            "alert keyword reply for tenant {} (sent={})",
            tenant.id,
            outcome.is_sent()
        );
    }

    // The reply itself needs no patient record; the log row does.
    if let Some(user_id) = event.source.user_id.as_deref() {
        if let Some(patient) = stores.patients.find_by_channel_user(tenant.id, user_id)? {
            stores.logs.append(&NewMessageLog {
                patient_id: patient.id,
                message_type: MessageKind::Reply,
                content,
                status: if outcome.is_sent() {
                    DeliveryStatus::Sent
                } else {
                    DeliveryStatus::Failed
                },
            })?;
        }
    }
    Ok(())
}
