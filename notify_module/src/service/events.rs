use serde::Deserialize;

/// Provider webhook body: an ordered array of events, processed in array
/// order within one request.
#[derive(Debug, Deserialize)]
pub(crate) struct WebhookPayload {
    #[serde(default)]
    pub events: Vec<WebhookEvent>,
}

#[derive(Debug, Deserialize)]
pub(crate) struct WebhookEvent {
    #[serde(rename = "type")]
    pub kind: EventKind,
    #[serde(default)]
    pub source: EventSource,
    #[serde(default)]
    pub message: Option<EventMessage>,
    #[serde(rename = "replyToken", default)]
    pub reply_token: Option<String>,
}

/// Event kinds the dispatcher reacts to. The provider emits more; anything
/// else deserializes to `Other` and is ignored.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Deserialize)]
#[serde(rename_all = "lowercase")]
pub(crate) enum EventKind {
    Follow,
    Unfollow,
    Message,
    #[serde(other)]
    Other,
}

#[derive(Debug, Default, Deserialize)]
pub(crate) struct EventSource {
    #[serde(rename = "userId", default)]
    pub user_id: Option<String>,
    #[serde(rename = "displayName", default)]
    pub display_name: Option<String>,
}

#[derive(Debug, Deserialize)]
pub(crate) struct EventMessage {
    #[serde(default)]
    pub text: Option<String>,
}
