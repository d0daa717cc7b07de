//! Outbound adapter for the chat provider's messaging API.
//!
//! Three send primitives with different addressing rules: `push` targets one
//! user id, `reply` consumes a single-use token issued with an inbound event,
//! and `multicast` fans one call out to many user ids. Success is decided by
//! the HTTP status alone; there is no retry or backoff here; callers decide
//! whether to log, skip, or re-attempt on a later run.

use std::env;
use std::time::Duration;

use serde::{Deserialize, Serialize};
use tracing::{debug, warn};

/// Default provider API base URL.
const DEFAULT_API_BASE: &str = "https://api.line.me/v2/bot";

/// Timeout for provider requests. A slow provider call must not stall a
/// request-handling slot or the job thread indefinitely.
const SEND_TIMEOUT: Duration = Duration::from_secs(10);

/// Provider-enforced maximum recipients per multicast call. Callers chunk
/// beyond this limit themselves; the gateway does not chunk internally.
pub const MULTICAST_MAX_RECIPIENTS: usize = 500;

/// Result of one send attempt. A rejected call (authenticated but non-200)
/// and a transport failure are distinct kinds, though callers usually only
/// ask [`SendOutcome::is_sent`].
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum SendOutcome {
    Sent,
    Rejected { status: u16 },
    Transport { reason: String },
}

impl SendOutcome {
    pub fn is_sent(&self) -> bool {
        matches!(self, SendOutcome::Sent)
    }
}

#[derive(Debug, Clone)]
pub struct MessagingGateway {
    base_url: String,
    client: reqwest::blocking::Client,
}

impl MessagingGateway {
    pub fn new(base_url: impl Into<String>) -> Self {
        let client = reqwest::blocking::Client::builder()
            .timeout(SEND_TIMEOUT)
            .build()
            .unwrap_or_else(|_| reqwest::blocking::Client::new());
        Self {
            base_url: base_url.into().trim_end_matches('/').to_string(),
            client,
        }
    }

    pub fn from_env() -> Self {
        let base_url =
            env::var("CHANNEL_API_BASE_URL").unwrap_or_else(|_| DEFAULT_API_BASE.to_string());
        Self::new(base_url)
    }

    /// Proactive single-recipient send.
    pub fn push(&self, access_token: &str, user_id: &str, text: &str) -> SendOutcome {
        let payload = PushRequest {
            to: user_id,
            messages: vec![TextMessage::new(text)],
        };
        self.post_json("/message/push", access_token, &payload)
    }

    /// Token-addressed send, valid only in direct response to an inbound
    /// event. The provider consumes the token on first use.
    pub fn reply(&self, access_token: &str, reply_token: &str, text: &str) -> SendOutcome {
        let payload = ReplyRequest {
            reply_token,
            messages: vec![TextMessage::new(text)],
        };
        self.post_json("/message/reply", access_token, &payload)
    }

    /// One call fanning out to many recipients, capped by the provider at
    /// [`MULTICAST_MAX_RECIPIENTS`] per call.
    pub fn multicast(&self, access_token: &str, user_ids: &[String], text: &str) -> SendOutcome {
        if user_ids.len() > MULTICAST_MAX_RECIPIENTS {
            warn!(
                "multicast called with {} recipients, provider cap is {}",
                user_ids.len(),
                MULTICAST_MAX_RECIPIENTS
            );
        }
        let payload = MulticastRequest {
            to: user_ids,
            messages: vec![TextMessage::new(text)],
        };
        self.post_json("/message/multicast", access_token, &payload)
    }

    /// Fetch a user's channel profile, used to backfill display names.
    pub fn get_profile(&self, access_token: &str, user_id: &str) -> Option<Profile> {
        let url = format!("{}/profile/{}", self.base_url, user_id);
        let response = match self.client.get(&url).bearer_auth(access_token).send() {
            Ok(response) => response,
            Err(err) => {
                warn!("profile fetch failed for {}: {}", user_id, err);
                return None;
            }
        };
        if response.status() != reqwest::StatusCode::OK {
            debug!(
                "profile fetch for {} returned {}",
                user_id,
                response.status()
            );
            return None;
        }
        match response.json::<Profile>() {
            Ok(profile) => Some(profile),
            Err(err) => {
                warn!("profile response parse failed for {}: {}", user_id, err);
                None
            }
        }
    }

    fn post_json<T: Serialize>(&self, path: &str, access_token: &str, payload: &T) -> SendOutcome {
        let url = format!("{}{}", self.base_url, path);
        let response = match self
            .client
            .post(&url)
            .bearer_auth(access_token)
            .json(payload)
            .send()
        {
            Ok(response) => response,
            Err(err) => {
                warn!("provider call {} failed: {}", path, err);
                return SendOutcome::Transport {
                    reason: err.to_string(),
                };
            }
        };

        let status = response.status();
        if status == reqwest::StatusCode::OK {
            SendOutcome::Sent
        } else {
            let body = response.text().unwrap_or_default();
            warn!("provider call {} rejected with {}: {}", path, status, body);
            SendOutcome::Rejected {
                status: status.as_u16(),
            }
        }
    }
}

#[derive(Debug, Clone, Serialize)]
struct TextMessage<'a> {
    #[serde(rename = "type")]
    kind: &'static str,
    text: &'a str,
}

impl<'a> TextMessage<'a> {
    fn new(text: &'a str) -> Self {
        Self { kind: "text", text }
    }
}

#[derive(Debug, Serialize)]
struct PushRequest<'a> {
    to: &'a str,
    messages: Vec<TextMessage<'a>>,
}

#[derive(Debug, Serialize)]
struct ReplyRequest<'a> {
    #[serde(rename = "replyToken")]
    reply_token: &'a str,
    messages: Vec<TextMessage<'a>>,
}

#[derive(Debug, Serialize)]
struct MulticastRequest<'a> {
    to: &'a [String],
    messages: Vec<TextMessage<'a>>,
}

#[derive(Debug, Clone, Deserialize)]
pub struct Profile {
    #[serde(rename = "displayName")]
    pub display_name: Option<String>,
    #[serde(rename = "pictureUrl", default)]
    pub picture_url: Option<String>,
}

#[cfg(test)]
mod tests {
    use mockito::{Matcher, Server};

    use super::*;

    #[test]
    fn push_sends_bearer_token_and_text() {
        let mut server = Server::new();
        let mock = server
            .mock("POST", "/message/push")
            .match_header("authorization", "Bearer token-1")
            .match_body(Matcher::AllOf(vec![
                Matcher::Regex("\"to\":\"U123\"".to_string()),
                Matcher::Regex("\"type\":\"text\"".to_string()),
                Matcher::Regex("hello".to_string()),
            ]))
            .with_status(200)
            .with_body("{}")
            .expect(1)
            .create();

        let gateway = MessagingGateway::new(server.url());
        let outcome = gateway.push("token-1", "U123", "hello");

        mock.assert();
        assert!(outcome.is_sent());
    }

    #[test]
    fn reply_uses_reply_token_field() {
        let mut server = Server::new();
        let mock = server
            .mock("POST", "/message/reply")
            .match_body(Matcher::Regex("\"replyToken\":\"rt-9\"".to_string()))
            .with_status(200)
            .with_body("{}")
            .expect(1)
            .create();

        let gateway = MessagingGateway::new(server.url());
        assert!(gateway.reply("token-1", "rt-9", "hi").is_sent());
        mock.assert();
    }

    #[test]
    fn non_200_is_rejected_not_sent() {
        let mut server = Server::new();
        let _mock = server
            .mock("POST", "/message/push")
            .with_status(429)
            .with_body(r#"{"message":"rate limited"}"#)
            .create();

        let gateway = MessagingGateway::new(server.url());
        let outcome = gateway.push("token-1", "U123", "hello");
        assert_eq!(outcome, SendOutcome::Rejected { status: 429 });
    }

    #[test]
    fn transport_error_is_distinct_from_rejection() {
        // Nothing listens on this port.
        let gateway = MessagingGateway::new("http://127.0.0.1:9");
        let outcome = gateway.push("token-1", "U123", "hello");
        assert!(matches!(outcome, SendOutcome::Transport { .. }));
    }

    #[test]
    fn profile_fetch_parses_display_name() {
        let mut server = Server::new();
        let _mock = server
            .mock("GET", "/profile/U123")
            .match_header("authorization", "Bearer token-1")
            .with_status(200)
            .with_body(r#"{"displayName":"Tanaka","pictureUrl":null}"#)
            .create();

        let gateway = MessagingGateway::new(server.url());
        let profile = gateway.get_profile("token-1", "U123").expect("profile");
        assert_eq!(profile.display_name.as_deref(), Some("Tanaka"));
    }

    #[test]
    fn profile_fetch_returns_none_on_error_status() {
        let mut server = Server::new();
        let _mock = server.mock("GET", "/profile/U404").with_status(404).create();

        let gateway = MessagingGateway::new(server.url());
        assert!(gateway.get_profile("token-1", "U404").is_none());
    }
}
