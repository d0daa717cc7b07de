//! Keyword triage for inbound free-text messages.
//!
//! Pure classification, tenant-independent: any configured alert keyword
//! appearing as a substring routes the message to the alert branch. Matching
//! is case-sensitive as configured.

use crate::entities::TemplateType;

/// Keywords that indicate a patient may need attention from clinic staff.
pub const ALERT_KEYWORDS: [&str; 5] = ["痛い", "つらい", "合わない", "悪化", "副作用"];

/// Reply used when the alert branch has no active template configured.
pub const ALERT_FALLBACK_REPLY: &str = "ご連絡ありがとうございます。診察時間内にお電話ください。";

/// Reply used when the default branch has no active template configured.
pub const DEFAULT_FALLBACK_REPLY: &str = "お大事になさってください。";

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Triage {
    /// Empty text: no reply at all. A no-op, not an error.
    Ignore,
    Alert,
    Default,
}

impl Triage {
    /// Template slot backing this branch, if the branch replies.
    pub fn template_type(&self) -> Option<TemplateType> {
        match self {
            Triage::Ignore => None,
            Triage::Alert => Some(TemplateType::AlertReply),
            Triage::Default => Some(TemplateType::DefaultReply),
        }
    }

    /// Hard-coded reply for when the branch's template is missing or
    /// inactive. A missing template never fails the reply.
    pub fn fallback_reply(&self) -> Option<&'static str> {
        match self {
            Triage::Ignore => None,
            Triage::Alert => Some(ALERT_FALLBACK_REPLY),
            Triage::Default => Some(DEFAULT_FALLBACK_REPLY),
        }
    }
}

pub fn classify(text: &str) -> Triage {
    if text.is_empty() {
        return Triage::Ignore;
    }
    if ALERT_KEYWORDS.iter().any(|keyword| text.contains(keyword)) {
        Triage::Alert
    } else {
        Triage::Default
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn keyword_anywhere_in_text_is_an_alert() {
        assert_eq!(classify("薬が合わない"), Triage::Alert);
        assert_eq!(classify("昨日から少し痛いです"), Triage::Alert);
        assert_eq!(classify("副作用"), Triage::Alert);
    }

    #[test]
    fn text_without_keywords_is_default() {
        assert_eq!(classify("ありがとうございました"), Triage::Default);
        assert_eq!(classify("hello"), Triage::Default);
    }

    #[test]
    fn empty_text_is_ignored() {
        assert_eq!(classify(""), Triage::Ignore);
        assert!(classify("").template_type().is_none());
        assert!(classify("").fallback_reply().is_none());
    }

    #[test]
    fn branches_select_their_template_slot() {
        assert_eq!(
            Triage::Alert.template_type(),
            Some(TemplateType::AlertReply)
        );
        assert_eq!(
            Triage::Default.template_type(),
            Some(TemplateType::DefaultReply)
        );
    }
}
