use serde::Deserialize;

/// Webhook event parsed from the payload based on the X-GitHub-Event header.
#[derive(Debug)]
pub enum WebhookEvent {
    Release(ReleaseEvent),
    Ping,
    Unsupported(String),
}

#[derive(Debug, Deserialize)]
pub struct ReleaseEvent {
    /// "published", "created", "edited", "prereleased", ...
    pub action: String,
    pub release: ReleasePayload,
    pub repository: RepositoryPayload,
}

#[derive(Debug, Deserialize)]
pub struct ReleasePayload {
    pub tag_name: String,
    #[serde(default)]
    pub draft: bool,
    #[serde(default)]
    pub prerelease: bool,
}

#[derive(Debug, Deserialize)]
pub struct RepositoryPayload {
    pub full_name: String,
}

impl WebhookEvent {
    pub fn parse(event_type: &str, payload: &[u8]) -> Result<Self, serde_json::Error> {
        match event_type {
            "release" => Ok(WebhookEvent::Release(serde_json::from_slice(payload)?)),
            "ping" => Ok(WebhookEvent::Ping),
            other => Ok(WebhookEvent::Unsupported(other.to_string())),
        }
    }
}

impl ReleaseEvent {
    /// Whether this event announces a release the workflow should run for.
    pub fn is_publication(&self) -> bool {
        self.action == "published" && !self.release.draft && !self.release.prerelease
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_parse_published_release() {
        let payload = br#"{
            "action": "published",
            "release": {"tag_name": "v2.3.0", "draft": false, "prerelease": false},
            "repository": {"full_name": "acme/widget"}
        }"#;
        let WebhookEvent::Release(event) = WebhookEvent::parse("release", payload).unwrap() else {
            panic!("expected release event");
        };
        assert_eq!(event.release.tag_name, "v2.3.0");
        assert!(event.is_publication());
    }

    #[test]
    fn test_prerelease_is_not_a_publication() {
        let payload = br#"{
            "action": "published",
            "release": {"tag_name": "v2.4.0-rc1", "prerelease": true},
            "repository": {"full_name": "acme/widget"}
        }"#;
        let WebhookEvent::Release(event) = WebhookEvent::parse("release", payload).unwrap() else {
            panic!("expected release event");
        };
        assert!(!event.is_publication());
    }

    #[test]
    fn test_other_events_are_unsupported() {
        assert!(matches!(
            WebhookEvent::parse("push", b"{}").unwrap(),
            WebhookEvent::Unsupported(t) if t == "push"
        ));
        assert!(matches!(WebhookEvent::parse("ping", b"{}").unwrap(), WebhookEvent::Ping));
    }
}
