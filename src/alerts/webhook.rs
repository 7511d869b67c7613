//! Webhook delivery for alert transitions.
//!
//! One POST per configured target per transition. Failures are logged and
//! never retried — the next transition carries the freshest state anyway.

use std::time::Duration;

use reqwest::Client;
use serde_json::json;
use tracing::{debug, error, warn};

use crate::alerts::engine::Alert;
use crate::config::{WebhookConfig, WebhookKind};

const DELIVERY_TIMEOUT: Duration = Duration::from_secs(10);

/// Shared HTTP client for all deliveries.
pub(crate) fn client() -> Client {
    Client::builder()
        .timeout(DELIVERY_TIMEOUT)
        .build()
        .unwrap_or_default()
}

/// Sends `alert` to every configured target. Errors are logged; the caller
/// is never affected.
pub(crate) async fn deliver(client: &Client, webhooks: &[WebhookConfig], alert: &Alert) {
    for wh in webhooks {
        let url = wh.url();
        if url.is_empty() {
            continue;
        }

        let payload = match wh.kind {
            WebhookKind::Slack => slack_payload(alert),
            WebhookKind::Teams => teams_payload(alert),
            WebhookKind::Pagerduty | WebhookKind::Http => http_payload(alert),
        };

        match post(client, &url, &payload).await {
            Ok(()) => debug!(
                "alerts: webhook delivered: type={} rule={} state={:?}",
                wh.kind, alert.rule_name, alert.state
            ),
            Err(err) => error!(
                "alerts: webhook delivery failed: type={} rule={} err={err}",
                wh.kind, alert.rule_name
            ),
        }
    }
}

async fn post(client: &Client, url: &str, payload: &serde_json::Value) -> Result<(), String> {
    let resp = client
        .post(url)
        .json(payload)
        .send()
        .await
        .map_err(|e| format!("http post: {e}"))?;

    let status = resp.status();
    if !status.is_success() {
        if let Ok(body) = resp.text().await {
            if !body.is_empty() {
                warn!("alerts: webhook error response: {body}");
            }
        }
        return Err(format!("webhook returned HTTP {}", status.as_u16()));
    }
    Ok(())
}

fn slack_payload(alert: &Alert) -> serde_json::Value {
    json!({
        "text": format!("*{}* {}", severity_label(&alert.severity), alert.message),
    })
}

fn teams_payload(alert: &Alert) -> serde_json::Value {
    json!({
        "@type": "MessageCard",
        "@context": "http://schema.org/extensions",
        "themeColor": severity_color(&alert.severity),
        "summary": alert.rule_name,
        "title": format!("ObsidianStack Alert: {}", alert.rule_name),
        "text": alert.message,
    })
}

fn http_payload(alert: &Alert) -> serde_json::Value {
    json!({ "alert": alert })
}

fn severity_label(severity: &str) -> &'static str {
    match severity {
        "critical" => "[CRITICAL]",
        "warning" => "[WARNING]",
        _ => "[INFO]",
    }
}

fn severity_color(severity: &str) -> &'static str {
    match severity {
        "critical" => "FF4F6A",
        "warning" => "FFAB40",
        _ => "00D4FF",
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::alerts::engine::AlertState;
    use chrono::Utc;
    use wiremock::matchers::{body_partial_json, method, path};
    use wiremock::{Mock, MockServer, ResponseTemplate};

    fn alert() -> Alert {
        Alert {
            id: "r:s:1".into(),
            rule_name: "high-drop".into(),
            source_id: "otel-1".into(),
            severity: "critical".into(),
            message: "[critical] high-drop fired on otel-1 — drop_pct > 10 = 25.00".into(),
            value: 25.0,
            fired_at: Utc::now(),
            resolved_at: None,
            state: AlertState::Firing,
        }
    }

    fn target(kind: WebhookKind, env: &str, url: &str) -> WebhookConfig {
        std::env::set_var(env, url);
        WebhookConfig {
            kind,
            url_env: env.into(),
        }
    }

    #[tokio::test]
    async fn slack_payload_posts_text() {
        let server = MockServer::start().await;
        Mock::given(method("POST"))
            .and(path("/hook"))
            .and(body_partial_json(json!({
                "text": "*[CRITICAL]* [critical] high-drop fired on otel-1 — drop_pct > 10 = 25.00"
            })))
            .respond_with(ResponseTemplate::new(200))
            .expect(1)
            .mount(&server)
            .await;

        let wh = target(
            WebhookKind::Slack,
            "TEST_SLACK_URL",
            &format!("{}/hook", server.uri()),
        );
        deliver(&client(), &[wh], &alert()).await;
    }

    #[tokio::test]
    async fn teams_payload_is_a_message_card() {
        let server = MockServer::start().await;
        Mock::given(method("POST"))
            .and(body_partial_json(json!({
                "@type": "MessageCard",
                "themeColor": "FF4F6A",
                "summary": "high-drop"
            })))
            .respond_with(ResponseTemplate::new(200))
            .expect(1)
            .mount(&server)
            .await;

        let wh = target(WebhookKind::Teams, "TEST_TEAMS_URL", &server.uri());
        deliver(&client(), &[wh], &alert()).await;
    }

    #[tokio::test]
    async fn http_payload_wraps_the_alert() {
        let server = MockServer::start().await;
        Mock::given(method("POST"))
            .and(body_partial_json(json!({
                "alert": { "rule_name": "high-drop", "state": "firing", "value": 25.0 }
            })))
            .respond_with(ResponseTemplate::new(200))
            .expect(1)
            .mount(&server)
            .await;

        let wh = target(WebhookKind::Http, "TEST_HTTP_URL", &server.uri());
        deliver(&client(), &[wh], &alert()).await;
    }

    #[tokio::test]
    async fn every_target_gets_one_post() {
        let server = MockServer::start().await;
        Mock::given(method("POST"))
            .respond_with(ResponseTemplate::new(200))
            .expect(3)
            .mount(&server)
            .await;

        let targets = vec![
            target(WebhookKind::Slack, "TEST_MULTI_A", &server.uri()),
            target(WebhookKind::Teams, "TEST_MULTI_B", &server.uri()),
            target(WebhookKind::Http, "TEST_MULTI_C", &server.uri()),
        ];
        deliver(&client(), &targets, &alert()).await;
    }

    #[tokio::test]
    async fn non_2xx_is_an_error_but_does_not_panic() {
        let server = MockServer::start().await;
        Mock::given(method("POST"))
            .respond_with(ResponseTemplate::new(500).set_body_string("boom"))
            .expect(1)
            .mount(&server)
            .await;

        let wh = target(WebhookKind::Http, "TEST_FAIL_URL", &server.uri());
        deliver(&client(), &[wh], &alert()).await;
    }

    #[tokio::test]
    async fn unresolved_url_env_is_skipped() {
        let wh = WebhookConfig {
            kind: WebhookKind::Slack,
            url_env: "TEST_UNSET_WEBHOOK_URL_ENV".into(),
        };
        // No URL to post to; must be a silent no-op.
        deliver(&client(), &[wh], &alert()).await;
    }
}
