use axum::{extract::State, http::StatusCode, routing::post, Json, Router};
use chrono::{Duration as ChronoDuration, Utc};
use log_monitor::event::{EventType, LogCategory};
use log_monitor::monitoring::{AlertConfig, AlertRule, Monitor};
use log_monitor::notify::{
    AlertChannel, AlertPayload, Delivery, Notifier, NotifierSet, RetryPolicy, WebhookChannel,
    WebhookStyle,
};
use log_monitor::utils::AppError;
use serde_json::{json, Value};
use std::env::temp_dir;
use std::fs::{self, OpenOptions};
use std::io::Write;
use std::sync::atomic::{AtomicU32, Ordering};
use std::sync::{Arc, Mutex};
use std::time::Duration;
use uuid::Uuid;

// ===== Mock Receiver =====

struct Receiver {
    bodies: Mutex<Vec<Value>>,
    hits: AtomicU32,
    /// Requests answered with 503 before the receiver starts accepting
    failures_before_success: u32,
}

async fn receive(State(receiver): State<Arc<Receiver>>, Json(body): Json<Value>) -> StatusCode {
    let hit = receiver.hits.fetch_add(1, Ordering::SeqCst) + 1;
    if hit <= receiver.failures_before_success {
        return StatusCode::SERVICE_UNAVAILABLE;
    }
    receiver.bodies.lock().unwrap().push(body);
    StatusCode::NO_CONTENT
}

async fn spawn_receiver(failures_before_success: u32) -> (String, Arc<Receiver>) {
    let receiver = Arc::new(Receiver {
        bodies: Mutex::new(Vec::new()),
        hits: AtomicU32::new(0),
        failures_before_success,
    });
    let app = Router::new()
        .route("/hook", post(receive))
        .with_state(Arc::clone(&receiver));

    let listener = tokio::net::TcpListener::bind("127.0.0.1:0").await.unwrap();
    let addr = listener.local_addr().unwrap();
    tokio::spawn(async move {
        axum::serve(listener, app).await.unwrap();
    });

    (format!("http://{}/hook", addr), receiver)
}

fn payload() -> AlertPayload {
    AlertPayload {
        subject: "Error Alert: Error".to_string(),
        text_body: "text".to_string(),
        html_body: "<p>html</p>".to_string(),
        category: LogCategory::Error,
        event_type: EventType::Error,
        rule: AlertRule::ErrorBurst,
        facts: vec![("Module".to_string(), "agents".to_string())],
        context: Value::Null,
        created_at: Utc::now(),
    }
}

fn fast_retry() -> RetryPolicy {
    RetryPolicy::default()
        .with_initial_backoff(Duration::from_millis(5))
        .with_attempt_timeout(Duration::from_secs(5))
}

// ===== Channel Tests =====

mod channel {
    use super::*;

    #[tokio::test]
    async fn should_post_slack_blocks() {
        // Arrange
        let (url, receiver) = spawn_receiver(0).await;
        let channel = WebhookChannel::new(WebhookStyle::Slack, url);

        // Act
        let result = channel.deliver(&payload()).await;

        // Assert
        assert_eq!(result.unwrap(), Delivery::Accepted);
        let bodies = receiver.bodies.lock().unwrap();
        assert_eq!(bodies.len(), 1);
        assert_eq!(bodies[0]["text"], "Error Alert: Error");
        assert!(bodies[0]["blocks"].is_array());
    }

    #[tokio::test]
    async fn should_treat_non_2xx_as_delivery_error() {
        // Arrange
        let (url, _receiver) = spawn_receiver(u32::MAX).await;
        let channel = WebhookChannel::new(WebhookStyle::Teams, url);

        // Act
        let result = channel.deliver(&payload()).await;

        // Assert
        match result {
            Err(e @ AppError::Delivery(_)) => assert!(e.is_retryable()),
            other => panic!("expected delivery error, got {:?}", other),
        }
    }

    #[tokio::test]
    async fn should_fail_when_endpoint_is_unreachable() {
        // Arrange
        let listener = std::net::TcpListener::bind("127.0.0.1:0").unwrap();
        let addr = listener.local_addr().unwrap();
        drop(listener);
        let channel = WebhookChannel::new(WebhookStyle::Discord, format!("http://{}/hook", addr));

        // Act
        let result = channel.deliver(&payload()).await;

        // Assert
        assert!(matches!(result, Err(AppError::Delivery(_))));
    }
}

// ===== Retry Tests =====

mod retry {
    use super::*;

    #[tokio::test]
    async fn should_retry_until_receiver_recovers() {
        // Arrange
        let (url, receiver) = spawn_receiver(2).await;
        let set = NotifierSet::new(fast_retry())
            .with_channel(WebhookChannel::new(WebhookStyle::Discord, url));

        // Act
        let delivered = set.send(&payload()).await;

        // Assert
        assert!(delivered);
        assert_eq!(receiver.hits.load(Ordering::SeqCst), 3);
        let bodies = receiver.bodies.lock().unwrap();
        assert_eq!(bodies[0]["embeds"][0]["title"], "Error Alert: Error");
    }

    #[tokio::test]
    async fn should_give_up_after_three_attempts() {
        // Arrange
        let (url, receiver) = spawn_receiver(u32::MAX).await;
        let set = NotifierSet::new(fast_retry())
            .with_channel(WebhookChannel::new(WebhookStyle::Slack, url));

        // Act
        let delivered = set.send(&payload()).await;

        // Assert
        assert!(!delivered);
        assert_eq!(receiver.hits.load(Ordering::SeqCst), 3);
    }
}

// ===== End-to-End =====

mod end_to_end {
    use super::*;

    #[tokio::test]
    async fn should_deliver_monitor_alert_to_webhook() {
        // Arrange
        let (url, receiver) = spawn_receiver(0).await;
        let notifier = Arc::new(
            NotifierSet::new(fast_retry())
                .with_channel(WebhookChannel::new(WebhookStyle::Discord, url)),
        );
        let dir = temp_dir().join(format!("test_webhook_e2e_{}", Uuid::new_v4()));
        fs::create_dir_all(&dir).unwrap();
        let path = dir.join("security.log");

        let t = Utc::now().naive_utc() - ChronoDuration::minutes(1);
        let config = AlertConfig::new().with_unauthorized_access_threshold(2);
        let mut monitor =
            Monitor::new("security", config, notifier).with_source(LogCategory::Security, &path);
        monitor.run_cycle(t).await.unwrap();

        let mut file = OpenOptions::new()
            .create(true)
            .append(true)
            .open(&path)
            .unwrap();
        for i in 0..2 {
            let line = json!({
                "timestamp": t.format("%Y-%m-%dT%H:%M:%SZ").to_string(),
                "event_type": "unauthorized_access",
                "client_ip": "192.0.2.7",
                "path": "/api/agents",
                "message": "expired token",
                "line_number": i,
            });
            writeln!(file, "{}", line).unwrap();
        }

        // Act
        let report = monitor.run_cycle(t).await.unwrap();

        // Assert
        assert_eq!(report.alerts_delivered, 1);
        let bodies = receiver.bodies.lock().unwrap();
        assert_eq!(bodies.len(), 1);
        let embed = &bodies[0]["embeds"][0];
        assert_eq!(embed["title"], "Security Alert: Unauthorized Access");
        let fields = embed["fields"].as_array().unwrap();
        assert!(fields
            .iter()
            .any(|f| f["name"] == "Client IP" && f["value"] == "192.0.2.7"));
    }
}
