//! Built-in handlers registered by the worker binary.
//!
//! Each one validates the payload fields it needs and simulates the work with
//! a non-blocking sleep.

use async_trait::async_trait;
use std::sync::Arc;
use std::time::Duration;
use tracing::info;

use super::handler::{required_str, HandlerError, TaskHandler};
use super::handler_registry::HandlerRegistry;
use crate::error::Result;

pub const EMAIL_SEND: &str = "email-send";
pub const IMAGE_PROCESS: &str = "image-process";
pub const REPORT_GENERATE: &str = "report-generate";

/// Sends a message to `to` with `subject` and optional `body`
#[derive(Debug, Clone)]
pub struct EmailSendHandler {
    simulated_latency: Duration,
}

impl EmailSendHandler {
    pub fn new(simulated_latency: Duration) -> Self {
        Self { simulated_latency }
    }
}

impl Default for EmailSendHandler {
    fn default() -> Self {
        Self::new(Duration::from_millis(1_000))
    }
}

#[async_trait]
impl TaskHandler for EmailSendHandler {
    async fn execute(&self, payload: &serde_json::Value) -> std::result::Result<(), HandlerError> {
        let to = required_str(payload, "to")?;
        let subject = required_str(payload, "subject")?;

        info!(to, subject, "📧 Sending email");
        tokio::time::sleep(self.simulated_latency).await;
        info!(to, "📧 Email sent");
        Ok(())
    }

    fn description(&self) -> &str {
        "email sender"
    }
}

/// Applies `operation` (resize, compress, thumbnail) to `imageUrl`
#[derive(Debug, Clone)]
pub struct ImageProcessHandler {
    simulated_latency: Duration,
}

impl ImageProcessHandler {
    pub fn new(simulated_latency: Duration) -> Self {
        Self { simulated_latency }
    }
}

impl Default for ImageProcessHandler {
    fn default() -> Self {
        Self::new(Duration::from_millis(2_000))
    }
}

#[async_trait]
impl TaskHandler for ImageProcessHandler {
    async fn execute(&self, payload: &serde_json::Value) -> std::result::Result<(), HandlerError> {
        let image_url = required_str(payload, "imageUrl")?;
        let operation = required_str(payload, "operation")?;

        match operation {
            "resize" => {
                let width = payload.get("width").and_then(|v| v.as_u64());
                let height = payload.get("height").and_then(|v| v.as_u64());
                if width.is_none() || height.is_none() {
                    return Err(HandlerError::invalid_payload(
                        "width/height",
                        "resize needs positive integer dimensions",
                    ));
                }
                info!(image_url, ?width, ?height, "🖼️ Resizing image");
            }
            "compress" => {
                let quality = payload.get("quality").and_then(|v| v.as_u64());
                info!(image_url, ?quality, "🖼️ Compressing image");
            }
            "thumbnail" => info!(image_url, "🖼️ Creating thumbnail"),
            other => return Err(HandlerError::failed(format!("Unknown operation: {other}"))),
        }

        tokio::time::sleep(self.simulated_latency).await;
        Ok(())
    }

    fn description(&self) -> &str {
        "image processor"
    }
}

/// Builds a `reportType` report (sales, analytics, user-activity) over `dateRange`
#[derive(Debug, Clone)]
pub struct ReportGenerateHandler {
    simulated_latency: Duration,
}

impl ReportGenerateHandler {
    pub fn new(simulated_latency: Duration) -> Self {
        Self { simulated_latency }
    }
}

impl Default for ReportGenerateHandler {
    fn default() -> Self {
        Self::new(Duration::from_millis(3_000))
    }
}

#[async_trait]
impl TaskHandler for ReportGenerateHandler {
    async fn execute(&self, payload: &serde_json::Value) -> std::result::Result<(), HandlerError> {
        let report_type = required_str(payload, "reportType")?;
        let date_range = payload.get("dateRange").and_then(|v| v.as_str()).unwrap_or("all-time");

        match report_type {
            "sales" | "analytics" | "user-activity" => {
                info!(report_type, date_range, "📊 Generating report");
            }
            other => return Err(HandlerError::failed(format!("Unknown report type: {other}"))),
        }

        tokio::time::sleep(self.simulated_latency).await;
        info!(report_type, "📊 Report generated");
        Ok(())
    }

    fn description(&self) -> &str {
        "report generator"
    }
}

/// Register the three built-in handlers. `latency_scale` multiplies their
/// simulated durations; 0.0 makes them instantaneous.
pub fn register_builtin_handlers(registry: &mut HandlerRegistry, latency_scale: f64) -> Result<()> {
    let scaled = |ms: u64| Duration::from_secs_f64((ms as f64 / 1_000.0) * latency_scale.max(0.0));

    registry.register(EMAIL_SEND, Arc::new(EmailSendHandler::new(scaled(1_000))))?;
    registry.register(IMAGE_PROCESS, Arc::new(ImageProcessHandler::new(scaled(2_000))))?;
    registry.register(REPORT_GENERATE, Arc::new(ReportGenerateHandler::new(scaled(3_000))))?;
    Ok(())
}

#[cfg(test)]
mod tests {
    use super::*;
    use serde_json::json;

    fn instant() -> Duration {
        Duration::ZERO
    }

    #[tokio::test]
    async fn test_email_requires_recipient() {
        let handler = EmailSendHandler::new(instant());
        assert!(handler
            .execute(&json!({"to": "ops@example.com", "subject": "hi"}))
            .await
            .is_ok());
        assert!(matches!(
            handler.execute(&json!({"subject": "hi"})).await,
            Err(HandlerError::InvalidPayload { .. })
        ));
    }

    #[tokio::test]
    async fn test_image_unknown_operation_fails() {
        let handler = ImageProcessHandler::new(instant());
        let err = handler
            .execute(&json!({"imageUrl": "s3://a.png", "operation": "rotate"}))
            .await
            .unwrap_err();
        assert_eq!(err.to_string(), "Unknown operation: rotate");

        assert!(handler
            .execute(&json!({"imageUrl": "s3://a.png", "operation": "resize", "width": 10, "height": 20}))
            .await
            .is_ok());
    }

    #[tokio::test]
    async fn test_report_types() {
        let handler = ReportGenerateHandler::new(instant());
        assert!(handler.execute(&json!({"reportType": "sales"})).await.is_ok());
        assert!(handler.execute(&json!({"reportType": "weather"})).await.is_err());
    }

    #[test]
    fn test_register_builtins() {
        let mut registry = HandlerRegistry::new();
        register_builtin_handlers(&mut registry, 0.0).unwrap();
        assert_eq!(
            registry.list_types(),
            vec![EMAIL_SEND, IMAGE_PROCESS, REPORT_GENERATE]
        );
    }
}
