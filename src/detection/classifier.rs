use super::types::{BoundingBox, Detection};
use crate::config::ClassifierConfig;
use crate::error::ClassifierError;
use crate::frame::FrameData;
use async_trait::async_trait;
use reqwest::Client;
use serde::Deserialize;
use std::time::Duration;
use tracing::{debug, trace};

/// Object/species detector invoked once per frame
#[async_trait]
pub trait Classifier: Send + Sync {
    async fn detect(&self, frame: &FrameData) -> Result<Vec<Detection>, ClassifierError>;

    fn name(&self) -> &str {
        "classifier"
    }
}

#[derive(Debug, Deserialize)]
struct DetectResponse {
    #[serde(default)]
    detections: Vec<WireDetection>,
}

#[derive(Debug, Deserialize)]
struct WireDetection {
    bbox: [f32; 4],
    label: String,
    confidence: f32,
}

/// Classifier backed by a remote detection service.
///
/// The JPEG frame is POSTed to `<endpoint>/detect` and the response is
/// expected as `{"detections": [{"bbox": [x1, y1, x2, y2], "label": .., "confidence": ..}]}`.
pub struct HttpClassifier {
    http: Client,
    url: String,
    confidence_threshold: f32,
}

impl HttpClassifier {
    pub fn new(config: &ClassifierConfig) -> Result<Self, ClassifierError> {
        let http = Client::builder()
            .timeout(Duration::from_millis(config.timeout_ms))
            .build()?;

        Ok(Self {
            http,
            url: format!("{}/detect", config.endpoint.trim_end_matches('/')),
            confidence_threshold: config.confidence_threshold,
        })
    }

    pub fn url(&self) -> &str {
        &self.url
    }

    fn accept(&self, wire: Vec<WireDetection>) -> Vec<Detection> {
        wire.into_iter()
            .filter(|d| d.confidence >= self.confidence_threshold)
            .map(|d| Detection::new(BoundingBox::from(d.bbox), d.label, d.confidence))
            .collect()
    }
}

#[async_trait]
impl Classifier for HttpClassifier {
    async fn detect(&self, frame: &FrameData) -> Result<Vec<Detection>, ClassifierError> {
        trace!("Posting frame {} ({} bytes) to {}", frame.id, frame.data.len(), self.url);

        let response = self
            .http
            .post(&self.url)
            .header(reqwest::header::CONTENT_TYPE, "image/jpeg")
            .body(frame.data.as_ref().clone())
            .send()
            .await?;

        if !response.status().is_success() {
            let status = response.status().as_u16();
            let body = response.text().await.unwrap_or_default();
            return Err(ClassifierError::Status { status, body });
        }

        let parsed: DetectResponse = response.json().await?;
        let detections = self.accept(parsed.detections);
        debug!("Frame {}: {} detections", frame.id, detections.len());

        Ok(detections)
    }

    fn name(&self) -> &str {
        "http"
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_url_is_normalized() {
        let config = ClassifierConfig {
            endpoint: "http://detector:9000/".to_string(),
            ..ClassifierConfig::default()
        };
        let classifier = HttpClassifier::new(&config).unwrap();
        assert_eq!(classifier.url(), "http://detector:9000/detect");
    }

    #[test]
    fn test_low_confidence_detections_are_dropped() {
        let classifier = HttpClassifier::new(&ClassifierConfig::default()).unwrap();
        let body = r#"{"detections":[
            {"bbox":[0,0,50,40],"label":"tiger","confidence":0.9},
            {"bbox":[0,0,10,10],"label":"bird","confidence":0.2}
        ]}"#;
        let parsed: DetectResponse = serde_json::from_str(body).unwrap();

        let detections = classifier.accept(parsed.detections);
        assert_eq!(detections.len(), 1);
        assert_eq!(detections[0].label, "tiger");
        assert_eq!(detections[0].bbox.width(), 50.0);
    }

    #[test]
    fn test_missing_detections_field_is_empty() {
        let parsed: DetectResponse = serde_json::from_str("{}").unwrap();
        assert!(parsed.detections.is_empty());
    }
}
