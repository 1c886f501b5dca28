//! Boundary with the external object detector.
//!
//! The detector writes one JSON object per processed frame, e.g.
//! `{"detections":[{"label":"hand","score":0.91,"bbox":[0.1,0.2,0.5,0.6]}]}`,
//! where `bbox` is `[ymin, xmin, ymax, xmax]` normalised to the frame.

use std::io::BufRead;

use log::{debug, error, info, warn};
use serde_derive::Deserialize;

use crate::config::DetectionConfig;
use crate::error::DetectionError;
use crate::feedback::FeedbackChannel;
use crate::guidance::{BoundingBox, GuidancePolicy};
use crate::messages::DirectionCode;

#[derive(Deserialize, Debug, Default, Clone)]
pub struct DetectionFrame {
    #[serde(default)]
    pub detections: Vec<Detection>,
}

#[derive(Deserialize, Debug, Clone)]
pub struct Detection {
    pub label: String,
    pub score: f32,
    pub bbox: [f32; 4],
}

impl Detection {
    /// Scales to pixels, clamped to `[1, width] x [1, height]`.
    pub fn to_pixels(&self, width: u32, height: u32) -> BoundingBox {
        let [ymin, xmin, ymax, xmax] = self.bbox;
        let (w, h) = (width as f32, height as f32);
        BoundingBox::new(
            (xmin * w).clamp(1.0, w) as i32,
            (xmax * w).clamp(1.0, w) as i32,
            (ymin * h).clamp(1.0, h) as i32,
            (ymax * h).clamp(1.0, h) as i32,
        )
    }
}

pub fn parse_frame(line: &str) -> Result<DetectionFrame, DetectionError> {
    Ok(serde_json::from_str(line)?)
}

/// Turns detector output into direction codes on the feedback channel.
pub struct DetectionSink {
    policy: GuidancePolicy,
    channel: FeedbackChannel,
    hand_label: String,
    target_label: String,
    min_confidence: f32,
    frame_size: (u32, u32),
}

impl DetectionSink {
    pub fn new(config: &DetectionConfig, channel: FeedbackChannel) -> Self {
        DetectionSink {
            policy: GuidancePolicy::new(config.target_ttl_frames),
            channel,
            hand_label: config.hand_label(),
            target_label: config.target_label(),
            min_confidence: config.min_confidence(),
            frame_size: config.frame_size(),
        }
    }

    /// Handles detections in detector order and returns the codes queued for this frame.
    pub fn process(&mut self, frame: &DetectionFrame) -> Vec<DirectionCode> {
        let (width, height) = self.frame_size;
        let mut queued = Vec::new();

        for detection in &frame.detections {
            if !(detection.score > self.min_confidence && detection.score <= 1.0) {
                continue;
            }
            let region = detection.to_pixels(width, height);

            if detection.label == self.target_label {
                self.policy.observe_target(region);
            } else if detection.label == self.hand_label && self.policy.target().is_some() {
                let code = self.policy.guide(&region);
                if code == DirectionCode::None {
                    continue;
                }
                if let Some(evicted) = self.channel.push(code) {
                    debug!("Feedback queue full, dropped {:?}", evicted);
                }
                queued.push(code);
            }
        }

        self.policy.end_frame();
        queued
    }

    /// Consumes detector output line by line until end of input.
    pub fn run<R: BufRead>(mut self, reader: R) {
        info!(
            "Guiding '{}' toward '{}' (min confidence {})",
            self.hand_label, self.target_label, self.min_confidence
        );
        for line in reader.lines() {
            let line = match line {
                Ok(line) => line,
                Err(err) => {
                    error!("Error reading detections: {:?}", err);
                    break;
                }
            };
            if line.trim().is_empty() {
                continue;
            }
            match parse_frame(&line) {
                Ok(frame) => {
                    self.process(&frame);
                }
                Err(err) => warn!("Skipping frame: {}", err),
            }
        }
        info!("Detection input closed");
    }
}
