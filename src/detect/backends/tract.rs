#![cfg(feature = "backend-tract")]

use std::path::Path;

use anyhow::{anyhow, Context, Result};
use image::{imageops, imageops::FilterType, Rgb, RgbImage};
use tract_onnx::prelude::*;

use crate::detect::backend::{DetectorBackend, DetectorParams};
use crate::detect::result::{BoxDetection, DetectionResult};

const BOX_FIELDS: usize = 4;
const LETTERBOX_FILL: u8 = 144;
const NMS_IOU_THRESHOLD: f32 = 0.7;

/// Tract-based YOLOv8 backend.
///
/// Loads a local ONNX export with a `[1, 3, S, S]` input and a
/// `[1, 4 + classes, anchors]` output. Frames are letterboxed into the square
/// input (top-left aligned) and boxes are mapped back to frame coordinates.
pub struct TractBackend {
    model: SimplePlan<TypedFact, Box<dyn TypedOp>, Graph<TypedFact, Box<dyn TypedOp>>>,
    input_size: u32,
}

impl TractBackend {
    /// Load an ONNX model from disk and prepare it for `input_size` square input.
    pub fn new<P: AsRef<Path>>(model_path: P, input_size: u32) -> Result<Self> {
        let model_path = model_path.as_ref();
        let side = input_size as usize;
        let model = tract_onnx::onnx()
            .model_for_path(model_path)
            .with_context(|| format!("failed to load ONNX model from {}", model_path.display()))?
            .with_input_fact(
                0,
                InferenceFact::dt_shape(f32::datum_type(), tvec!(1, 3, side, side)),
            )
            .context("failed to set input fact")?
            .into_optimized()
            .context("failed to optimize ONNX model")?
            .into_runnable()
            .context("failed to build runnable ONNX model")?;

        Ok(Self { model, input_size })
    }

    /// Letterbox the frame into the model input. Returns the tensor and the resize ratio.
    fn build_input(&self, pixels: &[u8], width: u32, height: u32) -> Result<(Tensor, f32)> {
        let frame = RgbImage::from_raw(width, height, pixels.to_vec()).ok_or_else(|| {
            anyhow!(
                "expected {} RGB bytes for {}x{}, received {}",
                (width as usize) * (height as usize) * 3,
                width,
                height,
                pixels.len()
            )
        })?;

        let side = self.input_size;
        let ratio = (side as f32 / width as f32).min(side as f32 / height as f32);
        let new_w = ((width as f32 * ratio).round() as u32).clamp(1, side);
        let new_h = ((height as f32 * ratio).round() as u32).clamp(1, side);
        let resized = imageops::resize(&frame, new_w, new_h, FilterType::Triangle);

        let mut canvas = RgbImage::from_pixel(side, side, Rgb([LETTERBOX_FILL; 3]));
        imageops::replace(&mut canvas, &resized, 0, 0);

        let side = side as usize;
        let input = tract_ndarray::Array4::from_shape_fn((1, 3, side, side), |(_, c, y, x)| {
            canvas.get_pixel(x as u32, y as u32).0[c] as f32 / 255.0
        });
        Ok((input.into_tensor(), ratio))
    }

    fn decode(
        &self,
        outputs: TVec<TValue>,
        ratio: f32,
        width: u32,
        height: u32,
        params: &DetectorParams,
    ) -> Result<Vec<BoxDetection>> {
        let output = outputs
            .first()
            .ok_or_else(|| anyhow!("model produced no outputs"))?;
        let preds = output
            .to_array_view::<f32>()
            .context("model output tensor was not f32")?;
        let shape = preds.shape().to_vec();
        if shape.len() != 3 || shape[0] != 1 || shape[1] <= BOX_FIELDS {
            return Err(anyhow!("unexpected model output shape {:?}", shape));
        }
        let num_classes = shape[1] - BOX_FIELDS;
        let anchors = shape[2];

        let mut candidates = Vec::new();
        for a in 0..anchors {
            let mut best = (0usize, f32::NEG_INFINITY);
            for c in 0..num_classes {
                let score = preds[[0, BOX_FIELDS + c, a]];
                if score > best.1 {
                    best = (c, score);
                }
            }
            let (class_id, confidence) = best;
            if !params.accepts(class_id, confidence) {
                continue;
            }
            let cx = preds[[0, 0, a]] / ratio;
            let cy = preds[[0, 1, a]] / ratio;
            let w = preds[[0, 2, a]] / ratio;
            let h = preds[[0, 3, a]] / ratio;
            candidates.push(BoxDetection {
                x1: (cx - w / 2.0).clamp(0.0, width as f32),
                y1: (cy - h / 2.0).clamp(0.0, height as f32),
                x2: (cx + w / 2.0).clamp(0.0, width as f32),
                y2: (cy + h / 2.0).clamp(0.0, height as f32),
                confidence,
                class_id,
            });
        }
        Ok(non_max_suppression(candidates, NMS_IOU_THRESHOLD))
    }
}

impl DetectorBackend for TractBackend {
    fn name(&self) -> &'static str {
        "tract"
    }

    fn detect(
        &mut self,
        pixels: &[u8],
        width: u32,
        height: u32,
        params: &DetectorParams,
    ) -> Result<DetectionResult> {
        if params.input_size != self.input_size {
            return Err(anyhow!(
                "model prepared for input size {}, asked for {}",
                self.input_size,
                params.input_size
            ));
        }
        let (input, ratio) = self.build_input(pixels, width, height)?;
        let outputs = self
            .model
            .run(tvec!(input.into()))
            .context("ONNX inference failed")?;
        let detections = self.decode(outputs, ratio, width, height, params)?;
        Ok(DetectionResult { detections })
    }

    fn warm_up(&mut self) -> Result<()> {
        let side = self.input_size;
        let pixels = vec![0u8; (side as usize) * (side as usize) * 3];
        self.detect(
            &pixels,
            side,
            side,
            &DetectorParams {
                input_size: side,
                ..DetectorParams::default()
            },
        )
        .map(|_| ())
    }
}

/// Class-aware greedy NMS, highest confidence first.
fn non_max_suppression(mut boxes: Vec<BoxDetection>, iou_threshold: f32) -> Vec<BoxDetection> {
    boxes.sort_by(|a, b| b.confidence.total_cmp(&a.confidence));
    let mut kept: Vec<BoxDetection> = Vec::with_capacity(boxes.len());
    for candidate in boxes {
        let suppressed = kept
            .iter()
            .any(|k| k.class_id == candidate.class_id && k.iou(&candidate) > iou_threshold);
        if !suppressed {
            kept.push(candidate);
        }
    }
    kept
}

#[cfg(test)]
mod tests {
    use super::*;

    fn boxed(x1: f32, confidence: f32, class_id: usize) -> BoxDetection {
        BoxDetection {
            x1,
            y1: 0.0,
            x2: x1 + 10.0,
            y2: 10.0,
            confidence,
            class_id,
        }
    }

    #[test]
    fn nms_keeps_highest_of_overlapping_same_class() {
        let kept = non_max_suppression(vec![boxed(0.0, 0.6, 0), boxed(0.5, 0.9, 0)], 0.7);
        assert_eq!(kept.len(), 1);
        assert_eq!(kept[0].confidence, 0.9);
    }

    #[test]
    fn nms_keeps_overlapping_boxes_of_other_classes() {
        let kept = non_max_suppression(vec![boxed(0.0, 0.6, 0), boxed(0.5, 0.9, 2)], 0.7);
        assert_eq!(kept.len(), 2);
    }
}
