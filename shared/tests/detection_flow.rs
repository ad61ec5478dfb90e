use std::collections::BTreeSet;
use std::sync::atomic::{AtomicUsize, Ordering};
use std::sync::Arc;

use async_trait::async_trait;
use image::{DynamicImage, RgbImage};
use shared::vision::{
    decode, iou, suppress, PixelLayout, PreloadedModel, RawImage, CAT_CLASS_ID, DOG_CLASS_ID,
};
use shared::{
    DetectionConfig, DetectionPipeline, Infer, ModelHandle, ModelLoader, Tensor, VisionError,
};

const NUM_CLASSES: usize = 80;

fn record(center: [f32; 4], class_id: u32, score: f32) -> Vec<f32> {
    let mut r = vec![0.0; 4 + NUM_CLASSES];
    r[..4].copy_from_slice(&center);
    r[4 + class_id as usize] = score;
    r
}

/// Two dog boxes with IoU 0.9: same size, shifted by w / 19.
fn overlapping_dogs() -> Vec<f32> {
    let w = 0.2;
    let mut raw = record([0.5, 0.5, w, w], DOG_CLASS_ID, 0.8);
    raw.extend(record([0.5 + w / 19.0, 0.5, w, w], DOG_CLASS_ID, 0.6));
    raw
}

fn targets() -> BTreeSet<u32> {
    [CAT_CLASS_ID, DOG_CLASS_ID].into_iter().collect()
}

struct FailingLoader {
    calls: Arc<AtomicUsize>,
}

#[async_trait]
impl ModelLoader for FailingLoader {
    async fn load(&self) -> Result<Arc<dyn Infer>, VisionError> {
        self.calls.fetch_add(1, Ordering::SeqCst);
        Err(VisionError::ModelUnavailable("TFLite delegate not bundled".into()))
    }
}

#[test]
fn overlapping_dogs_collapse_to_one() {
    let candidates = decode(&overlapping_dogs(), NUM_CLASSES, 640, 0.5, &targets());
    assert_eq!(candidates.len(), 2);
    assert!((iou(&candidates[0].bbox, &candidates[1].bbox) - 0.9).abs() < 1e-3);

    let kept = suppress(candidates, 0.45);

    assert_eq!(kept.len(), 1);
    assert!((kept[0].confidence - 0.8).abs() < f32::EPSILON);
    assert_eq!(kept[0].class_name, "dog");
}

#[test]
fn cat_box_suppressed_by_overlapping_dog_unless_per_class() {
    let mut raw = record([0.5, 0.5, 0.3, 0.3], DOG_CLASS_ID, 0.9);
    raw.extend(record([0.5, 0.5, 0.3, 0.3], CAT_CLASS_ID, 0.7));
    let image = DynamicImage::new_rgb8(16, 16);
    let model = move |_: &Tensor| -> Result<Vec<f32>, VisionError> { Ok(raw.clone()) };

    let agnostic =
        shared::vision::run_detection(&model, &image, &DetectionConfig::default()).unwrap();
    assert_eq!(agnostic.detections.len(), 1);
    assert!(agnostic.is_detected(DOG_CLASS_ID));
    assert!(!agnostic.is_detected(CAT_CLASS_ID));

    let config = DetectionConfig {
        per_class_suppression: true,
        ..Default::default()
    };
    let per_class = shared::vision::run_detection(&model, &image, &config).unwrap();
    assert_eq!(per_class.detections.len(), 2);
    assert!(per_class.is_detected(CAT_CLASS_ID));
}

#[tokio::test]
async fn pipeline_end_to_end_from_raw_camera_buffer() {
    let pixels = vec![128u8; 48 * 32 * 4];
    let image = RawImage {
        width: 48,
        height: 32,
        layout: PixelLayout::Rgba,
        pixels: &pixels,
    }
    .to_dynamic()
    .unwrap();

    let raw = overlapping_dogs();
    let model = PreloadedModel::new(move |tensor: &Tensor| -> Result<Vec<f32>, VisionError> {
        assert_eq!(tensor.len(), 640 * 640 * 3);
        Ok(raw.clone())
    });
    let pipeline =
        DetectionPipeline::new(DetectionConfig::default(), Arc::new(ModelHandle::new(model)))
            .unwrap();

    let result = pipeline.detect(image).await.unwrap();

    assert_eq!(result.candidates_before_nms, 2);
    assert_eq!(result.detections.len(), 1);
    let primary = result.primary.unwrap();
    assert_eq!(primary.class_id, DOG_CLASS_ID);
    assert!((primary.confidence - 0.8).abs() < f32::EPSILON);
    assert_eq!(result.class_flags.get(&DOG_CLASS_ID), Some(&true));
    assert_eq!(result.class_flags.get(&CAT_CLASS_ID), Some(&false));
}

#[tokio::test]
async fn unavailable_model_is_reported_and_load_retried() {
    let calls = Arc::new(AtomicUsize::new(0));
    let loader = FailingLoader {
        calls: Arc::clone(&calls),
    };
    let handle = Arc::new(ModelHandle::new(loader));
    let pipeline = DetectionPipeline::new(DetectionConfig::default(), Arc::clone(&handle)).unwrap();
    let image = DynamicImage::ImageRgb8(RgbImage::new(8, 8));

    for _ in 0..2 {
        let result = pipeline.detect(image.clone()).await;
        assert!(matches!(result, Err(VisionError::ModelUnavailable(_))));
    }
    assert!(!handle.is_loaded());
    assert_eq!(calls.load(Ordering::SeqCst), 2);
}

#[tokio::test]
async fn pipelines_share_one_model_load() {
    struct CountingLoader(Arc<AtomicUsize>);

    #[async_trait]
    impl ModelLoader for CountingLoader {
        async fn load(&self) -> Result<Arc<dyn Infer>, VisionError> {
            self.0.fetch_add(1, Ordering::SeqCst);
            tokio::task::yield_now().await;
            Ok(Arc::new(|_: &Tensor| -> Result<Vec<f32>, VisionError> { Ok(Vec::new()) }))
        }
    }

    let loads = Arc::new(AtomicUsize::new(0));
    let handle = Arc::new(ModelHandle::new(CountingLoader(Arc::clone(&loads))));
    let first = DetectionPipeline::new(DetectionConfig::default(), Arc::clone(&handle)).unwrap();
    let second = DetectionPipeline::new(DetectionConfig::default(), Arc::clone(&handle)).unwrap();
    let image = DynamicImage::new_rgb8(4, 4);

    let (a, b) = tokio::join!(first.detect(image.clone()), second.detect(image.clone()));
    assert!(a.is_ok() && b.is_ok());
    let again = first.detect(image).await.unwrap();

    assert!(!again.is_detected(DOG_CLASS_ID));
    assert!(handle.is_loaded());
    assert_eq!(loads.load(Ordering::SeqCst), 1);
}
