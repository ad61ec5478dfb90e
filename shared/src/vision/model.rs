//! Model boundary: the `Infer` capability, its loaders, and the load-once
//! handle the pipeline uses.

use std::sync::atomic::{AtomicU64, Ordering};
use std::sync::{Arc, OnceLock};

use async_trait::async_trait;
use metrics::counter;
use tokio::sync::Mutex;
use tracing::{debug, instrument, warn};

use super::{Tensor, VisionError};

/// Opaque model call: tensor in, flat record-major output out.
///
/// Implementations may be slow; no timeout is imposed here.
pub trait Infer: Send + Sync {
    /// # Errors
    ///
    /// Any failure of the underlying model.
    fn infer(&self, tensor: &Tensor) -> Result<Vec<f32>, VisionError>;
}

impl<F> Infer for F
where
    F: Fn(&Tensor) -> Result<Vec<f32>, VisionError> + Send + Sync,
{
    fn infer(&self, tensor: &Tensor) -> Result<Vec<f32>, VisionError> {
        self(tensor)
    }
}

#[async_trait]
pub trait ModelLoader: Send + Sync {
    async fn load(&self) -> Result<Arc<dyn Infer>, VisionError>;
}

/// Loader for a model the shell already constructed.
#[derive(Clone)]
pub struct PreloadedModel(Arc<dyn Infer>);

impl PreloadedModel {
    pub fn new(model: impl Infer + 'static) -> Self {
        Self(Arc::new(model))
    }
}

#[async_trait]
impl ModelLoader for PreloadedModel {
    async fn load(&self) -> Result<Arc<dyn Infer>, VisionError> {
        Ok(Arc::clone(&self.0))
    }
}

/// Caller-owned, load-once model handle.
///
/// Concurrent `ensure_loaded` calls share a single in-flight load, and its
/// outcome: if that attempt fails, every caller that was waiting on it gets
/// the same `ModelUnavailable`. A successful load is kept for the life of the
/// handle; after a failure the next caller to arrive starts a fresh attempt.
pub struct ModelHandle<L> {
    loader: L,
    model: OnceLock<Arc<dyn Infer>>,
    /// Completed load attempts, bumped while `last_failure` is held.
    attempts: AtomicU64,
    last_failure: Mutex<Option<String>>,
}

impl<L: ModelLoader> ModelHandle<L> {
    pub fn new(loader: L) -> Self {
        Self {
            loader,
            model: OnceLock::new(),
            attempts: AtomicU64::new(0),
            last_failure: Mutex::new(None),
        }
    }

    #[must_use]
    pub fn is_loaded(&self) -> bool {
        self.model.get().is_some()
    }

    /// # Errors
    ///
    /// `ModelUnavailable` if the loader fails.
    #[instrument(skip(self))]
    pub async fn ensure_loaded(&self) -> Result<Arc<dyn Infer>, VisionError> {
        if let Some(model) = self.model.get() {
            return Ok(Arc::clone(model));
        }

        let seen = self.attempts.load(Ordering::Acquire);
        let mut last_failure = self.last_failure.lock().await;

        if let Some(model) = self.model.get() {
            return Ok(Arc::clone(model));
        }
        // An attempt finished while we queued behind it
        if self.attempts.load(Ordering::Acquire) != seen {
            if let Some(reason) = last_failure.as_ref() {
                return Err(VisionError::ModelUnavailable(reason.clone()));
            }
        }

        counter!("vision.model.loads").increment(1);
        let result = self.loader.load().await;
        self.attempts.fetch_add(1, Ordering::Release);

        match result {
            Ok(model) => {
                debug!("Model loaded successfully");
                *last_failure = None;
                Ok(Arc::clone(self.model.get_or_init(|| model)))
            }
            Err(e) => {
                counter!("vision.model.load_failures").increment(1);
                warn!(error = %e, "model load failed");
                let reason = match e.into_unavailable() {
                    VisionError::ModelUnavailable(reason) => reason,
                    other => other.to_string(),
                };
                *last_failure = Some(reason.clone());
                Err(VisionError::ModelUnavailable(reason))
            }
        }
    }
}

/// Rearranges a `[1, A, B]` output into `[records, record_len]` order.
///
/// YOLO exports disagree on whether features or anchors come first; the
/// decoder wants one record per anchor.
///
/// # Errors
///
/// `ModelUnavailable` if neither trailing dimension matches `record_len`.
pub fn to_record_major(
    shape: &[i64],
    data: &[f32],
    record_len: usize,
) -> Result<Vec<f32>, VisionError> {
    let bad_shape =
        || VisionError::ModelUnavailable(format!("unexpected output shape {shape:?}"));

    let dims: Vec<usize> = shape
        .iter()
        .map(|&d| usize::try_from(d).map_err(|_| bad_shape()))
        .collect::<Result<_, _>>()?;

    let (rows, cols) = match dims.as_slice() {
        [1, rows, cols] | [rows, cols] => (*rows, *cols),
        _ => return Err(bad_shape()),
    };
    if rows.checked_mul(cols) != Some(data.len()) {
        return Err(bad_shape());
    }

    if cols == record_len {
        Ok(data.to_vec())
    } else if rows == record_len {
        // [features, anchors] -> [anchors, features]
        let mut out = Vec::with_capacity(data.len());
        for anchor in 0..cols {
            out.extend((0..rows).map(|feature| data[feature * cols + anchor]));
        }
        Ok(out)
    } else {
        Err(bad_shape())
    }
}

#[cfg(feature = "ml")]
pub use onnx::{OnnxFileLoader, OnnxModel};

#[cfg(feature = "ml")]
mod onnx {
    use std::path::PathBuf;
    use std::sync::{Arc, Mutex};

    use async_trait::async_trait;
    use ort::session::Session;
    use tracing::instrument;

    use super::{to_record_major, Infer, ModelLoader};
    use crate::vision::{Tensor, VisionError};

    /// ONNX Runtime session behind the `Infer` capability.
    ///
    /// Inference is serialized through a mutex; use one handle per thread for
    /// throughput.
    pub struct OnnxModel {
        session: Mutex<Session>,
        record_len: usize,
    }

    impl OnnxModel {
        /// # Errors
        ///
        /// `ModelUnavailable` if ONNX Runtime rejects the model.
        #[instrument(skip(model_bytes), fields(model_size = model_bytes.len()))]
        pub fn from_memory(model_bytes: &[u8], num_classes: usize) -> Result<Self, VisionError> {
            let session = Session::builder()?.commit_from_memory(model_bytes)?;
            Ok(Self {
                session: Mutex::new(session),
                record_len: num_classes.saturating_add(4),
            })
        }
    }

    impl Infer for OnnxModel {
        fn infer(&self, tensor: &Tensor) -> Result<Vec<f32>, VisionError> {
            let input_value = ort::value::Tensor::from_array(tensor.to_nchw())?;

            let mut session = self
                .session
                .lock()
                .map_err(|_| VisionError::Processing("Session lock poisoned".into()))?;

            let outputs = session.run(ort::inputs![input_value])?;
            let (shape, data) = outputs[0].try_extract_tensor::<f32>()?;
            let dims: Vec<i64> = shape.iter().copied().collect();

            to_record_major(&dims, data, self.record_len)
        }
    }

    /// Reads an ONNX file from disk on first use.
    #[derive(Debug, Clone)]
    pub struct OnnxFileLoader {
        path: PathBuf,
        num_classes: usize,
    }

    impl OnnxFileLoader {
        pub fn new(path: impl Into<PathBuf>, num_classes: usize) -> Self {
            Self {
                path: path.into(),
                num_classes,
            }
        }
    }

    #[async_trait]
    impl ModelLoader for OnnxFileLoader {
        async fn load(&self) -> Result<Arc<dyn Infer>, VisionError> {
            let path = self.path.clone();
            let num_classes = self.num_classes;

            let model = tokio::task::spawn_blocking(move || {
                let bytes = std::fs::read(&path).map_err(|e| {
                    VisionError::ModelUnavailable(format!(
                        "cannot read model {}: {e}",
                        path.display()
                    ))
                })?;
                OnnxModel::from_memory(&bytes, num_classes)
            })
            .await
            .map_err(|_| VisionError::ModelUnavailable("model load task aborted".into()))??;

            Ok(Arc::new(model))
        }
    }
}
