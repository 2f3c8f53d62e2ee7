//! Embedding service wrapping the two encoder sessions.
//!
//! Owns the ONNX sessions and the tokenizer; everything else reaches
//! inference through this service. Sessions are replaced atomically on
//! reload and are never entered concurrently (each sits behind its own
//! mutex, and a reload takes the outer write lock).

use image::imageops::FilterType;
use image::DynamicImage;
use ndarray::{Array2, Array4};
use ort::execution_providers::CPUExecutionProvider;
use ort::session::Session;
use ort::value::TensorRef;
use std::path::Path;
use std::sync::{Mutex, RwLock};
use tracing::{info, warn};

use crate::error::{Error, Result};
use crate::tokenizer::{ClipTokenizer, CONTEXT_LEN};
use crate::vecmath;

/// Input side of the visual encoder.
const IMAGE_SIDE: u32 = 224;

/// Channel statistics of the encoder's training transform. Changing these
/// breaks bit-faithfulness with the pretrained weights.
const CHANNEL_MEAN: [f32; 3] = [0.481_454_66, 0.457_827_5, 0.408_210_73];
const CHANNEL_STD: [f32; 3] = [0.268_629_54, 0.261_302_58, 0.275_777_11];

struct LoadedModels {
    visual: Mutex<Session>,
    text: Mutex<Session>,
    tokenizer: ClipTokenizer,
}

#[derive(Default)]
pub struct Embedder {
    models: RwLock<Option<LoadedModels>>,
}

impl Embedder {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn is_ready(&self) -> bool {
        self.models.read().expect("models lock").is_some()
    }

    /// Idempotent (re)load. Builds the new sessions first, then swaps them in
    /// under the write lock so no inference call ever observes a half-loaded
    /// pair or runs concurrently with the swap.
    pub fn load_models(&self, visual_path: &Path, text_path: &Path, tokenizer_path: &Path) -> Result<()> {
        let tokenizer = ClipTokenizer::from_file(tokenizer_path)?;
        let visual = build_session(visual_path)?;
        let text = build_session(text_path)?;

        let mut slot = self.models.write().expect("models lock");
        *slot = Some(LoadedModels {
            visual: Mutex::new(visual),
            text: Mutex::new(text),
            tokenizer,
        });
        info!(
            visual = %visual_path.display(),
            text = %text_path.display(),
            vocab = slot.as_ref().map(|m| m.tokenizer.vocab_len()).unwrap_or(0),
            "encoder models loaded"
        );
        Ok(())
    }

    /// Embed an image file. Inference failures are logged and yield `None`;
    /// the caller keeps the record searchable by filename and tags.
    pub fn embed_image(&self, path: &Path) -> Option<Vec<f32>> {
        let img = match image::open(path) {
            Ok(img) => img,
            Err(e) => {
                warn!(path = %path.display(), error = %e, "image decode failed");
                return None;
            }
        };
        self.embed_decoded(&img)
    }

    /// Embed an in-memory image (uploaded bytes).
    pub fn embed_image_bytes(&self, bytes: &[u8]) -> Option<Vec<f32>> {
        let img = match image::load_from_memory(bytes) {
            Ok(img) => img,
            Err(e) => {
                warn!(error = %e, "uploaded image decode failed");
                return None;
            }
        };
        self.embed_decoded(&img)
    }

    fn embed_decoded(&self, img: &DynamicImage) -> Option<Vec<f32>> {
        let pixels = preprocess(img);
        let guard = self.models.read().expect("models lock");
        let models = guard.as_ref()?;
        match run_visual(&models.visual, &pixels) {
            Ok(vec) => Some(vec),
            Err(e) => {
                warn!(error = %e, "visual inference failed");
                None
            }
        }
    }

    /// Embed a text query. Empty or whitespace-only input yields `None`.
    pub fn embed_text(&self, text: &str) -> Option<Vec<f32>> {
        if text.trim().is_empty() {
            return None;
        }
        let guard = self.models.read().expect("models lock");
        let models = guard.as_ref()?;
        let (ids, mask) = models.tokenizer.tokenize(text);
        match run_text(&models.text, &ids, &mask) {
            Ok(vec) => Some(vec),
            Err(e) => {
                warn!(error = %e, "text inference failed");
                None
            }
        }
    }
}

fn build_session(path: &Path) -> Result<Session> {
    Session::builder()
        .and_then(|b| b.with_execution_providers([CPUExecutionProvider::default().build()]))
        // Serial by configuration: concurrent calls into one session are not
        // permitted, and the ingestion worker is the only steady producer.
        .and_then(|b| b.with_intra_threads(1))
        .and_then(|b| b.commit_from_file(path))
        .map_err(|e| Error::Inference(format!("failed to load {}: {e}", path.display())))
}

/// The encoder's training transform, reproduced exactly: center-crop to a
/// square on the shorter side, bilinear resize to 224x224, scale to [0,1],
/// normalize per channel, arrange as NCHW with channel order R,G,B.
fn preprocess(img: &DynamicImage) -> Array4<f32> {
    let (w, h) = (img.width(), img.height());
    let side = w.min(h).max(1);
    let x = (w - side) / 2;
    let y = (h - side) / 2;
    let square = img.crop_imm(x, y, side, side);
    let resized = square.resize_exact(IMAGE_SIDE, IMAGE_SIDE, FilterType::Triangle);
    let rgb = resized.to_rgb8();

    let mut pixels = Array4::<f32>::zeros((1, 3, IMAGE_SIDE as usize, IMAGE_SIDE as usize));
    for (px, py, pixel) in rgb.enumerate_pixels() {
        for c in 0..3 {
            pixels[[0, c, py as usize, px as usize]] =
                (pixel[c] as f32 / 255.0 - CHANNEL_MEAN[c]) / CHANNEL_STD[c];
        }
    }
    pixels
}

fn run_visual(session: &Mutex<Session>, pixels: &Array4<f32>) -> Result<Vec<f32>> {
    let pixels = pixels.view().into_dyn();
    let pixels_tensor =
        TensorRef::from_array_view(pixels).map_err(|e| Error::Inference(e.to_string()))?;
    let mut session = session.lock().expect("visual session lock");
    let mut outputs = session
        .run(ort::inputs! { "pixel_values" => pixels_tensor })
        .map_err(|e| Error::Inference(e.to_string()))?;
    extract_embedding(outputs.remove("image_embeds"), "image_embeds")
}

fn run_text(session: &Mutex<Session>, ids: &[i64], mask: &[i64]) -> Result<Vec<f32>> {
    let ids = Array2::from_shape_vec((1, CONTEXT_LEN), ids.to_vec())
        .map_err(|e| Error::Inference(e.to_string()))?
        .into_dyn();
    let mask = Array2::from_shape_vec((1, CONTEXT_LEN), mask.to_vec())
        .map_err(|e| Error::Inference(e.to_string()))?
        .into_dyn();
    let ids_tensor =
        TensorRef::from_array_view(ids.view()).map_err(|e| Error::Inference(e.to_string()))?;
    let mask_tensor =
        TensorRef::from_array_view(mask.view()).map_err(|e| Error::Inference(e.to_string()))?;
    let mut session = session.lock().expect("text session lock");
    let mut outputs = session
        .run(ort::inputs! {
            "input_ids" => ids_tensor,
            "attention_mask" => mask_tensor
        })
        .map_err(|e| Error::Inference(e.to_string()))?;
    extract_embedding(outputs.remove("text_embeds"), "text_embeds")
}

fn extract_embedding(
    output: Option<ort::value::DynValue>,
    name: &str,
) -> Result<Vec<f32>> {
    let output = output.ok_or_else(|| Error::Inference(format!("model has no {name} output")))?;
    let array: ndarray::ArrayViewD<f32> = output
        .try_extract_array()
        .map_err(|e| Error::Inference(e.to_string()))?;
    // Shape is [1, D]; take the single row.
    let mut vec: Vec<f32> = array.iter().copied().collect();
    if vec.is_empty() {
        return Err(Error::Inference(format!("{name} output is empty")));
    }
    vecmath::l2_normalize(&mut vec);
    Ok(vec)
}
