use crate::config::ModelConfig;
use image::imageops::FilterType;
use ndarray::{Array, Ix4};
use ort::{
    session::{builder::GraphOptimizationLevel, Session},
    value::TensorRef,
};
use serde::Serialize;
use std::path::PathBuf;
use std::sync::{
    atomic::{AtomicUsize, Ordering},
    Arc, Mutex,
};
use thiserror::Error;

/// Binary class produced by the model. The graph outputs a single sigmoid
/// scalar where class index 1 is "dog".
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
#[serde(rename_all = "lowercase")]
pub enum Label {
    Cat,
    Dog,
}

impl Label {
    pub fn from_score(score: f32, threshold: f32) -> Self {
        if score >= threshold {
            Label::Dog
        } else {
            Label::Cat
        }
    }

    pub fn class_index(self) -> u32 {
        match self {
            Label::Cat => 0,
            Label::Dog => 1,
        }
    }

    pub fn display(self) -> &'static str {
        match self {
            Label::Dog => "It's a Dog!",
            Label::Cat => "It's a Cat!",
        }
    }
}

#[derive(Debug, Clone, Copy, Serialize)]
pub struct Prediction {
    pub label: Label,
    pub score: f32,
}

#[derive(Error, Debug)]
pub enum ClassifierError {
    #[error("empty image upload")]
    EmptyImage,
    #[error("failed to decode image: {0}")]
    Decode(String),
    #[error("inference failed: {0}")]
    Inference(String),
    #[error("model returned no output values")]
    EmptyOutput,
    #[error("model output is not a finite scalar")]
    NonFiniteOutput,
}

#[derive(Error, Debug)]
pub enum ModelLoadError {
    #[error("model file not found: {0:?}")]
    FileNotFound(PathBuf),
    #[error("model has no outputs")]
    NoOutputs,
    #[error("failed to build ONNX session: {0}")]
    Session(#[from] ort::Error),
}

pub trait Classifier: Send + Sync + 'static {
    fn classify(&self, image_data: &[u8]) -> Result<Prediction, ClassifierError>;
}

fn image_to_input(image_data: &[u8], input_size: u32) -> Result<Array<f32, Ix4>, ClassifierError> {
    if image_data.is_empty() {
        return Err(ClassifierError::EmptyImage);
    }

    let image_reader = image::ImageReader::new(std::io::Cursor::new(image_data))
        .with_guessed_format()
        .map_err(|e| ClassifierError::Decode(e.to_string()))?;

    let original_img = image_reader
        .decode()
        .map_err(|e| ClassifierError::Decode(e.to_string()))?;

    // Bilinear resize to the fixed input dimensions, batch dimension of 1,
    // raw 0-255 channel intensities. The graph expects NHWC.
    let img = original_img
        .resize_exact(input_size, input_size, FilterType::Triangle)
        .to_rgb8();

    let size = input_size as usize;
    let mut input = Array::zeros((1, size, size, 3));
    for (x, y, pixel) in img.enumerate_pixels() {
        let [r, g, b] = pixel.0;
        input[[0, y as usize, x as usize, 0]] = r as f32;
        input[[0, y as usize, x as usize, 1]] = g as f32;
        input[[0, y as usize, x as usize, 2]] = b as f32;
    }

    Ok(input)
}

pub struct OrtClassifier {
    sessions: Vec<Arc<Mutex<Session>>>,
    counter: AtomicUsize,
    output_name: String,
    input_size: u32,
    decision_threshold: f32,
}

impl OrtClassifier {
    pub fn new(model_config: &ModelConfig) -> Result<Self, ModelLoadError> {
        let model_path = model_config.get_model_path();
        if !model_path.exists() {
            return Err(ModelLoadError::FileNotFound(model_path));
        }

        ort::init().commit();

        let build_session = || -> Result<Session, ort::Error> {
            Session::builder()?
                .with_optimization_level(GraphOptimizationLevel::Level3)?
                .commit_from_file(&model_path)
        };

        let first = build_session()?;
        let output_name = first
            .outputs()
            .first()
            .map(|o| o.name().to_string())
            .ok_or(ModelLoadError::NoOutputs)?;

        let num_instances = model_config.num_instances.max(1);
        let mut sessions = vec![Arc::new(Mutex::new(first))];
        for _ in 1..num_instances {
            sessions.push(Arc::new(Mutex::new(build_session()?)));
        }

        tracing::info!("Created {} ONNX sessions", sessions.len());

        Ok(Self {
            sessions,
            counter: AtomicUsize::new(0),
            output_name,
            input_size: model_config.input_size,
            decision_threshold: model_config.decision_threshold,
        })
    }

    fn run_inference(&self, input: &Array<f32, Ix4>) -> Result<f32, ClassifierError> {
        let index = self.counter.fetch_add(1, Ordering::SeqCst) % self.sessions.len();
        let mut session = self.sessions[index]
            .lock()
            .map_err(|e| ClassifierError::Inference(format!("session mutex poisoned: {}", e)))?;

        tracing::debug!("Handling request with session {}", index);

        let tensor_ref = TensorRef::from_array_view(input.view())
            .map_err(|e| ClassifierError::Inference(format!("failed to build tensor: {}", e)))?;

        let outputs = session
            .run(ort::inputs![tensor_ref])
            .map_err(|e| ClassifierError::Inference(e.to_string()))?;

        let (_shape, data) = outputs[self.output_name.as_str()]
            .try_extract_tensor::<f32>()
            .map_err(|e| ClassifierError::Inference(format!("failed to extract tensor: {}", e)))?;

        let score = *data.first().ok_or(ClassifierError::EmptyOutput)?;
        if !score.is_finite() {
            return Err(ClassifierError::NonFiniteOutput);
        }

        Ok(score)
    }
}

impl Classifier for OrtClassifier {
    fn classify(&self, image_data: &[u8]) -> Result<Prediction, ClassifierError> {
        let input = image_to_input(image_data, self.input_size)?;
        let score = self.run_inference(&input)?;
        let label = Label::from_score(score, self.decision_threshold);

        tracing::debug!(score, label = label.display(), "classified image");

        Ok(Prediction { label, score })
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use image::{ImageBuffer, Rgb};
    use std::io::Cursor;

    fn png_bytes(width: u32, height: u32, color: Rgb<u8>) -> Vec<u8> {
        let img = ImageBuffer::<Rgb<u8>, Vec<u8>>::from_pixel(width, height, color);
        let mut image_data: Vec<u8> = Vec::new();
        let mut cursor = Cursor::new(&mut image_data);
        img.write_to(&mut cursor, image::ImageFormat::Png).unwrap();
        image_data
    }

    #[test]
    fn test_image_to_input() {
        let image_data = png_bytes(100, 100, Rgb([255, 0, 0]));

        let input = image_to_input(&image_data, 150).unwrap();

        assert_eq!(input.shape(), &[1, 150, 150, 3]);
        assert_eq!(input[[0, 0, 0, 0]], 255.0);
        assert_eq!(input[[0, 0, 0, 1]], 0.0);
        assert_eq!(input[[0, 149, 149, 2]], 0.0);
    }

    #[test]
    fn test_image_to_input_keeps_raw_intensities() {
        let image_data = png_bytes(150, 150, Rgb([10, 20, 30]));

        let input = image_to_input(&image_data, 150).unwrap();

        assert_eq!(input[[0, 75, 75, 0]], 10.0);
        assert_eq!(input[[0, 75, 75, 1]], 20.0);
        assert_eq!(input[[0, 75, 75, 2]], 30.0);
    }

    #[test]
    fn test_corrupt_image_is_a_decode_error() {
        let result = image_to_input(&[0xde, 0xad, 0xbe, 0xef], 150);
        assert!(matches!(result, Err(ClassifierError::Decode(_))));
    }

    #[test]
    fn test_empty_upload_is_rejected() {
        let result = image_to_input(&[], 150);
        assert!(matches!(result, Err(ClassifierError::EmptyImage)));
    }

    #[test]
    fn test_label_threshold() {
        assert_eq!(Label::from_score(0.92, 0.5), Label::Dog);
        assert_eq!(Label::from_score(0.03, 0.5), Label::Cat);
        assert_eq!(Label::from_score(0.5, 0.5), Label::Dog);
    }

    #[test]
    fn test_label_display() {
        assert_eq!(Label::from_score(0.92, 0.5).display(), "It's a Dog!");
        assert_eq!(Label::from_score(0.03, 0.5).display(), "It's a Cat!");
        assert_eq!(Label::Dog.class_index(), 1);
        assert_eq!(Label::Cat.class_index(), 0);
    }
}
