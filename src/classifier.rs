//! Leaf disease classification of captured images.
//!
//! The model itself is an external collaborator behind [`ImageClassifier`]. This module
//! only owns the label set and the post-processing of class probabilities.

use crate::error::{AppResult, GreenhouseError};
use async_trait::async_trait;
use serde::Serialize;
use std::path::Path;

/// Class labels of the bundled leaf disease model, in output order.
pub const DEFAULT_CLASS_LABELS: [&str; 7] = [
    "Pepper__bell___Bacterial_spot",
    "Pepper__bell___healthy",
    "Potato___Early_blight",
    "Potato___Late_blight",
    "Potato___healthy",
    "Rice_leaf___Bacterial_leaf_blight",
    "Rice_leaf___Brown_spot",
];

/// The most likely class and its probability.
#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct Classification {
    /// Winning class label
    pub label: String,
    /// Probability of that class, in `[0, 1]`
    pub confidence: f64,
}

/// Maps an image file to a classification.
#[async_trait]
pub trait ImageClassifier: Send + Sync {
    /// Classify the image at `path`.
    ///
    /// # Errors
    /// `Upstream` when the model cannot be reached or fails.
    async fn classify(&self, path: &Path) -> AppResult<Classification>;
}

/// Pick the arg-max class from a probability vector.
///
/// # Errors
/// `InvalidInput` if the vector is empty, contains NaN, or does not match the labels.
pub fn top_prediction(probabilities: &[f64], labels: &[&str]) -> AppResult<Classification> {
    if probabilities.len() != labels.len() {
        return Err(GreenhouseError::InvalidInput(format!(
            "{} probabilities for {} labels",
            probabilities.len(),
            labels.len()
        )));
    }
    if probabilities.iter().any(|p| p.is_nan()) {
        return Err(GreenhouseError::InvalidInput(
            "probabilities contain NaN".to_string(),
        ));
    }

    // First maximum wins on ties
    let (index, &confidence) = probabilities
        .iter()
        .enumerate()
        .reduce(|best, item| if item.1 > best.1 { item } else { best })
        .ok_or_else(|| GreenhouseError::InvalidInput("no probabilities".to_string()))?;

    Ok(Classification {
        label: labels[index].to_string(),
        confidence,
    })
}
