use serde::{Deserialize, Serialize};

/// Probabilities strictly above this value are labelled [`Label::DeepFake`].
pub const DEFAULT_THRESHOLD: f32 = 0.5;

/// The class decided for a video.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub enum Label {
    /// Authentic footage.
    Real = 0,
    /// Manipulated footage.
    DeepFake = 1,
}

impl Label {
    /// Process exit status reporting this label.
    pub fn exit_code(&self) -> u8 {
        *self as u8
    }
}

impl std::fmt::Display for Label {
    fn fmt(&self, f: &mut std::fmt::Formatter) -> std::fmt::Result {
        match self {
            Label::Real => write!(f, "Real"),
            Label::DeepFake => write!(f, "DeepFake"),
        }
    }
}

/// Outcome of a detection.
#[derive(Debug, Clone, Copy, PartialEq, Serialize, Deserialize)]
pub struct Verdict {
    /// Probability that the video is a deepfake, in [0, 1].
    pub probability: f32,
    /// The label derived from the probability.
    pub label: Label,
}

impl Verdict {
    /// Label a probability with [`DEFAULT_THRESHOLD`].
    pub fn from_probability(probability: f32) -> Self {
        let label = if probability > DEFAULT_THRESHOLD {
            Label::DeepFake
        } else {
            Label::Real
        };
        Self { probability, label }
    }

    /// Label a raw network logit.
    pub fn from_logit(logit: f32) -> Self {
        Self::from_probability(1.0 / (1.0 + (-logit).exp()))
    }
}
