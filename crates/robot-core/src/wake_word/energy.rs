//! Energy-based stand-in for an acoustic wake-word model.
//!
//! Scores sustained loud audio rather than a specific phrase. Useful on a desktop
//! where no trained model is installed.

use super::WakeWordModel;
use anyhow::Result;
use std::collections::{HashMap, VecDeque};

/// RMS level (of full scale) that maps to a score of 1.0.
const FULL_SCORE_RMS: f32 = 0.1;

/// Detector frames averaged into one score, about a third of a second.
const DEFAULT_WINDOW: usize = 4;

pub struct EnergyWakeModel {
    name: String,
    window: usize,
    history: VecDeque<f32>,
}

impl EnergyWakeModel {
    pub fn new(name: impl Into<String>) -> Self {
        Self::with_window(name, DEFAULT_WINDOW)
    }

    pub fn with_window(name: impl Into<String>, window: usize) -> Self {
        let window = window.max(1);
        Self {
            name: name.into(),
            window,
            history: VecDeque::with_capacity(window),
        }
    }
}

impl WakeWordModel for EnergyWakeModel {
    fn predict(&mut self, frame: &[i16]) -> Result<HashMap<String, f32>> {
        let level = (rms(frame) / FULL_SCORE_RMS).clamp(0.0, 1.0);
        if self.history.len() == self.window {
            self.history.pop_front();
        }
        self.history.push_back(level);
        // Short bursts score low until the window is full of loud frames.
        let score = self.history.iter().sum::<f32>() / self.window as f32;
        Ok(HashMap::from([(self.name.clone(), score)]))
    }

    fn reset(&mut self) {
        self.history.clear();
    }
}

/// RMS of PCM16 samples, normalised to 0..1.
fn rms(samples: &[i16]) -> f32 {
    if samples.is_empty() {
        return 0.0;
    }
    let sum_squares: f32 = samples
        .iter()
        .map(|&s| {
            let v = s as f32 / i16::MAX as f32;
            v * v
        })
        .sum();
    (sum_squares / samples.len() as f32).sqrt()
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn silence_scores_zero() {
        let mut model = EnergyWakeModel::new("hey robot");
        let scores = model.predict(&[0; 1280]).unwrap();
        assert_eq!(scores["hey robot"], 0.0);
    }

    #[test]
    fn sustained_loud_audio_reaches_full_score() {
        let mut model = EnergyWakeModel::with_window("hey robot", 2);
        let loud = vec![i16::MAX / 2; 1280];

        let first = model.predict(&loud).unwrap()["hey robot"];
        let second = model.predict(&loud).unwrap()["hey robot"];

        assert!(first < 1.0);
        assert!((second - 1.0).abs() < f32::EPSILON);
    }

    #[test]
    fn reset_forgets_history() {
        let mut model = EnergyWakeModel::with_window("hey robot", 2);
        let loud = vec![i16::MAX / 2; 1280];
        model.predict(&loud).unwrap();
        model.predict(&loud).unwrap();

        model.reset();
        let score = model.predict(&[0; 1280]).unwrap()["hey robot"];

        assert_eq!(score, 0.0);
    }
}
