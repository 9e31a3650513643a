use thiserror::Error;

use crate::tokens::{self, CONTROL_OFFSET};

#[derive(Debug, Error)]
pub enum ModelError {
    #[error("model backend failure: {0}")]
    Backend(String),
}

/// One generation call: produce new events inside
/// `[window_start, window_end)` given the framed human window.
#[derive(Debug, Clone)]
pub struct GenerateRequest {
    pub window_start: f64,
    pub window_end: f64,
    pub prompt: Vec<u32>,
    pub controls: Vec<u32>,
    pub top_p: f64,
    pub temperature: f64,
}

/// The generative model boundary. The real transformer backend lives out of
/// tree; anything that can turn a request into event tokens plugs in here.
pub trait Model: Send + Sync {
    fn generate(&self, request: &GenerateRequest) -> Result<Vec<u32>, ModelError>;
}

/// Deterministic stand-in backend: replays the framed window one window
/// later. Lets the server (and the integration tests) run end to end
/// without a GPU.
pub struct EchoModel;

impl Model for EchoModel {
    fn generate(&self, request: &GenerateRequest) -> Result<Vec<u32>, ModelError> {
        let source: Vec<u32> = if request.prompt.is_empty() {
            request
                .controls
                .iter()
                .filter_map(|t| t.checked_sub(CONTROL_OFFSET))
                .collect()
        } else {
            request.prompt.clone()
        };

        let mut notes = tokens::decode(&source);
        for note in &mut notes {
            note.onset += request.window_start;
        }
        Ok(tokens::encode(&notes))
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::events::NoteEvent;
    use crate::tokens::Framing;

    #[test]
    fn echo_shifts_prompt_into_requested_window() {
        let notes = vec![NoteEvent::new(1.0, 0.5, 60, 0)];
        let framed = Framing::Continuation.frame(&notes);
        let request = GenerateRequest {
            window_start: 6.0,
            window_end: 12.0,
            prompt: framed.prompt,
            controls: framed.controls,
            top_p: 0.95,
            temperature: 1.0,
        };
        let generated = tokens::decode(&EchoModel.generate(&request).unwrap());
        assert_eq!(generated.len(), 1);
        assert!((generated[0].onset - 7.0).abs() < 1e-6);
        assert_eq!(generated[0].pitch, 60);
    }

    #[test]
    fn echo_understands_control_framing() {
        let notes = vec![NoteEvent::new(0.0, 0.5, 64, 0)];
        let framed = Framing::Anticipation.frame(&notes);
        let request = GenerateRequest {
            window_start: 6.0,
            window_end: 12.0,
            prompt: framed.prompt,
            controls: framed.controls,
            top_p: 0.95,
            temperature: 1.0,
        };
        let generated = tokens::decode(&EchoModel.generate(&request).unwrap());
        assert_eq!(generated.len(), 1);
        assert_eq!(generated[0].pitch, 64);
    }
}
