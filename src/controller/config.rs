use super::turn::TurnMode;
use crate::SAMPLE_RATE_HZ;
use crate::audio::DEFAULT_FRAME_SIZE;
use serde::Deserialize;

#[derive(Deserialize, Debug, Clone, PartialEq)]
#[serde(default)]
pub struct ControllerConfig {
    pub sample_rate: u32,
    /// Samples per captured frame.
    pub frame_size: usize,
    pub turn_mode: TurnMode,
    /// Session instructions; left to the remote's own setting when empty.
    pub instructions: String,
    pub transcription_model: Option<String>,
}

impl Default for ControllerConfig {
    fn default() -> Self {
        Self {
            sample_rate: SAMPLE_RATE_HZ,
            frame_size: DEFAULT_FRAME_SIZE,
            turn_mode: TurnMode::Manual,
            instructions: String::new(),
            transcription_model: Some("whisper-1".to_string()),
        }
    }
}

/// Interview framing assembled into the seed message.
#[derive(Deserialize, Debug, Clone, Default, PartialEq)]
#[serde(default)]
pub struct InterviewBrief {
    pub role: String,
    pub company: String,
    pub custom_prompt: String,
}

impl InterviewBrief {
    pub fn seed_instruction(&self) -> String {
        let mut lines = vec!["Let's start the mock interview.".to_string()];
        if !self.role.trim().is_empty() {
            lines.push(format!("The role I am interviewing for: {}", self.role.trim()));
        }
        if !self.company.trim().is_empty() {
            lines.push(format!("The company: {}", self.company.trim()));
        }
        if !self.custom_prompt.trim().is_empty() {
            lines.push(self.custom_prompt.trim().to_string());
        }
        lines.join("\n")
    }
}
