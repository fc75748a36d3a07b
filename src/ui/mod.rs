//! UI Module - decision requests, progress events and handlers
//!
//! Core stages never talk to a terminal or window directly. They publish a
//! [`Prompt`] through a [`Prompter`] and block until a [`PromptResponse`]
//! comes back. The UI side is a [`UiHandler`]: the interactive console, a
//! scripted harness for tests, or anything else that can answer prompts.

pub mod console;
pub mod scripted;
pub mod threading;

use serde::{Deserialize, Serialize};
use std::path::PathBuf;

use crate::error::PipelineError;
use crate::models::DeviceCategory;

pub use console::ConsoleUi;
pub use scripted::ScriptedUi;
pub use threading::{ChannelPrompter, UiBridge};

/// Where in the pipeline a prompt comes from.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize)]
pub enum PromptTopic {
    /// Report validation produced warnings; continue?
    ReportValidation,
    /// Legacy firmware detected; target UEFI instead?
    FirmwareType,
    /// Several devices of one category survived; pick a combination.
    DeviceSelection(DeviceCategory),
    AudioLayout,
    SmbiosOverride,
    /// Download step of the resource fetcher.
    Download,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub enum PromptKind {
    Confirm,
    Choice,
}

/// A decision request published by a core stage.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct Prompt {
    pub topic: PromptTopic,
    pub kind: PromptKind,
    pub title: String,
    pub text: String,
    pub options: Vec<String>,
    /// Index of the default option; for confirms, 0 = yes, 1 = no.
    pub default: usize,
}

impl Prompt {
    pub fn choice(topic: PromptTopic, title: impl Into<String>, text: impl Into<String>, options: Vec<String>, default: usize) -> Self {
        Prompt {
            topic,
            kind: PromptKind::Choice,
            title: title.into(),
            text: text.into(),
            options,
            default,
        }
    }

    pub fn confirm(topic: PromptTopic, title: impl Into<String>, text: impl Into<String>, default_yes: bool) -> Self {
        Prompt {
            topic,
            kind: PromptKind::Confirm,
            title: title.into(),
            text: text.into(),
            options: vec!["Yes".to_string(), "No".to_string()],
            default: if default_yes { 0 } else { 1 },
        }
    }

    /// The response a non-interactive caller would give.
    pub fn default_response(&self) -> PromptResponse {
        match self.kind {
            PromptKind::Confirm => PromptResponse::Confirmed(self.default == 0),
            PromptKind::Choice => PromptResponse::Selected(self.default),
        }
    }
}

/// Answer to a [`Prompt`].
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub enum PromptResponse {
    Confirmed(bool),
    Selected(usize),
    Cancelled,
}

/// Anything a core stage can publish a decision request to.
pub trait Prompter {
    fn ask(&self, prompt: Prompt) -> PromptResponse;
}

/// Status of a progress event.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum ProgressStatus {
    Loading,
    Processing,
    Done,
    Error,
}

/// Structured progress update posted by the worker.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct ProgressEvent {
    pub phase: String,
    pub step: u32,
    pub total: u32,
    pub message: String,
    pub status: ProgressStatus,
}

/// Events flowing from the worker to the UI.
#[derive(Debug, Clone, PartialEq)]
pub enum BuildEvent {
    Progress(ProgressEvent),
    PhaseChanged(String),
    Log(String),
    /// Final event of a run. `output` is only set on success.
    BuildComplete {
        success: bool,
        output: Option<PathBuf>,
        code: Option<String>,
        message: String,
    },
}

/// The UI side of the bridge.
pub trait UiHandler: Send + Sync {
    /// Answer a decision request. Blocking is fine; the caller waits.
    fn prompt(&self, prompt: &Prompt) -> PromptResponse;

    /// Render a worker event. Default: ignore.
    fn on_event(&self, _event: &BuildEvent) {}
}

/// Any handler can be used as a prompter directly, on the caller's thread.
impl<T: UiHandler + ?Sized> Prompter for T {
    fn ask(&self, prompt: Prompt) -> PromptResponse {
        self.prompt(&prompt)
    }
}

/// Ask a choice question and resolve the answer to an option index.
pub fn ask_choice(prompter: &dyn Prompter, prompt: Prompt) -> Result<usize, PipelineError> {
    let count = prompt.options.len();
    let default = prompt.default.min(count.saturating_sub(1));
    let topic = prompt.topic;
    match prompter.ask(prompt) {
        PromptResponse::Selected(i) if i < count => Ok(i),
        PromptResponse::Selected(i) => {
            log::warn!("[UI] Selection {} out of range for {:?}; using default {}", i, topic, default);
            Ok(default)
        }
        PromptResponse::Confirmed(_) => Ok(default),
        PromptResponse::Cancelled => Err(PipelineError::Cancelled),
    }
}

/// Ask a yes/no question.
pub fn ask_confirm(prompter: &dyn Prompter, prompt: Prompt) -> Result<bool, PipelineError> {
    match prompter.ask(prompt) {
        PromptResponse::Confirmed(yes) => Ok(yes),
        PromptResponse::Selected(i) => Ok(i == 0),
        PromptResponse::Cancelled => Err(PipelineError::Cancelled),
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    struct Fixed(PromptResponse);

    impl UiHandler for Fixed {
        fn prompt(&self, _prompt: &Prompt) -> PromptResponse {
            self.0.clone()
        }
    }

    fn gpu_prompt() -> Prompt {
        Prompt::choice(
            PromptTopic::DeviceSelection(DeviceCategory::Gpu),
            "GPU",
            "Pick",
            vec!["a".into(), "b".into()],
            1,
        )
    }

    #[test]
    fn test_out_of_range_selection_falls_back_to_default() {
        assert_eq!(ask_choice(&Fixed(PromptResponse::Selected(9)), gpu_prompt()).unwrap(), 1);
        assert_eq!(ask_choice(&Fixed(PromptResponse::Selected(0)), gpu_prompt()).unwrap(), 0);
    }

    #[test]
    fn test_cancel_propagates() {
        let err = ask_choice(&Fixed(PromptResponse::Cancelled), gpu_prompt()).unwrap_err();
        assert!(matches!(err, PipelineError::Cancelled));
    }

    #[test]
    fn test_confirm_default_response() {
        let prompt = Prompt::confirm(PromptTopic::FirmwareType, "Firmware", "UEFI?", true);
        assert_eq!(prompt.default_response(), PromptResponse::Confirmed(true));
        assert!(ask_confirm(&Fixed(PromptResponse::Confirmed(false)), prompt).map(|a| !a).unwrap());
    }
}
