//! Scripted UI handler: pre-canned answers keyed by prompt topic.
//!
//! Used by tests and by `efi-forge build --script`. Topics without a queued
//! answer get the prompt's default response.

use serde::Deserialize;
use std::collections::{BTreeMap, VecDeque};
use std::path::Path;
use std::sync::Mutex;

use super::{BuildEvent, Prompt, PromptResponse, PromptTopic, UiHandler};
use crate::error::ConfigError;
use crate::models::DeviceCategory;

#[derive(Default)]
pub struct ScriptedUi {
    answers: Mutex<BTreeMap<PromptTopic, VecDeque<PromptResponse>>>,
    asked: Mutex<Vec<Prompt>>,
    events: Mutex<Vec<BuildEvent>>,
}

impl ScriptedUi {
    pub fn new() -> Self {
        Self::default()
    }

    /// Queue an answer for a topic. Answers are consumed in order.
    pub fn answer(self, topic: PromptTopic, response: PromptResponse) -> Self {
        if let Ok(mut answers) = self.answers.lock() {
            answers.entry(topic).or_default().push_back(response);
        }
        self
    }

    /// Every prompt seen so far.
    pub fn asked(&self) -> Vec<Prompt> {
        self.asked.lock().map(|a| a.clone()).unwrap_or_default()
    }

    pub fn asked_about(&self, topic: PromptTopic) -> Vec<Prompt> {
        self.asked().into_iter().filter(|p| p.topic == topic).collect()
    }

    /// Every event rendered so far.
    pub fn events(&self) -> Vec<BuildEvent> {
        self.events.lock().map(|e| e.clone()).unwrap_or_default()
    }

    /// Load answers from a JSON script file.
    ///
    /// ```json
    /// { "firmware_uefi": false, "gpu": 0, "wifi": 1, "audio_layout": 0, "cancel": ["smbios"] }
    /// ```
    pub fn from_script_file(path: &Path) -> Result<Self, ConfigError> {
        let contents = std::fs::read_to_string(path)
            .map_err(|_| ConfigError::FileNotFound(path.display().to_string()))?;
        let script: AnswerScript = serde_json::from_str(&contents)?;
        Ok(script.into_ui())
    }
}

#[derive(Debug, Default, Deserialize)]
#[serde(default)]
struct AnswerScript {
    report_continue: Option<bool>,
    firmware_uefi: Option<bool>,
    gpu: Option<usize>,
    wifi: Option<usize>,
    bluetooth: Option<usize>,
    audio_layout: Option<usize>,
    smbios: Option<usize>,
    download: Option<bool>,
    cancel: Vec<String>,
}

impl AnswerScript {
    fn into_ui(self) -> ScriptedUi {
        let mut ui = ScriptedUi::new();
        if let Some(yes) = self.report_continue {
            ui = ui.answer(PromptTopic::ReportValidation, PromptResponse::Confirmed(yes));
        }
        if let Some(yes) = self.firmware_uefi {
            ui = ui.answer(PromptTopic::FirmwareType, PromptResponse::Confirmed(yes));
        }
        if let Some(yes) = self.download {
            ui = ui.answer(PromptTopic::Download, PromptResponse::Confirmed(yes));
        }
        let choices = [
            (PromptTopic::DeviceSelection(DeviceCategory::Gpu), self.gpu),
            (PromptTopic::DeviceSelection(DeviceCategory::Network), self.wifi),
            (PromptTopic::DeviceSelection(DeviceCategory::Bluetooth), self.bluetooth),
            (PromptTopic::AudioLayout, self.audio_layout),
            (PromptTopic::SmbiosOverride, self.smbios),
        ];
        for (topic, index) in choices {
            if let Some(i) = index {
                ui = ui.answer(topic, PromptResponse::Selected(i));
            }
        }
        for name in &self.cancel {
            let topic = match name.as_str() {
                "report" => PromptTopic::ReportValidation,
                "firmware" => PromptTopic::FirmwareType,
                "gpu" => PromptTopic::DeviceSelection(DeviceCategory::Gpu),
                "wifi" => PromptTopic::DeviceSelection(DeviceCategory::Network),
                "bluetooth" => PromptTopic::DeviceSelection(DeviceCategory::Bluetooth),
                "audio_layout" => PromptTopic::AudioLayout,
                "smbios" => PromptTopic::SmbiosOverride,
                "download" => PromptTopic::Download,
                other => {
                    log::warn!("[UI] Unknown cancel topic '{}' in answer script", other);
                    continue;
                }
            };
            ui = ui.answer(topic, PromptResponse::Cancelled);
        }
        ui
    }
}

impl UiHandler for ScriptedUi {
    fn prompt(&self, prompt: &Prompt) -> PromptResponse {
        if let Ok(mut asked) = self.asked.lock() {
            asked.push(prompt.clone());
        }
        let queued = self
            .answers
            .lock()
            .ok()
            .and_then(|mut answers| answers.get_mut(&prompt.topic).and_then(|q| q.pop_front()));
        let response = queued.unwrap_or_else(|| prompt.default_response());
        log::debug!("[UI] Scripted answer for {:?}: {:?}", prompt.topic, response);
        response
    }

    fn on_event(&self, event: &BuildEvent) {
        if let Ok(mut events) = self.events.lock() {
            events.push(event.clone());
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::io::Write;
    use tempfile::NamedTempFile;

    #[test]
    fn test_unscripted_topics_get_defaults() {
        let ui = ScriptedUi::new();
        let prompt = Prompt::choice(PromptTopic::AudioLayout, "Layout", "", vec!["1".into(), "7".into()], 0);
        assert_eq!(ui.prompt(&prompt), PromptResponse::Selected(0));
        assert_eq!(ui.asked_about(PromptTopic::AudioLayout).len(), 1);
    }

    #[test]
    fn test_answers_are_consumed_in_order() {
        let topic = PromptTopic::DeviceSelection(DeviceCategory::Gpu);
        let ui = ScriptedUi::new()
            .answer(topic, PromptResponse::Selected(1))
            .answer(topic, PromptResponse::Cancelled);
        let prompt = Prompt::choice(topic, "GPU", "", vec!["a".into(), "b".into()], 0);
        assert_eq!(ui.prompt(&prompt), PromptResponse::Selected(1));
        assert_eq!(ui.prompt(&prompt), PromptResponse::Cancelled);
        assert_eq!(ui.prompt(&prompt), PromptResponse::Selected(0));
    }

    #[test]
    fn test_script_file_loading() {
        let mut file = NamedTempFile::new().unwrap();
        write!(file, r#"{{ "firmware_uefi": false, "gpu": 0, "download": false, "cancel": ["smbios"] }}"#).unwrap();
        let ui = ScriptedUi::from_script_file(file.path()).unwrap();
        let firmware = Prompt::confirm(PromptTopic::FirmwareType, "", "", true);
        assert_eq!(ui.prompt(&firmware), PromptResponse::Confirmed(false));
        let smbios = Prompt::choice(PromptTopic::SmbiosOverride, "", "", vec!["x".into()], 0);
        assert_eq!(ui.prompt(&smbios), PromptResponse::Cancelled);
        let download = Prompt::confirm(PromptTopic::Download, "", "", true);
        assert_eq!(ui.prompt(&download), PromptResponse::Confirmed(false));
    }
}
