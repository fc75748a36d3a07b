//! Worker <-> UI bridge.
//!
//! The UI context is a dedicated OS thread that owns the [`UiHandler`].
//! The worker holds a [`ChannelPrompter`]: each prompt travels over a
//! crossbeam channel together with a one-shot reply channel, and the worker
//! blocks until the UI answers or the run is cancelled. Progress flows the
//! other way over a tokio mpsc channel that the caller drains.

use crossbeam_channel::{bounded, select, unbounded, Receiver, Sender};
use std::sync::Arc;
use std::thread::JoinHandle;
use tokio::sync::{mpsc, watch};

use super::{BuildEvent, Prompt, PromptResponse, Prompter, UiHandler};

/// A prompt in flight plus where to send the answer.
struct PromptRequest {
    prompt: Prompt,
    reply: Sender<PromptResponse>,
}

/// Worker-side handle that forwards prompts to the UI thread.
#[derive(Clone)]
pub struct ChannelPrompter {
    tx: Sender<PromptRequest>,
    cancel_rx: watch::Receiver<bool>,
    wakeup_rx: Receiver<()>,
}

impl Prompter for ChannelPrompter {
    fn ask(&self, prompt: Prompt) -> PromptResponse {
        if *self.cancel_rx.borrow() {
            return PromptResponse::Cancelled;
        }
        let (reply_tx, reply_rx) = bounded(1);
        if self
            .tx
            .send(PromptRequest {
                prompt,
                reply: reply_tx,
            })
            .is_err()
        {
            log::warn!("[UI] UI context is gone; treating prompt as cancelled");
            return PromptResponse::Cancelled;
        }
        select! {
            recv(reply_rx) -> reply => reply.unwrap_or(PromptResponse::Cancelled),
            recv(self.wakeup_rx) -> _ => {
                log::info!("[UI] Prompt cancelled while waiting for an answer");
                PromptResponse::Cancelled
            }
        }
    }
}

/// Owns the UI thread, the event channel and the cancellation signal.
pub struct UiBridge {
    prompter: ChannelPrompter,
    events_tx: mpsc::Sender<BuildEvent>,
    cancel_tx: watch::Sender<bool>,
    wakeup_tx: Sender<()>,
    wakeup_rx: Receiver<()>,
    ui_thread: Option<JoinHandle<()>>,
}

impl UiBridge {
    /// Spawn the UI context around `handler`.
    ///
    /// Returns the bridge and the receiving end of the progress channel.
    pub fn spawn(handler: Arc<dyn UiHandler>) -> (Self, mpsc::Receiver<BuildEvent>) {
        let (tx, rx): (Sender<PromptRequest>, Receiver<PromptRequest>) = unbounded();
        let (events_tx, events_rx) = mpsc::channel(256);
        let (cancel_tx, cancel_rx) = watch::channel(false);
        let (wakeup_tx, wakeup_rx) = unbounded();

        let ui_thread = std::thread::Builder::new()
            .name("efi-forge-ui".to_string())
            .spawn(move || {
                while let Ok(request) = rx.recv() {
                    let response = handler.prompt(&request.prompt);
                    let _ = request.reply.send(response);
                }
            })
            .ok();

        let bridge = UiBridge {
            prompter: ChannelPrompter {
                tx,
                cancel_rx,
                wakeup_rx: wakeup_rx.clone(),
            },
            events_tx,
            cancel_tx,
            wakeup_tx,
            wakeup_rx,
            ui_thread,
        };
        (bridge, events_rx)
    }

    pub fn prompter(&self) -> ChannelPrompter {
        self.prompter.clone()
    }

    pub fn events(&self) -> mpsc::Sender<BuildEvent> {
        self.events_tx.clone()
    }

    pub fn cancel_signal(&self) -> watch::Receiver<bool> {
        self.cancel_tx.subscribe()
    }

    /// Signal cancellation; pending and future prompts resolve as cancelled.
    pub fn signal_cancel(&self) {
        let _ = self.cancel_tx.send(true);
        let _ = self.wakeup_tx.send(());
    }

    pub fn reset_cancel(&self) {
        let _ = self.cancel_tx.send(false);
        while self.wakeup_rx.try_recv().is_ok() {}
    }

    /// Close the prompt channel and join the UI thread.
    pub fn shutdown(mut self) {
        let UiBridge { prompter, ui_thread, .. } = &mut self;
        let (dead_tx, _) = unbounded();
        prompter.tx = dead_tx;
        if let Some(handle) = ui_thread.take() {
            let _ = handle.join();
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::ui::{Prompt, PromptTopic, ScriptedUi};
    use std::time::{Duration, Instant};

    struct SlowUi(Duration);

    impl UiHandler for SlowUi {
        fn prompt(&self, prompt: &Prompt) -> PromptResponse {
            std::thread::sleep(self.0);
            prompt.default_response()
        }
    }

    #[test]
    fn test_prompt_round_trips_through_ui_thread() {
        let ui = Arc::new(ScriptedUi::new().answer(PromptTopic::AudioLayout, PromptResponse::Selected(2)));
        let (bridge, _events) = UiBridge::spawn(ui.clone());
        let prompter = bridge.prompter();

        let worker = std::thread::spawn(move || {
            prompter.ask(Prompt::choice(
                PromptTopic::AudioLayout,
                "Layout",
                "Pick a layout",
                vec!["1".into(), "7".into(), "11".into()],
                0,
            ))
        });
        assert_eq!(worker.join().unwrap(), PromptResponse::Selected(2));
        assert_eq!(ui.asked().len(), 1);
        bridge.shutdown();
    }

    #[test]
    fn test_cancel_short_circuits_prompts() {
        let (bridge, _events) = UiBridge::spawn(Arc::new(ScriptedUi::new()));
        bridge.signal_cancel();
        let response = bridge
            .prompter()
            .ask(Prompt::confirm(PromptTopic::FirmwareType, "Firmware", "UEFI?", true));
        assert_eq!(response, PromptResponse::Cancelled);
        bridge.shutdown();
    }

    #[test]
    fn test_cancel_unblocks_a_waiting_prompt() {
        let (bridge, _events) = UiBridge::spawn(Arc::new(SlowUi(Duration::from_secs(3))));
        let prompter = bridge.prompter();
        let started = Instant::now();
        let worker = std::thread::spawn(move || {
            prompter.ask(Prompt::confirm(PromptTopic::Download, "Download", "Fetch missing files?", true))
        });
        std::thread::sleep(Duration::from_millis(100));
        bridge.signal_cancel();

        assert_eq!(worker.join().unwrap(), PromptResponse::Cancelled);
        assert!(started.elapsed() < Duration::from_secs(2));
        bridge.shutdown();
    }

    #[test]
    fn test_reset_cancel_clears_stale_wakeups() {
        let ui = Arc::new(ScriptedUi::new().answer(PromptTopic::Download, PromptResponse::Confirmed(false)));
        let (bridge, _events) = UiBridge::spawn(ui);
        bridge.signal_cancel();
        bridge.reset_cancel();
        let response = bridge
            .prompter()
            .ask(Prompt::confirm(PromptTopic::Download, "Download", "Fetch missing files?", true));
        assert_eq!(response, PromptResponse::Confirmed(false));
        bridge.shutdown();
    }
}
