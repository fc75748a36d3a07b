//! Interactive terminal handler.

use std::io::{self, BufRead, Write};
use std::sync::Mutex;

use super::{BuildEvent, Prompt, PromptKind, PromptResponse, ProgressStatus, UiHandler};

/// Reads answers from stdin and prints events to stderr.
pub struct ConsoleUi {
    /// Serializes terminal access between prompts and events.
    lock: Mutex<()>,
    verbose: bool,
}

impl ConsoleUi {
    pub fn new(verbose: bool) -> Self {
        ConsoleUi {
            lock: Mutex::new(()),
            verbose,
        }
    }

    fn read_line() -> Option<String> {
        let mut line = String::new();
        match io::stdin().lock().read_line(&mut line) {
            Ok(0) | Err(_) => None,
            Ok(_) => Some(line.trim().to_string()),
        }
    }
}

/// Interpret a typed answer. Empty input picks the default; `q` cancels.
pub fn parse_answer(prompt: &Prompt, input: Option<&str>) -> PromptResponse {
    let input = match input {
        None => return PromptResponse::Cancelled,
        Some(s) => s.trim().to_lowercase(),
    };
    if input == "q" || input == "quit" {
        return PromptResponse::Cancelled;
    }
    if input.is_empty() {
        return prompt.default_response();
    }
    match prompt.kind {
        PromptKind::Confirm => match input.as_str() {
            "y" | "yes" => PromptResponse::Confirmed(true),
            "n" | "no" => PromptResponse::Confirmed(false),
            _ => prompt.default_response(),
        },
        PromptKind::Choice => match input.parse::<usize>() {
            Ok(n) if n >= 1 && n <= prompt.options.len() => PromptResponse::Selected(n - 1),
            _ => prompt.default_response(),
        },
    }
}

impl UiHandler for ConsoleUi {
    fn prompt(&self, prompt: &Prompt) -> PromptResponse {
        let _guard = self.lock.lock();
        let mut err = io::stderr();
        let _ = writeln!(err, "\n== {} ==\n{}", prompt.title, prompt.text);
        match prompt.kind {
            PromptKind::Confirm => {
                let hint = if prompt.default == 0 { "[Y/n]" } else { "[y/N]" };
                let _ = write!(err, "{} ", hint);
            }
            PromptKind::Choice => {
                for (i, option) in prompt.options.iter().enumerate() {
                    let marker = if i == prompt.default { "*" } else { " " };
                    let _ = writeln!(err, " {}{}. {}", marker, i + 1, option);
                }
                let _ = write!(err, "Choice [{}]: ", prompt.default + 1);
            }
        }
        let _ = err.flush();
        parse_answer(prompt, Self::read_line().as_deref())
    }

    fn on_event(&self, event: &BuildEvent) {
        let _guard = self.lock.lock();
        match event {
            BuildEvent::Progress(p) => {
                if self.verbose || p.status != ProgressStatus::Processing {
                    eprintln!("[{}/{}] {:<10} {}", p.step, p.total, p.phase, p.message);
                }
            }
            BuildEvent::PhaseChanged(phase) => eprintln!(">> {}", phase),
            BuildEvent::Log(line) => {
                if self.verbose {
                    eprintln!("{}", line);
                }
            }
            BuildEvent::BuildComplete { success, output, message, .. } => {
                if *success {
                    let path = output.as_ref().map(|p| p.display().to_string()).unwrap_or_default();
                    eprintln!("Build complete: {}", path);
                } else {
                    eprintln!("Build failed: {}", message);
                }
            }
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::ui::PromptTopic;

    #[test]
    fn test_parse_answer() {
        let choice = Prompt::choice(PromptTopic::AudioLayout, "", "", vec!["1".into(), "7".into(), "11".into()], 2);
        assert_eq!(parse_answer(&choice, Some("")), PromptResponse::Selected(2));
        assert_eq!(parse_answer(&choice, Some("1")), PromptResponse::Selected(0));
        assert_eq!(parse_answer(&choice, Some("9")), PromptResponse::Selected(2));
        assert_eq!(parse_answer(&choice, Some("q")), PromptResponse::Cancelled);
        assert_eq!(parse_answer(&choice, None), PromptResponse::Cancelled);

        let confirm = Prompt::confirm(PromptTopic::FirmwareType, "", "", true);
        assert_eq!(parse_answer(&confirm, Some("n")), PromptResponse::Confirmed(false));
    }
}
