use crate::completion::Completer;
use crate::validators::Validator;
use anyhow::{bail, Context, Result};
use crossterm::event::{self, Event, KeyCode, KeyEvent, KeyEventKind, KeyModifiers};
use crossterm::terminal::{disable_raw_mode, enable_raw_mode};
use dialoguer::theme::ColorfulTheme;
use dialoguer::{Completion, Input};
use std::io::{stdout, Write};

/// Everything a prompting step hands to the input source.
pub struct PromptRequest<'a> {
    pub message: &'a str,
    pub validator: Option<&'a dyn Validator>,
    pub completer: Option<&'a dyn Completer>,
    pub default: Option<&'a str>,
}

pub trait Prompter {
    /// Block until the user supplies an answer. Implementations own the
    /// reject/re-ask loop: the returned value always passes `request.validator`.
    fn prompt(&mut self, request: &PromptRequest<'_>) -> Result<String>;

    /// Show a message on the user-visible output channel.
    fn say(&mut self, message: &str);

    /// Block until the user signals that the run may continue.
    fn wait_for_continue(&mut self) -> Result<()>;
}

/// Interactive prompter on the controlling terminal.
pub struct TerminalPrompter {
    theme: ColorfulTheme,
}

impl TerminalPrompter {
    pub fn new() -> Self {
        Self {
            theme: ColorfulTheme::default(),
        }
    }
}

impl Default for TerminalPrompter {
    fn default() -> Self {
        Self::new()
    }
}

struct CompleterBridge<'a>(&'a dyn Completer);

impl Completion for CompleterBridge<'_> {
    fn get(&self, input: &str) -> Option<String> {
        self.0.suggest(input).next()
    }
}

impl Prompter for TerminalPrompter {
    fn prompt(&mut self, request: &PromptRequest<'_>) -> Result<String> {
        let completion = request.completer.map(CompleterBridge);

        let mut input = Input::<String>::with_theme(&self.theme)
            .with_prompt(request.message.trim_end())
            .allow_empty(true);

        if let Some(default) = request.default {
            input = input.with_initial_text(default);
        }
        if let Some(completion) = &completion {
            input = input.completion_with(completion);
        }
        if let Some(validator) = request.validator {
            input = input.validate_with(move |text: &String| -> Result<(), String> {
                if validator.accepts(text) {
                    Ok(())
                } else {
                    Err(validator.message().to_string())
                }
            });
        }

        let answer = input.interact_text().context("Failed to read answer")?;
        Ok(answer)
    }

    fn say(&mut self, message: &str) {
        println!("{}", message);
    }

    fn wait_for_continue(&mut self) -> Result<()> {
        print!("Press any key to continue: ");
        stdout().flush().context("Failed to flush stdout")?;

        let pressed = {
            let _raw = RawMode::enable()?;
            wait_for_key()
        };
        println!();
        pressed
    }
}

fn wait_for_key() -> Result<()> {
    loop {
        if let Event::Key(KeyEvent {
            code,
            modifiers,
            kind: KeyEventKind::Press,
            ..
        }) = event::read().context("Failed to read terminal event")?
        {
            // Raw mode swallows SIGINT, so honour Ctrl-C by hand.
            if code == KeyCode::Char('c') && modifiers.contains(KeyModifiers::CONTROL) {
                bail!("interrupted");
            }
            return Ok(());
        }
    }
}

/// Keeps the terminal in raw mode for as long as it is alive.
struct RawMode;

impl RawMode {
    fn enable() -> Result<Self> {
        enable_raw_mode().context("Failed to enable raw mode")?;
        Ok(Self)
    }
}

impl Drop for RawMode {
    fn drop(&mut self) {
        let _ = disable_raw_mode();
    }
}
