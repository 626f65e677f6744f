use crate::input::{PromptRequest, Prompter};
use anyhow::{anyhow, Result};
use std::collections::VecDeque;

/// Replays queued answers. An empty answer takes the prompt's default, and
/// answers the validator rejects are dropped until one passes, the way the
/// terminal re-asks.
#[derive(Debug, Default)]
pub struct Scripted {
    pub answers: VecDeque<String>,
    pub said: Vec<String>,
    pub rejections: Vec<String>,
    pub waits: usize,
    /// Hand back whatever comes next, valid or not.
    pub ignore_validator: bool,
}

impl Scripted {
    pub fn with(answers: &[&str]) -> Self {
        Self {
            answers: answers.iter().map(|s| s.to_string()).collect(),
            ..Self::default()
        }
    }
}

impl Prompter for Scripted {
    fn prompt(&mut self, request: &PromptRequest<'_>) -> Result<String> {
        loop {
            let answer = self
                .answers
                .pop_front()
                .ok_or_else(|| anyhow!("no answer left for '{}'", request.message))?;
            let answer = if answer.is_empty() {
                request.default.unwrap_or_default().to_string()
            } else {
                answer
            };
            match request.validator {
                Some(v) if !self.ignore_validator && !v.accepts(&answer) => {
                    self.rejections.push(v.message().to_string());
                }
                _ => return Ok(answer),
            }
        }
    }

    fn say(&mut self, message: &str) {
        self.said.push(message.to_string());
    }

    fn wait_for_continue(&mut self) -> Result<()> {
        self.waits += 1;
        Ok(())
    }
}
