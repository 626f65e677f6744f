//! The step engine: a shared [`Context`], the four step kinds, and the
//! [`Wizard`] loop that runs them in order.

use crate::completion::{Completer, WordCompleter};
use crate::input::{PromptRequest, Prompter};
use crate::validators::{Validator, VariantValidator};
use anyhow::{bail, Result};
use serde::Serialize;
use std::collections::{HashMap, HashSet};
use std::fmt;
use std::path::PathBuf;
use thiserror::Error;
use tracing::{debug, info, warn};

#[derive(Debug, Error)]
pub enum WizardError {
    #[error("step {index} has an empty name")]
    EmptyName { index: usize },

    #[error("step '{name}' has no variants to choose from")]
    NoVariants { name: String },

    #[error("result '{key}' was not recorded by any earlier step")]
    MissingResult { key: String },

    #[error("result '{key}' is not text")]
    NotText { key: String },

    #[error("step {} '{step}' failed", .index + 1)]
    StepFailed {
        step: String,
        index: usize,
        #[source]
        source: Box<dyn std::error::Error + Send + Sync + 'static>,
    },
}

/// A recorded answer or derived value.
#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
#[serde(untagged)]
pub enum Value {
    Text(String),
    Path(PathBuf),
}

impl Value {
    pub fn as_text(&self) -> Option<&str> {
        match self {
            Value::Text(s) => Some(s),
            Value::Path(p) => p.to_str(),
        }
    }
}

impl From<String> for Value {
    fn from(s: String) -> Self {
        Value::Text(s)
    }
}

impl From<&str> for Value {
    fn from(s: &str) -> Self {
        Value::Text(s.to_string())
    }
}

impl From<PathBuf> for Value {
    fn from(p: PathBuf) -> Self {
        Value::Path(p)
    }
}

impl fmt::Display for Value {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Value::Text(s) => f.write_str(s),
            Value::Path(p) => write!(f, "{}", p.display()),
        }
    }
}

/// Run state shared by every step: named results plus the index of the
/// next step to execute.
#[derive(Debug, Default, Clone)]
pub struct Context {
    results: HashMap<String, Value>,
    cursor: usize,
}

impl Context {
    pub fn new() -> Self {
        Self::default()
    }

    /// A context whose first executed step will be `cursor`.
    pub fn starting_at(cursor: usize) -> Self {
        Self {
            results: HashMap::new(),
            cursor,
        }
    }

    pub fn cursor(&self) -> usize {
        self.cursor
    }

    /// Only the wizard loop moves the cursor.
    pub(crate) fn next_step(&mut self) {
        self.cursor += 1;
    }

    pub fn results(&self) -> &HashMap<String, Value> {
        &self.results
    }

    pub fn get(&self, key: &str) -> Option<&Value> {
        self.results.get(key)
    }

    /// Look up a result an earlier step must have written.
    pub fn require(&self, key: &str) -> Result<&Value, WizardError> {
        self.results.get(key).ok_or_else(|| WizardError::MissingResult {
            key: key.to_string(),
        })
    }

    pub fn require_text(&self, key: &str) -> Result<&str, WizardError> {
        self.require(key)?.as_text().ok_or_else(|| WizardError::NotText {
            key: key.to_string(),
        })
    }

    /// Record a result, returning whatever it replaced.
    pub fn insert(&mut self, key: impl Into<String>, value: impl Into<Value>) -> Option<Value> {
        self.results.insert(key.into(), value.into())
    }
}

pub type ActionFn = Box<dyn FnMut(&mut Context) -> Result<()>>;

/// Free-text question.
pub struct Prompt {
    message: String,
    validator: Option<Box<dyn Validator>>,
    completer: Option<Box<dyn Completer>>,
    default: Option<String>,
}

impl Prompt {
    pub fn new(message: impl Into<String>) -> Self {
        Self {
            message: message.into(),
            validator: None,
            completer: None,
            default: None,
        }
    }

    pub fn with_validator(mut self, validator: Box<dyn Validator>) -> Self {
        self.validator = Some(validator);
        self
    }

    pub fn with_completer(mut self, completer: Box<dyn Completer>) -> Self {
        self.completer = Some(completer);
        self
    }

    pub fn default_value(mut self, default: impl Into<String>) -> Self {
        self.default = Some(default.into());
        self
    }

    fn ask(&self, io: &mut dyn Prompter) -> Result<String> {
        io.prompt(&PromptRequest {
            message: &self.message,
            validator: self.validator.as_deref(),
            completer: self.completer.as_deref(),
            default: self.default.as_deref(),
        })
    }
}

/// Question whose answer must be one of a closed set of variants.
pub struct Choice {
    message: String,
    completer: WordCompleter,
    validator: VariantValidator,
}

impl Choice {
    fn ask(&self, io: &mut dyn Prompter) -> Result<String> {
        let answer = io.prompt(&PromptRequest {
            message: &self.message,
            validator: Some(&self.validator),
            completer: Some(&self.completer),
            default: None,
        })?;
        // The input source is trusted to re-ask, but never record an outsider.
        if !self.validator.accepts(&answer) {
            bail!("{} (got '{}')", self.validator.message(), answer);
        }
        Ok(answer)
    }
}

pub enum StepKind {
    Prompt(Prompt),
    Choice(Choice),
    Wait { message: String },
    Action { info: String, op: ActionFn },
}

pub struct Step {
    name: String,
    kind: StepKind,
}

impl Step {
    pub fn prompt(name: impl Into<String>, prompt: Prompt) -> Self {
        Self {
            name: name.into(),
            kind: StepKind::Prompt(prompt),
        }
    }

    /// Fails immediately when `variants` is empty; such a step could never
    /// be answered.
    pub fn variants(
        name: impl Into<String>,
        message: impl Into<String>,
        variants: Vec<String>,
    ) -> Result<Self, WizardError> {
        let name = name.into();
        if variants.is_empty() {
            return Err(WizardError::NoVariants { name });
        }
        Ok(Self {
            name,
            kind: StepKind::Choice(Choice {
                message: message.into(),
                completer: WordCompleter::new(&variants).match_middle(),
                validator: VariantValidator::new(&variants),
            }),
        })
    }

    pub fn wait(name: impl Into<String>, message: impl Into<String>) -> Self {
        Self {
            name: name.into(),
            kind: StepKind::Wait {
                message: message.into(),
            },
        }
    }

    pub fn action<F>(name: impl Into<String>, info: impl Into<String>, op: F) -> Self
    where
        F: FnMut(&mut Context) -> Result<()> + 'static,
    {
        Self {
            name: name.into(),
            kind: StepKind::Action {
                info: info.into(),
                op: Box::new(op),
            },
        }
    }

    pub fn kind_label(&self) -> &'static str {
        match self.kind {
            StepKind::Prompt(_) => "prompt",
            StepKind::Choice(_) => "variants",
            StepKind::Wait { .. } => "wait",
            StepKind::Action { .. } => "action",
        }
    }

    /// Whether the step always records exactly one result under its name.
    fn records_answer(&self) -> bool {
        matches!(self.kind, StepKind::Prompt(_) | StepKind::Choice(_))
    }

    pub fn run(&mut self, ctx: &mut Context, io: &mut dyn Prompter) -> Result<()> {
        match &mut self.kind {
            StepKind::Prompt(prompt) => {
                let answer = prompt.ask(io)?;
                ctx.insert(self.name.clone(), answer);
            }
            StepKind::Choice(choice) => {
                let answer = choice.ask(io)?;
                ctx.insert(self.name.clone(), answer);
            }
            StepKind::Wait { message } => {
                io.say(message);
                io.wait_for_continue()?;
            }
            StepKind::Action { info, op } => {
                io.say(info);
                op(ctx)?;
            }
        }
        Ok(())
    }
}

impl fmt::Debug for Step {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("Step")
            .field("name", &self.name)
            .field("kind", &self.kind_label())
            .finish()
    }
}

#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub enum StepStatus {
    #[default]
    Pending,
    Running,
    Skipped,
    Success,
    Failed,
}

impl StepStatus {
    pub fn marker(self) -> &'static str {
        match self {
            StepStatus::Pending => "[ ]",
            StepStatus::Running => "[>]",
            StepStatus::Skipped => "[-]",
            StepStatus::Success => "[✓]",
            StepStatus::Failed => "[✗]",
        }
    }
}

/// Drives an ordered list of steps against a single [`Context`].
#[derive(Debug)]
pub struct Wizard {
    steps: Vec<Step>,
    ctx: Context,
    statuses: Vec<StepStatus>,
}

impl Wizard {
    pub fn new(steps: Vec<Step>) -> Result<Self, WizardError> {
        Self::resume(steps, Context::new())
    }

    /// Continue from `ctx.cursor()`, keeping any results it already holds.
    /// Steps before the cursor are marked skipped and never run.
    pub fn resume(steps: Vec<Step>, ctx: Context) -> Result<Self, WizardError> {
        let mut answered = HashSet::new();
        for (index, step) in steps.iter().enumerate() {
            if step.name.trim().is_empty() {
                return Err(WizardError::EmptyName { index });
            }
            if step.records_answer() && !answered.insert(step.name.as_str()) {
                warn!(
                    step = %step.name,
                    "step name repeats; the later answer overwrites the earlier one"
                );
            }
        }

        let statuses = (0..steps.len())
            .map(|i| {
                if i < ctx.cursor() {
                    StepStatus::Skipped
                } else {
                    StepStatus::Pending
                }
            })
            .collect();

        Ok(Self {
            steps,
            ctx,
            statuses,
        })
    }

    /// Run every remaining step in order. On failure the cursor stays on the
    /// failed step and earlier results are left untouched.
    pub fn evaluate(&mut self, io: &mut dyn Prompter) -> Result<(), WizardError> {
        while let Some(step) = self.steps.get_mut(self.ctx.cursor()) {
            let index = self.ctx.cursor();
            self.statuses[index] = StepStatus::Running;
            info!(step = %step.name, index, kind = step.kind_label(), "running step");

            if let Err(e) = step.run(&mut self.ctx, io) {
                self.statuses[index] = StepStatus::Failed;
                return Err(WizardError::StepFailed {
                    step: step.name.clone(),
                    index,
                    source: e.into(),
                });
            }

            debug!(step = %step.name, "step finished");
            self.statuses[index] = StepStatus::Success;
            self.ctx.next_step();
        }
        Ok(())
    }

    pub fn is_done(&self) -> bool {
        self.ctx.cursor() >= self.steps.len()
    }

    pub fn results(&self) -> &HashMap<String, Value> {
        self.ctx.results()
    }

    pub fn context(&self) -> &Context {
        &self.ctx
    }

    /// Step names paired with their current status, in run order.
    pub fn statuses(&self) -> impl Iterator<Item = (&str, StepStatus)> + '_ {
        self.steps
            .iter()
            .map(|s| s.name.as_str())
            .zip(self.statuses.iter().copied())
    }
}
