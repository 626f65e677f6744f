use crate::completion::{Completer, PathCompleter};
use crate::executor::{placeholders, render, render_script, CommandLine};
use crate::tasks::Task;
use crate::validators::{
    is_available_blk_device, is_ip_address, is_pub_ssh_key, FnValidator, Validator,
};
use crate::wizard::{Prompt, Step};
use anyhow::{anyhow, bail, Context, Result};
use serde::Deserialize;
use std::collections::{HashMap, HashSet};
use std::fs;
use std::path::Path;

/// The Ghaf installation flow shipped with the binary.
pub const DEFAULT_FLOW: &str = include_str!("../flows/ghaf.yaml");

#[derive(Debug, Deserialize)]
pub struct StepFile {
    /// Printed once before the first step.
    #[serde(default)]
    pub banner: Option<String>,

    /// Programs that must be on PATH before the flow starts.
    #[serde(default)]
    pub required_tools: Vec<String>,

    pub steps: Vec<StepDef>,
}

#[derive(Debug, Deserialize)]
pub struct StepDef {
    pub name: String,

    #[serde(flatten)]
    pub kind: StepDefKind,
}

#[derive(Debug, Deserialize)]
#[serde(tag = "type", rename_all = "snake_case")]
pub enum StepDefKind {
    Prompt {
        message: String,
        #[serde(default)]
        default: Option<String>,
        #[serde(default)]
        validator: Option<ValidatorKind>,
        #[serde(default)]
        completer: Option<CompleterKind>,
    },

    Variants {
        message: String,
        variants: Vec<String>,
    },

    Wait {
        message: String,
    },

    Action {
        info: String,
        #[serde(default)]
        task: Option<Task>,
        /// Shell text; `{key}` is replaced by the quoted result `key`.
        #[serde(default)]
        script: Option<String>,
    },
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum ValidatorKind {
    SshKey,
    BlockDevice,
    IpAddress,
}

impl ValidatorKind {
    fn build(self) -> Box<dyn Validator> {
        match self {
            ValidatorKind::SshKey => Box::new(FnValidator::new(is_pub_ssh_key, "Invalid ssh key")),
            ValidatorKind::BlockDevice => Box::new(FnValidator::new(
                is_available_blk_device,
                "Invalid block device path",
            )),
            ValidatorKind::IpAddress => {
                Box::new(FnValidator::new(is_ip_address, "Invalid ip address"))
            }
        }
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum CompleterKind {
    Path,
}

impl CompleterKind {
    fn build(self) -> Box<dyn Completer> {
        match self {
            CompleterKind::Path => Box::new(PathCompleter),
        }
    }
}

impl StepDef {
    /// Results this step reads when it runs.
    fn requires(&self) -> Vec<&str> {
        match &self.kind {
            StepDefKind::Action {
                task: Some(task), ..
            } => task.requires().to_vec(),
            StepDefKind::Action {
                script: Some(script),
                ..
            } => placeholders(script),
            _ => Vec::new(),
        }
    }

    /// Results this step records.
    fn produces(&self) -> Vec<&str> {
        match &self.kind {
            StepDefKind::Prompt { .. } | StepDefKind::Variants { .. } => vec![self.name.as_str()],
            StepDefKind::Action {
                task: Some(task), ..
            } => task.produces().to_vec(),
            _ => Vec::new(),
        }
    }
}

/// Values available to `{var}` placeholders in prompt defaults.
#[derive(Debug, Clone, Default)]
pub struct FlowEnv {
    vars: HashMap<String, String>,
}

impl FlowEnv {
    /// Resolve `{config_dir}` to the user's Ghaf config directory, creating it.
    pub fn detect() -> Result<Self> {
        let dir = dirs::config_dir()
            .ok_or_else(|| anyhow!("Could not determine the user config directory"))?
            .join("Ghaf");
        fs::create_dir_all(&dir)
            .with_context(|| format!("Failed to create config directory: {}", dir.display()))?;
        Ok(Self::default().with_var("config_dir", dir.display().to_string()))
    }

    pub fn with_var(mut self, key: impl Into<String>, value: impl Into<String>) -> Self {
        self.vars.insert(key.into(), value.into());
        self
    }
}

impl StepFile {
    pub fn parse(yaml: &str) -> Result<Self> {
        serde_yaml::from_str(yaml).context("Failed to parse YAML")
    }

    pub fn load(path: &Path) -> Result<Self> {
        let content = fs::read_to_string(path)
            .with_context(|| format!("Failed to read {}", path.display()))?;
        Self::parse(&content)
    }

    pub fn validate(&self) -> Result<()> {
        if self.steps.is_empty() {
            return Err(anyhow!("YAML must contain at least one step."));
        }

        for (i, step) in self.steps.iter().enumerate() {
            if step.name.trim().is_empty() {
                return Err(anyhow!("Step {} has an empty name.", i));
            }

            match &step.kind {
                StepDefKind::Prompt { .. } | StepDefKind::Wait { .. } => {}
                StepDefKind::Variants { variants, .. } => {
                    if variants.is_empty() {
                        return Err(anyhow!(
                            "Step '{}' (variants) must list at least one variant.",
                            step.name
                        ));
                    }
                }
                StepDefKind::Action { task, script, .. } => match (task, script) {
                    (Some(_), Some(_)) => {
                        return Err(anyhow!(
                            "Step '{}' (action) has both 'task' and 'script'; pick one.",
                            step.name
                        ));
                    }
                    (None, None) => {
                        return Err(anyhow!(
                            "Step '{}' (action) is missing 'task' or 'script' field.",
                            step.name
                        ));
                    }
                    (None, Some(script)) if script.trim().is_empty() => {
                        return Err(anyhow!("Step '{}' (action) has an empty 'script'.", step.name));
                    }
                    _ => {}
                },
            }
        }

        Ok(())
    }

    /// Check that every action running from `start` onwards only reads
    /// results recorded by an earlier step in that range or by `seeded`.
    pub fn check_dependencies(&self, start: usize, seeded: &HashSet<String>) -> Result<()> {
        let mut recorded: HashSet<&str> = seeded.iter().map(String::as_str).collect();

        for step in self.steps.iter().skip(start) {
            for key in step.requires() {
                if !recorded.contains(key) {
                    bail!(
                        "Step '{}' needs '{}', but no earlier step records it.",
                        step.name,
                        key
                    );
                }
            }
            recorded.extend(step.produces());
        }

        Ok(())
    }

    /// Index of the step named `target`, or `target` itself when it is a
    /// number within range.
    pub fn position(&self, target: &str) -> Result<usize> {
        if let Ok(index) = target.parse::<usize>() {
            if index < self.steps.len() {
                return Ok(index);
            }
            bail!(
                "Step index {} is out of range (flow has {} steps).",
                index,
                self.steps.len()
            );
        }
        self.steps
            .iter()
            .position(|s| s.name == target)
            .ok_or_else(|| anyhow!("No step named '{}'.", target))
    }

    /// Turn the definitions into runnable steps.
    pub fn into_steps(self, env: &FlowEnv) -> Result<Vec<Step>> {
        self.steps
            .into_iter()
            .map(|def| build_step(def, env))
            .collect()
    }
}

fn build_step(def: StepDef, env: &FlowEnv) -> Result<Step> {
    let StepDef { name, kind } = def;
    let step = match kind {
        StepDefKind::Prompt {
            message,
            default,
            validator,
            completer,
        } => {
            let mut prompt = Prompt::new(message);
            if let Some(default) = default {
                let default = render(&default, |var| env.vars.get(var).cloned()).map_err(|var| {
                    anyhow!("Step '{}' default uses unknown variable '{{{}}}'.", name, var)
                })?;
                prompt = prompt.default_value(default);
            }
            if let Some(validator) = validator {
                prompt = prompt.with_validator(validator.build());
            }
            if let Some(completer) = completer {
                prompt = prompt.with_completer(completer.build());
            }
            Step::prompt(name, prompt)
        }
        StepDefKind::Variants { message, variants } => Step::variants(name, message, variants)?,
        StepDefKind::Wait { message } => Step::wait(name, message),
        StepDefKind::Action { info, task, script } => match (task, script) {
            (Some(task), None) => Step::action(name, info, move |ctx| task.run(ctx)),
            (None, Some(script)) => Step::action(name, info, move |ctx| {
                let rendered = render_script(&script, ctx)?;
                CommandLine::shell(rendered).run()
            }),
            _ => bail!("Step '{}' (action) needs exactly one of 'task' or 'script'.", name),
        },
    };
    Ok(step)
}
