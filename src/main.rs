mod completion;
mod executor;
mod input;
mod logging;
mod model;
mod preflight;
mod tasks;
#[cfg(test)]
mod test_support;
mod validators;
mod wizard;

use anyhow::{Context as _, Result};
use clap::Parser;
use input::{Prompter, TerminalPrompter};
use model::{FlowEnv, StepFile, DEFAULT_FLOW};
use std::collections::{BTreeMap, HashMap, HashSet};
use std::path::PathBuf;
use wizard::{Context, Value, Wizard};

#[derive(Parser)]
#[command(name = "ghaf-wizard", version, about = "Helps you install Ghaf.")]
struct Cli {
    /// Flow file to run instead of the built-in Ghaf installer flow.
    #[arg(long, value_name = "FILE")]
    steps: Option<PathBuf>,

    /// Resume at this step, given by name or zero-based index.
    #[arg(long, value_name = "STEP")]
    start_at: Option<String>,

    /// Record a result before the run starts (repeatable), e.g.
    /// `--set output_path=/home/me/.config/Ghaf`.
    #[arg(long = "set", value_name = "KEY=VALUE", value_parser = parse_key_value)]
    set: Vec<(String, String)>,

    /// Skip the check for required tools.
    #[arg(long)]
    skip_preflight: bool,
}

fn parse_key_value(s: &str) -> Result<(String, String), String> {
    let (key, value) = s
        .split_once('=')
        .ok_or_else(|| format!("expected KEY=VALUE, got '{}'", s))?;
    let key = key.trim();
    if key.is_empty() {
        return Err(format!("empty key in '{}'", s));
    }
    Ok((key.to_string(), value.to_string()))
}

fn main() {
    logging::init();

    if let Err(err) = run(Cli::parse()) {
        eprintln!("Error: {:#}", err);
        std::process::exit(1);
    }
}

fn run(cli: Cli) -> Result<()> {
    let flow = match &cli.steps {
        Some(path) => StepFile::load(path)?,
        None => StepFile::parse(DEFAULT_FLOW)?,
    };
    flow.validate().context("YAML failed validation")?;

    let start = match &cli.start_at {
        Some(target) => flow.position(target)?,
        None => 0,
    };
    let mut ctx = Context::starting_at(start);
    for (key, value) in cli.set {
        ctx.insert(key, value);
    }
    let seeded: HashSet<String> = ctx.results().keys().cloned().collect();
    flow.check_dependencies(start, &seeded)
        .context("Flow cannot run from the requested step")?;

    if !cli.skip_preflight {
        preflight::check_required_tools(&flow.required_tools)?;
    }

    let mut io = TerminalPrompter::new();
    if let Some(banner) = &flow.banner {
        io.say(banner);
    }

    let env = FlowEnv::detect()?;
    let steps = flow.into_steps(&env)?;
    let mut wizard = if start == 0 && seeded.is_empty() {
        Wizard::new(steps)?
    } else {
        Wizard::resume(steps, ctx)?
    };

    if let Err(e) = wizard.evaluate(&mut io) {
        tracing::info!(cursor = wizard.context().cursor(), "run halted");
        print_summary(&wizard);
        return Err(e.into());
    }
    tracing::debug!(done = wizard.is_done(), "run finished");

    print!("{}", render_results(wizard.results())?);
    Ok(())
}

fn print_summary(wizard: &Wizard) {
    eprintln!();
    for (name, status) in wizard.statuses() {
        eprintln!("{} {}", status.marker(), name);
    }
    eprintln!();
}

/// Final results as YAML with sorted keys.
fn render_results(results: &HashMap<String, Value>) -> Result<String> {
    let sorted: BTreeMap<&String, &Value> = results.iter().collect();
    serde_yaml::to_string(&sorted).context("Failed to serialize results")
}

#[cfg(test)]
mod tests {
    use super::*;
    use clap::CommandFactory;

    #[test]
    fn cli_definition_is_consistent() {
        Cli::command().debug_assert();
    }

    #[test]
    fn parses_resume_flags() {
        let cli = Cli::try_parse_from([
            "ghaf-wizard",
            "--start-at",
            "ip_address",
            "--set",
            "output_path=/tmp/ghaf",
            "--set",
            "note=a=b",
        ])
        .unwrap();
        assert_eq!(cli.start_at.as_deref(), Some("ip_address"));
        assert_eq!(
            cli.set,
            vec![
                ("output_path".to_string(), "/tmp/ghaf".to_string()),
                ("note".to_string(), "a=b".to_string()),
            ]
        );
        assert!(!cli.skip_preflight);
    }

    #[test]
    fn rejects_malformed_set() {
        assert!(Cli::try_parse_from(["ghaf-wizard", "--set", "novalue"]).is_err());
        assert!(Cli::try_parse_from(["ghaf-wizard", "--set", "=x"]).is_err());
    }

    #[test]
    fn results_render_sorted() {
        let mut ctx = Context::new();
        ctx.insert("ssh_pub", "ssh-ed25519 AAAA");
        ctx.insert("base_system", "generic-x86_64");
        ctx.insert("flake_path", PathBuf::from("/tmp/ghaf/flake.nix"));

        let yaml = render_results(ctx.results()).unwrap();

        assert_eq!(
            yaml,
            "base_system: generic-x86_64\n\
             flake_path: /tmp/ghaf/flake.nix\n\
             ssh_pub: ssh-ed25519 AAAA\n"
        );
    }
}
