use crate::wizard::{Context as WizardContext, WizardError};
use anyhow::{anyhow, Context, Result};
use std::fmt;
use std::fs;
use std::path::{Path, PathBuf};
use std::process::Command;
use tracing::info;

/// A program invocation, kept as data so it can be logged and inspected
/// before it runs.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct CommandLine {
    pub program: String,
    pub args: Vec<String>,
    pub cwd: Option<PathBuf>,
}

impl CommandLine {
    pub fn new(program: impl Into<String>) -> Self {
        Self {
            program: program.into(),
            args: Vec::new(),
            cwd: None,
        }
    }

    /// `bash -c <script>`.
    pub fn shell(script: impl Into<String>) -> Self {
        Self::new("bash").arg("-c").arg(script)
    }

    pub fn arg(mut self, arg: impl Into<String>) -> Self {
        self.args.push(arg.into());
        self
    }

    pub fn args<I, S>(mut self, args: I) -> Self
    where
        I: IntoIterator<Item = S>,
        S: Into<String>,
    {
        self.args.extend(args.into_iter().map(Into::into));
        self
    }

    pub fn current_dir(mut self, dir: impl Into<PathBuf>) -> Self {
        self.cwd = Some(dir.into());
        self
    }

    /// Run with output streamed straight to the terminal, so long builds and
    /// `dd` progress stay visible. A non-zero exit is an error.
    pub fn run(&self) -> Result<()> {
        info!(command = %self, cwd = ?self.cwd, "running command");

        let mut cmd = Command::new(&self.program);
        cmd.args(&self.args);
        if let Some(dir) = &self.cwd {
            cmd.current_dir(dir);
        }

        let status = cmd
            .status()
            .with_context(|| format!("Failed to execute command: {}", self))?;
        if !status.success() {
            let code = status
                .code()
                .map(|c| c.to_string())
                .unwrap_or_else(|| "signal".to_string());
            return Err(anyhow!("Command failed (exit code: {}): {}", code, self));
        }
        Ok(())
    }
}

impl fmt::Display for CommandLine {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(&self.program)?;
        for arg in &self.args {
            write!(f, " {}", arg)?;
        }
        Ok(())
    }
}

/// Byte ranges of every `{key}` placeholder in `template`. Braces around
/// anything other than `[A-Za-z0-9_]+`, and shell `${VAR}` expansions, are
/// left alone.
fn placeholder_spans(template: &str) -> Vec<(usize, usize)> {
    let mut spans = Vec::new();
    let mut pos = 0;
    while let Some(offset) = template[pos..].find('{') {
        let open = pos + offset;
        let Some(len) = template[open + 1..].find('}') else {
            break;
        };
        let close = open + 1 + len;
        let key = &template[open + 1..close];
        let shell_var = template[..open].ends_with('$');
        if !shell_var
            && !key.is_empty()
            && key.chars().all(|c| c.is_ascii_alphanumeric() || c == '_')
        {
            spans.push((open, close + 1));
            pos = close + 1;
        } else {
            pos = open + 1;
        }
    }
    spans
}

/// Names referenced by `{key}` placeholders, in order of appearance.
pub fn placeholders(template: &str) -> Vec<&str> {
    placeholder_spans(template)
        .into_iter()
        .map(|(start, end)| &template[start + 1..end - 1])
        .collect()
}

/// Substitute every placeholder through `lookup`. The first key it cannot
/// resolve is returned as the error.
pub fn render<F>(template: &str, mut lookup: F) -> std::result::Result<String, String>
where
    F: FnMut(&str) -> Option<String>,
{
    let mut out = String::with_capacity(template.len());
    let mut last = 0;
    for (start, end) in placeholder_spans(template) {
        let key = &template[start + 1..end - 1];
        let value = lookup(key).ok_or_else(|| key.to_string())?;
        out.push_str(&template[last..start]);
        out.push_str(&value);
        last = end;
    }
    out.push_str(&template[last..]);
    Ok(out)
}

/// Render a shell script, quoting each substituted result.
pub fn render_script(template: &str, ctx: &WizardContext) -> Result<String, WizardError> {
    render(template, |key| ctx.get(key).map(|v| shell_quote(&v.to_string())))
        .map_err(|key| WizardError::MissingResult { key })
}

/// Wrap `s` in single quotes for bash.
pub fn shell_quote(s: &str) -> String {
    format!("'{}'", s.replace('\'', r"'\''"))
}

/// Replace every occurrence of `old` with `new` in the file at `path`.
pub fn replace_in_file(path: &Path, old: &str, new: &str) -> Result<()> {
    let data = fs::read_to_string(path)
        .with_context(|| format!("Failed to read file: {}", path.display()))?;
    fs::write(path, data.replace(old, new))
        .with_context(|| format!("Failed to write file: {}", path.display()))?;
    Ok(())
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn placeholders_skip_non_identifiers() {
        let t = "nix build -o {output_path}/result {output_path}#x ${HOME} {} { bad }";
        assert_eq!(placeholders(t), vec!["output_path", "output_path"]);
    }

    #[test]
    fn render_substitutes_and_reports_missing_key() {
        let got = render("ssh root@{ip_address} -p {port}", |k| match k {
            "ip_address" => Some("10.0.0.5".to_string()),
            "port" => Some("22".to_string()),
            _ => None,
        })
        .unwrap();
        assert_eq!(got, "ssh root@10.0.0.5 -p 22");

        let missing = render("{a}{b}", |k| (k == "a").then(|| "1".to_string())).unwrap_err();
        assert_eq!(missing, "b");
    }

    #[test]
    fn render_script_quotes_results() {
        let mut ctx = WizardContext::new();
        ctx.insert("ssh_pub", "ssh-ed25519 AAAA it's me");
        let script = render_script("echo {ssh_pub} >> keys", &ctx).unwrap();
        assert_eq!(script, r"echo 'ssh-ed25519 AAAA it'\''s me' >> keys");

        let err = render_script("echo {nope}", &ctx).unwrap_err();
        assert!(matches!(err, WizardError::MissingResult { ref key } if key == "nope"));
    }

    #[test]
    fn render_script_leaves_shell_variables_alone() {
        let mut ctx = WizardContext::new();
        ctx.insert("output_path", "/tmp/ghaf");
        assert_eq!(placeholders("cp ${HOME}/x {output_path}"), vec!["output_path"]);

        let script = render_script("cp ${HOME}/.ssh/id.pub {output_path}/", &ctx).unwrap();
        assert_eq!(script, "cp ${HOME}/.ssh/id.pub '/tmp/ghaf'/");
    }

    #[test]
    fn replace_in_file_rewrites_all_occurrences() {
        let tmp = tempfile::tempdir().unwrap();
        let path = tmp.path().join("flake.nix");
        fs::write(&path, "key = \"SSH_KEY\"; again = \"SSH_KEY\";").unwrap();

        replace_in_file(&path, "SSH_KEY", "ssh-ed25519 AAAA").unwrap();

        assert_eq!(
            fs::read_to_string(&path).unwrap(),
            "key = \"ssh-ed25519 AAAA\"; again = \"ssh-ed25519 AAAA\";"
        );
    }

    #[test]
    fn replace_in_missing_file_is_an_error() {
        let tmp = tempfile::tempdir().unwrap();
        assert!(replace_in_file(&tmp.path().join("nope"), "a", "b").is_err());
    }

    #[test]
    fn command_line_display_and_exit_status() {
        let ok = CommandLine::shell("exit 0");
        assert_eq!(ok.to_string(), "bash -c exit 0");
        ok.run().unwrap();

        let err = CommandLine::shell("exit 3").run().unwrap_err();
        assert!(err.to_string().contains("exit code: 3"));
    }

    #[test]
    fn command_line_honours_current_dir() {
        let tmp = tempfile::tempdir().unwrap();
        CommandLine::shell("touch marker")
            .current_dir(tmp.path())
            .run()
            .unwrap();
        assert!(tmp.path().join("marker").exists());
    }
}
