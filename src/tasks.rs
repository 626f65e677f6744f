//! Built-in actions of the Ghaf installation flow.
//!
//! Each task reads the answers it needs from the [`Context`], turns them into
//! [`CommandLine`]s and runs them. Command construction is kept separate from
//! execution so the exact invocations can be checked without `nix` around.

use crate::executor::{replace_in_file, CommandLine};
use crate::wizard::Context;
use anyhow::{anyhow, Context as _, Result};
use serde::Deserialize;
use std::fs;
use std::path::{Path, PathBuf};
use tracing::warn;

const GHAF_TEMPLATE: &str = "github:tiiuae/ghaf#target-x86_64-generic";
const TEMPLATE_TARGET: &str = "generic-x86_64-debug";
const FLAKE_TARGET: &str = "PROJ_NAME-ghaf-debug";
const NIXOS_ANYWHERE: &str = "github:nix-community/nixos-anywhere";

#[derive(Debug, Clone, Copy, PartialEq, Eq, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum Task {
    GenerateTemplate,
    BuildInstallerImage,
    FlashInstallerImage,
    InstallConfig,
}

impl Task {
    /// Results that must already be recorded when the task runs.
    pub fn requires(self) -> &'static [&'static str] {
        match self {
            Task::GenerateTemplate => {
                &["output_path", "base_system", "ssh_pub", "target_drive_path"]
            }
            Task::BuildInstallerImage => &["output_path"],
            Task::FlashInstallerImage => &["output_path", "installer_image_flush_device"],
            Task::InstallConfig => &["output_path", "ip_address"],
        }
    }

    /// Results the task records for later steps.
    pub fn produces(self) -> &'static [&'static str] {
        match self {
            Task::GenerateTemplate => &["flake_path"],
            Task::FlashInstallerImage => &["installer_iso"],
            Task::BuildInstallerImage | Task::InstallConfig => &[],
        }
    }

    pub fn run(self, ctx: &mut Context) -> Result<()> {
        match self {
            Task::GenerateTemplate => generate_template(ctx),
            Task::BuildInstallerImage => build_installer_image(ctx),
            Task::FlashInstallerImage => flash_installer_image(ctx),
            Task::InstallConfig => install_config(ctx),
        }
    }
}

fn output_path(ctx: &Context) -> Result<PathBuf> {
    Ok(PathBuf::from(ctx.require_text("output_path")?))
}

fn generate_template(ctx: &mut Context) -> Result<()> {
    let out = output_path(ctx)?;
    let base_system = ctx.require_text("base_system")?;
    let ssh_pub = ctx.require_text("ssh_pub")?;
    let drive = ctx.require_text("target_drive_path")?;

    fs::create_dir_all(&out)
        .with_context(|| format!("Failed to create output directory: {}", out.display()))?;

    let flake = out.join("flake.nix");
    if flake.exists() {
        warn!(path = %flake.display(), "flake already present; skipping template init");
    } else {
        flake_init(&out).run()?;
    }
    customize_flake(&flake, base_system, ssh_pub, drive)?;

    ctx.insert("flake_path", flake);
    Ok(())
}

fn flake_init(out: &Path) -> CommandLine {
    CommandLine::new("nix")
        .args(["flake", "init", "-t", GHAF_TEMPLATE])
        .current_dir(out)
}

/// Point the template at the chosen board, key and install drive.
fn customize_flake(flake: &Path, base_system: &str, ssh_pub: &str, drive: &str) -> Result<()> {
    replace_in_file(flake, TEMPLATE_TARGET, &format!("{}-debug", base_system))?;
    replace_in_file(flake, "SSH_KEY", ssh_pub)?;
    replace_in_file(flake, "DRIVE_PATH", drive)?;
    Ok(())
}

fn build_installer_image(ctx: &mut Context) -> Result<()> {
    build_installer(&output_path(ctx)?).run()
}

fn build_installer(out: &Path) -> CommandLine {
    let out = out.display();
    CommandLine::new("nix").args([
        "build".to_string(),
        "-o".to_string(),
        format!("{}/result", out),
        format!(
            "{}#nixosConfigurations.{}.config.system.build.installer",
            out, FLAKE_TARGET
        ),
    ])
}

fn flash_installer_image(ctx: &mut Context) -> Result<()> {
    let out = output_path(ctx)?;
    let device = ctx.require_text("installer_image_flush_device")?.to_string();

    let iso = find_installer_iso(&out)?;
    flash(&iso, &device).run()?;
    CommandLine::new("sync").run()?;

    ctx.insert("installer_iso", iso);
    Ok(())
}

fn find_installer_iso(out: &Path) -> Result<PathBuf> {
    let pattern = format!(
        "{}/result/iso/nixos-*-linux.iso",
        glob::Pattern::escape(&out.display().to_string())
    );
    let mut isos: Vec<PathBuf> = glob::glob(&pattern)
        .with_context(|| format!("Invalid glob pattern: {}", pattern))?
        .filter_map(|entry| entry.ok())
        .collect();
    isos.sort();
    isos.into_iter()
        .next()
        .ok_or_else(|| anyhow!("No installer image matches {}", pattern))
}

fn flash(iso: &Path, device: &str) -> CommandLine {
    CommandLine::new("sudo").args([
        "dd".to_string(),
        format!("if={}", iso.display()),
        format!("of={}", device),
        "conv=sync".to_string(),
        "status=progress".to_string(),
    ])
}

fn install_config(ctx: &mut Context) -> Result<()> {
    let out = output_path(ctx)?;
    let ip = ctx.require_text("ip_address")?;
    nixos_anywhere(&out, ip).run()
}

fn nixos_anywhere(out: &Path, ip: &str) -> CommandLine {
    CommandLine::new("nix").args([
        "run".to_string(),
        NIXOS_ANYWHERE.to_string(),
        "--".to_string(),
        "--flake".to_string(),
        format!("{}#{}", out.display(), FLAKE_TARGET),
        format!("root@{}", ip),
    ])
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn flake_init_runs_inside_output_dir() {
        let cmd = flake_init(Path::new("/tmp/ghaf"));
        assert_eq!(
            cmd.to_string(),
            "nix flake init -t github:tiiuae/ghaf#target-x86_64-generic"
        );
        assert_eq!(cmd.cwd.as_deref(), Some(Path::new("/tmp/ghaf")));
    }

    #[test]
    fn customize_flake_fills_in_answers() {
        let tmp = tempfile::tempdir().unwrap();
        let flake = tmp.path().join("flake.nix");
        fs::write(
            &flake,
            "target = \"generic-x86_64-debug\";\nkey = \"SSH_KEY\";\ndisk = \"DRIVE_PATH\";\n",
        )
        .unwrap();

        customize_flake(
            &flake,
            "lenovo-x1-carbon-gen11",
            "ssh-ed25519 AAAA",
            "/dev/nvme0n1",
        )
        .unwrap();

        assert_eq!(
            fs::read_to_string(&flake).unwrap(),
            "target = \"lenovo-x1-carbon-gen11-debug\";\n\
             key = \"ssh-ed25519 AAAA\";\n\
             disk = \"/dev/nvme0n1\";\n"
        );
    }

    #[test]
    fn build_and_install_commands() {
        let out = Path::new("/home/me/.config/Ghaf");
        assert_eq!(
            build_installer(out).to_string(),
            "nix build -o /home/me/.config/Ghaf/result \
             /home/me/.config/Ghaf#nixosConfigurations.PROJ_NAME-ghaf-debug\
             .config.system.build.installer"
        );
        assert_eq!(
            nixos_anywhere(out, "192.168.1.20").to_string(),
            "nix run github:nix-community/nixos-anywhere -- \
             --flake /home/me/.config/Ghaf#PROJ_NAME-ghaf-debug root@192.168.1.20"
        );
    }

    #[test]
    fn flash_uses_dd_with_progress() {
        let cmd = flash(Path::new("/out/result/iso/nixos-24.05-x86_64-linux.iso"), "/dev/sdb");
        assert_eq!(cmd.program, "sudo");
        assert_eq!(
            cmd.args,
            vec![
                "dd",
                "if=/out/result/iso/nixos-24.05-x86_64-linux.iso",
                "of=/dev/sdb",
                "conv=sync",
                "status=progress",
            ]
        );
    }

    #[test]
    fn finds_first_installer_iso() {
        let tmp = tempfile::tempdir().unwrap();
        let iso_dir = tmp.path().join("result").join("iso");
        fs::create_dir_all(&iso_dir).unwrap();
        fs::write(iso_dir.join("nixos-24.05-x86_64-linux.iso"), "").unwrap();
        fs::write(iso_dir.join("nixos-23.11-x86_64-linux.iso"), "").unwrap();
        fs::write(iso_dir.join("readme.txt"), "").unwrap();

        let iso = find_installer_iso(tmp.path()).unwrap();
        assert_eq!(iso, iso_dir.join("nixos-23.11-x86_64-linux.iso"));
    }

    #[test]
    fn missing_iso_is_an_error() {
        let tmp = tempfile::tempdir().unwrap();
        let err = find_installer_iso(tmp.path()).unwrap_err();
        assert!(err.to_string().contains("No installer image"));
    }

    #[test]
    fn tasks_fail_on_missing_answers() {
        let mut ctx = Context::new();
        ctx.insert("output_path", "/tmp/ghaf");
        let err = Task::InstallConfig.run(&mut ctx).unwrap_err();
        assert!(err.to_string().contains("ip_address"));
    }

    #[test]
    fn task_names_in_yaml() {
        let task: Task = serde_yaml::from_str("flash_installer_image").unwrap();
        assert_eq!(task, Task::FlashInstallerImage);
        assert!(task.requires().contains(&"installer_image_flush_device"));
        assert_eq!(task.produces(), &["installer_iso"]);
    }
}
