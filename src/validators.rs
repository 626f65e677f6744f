use anyhow::{anyhow, Context, Result};
use serde::Deserialize;
use std::io::Write;
use std::net::IpAddr;
use std::process::{Command, Stdio};
use tracing::{debug, warn};

pub trait Validator {
    /// Whether `candidate` is an acceptable final answer.
    fn accepts(&self, candidate: &str) -> bool;

    /// Human-readable reason shown when `accepts` returns false.
    fn message(&self) -> &str;
}

/// Validator backed by a plain predicate.
pub struct FnValidator<F> {
    predicate: F,
    message: String,
}

impl<F> FnValidator<F>
where
    F: Fn(&str) -> bool,
{
    pub fn new(predicate: F, message: impl Into<String>) -> Self {
        Self {
            predicate,
            message: message.into(),
        }
    }
}

impl<F> Validator for FnValidator<F>
where
    F: Fn(&str) -> bool,
{
    fn accepts(&self, candidate: &str) -> bool {
        (self.predicate)(candidate)
    }

    fn message(&self) -> &str {
        &self.message
    }
}

/// Accepts only exact members of a closed variant set.
#[derive(Debug, Clone)]
pub struct VariantValidator {
    variants: Vec<String>,
    message: String,
}

impl VariantValidator {
    pub fn new(variants: &[String]) -> Self {
        Self {
            variants: variants.to_vec(),
            message: format!(
                "This input value is not one of the variants: {}",
                variants.join(" ")
            ),
        }
    }
}

impl Validator for VariantValidator {
    fn accepts(&self, candidate: &str) -> bool {
        self.variants.iter().any(|v| v == candidate)
    }

    fn message(&self) -> &str {
        &self.message
    }
}

/// Check a public key by asking `ssh-keygen` for its fingerprint.
pub fn is_pub_ssh_key(key: &str) -> bool {
    match fingerprint(key) {
        Ok(ok) => ok,
        Err(e) => {
            warn!(error = %e, "ssh-keygen could not be run");
            false
        }
    }
}

fn fingerprint(key: &str) -> Result<bool> {
    let mut child = Command::new("ssh-keygen")
        .args(["-l", "-f", "/dev/stdin"])
        .stdin(Stdio::piped())
        .stdout(Stdio::null())
        .stderr(Stdio::null())
        .spawn()
        .context("Failed to spawn ssh-keygen")?;

    {
        let mut stdin = child
            .stdin
            .take()
            .ok_or_else(|| anyhow!("ssh-keygen stdin unavailable"))?;
        stdin
            .write_all(key.as_bytes())
            .context("Failed to write key to ssh-keygen")?;
    }

    let status = child.wait().context("Failed to wait for ssh-keygen")?;
    Ok(status.success())
}

#[derive(Debug, Deserialize)]
struct LsblkOutput {
    blockdevices: Vec<LsblkDevice>,
}

#[derive(Debug, Deserialize)]
struct LsblkDevice {
    name: String,
}

/// Paths of top-level block devices as reported by `lsblk --json`.
pub fn parse_lsblk(json: &str) -> Result<Vec<String>> {
    let out: LsblkOutput = serde_json::from_str(json).context("Failed to parse lsblk output")?;
    Ok(out
        .blockdevices
        .into_iter()
        .map(|dev| format!("/dev/{}", dev.name))
        .collect())
}

pub fn block_devices() -> Result<Vec<String>> {
    let output = Command::new("lsblk")
        .args(["--json", "-o", "NAME,MOUNTPOINT"])
        .output()
        .context("Failed to execute lsblk")?;
    let stdout = String::from_utf8_lossy(&output.stdout);
    parse_lsblk(&stdout)
}

pub fn is_available_blk_device(path: &str) -> bool {
    match block_devices() {
        Ok(devices) => {
            debug!(?devices, "listed block devices");
            devices.iter().any(|d| d == path)
        }
        Err(e) => {
            warn!(error = %e, "could not list block devices");
            false
        }
    }
}

pub fn is_ip_address(s: &str) -> bool {
    s.parse::<IpAddr>().is_ok()
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn variant_validator_accepts_exact_members_only() {
        let v =
            VariantValidator::new(&["generic-x86_64".into(), "lenovo-x1-carbon-gen11".into()]);
        assert!(v.accepts("generic-x86_64"));
        assert!(!v.accepts("generic"));
        assert!(!v.accepts("generic-x86_64 "));
        assert_eq!(
            v.message(),
            "This input value is not one of the variants: generic-x86_64 lenovo-x1-carbon-gen11"
        );
    }

    #[test]
    fn fn_validator_uses_predicate_and_message() {
        let v = FnValidator::new(|s: &str| s.starts_with('/'), "must be absolute");
        assert!(v.accepts("/dev/sda"));
        assert!(!v.accepts("sda"));
        assert_eq!(v.message(), "must be absolute");
    }

    #[test]
    fn ip_addresses_v4_and_v6() {
        assert!(is_ip_address("192.168.1.10"));
        assert!(is_ip_address("::1"));
        assert!(!is_ip_address("192.168.1"));
        assert!(!is_ip_address("example.com"));
    }

    #[test]
    fn lsblk_json_lists_top_level_devices() {
        let json = r#"{
            "blockdevices": [
                {"name": "sda", "mountpoint": null,
                 "children": [{"name": "sda1", "mountpoint": "/boot"}]},
                {"name": "nvme0n1", "mountpoint": null}
            ]
        }"#;
        let devices = parse_lsblk(json).unwrap();
        assert_eq!(devices, vec!["/dev/sda", "/dev/nvme0n1"]);
    }

    #[test]
    fn lsblk_garbage_is_an_error() {
        assert!(parse_lsblk("not json").is_err());
    }
}
