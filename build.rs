use anyhow::{Context, Result};
use chrono::TimeZone;
use std::env;
use std::fs;
use std::process::Command;
use vergen_gitcl::{Emitter, GitclBuilder};

const CORE_PACKAGE: &str = "oggcore";
const CORE_MANIFEST: &str = "oggcore/Cargo.toml";

fn main() -> Result<()> {
    emit_git_describe()?;

    let now = build_time()?;
    println!(
        "cargo:rustc-env=BUILD_TIMESTAMP={}",
        now.format("%Y-%m-%d %H:%M:%S UTC")
    );

    let core_version = core_version_from_metadata()
        .or_else(|_| core_version_from_manifest())
        .unwrap_or_else(|_| "unknown".to_string());
    println!("cargo:rustc-env=OGGCORE_VERSION={core_version}");

    println!("cargo:rerun-if-changed={CORE_MANIFEST}");
    println!("cargo:rerun-if-env-changed=SOURCE_DATE_EPOCH");

    Ok(())
}

/// Emits `VERGEN_GIT_DESCRIBE`, falling back to "unknown" outside a git checkout.
fn emit_git_describe() -> Result<()> {
    let gitcl = GitclBuilder::default()
        .describe(true, true, Some("[0-9]*"))
        .build()?;

    let emitted = Emitter::default()
        .idempotent()
        .fail_on_error()
        .add_instructions(&gitcl)
        .and_then(|emitter| emitter.emit());

    if let Err(e) = emitted {
        eprintln!("git describe unavailable: {e:?}");
        println!("cargo:rustc-env=VERGEN_GIT_DESCRIBE=unknown");
    }
    Ok(())
}

/// Honors `SOURCE_DATE_EPOCH` for reproducible builds.
fn build_time() -> Result<chrono::DateTime<chrono::Utc>> {
    match env::var("SOURCE_DATE_EPOCH") {
        Ok(val) => {
            let secs = val
                .trim()
                .parse::<i64>()
                .with_context(|| format!("invalid SOURCE_DATE_EPOCH: {val}"))?;
            chrono::Utc
                .timestamp_opt(secs, 0)
                .single()
                .with_context(|| format!("SOURCE_DATE_EPOCH out of range: {secs}"))
        }
        Err(_) => Ok(chrono::Utc::now()),
    }
}

fn core_version_from_metadata() -> Result<String> {
    let output = Command::new(env::var("CARGO").unwrap_or_else(|_| "cargo".to_string()))
        .args(["metadata", "--format-version", "1", "--no-deps"])
        .output()?;

    if !output.status.success() {
        anyhow::bail!("cargo metadata failed");
    }

    let metadata: serde_json::Value = serde_json::from_slice(&output.stdout)?;
    metadata["packages"]
        .as_array()
        .into_iter()
        .flatten()
        .find(|package| package["name"].as_str() == Some(CORE_PACKAGE))
        .and_then(|package| package["version"].as_str())
        .map(str::to_string)
        .with_context(|| format!("{CORE_PACKAGE} not found in cargo metadata"))
}

fn core_version_from_manifest() -> Result<String> {
    let manifest = fs::read_to_string(CORE_MANIFEST)?;

    manifest
        .lines()
        .map(str::trim)
        .filter(|line| line.starts_with("version"))
        .find_map(|line| line.split_once('='))
        .map(|(_, value)| value.trim().trim_matches('"').trim_matches('\'').to_string())
        .with_context(|| format!("no version in {CORE_MANIFEST}"))
}
