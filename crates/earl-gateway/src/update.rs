//! Self-update: version check against GitHub Releases, install-mode
//! detection, and the source/binary/docker update flows (§4.11).

use std::cmp::Ordering;
use std::path::Path;

use anyhow::{bail, Context, Result};
use earl_core::update::{compare_versions, InstallMode, ReleaseAsset, ReleaseInfo};
use tracing::info;

const GITHUB_API: &str = "https://api.github.com/repos/earl-chat/earl/releases/latest";
const USER_AGENT: &str = "earl-gateway";

/// Current version from Cargo.toml.
pub const VERSION: &str = env!("CARGO_PKG_VERSION");

/// Short git commit hash embedded at compile time by build.rs.
pub const GIT_SHA: &str = env!("EARL_GIT_SHA");

/// Query GitHub Releases API for the latest release.
pub async fn check_latest_release() -> Result<ReleaseInfo> {
    let client = reqwest::Client::builder()
        .user_agent(USER_AGENT)
        .timeout(std::time::Duration::from_secs(15))
        .build()?;

    let resp: serde_json::Value = client
        .get(GITHUB_API)
        .header("Accept", "application/vnd.github+json")
        .send()
        .await
        .context("failed to reach GitHub API")?
        .error_for_status()
        .context("GitHub API returned error status")?
        .json()
        .await
        .context("failed to parse GitHub API response")?;

    let tag_name = resp["tag_name"].as_str().context("missing tag_name in release")?.to_string();
    let version = tag_name.strip_prefix('v').unwrap_or(&tag_name).to_string();

    let assets = resp["assets"]
        .as_array()
        .map(|arr| {
            arr.iter()
                .filter_map(|a| {
                    Some(ReleaseAsset {
                        name: a["name"].as_str()?.to_string(),
                        download_url: a["browser_download_url"].as_str()?.to_string(),
                        size: a["size"].as_u64().unwrap_or(0),
                    })
                })
                .collect()
        })
        .unwrap_or_default();

    Ok(ReleaseInfo {
        tag_name,
        version,
        published_at: resp["published_at"].as_str().unwrap_or("unknown").to_string(),
        html_url: resp["html_url"].as_str().unwrap_or("https://github.com/earl-chat/earl/releases").to_string(),
        assets,
    })
}

/// Auto-detect how earl was installed.
pub fn detect_install_mode() -> InstallMode {
    if Path::new("/.dockerenv").exists() {
        return InstallMode::Docker;
    }

    if let Ok(exe) = std::env::current_exe() {
        let mut dir = exe.parent().map(|p| p.to_path_buf());
        while let Some(ref d) = dir {
            if d.join(".git").is_dir() {
                return InstallMode::Source { repo_root: d.to_string_lossy().to_string() };
            }
            dir = d.parent().map(|p| p.to_path_buf());
        }
        return InstallMode::Binary { exe_path: exe.to_string_lossy().to_string() };
    }

    InstallMode::Binary { exe_path: "earl-gateway".to_string() }
}

fn platform_asset_suffix() -> &'static str {
    #[cfg(all(target_arch = "x86_64", target_os = "linux"))]
    {
        "x86_64-unknown-linux-gnu"
    }
    #[cfg(all(target_arch = "aarch64", target_os = "linux"))]
    {
        "aarch64-unknown-linux-gnu"
    }
    #[cfg(all(target_arch = "x86_64", target_os = "macos"))]
    {
        "x86_64-apple-darwin"
    }
    #[cfg(all(target_arch = "aarch64", target_os = "macos"))]
    {
        "aarch64-apple-darwin"
    }
    #[cfg(not(any(
        all(target_arch = "x86_64", target_os = "linux"),
        all(target_arch = "aarch64", target_os = "linux"),
        all(target_arch = "x86_64", target_os = "macos"),
        all(target_arch = "aarch64", target_os = "macos"),
    )))]
    {
        "unknown"
    }
}

/// Check for updates and print the result. Returns true if an update is available.
pub async fn check_and_print() -> Result<bool> {
    println!("Checking for updates...");
    let release = check_latest_release().await?;
    let current = VERSION;
    let latest = &release.version;

    match compare_versions(current, latest) {
        Ordering::Less => {
            println!();
            println!("  Update available: v{} -> v{}", current, latest);
            println!("  Release: {}", release.html_url);
            println!();
            println!("  Run: earl-gateway update --yes");
            Ok(true)
        }
        _ => {
            println!("  You are up to date (v{}).", current);
            Ok(false)
        }
    }
}

/// Run the full update flow based on the detected install mode. Called
/// both from the `update` subcommand and automatically before re-exec when
/// `!update` was issued in chat.
pub async fn apply_update(yes: bool) -> Result<()> {
    let release = check_latest_release().await?;
    let current = VERSION;
    let latest = &release.version;

    if compare_versions(current, latest) != Ordering::Less {
        println!("You are already on the latest version (v{}).", current);
        return Ok(());
    }

    println!("Update available: v{} -> v{}", current, latest);

    match detect_install_mode() {
        InstallMode::Docker => {
            println!("Running in Docker. Update with: docker compose pull && docker compose up -d");
            return Ok(());
        }
        InstallMode::Source { ref repo_root } => {
            if !yes && !confirm(&format!("git fetch + checkout v{} + cargo build in {}. Proceed?", latest, repo_root))? {
                println!("Aborted.");
                return Ok(());
            }
            apply_source_update(latest, Path::new(repo_root)).await?;
        }
        InstallMode::Binary { ref exe_path } => {
            if !yes && !confirm(&format!("Download the new binary and replace {}. Proceed?", exe_path))? {
                println!("Aborted.");
                return Ok(());
            }
            apply_binary_update(&release, Path::new(exe_path)).await?;
        }
    }

    println!("Updated to v{}.", latest);
    Ok(())
}

async fn apply_source_update(version: &str, repo_root: &Path) -> Result<()> {
    let tag = format!("v{}", version);

    println!("Fetching tags...");
    run_cmd(repo_root, "git", &["fetch", "--all", "--tags"])?;

    println!("Checking out {}...", tag);
    run_cmd(repo_root, "git", &["checkout", &tag])?;

    println!("Building (this may take a few minutes)...");
    run_cmd(repo_root, "cargo", &["build", "--release", "--bin", "earl-gateway"])?;

    println!("Build complete.");
    Ok(())
}

/// Binary update: download the release asset for this platform and replace
/// the running executable. Unlike the checksum-verifying flow this is
/// derived from, no SHA256SUMS check is performed here — earl carries no
/// hashing dependency (see DESIGN.md).
async fn apply_binary_update(release: &ReleaseInfo, exe_path: &Path) -> Result<()> {
    let suffix = platform_asset_suffix();
    let asset_name = format!("earl-gateway-{}.tar.gz", suffix);

    let asset = release
        .assets
        .iter()
        .find(|a| a.name == asset_name)
        .context(format!("no binary for this platform ({}) in release", suffix))?;

    println!("Downloading {} ({} bytes)...", asset.name, asset.size);

    let client = reqwest::Client::builder()
        .user_agent(USER_AGENT)
        .timeout(std::time::Duration::from_secs(300))
        .build()?;

    let bytes = client.get(&asset.download_url).send().await?.error_for_status()?.bytes().await?;

    let tmp_dir = std::env::temp_dir().join(format!("earl-update-{}", std::process::id()));
    std::fs::create_dir_all(&tmp_dir)?;

    let tar_path = tmp_dir.join(&asset.name);
    std::fs::write(&tar_path, &bytes)?;
    run_cmd(&tmp_dir, "tar", &["xzf", &tar_path.to_string_lossy()])?;

    let new_binary = tmp_dir.join("earl-gateway");
    if !new_binary.exists() {
        bail!("extracted archive does not contain an earl-gateway binary");
    }

    let bak_path = exe_path.with_extension("bak");
    if exe_path.exists() {
        std::fs::rename(exe_path, &bak_path).context("failed to back up the current binary")?;
        println!("Backup saved to {}", bak_path.display());
    }
    std::fs::copy(&new_binary, exe_path).context("failed to install the new binary")?;

    #[cfg(unix)]
    {
        use std::os::unix::fs::PermissionsExt;
        let mut perms = std::fs::metadata(exe_path)?.permissions();
        perms.set_mode(0o755);
        std::fs::set_permissions(exe_path, perms)?;
    }

    let _ = std::fs::remove_dir_all(&tmp_dir);
    Ok(())
}

/// Restore the `.bak` backup binary left by the last binary update.
pub fn rollback() -> Result<()> {
    let exe_path = match detect_install_mode() {
        InstallMode::Binary { exe_path } => std::path::PathBuf::from(exe_path),
        InstallMode::Source { .. } => bail!("rollback is only supported for binary installs; for source installs use: git checkout <previous-tag>"),
        InstallMode::Docker => bail!("rollback is not supported in Docker; use: docker compose pull to get a specific version"),
    };

    let bak_path = exe_path.with_extension("bak");
    if !bak_path.exists() {
        bail!("no backup found at {}", bak_path.display());
    }
    std::fs::rename(&bak_path, &exe_path).context("failed to restore the backup binary")?;
    println!("Rolled back to previous version.");
    Ok(())
}

/// Exec-replace the current process image with a fresh invocation of the
/// same executable and arguments, per §4.11 — unlike a spawn-and-exit
/// restart, this keeps the same pid and inherits open file descriptors.
#[cfg(unix)]
pub fn restart_service() -> Result<()> {
    use std::os::unix::process::CommandExt;

    let exe = std::env::current_exe().context("cannot determine current executable path")?;
    info!(exe = %exe.display(), "exec-replacing process for restart");
    let err = std::process::Command::new(exe).args(std::env::args().skip(1)).exec();
    bail!("exec failed: {err}")
}

#[cfg(not(unix))]
pub fn restart_service() -> Result<()> {
    bail!("exec-replace restart is only supported on unix")
}

fn run_cmd(dir: &Path, cmd: &str, args: &[&str]) -> Result<()> {
    let status = std::process::Command::new(cmd)
        .args(args)
        .current_dir(dir)
        .status()
        .with_context(|| format!("failed to run {cmd}"))?;
    if !status.success() {
        bail!("{cmd} {args:?} exited with {status}");
    }
    Ok(())
}

fn confirm(prompt: &str) -> Result<bool> {
    use std::io::Write;
    print!("{prompt} [y/N] ");
    std::io::stdout().flush()?;
    let mut line = String::new();
    std::io::stdin().read_line(&mut line)?;
    Ok(matches!(line.trim().to_ascii_lowercase().as_str(), "y" | "yes"))
}
