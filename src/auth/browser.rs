use std::process::{Command, Stdio};

use anyhow::{Context, Result};
use tracing::debug;

#[cfg(target_os = "macos")]
fn launcher(url: &str) -> Result<Command> {
    let mut command = Command::new("open");
    command.arg(url);
    Ok(command)
}

#[cfg(target_os = "linux")]
fn launcher(url: &str) -> Result<Command> {
    let mut command = Command::new("xdg-open");
    command.arg(url);
    Ok(command)
}

#[cfg(target_os = "windows")]
fn launcher(url: &str) -> Result<Command> {
    let mut command = Command::new("cmd");
    command.args(["/C", "start", "", url]);
    Ok(command)
}

#[cfg(not(any(target_os = "macos", target_os = "linux", target_os = "windows")))]
fn launcher(_url: &str) -> Result<Command> {
    anyhow::bail!("no known way to open a browser on this platform")
}

/// Hands `url` to the desktop's default browser.
///
/// The launcher is reaped on a background thread so the caller never waits
/// on it; its exit status is only logged.
pub fn open_browser(url: &str) -> Result<()> {
    let mut command = launcher(url)?;
    let program = command.get_program().to_string_lossy().into_owned();
    let mut child = command
        .stdin(Stdio::null())
        .stdout(Stdio::null())
        .stderr(Stdio::null())
        .spawn()
        .with_context(|| format!("Failed to run {}", program))?;
    debug!("Started {} (pid {})", program, child.id());

    std::thread::spawn(move || match child.wait() {
        Ok(status) if status.success() => debug!("{} finished", program),
        Ok(status) => debug!("{} exited with {}", program, status),
        Err(err) => debug!("Could not wait for {}: {}", program, err),
    });
    Ok(())
}
