//! Building the bridge process command.
//!
//! The bridge is usually a Node script, so it runs inside the user's login
//! shell to pick up the PATH set by version managers:
//!
//! ```text
//! $SHELL -l -c '<binary> <args...>'
//! ```
//!
//! Non-POSIX shells (fish, nushell, ...) fall back to bash or sh.

use tokio::process::Command;

/// Split a command line such as `node ./bridge/index.js --quiet` into binary
/// and arguments, honouring shell quoting.
pub fn split_command_line(line: &str) -> Result<(String, Vec<String>), String> {
    let mut parts = shlex::split(line)
        .ok_or_else(|| format!("Unbalanced quotes in command: {}", line))?
        .into_iter();
    let binary = parts
        .next()
        .ok_or_else(|| "Empty bridge command".to_string())?;
    Ok((binary, parts.collect()))
}

/// Prepend the binary's parent directory to PATH so a sibling `node` is found.
fn prepare_path_env(cmd: &mut Command, binary_path: &str) {
    if !binary_path.contains('/') {
        return;
    }
    if let Some(dir) = std::path::Path::new(binary_path)
        .parent()
        .and_then(|dir| dir.to_str())
    {
        let existing = std::env::var("PATH").unwrap_or_default();
        let combined = if existing.is_empty() {
            dir.to_string()
        } else {
            format!("{}:{}", dir, existing)
        };
        cmd.env("PATH", combined);
    }
}

/// Build a command that runs `binary_path` with `args` in a login shell.
///
/// `shell_prefix` overrides the default `$SHELL -l -c`, e.g. `bash -c`.
#[cfg(unix)]
pub fn build_login_shell_command(
    binary_path: &str,
    args: &[String],
    shell_prefix: Option<&str>,
) -> Result<Command, String> {
    let prefix = get_shell_prefix(shell_prefix);
    let prefix_parts: Vec<&str> = prefix.split_whitespace().collect();
    let (shell_program, shell_args) = prefix_parts
        .split_first()
        .ok_or_else(|| "Empty shell prefix".to_string())?;

    let mut command_parts = Vec::with_capacity(args.len() + 1);
    command_parts.push(
        shlex::try_quote(binary_path)
            .map_err(|_| format!("Invalid path: {}", binary_path))?
            .into_owned(),
    );
    for arg in args {
        command_parts.push(
            shlex::try_quote(arg)
                .map_err(|_| format!("Invalid argument: {}", arg))?
                .into_owned(),
        );
    }

    let mut cmd = Command::new(shell_program);
    cmd.args(shell_args).arg(command_parts.join(" "));
    prepare_path_env(&mut cmd, binary_path);

    Ok(cmd)
}

#[cfg(unix)]
fn get_shell_prefix(custom_prefix: Option<&str>) -> String {
    if let Some(prefix) = custom_prefix.filter(|p| !p.trim().is_empty()) {
        return prefix.to_string();
    }

    let shell = std::env::var("SHELL").unwrap_or_else(|_| "/bin/sh".to_string());
    let shell_name = std::path::Path::new(&shell)
        .file_name()
        .and_then(|n| n.to_str())
        .unwrap_or("");

    let non_posix = ["fish", "nu", "nushell", "elvish", "xonsh", "ion"];
    let effective_shell = if non_posix.contains(&shell_name) {
        if std::path::Path::new("/bin/bash").exists() {
            "/bin/bash"
        } else {
            "/bin/sh"
        }
    } else {
        &shell
    };

    format!("{} -l -c", effective_shell)
}

/// Windows has no login shell; run the binary directly.
#[cfg(windows)]
pub fn build_login_shell_command(
    binary_path: &str,
    args: &[String],
    _shell_prefix: Option<&str>,
) -> Result<Command, String> {
    let mut cmd = Command::new(binary_path);
    cmd.args(args);
    prepare_path_env(&mut cmd, binary_path);
    Ok(cmd)
}
