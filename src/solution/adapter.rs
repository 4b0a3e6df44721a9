//! Per-OS script adaptation: quoting, path rewriting and background-launch
//! wrapping.
//!
//! Pure functions over `OsType`; no state. The Windows rules target the
//! POSIX-emulation layer the setup batch runs under, which accepts
//! forward-slash paths and strips unquoted list separators.

use crate::host::OsType;

/// Character that separates list values in flag arguments. Values
/// containing it must be quoted on Windows or the emulation layer splits
/// them.
pub const LIST_SEPARATOR: char = ',';

/// Interpreter used to run a shell solution on the host.
pub fn shell_for(os: OsType) -> &'static str {
    match os {
        OsType::Aix => "ksh",
        _ => "bash",
    }
}

/// Rewrite path separators for the POSIX-emulation layer on Windows.
/// Non-Windows paths pass through untouched.
pub fn rewrite_path(os: OsType, path: &str) -> String {
    if os.is_windows() {
        path.replace('\\', "/")
    } else {
        path.to_string()
    }
}

/// Quote a flag value when the target OS would otherwise mangle it.
///
/// Windows quotes any value containing the list separator; other systems
/// pass values through (the interactive shell channel hands arguments to
/// the remote shell verbatim).
pub fn quote_value(os: OsType, value: &str) -> String {
    if os.is_windows() && value.contains(LIST_SEPARATOR) {
        format!("\"{value}\"")
    } else {
        value.to_string()
    }
}

/// Quote unconditionally. Used for values that must survive the emulation
/// layer's `=`-stripping, such as base64 credentials.
pub fn force_quote(value: &str) -> String {
    format!("\"{value}\"")
}

/// Wrap a run command so it executes detached with output redirected to a
/// log file, surviving the remote session's teardown.
pub fn detach_command(os: OsType, cmd: &str, log_file: &str) -> String {
    if os.is_windows() {
        format!("start /b {cmd} > {} 2>&1", rewrite_path(os, log_file))
    } else {
        format!("nohup {cmd} > {log_file} 2>&1 &")
    }
}

/// Grant-execute command; callers skip this on Windows.
pub fn chmod_command(path: &str) -> String {
    format!("chmod +x {path}")
}

/// Directory-creation command for one path.
pub fn mkdir_command(os: OsType, path: &str) -> String {
    if os.is_windows() {
        format!("mkdir -p {}", rewrite_path(os, path))
    } else {
        format!("mkdir -p {path}")
    }
}
