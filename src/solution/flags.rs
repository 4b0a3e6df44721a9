//! Setup-script CLI flag assembly.
//!
//! The grammar is compatibility-critical: the downstream setup script
//! parses flags positionally, so ordering here is load-bearing. `-R`
//! (uninstall) must be the last positional flag, followed only by `-F`
//! (force update). Do not reorder.

use super::adapter;
use super::builder::BuildContext;
use crate::host::{HostDescriptor, NodeType};

/// Render the standard agent flags, everything up to but excluding the
/// terminal `-R`/`-F` pair.
pub(crate) fn base_flags(ctx: &BuildContext, http_proxy: Option<&str>) -> String {
    let os = ctx.host.os;
    let mut parts: Vec<String> = Vec::new();

    let p = &ctx.ports;
    parts.push(format!(
        "-O {} -E {} -A {} -V {} -B {} -S {} -Z {} -K {}",
        p.io, p.file, p.data, p.bt, p.tracker, p.proc, p.db_proxy, p.api
    ));

    parts.push(format!("-e {}", adapter::force_quote(&ctx.lists.file_servers.join(","))));
    parts.push(format!("-a {}", adapter::force_quote(&ctx.lists.data_servers.join(","))));
    parts.push(format!("-k {}", adapter::force_quote(&ctx.lists.task_servers.join(","))));

    parts.push(format!("-l {}", ctx.package_url));
    parts.push(format!("-r {}", ctx.callback_url));
    parts.push(format!("-i {}", ctx.host.cloud_id));
    parts.push(format!("-I {}", ctx.host.inner_ip));
    parts.push(format!("-T {}", adapter::rewrite_path(os, &ctx.host.dest_dir)));
    parts.push(format!("-p {}", adapter::rewrite_path(os, &ctx.host.install_path)));
    parts.push(format!("-c {}", ctx.token.as_str()));
    parts.push(format!("-s {}", ctx.run_id));

    // Credentials are base64; quoting keeps trailing '=' padding intact
    // through the emulation layer.
    if let Some(creds) = &ctx.host.service_credentials {
        parts.push(format!("-U {}", adapter::force_quote(&creds.user)));
        parts.push(format!("-P {}", adapter::force_quote(&creds.password)));
    }

    let role = if ctx.host.node == NodeType::Proxy { "PROXY" } else { "SERVER" };
    parts.push(format!("-N {role}"));

    if let Some(proxy) = http_proxy {
        parts.push(format!("-x {proxy}"));
    }

    if !ctx.build.legacy {
        parts.push(format!("-n {}", adapter::quote_value(os, &ctx.build.name)));
        parts.push(format!("-t {}", adapter::quote_value(os, &ctx.build.version)));
    }

    parts.join(" ")
}

/// Render the terminal flags. `-R` stays last-positional; `-F` is the only
/// flag allowed after it.
pub(crate) fn terminal_flags(ctx: &BuildContext) -> String {
    let mut parts: Vec<String> = Vec::new();
    if ctx.operation.is_uninstall() {
        parts.push("-R".to_string());
    }
    if ctx.build.force_update || ctx.operation.forces_update() {
        parts.push("-F".to_string());
    }
    parts.join(" ")
}

/// Render the relay-script additions for one target host: staging path,
/// target identity/auth/topology, the nested-solutions envelope and the
/// per-channel proxy toggles.
pub(crate) fn relay_flags(
    target: &HostDescriptor,
    download_path: &str,
    envelope_b64: &str,
    download_via_proxy: bool,
    command_via_proxy: bool,
) -> String {
    let mut parts: Vec<String> = Vec::new();

    parts.push(format!("-L {download_path}"));

    parts.push(format!("-HNT {}", target.node.as_str()));
    parts.push(format!("-HIIP {}", target.inner_ip));
    parts.push(format!("-HC {}", target.cloud_id));
    parts.push(format!("-HOT {}", target.os.as_str()));
    parts.push(format!("-HI {}", target.host_id));
    parts.push(format!("-HP {}", target.port));
    parts.push(format!("-HAT {}", target.auth_type));
    parts.push(format!("-HA {}", target.account));
    parts.push(format!("-HLIP {}", target.login_ip()));
    parts.push(format!("-HDD {}", adapter::rewrite_path(target.os, &target.dest_dir)));
    parts.push(format!("-HPP {}", adapter::rewrite_path(target.os, &target.install_path)));

    parts.push(format!("-HSJB {envelope_b64}"));

    parts.push(format!("-ADP {}", if download_via_proxy { "1" } else { "0" }));
    parts.push(format!("-CPA {}", if command_via_proxy { "1" } else { "0" }));

    parts.join(" ")
}

/// Join non-empty flag segments with single spaces.
pub(crate) fn join_segments(segments: &[&str]) -> String {
    segments
        .iter()
        .filter(|s| !s.is_empty())
        .copied()
        .collect::<Vec<_>>()
        .join(" ")
}
