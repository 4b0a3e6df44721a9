//! Solution builders: Shell, Batch and ProxyRelay variants over one shared
//! build context.
//!
//! Build order within a standard solution is fixed and load-bearing:
//! create-dirs, hook steps, platform dependency fetch, setup-script
//! download, grant-execute (non-Windows), run command. The dispatcher
//! relies on this order and never reorders steps.

use tracing::debug;

use super::adapter;
use super::envelope;
use super::flags;
use super::{Content, ExecutionSolution, SolutionKind, Step, StepKind};
use crate::errors::{OrchestratorError, Result};
use crate::host::{
    AgentBuild, HookScript, HostDescriptor, IdentityToken, JumpServer, NodeType, Operation, OsType, ServerLists,
    ServerPorts,
};

pub const SETUP_SCRIPT_UNIX: &str = "setup_agent.sh";
pub const SETUP_SCRIPT_WINDOWS: &str = "setup_agent.bat";
pub const SETUP_SCRIPT_PROXY: &str = "setup_proxy.sh";
pub const SETUP_SCRIPT_RELAY: &str = "setup_relay.sh";

/// Name of the log file the detached run command redirects into.
const RUN_LOG_FILE: &str = "setup.log";

/// Well-known system paths that always exist; filtered out of the
/// create-dirs step.
const WELL_KNOWN_PATHS: &[&str] = &["/", "/tmp", "/var/tmp", "/usr/local", "/etc", "C:/Windows", "C:/Windows/Temp"];

/// Everything a builder needs to produce a solution for one host.
///
/// The token is generated once per (host, run) and reused unchanged by the
/// relay builder for its nested solutions.
#[derive(Debug, Clone)]
pub struct BuildContext {
    pub host: HostDescriptor,
    pub jump: Option<JumpServer>,
    pub build: AgentBuild,
    pub operation: Operation,
    pub hooks: Vec<HookScript>,
    pub ports: ServerPorts,
    pub lists: ServerLists,
    /// Base URL the setup script, hooks and platform dependencies are
    /// fetched from.
    pub package_url: String,
    /// URL the running script reports back to.
    pub callback_url: String,
    pub run_id: String,
    pub token: IdentityToken,
    /// Merge each Commands step's contents into one `&&`-joined content.
    pub combine_cmd_steps: bool,
    /// The commands run on the target host itself rather than on the
    /// orchestrator side of a relay.
    pub execute_on_target: bool,
    /// Account that never needs sudo wrapping.
    pub no_sudo_account: String,
}

impl BuildContext {
    /// Context for building the target's own solutions inside a relay
    /// dispatch. Shares the token unchanged.
    fn for_target(&self) -> BuildContext {
        let mut ctx = self.clone();
        ctx.execute_on_target = true;
        ctx
    }

    fn http_proxy(&self) -> Option<&str> {
        if !self.host.needs_jump_server {
            return None;
        }
        self.jump
            .as_ref()
            .filter(|j| j.download_via_proxy)
            .map(|j| j.http_proxy_url.as_str())
    }
}

mod private {
    pub trait Sealed {}
    impl Sealed for super::ShellBuilder {}
    impl Sealed for super::BatchBuilder {}
    impl Sealed for super::ProxyRelayBuilder {}
}

/// A solution builder variant. Sealed: the three variants below are the
/// whole family.
pub trait SolutionBuilder: private::Sealed {
    fn build(&self, ctx: &BuildContext) -> Result<ExecutionSolution>;
}

/// Shell-dialect solution for any host, including the shell rendition of a
/// Windows target.
pub struct ShellBuilder;

/// Batch-dialect solution; Windows hosts only.
pub struct BatchBuilder;

/// Outer relay solution executed on the jump server, embedding the
/// target's own solutions.
pub struct ProxyRelayBuilder;

impl SolutionBuilder for ShellBuilder {
    fn build(&self, ctx: &BuildContext) -> Result<ExecutionSolution> {
        build_standard(ctx, SolutionKind::Shell)
    }
}

impl SolutionBuilder for BatchBuilder {
    fn build(&self, ctx: &BuildContext) -> Result<ExecutionSolution> {
        if !ctx.host.os.is_windows() {
            return Err(OrchestratorError::Configuration(format!(
                "batch solution requested for non-Windows host {}",
                ctx.host.host_id
            )));
        }
        build_standard(ctx, SolutionKind::Batch)
    }
}

impl SolutionBuilder for ProxyRelayBuilder {
    fn build(&self, ctx: &BuildContext) -> Result<ExecutionSolution> {
        build_relay(ctx)
    }
}

/// Build the solution set for one host: the outer relay solution when the
/// host sits behind a jump server, otherwise the direct solutions (Shell,
/// plus Batch on Windows).
pub fn build_for_host(ctx: &BuildContext) -> Result<Vec<ExecutionSolution>> {
    let script = select_script(ctx)?;
    if script == SETUP_SCRIPT_RELAY {
        return Ok(vec![ProxyRelayBuilder.build(ctx)?]);
    }
    let mut solutions = vec![ShellBuilder.build(ctx)?];
    if ctx.host.os.is_windows() {
        solutions.push(BatchBuilder.build(ctx)?);
    }
    Ok(solutions)
}

/// Resolve which setup script this context runs. Fails before any network
/// action when the topology is unsatisfiable.
pub(crate) fn select_script(ctx: &BuildContext) -> Result<&'static str> {
    if ctx.host.needs_jump_server && ctx.jump.is_none() {
        return Err(OrchestratorError::Configuration(format!(
            "host {} requires a jump server but none is configured",
            ctx.host.host_id
        )));
    }
    if ctx.host.node == NodeType::Proxy {
        return Ok(SETUP_SCRIPT_PROXY);
    }
    if ctx.host.needs_jump_server && !ctx.execute_on_target {
        return Ok(SETUP_SCRIPT_RELAY);
    }
    Ok(match ctx.host.os {
        OsType::Windows => SETUP_SCRIPT_WINDOWS,
        _ => SETUP_SCRIPT_UNIX,
    })
}

fn build_standard(ctx: &BuildContext, kind: SolutionKind) -> Result<ExecutionSolution> {
    let script = select_script(ctx)?;
    if script == SETUP_SCRIPT_RELAY {
        return Err(OrchestratorError::Configuration(format!(
            "host {} resolves to the relay script; use the relay builder",
            ctx.host.host_id
        )));
    }

    let os = ctx.host.os;
    let mut solution = ExecutionSolution::new(
        kind,
        format!("{:?} {} on {}", ctx.operation, ctx.build.name, ctx.host.host_id),
    );

    if let Some(step) = create_dirs_step(ctx) {
        solution.steps.push(step);
    }
    solution.steps.extend(hook_steps(ctx, kind));
    if let Some(step) = platform_dependency_step(ctx) {
        solution.steps.push(step);
    }
    solution.steps.push(download_step(ctx, script));
    if !os.is_windows() {
        solution
            .steps
            .push(Step::commands("grant execute", vec![Content::command(
                "chmod",
                adapter::chmod_command(&format!("{}/{script}", ctx.host.dest_dir)),
                "grant execute permission on the setup script",
            )]));
    }
    solution.steps.push(run_step(ctx, script));

    apply_sudo(ctx, script, &mut solution);

    if ctx.combine_cmd_steps {
        for step in &mut solution.steps {
            if step.kind == StepKind::Commands {
                *step = combine_cmd_step(step, os);
            }
        }
    }

    debug!(
        target: "gangway::solution",
        host = %ctx.host.host_id,
        script,
        steps = solution.steps.len(),
        "built solution"
    );
    Ok(solution)
}

fn build_relay(ctx: &BuildContext) -> Result<ExecutionSolution> {
    let jump = ctx.jump.as_ref().ok_or_else(|| {
        OrchestratorError::Configuration(format!(
            "host {} requires a jump server but none is configured",
            ctx.host.host_id
        ))
    })?;

    // The target's own solutions, built independently with the same token.
    let target_ctx = ctx.for_target();
    let mut nested = vec![ShellBuilder.build(&target_ctx)?];
    if ctx.host.os.is_windows() {
        nested.push(BatchBuilder.build(&target_ctx)?);
    }
    let blob = envelope::encode_nested(&nested)?;

    let base = flags::base_flags(ctx, ctx.http_proxy());
    let relay = flags::relay_flags(
        &ctx.host,
        &jump.download_path,
        &blob,
        jump.download_via_proxy,
        jump.command_via_proxy,
    );
    let terminal = flags::terminal_flags(ctx);
    let cmd = format!(
        "{}/{SETUP_SCRIPT_RELAY} {}",
        jump.download_path,
        flags::join_segments(&[base.as_str(), relay.as_str(), terminal.as_str()])
    );

    let mut outer = ExecutionSolution::new(
        SolutionKind::Shell,
        format!("relay {:?} for {} via {}", ctx.operation, ctx.host.host_id, jump.address),
    );
    outer.steps.push(Step::commands(
        "relay dispatch",
        vec![Content::command(SETUP_SCRIPT_RELAY, cmd, "dispatch install through the jump server")],
    ));
    outer.nested_target_solutions = nested;
    apply_sudo(ctx, SETUP_SCRIPT_RELAY, &mut outer);

    debug!(
        target: "gangway::solution",
        host = %ctx.host.host_id,
        jump = %jump.address,
        nested = outer.nested_target_solutions.len(),
        "built relay solution"
    );
    Ok(outer)
}

/// Create-dirs step: deduplicated, with well-known system paths filtered
/// out. `None` when nothing is left to create.
fn create_dirs_step(ctx: &BuildContext) -> Option<Step> {
    let os = ctx.host.os;
    let mut dirs: Vec<String> = Vec::new();
    for dir in [ctx.host.dest_dir.as_str(), ctx.host.install_path.as_str()] {
        let dir = adapter::rewrite_path(os, dir);
        if WELL_KNOWN_PATHS.contains(&dir.as_str()) || dirs.contains(&dir) {
            continue;
        }
        dirs.push(dir);
    }
    if dirs.is_empty() {
        return None;
    }
    let contents = dirs
        .iter()
        .map(|d| Content::command(d.clone(), adapter::mkdir_command(os, d), format!("create {d}")))
        .collect();
    Some(Step::commands("create required directories", contents))
}

/// One step per hook: inline hooks run as-is, the rest expand to
/// download, grant-execute (non-Batch only) and execute.
fn hook_steps(ctx: &BuildContext, kind: SolutionKind) -> Vec<Step> {
    let os = ctx.host.os;
    ctx.hooks
        .iter()
        .map(|hook| {
            if hook.inline {
                return Step::commands(
                    format!("hook {}", hook.name),
                    vec![Content::command(hook.name.clone(), hook.command.clone(), "pre-install hook")],
                );
            }
            let local = format!("{}/{}", adapter::rewrite_path(os, &ctx.host.dest_dir), hook.name);
            let mut contents = vec![Content::command(
                format!("download {}", hook.name),
                fetch_command(ctx, &format!("{}/hooks/{}", ctx.package_url, hook.command), &local),
                "download hook script",
            )];
            if kind != SolutionKind::Batch {
                contents.push(Content::command(
                    format!("chmod {}", hook.name),
                    adapter::chmod_command(&local),
                    "grant execute permission",
                ));
            }
            contents.push(Content::command(
                format!("run {}", hook.name),
                local,
                "run hook script",
            ));
            Step::commands(format!("hook {}", hook.name), contents)
        })
        .collect()
}

/// Windows needs a bundled curl and its DLL on the host before any HTTPS
/// fetch can run.
fn platform_dependency_step(ctx: &BuildContext) -> Option<Step> {
    if !ctx.host.os.is_windows() {
        return None;
    }
    let contents = vec![
        Content::dependency(
            "curl.exe",
            format!("{}/deps/windows/curl.exe", ctx.package_url),
            None,
            true,
        ),
        Content::dependency(
            "libcurl-x64.dll",
            format!("{}/deps/windows/libcurl-x64.dll", ctx.package_url),
            None,
            true,
        ),
    ];
    Some(Step::dependencies("platform dependencies", contents))
}

fn download_step(ctx: &BuildContext, script: &str) -> Step {
    let dest = adapter::rewrite_path(ctx.host.os, &ctx.host.dest_dir);
    let cmd = fetch_command(ctx, &format!("{}/{script}", ctx.package_url), &format!("{dest}/{script}"));
    Step::commands(
        "download setup script",
        vec![Content::command(format!("download {script}"), cmd, "fetch the setup script")],
    )
}

/// HTTPS fetch command, routed through the jump server's HTTP proxy when
/// the download-via-proxy toggle is on. Windows uses the bundled curl
/// materialized by the platform dependency step.
fn fetch_command(ctx: &BuildContext, url: &str, out: &str) -> String {
    let curl = if ctx.host.os.is_windows() {
        format!("{}/curl.exe", adapter::rewrite_path(ctx.host.os, &ctx.host.dest_dir))
    } else {
        "curl".to_string()
    };
    match ctx.http_proxy() {
        Some(proxy) => format!("{curl} -sSfL -x {proxy} {url} -o {out}"),
        None => format!("{curl} -sSfL {url} -o {out}"),
    }
}

fn run_step(ctx: &BuildContext, script: &str) -> Step {
    let os = ctx.host.os;
    let dest = adapter::rewrite_path(os, &ctx.host.dest_dir);
    let base = flags::base_flags(ctx, ctx.http_proxy());
    let terminal = flags::terminal_flags(ctx);
    let invocation = match os {
        OsType::Windows => format!("{dest}/{script}"),
        _ => format!("{} {dest}/{script}", adapter::shell_for(os)),
    };
    let cmd = flags::join_segments(&[invocation.as_str(), base.as_str(), terminal.as_str()]);
    let wrapped = adapter::detach_command(os, &cmd, &format!("{dest}/{RUN_LOG_FILE}"));
    Step::commands(
        "run setup script",
        vec![Content::command(format!("run {script}"), wrapped, "launch the setup script detached")],
    )
}

/// Merge a Commands step's contents into one content joined by ` && `,
/// with `exec 2>&1;` stream collapsing on non-Windows.
pub fn combine_cmd_step(step: &Step, os: OsType) -> Step {
    let joined = step
        .contents
        .iter()
        .map(|c| c.text.as_str())
        .collect::<Vec<_>>()
        .join(" && ");
    let text = if os.is_windows() {
        joined
    } else {
        format!("exec 2>&1; {joined}")
    };
    Step {
        kind: StepKind::Commands,
        description: step.description.clone(),
        contents: vec![Content::command("combined", text, step.description.clone())],
    }
}

/// Prefix every Commands content with `sudo ` unless the host is Windows,
/// the account is the designated no-sudo account, or the resolved script
/// is the relay script (which manages elevation internally).
fn apply_sudo(ctx: &BuildContext, script: &str, solution: &mut ExecutionSolution) {
    if ctx.host.os.is_windows() || ctx.host.account == ctx.no_sudo_account || script == SETUP_SCRIPT_RELAY {
        return;
    }
    for step in &mut solution.steps {
        if step.kind != StepKind::Commands {
            continue;
        }
        for content in &mut step.contents {
            content.text = format!("sudo {}", content.text);
        }
    }
}
