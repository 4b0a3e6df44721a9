//! Host, topology and build descriptors consumed by the solution builders
//! and the dispatcher.
//!
//! These are plain data carriers. Host/credential CRUD lives outside this
//! crate; callers hand us fully resolved descriptors.

use serde::{Deserialize, Serialize};

/// Operating system family of a managed host.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub enum OsType {
    Linux,
    Windows,
    Aix,
}

impl OsType {
    pub fn is_windows(&self) -> bool {
        matches!(self, OsType::Windows)
    }

    /// Wire name used in relay flags and cached payloads.
    pub fn as_str(&self) -> &'static str {
        match self {
            OsType::Linux => "linux",
            OsType::Windows => "windows",
            OsType::Aix => "aix",
        }
    }
}

/// Role of the node in the agent topology.
///
/// `PAgent` is an agent that reports through a proxy rather than directly
/// to the upstream servers.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub enum NodeType {
    Agent,
    Proxy,
    PAgent,
}

impl NodeType {
    pub fn as_str(&self) -> &'static str {
        match self {
            NodeType::Agent => "AGENT",
            NodeType::Proxy => "PROXY",
            NodeType::PAgent => "PAGENT",
        }
    }
}

/// Requested lifecycle operation for one host.
///
/// Upgrade is an install with the force-update switch set; the setup
/// script makes no other distinction.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub enum Operation {
    Install,
    Uninstall,
    Upgrade,
}

impl Operation {
    pub fn is_uninstall(&self) -> bool {
        matches!(self, Operation::Uninstall)
    }

    pub fn forces_update(&self) -> bool {
        matches!(self, Operation::Upgrade)
    }
}

/// Windows service credentials, already RSA-encrypted and base64-encoded
/// by the credential subsystem. This crate only quotes them for transport.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct ServiceCredentials {
    pub user: String,
    pub password: String,
}

/// Agent build metadata attached to an install.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct AgentBuild {
    pub name: String,
    pub version: String,
    /// Legacy builds predate the build-metadata flags and must not
    /// receive them.
    pub legacy: bool,
    pub force_update: bool,
}

/// Jump-server (relay) configuration for hosts that are not directly
/// reachable from the orchestrator.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct JumpServer {
    pub address: String,
    pub port: u16,
    /// Filesystem path on the relay where payloads are staged.
    pub download_path: String,
    /// HTTP proxy URL exposed by the relay for target-side downloads.
    pub http_proxy_url: String,
    /// Route the setup-script download through the relay's HTTP proxy.
    pub download_via_proxy: bool,
    /// Route agent command traffic through the relay's HTTP proxy.
    pub command_via_proxy: bool,
}

/// Fully resolved descriptor of one managed host.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct HostDescriptor {
    pub host_id: String,
    pub os: OsType,
    pub node: NodeType,
    pub inner_ip: String,
    pub outer_ip: Option<String>,
    /// Login IP used by the relay to reach the target; defaults to the
    /// inner IP when absent.
    pub login_ip: Option<String>,
    pub port: u16,
    pub cloud_id: String,
    pub account: String,
    pub auth_type: String,
    /// Directory the setup script downloads into and runs from.
    pub dest_dir: String,
    /// Final installation prefix of the agent.
    pub install_path: String,
    /// Operator runs the generated commands by hand; nothing is executed
    /// remotely for this host.
    pub manual_install: bool,
    /// Host can only be reached through a jump server.
    pub needs_jump_server: bool,
    pub service_credentials: Option<ServiceCredentials>,
}

impl HostDescriptor {
    pub fn login_ip(&self) -> &str {
        self.login_ip.as_deref().unwrap_or(&self.inner_ip)
    }
}

/// Upstream ports the agent connects to, in setup-script flag order.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct ServerPorts {
    pub io: u16,
    pub file: u16,
    pub data: u16,
    pub bt: u16,
    pub tracker: u16,
    pub proc: u16,
    pub db_proxy: u16,
    pub api: u16,
}

/// Upstream server lists, each rendered as one quoted comma-joined value.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct ServerLists {
    pub file_servers: Vec<String>,
    pub data_servers: Vec<String>,
    pub task_servers: Vec<String>,
}

/// Pre-install hook supplied by the caller.
///
/// Inline hooks run as a single command; non-inline hooks are expanded to
/// download, chmod (non-Batch only) and execute steps.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct HookScript {
    pub name: String,
    /// Inline command text, or the script's download name for expanded
    /// hooks.
    pub command: String,
    pub inline: bool,
}

/// Opaque identity claim covering host, cloud and run id.
///
/// Generated once per (host, run) and reused unchanged across an outer
/// relay solution and its nested solutions. Encryption of the claim is the
/// credential subsystem's job; here it is an opaque string.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct IdentityToken(pub String);

impl IdentityToken {
    /// Mint a fresh opaque token for one (host, run) pair.
    pub fn mint() -> Self {
        IdentityToken(uuid::Uuid::new_v4().simple().to_string())
    }

    pub fn as_str(&self) -> &str {
        &self.0
    }
}
