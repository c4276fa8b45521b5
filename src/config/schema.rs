use crate::channels::AccessPolicy;
use crate::security::WorkspacePolicy;
use crate::security::workspace::DEFAULT_BLOCKED_NAMES;
use anyhow::{Context, Result};
use directories::UserDirs;
use serde::{Deserialize, Serialize};
use std::collections::BTreeMap;
use std::fs::{self, File, OpenOptions};
use std::io::Write;
use std::path::{Path, PathBuf};
use std::time::Duration;

// ── Top-level config ──────────────────────────────────────────────

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct Config {
    /// Workspace directory - computed, not serialized (see `[workspace] dir`)
    #[serde(skip)]
    pub workspace_dir: PathBuf,
    /// Path to config.toml - computed, not serialized
    #[serde(skip)]
    pub config_path: PathBuf,

    #[serde(default)]
    pub agent: AgentConfig,

    #[serde(default)]
    pub gateway: GatewayConfig,

    #[serde(default)]
    pub queue: QueueConfig,

    #[serde(default)]
    pub workspace: WorkspaceConfig,

    #[serde(default)]
    pub channels_config: ChannelsConfig,

    #[serde(default)]
    pub observability: ObservabilityConfig,
}

// ── Agent ─────────────────────────────────────────────────────────

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct AgentConfig {
    /// Agent id, first component of every session key.
    #[serde(default = "default_agent_id")]
    pub id: String,
    /// Executable spawned for each run.
    #[serde(default = "default_agent_command")]
    pub command: String,
    #[serde(default = "default_agent_args")]
    pub args: Vec<String>,
    /// Auxiliary tool servers handed to the agent with every run.
    #[serde(default)]
    pub tool_servers: Vec<ToolServerConfig>,
}

/// An auxiliary tool server the agent may connect to.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct ToolServerConfig {
    pub name: String,
    pub command: String,
    #[serde(default)]
    pub args: Vec<String>,
    #[serde(default)]
    pub env: BTreeMap<String, String>,
}

fn default_agent_id() -> String {
    "main".into()
}

fn default_agent_command() -> String {
    "claude".into()
}

fn default_agent_args() -> Vec<String> {
    vec!["-p".into()]
}

impl Default for AgentConfig {
    fn default() -> Self {
        Self {
            id: default_agent_id(),
            command: default_agent_command(),
            args: default_agent_args(),
            tool_servers: Vec::new(),
        }
    }
}

// ── Gateway security ─────────────────────────────────────────────

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct GatewayConfig {
    /// Gateway port (default: 3000)
    #[serde(default = "default_gateway_port")]
    pub port: u16,
    /// Gateway host (default: 127.0.0.1)
    #[serde(default = "default_gateway_host")]
    pub host: String,
    /// Shared bearer secret for the control plane. Unset disables auth.
    #[serde(default)]
    pub api_key: Option<String>,
    /// Allow binding to non-localhost addresses (default: false)
    #[serde(default)]
    pub allow_public_bind: bool,
}

fn default_gateway_port() -> u16 {
    3000
}

fn default_gateway_host() -> String {
    "127.0.0.1".into()
}

impl Default for GatewayConfig {
    fn default() -> Self {
        Self {
            port: default_gateway_port(),
            host: default_gateway_host(),
            api_key: None,
            allow_public_bind: false,
        }
    }
}

// ── Run queue ─────────────────────────────────────────────────────

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct QueueConfig {
    /// Seconds an empty, idle conversation queue is kept before eviction.
    #[serde(default = "default_idle_eviction_secs")]
    pub idle_eviction_secs: u64,
}

fn default_idle_eviction_secs() -> u64 {
    60
}

impl Default for QueueConfig {
    fn default() -> Self {
        Self {
            idle_eviction_secs: default_idle_eviction_secs(),
        }
    }
}

// ── Workspace sandbox ─────────────────────────────────────────────

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct WorkspaceConfig {
    /// Workspace root. Defaults to `~/.clawgate/workspace`.
    #[serde(default)]
    pub dir: Option<PathBuf>,
    #[serde(default)]
    pub allow_dotfiles: bool,
    /// Extensions file tools may touch, e.g. `[".md", ".txt"]`. Unset allows all.
    #[serde(default)]
    pub allowed_extensions: Option<Vec<String>>,
    /// Segment names that are never reachable (case-insensitive).
    #[serde(default = "default_blocked_names")]
    pub blocked_names: Vec<String>,
}

fn default_blocked_names() -> Vec<String> {
    DEFAULT_BLOCKED_NAMES
        .iter()
        .map(|name| (*name).to_string())
        .collect()
}

impl Default for WorkspaceConfig {
    fn default() -> Self {
        Self {
            dir: None,
            allow_dotfiles: false,
            allowed_extensions: None,
            blocked_names: default_blocked_names(),
        }
    }
}

// ── Channels ──────────────────────────────────────────────────────

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ChannelsConfig {
    /// Local stdin/stdout channel.
    #[serde(default = "default_true")]
    pub cli: bool,
    #[serde(default)]
    pub telegram: Option<TelegramConfig>,
}

fn default_true() -> bool {
    true
}

impl Default for ChannelsConfig {
    fn default() -> Self {
        Self {
            cli: true,
            telegram: None,
        }
    }
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct TelegramConfig {
    pub bot_token: String,
    /// Alternate Bot API server, e.g. a self-hosted `telegram-bot-api`
    #[serde(default)]
    pub api_base: Option<String>,
    #[serde(flatten)]
    pub access: AccessPolicy,
}

// ── Observability ─────────────────────────────────────────────────

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ObservabilityConfig {
    /// "log" | "none"
    #[serde(default = "default_observability_backend")]
    pub backend: String,
}

fn default_observability_backend() -> String {
    "log".into()
}

impl Default for ObservabilityConfig {
    fn default() -> Self {
        Self {
            backend: default_observability_backend(),
        }
    }
}

// ── Config impl ──────────────────────────────────────────────────

fn default_config_dir() -> PathBuf {
    let home =
        UserDirs::new().map_or_else(|| PathBuf::from("."), |u| u.home_dir().to_path_buf());
    home.join(".clawgate")
}

impl Default for Config {
    fn default() -> Self {
        let clawgate_dir = default_config_dir();

        Self {
            workspace_dir: clawgate_dir.join("workspace"),
            config_path: clawgate_dir.join("config.toml"),
            agent: AgentConfig::default(),
            gateway: GatewayConfig::default(),
            queue: QueueConfig::default(),
            workspace: WorkspaceConfig::default(),
            channels_config: ChannelsConfig::default(),
            observability: ObservabilityConfig::default(),
        }
    }
}

impl Config {
    /// Load `~/.clawgate/config.toml` (or `explicit_path`), writing defaults
    /// on first run, then apply environment overrides.
    pub fn load_or_init(explicit_path: Option<&Path>) -> Result<Self> {
        let config_path = match explicit_path {
            Some(path) => path.to_path_buf(),
            None => {
                let home = UserDirs::new()
                    .map(|u| u.home_dir().to_path_buf())
                    .context("Could not find home directory")?;
                home.join(".clawgate").join("config.toml")
            }
        };
        let mut config = Self::load_from(&config_path)?;
        config.apply_env_overrides();
        fs::create_dir_all(&config.workspace_dir).with_context(|| {
            format!(
                "Failed to create workspace directory: {}",
                config.workspace_dir.display()
            )
        })?;
        Ok(config)
    }

    /// Read a config file, creating it with defaults if it does not exist.
    /// Does not apply environment overrides.
    pub fn load_from(config_path: &Path) -> Result<Self> {
        let config_dir = config_path
            .parent()
            .context("Config path must have a parent directory")?
            .to_path_buf();

        let mut config = if config_path.exists() {
            let contents = fs::read_to_string(config_path).with_context(|| {
                format!("Failed to read config file: {}", config_path.display())
            })?;
            toml::from_str::<Config>(&contents).with_context(|| {
                format!("Failed to parse config file: {}", config_path.display())
            })?
        } else {
            let mut fresh = Config::default();
            fresh.config_path = config_path.to_path_buf();
            fresh.save()?;
            fresh
        };

        config.config_path = config_path.to_path_buf();
        config.workspace_dir = config
            .workspace
            .dir
            .clone()
            .unwrap_or_else(|| config_dir.join("workspace"));
        Ok(config)
    }

    /// Apply environment variable overrides to config
    pub fn apply_env_overrides(&mut self) {
        self.apply_overrides_from(|name| std::env::var(name).ok());
    }

    /// Override source abstracted for tests. Empty values are ignored.
    pub fn apply_overrides_from<F>(&mut self, lookup: F)
    where
        F: Fn(&str) -> Option<String>,
    {
        let get = |name: &str| lookup(name).filter(|v| !v.trim().is_empty());

        if let Some(key) = get("CLAWGATE_API_KEY") {
            self.gateway.api_key = Some(key);
        }
        if let Some(workspace) = get("CLAWGATE_WORKSPACE") {
            self.workspace_dir = PathBuf::from(workspace);
        }
        if let Some(host) = get("CLAWGATE_GATEWAY_HOST") {
            self.gateway.host = host;
        }
        if let Some(port_str) = get("CLAWGATE_GATEWAY_PORT") {
            match port_str.trim().parse::<u16>() {
                Ok(port) => self.gateway.port = port,
                Err(_) => tracing::warn!("Ignoring invalid CLAWGATE_GATEWAY_PORT: {port_str}"),
            }
        }
        if let Some(id) = get("CLAWGATE_AGENT_ID") {
            self.agent.id = id;
        }
        if let Some(command) = get("CLAWGATE_AGENT_COMMAND") {
            self.agent.command = command;
        }
    }

    /// Sandbox policy for the configured workspace.
    pub fn workspace_policy(&self) -> WorkspacePolicy {
        let mut policy = WorkspacePolicy::new(&self.workspace_dir)
            .with_dotfiles(self.workspace.allow_dotfiles)
            .with_blocked_names(&self.workspace.blocked_names);
        if let Some(extensions) = &self.workspace.allowed_extensions {
            policy = policy.with_allowed_extensions(extensions);
        }
        policy
    }

    pub fn idle_grace(&self) -> Duration {
        Duration::from_secs(self.queue.idle_eviction_secs)
    }

    /// Write the config atomically: temp file, fsync, rename.
    pub fn save(&self) -> Result<()> {
        let toml_str = toml::to_string_pretty(self).context("Failed to serialize config")?;

        let parent_dir = self
            .config_path
            .parent()
            .context("Config path must have a parent directory")?;
        fs::create_dir_all(parent_dir).with_context(|| {
            format!(
                "Failed to create config directory: {}",
                parent_dir.display()
            )
        })?;

        let file_name = self
            .config_path
            .file_name()
            .and_then(|v| v.to_str())
            .unwrap_or("config.toml");
        let temp_path = parent_dir.join(format!(".{file_name}.tmp-{}", uuid::Uuid::new_v4()));

        let mut temp_file = OpenOptions::new()
            .create_new(true)
            .write(true)
            .open(&temp_path)
            .with_context(|| {
                format!(
                    "Failed to create temporary config file: {}",
                    temp_path.display()
                )
            })?;
        temp_file
            .write_all(toml_str.as_bytes())
            .context("Failed to write temporary config contents")?;
        temp_file
            .sync_all()
            .context("Failed to fsync temporary config file")?;
        drop(temp_file);

        if let Err(e) = fs::rename(&temp_path, &self.config_path) {
            let _ = fs::remove_file(&temp_path);
            anyhow::bail!("Failed to atomically replace config file: {e}");
        }

        sync_directory(parent_dir)?;
        Ok(())
    }
}

#[cfg(unix)]
fn sync_directory(path: &Path) -> Result<()> {
    let dir = File::open(path)
        .with_context(|| format!("Failed to open directory for fsync: {}", path.display()))?;
    dir.sync_all()
        .with_context(|| format!("Failed to fsync directory metadata: {}", path.display()))?;
    Ok(())
}

#[cfg(not(unix))]
fn sync_directory(_path: &Path) -> Result<()> {
    Ok(())
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::collections::HashMap;
    use tempfile::TempDir;

    // ── Defaults ─────────────────────────────────────────────

    #[test]
    fn config_default_has_sane_values() {
        let c = Config::default();
        assert_eq!(c.agent.id, "main");
        assert_eq!(c.gateway.host, "127.0.0.1");
        assert_eq!(c.gateway.port, 3000);
        assert!(c.gateway.api_key.is_none());
        assert!(!c.gateway.allow_public_bind);
        assert_eq!(c.queue.idle_eviction_secs, 60);
        assert!(c.channels_config.cli);
        assert!(c.channels_config.telegram.is_none());
        assert_eq!(c.observability.backend, "log");
        assert!(c.workspace_dir.to_string_lossy().contains("workspace"));
        assert!(c.config_path.to_string_lossy().contains("config.toml"));
    }

    #[test]
    fn workspace_defaults_block_sensitive_names() {
        let w = WorkspaceConfig::default();
        assert!(!w.allow_dotfiles);
        assert!(w.allowed_extensions.is_none());
        assert!(w.blocked_names.contains(&".git".to_string()));
        assert!(w.blocked_names.contains(&"node_modules".to_string()));
    }

    #[test]
    fn minimal_toml_fills_defaults() {
        let c: Config = toml::from_str("").unwrap();
        assert_eq!(c.gateway.port, 3000);
        assert_eq!(c.agent.command, "claude");
        assert_eq!(c.queue.idle_eviction_secs, 60);
        assert_eq!(c.workspace.blocked_names.len(), DEFAULT_BLOCKED_NAMES.len());
    }

    #[test]
    fn telegram_section_flattens_access_policy() {
        let c: Config = toml::from_str(
            r#"
[channels_config]
cli = false

[channels_config.telegram]
bot_token = "123:ABC"
allowed_dms = ["alice"]
allowed_groups = ["*"]
respond_to_mentions_only = true
mention_names = ["claw_bot"]
"#,
        )
        .unwrap();
        assert!(!c.channels_config.cli);
        let tg = c.channels_config.telegram.unwrap();
        assert_eq!(tg.bot_token, "123:ABC");
        assert_eq!(tg.access.allowed_dms, vec!["alice"]);
        assert!(tg.access.respond_to_mentions_only);
        assert_eq!(tg.access.mention_names, vec!["claw_bot"]);
    }

    #[test]
    fn tool_servers_parse() {
        let c: Config = toml::from_str(
            r#"
[[agent.tool_servers]]
name = "search"
command = "search-server"
args = ["--stdio"]
"#,
        )
        .unwrap();
        assert_eq!(c.agent.tool_servers.len(), 1);
        assert_eq!(c.agent.tool_servers[0].args, vec!["--stdio"]);
        assert!(c.agent.tool_servers[0].env.is_empty());
    }

    // ── Env overrides ────────────────────────────────────────

    #[test]
    fn overrides_apply_and_ignore_empty_values() {
        let vars: HashMap<&str, &str> = [
            ("CLAWGATE_API_KEY", "secret"),
            ("CLAWGATE_WORKSPACE", "/tmp/ws"),
            ("CLAWGATE_GATEWAY_HOST", ""),
            ("CLAWGATE_GATEWAY_PORT", "8088"),
            ("CLAWGATE_AGENT_ID", "ops"),
            ("CLAWGATE_AGENT_COMMAND", "  "),
        ]
        .into_iter()
        .collect();
        let mut c = Config::default();
        c.apply_overrides_from(|name| vars.get(name).map(|v| (*v).to_string()));

        assert_eq!(c.gateway.api_key.as_deref(), Some("secret"));
        assert_eq!(c.workspace_dir, PathBuf::from("/tmp/ws"));
        assert_eq!(c.gateway.host, "127.0.0.1");
        assert_eq!(c.gateway.port, 8088);
        assert_eq!(c.agent.id, "ops");
        assert_eq!(c.agent.command, "claude");
    }

    #[test]
    fn invalid_port_override_is_ignored() {
        let mut c = Config::default();
        c.apply_overrides_from(|name| {
            (name == "CLAWGATE_GATEWAY_PORT").then(|| "not-a-port".to_string())
        });
        assert_eq!(c.gateway.port, 3000);
    }

    // ── Persistence ──────────────────────────────────────────

    #[test]
    fn load_from_creates_defaults_on_first_run() {
        let tmp = TempDir::new().unwrap();
        let path = tmp.path().join("config.toml");
        let c = Config::load_from(&path).unwrap();
        assert!(path.exists());
        assert_eq!(c.config_path, path);
        assert_eq!(c.workspace_dir, tmp.path().join("workspace"));
    }

    #[test]
    fn save_then_load_preserves_values() {
        let tmp = TempDir::new().unwrap();
        let path = tmp.path().join("nested").join("config.toml");
        let mut c = Config::load_from(&path).unwrap();
        c.gateway.api_key = Some("k".into());
        c.queue.idle_eviction_secs = 5;
        c.workspace.allowed_extensions = Some(vec![".md".into()]);
        c.save().unwrap();

        let reloaded = Config::load_from(&path).unwrap();
        assert_eq!(reloaded.gateway.api_key.as_deref(), Some("k"));
        assert_eq!(reloaded.idle_grace(), Duration::from_secs(5));
        assert_eq!(
            reloaded.workspace.allowed_extensions,
            Some(vec![".md".to_string()])
        );

        let leftovers: Vec<_> = fs::read_dir(path.parent().unwrap())
            .unwrap()
            .filter_map(|e| e.ok())
            .filter(|e| e.file_name().to_string_lossy().contains(".tmp-"))
            .collect();
        assert!(leftovers.is_empty());
    }

    #[test]
    fn explicit_workspace_dir_is_respected() {
        let tmp = TempDir::new().unwrap();
        let path = tmp.path().join("config.toml");
        fs::write(&path, "[workspace]\ndir = \"/srv/agent\"\n").unwrap();
        let c = Config::load_from(&path).unwrap();
        assert_eq!(c.workspace_dir, PathBuf::from("/srv/agent"));
    }

    #[test]
    fn malformed_file_reports_path() {
        let tmp = TempDir::new().unwrap();
        let path = tmp.path().join("config.toml");
        fs::write(&path, "[gateway\nport = ").unwrap();
        let err = Config::load_from(&path).unwrap_err();
        assert!(format!("{err:#}").contains("config.toml"));
    }

    #[test]
    fn workspace_policy_reflects_config() {
        let mut c = Config::default();
        c.workspace_dir = PathBuf::from("/srv/ws");
        c.workspace.allow_dotfiles = true;
        c.workspace.allowed_extensions = Some(vec!["md".into()]);
        c.workspace.blocked_names = vec!["Vault".into()];
        let policy = c.workspace_policy();
        assert_eq!(policy.root, PathBuf::from("/srv/ws"));
        assert!(policy.allow_dotfiles);
        assert!(policy.is_blocked_name("vault"));
        assert!(!policy.is_blocked_name("node_modules"));
        assert!(policy.allowed_extensions.unwrap().contains(".md"));
    }
}
