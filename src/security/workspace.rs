//! Workspace path sandbox.
//!
//! Every file-touching tool resolves its path argument through [`PathSandbox`]
//! before any I/O happens. Resolution is purely lexical: structural patterns
//! (`..`, `~`, NUL) are rejected on the raw input, then the joined path is
//! normalized and required to stay under the workspace root. Dotfile and
//! blocked-name checks scan every segment of the relative portion, so a
//! blocked directory is caught at any depth.

use serde::Serialize;
use std::collections::HashSet;
use std::path::{Component, Path, PathBuf};

/// Names that are never reachable through the sandbox, matched
/// case-insensitively against every path segment.
pub const DEFAULT_BLOCKED_NAMES: &[&str] = &[
    ".git",
    ".svn",
    ".hg",
    ".env",
    ".ssh",
    ".gnupg",
    ".aws",
    ".npmrc",
    ".netrc",
    "node_modules",
    "credentials.json",
    "secrets.json",
    "id_rsa",
    "id_ed25519",
];

#[derive(Debug, Clone, PartialEq, Eq, thiserror::Error)]
pub enum SandboxError {
    #[error("path contains a blocked pattern: {0}")]
    BlockedPattern(String),
    #[error("path escapes the workspace: {0}")]
    EscapesWorkspace(String),
    #[error("access to '{segment}' is restricted: {reason}")]
    RestrictedAccess { segment: String, reason: String },
    #[error("file extension not allowed: {0}")]
    ExtensionNotAllowed(String),
    #[error("path is outside the workspace: {0}")]
    OutsideWorkspace(String),
    #[error("invalid workspace root: {0}")]
    InvalidRoot(String),
}

impl SandboxError {
    /// Short machine-readable tag, used in API payloads.
    pub fn kind(&self) -> &'static str {
        match self {
            Self::BlockedPattern(_) => "blocked_pattern",
            Self::EscapesWorkspace(_) => "escapes_workspace",
            Self::RestrictedAccess { .. } => "restricted_access",
            Self::ExtensionNotAllowed(_) => "extension_not_allowed",
            Self::OutsideWorkspace(_) => "outside_workspace",
            Self::InvalidRoot(_) => "invalid_root",
        }
    }
}

/// Immutable access rules for one workspace root.
#[derive(Debug, Clone)]
pub struct WorkspacePolicy {
    pub root: PathBuf,
    pub allow_dotfiles: bool,
    /// Lower-cased extensions with a leading dot (".md"). `None` allows all.
    pub allowed_extensions: Option<HashSet<String>>,
    /// Lower-cased segment names.
    pub blocked_names: HashSet<String>,
}

impl WorkspacePolicy {
    pub fn new(root: impl Into<PathBuf>) -> Self {
        Self {
            root: root.into(),
            allow_dotfiles: false,
            allowed_extensions: None,
            blocked_names: DEFAULT_BLOCKED_NAMES
                .iter()
                .map(|name| (*name).to_string())
                .collect(),
        }
    }

    pub fn with_dotfiles(mut self, allow: bool) -> Self {
        self.allow_dotfiles = allow;
        self
    }

    /// Accepts extensions with or without the leading dot, in any case.
    pub fn with_allowed_extensions<I, S>(mut self, extensions: I) -> Self
    where
        I: IntoIterator<Item = S>,
        S: AsRef<str>,
    {
        self.allowed_extensions = Some(
            extensions
                .into_iter()
                .map(|ext| normalize_extension(ext.as_ref()))
                .filter(|ext| ext.len() > 1)
                .collect(),
        );
        self
    }

    pub fn with_blocked_names<I, S>(mut self, names: I) -> Self
    where
        I: IntoIterator<Item = S>,
        S: AsRef<str>,
    {
        self.blocked_names = names
            .into_iter()
            .map(|name| name.as_ref().trim().to_lowercase())
            .filter(|name| !name.is_empty())
            .collect();
        self
    }

    pub fn is_blocked_name(&self, segment: &str) -> bool {
        self.blocked_names.contains(&segment.to_lowercase())
    }
}

fn normalize_extension(ext: &str) -> String {
    let ext = ext.trim().to_lowercase();
    if ext.starts_with('.') {
        ext
    } else {
        format!(".{ext}")
    }
}

/// Outcome of [`PathSandbox::validate`].
#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct PathValidation {
    pub valid: bool,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub resolved: Option<PathBuf>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub error: Option<String>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub kind: Option<&'static str>,
}

/// Resolves relative paths against a fixed workspace root under a [`WorkspacePolicy`].
#[derive(Debug, Clone)]
pub struct PathSandbox {
    policy: WorkspacePolicy,
    root: PathBuf,
}

impl PathSandbox {
    /// The root is made absolute (against the current directory) and
    /// lexically normalized. It does not need to exist yet.
    pub fn new(policy: WorkspacePolicy) -> Result<Self, SandboxError> {
        let raw = policy.root.clone();
        if raw.as_os_str().is_empty() {
            return Err(SandboxError::InvalidRoot("empty path".into()));
        }
        let absolute = if raw.is_absolute() {
            raw
        } else {
            std::env::current_dir()
                .map_err(|e| SandboxError::InvalidRoot(e.to_string()))?
                .join(raw)
        };
        let root = normalize_lexically(&absolute);
        Ok(Self { policy, root })
    }

    pub fn root(&self) -> &Path {
        &self.root
    }

    pub fn policy(&self) -> &WorkspacePolicy {
        &self.policy
    }

    /// Resolve `relative` to an absolute path inside the workspace.
    ///
    /// Checks, in order: structural patterns on the raw input, containment
    /// after normalization, dotfile segments, blocked-name segments, and the
    /// extension allow-list.
    pub fn resolve(&self, relative: &str) -> Result<PathBuf, SandboxError> {
        self.resolve_inner(relative, true)
    }

    /// Like [`resolve`](Self::resolve) but for directories: the extension
    /// allow-list only applies to files, so it is skipped here.
    pub fn resolve_directory(&self, relative: &str) -> Result<PathBuf, SandboxError> {
        self.resolve_inner(relative, false)
    }

    fn resolve_inner(&self, relative: &str, check_extension: bool) -> Result<PathBuf, SandboxError> {
        if let Some(pattern) = find_blocked_pattern(relative) {
            return Err(SandboxError::BlockedPattern(pattern.to_string()));
        }

        let joined = normalize_lexically(&self.root.join(relative));
        let Ok(inside) = joined.strip_prefix(&self.root) else {
            return Err(SandboxError::EscapesWorkspace(relative.to_string()));
        };

        for segment in inside.components().filter_map(segment_str) {
            if segment.starts_with('.') && !self.policy.allow_dotfiles {
                return Err(SandboxError::RestrictedAccess {
                    segment: segment.to_string(),
                    reason: "hidden files are not accessible".into(),
                });
            }
            if self.policy.is_blocked_name(segment) {
                return Err(SandboxError::RestrictedAccess {
                    segment: segment.to_string(),
                    reason: "name is on the blocklist".into(),
                });
            }
        }

        if let Some(allowed) = self
            .policy
            .allowed_extensions
            .as_ref()
            .filter(|_| check_extension)
        {
            let extension = joined
                .extension()
                .and_then(|ext| ext.to_str())
                .map(|ext| format!(".{}", ext.to_lowercase()));
            match extension {
                Some(ext) if allowed.contains(&ext) => {}
                Some(ext) => return Err(SandboxError::ExtensionNotAllowed(ext)),
                None => return Err(SandboxError::ExtensionNotAllowed("(none)".into())),
            }
        }

        Ok(joined)
    }

    /// Non-failing wrapper around [`resolve`](Self::resolve) for advisory callers.
    pub fn validate(&self, relative: &str) -> PathValidation {
        match self.resolve(relative) {
            Ok(resolved) => PathValidation {
                valid: true,
                resolved: Some(resolved),
                error: None,
                kind: None,
            },
            Err(e) => PathValidation {
                valid: false,
                resolved: None,
                error: Some(e.to_string()),
                kind: Some(e.kind()),
            },
        }
    }

    /// Inverse of [`resolve`](Self::resolve): workspace-relative form of an absolute path.
    pub fn relative_path(&self, absolute: &Path) -> Result<PathBuf, SandboxError> {
        let normalized = normalize_lexically(absolute);
        normalized
            .strip_prefix(&self.root)
            .map(Path::to_path_buf)
            .map_err(|_| SandboxError::OutsideWorkspace(absolute.display().to_string()))
    }

    /// Re-check an already resolved path after following symlinks.
    ///
    /// Lexical resolution cannot see symlinks, so callers that are about to
    /// touch an existing path canonicalize it and confirm it still lives under
    /// the canonical root.
    pub async fn ensure_within_after_symlinks(&self, resolved: &Path) -> anyhow::Result<PathBuf> {
        let canonical_root = tokio::fs::canonicalize(&self.root)
            .await
            .unwrap_or_else(|_| self.root.clone());
        let canonical = tokio::fs::canonicalize(resolved).await?;
        if canonical.starts_with(&canonical_root) {
            Ok(canonical)
        } else {
            Err(SandboxError::EscapesWorkspace(canonical.display().to_string()).into())
        }
    }

    /// Check the nearest existing ancestor of `resolved` after following
    /// symlinks. Run this before creating missing directories so a symlinked
    /// directory cannot make the creation land outside the workspace.
    ///
    /// A missing workspace root is not an error: everything above it is
    /// outside the sandbox's concern and the root gets created normally.
    pub async fn ensure_ancestor_within(&self, resolved: &Path) -> anyhow::Result<PathBuf> {
        let mut current = resolved;
        loop {
            if tokio::fs::symlink_metadata(current).await.is_ok() {
                if current != self.root && self.root.starts_with(current) {
                    return Ok(current.to_path_buf());
                }
                return self.ensure_within_after_symlinks(current).await;
            }
            current = current
                .parent()
                .ok_or_else(|| SandboxError::EscapesWorkspace(resolved.display().to_string()))?;
        }
    }

    pub async fn exists(&self, relative: &str) -> bool {
        match self.resolve(relative) {
            Ok(path) => tokio::fs::try_exists(&path).await.unwrap_or(false),
            Err(_) => false,
        }
    }

    pub async fn is_file(&self, relative: &str) -> bool {
        match self.resolve(relative) {
            Ok(path) => tokio::fs::metadata(&path)
                .await
                .is_ok_and(|meta| meta.is_file()),
            Err(_) => false,
        }
    }

    pub async fn is_directory(&self, relative: &str) -> bool {
        match self.resolve_directory(relative) {
            Ok(path) => tokio::fs::metadata(&path)
                .await
                .is_ok_and(|meta| meta.is_dir()),
            Err(_) => false,
        }
    }
}

/// Structural patterns rejected before any resolution happens.
fn find_blocked_pattern(raw: &str) -> Option<&'static str> {
    if raw.contains('\0') {
        return Some("null byte");
    }
    for segment in raw.split(['/', '\\']) {
        if segment == ".." {
            return Some("parent directory traversal");
        }
        if segment.starts_with('~') {
            return Some("home directory shorthand");
        }
    }
    None
}

fn segment_str(component: Component<'_>) -> Option<&str> {
    match component {
        Component::Normal(name) => name.to_str(),
        _ => None,
    }
}

/// Collapse `.` and `..` without touching the filesystem.
fn normalize_lexically(path: &Path) -> PathBuf {
    let mut out = PathBuf::new();
    for component in path.components() {
        match component {
            Component::CurDir => {}
            Component::ParentDir => {
                out.pop();
            }
            other => out.push(other.as_os_str()),
        }
    }
    out
}
