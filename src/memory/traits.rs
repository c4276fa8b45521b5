use async_trait::async_trait;
use serde::Serialize;

/// One matching line inside a memory file.
#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct MemoryMatch {
    /// 1-based line number.
    pub line: usize,
    /// The matching line with one line before and after, newline separated.
    pub context: String,
}

/// All matches within one file.
#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct MemorySearchHit {
    /// Path relative to the memory root, e.g. `MEMORY.md` or `memory/2026-01-31.md`.
    pub file: String,
    pub matches: Vec<MemoryMatch>,
}

/// Long-term and daily memory files the command router reads.
///
/// Reads of missing files return an empty string, not an error.
#[async_trait]
pub trait MemoryStore: Send + Sync {
    fn name(&self) -> &str;

    async fn read_today(&self) -> anyhow::Result<String>;

    async fn read_yesterday(&self) -> anyhow::Result<String>;

    async fn read_long_term(&self) -> anyhow::Result<String>;

    /// Daily file names (`YYYY-MM-DD.md`), newest first.
    async fn list_daily_files(&self) -> anyhow::Result<Vec<String>>;

    /// Case-insensitive substring search over long-term memory and recent
    /// daily files. Files without matches are omitted.
    async fn search(&self, query: &str) -> anyhow::Result<Vec<MemorySearchHit>>;

    async fn append_daily(&self, content: &str) -> anyhow::Result<()>;

    async fn append_long_term(&self, content: &str) -> anyhow::Result<()>;
}
