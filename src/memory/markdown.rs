use super::traits::{MemoryMatch, MemorySearchHit, MemoryStore};
use anyhow::Context;
use async_trait::async_trait;
use chrono::{Duration, Local, NaiveDate};
use std::path::{Path, PathBuf};
use tokio::fs;

/// How many of the newest daily files a search covers.
pub const SEARCH_DAILY_FILES: usize = 30;

/// Markdown-based memory. Plain files are the source of truth.
///
/// Layout:
///   workspace/MEMORY.md             curated long-term memory
///   workspace/memory/YYYY-MM-DD.md  daily logs (append-only)
pub struct MarkdownMemory {
    workspace_dir: PathBuf,
}

impl MarkdownMemory {
    pub fn new(workspace_dir: &Path) -> Self {
        Self {
            workspace_dir: workspace_dir.to_path_buf(),
        }
    }

    fn memory_dir(&self) -> PathBuf {
        self.workspace_dir.join("memory")
    }

    fn long_term_path(&self) -> PathBuf {
        self.workspace_dir.join("MEMORY.md")
    }

    fn daily_path(&self, date: NaiveDate) -> PathBuf {
        self.memory_dir().join(daily_file_name(date))
    }

    fn today() -> NaiveDate {
        Local::now().date_naive()
    }

    pub async fn read_daily(&self, date: NaiveDate) -> anyhow::Result<String> {
        read_or_empty(&self.daily_path(date)).await
    }

    async fn append_to_file(&self, path: &Path, header: &str, content: &str) -> anyhow::Result<()> {
        fs::create_dir_all(self.memory_dir())
            .await
            .context("Failed to create memory directory")?;

        let existing = read_or_empty(path).await?;
        let updated = if existing.is_empty() {
            format!("{header}\n\n{content}\n")
        } else {
            format!("{existing}\n{content}\n")
        };

        fs::write(path, updated)
            .await
            .with_context(|| format!("Failed to write {}", path.display()))?;
        Ok(())
    }

    pub async fn append_daily_for(&self, date: NaiveDate, content: &str) -> anyhow::Result<()> {
        let header = format!("# Daily Log — {}", date.format("%Y-%m-%d"));
        self.append_to_file(&self.daily_path(date), &header, content)
            .await
    }
}

fn daily_file_name(date: NaiveDate) -> String {
    format!("{}.md", date.format("%Y-%m-%d"))
}

fn parse_daily_file_name(name: &str) -> Option<NaiveDate> {
    let stem = name.strip_suffix(".md")?;
    NaiveDate::parse_from_str(stem, "%Y-%m-%d").ok()
}

async fn read_or_empty(path: &Path) -> anyhow::Result<String> {
    match fs::read_to_string(path).await {
        Ok(content) => Ok(content),
        Err(e) if e.kind() == std::io::ErrorKind::NotFound => Ok(String::new()),
        Err(e) => Err(e).with_context(|| format!("Failed to read {}", path.display())),
    }
}

/// Case-insensitive substring matches with one line of context each side.
fn find_matches(content: &str, query_lower: &str) -> Vec<MemoryMatch> {
    let lines: Vec<&str> = content.lines().collect();
    lines
        .iter()
        .enumerate()
        .filter(|(_, line)| line.to_lowercase().contains(query_lower))
        .map(|(i, _)| {
            let start = i.saturating_sub(1);
            let end = (i + 2).min(lines.len());
            MemoryMatch {
                line: i + 1,
                context: lines[start..end].join("\n"),
            }
        })
        .collect()
}

#[async_trait]
impl MemoryStore for MarkdownMemory {
    fn name(&self) -> &str {
        "markdown"
    }

    async fn read_today(&self) -> anyhow::Result<String> {
        self.read_daily(Self::today()).await
    }

    async fn read_yesterday(&self) -> anyhow::Result<String> {
        self.read_daily(Self::today() - Duration::days(1)).await
    }

    async fn read_long_term(&self) -> anyhow::Result<String> {
        read_or_empty(&self.long_term_path()).await
    }

    async fn list_daily_files(&self) -> anyhow::Result<Vec<String>> {
        let mem_dir = self.memory_dir();
        let mut dir = match fs::read_dir(&mem_dir).await {
            Ok(dir) => dir,
            Err(e) if e.kind() == std::io::ErrorKind::NotFound => return Ok(Vec::new()),
            Err(e) => {
                return Err(e)
                    .with_context(|| format!("Failed to list {}", mem_dir.display()));
            }
        };

        let mut dated = Vec::new();
        while let Some(entry) = dir.next_entry().await? {
            let name = entry.file_name().to_string_lossy().to_string();
            if let Some(date) = parse_daily_file_name(&name) {
                dated.push((date, name));
            }
        }
        dated.sort_by(|a, b| b.0.cmp(&a.0));
        Ok(dated.into_iter().map(|(_, name)| name).collect())
    }

    async fn search(&self, query: &str) -> anyhow::Result<Vec<MemorySearchHit>> {
        let query_lower = query.trim().to_lowercase();
        if query_lower.is_empty() {
            return Ok(Vec::new());
        }

        let mut hits = Vec::new();
        let long_term = self.read_long_term().await?;
        let matches = find_matches(&long_term, &query_lower);
        if !matches.is_empty() {
            hits.push(MemorySearchHit {
                file: "MEMORY.md".into(),
                matches,
            });
        }

        for name in self
            .list_daily_files()
            .await?
            .into_iter()
            .take(SEARCH_DAILY_FILES)
        {
            let content = read_or_empty(&self.memory_dir().join(&name)).await?;
            let matches = find_matches(&content, &query_lower);
            if !matches.is_empty() {
                hits.push(MemorySearchHit {
                    file: format!("memory/{name}"),
                    matches,
                });
            }
        }
        Ok(hits)
    }

    async fn append_daily(&self, content: &str) -> anyhow::Result<()> {
        self.append_daily_for(Self::today(), content).await
    }

    async fn append_long_term(&self, content: &str) -> anyhow::Result<()> {
        self.append_to_file(&self.long_term_path(), "# Long-Term Memory", content)
            .await
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use tempfile::TempDir;

    fn date(s: &str) -> NaiveDate {
        NaiveDate::parse_from_str(s, "%Y-%m-%d").unwrap()
    }

    fn temp_memory() -> (TempDir, MarkdownMemory) {
        let tmp = TempDir::new().unwrap();
        let mem = MarkdownMemory::new(tmp.path());
        (tmp, mem)
    }

    #[tokio::test]
    async fn missing_files_read_as_empty() {
        let (_tmp, mem) = temp_memory();
        assert_eq!(mem.read_long_term().await.unwrap(), "");
        assert_eq!(mem.read_today().await.unwrap(), "");
        assert_eq!(mem.read_yesterday().await.unwrap(), "");
        assert!(mem.list_daily_files().await.unwrap().is_empty());
        assert!(mem.search("x").await.unwrap().is_empty());
    }

    #[tokio::test]
    async fn append_long_term_writes_header_once() {
        let (tmp, mem) = temp_memory();
        mem.append_long_term("- prefers Rust").await.unwrap();
        mem.append_long_term("- lives in Lisbon").await.unwrap();
        let content = fs::read_to_string(tmp.path().join("MEMORY.md")).await.unwrap();
        assert!(content.starts_with("# Long-Term Memory"));
        assert_eq!(content.matches("# Long-Term Memory").count(), 1);
        assert!(content.contains("prefers Rust"));
        assert!(content.contains("lives in Lisbon"));
    }

    #[tokio::test]
    async fn append_daily_goes_to_todays_file() {
        let (_tmp, mem) = temp_memory();
        mem.append_daily("- shipped the gateway").await.unwrap();
        let today = mem.read_today().await.unwrap();
        assert!(today.contains("# Daily Log"));
        assert!(today.contains("shipped the gateway"));
        assert_eq!(mem.list_daily_files().await.unwrap().len(), 1);
    }

    #[tokio::test]
    async fn daily_files_listed_newest_first_ignoring_others() {
        let (tmp, mem) = temp_memory();
        for d in ["2026-01-02", "2026-03-10", "2025-12-31"] {
            mem.append_daily_for(date(d), "entry").await.unwrap();
        }
        std::fs::write(tmp.path().join("memory/notes.md"), "x").unwrap();
        std::fs::write(tmp.path().join("memory/2026-13-01.md"), "x").unwrap();

        assert_eq!(
            mem.list_daily_files().await.unwrap(),
            vec!["2026-03-10.md", "2026-01-02.md", "2025-12-31.md"]
        );
    }

    #[tokio::test]
    async fn search_is_case_insensitive_with_context() {
        let (_tmp, mem) = temp_memory();
        mem.append_long_term("- Alpha\n- Deploy target is Fly\n- Omega")
            .await
            .unwrap();
        mem.append_daily_for(date("2026-02-01"), "- deploy went fine")
            .await
            .unwrap();

        let hits = mem.search("DEPLOY").await.unwrap();
        assert_eq!(hits.len(), 2);
        assert_eq!(hits[0].file, "MEMORY.md");
        let m = &hits[0].matches[0];
        assert_eq!(m.context, "- Alpha\n- Deploy target is Fly\n- Omega");
        assert_eq!(m.line, 4);
        assert_eq!(hits[1].file, "memory/2026-02-01.md");
    }

    #[tokio::test]
    async fn search_covers_only_recent_daily_files() {
        let (_tmp, mem) = temp_memory();
        let start = date("2026-01-01");
        for i in 0..(SEARCH_DAILY_FILES as i64 + 5) {
            mem.append_daily_for(start + Duration::days(i), "needle")
                .await
                .unwrap();
        }
        let hits = mem.search("needle").await.unwrap();
        assert_eq!(hits.len(), SEARCH_DAILY_FILES);
        assert!(hits.iter().all(|h| h.file != "memory/2026-01-01.md"));
    }

    #[test]
    fn find_matches_edges() {
        let matches = find_matches("hit\nmiss\nhit", "hit");
        assert_eq!(matches.len(), 2);
        assert_eq!(matches[0].context, "hit\nmiss");
        assert_eq!(matches[1].context, "miss\nhit");
        assert_eq!(matches[1].line, 3);
    }
}
