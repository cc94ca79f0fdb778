use std::collections::HashMap;
use std::path::{Path, PathBuf};
use anyhow::{Context, Result, anyhow};

/// One Markdown file of the book.
#[derive(Debug, Clone)]
pub struct Chapter {
    pub module: String,
    pub title: String,
    pub path: PathBuf,
    pub body: String,
}

/// A keyword search match: the chapter and the first matching line.
#[derive(Debug, Clone)]
pub struct SearchHit {
    pub chapter: usize,
    pub line: String,
}

/// The documentation tree, loaded once at startup. Chapters are ordered by
/// module directory then file name, so numeric prefixes (01-, 02-) give the
/// reading order.
pub struct Book {
    chapters: Vec<Chapter>,
    modules: Vec<String>,
    chapters_by_module: HashMap<String, Vec<usize>>,
}

impl Book {
    pub async fn load(dir: &Path) -> Result<Self> {
        if !dir.is_dir() {
            return Err(anyhow!("Book directory {:?} does not exist", dir));
        }

        let mut chapters = Vec::new();

        // Loose files at the root come first, as their own module
        for file in sorted_entries(dir, EntryKind::MarkdownFile).await? {
            chapters.push(read_chapter(&file, "Overview").await?);
        }

        for module_dir in sorted_entries(dir, EntryKind::Dir).await? {
            let module = module_dir
                .file_name()
                .and_then(|n| n.to_str())
                .unwrap_or_default()
                .to_string();
            for file in sorted_entries(&module_dir, EntryKind::MarkdownFile).await? {
                chapters.push(read_chapter(&file, &module).await?);
            }
        }

        if chapters.is_empty() {
            return Err(anyhow!("No Markdown chapters found under {:?}", dir));
        }

        let mut book = Self {
            chapters,
            modules: Vec::new(),
            chapters_by_module: HashMap::new(),
        };
        book.build_indexes();

        tracing::info!(
            chapters = book.chapters.len(),
            modules = book.modules.len(),
            "loaded book from {:?}",
            dir
        );

        Ok(book)
    }

    fn build_indexes(&mut self) {
        let mut modules_order = Vec::new();
        let mut by_module: HashMap<String, Vec<usize>> = HashMap::new();

        // Process in load order to preserve the reading sequence
        for (idx, chapter) in self.chapters.iter().enumerate() {
            if !by_module.contains_key(&chapter.module) {
                modules_order.push(chapter.module.clone());
            }
            by_module.entry(chapter.module.clone()).or_default().push(idx);
        }

        self.modules = modules_order;
        self.chapters_by_module = by_module;
    }

    pub fn modules(&self) -> &[String] {
        &self.modules
    }

    pub fn chapters_in(&self, module: &str) -> &[usize] {
        self.chapters_by_module
            .get(module)
            .map(|v| v.as_slice())
            .unwrap_or(&[])
    }

    pub fn chapter(&self, idx: usize) -> Option<&Chapter> {
        self.chapters.get(idx)
    }

    pub fn len(&self) -> usize {
        self.chapters.len()
    }

    pub fn is_empty(&self) -> bool {
        self.chapters.is_empty()
    }

    /// Case-insensitive substring search over titles and bodies.
    pub fn search(&self, query: &str, limit: usize) -> Vec<SearchHit> {
        let query_lower = query.to_lowercase();
        let mut hits = Vec::new();

        for (idx, chapter) in self.chapters.iter().enumerate() {
            if hits.len() >= limit {
                break;
            }

            if chapter.title.to_lowercase().contains(&query_lower) {
                let line = chapter
                    .body
                    .lines()
                    .find(|l| !l.trim().is_empty())
                    .unwrap_or(&chapter.title)
                    .trim()
                    .to_string();
                hits.push(SearchHit { chapter: idx, line });
                continue;
            }

            if let Some(line) = chapter
                .body
                .lines()
                .find(|l| l.to_lowercase().contains(&query_lower))
            {
                hits.push(SearchHit {
                    chapter: idx,
                    line: line.trim().to_string(),
                });
            }
        }

        hits
    }
}

enum EntryKind {
    Dir,
    MarkdownFile,
}

async fn sorted_entries(dir: &Path, kind: EntryKind) -> Result<Vec<PathBuf>> {
    let mut entries = Vec::new();
    let mut reader = tokio::fs::read_dir(dir)
        .await
        .with_context(|| format!("Failed to read {:?}", dir))?;

    while let Some(entry) = reader.next_entry().await? {
        let path = entry.path();
        let name = entry.file_name();
        let name = name.to_string_lossy();
        if name.starts_with('.') || name.starts_with('_') {
            continue;
        }
        let matches = match kind {
            EntryKind::Dir => path.is_dir(),
            EntryKind::MarkdownFile => {
                path.is_file()
                    && matches!(
                        path.extension().and_then(|e| e.to_str()),
                        Some("md") | Some("mdx")
                    )
            }
        };
        if matches {
            entries.push(path);
        }
    }

    entries.sort();
    Ok(entries)
}

async fn read_chapter(path: &Path, module: &str) -> Result<Chapter> {
    let content = tokio::fs::read_to_string(path)
        .await
        .with_context(|| format!("Failed to read chapter {:?}", path))?;

    let (front_matter, body) = split_front_matter(&content);
    let title = front_matter
        .and_then(front_matter_title)
        .or_else(|| heading_title(body))
        .unwrap_or_else(|| {
            path.file_stem()
                .and_then(|s| s.to_str())
                .unwrap_or("Untitled")
                .to_string()
        });

    Ok(Chapter {
        module: module.to_string(),
        title,
        path: path.to_path_buf(),
        body: body.trim_start().to_string(),
    })
}

/// Split a leading `--- ... ---` front-matter block off the content.
fn split_front_matter(content: &str) -> (Option<&str>, &str) {
    let rest = match content.strip_prefix("---") {
        Some(rest) => rest,
        None => return (None, content),
    };
    match rest.find("\n---") {
        Some(end) => {
            let front = &rest[..end];
            let body = rest[end + 4..].trim_start_matches('-').trim_start_matches('\n');
            (Some(front), body)
        }
        None => (None, content),
    }
}

fn front_matter_title(front: &str) -> Option<String> {
    for line in front.lines() {
        if let Some(value) = line.trim().strip_prefix("title:") {
            let value = value.trim().trim_matches('"').trim_matches('\'');
            if !value.is_empty() {
                return Some(value.to_string());
            }
        }
    }
    None
}

fn heading_title(body: &str) -> Option<String> {
    body.lines()
        .find_map(|line| line.strip_prefix("# "))
        .map(|t| t.trim().to_string())
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::fs;
    use tempfile::TempDir;

    fn write(dir: &Path, rel: &str, content: &str) {
        let path = dir.join(rel);
        fs::create_dir_all(path.parent().unwrap()).unwrap();
        fs::write(path, content).unwrap();
    }

    fn fixture() -> TempDir {
        let tmp = TempDir::new().unwrap();
        let root = tmp.path();
        write(root, "intro.md", "# Welcome\n\nStart here.");
        write(
            root,
            "01-basics/01-nodes.md",
            "---\ntitle: \"Nodes and Topics\"\nsidebar_position: 1\n---\n\nA node is a process that talks over topics.",
        );
        write(root, "01-basics/02-launch.md", "# Launch Files\n\nLaunching many nodes at once.");
        write(root, "02-simulation/01-gazebo.md", "# Gazebo\n\nSimulate robots in Gazebo.");
        write(root, "02-simulation/notes.txt", "not a chapter");
        tmp
    }

    #[tokio::test]
    async fn test_load_orders_modules_and_chapters() {
        let tmp = fixture();
        let book = Book::load(tmp.path()).await.unwrap();

        assert_eq!(book.len(), 4);
        assert_eq!(book.modules(), &["Overview", "01-basics", "02-simulation"]);

        let basics: Vec<&str> = book
            .chapters_in("01-basics")
            .iter()
            .map(|&i| book.chapter(i).unwrap().title.as_str())
            .collect();
        assert_eq!(basics, vec!["Nodes and Topics", "Launch Files"]);
    }

    #[tokio::test]
    async fn test_titles_from_front_matter_and_heading() {
        let tmp = fixture();
        let book = Book::load(tmp.path()).await.unwrap();

        let overview = book.chapters_in("Overview");
        assert_eq!(book.chapter(overview[0]).unwrap().title, "Welcome");

        let basics = book.chapters_in("01-basics");
        let nodes = book.chapter(basics[0]).unwrap();
        assert_eq!(nodes.title, "Nodes and Topics");
        // Front matter is stripped from the body
        assert!(!nodes.body.contains("sidebar_position"));
        assert!(nodes.body.starts_with("A node is a process"));
    }

    #[tokio::test]
    async fn test_search_matches_title_and_body() {
        let tmp = fixture();
        let book = Book::load(tmp.path()).await.unwrap();

        let by_title = book.search("gazebo", 10);
        assert_eq!(by_title.len(), 1);
        assert_eq!(book.chapter(by_title[0].chapter).unwrap().title, "Gazebo");

        let by_body = book.search("talks over topics", 10);
        assert_eq!(by_body.len(), 1);
        assert!(by_body[0].line.contains("talks over topics"));

        assert!(book.search("no such text", 10).is_empty());
    }

    #[tokio::test]
    async fn test_search_respects_limit() {
        let tmp = fixture();
        let book = Book::load(tmp.path()).await.unwrap();
        // Every chapter body mentions a noun; "a" appears everywhere
        let hits = book.search("a", 2);
        assert_eq!(hits.len(), 2);
    }

    #[tokio::test]
    async fn test_missing_dir_is_an_error() {
        let tmp = TempDir::new().unwrap();
        let missing = tmp.path().join("nope");
        assert!(Book::load(&missing).await.is_err());
    }

    #[test]
    fn test_split_front_matter_without_close_is_literal() {
        let content = "---\ntitle: broken\nno close";
        let (front, body) = split_front_matter(content);
        assert!(front.is_none());
        assert_eq!(body, content);
    }
}
