// Vault file formats
//
// A vault is a directory of markdown notes organized by topic. Each note
// carries a front-matter block; each topic directory carries a `.topic.json`
// sidecar. Both formats are shared with the SprintReader application, so the
// field names and layout here are load-bearing.

use anyhow::{Context, Result};
use chrono::{DateTime, SecondsFormat, Utc};
use serde::{Deserialize, Serialize};
use std::path::{Path, PathBuf};
use uuid::Uuid;

/// Sidecar file name inside every topic directory.
pub const TOPIC_SIDECAR: &str = ".topic.json";

/// Accent color assigned to topics that do not choose one.
pub const DEFAULT_TOPIC_COLOR: &str = "#7E22CE";

/// A single note with metadata.
#[derive(Debug, Clone, PartialEq)]
pub struct Note {
    pub id: Uuid,
    pub title: String,
    pub content: String,
    pub topic_id: Uuid,
    pub document_id: i32,
    pub page_number: i32,
    pub excerpt: String,
    pub tags: Vec<String>,
    pub created_at: DateTime<Utc>,
    pub updated_at: DateTime<Utc>,
}

/// A topic vault for organizing notes.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Topic {
    pub id: Uuid,
    pub name: String,
    #[serde(default)]
    pub description: String,
    pub created_at: DateTime<Utc>,
    #[serde(default = "default_color")]
    pub color: String,
}

fn default_color() -> String {
    DEFAULT_TOPIC_COLOR.to_string()
}

impl Topic {
    pub fn new(name: &str, description: &str, now: DateTime<Utc>) -> Self {
        Topic {
            id: Uuid::new_v4(),
            name: name.to_string(),
            description: description.to_string(),
            created_at: now,
            color: default_color(),
        }
    }
}

impl Note {
    /// Render the note as markdown with a front-matter header.
    pub fn to_markdown(&self) -> String {
        let mut out = String::new();
        out.push_str("---\n");
        out.push_str(&format!("id: {}\n", self.id));
        out.push_str(&format!("topic_id: {}\n", self.topic_id));
        out.push_str(&format!("document_id: {}\n", self.document_id));
        out.push_str(&format!("page_number: {}\n", self.page_number));
        out.push_str(&format!(
            "created_at: {}\n",
            self.created_at.to_rfc3339_opts(SecondsFormat::Secs, true)
        ));
        out.push_str(&format!(
            "updated_at: {}\n",
            self.updated_at.to_rfc3339_opts(SecondsFormat::Secs, true)
        ));
        if !self.tags.is_empty() {
            out.push_str(&format!("tags: [{}]\n", self.tags.join(", ")));
        }
        out.push_str("---\n\n");

        out.push_str(&format!("# {}\n\n", self.title));

        if !self.excerpt.is_empty() {
            out.push_str("## Excerpt\n\n");
            for line in self.excerpt.lines() {
                out.push_str(&format!("> {}\n", line));
            }
            out.push('\n');
        }

        if !self.content.is_empty() {
            out.push_str("## Notes\n\n");
            out.push_str(&self.content);
            if !self.content.ends_with('\n') {
                out.push('\n');
            }
        }

        out
    }

    /// Parse a markdown note with front matter.
    pub fn parse_markdown(text: &str) -> Result<Note> {
        let mut lines = text.lines();

        if lines.next() != Some("---") {
            anyhow::bail!("Note is missing its front-matter block");
        }

        let mut id = None;
        let mut topic_id = None;
        let mut document_id: i32 = 0;
        let mut page_number: i32 = 1;
        let mut created_at = None;
        let mut updated_at = None;
        let mut tags: Vec<String> = Vec::new();

        for line in lines.by_ref() {
            if line == "---" {
                break;
            }
            let Some((key, value)) = line.split_once(':') else {
                continue;
            };
            let key = key.trim();
            let value = value.trim();
            match key {
                "id" => id = Some(Uuid::parse_str(value).context("Invalid note id")?),
                "topic_id" => {
                    topic_id = Some(Uuid::parse_str(value).context("Invalid topic id")?)
                }
                "document_id" => {
                    document_id = value.parse().context("Invalid document_id")?;
                }
                "page_number" => {
                    page_number = value.parse().context("Invalid page_number")?;
                }
                "created_at" => {
                    created_at = Some(
                        DateTime::parse_from_rfc3339(value)
                            .context("Invalid created_at timestamp")?
                            .with_timezone(&Utc),
                    )
                }
                "updated_at" => {
                    updated_at = Some(
                        DateTime::parse_from_rfc3339(value)
                            .context("Invalid updated_at timestamp")?
                            .with_timezone(&Utc),
                    )
                }
                "tags" => {
                    tags = value
                        .trim_start_matches('[')
                        .trim_end_matches(']')
                        .split(',')
                        .map(|t| t.trim().to_string())
                        .filter(|t| !t.is_empty())
                        .collect();
                }
                _ => {}
            }
        }

        let id = id.ok_or_else(|| anyhow::anyhow!("Note front matter is missing 'id'"))?;
        let topic_id =
            topic_id.ok_or_else(|| anyhow::anyhow!("Note front matter is missing 'topic_id'"))?;
        let created_at = created_at
            .ok_or_else(|| anyhow::anyhow!("Note front matter is missing 'created_at'"))?;
        let updated_at = updated_at.unwrap_or(created_at);

        // Body: `# Title`, optional `## Excerpt` blockquote, optional `## Notes`.
        let mut title = String::new();
        let mut excerpt_lines: Vec<String> = Vec::new();
        let mut content_lines: Vec<String> = Vec::new();
        let mut section = "";

        for line in lines {
            if section.is_empty() && title.is_empty() {
                if let Some(heading) = line.strip_prefix("# ") {
                    title = heading.trim().to_string();
                    continue;
                }
            }
            if line.trim() == "## Excerpt" {
                section = "excerpt";
                continue;
            }
            if line.trim() == "## Notes" {
                section = "notes";
                continue;
            }
            match section {
                "excerpt" => {
                    if let Some(quoted) = line.strip_prefix("> ") {
                        excerpt_lines.push(quoted.to_string());
                    } else if line.trim() == ">" {
                        excerpt_lines.push(String::new());
                    }
                }
                "notes" => content_lines.push(line.to_string()),
                _ => {}
            }
        }

        if title.is_empty() {
            title = "Untitled Note".to_string();
        }

        Ok(Note {
            id,
            title,
            content: content_lines.join("\n").trim().to_string(),
            topic_id,
            document_id,
            page_number,
            excerpt: excerpt_lines.join("\n"),
            tags,
            created_at,
            updated_at,
        })
    }
}

/// Make a string safe to use as a file name.
pub fn sanitize_filename(name: &str) -> String {
    let cleaned: String = name
        .chars()
        .map(|c| {
            if c.is_alphanumeric() || c == ' ' || c == '-' || c == '_' || c == '.' {
                c
            } else {
                '_'
            }
        })
        .collect();
    let trimmed = cleaned.trim().trim_matches('.').to_string();
    if trimmed.is_empty() {
        "Untitled".to_string()
    } else {
        trimmed
    }
}

/// File name for a note, derived from its title.
pub fn note_file_name(title: &str) -> String {
    format!("{}.md", sanitize_filename(title))
}

/// Write a topic's `.topic.json` sidecar into its directory.
pub async fn write_topic_sidecar(topic_dir: &Path, topic: &Topic) -> Result<PathBuf> {
    let path = topic_dir.join(TOPIC_SIDECAR);
    let json = serde_json::to_string_pretty(topic).context("Failed to serialize topic sidecar")?;
    tokio::fs::write(&path, json)
        .await
        .with_context(|| format!("Failed to write topic sidecar: {:?}", path))?;
    Ok(path)
}

/// Read and parse a topic directory's `.topic.json` sidecar.
pub async fn read_topic_sidecar(topic_dir: &Path) -> Result<Topic> {
    let path = topic_dir.join(TOPIC_SIDECAR);
    let text = tokio::fs::read_to_string(&path)
        .await
        .with_context(|| format!("Failed to read topic sidecar: {:?}", path))?;
    serde_json::from_str(&text).with_context(|| format!("Malformed topic sidecar: {:?}", path))
}
