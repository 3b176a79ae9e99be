use crate::config::CONFIG_DIR;
use crate::error::{EngineError, EngineResult};
use crate::storage;
use crate::value::{display_string, strip_quotes};
use anyhow::{Context, Result};
use chrono::Utc;
use futures::TryStreamExt;
use opendal::Operator;
use regex::Regex;
use serde::{Deserialize, Serialize};
use serde_json::{Map, Value};
use std::collections::BTreeMap;
use std::sync::OnceLock;

const STAT_FILE: &str = "stat.json";
pub const NOTE_EXTENSION: &str = "md";
pub const BASE_EXTENSION: &str = "base";

/// A markdown note with its cached metadata.
#[derive(Serialize, Deserialize, Debug, Clone, PartialEq)]
pub struct Note {
    pub path: String,
    pub name: String,
    pub ext: String,
    pub folder: String,
    pub size: u64,
    pub ctime: i64,
    pub mtime: i64,
    #[serde(default)]
    pub frontmatter: Map<String, Value>,
    #[serde(default)]
    pub tags: Vec<String>,
    #[serde(default)]
    pub links: Vec<String>,
}

impl Note {
    /// Builds a note from its markdown text. Timestamps come from the ledger.
    pub fn from_markdown(path: &str, markdown: &str, stat: FileStat) -> Self {
        let path = normalize_note_path(path);
        let (name, folder) = match path.rsplit_once('/') {
            Some((folder, name)) => (name.to_string(), folder.to_string()),
            None => (path.clone(), String::new()),
        };
        let ext = name
            .rsplit_once('.')
            .map(|(_, ext)| ext.to_string())
            .unwrap_or_default();

        let (yaml, body) = split_frontmatter(markdown);
        let frontmatter = yaml.map(parse_frontmatter).unwrap_or_default();
        let tags = extract_tags(&frontmatter, body);
        let links = extract_links(&frontmatter, body);

        Note {
            path,
            name,
            ext,
            folder,
            size: markdown.len() as u64,
            ctime: stat.ctime,
            mtime: stat.mtime,
            frontmatter,
            tags,
            links,
        }
    }
}

#[derive(Serialize, Deserialize, Debug, Clone, Copy, Default, PartialEq)]
pub struct FileStat {
    pub ctime: i64,
    pub mtime: i64,
}

#[derive(Serialize, Deserialize, Debug, Default)]
struct StatLedger {
    #[serde(default)]
    files: BTreeMap<String, FileStat>,
}

pub fn now_ms() -> i64 {
    Utc::now().timestamp_millis()
}

pub fn normalize_note_path(path: &str) -> String {
    let replaced = path.trim().replace('\\', "/");
    let mut trimmed = replaced.trim_start_matches('/');
    while let Some(rest) = trimmed.strip_prefix("./") {
        trimmed = rest;
    }
    trimmed.to_string()
}

fn stat_path(vault_path: &str) -> String {
    storage::join(vault_path, &format!("{}/{}", CONFIG_DIR, STAT_FILE))
}

async fn read_ledger(op: &Operator, vault_path: &str) -> Result<StatLedger> {
    let path = stat_path(vault_path);
    if !op.exists(&path).await? {
        return Ok(StatLedger::default());
    }
    let bytes = op.read(&path).await?;
    Ok(serde_json::from_slice(&bytes.to_vec()).unwrap_or_default())
}

async fn write_ledger(op: &Operator, vault_path: &str, ledger: &StatLedger) -> Result<()> {
    let path = stat_path(vault_path);
    storage::ensure_parent_dirs(op, &path).await?;
    op.write(&path, serde_json::to_vec_pretty(ledger)?).await?;
    Ok(())
}

/// Records a write and returns the new stat. mtime strictly increases.
async fn touch(op: &Operator, vault_path: &str, rel: &str) -> Result<FileStat> {
    let mut ledger = read_ledger(op, vault_path).await?;
    let now = now_ms();
    let stat = match ledger.files.get(rel) {
        Some(prev) => FileStat {
            ctime: prev.ctime,
            mtime: if now <= prev.mtime { prev.mtime + 1 } else { now },
        },
        None => FileStat {
            ctime: now,
            mtime: now,
        },
    };
    ledger.files.insert(rel.to_string(), stat);
    write_ledger(op, vault_path, &ledger).await?;
    Ok(stat)
}

fn is_engine_path(rel: &str) -> bool {
    rel == CONFIG_DIR || rel.starts_with(&format!("{}/", CONFIG_DIR))
}

fn has_extension(rel: &str, ext: &str) -> bool {
    rel.rsplit_once('.')
        .map(|(_, e)| e.eq_ignore_ascii_case(ext))
        .unwrap_or(false)
}

/// Lists vault-relative paths with the given extension, sorted.
pub async fn list_paths(op: &Operator, vault_path: &str, ext: &str) -> Result<Vec<String>> {
    let root = vault_path.trim_matches('/');
    let dir = if root.is_empty() {
        "/".to_string()
    } else {
        format!("{}/", root)
    };
    let mut lister = match op.lister_with(&dir).recursive(true).await {
        Ok(lister) => lister,
        Err(err) if err.kind() == opendal::ErrorKind::NotFound => return Ok(Vec::new()),
        Err(err) => return Err(err.into()),
    };

    let mut paths = Vec::new();
    while let Some(entry) = lister.try_next().await? {
        let full = entry.path();
        if full.ends_with('/') {
            continue;
        }
        let rel = storage::relative(vault_path, full);
        if is_engine_path(rel) || !has_extension(rel, ext) {
            continue;
        }
        paths.push(rel.to_string());
    }
    paths.sort();
    paths.dedup();
    Ok(paths)
}

/// Every markdown note in the vault, in path order.
pub async fn list_notes(op: &Operator, vault_path: &str) -> Result<Vec<Note>> {
    let ledger = read_ledger(op, vault_path).await?;
    let mut notes = Vec::new();
    for rel in list_paths(op, vault_path, NOTE_EXTENSION).await? {
        let bytes = op.read(&storage::join(vault_path, &rel)).await?;
        let markdown = String::from_utf8_lossy(&bytes.to_vec()).into_owned();
        let stat = ledger.files.get(&rel).copied().unwrap_or_default();
        notes.push(Note::from_markdown(&rel, &markdown, stat));
    }
    Ok(notes)
}

pub async fn read_raw(op: &Operator, vault_path: &str, path: &str) -> EngineResult<String> {
    let rel = normalize_note_path(path);
    let full = storage::join(vault_path, &rel);
    if rel.is_empty() || !op.exists(&full).await.context("failed to check note")? {
        return Err(EngineError::NotFound(format!("note {}", rel)));
    }
    let bytes = op.read(&full).await.context("failed to read note")?;
    Ok(String::from_utf8_lossy(&bytes.to_vec()).into_owned())
}

pub async fn get_note(op: &Operator, vault_path: &str, path: &str) -> EngineResult<Note> {
    let rel = normalize_note_path(path);
    let markdown = read_raw(op, vault_path, &rel).await?;
    let ledger = read_ledger(op, vault_path).await?;
    let stat = ledger.files.get(&rel).copied().unwrap_or_default();
    Ok(Note::from_markdown(&rel, &markdown, stat))
}

/// Creates or replaces a note and returns its refreshed metadata.
pub async fn write_note(
    op: &Operator,
    vault_path: &str,
    path: &str,
    markdown: &str,
) -> EngineResult<Note> {
    let rel = normalize_note_path(path);
    if rel.is_empty() {
        return Err(EngineError::Validation("note path must not be empty".into()));
    }
    let full = storage::join(vault_path, &rel);
    storage::ensure_parent_dirs(op, &full).await?;
    op.write(&full, markdown.as_bytes().to_vec())
        .await
        .map_err(|e| EngineError::Write(e.to_string()))?;
    let stat = touch(op, vault_path, &rel).await?;
    Ok(Note::from_markdown(&rel, markdown, stat))
}

/// Read-modify-write of a note's frontmatter. The body is kept as-is.
pub async fn write_frontmatter<F, R>(
    op: &Operator,
    vault_path: &str,
    path: &str,
    mutate: F,
) -> EngineResult<(R, Note)>
where
    F: FnOnce(&mut Map<String, Value>) -> R,
{
    let rel = normalize_note_path(path);
    let markdown = read_raw(op, vault_path, &rel).await?;
    let (yaml, body) = split_frontmatter(&markdown);
    let mut frontmatter = yaml.map(parse_frontmatter).unwrap_or_default();
    let outcome = mutate(&mut frontmatter);

    let rendered = render_markdown(&frontmatter, body)
        .map_err(|e| EngineError::Write(format!("failed to encode frontmatter: {}", e)))?;
    let note = write_note(op, vault_path, &rel, &rendered).await?;
    Ok((outcome, note))
}

fn render_markdown(frontmatter: &Map<String, Value>, body: &str) -> Result<String> {
    if frontmatter.is_empty() {
        return Ok(body.to_string());
    }
    let yaml = serde_yaml::to_string(frontmatter)?;
    Ok(format!("---\n{}---\n{}", yaml, body))
}

fn frontmatter_regex() -> &'static Regex {
    static FRONTMATTER_REGEX: OnceLock<Regex> = OnceLock::new();
    FRONTMATTER_REGEX.get_or_init(|| {
        Regex::new(r"(?s)^---[ \t]*\r?\n(?:(.*?)\r?\n)?---[ \t]*(?:\r?\n|$)")
            .expect("frontmatter regex must compile")
    })
}

/// Returns the raw YAML block (if any) and the remaining body.
pub fn split_frontmatter(markdown: &str) -> (Option<&str>, &str) {
    if let Some(caps) = frontmatter_regex().captures(markdown) {
        let yaml = caps.get(1).map(|m| m.as_str()).unwrap_or("");
        let end = caps.get(0).map(|m| m.end()).unwrap_or(0);
        return (Some(yaml), &markdown[end..]);
    }
    (None, markdown)
}

pub fn parse_frontmatter(yaml: &str) -> Map<String, Value> {
    if yaml.trim().is_empty() {
        return Map::new();
    }
    serde_yaml::from_str::<serde_yaml::Value>(yaml)
        .ok()
        .and_then(|y| serde_json::to_value(y).ok())
        .and_then(|v| match v {
            Value::Object(map) => Some(map),
            _ => None,
        })
        .unwrap_or_default()
}

fn code_regex() -> &'static Regex {
    static CODE_REGEX: OnceLock<Regex> = OnceLock::new();
    CODE_REGEX.get_or_init(|| Regex::new(r"(?s)```.*?```|`[^`\n]*`").expect("code regex must compile"))
}

fn inline_tag_regex() -> &'static Regex {
    static TAG_REGEX: OnceLock<Regex> = OnceLock::new();
    TAG_REGEX.get_or_init(|| {
        Regex::new(r"(?:^|[\s(,])#([\p{L}\p{N}_/\-]+)").expect("tag regex must compile")
    })
}

fn wiki_link_regex() -> &'static Regex {
    static WIKI_REGEX: OnceLock<Regex> = OnceLock::new();
    WIKI_REGEX.get_or_init(|| Regex::new(r"\[\[([^\[\]]+)\]\]").expect("wiki link regex must compile"))
}

fn markdown_link_regex() -> &'static Regex {
    static MD_LINK_REGEX: OnceLock<Regex> = OnceLock::new();
    MD_LINK_REGEX.get_or_init(|| {
        Regex::new(r"\[[^\]]*\]\(<?([^)<>\s]+?\.md)(?:#[^)]*)?>?\)")
            .expect("markdown link regex must compile")
    })
}

pub fn strip_tag(tag: &str) -> &str {
    tag.trim().trim_start_matches('#')
}

fn push_unique(list: &mut Vec<String>, item: String) {
    if !item.is_empty() && !list.contains(&item) {
        list.push(item);
    }
}

fn extract_tags(frontmatter: &Map<String, Value>, body: &str) -> Vec<String> {
    let mut tags = Vec::new();
    for key in ["tags", "tag"] {
        match frontmatter.get(key) {
            Some(Value::String(text)) => {
                for part in text.split(|c: char| c == ',' || c.is_whitespace()) {
                    push_unique(&mut tags, strip_tag(part).to_string());
                }
            }
            Some(Value::Array(items)) => {
                for item in items {
                    push_unique(&mut tags, strip_tag(&display_string(Some(item))).to_string());
                }
            }
            _ => {}
        }
    }

    let without_code = code_regex().replace_all(body, " ");
    for caps in inline_tag_regex().captures_iter(&without_code) {
        if let Some(m) = caps.get(1) {
            let tag = m.as_str().trim_end_matches('/');
            if tag.chars().any(|c| !c.is_ascii_digit()) {
                push_unique(&mut tags, tag.to_string());
            }
        }
    }
    tags
}

fn collect_frontmatter_links(value: &Value, links: &mut Vec<String>) {
    match value {
        Value::String(text) => {
            for caps in wiki_link_regex().captures_iter(text) {
                if let Some(m) = caps.get(1) {
                    push_unique(links, normalize_link(m.as_str()));
                }
            }
        }
        Value::Array(items) => {
            for item in items {
                collect_frontmatter_links(item, links);
            }
        }
        Value::Object(map) => {
            for item in map.values() {
                collect_frontmatter_links(item, links);
            }
        }
        _ => {}
    }
}

fn extract_links(frontmatter: &Map<String, Value>, body: &str) -> Vec<String> {
    let mut links = Vec::new();
    for value in frontmatter.values() {
        collect_frontmatter_links(value, &mut links);
    }

    let without_code = code_regex().replace_all(body, " ");
    for caps in wiki_link_regex().captures_iter(&without_code) {
        if let Some(m) = caps.get(1) {
            push_unique(&mut links, normalize_link(m.as_str()));
        }
    }
    for caps in markdown_link_regex().captures_iter(&without_code) {
        if let Some(m) = caps.get(1) {
            let target = m.as_str().replace("%20", " ");
            push_unique(&mut links, normalize_link(&target));
        }
    }
    links
}

/// Canonical form of a link target: no brackets, alias, heading or `.md`.
pub fn normalize_link(raw: &str) -> String {
    let mut text = strip_quotes(raw).trim();
    text = text.strip_prefix('!').unwrap_or(text);
    text = text.strip_prefix("[[").unwrap_or(text);
    text = text.strip_suffix("]]").unwrap_or(text);
    if let Some((target, _alias)) = text.split_once('|') {
        text = target;
    }
    if let Some((target, _heading)) = text.split_once('#') {
        text = target;
    }
    let text = text.trim();
    let lowered = text.to_ascii_lowercase();
    let text = if lowered.ends_with(".md") {
        &text[..text.len() - 3]
    } else {
        text
    };
    text.trim().to_string()
}
