// src/blocks.rs
//! Content chunker: turns the markdown-like write-up produced by the
//! enrichment step into typed content blocks for the knowledge store.
//!
//! Line-oriented and deliberately small: headings, list items, quotes,
//! fenced code and paragraphs. Every block carries at most
//! [`MAX_BLOCK_CHARS`] characters; longer text is split into several
//! blocks of the same kind.

use once_cell::sync::OnceCell;
use regex::Regex;
use serde_json::{json, Value};

/// Per-block text limit of the store API.
pub const MAX_BLOCK_CHARS: usize = 2000;

/// Maximum number of blocks the store accepts in a single request.
pub const MAX_BLOCKS_PER_REQUEST: usize = 100;

pub const EMPTY_CONTENT_PLACEHOLDER: &str = "No detailed content was provided.";
pub const UNPROCESSABLE_CONTENT_PLACEHOLDER: &str = "No processable content was found.";

const DEFAULT_CODE_LANGUAGE: &str = "plaintext";

#[derive(Debug, Clone, PartialEq, Eq)]
pub enum BlockKind {
    Heading1,
    Heading2,
    Heading3,
    BulletedItem,
    NumberedItem,
    Quote,
    Code { language: String },
    Paragraph,
}

impl BlockKind {
    /// Block type name used by the store API.
    pub fn api_name(&self) -> &'static str {
        match self {
            BlockKind::Heading1 => "heading_1",
            BlockKind::Heading2 => "heading_2",
            BlockKind::Heading3 => "heading_3",
            BlockKind::BulletedItem => "bulleted_list_item",
            BlockKind::NumberedItem => "numbered_list_item",
            BlockKind::Quote => "quote",
            BlockKind::Code { .. } => "code",
            BlockKind::Paragraph => "paragraph",
        }
    }
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ContentBlock {
    kind: BlockKind,
    text: String,
}

impl ContentBlock {
    pub fn kind(&self) -> &BlockKind {
        &self.kind
    }

    pub fn text(&self) -> &str {
        &self.text
    }

    pub fn paragraph(text: impl Into<String>) -> Self {
        Self {
            kind: BlockKind::Paragraph,
            text: text.into(),
        }
    }

    /// JSON body of this block as the store API expects it.
    pub fn to_api_json(&self) -> Value {
        let name = self.kind.api_name();
        let mut inner = json!({
            "rich_text": [{ "type": "text", "text": { "content": self.text } }]
        });
        if let BlockKind::Code { language } = &self.kind {
            inner["language"] = Value::String(language.clone());
        }
        json!({ "object": "block", "type": name, name: inner })
    }
}

fn numbered_prefix() -> &'static Regex {
    static RE: OnceCell<Regex> = OnceCell::new();
    RE.get_or_init(|| Regex::new(r"^\d+\.\s").expect("numbered item regex"))
}

/// Convert markdown-like text into an ordered list of blocks.
pub fn to_blocks(markdown: &str) -> Vec<ContentBlock> {
    if markdown.trim().is_empty() {
        return vec![ContentBlock::paragraph(EMPTY_CONTENT_PLACEHOLDER)];
    }

    let mut out = Vec::new();
    let mut paragraph: Vec<&str> = Vec::new();
    let lines: Vec<&str> = markdown.split('\n').collect();
    let mut i = 0;

    while i < lines.len() {
        let line = lines[i].trim_end();

        if let Some(rest) = line.strip_prefix("### ") {
            flush_paragraph(&mut paragraph, &mut out);
            push_split(&mut out, BlockKind::Heading3, rest);
        } else if let Some(rest) = line.strip_prefix("## ") {
            flush_paragraph(&mut paragraph, &mut out);
            push_split(&mut out, BlockKind::Heading2, rest);
        } else if let Some(rest) = line.strip_prefix("# ") {
            flush_paragraph(&mut paragraph, &mut out);
            push_split(&mut out, BlockKind::Heading1, rest);
        } else if let Some(rest) = line
            .strip_prefix("- ")
            .or_else(|| line.strip_prefix("* "))
        {
            flush_paragraph(&mut paragraph, &mut out);
            push_split(&mut out, BlockKind::BulletedItem, rest);
        } else if let Some(m) = numbered_prefix().find(line) {
            flush_paragraph(&mut paragraph, &mut out);
            push_split(&mut out, BlockKind::NumberedItem, &line[m.end()..]);
        } else if let Some(rest) = line.strip_prefix("> ") {
            flush_paragraph(&mut paragraph, &mut out);
            let mut quote = vec![rest];
            while let Some(next) = lines
                .get(i + 1)
                .and_then(|l| l.trim_end().strip_prefix("> "))
            {
                quote.push(next);
                i += 1;
            }
            push_split(&mut out, BlockKind::Quote, &quote.join("\n"));
        } else if let Some(tag) = line.strip_prefix("```") {
            flush_paragraph(&mut paragraph, &mut out);
            let language = match tag.trim() {
                "" => DEFAULT_CODE_LANGUAGE.to_string(),
                t => t.to_lowercase(),
            };
            let mut code: Vec<&str> = Vec::new();
            i += 1;
            // An unterminated fence swallows the rest of the input.
            while i < lines.len() && !lines[i].trim_end().starts_with("```") {
                code.push(lines[i]);
                i += 1;
            }
            push_split(&mut out, BlockKind::Code { language }, &code.join("\n"));
        } else if line.trim().is_empty() {
            flush_paragraph(&mut paragraph, &mut out);
        } else {
            paragraph.push(line);
        }
        i += 1;
    }
    flush_paragraph(&mut paragraph, &mut out);

    if out.is_empty() {
        out.push(ContentBlock::paragraph(UNPROCESSABLE_CONTENT_PLACEHOLDER));
    }
    out
}

fn flush_paragraph(buf: &mut Vec<&str>, out: &mut Vec<ContentBlock>) {
    if buf.is_empty() {
        return;
    }
    let joined = buf.join("\n");
    let text = joined.trim();
    if !text.is_empty() {
        push_split(out, BlockKind::Paragraph, text);
    }
    buf.clear();
}

// Empty text still yields one (empty) block so an empty code fence survives.
fn push_split(out: &mut Vec<ContentBlock>, kind: BlockKind, text: &str) {
    let chunks = split_chars(text, MAX_BLOCK_CHARS);
    if chunks.is_empty() {
        out.push(ContentBlock {
            kind,
            text: String::new(),
        });
        return;
    }
    for chunk in chunks {
        out.push(ContentBlock {
            kind: kind.clone(),
            text: chunk,
        });
    }
}

/// Split on character (not byte) boundaries into pieces of at most `max` chars.
pub fn split_chars(text: &str, max: usize) -> Vec<String> {
    let mut out = Vec::new();
    let mut current = String::new();
    let mut count = 0usize;
    for ch in text.chars() {
        if count == max {
            out.push(std::mem::take(&mut current));
            count = 0;
        }
        current.push(ch);
        count += 1;
    }
    if !current.is_empty() {
        out.push(current);
    }
    out
}
