// src/mirror/mod.rs
//! Best-effort secondary publication to the public blog.
//!
//! The knowledge store stays the source of truth; a mirror failure is
//! reported but never rolls anything back.

pub mod tistory;

use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::Mutex;

use anyhow::{bail, Result};
use pulldown_cmark::{html, Options, Parser};

pub use tistory::TistoryMirror;

/// One blog post as handed to a [`BlogMirror`].
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct MirrorPost {
    pub title: String,
    pub html: String,
    pub tags: Vec<String>,
    pub category: String,
    pub source_url: String,
}

#[async_trait::async_trait]
pub trait BlogMirror: Send + Sync {
    async fn publish(&self, post: &MirrorPost) -> Result<()>;

    /// Disabled mirrors are skipped without a notification.
    fn enabled(&self) -> bool {
        true
    }
}

/// Render markdown to HTML (tables, strikethrough and task lists enabled).
pub fn render_html(markdown: &str) -> String {
    let mut opts = Options::empty();
    opts.insert(Options::ENABLE_TABLES);
    opts.insert(Options::ENABLE_STRIKETHROUGH);
    opts.insert(Options::ENABLE_TASKLISTS);
    let parser = Parser::new_ext(markdown, opts);
    let mut out = String::with_capacity(markdown.len() * 3 / 2);
    html::push_html(&mut out, parser);
    out
}

/// Drop every character outside the Basic Multilingual Plane. The blog
/// editor rejects astral-plane code points, so they are removed, not escaped.
pub fn filter_bmp(s: &str) -> String {
    s.chars().filter(|c| (*c as u32) <= 0xFFFF).collect()
}

/// Used when the blog is not configured.
pub struct DisabledMirror;

#[async_trait::async_trait]
impl BlogMirror for DisabledMirror {
    async fn publish(&self, post: &MirrorPost) -> Result<()> {
        tracing::debug!(title = %post.title, "blog mirror disabled; skipping");
        Ok(())
    }

    fn enabled(&self) -> bool {
        false
    }
}

/// Test double: records every post, optionally failing each call.
#[derive(Default)]
pub struct RecordingMirror {
    posts: Mutex<Vec<MirrorPost>>,
    fail: AtomicBool,
}

impl RecordingMirror {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn failing() -> Self {
        let m = Self::default();
        m.fail.store(true, Ordering::SeqCst);
        m
    }

    pub fn posts(&self) -> Vec<MirrorPost> {
        self.posts.lock().map(|p| p.clone()).unwrap_or_default()
    }
}

#[async_trait::async_trait]
impl BlogMirror for RecordingMirror {
    async fn publish(&self, post: &MirrorPost) -> Result<()> {
        if let Ok(mut p) = self.posts.lock() {
            p.push(post.clone());
        }
        if self.fail.load(Ordering::SeqCst) {
            bail!("injected mirror failure");
        }
        Ok(())
    }
}
