//! NCSC security-notice board. The list is rendered client side and detail
//! pages are reached through `onclick` handlers, so this adapter drives a
//! real browser.

use std::time::Duration;

use anyhow::{bail, Context, Result};
use async_trait::async_trait;
use metrics::counter;
use once_cell::sync::Lazy;
use scraper::{Html, Selector};
use tokio::time::sleep;

use crate::browser::{wait_until, Session, DEFAULT_POLL_INTERVAL};
use crate::ingest::types::{AdapterReport, Candidate, EnrichMode, SourceAdapter};
use crate::ingest::{normalize_text, Pipeline};
use crate::notify::Severity;
use crate::store::StoreHandle;

pub const SITE_URL: &str = "https://www.ncsc.go.kr:4018";
pub const BOARD_NAV_SCRIPT: &str = "goSubMenuPage('020000','020200')";
const SOURCE_NAME: &str = "NCSC 보안공지";
const CATEGORY: &str = "NCSC";
const PAGE_TIMEOUT: Duration = Duration::from_secs(15);
/// Detail pages render their body after navigation completes.
const DETAIL_SETTLE: Duration = Duration::from_secs(2);
/// Shorter image captions are decoration, not content.
const MIN_CAPTION_CHARS: usize = 10;

static ROW_SEL: Lazy<Selector> =
    Lazy::new(|| Selector::parse("table.board_list tbody tr").unwrap());
static TABLE_SEL: Lazy<Selector> = Lazy::new(|| Selector::parse("table.board_list").unwrap());
static TD_SEL: Lazy<Selector> = Lazy::new(|| Selector::parse("td").unwrap());
static A_SEL: Lazy<Selector> = Lazy::new(|| Selector::parse("a").unwrap());
static IMG_ALT_SEL: Lazy<Selector> = Lazy::new(|| Selector::parse("img[alt]").unwrap());
static ATTACH_SEL: Lazy<Selector> =
    Lazy::new(|| Selector::parse("[class*='file'] a, [class*='attach'] a").unwrap());

/// One row of the notice list.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct BoardRow {
    pub title: String,
    pub onclick: String,
    pub raw_date: String,
}

/// Parsed notice list. `None` when the board table is not on the page.
pub fn parse_board(html: &str) -> Option<Vec<BoardRow>> {
    let doc = Html::parse_document(html);
    doc.select(&TABLE_SEL).next()?;

    let mut rows = Vec::new();
    for (i, tr) in doc.select(&ROW_SEL).enumerate() {
        let tds: Vec<_> = tr.select(&TD_SEL).collect();
        let link = tds.get(1).and_then(|td| td.select(&A_SEL).next());
        let onclick = link.and_then(|a| a.value().attr("onclick"));
        match (link, onclick) {
            (Some(a), Some(js)) => rows.push(BoardRow {
                title: normalize_text(&a.text().collect::<String>()),
                onclick: js.trim().to_string(),
                raw_date: tds
                    .get(2)
                    .map(|td| td.text().collect::<String>().trim().to_string())
                    .unwrap_or_default(),
            }),
            _ => tracing::warn!(row = i + 1, "board row without title link or onclick"),
        }
    }
    Some(rows)
}

/// Free text of a notice detail page: image captions and attachment labels.
/// Notices are mostly published as images, so this is often all there is.
pub fn parse_detail_text(html: &str) -> String {
    let doc = Html::parse_document(html);
    let mut parts: Vec<String> = Vec::new();

    let captions = doc
        .select(&IMG_ALT_SEL)
        .filter_map(|img| img.value().attr("alt"))
        .map(normalize_text)
        .filter(|alt| alt.chars().count() >= MIN_CAPTION_CHARS);
    let attachments = doc
        .select(&ATTACH_SEL)
        .map(|a| normalize_text(&a.text().collect::<String>()))
        .filter(|label| !label.is_empty());

    for text in captions.chain(attachments) {
        if !parts.contains(&text) {
            parts.push(text);
        }
    }
    parts.join("\n")
}

pub fn template_summary(title: &str) -> String {
    format!("NCSC 보안공지: {title}")
}

pub fn template_details(title: &str) -> String {
    format!(
        "## 🔍 뉴스 요약\n\nNCSC(국가사이버안보센터)에서 '{title}'에 대한 보안공지를 발표했습니다.\n\n## 💡 핵심 포인트\n\n- 자세한 내용은 원문 링크를 참조하시기 바랍니다."
    )
}

/// Candidate for one notice; without body text the templated copy is used.
pub fn candidate(row: &BoardRow, detail_url: String, body: String) -> Candidate {
    let mode = if body.trim().is_empty() {
        EnrichMode::Fixed {
            summary: template_summary(&row.title),
            details: template_details(&row.title),
        }
    } else {
        EnrichMode::Generate
    };
    Candidate::new(row.title.clone(), Some(detail_url), CATEGORY)
        .content(body)
        .raw_date(Some(row.raw_date.clone()))
        .enrich(mode)
}

pub struct NcscBoardAdapter {
    driver_url: String,
    store: StoreHandle,
    page_timeout: Duration,
    settle: Duration,
}

impl NcscBoardAdapter {
    pub fn new(driver_url: impl Into<String>, store: StoreHandle) -> Self {
        Self {
            driver_url: driver_url.into(),
            store,
            page_timeout: PAGE_TIMEOUT,
            settle: DETAIL_SETTLE,
        }
    }

    /// Override how long to wait for a page and for a detail body to render.
    pub fn with_timing(mut self, page_timeout: Duration, settle: Duration) -> Self {
        self.page_timeout = page_timeout;
        self.settle = settle;
        self
    }

    async fn board_rows(&self, s: &Session) -> Result<Vec<BoardRow>> {
        wait_until("notice board table", self.page_timeout, DEFAULT_POLL_INTERVAL, || async move {
            let html = s.page_source().await.ok()?;
            parse_board(&html)
        })
        .await
    }

    /// Follow the row's handler away from `list_url`. A row whose handler
    /// never leaves the list is an error, not the list URL.
    async fn open_detail(&self, s: &Session, row: &BoardRow, list_url: &str) -> Result<(String, String)> {
        s.execute(&row.onclick, vec![]).await.context("onclick")?;
        let detail_url = wait_until("detail page", self.page_timeout, DEFAULT_POLL_INTERVAL, || async move {
            s.current_url().await.ok().filter(|u| u != list_url)
        })
        .await?;
        sleep(self.settle).await;
        let html = s.page_source().await.context("detail page source")?;
        Ok((detail_url, parse_detail_text(&html)))
    }

    async fn crawl(&self, s: &Session, pipeline: &Pipeline) -> Result<AdapterReport> {
        s.goto(SITE_URL).await?;
        s.execute(BOARD_NAV_SCRIPT, vec![]).await.context("board navigation")?;

        let rows = match self.board_rows(s).await {
            Ok(rows) => rows,
            Err(_) => {
                let url = s.current_url().await.unwrap_or_default();
                pipeline
                    .notifier()
                    .notify(
                        Severity::Warn,
                        &format!("{SOURCE_NAME}: board table (table.board_list) not found (URL: {url})"),
                    )
                    .await;
                return Ok(AdapterReport::default());
            }
        };
        let list_url = s.current_url().await.context("board list url")?;
        tracing::info!(source = SOURCE_NAME, rows = rows.len(), url = %list_url, "board rows found");

        let mut report = AdapterReport::default();
        for row in &rows {
            match self.open_detail(s, row, &list_url).await {
                Ok((url, body)) => {
                    s.back().await?;
                    let outcome = pipeline
                        .process(SOURCE_NAME, candidate(row, url, body), &self.store)
                        .await;
                    report.record(outcome);
                }
                Err(e) => {
                    report.failed += 1;
                    counter!("aggregator_source_errors_total", "source" => SOURCE_NAME).increment(1);
                    let here = s.current_url().await.ok();
                    let shown = here.as_deref().unwrap_or("unknown");
                    tracing::warn!(error = ?e, title = %row.title, url = shown, "notice detail failed");
                    pipeline
                        .notifier()
                        .notify(
                            Severity::Error,
                            &format!("{SOURCE_NAME}: '{}' detail failed (URL: {shown}): {e:#}", row.title),
                        )
                        .await;
                    if here.as_deref() != Some(list_url.as_str()) {
                        s.back().await?;
                    }
                }
            }
            if self.board_rows(s).await.is_err() {
                bail!("board list did not come back after {}", row.title);
            }
        }
        Ok(report)
    }
}

#[async_trait]
impl SourceAdapter for NcscBoardAdapter {
    fn name(&self) -> &str {
        SOURCE_NAME
    }

    fn store(&self) -> &StoreHandle {
        &self.store
    }

    async fn run(&self, pipeline: &Pipeline) -> Result<AdapterReport> {
        let session = match Session::start(&self.driver_url).await {
            Ok(s) => s,
            Err(e) => {
                pipeline
                    .notifier()
                    .notify(
                        Severity::Error,
                        &format!("{SOURCE_NAME}: browser session failed: {e:#}"),
                    )
                    .await;
                return Ok(AdapterReport::default());
            }
        };
        let res = self.crawl(&session, pipeline).await;
        if let Err(e) = &res {
            let url = session.current_url().await.unwrap_or_default();
            counter!("aggregator_source_errors_total", "source" => SOURCE_NAME).increment(1);
            pipeline
                .notifier()
                .notify(
                    Severity::Error,
                    &format!("{SOURCE_NAME} crawl failed (URL: {url}): {e:#}"),
                )
                .await;
        }
        session.quit().await;
        Ok(res.unwrap_or_default())
    }
}
