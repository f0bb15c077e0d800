//! Gemini `generateContent` client behind the [`Enricher`] trait.

use std::time::Duration;

use anyhow::{anyhow, Context, Result};
use metrics::counter;
use serde::{Deserialize, Serialize};

use super::{parse_report, Enricher, Enrichment, ReportDraft, BODY_MISSING, TITLE_MISSING};

pub const DEFAULT_BASE_URL: &str = "https://generativelanguage.googleapis.com/v1beta";
pub const SUMMARY_MODEL: &str = "gemini-1.5-flash-latest";
pub const DETAIL_MODEL: &str = "gemini-1.5-pro-latest";

const SUMMARY_PROMPT: &str = "You are a news summarizer for a security news digest. \
Summarize the article below in Korean, 200 to 300 characters including spaces. \
State facts objectively, keep the central claims and their grounds, prefer short active sentences, \
avoid jargon where a plain word works, and break lines for readability. Output only the summary.";

const DETAIL_PROMPT: &str = "You write detailed technical explainers for a security blog. \
Analyse the security technology mentioned in the article below and explain it in Korean. \
Keep technical terms and proper nouns in English. Do not use bold markers. \
Do not wrap the answer in a code fence. Use exactly this markdown layout:\n\
## 🔍 뉴스 요약\n(short summary of the whole article)\n\n\
## 💡 핵심 포인트\n- (key points the article stresses)\n\n\
## 📚 기술 세부 내용\n### 1️⃣ (topic)\n- (details, leaving nothing out)";

const REPORT_PROMPT: &str = "You compile security reports. From the material below write one report in Korean. \
Put a concise title between [TITLE_START] and [TITLE_END], then the markdown body between \
[BODY_START] and [BODY_END]. Use ## headings and - bullets in the body. Output nothing else.";

pub struct GeminiEnricher {
    http: reqwest::Client,
    api_key: String,
    base_url: String,
    summary_model: String,
    detail_model: String,
}

impl GeminiEnricher {
    pub fn new(api_key: impl Into<String>) -> Result<Self> {
        Self::with_base_url(api_key, DEFAULT_BASE_URL)
    }

    pub fn with_base_url(api_key: impl Into<String>, base_url: impl Into<String>) -> Result<Self> {
        let http = reqwest::Client::builder()
            .user_agent(concat!("security-news-aggregator/", env!("CARGO_PKG_VERSION")))
            .connect_timeout(Duration::from_secs(10))
            .timeout(Duration::from_secs(60))
            .build()
            .context("building gemini http client")?;
        Ok(Self {
            http,
            api_key: api_key.into(),
            base_url: base_url.into().trim_end_matches('/').to_string(),
            summary_model: SUMMARY_MODEL.to_string(),
            detail_model: DETAIL_MODEL.to_string(),
        })
    }

    pub fn with_models(mut self, summary: &str, detail: &str) -> Self {
        self.summary_model = summary.to_string();
        self.detail_model = detail.to_string();
        self
    }

    async fn generate(&self, model: &str, instructions: &str, input: &str) -> Result<String> {
        #[derive(Serialize)]
        struct Part<'a> {
            text: &'a str,
        }
        #[derive(Serialize)]
        struct Content<'a> {
            parts: Vec<Part<'a>>,
        }
        #[derive(Serialize)]
        struct Req<'a> {
            contents: Vec<Content<'a>>,
        }
        #[derive(Deserialize)]
        struct Resp {
            #[serde(default)]
            candidates: Vec<Candidate>,
        }
        #[derive(Deserialize)]
        struct Candidate {
            content: Option<CandidateContent>,
        }
        #[derive(Deserialize)]
        struct CandidateContent {
            #[serde(default)]
            parts: Vec<CandidatePart>,
        }
        #[derive(Deserialize)]
        struct CandidatePart {
            #[serde(default)]
            text: String,
        }

        let prompt = format!("{instructions}\n\n[ARTICLE]\n{input}\n[/ARTICLE]");
        let req = Req {
            contents: vec![Content {
                parts: vec![Part { text: &prompt }],
            }],
        };

        let url = format!("{}/models/{}:generateContent", self.base_url, model);
        let resp = self
            .http
            .post(url)
            .query(&[("key", self.api_key.as_str())])
            .json(&req)
            .send()
            .await
            .context("gemini request")?;

        let status = resp.status();
        if !status.is_success() {
            let body = resp.text().await.unwrap_or_default();
            return Err(anyhow!("gemini returned {status}: {body}"));
        }
        let body: Resp = resp.json().await.context("gemini response body")?;
        let text = body
            .candidates
            .into_iter()
            .next()
            .and_then(|c| c.content)
            .map(|c| c.parts.into_iter().map(|p| p.text).collect::<String>())
            .unwrap_or_default();
        Ok(text.trim().to_string())
    }

    async fn soft(&self, label: &str, model: &str, instructions: &str, input: &str) -> Enrichment {
        match self.generate(model, instructions, input).await {
            Ok(text) if !text.is_empty() => Enrichment::Ok(text),
            Ok(_) => {
                tracing::warn!(call = label, "gemini returned no text");
                counter!("aggregator_enrichment_soft_failures_total").increment(1);
                Enrichment::failed(format!("{label} failed (empty response)"), "empty response")
            }
            Err(e) => {
                tracing::warn!(call = label, error = %format!("{e:#}"), "gemini call failed");
                counter!("aggregator_enrichment_soft_failures_total").increment(1);
                Enrichment::failed(format!("{label} failed (API error)"), format!("{e:#}"))
            }
        }
    }
}

#[async_trait::async_trait]
impl Enricher for GeminiEnricher {
    async fn summarize(&self, text: &str) -> Enrichment {
        self.soft("Summary", &self.summary_model, SUMMARY_PROMPT, text)
            .await
    }

    async fn elaborate(&self, text: &str) -> Enrichment {
        self.soft("Detailed analysis", &self.detail_model, DETAIL_PROMPT, text)
            .await
    }

    async fn report(&self, text: &str) -> ReportDraft {
        match self.soft("Report", &self.detail_model, REPORT_PROMPT, text).await {
            Enrichment::Ok(raw) => parse_report(&raw),
            Enrichment::SoftFailure { text, reason } => ReportDraft {
                title: TITLE_MISSING.to_string(),
                body: if text.is_empty() { BODY_MISSING.to_string() } else { text },
                failure: Some(reason),
            },
        }
    }
}
