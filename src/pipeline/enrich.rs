//! Enrichment stage: company identity, website, location and theme per post.
//!
//! Per record: infer the company when the post lacks one, search the web for
//! it, summarize the top pages, let the model synthesize the company profile,
//! then classify the post's theme.

use crate::checkpoint::Fingerprint;
use crate::client::{CallExecutor, LanguageModel, WebSearch};
use crate::models::{
    CallError, ERROR, FieldSchema, FieldSpec, MISSING, NOT_FOUND, Outcome, ResolvedRecord,
};
use crate::pipeline::{StagePlugin, json_field, parse_json_object};
use async_trait::async_trait;
use std::collections::HashMap;
use std::sync::Arc;
use tracing::{debug, info, warn};

/// Theme categories a post is classified into.
pub const THEMES: [&str; 5] = [
    "MARINE INFRASTRUCTURE",
    "PIPELINES",
    "SUBMARINE CABLES",
    "OFFSHORE WIND FARMS",
    "OTHER",
];

const FALLBACK_THEME: &str = "OTHER";
const NO_WEB_CONTENT: &str = "No web content available";
const MISSING_FIELDS: &str = "Missing essential fields";

const COLUMNS: &[&str] = &[
    "company_name",
    "website",
    "location",
    "one_sentence_description",
    "professional_email",
    "post_author",
    "author_role",
    "city",
    "country",
    "web_source_used",
    "inference_confidence",
    "theme",
    "post_url",
];

/// Columns synthesized by the profile call.
const PROFILE_COLUMNS: &[&str] = &[
    "website",
    "location",
    "one_sentence_description",
    "professional_email",
];

pub struct EnrichPlugin {
    llm: Arc<dyn LanguageModel>,
    search: Arc<dyn WebSearch>,
    max_results: usize,
    /// Theme per `company|author`, for this run only
    theme_cache: HashMap<String, String>,
}

impl EnrichPlugin {
    pub fn new(
        llm: Arc<dyn LanguageModel>,
        search: Arc<dyn WebSearch>,
        max_results: usize,
    ) -> Self {
        Self {
            llm,
            search,
            max_results,
            theme_cache: HashMap::new(),
        }
    }

    /// Outcome for a record that cannot be enriched.
    fn missing(record: &ResolvedRecord, company: &str) -> Outcome {
        let or_missing = |v: &str| if v.is_empty() { MISSING.to_string() } else { v.to_string() };
        let mut outcome = base_outcome(record);
        outcome.set("company_name", or_missing(company));
        outcome.set("post_author", or_missing(record.get("author_name")));
        outcome.fill_missing(PROFILE_COLUMNS, MISSING);
        outcome.set("web_source_used", "");
        outcome.set("inference_confidence", "");
        let theme = if record.is_present("post_text") {
            FALLBACK_THEME
        } else {
            MISSING
        };
        outcome.set("theme", theme);
        outcome.push_error(MISSING_FIELDS);
        outcome
    }

    async fn infer_company(
        &self,
        record: &ResolvedRecord,
        executor: &CallExecutor,
    ) -> Result<String, String> {
        let prompt = inference_prompt(record);
        let reply = executor
            .call("infer_company", self.llm.generate(&prompt))
            .await
            .map_err(|e| format!("company inference failed: {e}"))?;
        let inferred =
            json_field(&parse_json_object(&reply), "inferred_company_name").unwrap_or_default();
        if inferred.eq_ignore_ascii_case(NOT_FOUND) {
            Ok(String::new())
        } else {
            Ok(inferred)
        }
    }

    /// Direct result URLs for the company, primary query first.
    async fn find_urls(&self, company: &str, executor: &CallExecutor) -> Vec<String> {
        let queries = [
            format!("\"{company}\" official website headquarters about"),
            format!("{company} company"),
        ];
        for query in &queries {
            match executor
                .call("search", self.search.search(query, self.max_results))
                .await
            {
                Ok(hits) => {
                    let urls: Vec<String> = hits
                        .into_iter()
                        .filter(|hit| hit.is_direct())
                        .map(|hit| hit.url)
                        .collect();
                    if !urls.is_empty() {
                        return urls;
                    }
                }
                Err(e) => debug!(query = %query, error = %e, "Search failed; trying next query"),
            }
        }
        Vec::new()
    }

    async fn snippets(&self, urls: &[String], executor: &CallExecutor) -> String {
        if urls.is_empty() {
            return NO_WEB_CONTENT.to_string();
        }
        let mut pages = Vec::with_capacity(urls.len());
        for url in urls {
            let page = match executor.call("fetch_page", self.search.fetch_page(url)).await {
                Ok(summary) => summary.to_string(),
                Err(e) => format!("[URL: {url}] - Failed to scrape: {e}"),
            };
            pages.push(page);
        }
        pages.join("\n\n")
    }

    /// Theme of the post, and the call error when classification failed.
    ///
    /// The fallback theme is cached like a classified one.
    async fn theme(
        &mut self,
        company: &str,
        record: &ResolvedRecord,
        executor: &CallExecutor,
    ) -> (String, Option<CallError>) {
        let cache_key = format!("{company}|{}", record.get("author_name"));
        if let Some(theme) = self.theme_cache.get(&cache_key) {
            return (theme.clone(), None);
        }
        let prompt = theme_prompt(record.get("post_text"));
        let (theme, error) = match executor.call("theme", self.llm.generate(&prompt)).await {
            Ok(reply) => {
                let raw = json_field(&parse_json_object(&reply), "theme").unwrap_or_default();
                (normalize_theme(&raw), None)
            }
            Err(e) => (FALLBACK_THEME.to_string(), Some(e)),
        };
        self.theme_cache.insert(cache_key, theme.clone());
        (theme, error)
    }
}

/// Map a model-provided theme onto the fixed categories.
pub fn normalize_theme(raw: &str) -> String {
    let upper = raw.trim().to_uppercase();
    THEMES
        .iter()
        .find(|theme| **theme == upper)
        .unwrap_or(&FALLBACK_THEME)
        .to_string()
}

fn base_outcome(record: &ResolvedRecord) -> Outcome {
    let mut outcome = Outcome::new();
    for field in ["author_role", "city", "country", "post_url"] {
        outcome.set(field, record.get(field));
    }
    outcome
}

fn inference_prompt(record: &ResolvedRecord) -> String {
    format!(
        "You are a professional assistant. Based on the following post and author info, \
         infer the name of the company the author works at.\n\
         Author: {}\nRole: {}\nPost: {}\n\
         Return the result in this strict JSON format:\n\
         {{\"inferred_company_name\": \"...\"}}\n\
         If the company cannot be determined, return:\n\
         {{\"inferred_company_name\": \"{NOT_FOUND}\"}}",
        record.get("author_name"),
        record.get("author_role"),
        record.get("post_text"),
    )
}

fn profile_prompt(record: &ResolvedRecord, company: &str, snippets: &str) -> String {
    format!(
        "You are a B2B research assistant. Enrich the company information using the data and \
         web content below.\n\
         Post:\n\"{}\"\nAuthor: {}\nRole: {}\nCity: {}\nCountry: {}\nCompany Name: {company}\n\
         Web content collected:\n{snippets}\n\
         Identify the official website, the headquarters location, a one-sentence description \
         of what the company does and a likely professional email address for the author. \
         If something cannot be found confidently, say \"{NOT_FOUND}\".\n\
         Return this strict JSON format:\n\
         {{\"company_name\": \"{company}\", \"website\": \"...\", \"location\": \"...\", \
         \"one_sentence_description\": \"...\", \"professional_email\": \"...\", \
         \"web_source_used\": \"...\", \"inference_confidence\": \"e.g. 90%\"}}",
        record.get("post_text"),
        record.get("author_name"),
        record.get("author_role"),
        record.get("city"),
        record.get("country"),
    )
}

fn theme_prompt(post_text: &str) -> String {
    let categories: Vec<String> = THEMES.iter().map(|t| format!("- {t}")).collect();
    format!(
        "Classify the topic of the post below into one of these categories:\n{}\n\
         Post:\n\"{post_text}\"\n\
         Return your answer in this strict JSON format:\n{{\"theme\": \"...\"}}",
        categories.join("\n"),
    )
}

#[async_trait]
impl StagePlugin for EnrichPlugin {
    fn name(&self) -> &'static str {
        "enrich"
    }

    fn fingerprint(&self) -> Fingerprint {
        Fingerprint::Positional
    }

    fn schema(&self) -> FieldSchema {
        FieldSchema::new([
            FieldSpec::new("post_text").max_chars(1000),
            FieldSpec::new("author_name").aliases(&["post_author"]),
            FieldSpec::new("author_role"),
            FieldSpec::new("city"),
            FieldSpec::new("country"),
            FieldSpec::new("company_name"),
            FieldSpec::new("post_url"),
        ])
    }

    fn columns(&self) -> &'static [&'static str] {
        COLUMNS
    }

    fn prerequisites(&self, record: &ResolvedRecord) -> Option<Outcome> {
        if record.is_present("post_text") && record.is_present("author_name") {
            None
        } else {
            Some(Self::missing(record, record.get("company_name")))
        }
    }

    async fn process(&mut self, record: &ResolvedRecord, executor: &CallExecutor) -> Outcome {
        let mut company = record.get("company_name").to_string();
        if company.is_empty() {
            match self.infer_company(record, executor).await {
                Ok(inferred) if !inferred.is_empty() => {
                    info!(index = record.index, company = %inferred, "Inferred company");
                    company = inferred;
                }
                Ok(_) => debug!(index = record.index, "Company could not be inferred"),
                Err(e) => {
                    let mut outcome = Self::missing(record, "");
                    outcome.push_error(e);
                    return outcome;
                }
            }
        }
        if company.is_empty() {
            return Self::missing(record, "");
        }

        let urls = self.find_urls(&company, executor).await;
        let snippets = self.snippets(&urls, executor).await;

        let mut outcome = base_outcome(record);
        outcome.set("post_author", record.get("author_name"));

        let prompt = profile_prompt(record, &company, &snippets);
        let reply = match executor.call("profile", self.llm.generate(&prompt)).await {
            Ok(reply) => reply,
            Err(e) => {
                warn!(index = record.index, company = %company, error = %e, "Enrichment failed");
                outcome.set("company_name", company);
                outcome.fill_missing(PROFILE_COLUMNS, ERROR);
                outcome.set("web_source_used", urls.join(", "));
                outcome.set("inference_confidence", "");
                outcome.set("theme", FALLBACK_THEME);
                outcome.push_error(e);
                return outcome;
            }
        };

        let parsed = parse_json_object(&reply);
        let field = |key: &str, default: &str| {
            json_field(&parsed, key)
                .filter(|v| !v.is_empty())
                .unwrap_or_else(|| default.to_string())
        };
        outcome.set("company_name", field("company_name", &company));
        for column in PROFILE_COLUMNS {
            outcome.set(column, field(column, NOT_FOUND));
        }
        outcome.set("web_source_used", field("web_source_used", &urls.join(", ")));
        outcome.set("inference_confidence", field("inference_confidence", "Not specified"));

        let (theme, error) = self.theme(&company, record, executor).await;
        outcome.set("theme", theme);
        if let Some(e) = error {
            outcome.push_error(format!("theme: {e}"));
        }
        outcome
    }
}
