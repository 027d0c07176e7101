//! Scoring stage: ranks enriched posts as business leads.
//!
//! Five model calls per record (project analysis, scores, opportunity,
//! contact, geographic accessibility) plus one web search for context.
//! Replies use `LABEL: value` lines and are parsed defensively.

use crate::checkpoint::{Fingerprint, SnapshotOrder};
use crate::client::{CallExecutor, LanguageModel, WebSearch};
use crate::models::{ERROR, FieldSchema, FieldSpec, MISSING, Outcome, ResolvedRecord, ScoreConfig};
use crate::pipeline::{
    StagePlugin, enforce_one_sentence, extract_field, extract_score, first_integer,
};
use async_trait::async_trait;
use std::sync::Arc;

const SEARCH_RESULTS: usize = 5;
const OPPORTUNITY_MAX_WORDS: usize = 25;
const UNNAMED_COMPANY: &str = "Company name not identified";

pub const SCORE_COLUMN: &str = "score_global";

const COLUMNS: &[&str] = &[
    "company_name",
    "geographic_accessibility",
    "project_summary",
    "project_phase",
    "relevant_keywords",
    "opportunity",
    "opportunity_capability",
    "opportunity_evidence",
    "ideal_contact",
    "recommended_action",
    "reasoning",
    "score_project_relevance",
    "score_project_stage",
    "score_company_fit",
    SCORE_COLUMN,
    "post_url",
];

/// Sub-scores returned by the scoring call, each 0–100.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct SubScores {
    pub relevance: u32,
    pub stage: u32,
    pub fit: u32,
}

/// Weighted global score, with a small bonus for easily accessible locations.
pub fn global_score(scores: SubScores, geo: u32) -> f64 {
    let mut score =
        0.50 * scores.relevance as f64 + 0.35 * scores.stage as f64 + 0.15 * scores.fit as f64;
    if geo > 70 {
        score = (score + 2.0).min(100.0);
    }
    (score * 10.0).round() / 10.0
}

pub struct ScorePlugin {
    llm: Arc<dyn LanguageModel>,
    search: Arc<dyn WebSearch>,
    profile: String,
    search_terms: String,
}

impl ScorePlugin {
    pub fn new(
        llm: Arc<dyn LanguageModel>,
        search: Arc<dyn WebSearch>,
        config: &ScoreConfig,
    ) -> Self {
        Self {
            llm,
            search,
            profile: config.profile.clone(),
            search_terms: config.search_terms.clone(),
        }
    }

    async fn web_context(&self, record: &ResolvedRecord, executor: &CallExecutor) -> String {
        let query = format!(
            "{} {} {} {}",
            record.get("website"),
            self.search_terms,
            record.get("city"),
            record.get("country")
        );
        let query = query.split_whitespace().collect::<Vec<_>>().join(" ");
        match executor
            .call("search", self.search.search(&query, SEARCH_RESULTS))
            .await
        {
            Ok(hits) if hits.is_empty() => "No relevant web results found.".to_string(),
            Ok(hits) => hits
                .into_iter()
                .map(|hit| hit.title)
                .collect::<Vec<_>>()
                .join("\n"),
            Err(e) => format!("Web search unavailable ({e})."),
        }
    }

    /// One model call; a failure is appended to the outcome's error.
    async fn ask(
        &self,
        label: &str,
        prompt: String,
        executor: &CallExecutor,
        outcome: &mut Outcome,
    ) -> Option<String> {
        match executor.call(label, self.llm.generate(&prompt)).await {
            Ok(reply) => Some(reply),
            Err(e) => {
                outcome.push_error(format!("{label}: {e}"));
                None
            }
        }
    }
}

#[async_trait]
impl StagePlugin for ScorePlugin {
    fn name(&self) -> &'static str {
        "score"
    }

    fn fingerprint(&self) -> Fingerprint {
        Fingerprint::column("item_id")
    }

    fn schema(&self) -> FieldSchema {
        FieldSchema::new([
            FieldSpec::new("post_text")
                .aliases(&["one_sentence_description", "post", "content", "text"])
                .max_chars(1500),
            FieldSpec::new("author_name").aliases(&[
                "post_author",
                "author",
                "profile_name",
                "author_full_name",
            ]),
            FieldSpec::new("author_role"),
            FieldSpec::new("city"),
            FieldSpec::new("country"),
            FieldSpec::new("website"),
            FieldSpec::new("company_name").default_value(UNNAMED_COMPANY),
            FieldSpec::new("one_sentence_description"),
            FieldSpec::new("post_url").aliases(&["post_url_x", "post_url_y"]),
        ])
    }

    fn columns(&self) -> &'static [&'static str] {
        COLUMNS
    }

    fn prerequisites(&self, record: &ResolvedRecord) -> Option<Outcome> {
        if record.is_present("post_text") && record.is_present("author_name") {
            return None;
        }
        let mut outcome = Outcome::new()
            .with("company_name", record.get("company_name"))
            .with("post_url", record.get("post_url"));
        outcome.fill_missing(COLUMNS, MISSING);
        outcome.push_error("Missing required fields");
        Some(outcome)
    }

    async fn process(&mut self, record: &ResolvedRecord, executor: &CallExecutor) -> Outcome {
        let company = record.get("company_name");
        let post_text = record.get("post_text");
        let mut outcome = Outcome::new()
            .with("company_name", company)
            .with("post_url", record.get("post_url"));

        let web_results = self.web_context(record, executor).await;

        // Project analysis
        let prompt = format!(
            "You are analyzing a post for {profile}.\n\
             Provide a brief project summary (2-3 sentences), the project phase \
             (Planning/Survey/Construction/Operational) and the relevant keywords.\n\
             Post: {post_text}\nCompany: {company}\nWeb Results: {web_results}\n\
             Return in this format:\n\
             PROJECT_SUMMARY: [summary]\nPROJECT_PHASE: [phase]\nKEYWORDS: [comma-separated keywords]",
            profile = self.profile,
        );
        let summary = match self.ask("project_analysis", prompt, executor, &mut outcome).await {
            Some(reply) => {
                let summary = extract_field(&reply, "PROJECT_SUMMARY");
                outcome.set("project_summary", summary.as_str());
                outcome.set("project_phase", extract_field(&reply, "PROJECT_PHASE"));
                outcome.set("relevant_keywords", extract_field(&reply, "KEYWORDS"));
                summary
            }
            None => {
                outcome.fill_missing(
                    &["project_summary", "project_phase", "relevant_keywords"],
                    ERROR,
                );
                String::new()
            }
        };

        // Scores
        let prompt = format!(
            "Score this opportunity for {profile} on three criteria (0-100 each): \
             PROJECT_RELEVANCE, PROJECT_STAGE (earlier is better) and COMPANY_FIT.\n\
             Post: {post_text}\nProject Summary: {summary}\nCompany: {company}\n\
             Author Role: {role}\nCompany Description: {description}\n\
             Return only in this format:\n\
             PROJECT_RELEVANCE: [score]\nPROJECT_STAGE: [score]\nCOMPANY_FIT: [score]",
            profile = self.profile,
            role = record.get("author_role"),
            description = record.get("one_sentence_description"),
        );
        let scores = self
            .ask("scoring", prompt, executor, &mut outcome)
            .await
            .map(|reply| SubScores {
                relevance: extract_score(&reply, "PROJECT_RELEVANCE"),
                stage: extract_score(&reply, "PROJECT_STAGE"),
                fit: extract_score(&reply, "COMPANY_FIT"),
            });
        match scores {
            Some(s) => {
                outcome.set("score_project_relevance", s.relevance.to_string());
                outcome.set("score_project_stage", s.stage.to_string());
                outcome.set("score_company_fit", s.fit.to_string());
            }
            None => outcome.fill_missing(
                &["score_project_relevance", "score_project_stage", "score_company_fit"],
                ERROR,
            ),
        }

        // Opportunity
        let prompt = format!(
            "Write one specific reason linking this project to one capability of {profile}.\n\
             Use a concrete cue from the post or summary as evidence. One sentence, \
             {OPPORTUNITY_MAX_WORDS} words max.\n\
             Post: {post_text}\nProject Summary: {summary}\nCompany: {company}\n\
             Return EXACTLY:\n\
             OPPORTUNITY: Because [evidence], we can [outcome] using [capability].\n\
             CAPABILITY: [capability]\nEVIDENCE: \"[quoted keyword/phrase]\"",
            profile = self.profile,
        );
        match self.ask("opportunity", prompt, executor, &mut outcome).await {
            Some(reply) => {
                let sentence = enforce_one_sentence(
                    &extract_field(&reply, "OPPORTUNITY"),
                    OPPORTUNITY_MAX_WORDS,
                );
                outcome.set("opportunity", sentence);
                outcome.set("opportunity_capability", extract_field(&reply, "CAPABILITY"));
                outcome.set("opportunity_evidence", extract_field(&reply, "EVIDENCE"));
            }
            None => outcome.fill_missing(
                &["opportunity", "opportunity_capability", "opportunity_evidence"],
                ERROR,
            ),
        }

        // Contact and action
        let (relevance, stage, fit) = scores.map_or((0, 0, 0), |s| (s.relevance, s.stage, s.fit));
        let prompt = format!(
            "Provide contact and action recommendations based on the analysis.\n\
             Author: {author}\nRole: {role}\nProject: {summary}\n\
             Scores: Relevance={relevance}, Stage={stage}, Company={fit}\n\
             High scores (>70): \"Reach out immediately\"; medium (40-70): \"Monitor for \
             developments\"; low (<40): \"Low priority - archive\".\n\
             Return in this format:\n\
             IDEAL_CONTACT: [who and why]\nRECOMMENDED_ACTION: [next step]\nREASONING: [brief explanation]",
            author = record.get("author_name"),
            role = record.get("author_role"),
        );
        match self.ask("contact", prompt, executor, &mut outcome).await {
            Some(reply) => {
                outcome.set("ideal_contact", extract_field(&reply, "IDEAL_CONTACT"));
                outcome.set("recommended_action", extract_field(&reply, "RECOMMENDED_ACTION"));
                outcome.set("reasoning", extract_field(&reply, "REASONING"));
            }
            None => outcome.fill_missing(
                &["ideal_contact", "recommended_action", "reasoning"],
                ERROR,
            ),
        }

        // Geographic accessibility
        let prompt = format!(
            "Estimate the accessibility score (0-100) for {profile} to operate in the city and \
             country below. Coastal European areas are high priority.\n\
             City: {city}\nCountry: {country}\nReturn only the number.",
            profile = self.profile,
            city = record.get("city"),
            country = record.get("country"),
        );
        let geo = self
            .ask("geography", prompt, executor, &mut outcome)
            .await
            .map(|reply| first_integer(&reply));
        outcome.set(
            "geographic_accessibility",
            geo.map_or_else(|| ERROR.to_string(), |g| g.to_string()),
        );

        let global = match scores {
            Some(s) => format!("{:.1}", global_score(s, geo.unwrap_or(0))),
            None => ERROR.to_string(),
        };
        outcome.set(SCORE_COLUMN, global);
        outcome
    }

    fn snapshot_order(&self) -> Option<SnapshotOrder> {
        Some(SnapshotOrder::descending(SCORE_COLUMN))
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::client::{PageSummary, SearchHit};
    use crate::models::{CallError, PacingConfig, Record};
    use std::sync::Mutex;
    use std::time::Duration;

    struct LabelledModel {
        prompts: Mutex<Vec<String>>,
        fail_scoring: bool,
    }

    #[async_trait]
    impl LanguageModel for LabelledModel {
        async fn generate(&self, prompt: &str) -> Result<String, CallError> {
            self.prompts.lock().unwrap().push(prompt.to_string());
            let reply = if prompt.contains("PROJECT_SUMMARY") {
                "PROJECT_SUMMARY: Export cable to shore.\nPROJECT_PHASE: Survey\nKEYWORDS: cable"
            } else if prompt.contains("three criteria") {
                if self.fail_scoring {
                    return Err(CallError::Timeout {
                        label: "scoring".into(),
                        after: Duration::from_secs(1),
                    });
                }
                "PROJECT_RELEVANCE: 90\nPROJECT_STAGE: 80\nCOMPANY_FIT: 60"
            } else if prompt.contains("OPPORTUNITY:") {
                "OPPORTUNITY: Because \"cable route\" is planned, we can map it using sonar. Extra.\nCAPABILITY: Sonar\nEVIDENCE: \"cable route\""
            } else if prompt.contains("IDEAL_CONTACT") {
                "IDEAL_CONTACT: Project lead\nRECOMMENDED_ACTION: Reach out immediately\nREASONING: High scores"
            } else {
                "85"
            };
            Ok(reply.to_string())
        }
    }

    struct NoResults;

    #[async_trait]
    impl WebSearch for NoResults {
        async fn search(&self, _query: &str, _max: usize) -> Result<Vec<SearchHit>, CallError> {
            Ok(Vec::new())
        }

        async fn fetch_page(&self, url: &str) -> Result<PageSummary, CallError> {
            Err(CallError::Network(format!("unexpected fetch of {url}")))
        }
    }

    fn plugin(fail_scoring: bool) -> (ScorePlugin, Arc<LabelledModel>) {
        let model = Arc::new(LabelledModel {
            prompts: Mutex::new(Vec::new()),
            fail_scoring,
        });
        let plugin = ScorePlugin::new(model.clone(), Arc::new(NoResults), &ScoreConfig::default());
        (plugin, model)
    }

    fn lead() -> Record {
        Record::from_pairs(
            0,
            [
                ("item_id", "lead-1"),
                ("one_sentence_description", "Subsea cable installer"),
                ("post_author", "Ada"),
                ("city", "Brest"),
                ("country", "France"),
            ],
        )
    }

    #[test]
    fn test_global_score() {
        let scores = SubScores {
            relevance: 90,
            stage: 80,
            fit: 60,
        };
        assert_eq!(global_score(scores, 50), 82.0);
        assert_eq!(global_score(scores, 71), 84.0);
        let top = SubScores {
            relevance: 100,
            stage: 100,
            fit: 100,
        };
        assert_eq!(global_score(top, 90), 100.0);
        let odd = SubScores {
            relevance: 33,
            stage: 17,
            fit: 9,
        };
        assert_eq!(global_score(odd, 0), 23.8);
    }

    #[tokio::test]
    async fn test_process_uses_aliases_and_scores() {
        let (mut plugin, model) = plugin(false);
        let exec = CallExecutor::new(Duration::from_secs(5), PacingConfig::none());
        let record = plugin.schema().resolve(&lead());
        assert!(plugin.prerequisites(&record).is_none());

        let outcome = plugin.process(&record, &exec).await;
        assert_eq!(exec.calls(), 6);
        assert_eq!(outcome.get("company_name"), UNNAMED_COMPANY);
        assert_eq!(outcome.get("project_summary"), "Export cable to shore.");
        assert_eq!(outcome.get("score_project_relevance"), "90");
        assert_eq!(outcome.get("geographic_accessibility"), "85");
        assert_eq!(outcome.get(SCORE_COLUMN), "84.0");
        assert_eq!(
            outcome.get("opportunity"),
            "Because \"cable route\" is planned, we can map it using sonar."
        );
        assert!(!outcome.is_error());

        let prompts = model.prompts.lock().unwrap();
        assert!(prompts[0].contains("No relevant web results found."));
        assert!(prompts[0].contains("Subsea cable installer"));
    }

    #[tokio::test]
    async fn test_failed_scoring_call_is_isolated() {
        let (mut plugin, _) = plugin(true);
        let exec = CallExecutor::new(Duration::from_secs(5), PacingConfig::none());
        let record = plugin.schema().resolve(&lead());
        let outcome = plugin.process(&record, &exec).await;

        assert_eq!(outcome.get("score_project_stage"), ERROR);
        assert_eq!(outcome.get(SCORE_COLUMN), ERROR);
        assert_eq!(outcome.get("reasoning"), "High scores");
        assert!(outcome.error.as_deref().unwrap().starts_with("scoring: "));
    }

    #[test]
    fn test_missing_author_short_circuits() {
        let (plugin, _) = plugin(false);
        let record = plugin
            .schema()
            .resolve(&Record::from_pairs(0, [("post_text", "Wind farm survey")]));
        let outcome = plugin.prerequisites(&record).unwrap();
        assert_eq!(outcome.get("project_summary"), MISSING);
        assert_eq!(outcome.get("company_name"), UNNAMED_COMPANY);
        assert!(outcome.is_error());
    }
}
