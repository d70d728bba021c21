//! Query classification and intent routing (the "Athena" role).
//!
//! Two-stage pipeline: follow-up resolution rewrites anaphoric queries
//! against the session's last query, then a fixed-priority rule classifier
//! assigns an intent. Low-confidence rule results escalate to an LLM
//! classification whose intent wins, with entity sets merged. The rule path
//! never reports confidence above 0.95.

use std::sync::{Arc, LazyLock};

use regex::Regex;
use serde::Serialize;
use serde_json::json;

use crate::config::Settings;
use crate::llm::{LlmClient, LlmRequest};
use crate::memory::SessionContext;
use crate::types::{NamedRange, SearchFilters, TimeFilter, TimeUnit};

#[derive(Clone, Copy, Debug, PartialEq, Eq, Serialize)]
#[serde(rename_all = "snake_case")]
pub enum QueryIntent {
    DocumentSearch,
    GeneralKnowledge,
    SystemMeta,
    Comparison,
    Summarization,
    Analysis,
    ClarificationNeeded,
}

impl QueryIntent {
    pub fn as_str(&self) -> &'static str {
        match self {
            QueryIntent::DocumentSearch => "document_search",
            QueryIntent::GeneralKnowledge => "general_knowledge",
            QueryIntent::SystemMeta => "system_meta",
            QueryIntent::Comparison => "comparison",
            QueryIntent::Summarization => "summarization",
            QueryIntent::Analysis => "analysis",
            QueryIntent::ClarificationNeeded => "clarification_needed",
        }
    }

    /// Parse the intent names the LLM prompt enumerates (uppercase).
    fn parse(name: &str) -> Self {
        match name.trim().to_uppercase().as_str() {
            "GENERAL_KNOWLEDGE" => QueryIntent::GeneralKnowledge,
            "SYSTEM_META" => QueryIntent::SystemMeta,
            "COMPARISON" => QueryIntent::Comparison,
            "SUMMARIZATION" => QueryIntent::Summarization,
            "ANALYSIS" => QueryIntent::Analysis,
            "CLARIFICATION_NEEDED" => QueryIntent::ClarificationNeeded,
            _ => QueryIntent::DocumentSearch,
        }
    }
}

#[derive(Clone, Debug, Serialize)]
pub struct Classification {
    pub intent: QueryIntent,
    pub confidence: f32,
    pub filters: Option<SearchFilters>,
    pub entities: Vec<String>,
    pub clarification_questions: Vec<String>,
    pub reasoning: String,
    pub is_followup: bool,
    /// The rewritten query when follow-up resolution applied.
    pub resolved_query: Option<String>,
}

impl Classification {
    /// The query downstream nodes should search with.
    pub fn effective_query<'a>(&'a self, original: &'a str) -> &'a str {
        self.resolved_query.as_deref().unwrap_or(original)
    }

    /// Clarification is needed on very low confidence or when the rule
    /// stage already produced questions.
    pub fn needs_clarification(&self) -> bool {
        self.intent == QueryIntent::ClarificationNeeded
            || self.confidence < 0.4
            || !self.clarification_questions.is_empty()
    }
}

const DOC_KEYWORDS: [&str; 22] = [
    "find",
    "search",
    "show",
    "show me",
    "get",
    "give me",
    "list",
    "document",
    "file",
    "invoice",
    "contract",
    "report",
    "spreadsheet",
    "image",
    "images",
    "photo",
    "photos",
    "picture",
    "pictures",
    "pdf",
    "where is",
    "locate",
];

const IMAGE_KEYWORDS: [&str; 7] = [
    "image",
    "images",
    "photo",
    "photos",
    "picture",
    "pictures",
    "screenshot",
];

const SEARCH_VERBS: [&str; 7] = ["show", "find", "search", "get", "give", "list", "locate"];

const GENERAL_KEYWORDS: [&str; 9] = [
    "what is",
    "who is",
    "how to",
    "explain",
    "define",
    "tell me about",
    "why does",
    "how does",
    "when did",
];

const COMPARISON_KEYWORDS: [&str; 8] = [
    "compare",
    "difference",
    "versus",
    "vs",
    "better",
    "contrast",
    "similarities",
    "which one",
];

const SUMMARY_KEYWORDS: [&str; 8] = [
    "summarize",
    "summary",
    "overview",
    "recap",
    "all documents about",
    "everything about",
    "compile",
    "aggregate",
];

const SYSTEM_KEYWORDS: [&str; 4] = [
    "how does this work",
    "how do i",
    "what can you",
    "can you help",
];

pub struct QueryClassifier {
    llm: Arc<LlmClient>,
    model: String,
    timeout: std::time::Duration,
}

impl QueryClassifier {
    pub const AGENT_NAME: &'static str = "Athena (The Strategist)";

    pub fn new(llm: Arc<LlmClient>, settings: &Settings) -> Self {
        Self {
            llm,
            model: settings.ollama.text_model.name.clone(),
            timeout: settings.ollama.timeout(),
        }
    }

    /// Classify a query against the current session context.
    pub async fn classify(&self, query: &str, context: Option<&SessionContext>) -> Classification {
        let (resolved_query, is_followup) = resolve_followup(query, context);
        let entities = extract_entities(&resolved_query);

        let mut result = rule_classify(&resolved_query);
        if result.entities.is_empty() {
            result.entities = entities.clone();
        }
        result.is_followup = is_followup;
        result.resolved_query = is_followup.then(|| resolved_query.clone());

        if result.confidence > 0.8 {
            tracing::info!(
                target: "findry::agents",
                intent = result.intent.as_str(),
                confidence = result.confidence,
                "rule-based classification"
            );
            return result;
        }

        let llm_result = self.llm_classify(&resolved_query, context).await;
        let mut merged_entities = llm_result.entities.clone();
        for entity in entities {
            if !merged_entities
                .iter()
                .any(|e| e.eq_ignore_ascii_case(&entity))
            {
                merged_entities.push(entity);
            }
        }

        Classification {
            intent: llm_result.intent,
            confidence: llm_result.confidence,
            filters: llm_result.filters.or(result.filters),
            entities: merged_entities,
            clarification_questions: llm_result.clarification_questions,
            reasoning: llm_result.reasoning,
            is_followup,
            resolved_query: is_followup.then(|| resolved_query.clone()),
        }
    }

    async fn llm_classify(&self, query: &str, context: Option<&SessionContext>) -> Classification {
        let context_line = context
            .filter(|c| !c.recent_queries.is_empty())
            .map(|c| {
                let recent: Vec<&str> = c
                    .recent_queries
                    .iter()
                    .rev()
                    .take(3)
                    .rev()
                    .map(String::as_str)
                    .collect();
                format!("\nRecent queries: {}", recent.join(", "))
            })
            .unwrap_or_default();

        let prompt = format!(
            r#"You are a query classifier for a personal document search system. Classify the user's query.

IMPORTANT: This is a LOCAL document search system, NOT a web search engine. Users search their own files (PDFs, images, documents, etc.).

Query: "{query}"
{context_line}

INTENTS (choose ONE):
1. DOCUMENT_SEARCH - User wants to find/retrieve specific files
   Examples: "find my resume", "show images from vacation", "where is the contract"

2. ANALYSIS - User wants to compare documents or extract patterns
   Examples: "compare these reports", "what's different between V1 and V2"

3. SUMMARIZATION - User wants a summary of document content
   Examples: "summarize the meeting notes", "give me an overview of this document"

4. GENERAL_KNOWLEDGE - User asks a general question NOT about their local files
   Examples: "what is machine learning?", "explain quantum computing"

5. COMPARISON - User wants to compare specific documents
   Examples: "compare Q1 vs Q2 reports", "difference between these contracts"

6. CLARIFICATION_NEEDED - Query is too vague to understand
   Examples: "show me that thing", "find it"

7. SYSTEM_META - User asks about this system's capabilities
   Examples: "what can you do?", "how do I use this?"

KEY SIGNALS:
- "my", "our", "the" + file type -> DOCUMENT_SEARCH
- "find", "show", "search", "where", "locate" -> DOCUMENT_SEARCH
- Person names + document type -> DOCUMENT_SEARCH
- "what is X", "explain X" (general topic) -> GENERAL_KNOWLEDGE
- "summarize", "overview", "recap" -> SUMMARIZATION
- "compare", "difference", "vs" -> COMPARISON

Return valid JSON:
{{
  "intent": "INTENT_NAME",
  "confidence": 0.0-1.0,
  "reasoning": "brief explanation",
  "entities": ["extracted", "entities"],
  "clarification_questions": []
}}"#
        );

        let fallback = json!({
            "intent": "DOCUMENT_SEARCH",
            "confidence": 0.5,
            "reasoning": "LLM classification failed, using default",
            "entities": [],
            "clarification_questions": []
        });

        let value = self
            .llm
            .generate_json(
                LlmRequest::new(&self.model, prompt)
                    .temperature(0.1)
                    .timeout(self.timeout),
                Some(fallback),
            )
            .await
            .unwrap_or_else(|_| json!({}));

        let intent = QueryIntent::parse(value["intent"].as_str().unwrap_or("DOCUMENT_SEARCH"));
        let confidence = (value["confidence"].as_f64().unwrap_or(0.7) as f32).clamp(0.0, 1.0);
        let entities = value["entities"]
            .as_array()
            .map(|a| {
                a.iter()
                    .filter_map(|v| v.as_str().map(str::to_string))
                    .collect()
            })
            .unwrap_or_default();
        let clarification_questions = value["clarification_questions"]
            .as_array()
            .map(|a| {
                a.iter()
                    .filter_map(|v| v.as_str().map(str::to_string))
                    .collect()
            })
            .unwrap_or_default();

        Classification {
            intent,
            confidence,
            filters: None,
            entities,
            clarification_questions,
            reasoning: value["reasoning"].as_str().unwrap_or("").to_string(),
            is_followup: false,
            resolved_query: None,
        }
    }

}

/// Rewrite anaphoric queries against the session's last query.
///
/// Returns the (possibly rewritten) query and whether a rewrite applied.
/// With no session history every pattern is inert and the query passes
/// through unchanged.
pub fn resolve_followup(query: &str, context: Option<&SessionContext>) -> (String, bool) {
    let Some(last_query) = context.and_then(|c| c.last_query()) else {
        return (query.to_string(), false);
    };
    let q_lower = query.to_lowercase();

    // "show more" / "more like that" / "similar"
    if ["show more", "more like", "similar", "like that", "like those"]
        .iter()
        .any(|p| q_lower.contains(p))
    {
        return (format!("{last_query} (more results)"), true);
    }

    // "but only ..." and friends: append the filter clause to the last query.
    for phrase in ["but only", "only the", "just the", "filter by", "filter to"] {
        if let Some(pos) = q_lower.find(phrase) {
            let filter_part = q_lower[pos + phrase.len()..].trim();
            return (format!("{last_query} {filter_part}"), true);
        }
    }

    // Very short queries leaning on a pronoun.
    if query.split_whitespace().count() <= 3
        && ["that", "it", "those", "this"]
            .iter()
            .any(|p| q_lower.split_whitespace().any(|w| w == *p))
    {
        return (last_query.to_string(), true);
    }

    // "what about X"
    if let Some(rest) = q_lower.strip_prefix("what about") {
        let addition = rest.trim();
        return (format!("{last_query} {addition}"), true);
    }

    (query.to_string(), false)
}

fn rule_classify(query: &str) -> Classification {
    let q_lower = query.to_lowercase();
    let result = |intent, confidence, filters, reasoning: &str| Classification {
        intent,
        confidence,
        filters,
        entities: Vec::new(),
        clarification_questions: Vec::new(),
        reasoning: reasoning.to_string(),
        is_followup: false,
        resolved_query: None,
    };

    if SYSTEM_KEYWORDS.iter().any(|kw| q_lower.contains(kw)) {
        return result(QueryIntent::SystemMeta, 0.9, None, "System help query");
    }

    // Image searches first: "show me images", "find photos of ..."
    if IMAGE_KEYWORDS.iter().any(|kw| q_lower.contains(kw))
        && SEARCH_VERBS.iter().any(|verb| q_lower.contains(verb))
    {
        return result(
            QueryIntent::DocumentSearch,
            0.95,
            extract_filters(query),
            "Image/photo search in local files detected",
        );
    }

    if COMPARISON_KEYWORDS.iter().any(|kw| q_lower.contains(kw)) {
        return result(
            QueryIntent::Comparison,
            0.85,
            None,
            "Comparison keywords detected",
        );
    }

    if SUMMARY_KEYWORDS.iter().any(|kw| q_lower.contains(kw)) {
        return result(
            QueryIntent::Summarization,
            0.85,
            None,
            "Summarization keywords detected",
        );
    }

    let has_possessive = ["my", "our", "the"]
        .iter()
        .any(|kw| q_lower.split_whitespace().any(|w| w == *kw));
    let has_doc_keyword = DOC_KEYWORDS.iter().any(|kw| q_lower.contains(kw));
    let has_action = ["show", "find", "search", "locate"]
        .iter()
        .any(|kw| q_lower.contains(kw));

    if has_doc_keyword && (has_possessive || has_action) {
        return result(
            QueryIntent::DocumentSearch,
            0.85,
            extract_filters(query),
            "Document search keywords with possessive/action detected",
        );
    }

    if GENERAL_KEYWORDS.iter().any(|kw| q_lower.contains(kw)) {
        if has_doc_keyword {
            return result(
                QueryIntent::DocumentSearch,
                0.7,
                None,
                "Has both general and doc keywords - defaulting to doc search",
            );
        }
        return result(
            QueryIntent::GeneralKnowledge,
            0.75,
            None,
            "General knowledge question pattern",
        );
    }

    result(
        QueryIntent::DocumentSearch,
        0.6,
        None,
        "Default to local file search",
    )
}

static QUOTED_RE: LazyLock<Regex> =
    LazyLock::new(|| Regex::new(r#""([^"]+)"|'([^']+)'"#).expect("quoted pattern"));
static POSSESSIVE_RE: LazyLock<Regex> =
    LazyLock::new(|| Regex::new(r"\b([A-Z][a-zA-Z]+)'s\b").expect("possessive pattern"));
static MULTI_WORD_RE: LazyLock<Regex> = LazyLock::new(|| {
    Regex::new(r"\b([A-Z][a-z]+(?:\s+[A-Z][a-z]+){1,2})\b").expect("multi-word pattern")
});
static ISO_DATE_RE: LazyLock<Regex> =
    LazyLock::new(|| Regex::new(r"\b\d{4}-\d{2}-\d{2}\b").expect("iso date pattern"));
static YEAR_RE: LazyLock<Regex> =
    LazyLock::new(|| Regex::new(r"\b\d{4}\b").expect("year pattern"));
static MONTH_YEAR_RE: LazyLock<Regex> = LazyLock::new(|| {
    Regex::new(
        r"(?i)\b(?:January|February|March|April|May|June|July|August|September|October|November|December|Jan|Feb|Mar|Apr|Jun|Jul|Aug|Sep|Oct|Nov|Dec)\s+\d{4}\b",
    )
    .expect("month-year pattern")
});
static TOPIC_RES: LazyLock<Vec<Regex>> = LazyLock::new(|| {
    [
        r"(?i)about\s+([a-zA-Z\s]+?)(?:\s+(?:in|from|for|by|with)\b|$)",
        r"(?i)related to\s+([a-zA-Z\s]+?)(?:\s+(?:in|from|for|by|with)\b|$)",
        r"(?i)containing\s+([a-zA-Z\s]+?)(?:\s+(?:in|from|for|by)\b|$)",
    ]
    .iter()
    .map(|p| Regex::new(p).expect("topic pattern"))
    .collect()
});

const SKIP_WORDS: [&str; 18] = [
    "I", "A", "The", "This", "That", "What", "Where", "When", "Which", "How", "Find", "Show",
    "Search", "Get", "Give", "List", "All", "My",
];

/// Entity extraction over the resolved query: quoted phrases, possessives,
/// capitalized name sequences, standalone capitalized words (skipping
/// sentence-initial position), literal dates, and noun phrases after
/// "about"/"related to"/"containing". Case-insensitive de-duplication
/// preserves first-seen order.
pub fn extract_entities(query: &str) -> Vec<String> {
    let mut entities: Vec<String> = Vec::new();
    let mut push = |candidate: &str| {
        let candidate = candidate.trim();
        if candidate.len() > 1
            && !entities
                .iter()
                .any(|e: &String| e.eq_ignore_ascii_case(candidate))
        {
            entities.push(candidate.to_string());
        }
    };

    for captures in QUOTED_RE.captures_iter(query) {
        if let Some(phrase) = captures.get(1).or_else(|| captures.get(2)) {
            push(phrase.as_str());
        }
    }

    for captures in POSSESSIVE_RE.captures_iter(query) {
        push(&captures[1]);
    }

    for captures in MULTI_WORD_RE.captures_iter(query) {
        let name = &captures[1];
        if !SKIP_WORDS.contains(&name) {
            push(name);
        }
    }

    for (i, word) in query.split_whitespace().enumerate() {
        let clean: String = word.chars().filter(|c| c.is_alphanumeric()).collect();
        if clean.is_empty() || i == 0 {
            continue;
        }
        if clean.chars().next().is_some_and(char::is_uppercase)
            && !SKIP_WORDS.contains(&clean.as_str())
            && !["Our"].contains(&clean.as_str())
        {
            push(&clean);
        }
    }

    for regex in [&*ISO_DATE_RE, &*MONTH_YEAR_RE, &*YEAR_RE] {
        for found in regex.find_iter(query) {
            push(found.as_str());
        }
    }

    for regex in TOPIC_RES.iter() {
        for captures in regex.captures_iter(query) {
            let topic = captures[1].trim();
            if topic.len() > 2 {
                push(topic);
            }
        }
    }

    entities
}

const FILE_TYPE_GROUPS: [(&str, &[&str]); 12] = [
    ("pdf", &[".pdf"]),
    ("word", &[".docx", ".doc"]),
    ("excel", &[".xlsx", ".xls"]),
    ("spreadsheet", &[".xlsx", ".xls", ".csv"]),
    ("image", &[".png", ".jpg", ".jpeg", ".gif", ".bmp", ".webp"]),
    ("photo", &[".png", ".jpg", ".jpeg"]),
    ("picture", &[".png", ".jpg", ".jpeg"]),
    ("video", &[".mp4", ".avi", ".mov", ".mkv"]),
    ("audio", &[".mp3", ".wav", ".flac"]),
    ("presentation", &[".pptx", ".ppt"]),
    ("text", &[".txt", ".md"]),
    ("code", &[".py", ".js", ".ts", ".java", ".cpp", ".c", ".rs"]),
];

const DOC_TYPE_MAP: [(&str, &str); 10] = [
    ("invoice", "invoice"),
    ("contract", "contract"),
    ("report", "report"),
    ("receipt", "invoice"),
    ("agreement", "contract"),
    ("resume", "resume"),
    ("cv", "resume"),
    ("proposal", "proposal"),
    ("memo", "memo"),
    ("letter", "letter"),
];

/// Extract typed filters (file-type groups, document types, time
/// expressions) from the query text.
pub fn extract_filters(query: &str) -> Option<SearchFilters> {
    let q_lower = query.to_lowercase();
    let mut filters = SearchFilters::default();

    for (keyword, extensions) in FILE_TYPE_GROUPS {
        if q_lower.contains(keyword) {
            filters.file_type = Some(extensions.iter().map(|e| e.to_string()).collect());
            break;
        }
    }

    for (keyword, doc_type) in DOC_TYPE_MAP {
        if q_lower.contains(keyword) {
            filters.document_type = Some(doc_type.to_string());
            break;
        }
    }

    filters.time = extract_time_filter(&q_lower);

    (!filters.is_empty()).then_some(filters)
}

static RELATIVE_RE: LazyLock<Regex> = LazyLock::new(|| {
    Regex::new(r"(?:last|past)\s+(\d+)\s+(day|week|month)s?").expect("relative pattern")
});
static QUARTER_RE: LazyLock<Regex> =
    LazyLock::new(|| Regex::new(r"q([1-4])(?:\s+(\d{4}))?").expect("quarter pattern"));
static RANGE_RE: LazyLock<Regex> =
    LazyLock::new(|| Regex::new(r"from\s+(\w+)\s+to\s+(\w+)").expect("range pattern"));

const MONTHS: [&str; 12] = [
    "january",
    "february",
    "march",
    "april",
    "may",
    "june",
    "july",
    "august",
    "september",
    "october",
    "november",
    "december",
];

/// Recognize the time-expression grammar. Expects lowercased input.
pub fn extract_time_filter(q_lower: &str) -> Option<TimeFilter> {
    if let Some(captures) = RELATIVE_RE.captures(q_lower) {
        let amount: u32 = captures[1].parse().ok()?;
        let unit = match &captures[2] {
            "day" => TimeUnit::Days,
            "week" => TimeUnit::Weeks,
            _ => TimeUnit::Months,
        };
        return Some(TimeFilter::Relative { amount, unit });
    }

    for (phrase, range) in [
        ("last month", NamedRange::LastMonth),
        ("this month", NamedRange::ThisMonth),
        ("last week", NamedRange::LastWeek),
        ("this week", NamedRange::ThisWeek),
        ("today", NamedRange::Today),
        ("yesterday", NamedRange::Yesterday),
        ("last year", NamedRange::LastYear),
        ("this year", NamedRange::ThisYear),
    ] {
        if q_lower.contains(phrase) {
            return Some(TimeFilter::Named { range });
        }
    }
    if q_lower.contains("recent") {
        return Some(TimeFilter::Named {
            range: NamedRange::LastWeek,
        });
    }

    if let Some(captures) = QUARTER_RE.captures(q_lower) {
        let quarter: u8 = captures[1].parse().ok()?;
        let year = captures.get(2).and_then(|y| y.as_str().parse().ok());
        return Some(TimeFilter::Quarter { quarter, year });
    }

    for (i, month) in MONTHS.iter().enumerate() {
        if let Some(pos) = q_lower.find(month) {
            let rest = &q_lower[pos + month.len()..];
            let year = rest
                .split_whitespace()
                .next()
                .and_then(|w| w.parse::<i32>().ok())
                .filter(|y| (1900..2200).contains(y));
            return Some(TimeFilter::Month {
                month: i as u32 + 1,
                year,
            });
        }
    }

    if let Some(captures) = Regex::new(r"\b(20\d{2})\b")
        .ok()
        .and_then(|re| re.captures(q_lower))
    {
        return Some(TimeFilter::Year {
            year: captures[1].parse().ok()?,
        });
    }

    if let Some(captures) = RANGE_RE.captures(q_lower) {
        return Some(TimeFilter::Span {
            start: captures[1].to_string(),
            end: captures[2].to_string(),
        });
    }

    None
}

#[cfg(test)]
mod tests {
    use super::*;

    fn context_with(queries: &[&str]) -> SessionContext {
        SessionContext {
            recent_queries: queries.iter().map(|q| q.to_string()).collect(),
            ..Default::default()
        }
    }

    #[test]
    fn pdf_budget_query_routes_to_document_search_with_filter() {
        let result = rule_classify("show me pdfs about budget");
        assert_eq!(result.intent, QueryIntent::DocumentSearch);
        assert!(result.confidence > 0.8);
        let filters = result.filters.unwrap();
        assert_eq!(filters.file_type.unwrap(), vec![".pdf"]);
    }

    #[test]
    fn image_query_wins_over_other_rules() {
        let result = rule_classify("find photos from the beach");
        assert_eq!(result.intent, QueryIntent::DocumentSearch);
        assert!((result.confidence - 0.95).abs() < f32::EPSILON);
        let filters = result.filters.unwrap();
        assert!(filters.file_type.unwrap().contains(&".png".to_string()));
    }

    #[test]
    fn comparison_and_summary_keywords_classify() {
        assert_eq!(
            rule_classify("compare the Q1 and Q2 reports").intent,
            QueryIntent::Comparison
        );
        assert_eq!(
            rule_classify("summarize my meeting notes").intent,
            QueryIntent::Summarization
        );
    }

    #[test]
    fn question_without_doc_keyword_is_general_knowledge() {
        let result = rule_classify("what is quantum computing");
        assert_eq!(result.intent, QueryIntent::GeneralKnowledge);
    }

    #[test]
    fn question_with_doc_keyword_stays_document_search() {
        let result = rule_classify("what is in the contract");
        assert_eq!(result.intent, QueryIntent::DocumentSearch);
    }

    #[test]
    fn rule_confidence_never_exceeds_cap() {
        for query in [
            "show me pdfs",
            "compare things",
            "summarize stuff",
            "what is rust",
            "random words here",
            "how does this work",
        ] {
            assert!(rule_classify(query).confidence <= 0.95);
        }
    }

    #[test]
    fn followup_show_more_expands_last_query() {
        let context = context_with(&["find marketing decks"]);
        let (resolved, is_followup) = resolve_followup("show more like that", Some(&context));
        assert!(is_followup);
        assert!(resolved.contains("marketing decks"));
    }

    #[test]
    fn followup_filter_phrase_appends_to_last_query() {
        let context = context_with(&["find quarterly reports"]);
        let (resolved, is_followup) = resolve_followup("but only the pdfs", Some(&context));
        assert!(is_followup);
        assert!(resolved.starts_with("find quarterly reports"));
        assert!(resolved.contains("pdfs"));
    }

    #[test]
    fn pronoun_query_without_session_passes_through() {
        let (resolved, is_followup) = resolve_followup("show that", None);
        assert_eq!(resolved, "show that");
        assert!(!is_followup);

        let empty = SessionContext::default();
        let (resolved, is_followup) = resolve_followup("show that", Some(&empty));
        assert_eq!(resolved, "show that");
        assert!(!is_followup);
    }

    #[test]
    fn what_about_combines_queries() {
        let context = context_with(&["invoices from Acme"]);
        let (resolved, is_followup) = resolve_followup("what about receipts", Some(&context));
        assert!(is_followup);
        assert_eq!(resolved, "invoices from Acme receipts");
    }

    #[test]
    fn entity_extraction_handles_the_documented_shapes() {
        let entities = extract_entities(r#"find Aditya's resume about "machine learning""#);
        assert!(entities.iter().any(|e| e == "Aditya"));
        assert!(entities.iter().any(|e| e == "machine learning"));

        let entities = extract_entities("show contracts with Acme Corp from March 2024");
        assert!(entities.iter().any(|e| e == "Acme Corp"));
        assert!(entities.iter().any(|e| e == "March 2024"));
    }

    #[test]
    fn entity_extraction_skips_sentence_initial_capitals() {
        let entities = extract_entities("Find something plain");
        assert!(!entities.iter().any(|e| e == "Find"));
    }

    #[test]
    fn entities_deduplicate_case_insensitively() {
        let entities = extract_entities("Paris documents about paris");
        let count = entities
            .iter()
            .filter(|e| e.eq_ignore_ascii_case("paris"))
            .count();
        assert_eq!(count, 1);
    }

    #[test]
    fn filter_extraction_recognizes_doc_types_and_time() {
        let filters = extract_filters("invoices from last 3 weeks").unwrap();
        assert_eq!(filters.document_type.as_deref(), Some("invoice"));
        assert_eq!(
            filters.time,
            Some(TimeFilter::Relative {
                amount: 3,
                unit: TimeUnit::Weeks
            })
        );

        let filters = extract_filters("the invoice from Q2 2024").unwrap();
        assert_eq!(filters.document_type.as_deref(), Some("invoice"));
        assert_eq!(
            filters.time,
            Some(TimeFilter::Quarter {
                quarter: 2,
                year: Some(2024)
            })
        );
    }

    #[test]
    fn time_grammar_covers_named_and_absolute_forms() {
        assert_eq!(
            extract_time_filter("files from yesterday"),
            Some(TimeFilter::Named {
                range: NamedRange::Yesterday
            })
        );
        assert_eq!(
            extract_time_filter("reports from march 2024"),
            Some(TimeFilter::Month {
                month: 3,
                year: Some(2024)
            })
        );
        assert_eq!(
            extract_time_filter("documents from 2023"),
            Some(TimeFilter::Year { year: 2023 })
        );
        assert_eq!(
            extract_time_filter("recently added files"),
            Some(TimeFilter::Named {
                range: NamedRange::LastWeek
            })
        );
        assert_eq!(
            extract_time_filter("from january to march"),
            Some(TimeFilter::Month {
                month: 1,
                year: None
            })
        );
    }

    #[test]
    fn needs_clarification_thresholds() {
        let mut classification = rule_classify("anything");
        classification.confidence = 0.3;
        assert!(classification.needs_clarification());
        classification.confidence = 0.6;
        assert!(!classification.needs_clarification());
        classification
            .clarification_questions
            .push("which one?".into());
        assert!(classification.needs_clarification());
    }
}
