//! Comprehensive-summary generation: prompts, the sectioned response
//! parser, and entity auto-categorization.
//!
//! The summarization model answers in a strict sectioned format (SUMMARY /
//! KEYWORDS / ENTITIES_STRUCTURED / RELATIONSHIPS / TOPICS). The parser is
//! forgiving about bracket styles and casing; when the structured entity
//! section is missing it falls back to the flat ENTITIES form and
//! categorizes heuristically.

use std::collections::BTreeMap;

use regex::Regex;
use serde::{Deserialize, Serialize};

/// Per-category cap on extracted entities.
const MAX_ENTITIES_PER_CATEGORY: usize = 15;
const MAX_FLAT_ENTITIES: usize = 30;
const MAX_RELATIONSHIPS: usize = 15;
const MAX_TOPICS: usize = 10;

pub const ENTITY_CATEGORIES: [&str; 8] = [
    "PERSON",
    "SKILLS",
    "COMPANIES",
    "EDUCATION",
    "LOCATIONS",
    "DATES",
    "PROJECTS",
    "TECHNOLOGIES",
];

#[derive(Clone, Debug, Default, PartialEq, Serialize, Deserialize)]
pub struct RelationshipTriple {
    pub source: String,
    pub relation: String,
    pub target: String,
}

#[derive(Clone, Debug, Default)]
pub struct ParsedSummary {
    pub summary: String,
    /// Comma-joined keyword list.
    pub keywords: String,
    pub entities_structured: BTreeMap<String, Vec<String>>,
    pub entities_flat: Vec<String>,
    pub relationships: Vec<RelationshipTriple>,
    pub topics: Vec<String>,
}

/// Prompt for text documents: comprehensive multi-paragraph summary plus
/// the structured metadata sections.
pub fn text_summary_prompt(truncated_content: &str) -> String {
    format!(
        r#"You are an expert document analyst. Create a COMPREHENSIVE summary of this document.

Your summary should be detailed and thorough (5-10 paragraphs), covering:

## Executive Summary
What is this document? What is its main purpose?

## Key Content
Describe the main sections, topics, and content in detail.

## Important Information
- Key facts, figures, statistics, and data points
- Important dates, deadlines, or timeframes
- Specific amounts, quantities, or measurements

---
DOCUMENT CONTENT:
{truncated_content}
---

Respond in this EXACT format:

SUMMARY:
[Your comprehensive multi-paragraph summary - be detailed and thorough, 5-10 paragraphs]

KEYWORDS: [keyword1, keyword2, keyword3, keyword4, keyword5, ...]

ENTITIES_STRUCTURED:
PERSON: [name1, name2]
SKILLS: [skill1, skill2, skill3, ...]
COMPANIES: [company1, company2, ...]
EDUCATION: [university1, degree1, ...]
LOCATIONS: [location1, location2, ...]
DATES: [date1, date2, ...]
PROJECTS: [project1, project2, ...]
TECHNOLOGIES: [tech1, tech2, ...]

RELATIONSHIPS:
[Entity1 | relationship_type | Entity2]
[Entity3 | relationship_type | Entity4]

TOPICS: [topic1, topic2, topic3, ...]"#
    )
}

/// Prompt for spreadsheets: structure-aware description.
pub fn spreadsheet_summary_prompt(description: &str) -> String {
    format!(
        r#"Analyze this spreadsheet and provide a detailed summary:

{description}

Respond in this EXACT format:

SUMMARY:
[Describe what this spreadsheet contains, its purpose, the data structure, key columns, and any patterns or insights you can identify. Be comprehensive - 3-5 paragraphs.]

KEYWORDS: [keyword1, keyword2, keyword3, ...]

ENTITIES: [any specific names, dates, or identifiers found in the data]

TOPICS: [data themes and subject areas]"#
    )
}

/// Prompt for images: exhaustive description so the caption is searchable.
pub fn image_summary_prompt() -> String {
    r#"Analyze this image COMPREHENSIVELY and provide a VERY DETAILED description.

Your description should cover ALL of the following in detail:

1. **Main Subject**: What is the primary focus? Describe it thoroughly.
2. **All Visible Elements**: List and describe EVERY object, person, element visible
3. **Text Content**: Transcribe ALL visible text EXACTLY as it appears
4. **Visual Details**: Colors, composition, style, quality, lighting
5. **Context & Purpose**: What is this image about? What is it used for?
6. **Identifiable Information**: Logos, brands, dates, names, locations

Provide a COMPREHENSIVE description (minimum 3-5 detailed paragraphs) that captures everything someone might want to search for in this image.

Respond in this format:
SUMMARY:
[Your very detailed multi-paragraph description]

KEYWORDS: [keyword1, keyword2, keyword3, ...]

TOPICS: [topic1, topic2, topic3, ...]"#
        .to_string()
}

/// Case-insensitive position of a section header.
fn find_header(response: &str, header: &str) -> Option<usize> {
    let haystack = response.to_lowercase();
    haystack.find(&header.to_lowercase())
}

/// Slice the text between one header and the nearest of the terminators.
fn section<'a>(response: &'a str, header: &str, terminators: &[&str]) -> Option<&'a str> {
    let start = find_header(response, header)? + header.len();
    let rest = &response[start..];
    let end = terminators
        .iter()
        .filter_map(|t| find_header(rest, t))
        .min()
        .unwrap_or(rest.len());
    Some(rest[..end].trim())
}

/// Parse the sectioned summarization response.
pub fn parse_detailed_response(response: &str) -> ParsedSummary {
    let mut parsed = ParsedSummary::default();

    if let Some(text) = section(response, "SUMMARY:", &["KEYWORDS:"]) {
        parsed.summary = text.to_string();
    }
    if let Some(text) = section(
        response,
        "KEYWORDS:",
        &["ENTITIES", "RELATIONSHIPS:", "TOPICS:"],
    ) {
        parsed.keywords = strip_brackets(text);
    }

    if let Some(body) = section(
        response,
        "ENTITIES_STRUCTURED:",
        &["RELATIONSHIPS:", "TOPICS:"],
    ) {
        for category in ENTITY_CATEGORIES {
            if let Some(items) = category_items(body, category) {
                let items: Vec<String> =
                    items.into_iter().take(MAX_ENTITIES_PER_CATEGORY).collect();
                if !items.is_empty() {
                    parsed.entities_flat.extend(items.clone());
                    parsed
                        .entities_structured
                        .insert(category.to_lowercase(), items);
                }
            }
        }
    }

    if parsed.entities_structured.is_empty()
        && find_header(response, "ENTITIES_STRUCTURED:").is_none()
        && let Some(text) = section(response, "ENTITIES:", &["RELATIONSHIPS:", "TOPICS:"])
    {
        let flat: Vec<String> = split_list(&strip_brackets(text))
            .into_iter()
            .take(MAX_FLAT_ENTITIES)
            .collect();
        parsed.entities_structured = auto_categorize_entities(&flat);
        parsed.entities_flat = flat;
    }

    if let Some(body) = section(response, "RELATIONSHIPS:", &["TOPICS:"]) {
        for line in body.lines() {
            let line = line.trim().trim_matches(['[', ']']);
            if !line.contains('|') {
                continue;
            }
            let parts: Vec<&str> = line.split('|').map(|p| p.trim().trim_matches(['[', ']'])).collect();
            if parts.len() >= 3 && !parts[0].is_empty() && !parts[2].is_empty() {
                parsed.relationships.push(RelationshipTriple {
                    source: parts[0].to_string(),
                    relation: parts[1].to_lowercase().replace(' ', "_"),
                    target: parts[2].to_string(),
                });
            }
        }
        parsed.relationships.truncate(MAX_RELATIONSHIPS);
    }

    if let Some(text) = section(response, "TOPICS:", &[]) {
        parsed.topics = split_list(&strip_brackets(text))
            .into_iter()
            .map(|t| t.to_lowercase())
            .take(MAX_TOPICS)
            .collect();
    }

    parsed
}

/// Pull one category's items out of the structured entities section,
/// accepting both `PERSON: [a, b]` and `PERSON: a, b`.
fn category_items(section: &str, category: &str) -> Option<Vec<String>> {
    let bracketed = Regex::new(&format!(r"(?i){category}:\s*\[([^\]]*)\]")).ok()?;
    let plain = Regex::new(&format!(r"(?i){category}:\s*([^\n]+)")).ok()?;
    let text = bracketed
        .captures(section)
        .or_else(|| plain.captures(section))
        .map(|c| c[1].to_string())?;
    let items = split_list(&strip_brackets(text.trim()));
    Some(items)
}

fn strip_brackets(text: &str) -> String {
    text.replace(['[', ']'], "").trim().to_string()
}

fn split_list(text: &str) -> Vec<String> {
    text.split(',')
        .map(|item| item.trim().trim_matches(['"', '\'']).to_string())
        .filter(|item| !item.is_empty() && item != "..." && item != ".." && item != "etc")
        .collect()
}

const SKILL_KEYWORDS: [&str; 18] = [
    "python",
    "java",
    "javascript",
    "react",
    "sql",
    "aws",
    "docker",
    "kubernetes",
    "machine learning",
    "ai",
    "ml",
    "api",
    "html",
    "css",
    "node",
    "rust",
    "go",
    "terraform",
];
const EDU_KEYWORDS: [&str; 8] = [
    "university",
    "college",
    "institute",
    "school",
    "degree",
    "bachelor",
    "master",
    "phd",
];
const COMPANY_SUFFIXES: [&str; 8] = [
    "inc",
    "llc",
    "ltd",
    "corp",
    "company",
    "technologies",
    "solutions",
    "services",
];

/// Categorize a flat entity list with lexical heuristics: known skill and
/// education terms, corporate suffixes, then 2-3 capitalized words as a
/// person name, everything else into `other`.
pub fn auto_categorize_entities(entities: &[String]) -> BTreeMap<String, Vec<String>> {
    let mut categorized: BTreeMap<String, Vec<String>> = BTreeMap::new();
    let mut push = |category: &str, entity: &str| {
        categorized
            .entry(category.to_string())
            .or_default()
            .push(entity.to_string());
    };

    for entity in entities {
        let lower = entity.to_lowercase();
        if SKILL_KEYWORDS.iter().any(|s| lower.contains(s)) {
            push("skills", entity);
        } else if EDU_KEYWORDS.iter().any(|e| lower.contains(e)) {
            push("education", entity);
        } else if COMPANY_SUFFIXES.iter().any(|s| lower.contains(s)) {
            push("companies", entity);
        } else if entity.split_whitespace().count() <= 3
            && entity.chars().next().is_some_and(char::is_uppercase)
        {
            push("persons", entity);
        } else {
            push("other", entity);
        }
    }
    categorized
}

#[cfg(test)]
mod tests {
    use super::*;

    const SAMPLE: &str = r#"SUMMARY:
This resume describes a software engineer with eight years of experience.

It details roles at two companies and a history of cloud platform work.

KEYWORDS: [software engineer, cloud, backend, resume]

ENTITIES_STRUCTURED:
PERSON: [Jane Doe]
SKILLS: [Python, Kubernetes, AWS]
COMPANIES: [Acme Corp, Initech LLC]
EDUCATION: [MIT, BSc Computer Science]
LOCATIONS: [Boston]
DATES: [2016, 2024]
PROJECTS: []
TECHNOLOGIES: [PostgreSQL]

RELATIONSHIPS:
[Jane Doe | works_at | Acme Corp]
[Jane Doe | studied at | MIT]

TOPICS: [Careers, Software Engineering]"#;

    #[test]
    fn parses_all_sections() {
        let parsed = parse_detailed_response(SAMPLE);
        assert!(parsed.summary.starts_with("This resume describes"));
        assert!(parsed.summary.contains("cloud platform work"));
        assert_eq!(parsed.keywords, "software engineer, cloud, backend, resume");
        assert_eq!(
            parsed.entities_structured["person"],
            vec!["Jane Doe".to_string()]
        );
        assert_eq!(parsed.entities_structured["skills"].len(), 3);
        assert!(!parsed.entities_structured.contains_key("projects"));
        assert!(parsed.entities_flat.contains(&"Acme Corp".to_string()));
        assert_eq!(parsed.relationships.len(), 2);
        assert_eq!(parsed.relationships[1].relation, "studied_at");
        assert_eq!(parsed.topics, vec!["careers", "software engineering"]);
    }

    #[test]
    fn flat_entities_fall_back_to_auto_categorization() {
        let response = r#"SUMMARY:
A short note.

KEYWORDS: notes

ENTITIES: [John Smith, Python, Stanford University, Acme Inc]

TOPICS: [notes]"#;
        let parsed = parse_detailed_response(response);
        assert_eq!(parsed.entities_flat.len(), 4);
        assert_eq!(parsed.entities_structured["persons"], vec!["John Smith"]);
        assert_eq!(parsed.entities_structured["skills"], vec!["Python"]);
        assert_eq!(
            parsed.entities_structured["education"],
            vec!["Stanford University"]
        );
        assert_eq!(parsed.entities_structured["companies"], vec!["Acme Inc"]);
    }

    #[test]
    fn flat_entity_superset_invariant_holds() {
        let parsed = parse_detailed_response(SAMPLE);
        for items in parsed.entities_structured.values() {
            for item in items {
                assert!(parsed.entities_flat.contains(item));
            }
        }
    }

    #[test]
    fn missing_sections_yield_defaults() {
        let parsed = parse_detailed_response("just prose with no sections");
        assert!(parsed.summary.is_empty());
        assert!(parsed.keywords.is_empty());
        assert!(parsed.relationships.is_empty());
    }

    #[test]
    fn unbracketed_category_lines_parse() {
        let response = "SUMMARY:\nx\n\nKEYWORDS: a\n\nENTITIES_STRUCTURED:\nPERSON: Ada Lovelace, Alan Turing\n\nTOPICS: t";
        let parsed = parse_detailed_response(response);
        assert_eq!(parsed.entities_structured["person"].len(), 2);
    }
}
