//! OpenSearch implementation of the [`SearchBackend`] seam.

use async_trait::async_trait;
use chrono::{DateTime, Datelike, Duration as ChronoDuration, TimeZone, Utc};
use serde_json::{Value, json};

use super::{EngineError, SearchBackend};
use crate::config::EngineSettings;
use crate::types::{DocumentRecord, NamedRange, SearchFilters, SearchResult, TimeFilter, TimeUnit};

pub struct OpenSearchBackend {
    http: reqwest::Client,
    base_url: String,
    index: String,
    username: String,
    password: String,
}

impl OpenSearchBackend {
    pub fn new(settings: &EngineSettings) -> Self {
        Self {
            http: reqwest::Client::builder()
                .danger_accept_invalid_certs(true)
                .build()
                .unwrap_or_default(),
            base_url: settings.base_url(),
            index: settings.index_name.clone(),
            username: settings.username.clone(),
            password: settings.password.clone(),
        }
    }

    fn url(&self, suffix: &str) -> String {
        format!("{}/{}{suffix}", self.base_url, self.index)
    }

    async fn request(
        &self,
        method: reqwest::Method,
        url: String,
        body: Option<Value>,
    ) -> Result<Value, EngineError> {
        let mut req = self
            .http
            .request(method, url)
            .basic_auth(&self.username, Some(&self.password));
        if let Some(body) = body {
            req = req.json(&body);
        }
        let response = req
            .send()
            .await
            .map_err(|err| EngineError::Transport(err.to_string()))?;
        let status = response.status();
        let text = response
            .text()
            .await
            .map_err(|err| EngineError::Transport(err.to_string()))?;
        if !status.is_success() {
            return Err(EngineError::HttpStatus {
                status: status.as_u16(),
                body: text,
            });
        }
        serde_json::from_str(&text).map_err(|err| EngineError::Decode(err.to_string()))
    }

    async fn search(&self, body: Value) -> Result<Vec<SearchResult>, EngineError> {
        let response = self
            .request(reqwest::Method::POST, self.url("/_search"), Some(body))
            .await?;
        parse_hits(&response)
    }
}

#[async_trait]
impl SearchBackend for OpenSearchBackend {
    async fn create_index(&self, dimension: usize) -> Result<(), EngineError> {
        let exists = self
            .http
            .head(self.url(""))
            .basic_auth(&self.username, Some(&self.password))
            .send()
            .await
            .map_err(|err| EngineError::Bootstrap(err.to_string()))?;
        if exists.status().is_success() {
            tracing::info!(target: "findry::engine", index = %self.index, "index already exists");
            return Ok(());
        }

        let mapping = index_mapping(dimension);
        self.request(reqwest::Method::PUT, self.url(""), Some(mapping))
            .await
            .map_err(|err| EngineError::Bootstrap(err.to_string()))?;
        tracing::info!(target: "findry::engine", index = %self.index, "created index");
        Ok(())
    }

    async fn document_exists(&self, id: &str) -> Result<bool, EngineError> {
        let response = self
            .http
            .head(self.url(&format!("/_doc/{id}")))
            .basic_auth(&self.username, Some(&self.password))
            .send()
            .await
            .map_err(|err| EngineError::Transport(err.to_string()))?;
        Ok(response.status().is_success())
    }

    async fn index_document(&self, record: &DocumentRecord) -> Result<(), EngineError> {
        let body = serde_json::to_value(record).map_err(|e| EngineError::Decode(e.to_string()))?;
        self.request(
            reqwest::Method::PUT,
            self.url(&format!("/_doc/{}?refresh=true", record.id)),
            Some(body),
        )
        .await?;
        tracing::debug!(target: "findry::engine", filename = %record.filename, "indexed document");
        Ok(())
    }

    async fn get_document(&self, id: &str) -> Result<Option<SearchResult>, EngineError> {
        match self
            .request(reqwest::Method::GET, self.url(&format!("/_doc/{id}")), None)
            .await
        {
            Ok(response) => {
                if response["found"].as_bool() != Some(true) {
                    return Ok(None);
                }
                let mut result = source_to_result(id, &response["_source"])?;
                result.score = 1.0;
                Ok(Some(result))
            }
            Err(EngineError::HttpStatus { status: 404, .. }) => Ok(None),
            Err(err) => Err(err),
        }
    }

    async fn delete_document(&self, id: &str) -> Result<(), EngineError> {
        self.request(
            reqwest::Method::DELETE,
            self.url(&format!("/_doc/{id}?refresh=true")),
            None,
        )
        .await?;
        Ok(())
    }

    async fn knn_search(
        &self,
        vector: &[f32],
        top_k: usize,
        filters: Option<&SearchFilters>,
    ) -> Result<Vec<SearchResult>, EngineError> {
        let knn = json!({
            "knn": {
                "vector_embedding": {
                    "vector": vector,
                    "k": top_k,
                }
            }
        });
        let query = wrap_with_filters(knn, filters, Utc::now());
        self.search(json!({
            "size": top_k,
            "query": query,
            "_source": { "excludes": ["vector_embedding"] },
        }))
        .await
    }

    async fn bm25_search(
        &self,
        query: &str,
        top_k: usize,
        filters: Option<&SearchFilters>,
    ) -> Result<Vec<SearchResult>, EngineError> {
        let mut bool_query = json!({
            "should": [
                {
                    "multi_match": {
                        "query": query,
                        "fields": [
                            "detailed_summary^3",
                            "full_content^2",
                            "filename^2",
                            "keywords^4"
                        ],
                        "type": "best_fields",
                        "fuzziness": "AUTO"
                    }
                },
                {
                    "match_phrase": {
                        "detailed_summary": { "query": query, "boost": 2 }
                    }
                }
            ],
            "minimum_should_match": 1
        });
        let clauses = filters
            .map(|f| filters_to_dsl(f, Utc::now()))
            .unwrap_or_default();
        if !clauses.is_empty() {
            bool_query["filter"] = Value::Array(clauses);
        }
        self.search(json!({
            "size": top_k,
            "query": { "bool": bool_query },
            "_source": { "excludes": ["vector_embedding"] },
        }))
        .await
    }

    async fn count(&self) -> Result<u64, EngineError> {
        let response = self
            .request(reqwest::Method::GET, self.url("/_count"), None)
            .await?;
        Ok(response["count"].as_u64().unwrap_or(0))
    }
}

/// Index mapping: kNN HNSW over the embedding, analyzed text fields for
/// BM25, keyword fields for filtering.
fn index_mapping(dimension: usize) -> Value {
    json!({
        "settings": {
            "index": {
                "knn": true,
                "knn.algo_param.ef_search": 100
            },
            "analysis": {
                "analyzer": {
                    "content_analyzer": {
                        "type": "standard",
                        "stopwords": "_english_"
                    }
                }
            }
        },
        "mappings": {
            "properties": {
                "id": { "type": "keyword" },
                "filename": {
                    "type": "text",
                    "analyzer": "content_analyzer",
                    "fields": { "keyword": { "type": "keyword" } }
                },
                "file_path": { "type": "keyword" },
                "file_type": { "type": "keyword" },
                "content_type": { "type": "keyword" },
                "document_type": { "type": "keyword" },
                "is_image": { "type": "boolean" },
                "detailed_summary": { "type": "text", "analyzer": "content_analyzer" },
                "full_content": { "type": "text", "analyzer": "content_analyzer" },
                "keywords": { "type": "text", "analyzer": "content_analyzer" },
                "entities": { "type": "keyword" },
                "topics": { "type": "keyword" },
                "vector_embedding": {
                    "type": "knn_vector",
                    "dimension": dimension,
                    "method": {
                        "name": "hnsw",
                        "space_type": "innerproduct",
                        "engine": "faiss",
                        "parameters": { "ef_construction": 128, "m": 24 }
                    }
                },
                "embedding_ok": { "type": "boolean" },
                "word_count": { "type": "integer" },
                "page_count": { "type": "integer" },
                "file_size_bytes": { "type": "long" },
                "created_at": { "type": "date" },
                "last_modified": { "type": "date" }
            }
        }
    })
}

/// Wrap a query in a bool/must with filter clauses when filters are present.
fn wrap_with_filters(query: Value, filters: Option<&SearchFilters>, now: DateTime<Utc>) -> Value {
    let clauses = filters.map(|f| filters_to_dsl(f, now)).unwrap_or_default();
    if clauses.is_empty() {
        query
    } else {
        json!({
            "bool": {
                "must": [query],
                "filter": clauses
            }
        })
    }
}

/// Normalize typed filters into engine DSL clauses: lists become `terms`,
/// single values become `term`, time filters become a `range` on
/// `last_modified`.
pub fn filters_to_dsl(filters: &SearchFilters, now: DateTime<Utc>) -> Vec<Value> {
    let mut clauses = Vec::new();
    if let Some(extensions) = &filters.file_type {
        clauses.push(json!({ "terms": { "file_type": extensions } }));
    }
    if let Some(doc_type) = &filters.document_type {
        clauses.push(json!({ "term": { "document_type": doc_type } }));
    }
    if let Some(is_image) = filters.is_image {
        clauses.push(json!({ "term": { "is_image": is_image } }));
    }
    if let Some(time) = &filters.time {
        let (start, end) = time_filter_bounds(time, now);
        let mut range = serde_json::Map::new();
        if let Some(start) = start {
            range.insert("gte".into(), json!(start.to_rfc3339()));
        }
        if let Some(end) = end {
            range.insert("lt".into(), json!(end.to_rfc3339()));
        }
        if !range.is_empty() {
            clauses.push(json!({ "range": { "last_modified": Value::Object(range) } }));
        }
    }
    clauses
}

/// Resolve a time filter into `[start, end)` bounds relative to `now`.
pub fn time_filter_bounds(
    filter: &TimeFilter,
    now: DateTime<Utc>,
) -> (Option<DateTime<Utc>>, Option<DateTime<Utc>>) {
    let start_of_day = |dt: DateTime<Utc>| {
        Utc.with_ymd_and_hms(dt.year(), dt.month(), dt.day(), 0, 0, 0)
            .single()
            .unwrap_or(dt)
    };
    let month_start = |year: i32, month: u32| Utc.with_ymd_and_hms(year, month, 1, 0, 0, 0).single();
    let next_month = |year: i32, month: u32| {
        if month == 12 {
            (year + 1, 1)
        } else {
            (year, month + 1)
        }
    };

    match filter {
        TimeFilter::Relative { amount, unit } => {
            let days = match unit {
                TimeUnit::Days => *amount as i64,
                TimeUnit::Weeks => *amount as i64 * 7,
                TimeUnit::Months => *amount as i64 * 30,
            };
            (Some(now - ChronoDuration::days(days)), None)
        }
        TimeFilter::Named { range } => {
            let today = start_of_day(now);
            match range {
                NamedRange::Today => (Some(today), None),
                NamedRange::Yesterday => (Some(today - ChronoDuration::days(1)), Some(today)),
                NamedRange::ThisWeek => {
                    let weekday = now.weekday().num_days_from_monday() as i64;
                    (Some(today - ChronoDuration::days(weekday)), None)
                }
                NamedRange::LastWeek => {
                    let weekday = now.weekday().num_days_from_monday() as i64;
                    let this_week = today - ChronoDuration::days(weekday);
                    (Some(this_week - ChronoDuration::days(7)), Some(this_week))
                }
                NamedRange::ThisMonth => (month_start(now.year(), now.month()), None),
                NamedRange::LastMonth => {
                    let (py, pm) = if now.month() == 1 {
                        (now.year() - 1, 12)
                    } else {
                        (now.year(), now.month() - 1)
                    };
                    (month_start(py, pm), month_start(now.year(), now.month()))
                }
                NamedRange::ThisYear => (month_start(now.year(), 1), None),
                NamedRange::LastYear => (month_start(now.year() - 1, 1), month_start(now.year(), 1)),
            }
        }
        TimeFilter::Quarter { quarter, year } => {
            let year = year.unwrap_or(now.year());
            let start_month = (*quarter as u32 - 1) * 3 + 1;
            let start = month_start(year, start_month);
            let end = if start_month == 10 {
                month_start(year + 1, 1)
            } else {
                month_start(year, start_month + 3)
            };
            (start, end)
        }
        TimeFilter::Month { month, year } => {
            let year = year.unwrap_or(now.year());
            let (ny, nm) = next_month(year, *month);
            (month_start(year, *month), month_start(ny, nm))
        }
        TimeFilter::Year { year } => (month_start(*year, 1), month_start(year + 1, 1)),
        // Free-form span endpoints are resolved as month names when
        // possible; unrecognized endpoints leave that bound open.
        TimeFilter::Span { start, end } => {
            let to_month = |name: &str| -> Option<u32> {
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
                MONTHS
                    .iter()
                    .position(|m| m.starts_with(&name.to_lowercase()) && name.len() >= 3)
                    .map(|i| i as u32 + 1)
            };
            let start_bound = to_month(start).and_then(|m| month_start(now.year(), m));
            let end_bound = to_month(end).and_then(|m| {
                let (ny, nm) = next_month(now.year(), m);
                month_start(ny, nm)
            });
            (start_bound, end_bound)
        }
    }
}

fn parse_hits(response: &Value) -> Result<Vec<SearchResult>, EngineError> {
    let hits = response["hits"]["hits"]
        .as_array()
        .ok_or_else(|| EngineError::Decode("missing hits array".into()))?;
    let mut results = Vec::with_capacity(hits.len());
    for hit in hits {
        let id = hit["_id"].as_str().unwrap_or_default();
        let mut result = source_to_result(id, &hit["_source"])?;
        result.score = hit["_score"].as_f64().unwrap_or(0.0) as f32;
        results.push(result);
    }
    Ok(results)
}

fn source_to_result(id: &str, source: &Value) -> Result<SearchResult, EngineError> {
    let mut source = source.clone();
    if let Some(obj) = source.as_object_mut() {
        obj.remove("vector_embedding");
        obj.insert("id".into(), json!(id));
        obj.entry("score").or_insert(json!(0.0));
    }
    serde_json::from_value(source).map_err(|err| EngineError::Decode(err.to_string()))
}

#[cfg(test)]
mod tests {
    use super::*;

    fn at(y: i32, m: u32, d: u32) -> DateTime<Utc> {
        Utc.with_ymd_and_hms(y, m, d, 12, 0, 0).single().unwrap()
    }

    #[test]
    fn list_filter_becomes_terms_clause() {
        let filters = SearchFilters {
            file_type: Some(vec![".pdf".into(), ".docx".into()]),
            ..Default::default()
        };
        let clauses = filters_to_dsl(&filters, Utc::now());
        assert_eq!(clauses.len(), 1);
        assert_eq!(clauses[0]["terms"]["file_type"][0], ".pdf");
    }

    #[test]
    fn single_value_becomes_term_clause() {
        let filters = SearchFilters {
            document_type: Some("invoice".into()),
            is_image: Some(false),
            ..Default::default()
        };
        let clauses = filters_to_dsl(&filters, Utc::now());
        assert_eq!(clauses.len(), 2);
        assert_eq!(clauses[0]["term"]["document_type"], "invoice");
        assert_eq!(clauses[1]["term"]["is_image"], false);
    }

    #[test]
    fn quarter_bounds() {
        let (start, end) = time_filter_bounds(
            &TimeFilter::Quarter {
                quarter: 2,
                year: Some(2024),
            },
            at(2025, 1, 1),
        );
        assert_eq!(start.unwrap(), at(2024, 4, 1) - ChronoDuration::hours(12));
        assert_eq!(end.unwrap(), at(2024, 7, 1) - ChronoDuration::hours(12));
    }

    #[test]
    fn relative_weeks_bound() {
        let now = at(2024, 6, 15);
        let (start, end) = time_filter_bounds(
            &TimeFilter::Relative {
                amount: 2,
                unit: TimeUnit::Weeks,
            },
            now,
        );
        assert_eq!(start.unwrap(), now - ChronoDuration::days(14));
        assert!(end.is_none());
    }

    #[test]
    fn yesterday_is_a_closed_range() {
        let now = at(2024, 6, 15);
        let (start, end) = time_filter_bounds(
            &TimeFilter::Named {
                range: NamedRange::Yesterday,
            },
            now,
        );
        assert!(start.unwrap() < end.unwrap());
        assert_eq!(end.unwrap() - start.unwrap(), ChronoDuration::days(1));
    }

    #[test]
    fn parses_engine_hits() {
        let response = json!({
            "hits": { "hits": [
                {
                    "_id": "abc",
                    "_score": 1.5,
                    "_source": {
                        "filename": "report.pdf",
                        "file_path": "/docs/report.pdf",
                        "file_type": ".pdf",
                        "document_type": "report",
                        "is_image": false,
                        "detailed_summary": "Quarterly budget report",
                        "keywords": "budget, quarterly",
                    }
                }
            ]}
        });
        let results = parse_hits(&response).unwrap();
        assert_eq!(results.len(), 1);
        assert_eq!(results[0].id, "abc");
        assert_eq!(results[0].filename, "report.pdf");
        assert!((results[0].score - 1.5).abs() < f32::EPSILON);
    }
}
