//! Query engine: text/image → embedding → vector index → record hydration →
//! filter → rank → paginate. Falls back to filename search when the encoder
//! pair is not loaded.

use std::sync::Arc;
use tracing::debug;

use crate::dates;
use crate::embedder::Embedder;
use crate::error::{Error, Result};
use crate::index::VectorIndex;
use crate::store::Store;
use crate::types::{settings, ImageRecord, SearchFilters, FAVORITE_TAG};

/// Overfetch factor for post-filtering headroom.
fn overfetch(limit: usize) -> usize {
    (4 * limit).max(100).min(2000)
}

#[derive(Debug, Clone, serde::Serialize)]
pub struct ScoredRecord {
    #[serde(flatten)]
    pub record: ImageRecord,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub score: Option<f32>,
}

#[derive(Debug)]
pub struct TextSearchOutcome {
    pub results: Vec<ScoredRecord>,
    pub total_count: u64,
    /// The query with any recognized date phrase stripped.
    pub clean_query: String,
}

pub struct QueryEngine {
    store: Arc<Store>,
    index: Arc<VectorIndex>,
    embedder: Arc<Embedder>,
}

impl QueryEngine {
    pub fn new(store: Arc<Store>, index: Arc<VectorIndex>, embedder: Arc<Embedder>) -> Self {
        Self { store, index, embedder }
    }

    /// Text search. Natural-language date phrases in the query become date
    /// filters (explicit filters win) and are stripped before embedding.
    pub fn search_text(
        &self,
        raw_query: &str,
        filters: Option<SearchFilters>,
        limit: usize,
        offset: usize,
    ) -> Result<TextSearchOutcome> {
        let parsed = dates::parse_query(raw_query);
        let mut filters = filters.unwrap_or_default();
        if filters.date_from.is_none() && filters.date_to.is_none() {
            if let Some(range) = parsed.range {
                filters.date_from = Some(range.from);
                filters.date_to = Some(range.to);
            }
        }
        let clean = parsed.clean_query;

        // Empty query: browse newest-first straight from the store.
        if clean.is_empty() {
            let page = self.store.find_recent(limit, offset)?;
            let results = page
                .into_iter()
                .filter(|rec| passes_filters(rec, &filters))
                .map(|record| ScoredRecord { record, score: None })
                .collect();
            return Ok(TextSearchOutcome {
                results,
                total_count: self.store.count_indexed()?,
                clean_query: clean,
            });
        }

        let query_vector = if self.embedder.is_ready() {
            self.embedder.embed_text(&clean)
        } else {
            None
        };

        let Some(query_vector) = query_vector else {
            // Filename fallback: case-insensitive substring, paginated from
            // the durable store.
            debug!(query = %clean, "models not ready, filename fallback");
            let page = self.store.find_by_filename_substring(&clean, limit, offset)?;
            let results: Vec<ScoredRecord> = page
                .into_iter()
                .filter(|rec| passes_filters(rec, &filters))
                .map(|record| ScoredRecord { record, score: None })
                .collect();
            let total_count = results.len() as u64;
            return Ok(TextSearchOutcome { results, total_count, clean_query: clean });
        };

        let min_score = filters
            .min_score
            .unwrap_or_else(|| {
                self.store
                    .float_setting(settings::SIMILARITY_CUTOFF, settings::DEFAULT_SIMILARITY_CUTOFF)
            });
        let results = self.rank_by_vector(&query_vector, &filters, Some(min_score), limit, offset)?;
        Ok(TextSearchOutcome {
            results,
            total_count: self.store.count_with_embedding()?,
            clean_query: clean,
        })
    }

    /// Visual similarity search from uploaded image bytes. Errors with
    /// [`Error::NotReady`] when the encoder pair is not loaded.
    pub fn search_image(
        &self,
        bytes: &[u8],
        filters: Option<SearchFilters>,
        limit: usize,
    ) -> Result<Vec<ScoredRecord>> {
        if !self.embedder.is_ready() {
            return Err(Error::NotReady);
        }
        let query_vector = self
            .embedder
            .embed_image_bytes(bytes)
            .ok_or_else(|| Error::InvalidInput("could not embed uploaded image".into()))?;

        let filters = filters.unwrap_or_default();
        // The cutoff applies to visual search only when explicitly requested
        // or opted in via the visual_min_score setting.
        let min_score = filters.min_score.or_else(|| {
            self.store
                .bool_setting(settings::VISUAL_MIN_SCORE, false)
                .then(|| {
                    self.store.float_setting(
                        settings::SIMILARITY_CUTOFF,
                        settings::DEFAULT_SIMILARITY_CUTOFF,
                    )
                })
        });
        self.rank_by_vector(&query_vector, &filters, min_score, limit, 0)
    }

    /// Shared scoring path: overfetched top-k, score cutoff, hydration from
    /// the store in hit order, post-filters, truncation.
    fn rank_by_vector(
        &self,
        query_vector: &[f32],
        filters: &SearchFilters,
        min_score: Option<f32>,
        limit: usize,
        offset: usize,
    ) -> Result<Vec<ScoredRecord>> {
        let hits = self.index.top_k(query_vector, overfetch(limit), offset);
        let mut results = Vec::with_capacity(limit.min(hits.len()));
        for (id, score) in hits {
            if let Some(cutoff) = min_score {
                // Hits arrive sorted; everything after the first miss is below.
                if score < cutoff {
                    break;
                }
            }
            let Some(record) = self.store.find_by_id(id)? else {
                debug!(id, "vector entry without record, skipping");
                continue;
            };
            if !passes_filters(&record, filters) {
                continue;
            }
            results.push(ScoredRecord { record, score: Some(score) });
            if results.len() == limit {
                break;
            }
        }
        Ok(results)
    }

    /// Tag browse. The reserved favorite tag reads the authoritative boolean
    /// column; everything else is a substring predicate on the JSON blob.
    pub fn search_tags(&self, tag: &str, limit: usize) -> Result<Vec<ImageRecord>> {
        if tag == FAVORITE_TAG {
            return self.store.find_favorites(limit);
        }
        self.store.find_by_tag_substring(tag, limit)
    }

    pub fn browse_folder(&self, folder: &str, limit: usize) -> Result<Vec<ImageRecord>> {
        self.store.find_by_folder_substring(folder, limit)
    }
}

/// Post-scoring filters: folder substring, inclusive date range against the
/// last-modified timestamp, and tag conjunction with the reserved favorite
/// tag mapped to the boolean column.
pub fn passes_filters(record: &ImageRecord, filters: &SearchFilters) -> bool {
    if let Some(folder) = &filters.folder_path {
        if !folder.is_empty() && !record.path.contains(folder.as_str()) {
            return false;
        }
    }

    if filters.date_from.is_some() || filters.date_to.is_some() {
        let Some(modified) = record.modified_at else {
            return false;
        };
        if let Some(from) = filters.date_from {
            let start = from.and_hms_opt(0, 0, 0).expect("midnight").and_utc().timestamp();
            if modified < start {
                return false;
            }
        }
        if let Some(to) = filters.date_to {
            let end = to.and_hms_opt(23, 59, 59).expect("day end").and_utc().timestamp();
            if modified > end {
                return false;
            }
        }
    }

    if let Some(tags) = &filters.tags {
        let wants_favorite = tags.iter().any(|t| t == FAVORITE_TAG);
        if wants_favorite && !record.favorite {
            return false;
        }
        let plain: Vec<String> = tags
            .iter()
            .filter(|t| t.as_str() != FAVORITE_TAG)
            .map(|t| t.to_lowercase())
            .collect();
        if !plain.is_empty() {
            let record_tags = record.tags_lower();
            for wanted in &plain {
                if !record_tags.iter().any(|t| t == wanted) {
                    return false;
                }
            }
        }
    }

    true
}

#[cfg(test)]
mod tests {
    use super::*;
    use chrono::NaiveDate;

    fn record_with(path: &str, modified: i64) -> ImageRecord {
        let mut rec = ImageRecord::new(path.to_string());
        rec.modified_at = Some(modified);
        rec
    }

    fn date(y: i32, m: u32, d: u32) -> NaiveDate {
        NaiveDate::from_ymd_opt(y, m, d).unwrap()
    }

    #[test]
    fn test_overfetch_formula() {
        assert_eq!(overfetch(5), 100);
        assert_eq!(overfetch(50), 200);
        assert_eq!(overfetch(600), 2000);
    }

    #[test]
    fn test_folder_filter() {
        let rec = record_with("/photos/2024/trip/a.jpg", 0);
        let mut filters = SearchFilters::default();
        filters.folder_path = Some("trip".into());
        assert!(passes_filters(&rec, &filters));
        filters.folder_path = Some("work".into());
        assert!(!passes_filters(&rec, &filters));
    }

    #[test]
    fn test_date_filter_inclusive_bounds() {
        // 2024-03-15 12:00:00 UTC.
        let rec = record_with("/a.jpg", 1_710_504_000);
        let mut filters = SearchFilters::default();
        filters.date_from = Some(date(2024, 3, 15));
        filters.date_to = Some(date(2024, 3, 15));
        assert!(passes_filters(&rec, &filters));

        filters.date_from = Some(date(2024, 3, 16));
        filters.date_to = None;
        assert!(!passes_filters(&rec, &filters));

        filters.date_from = None;
        filters.date_to = Some(date(2024, 3, 14));
        assert!(!passes_filters(&rec, &filters));
    }

    #[test]
    fn test_date_filter_requires_timestamp() {
        let mut rec = record_with("/a.jpg", 0);
        rec.modified_at = None;
        let mut filters = SearchFilters::default();
        filters.date_from = Some(date(2024, 1, 1));
        assert!(!passes_filters(&rec, &filters));
    }

    #[test]
    fn test_tag_conjunction_case_insensitive() {
        let mut rec = record_with("/a.jpg", 0);
        rec.meta = serde_json::json!({"tags": ["Vacation", "Beach"]});
        let mut filters = SearchFilters::default();
        filters.tags = Some(vec!["vacation".into(), "BEACH".into()]);
        assert!(passes_filters(&rec, &filters));
        filters.tags = Some(vec!["vacation".into(), "city".into()]);
        assert!(!passes_filters(&rec, &filters));
    }

    #[test]
    fn test_favorite_tag_maps_to_column() {
        let mut rec = record_with("/a.jpg", 0);
        rec.favorite = true;
        // Only the reserved tag requested: the tag-array check is skipped
        // even though the blob has no tags at all.
        let mut filters = SearchFilters::default();
        filters.tags = Some(vec![FAVORITE_TAG.into()]);
        assert!(passes_filters(&rec, &filters));

        rec.favorite = false;
        assert!(!passes_filters(&rec, &filters));

        // Mixed: favorite column and the plain tag must both hold.
        rec.favorite = true;
        rec.meta = serde_json::json!({"tags": ["vacation"]});
        filters.tags = Some(vec![FAVORITE_TAG.into(), "vacation".into()]);
        assert!(passes_filters(&rec, &filters));
        filters.tags = Some(vec![FAVORITE_TAG.into(), "city".into()]);
        assert!(!passes_filters(&rec, &filters));
    }

    #[test]
    fn test_fallback_search_when_not_ready() {
        let store = Arc::new(Store::open_in_memory().unwrap());
        let mut rec = ImageRecord::new("/photos/sunset-beach.jpg".into());
        rec.status = crate::types::RecordStatus::Indexed;
        store.save(&mut rec).unwrap();

        let engine = QueryEngine::new(
            Arc::clone(&store),
            Arc::new(VectorIndex::new()),
            Arc::new(Embedder::new()),
        );
        let outcome = engine.search_text("SUNSET", None, 10, 0).unwrap();
        assert_eq!(outcome.results.len(), 1);
        assert!(outcome.results[0].score.is_none());
        assert_eq!(outcome.results[0].record.path, "/photos/sunset-beach.jpg");
    }

    #[test]
    fn test_empty_query_browses_store() {
        let store = Arc::new(Store::open_in_memory().unwrap());
        for (path, ts) in [("/a.jpg", 100), ("/b.jpg", 300), ("/c.jpg", 200)] {
            let mut rec = ImageRecord::new(path.into());
            rec.status = crate::types::RecordStatus::Indexed;
            rec.modified_at = Some(ts);
            store.save(&mut rec).unwrap();
        }
        let engine = QueryEngine::new(
            Arc::clone(&store),
            Arc::new(VectorIndex::new()),
            Arc::new(Embedder::new()),
        );
        let outcome = engine.search_text("", None, 50, 0).unwrap();
        assert_eq!(outcome.total_count, 3);
        let paths: Vec<&str> = outcome.results.iter().map(|r| r.record.path.as_str()).collect();
        assert_eq!(paths, vec!["/b.jpg", "/c.jpg", "/a.jpg"]);
    }

    #[test]
    fn test_date_phrase_becomes_filter_in_fallback() {
        let store = Arc::new(Store::open_in_memory().unwrap());
        let mut old = ImageRecord::new("/old-beach.jpg".into());
        old.status = crate::types::RecordStatus::Indexed;
        old.modified_at = Some(
            date(2020, 6, 1).and_hms_opt(12, 0, 0).unwrap().and_utc().timestamp(),
        );
        store.save(&mut old).unwrap();
        let mut recent = ImageRecord::new("/new-beach.jpg".into());
        recent.status = crate::types::RecordStatus::Indexed;
        recent.modified_at = Some(
            date(2024, 6, 1).and_hms_opt(12, 0, 0).unwrap().and_utc().timestamp(),
        );
        store.save(&mut recent).unwrap();

        let engine = QueryEngine::new(
            Arc::clone(&store),
            Arc::new(VectorIndex::new()),
            Arc::new(Embedder::new()),
        );
        let outcome = engine.search_text("beach from 2024", None, 10, 0).unwrap();
        assert_eq!(outcome.clean_query, "beach");
        assert_eq!(outcome.results.len(), 1);
        assert_eq!(outcome.results[0].record.path, "/new-beach.jpg");
    }

    #[test]
    fn test_image_search_rejected_when_not_ready() {
        let engine = QueryEngine::new(
            Arc::new(Store::open_in_memory().unwrap()),
            Arc::new(VectorIndex::new()),
            Arc::new(Embedder::new()),
        );
        assert!(matches!(engine.search_image(&[1, 2, 3], None, 5), Err(Error::NotReady)));
    }

    #[test]
    fn test_favorite_tag_browse_uses_column() {
        let store = Arc::new(Store::open_in_memory().unwrap());
        let mut fav = ImageRecord::new("/fav.jpg".into());
        fav.favorite = true;
        store.save(&mut fav).unwrap();
        let mut plain = ImageRecord::new("/plain.jpg".into());
        plain.meta = serde_json::json!({"tags": ["vacation"]});
        store.save(&mut plain).unwrap();

        let engine = QueryEngine::new(
            Arc::clone(&store),
            Arc::new(VectorIndex::new()),
            Arc::new(Embedder::new()),
        );
        let favs = engine.search_tags(FAVORITE_TAG, 10).unwrap();
        assert_eq!(favs.len(), 1);
        assert_eq!(favs[0].path, "/fav.jpg");

        let tagged = engine.search_tags("vacation", 10).unwrap();
        assert_eq!(tagged.len(), 1);
        assert_eq!(tagged[0].path, "/plain.jpg");
    }
}
