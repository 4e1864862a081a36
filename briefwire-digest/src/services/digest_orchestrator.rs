//! Digest orchestrator
//!
//! Drives the full per-user pipeline: scrape → match → persist → content
//! → entities → CVEs → cluster → briefs → reports. Stage order within a
//! user is strict; inside a stage, fan-out is bounded and per-item
//! failures are logged and skipped. No stage failure crosses a user
//! boundary: everything lands in the run summary's error list instead of
//! propagating.

use anyhow::Result;
use briefwire_common::db::models::{
    Article, ArticleCve, Period, User, UserArticle,
};
use chrono::Utc;
use futures::stream::{self, StreamExt};
use sqlx::SqlitePool;
use std::collections::{HashMap, HashSet};
use std::fmt;
use std::future::Future;
use std::pin::Pin;
use std::sync::Arc;
use uuid::Uuid;

use crate::db::{articles, cves, entities, keywords, news_groups, sources, user_articles};
use crate::services::briefing_generator;
use crate::services::clusterer::{self, ClusterInput};
use crate::services::content_extractor::ContentExtractor;
use crate::services::cve_extractor::extract_cve_ids;
use crate::services::entity_extractor::{self, ExtractionInput, ENTITY_BATCH_SIZE};
use crate::services::exposure_engine;
use crate::services::feed_scraper::{FeedScraper, SourceScrape};
use crate::services::kev_catalog::KevCatalog;
use crate::services::keyword_matcher::KeywordMatcher;
use crate::services::llm_client::CompletionService;
use crate::services::nvd_client::NvdClient;
use crate::services::report_builder;

/// Content extraction fan-out width
const CONTENT_CONCURRENCY: usize = 15;
/// Briefing fan-out width
const BRIEFING_CONCURRENCY: usize = 10;

/// Pipeline stages, used to categorize run errors
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum PipelineStage {
    Scrape,
    Persist,
    Content,
    Entities,
    Cves,
    Cluster,
    Brief,
    Reports,
    Fatal,
}

impl fmt::Display for PipelineStage {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let name = match self {
            PipelineStage::Scrape => "scrape",
            PipelineStage::Persist => "persist",
            PipelineStage::Content => "content",
            PipelineStage::Entities => "entities",
            PipelineStage::Cves => "cves",
            PipelineStage::Cluster => "cluster",
            PipelineStage::Brief => "brief",
            PipelineStage::Reports => "reports",
            PipelineStage::Fatal => "fatal",
        };
        write!(f, "{}", name)
    }
}

/// One categorized stage failure
#[derive(Debug, Clone)]
pub struct StageError {
    pub stage: PipelineStage,
    pub detail: String,
}

impl fmt::Display for StageError {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}: {}", self.stage, self.detail)
    }
}

/// Outcome of one digest run
#[derive(Debug, Clone, serde::Serialize)]
pub struct RunSummary {
    pub user_id: Uuid,
    pub scraped: usize,
    pub matched: usize,
    pub summarized: usize,
    pub errors: Vec<String>,
}

/// Digest pipeline orchestrator, shared across the scheduler and the API
pub struct DigestOrchestrator {
    db: SqlitePool,
    scraper: Arc<FeedScraper>,
    content_extractor: ContentExtractor,
    llm: Option<Arc<dyn CompletionService>>,
    nvd: NvdClient,
    kev: Arc<KevCatalog>,
}

impl DigestOrchestrator {
    pub fn new(
        db: SqlitePool,
        scraper: Arc<FeedScraper>,
        llm: Option<Arc<dyn CompletionService>>,
        nvd_api_key: Option<String>,
    ) -> Result<Self> {
        Ok(Self {
            db,
            scraper,
            content_extractor: ContentExtractor::new()?,
            llm,
            nvd: NvdClient::new(nvd_api_key)?,
            kev: Arc::new(KevCatalog::new()?),
        })
    }

    /// Resolve the user and run the pipeline. The only failure classified
    /// as fatal is not being able to load the user at all.
    pub fn run_digest_for_user(
        &self,
        user_id: Uuid,
    ) -> Pin<Box<dyn Future<Output = RunSummary> + Send + '_>> {
        Box::pin(async move {
            match crate::db::users::load_user(&self.db, user_id).await {
                Ok(Some(user)) => self.run_digest(&user).await,
                Ok(None) => RunSummary {
                    user_id,
                    scraped: 0,
                    matched: 0,
                    summarized: 0,
                    errors: vec![StageError {
                        stage: PipelineStage::Fatal,
                        detail: format!("unknown user {user_id}"),
                    }
                    .to_string()],
                },
                Err(e) => RunSummary {
                    user_id,
                    scraped: 0,
                    matched: 0,
                    summarized: 0,
                    errors: vec![StageError {
                        stage: PipelineStage::Fatal,
                        detail: e.to_string(),
                    }
                    .to_string()],
                },
            }
        })
    }

    /// Run the whole pipeline for one user
    pub async fn run_digest(&self, user: &User) -> RunSummary {
        let run_start = std::time::Instant::now();
        let mut errors: Vec<StageError> = Vec::new();

        tracing::info!(user_id = %user.id, "Starting digest run");

        // Industry signal catalog; empty catalog skips entity extraction
        let signal_catalog = match &user.industry_id {
            Some(industry_id) => entities::load_signals_for_industry(&self.db, industry_id)
                .await
                .unwrap_or_else(|e| {
                    tracing::warn!(user_id = %user.id, error = %e, "Signal catalog load failed");
                    Vec::new()
                }),
            None => Vec::new(),
        };

        // Stage 1+2: scrape and match
        let (scraped, matched_articles) = match self.scrape_and_match(user).await {
            Ok((scraped, matched, source_errors)) => {
                for detail in source_errors {
                    errors.push(StageError {
                        stage: PipelineStage::Scrape,
                        detail,
                    });
                }
                (scraped, matched)
            }
            Err(e) => {
                errors.push(StageError {
                    stage: PipelineStage::Scrape,
                    detail: e.to_string(),
                });
                (0, Vec::new())
            }
        };
        let matched = matched_articles.len();

        // Stage 3: persist matched articles and user links
        let batch_ids = match self.persist_matched(user.id, &matched_articles).await {
            Ok(ids) => ids,
            Err(e) => {
                errors.push(StageError {
                    stage: PipelineStage::Persist,
                    detail: e.to_string(),
                });
                Vec::new()
            }
        };

        // Stage 4: content extraction (bounded fan-out)
        if let Err(e) = self.content_stage(&batch_ids).await {
            errors.push(StageError {
                stage: PipelineStage::Content,
                detail: e.to_string(),
            });
        }

        // Stage 5: entity extraction (serial LLM batches)
        if !signal_catalog.is_empty() {
            if let Some(llm) = self.llm.clone() {
                if let Err(e) = self
                    .entity_stage(llm.as_ref(), &batch_ids, &signal_catalog)
                    .await
                {
                    errors.push(StageError {
                        stage: PipelineStage::Entities,
                        detail: e.to_string(),
                    });
                }
            }
        }

        // Stage 6: CVE extraction and enrichment
        if let Err(e) = self.cve_stage(user.id, &batch_ids).await {
            errors.push(StageError {
                stage: PipelineStage::Cves,
                detail: e.to_string(),
            });
        }

        // Stage 7: clustering
        let new_group_ids = match self.cluster_stage(user.id).await {
            Ok(ids) => ids,
            Err(e) => {
                errors.push(StageError {
                    stage: PipelineStage::Cluster,
                    detail: e.to_string(),
                });
                Vec::new()
            }
        };

        // Stage 8: briefings (bounded fan-out)
        let summarized = match &self.llm {
            Some(llm) => self.brief_stage(llm.clone(), &new_group_ids, &mut errors).await,
            None => 0,
        };

        // Stage 9: period reports, failures isolated per period
        let db = self.db.clone();
        let report_results = futures::future::join_all(Period::ALL.iter().map(|period| {
            let llm = self.llm.clone();
            let db = db.clone();
            async move {
                let result = report_builder::build_report(
                    &db,
                    llm.as_deref(),
                    user.id,
                    *period,
                    Utc::now(),
                )
                .await;
                (*period, result)
            }
        }))
        .await;

        for (period, result) in report_results {
            if let Err(e) = result {
                errors.push(StageError {
                    stage: PipelineStage::Reports,
                    detail: format!("{}: {}", period.as_str(), e),
                });
            }
        }

        for error in &errors {
            tracing::warn!(user_id = %user.id, stage = %error.stage, detail = %error.detail, "Digest stage error");
        }

        tracing::info!(
            user_id = %user.id,
            scraped,
            matched,
            summarized,
            errors = errors.len(),
            elapsed_ms = run_start.elapsed().as_millis() as u64,
            "Digest run complete"
        );

        RunSummary {
            user_id: user.id,
            scraped,
            matched,
            summarized,
            errors: errors.iter().map(|e| e.to_string()).collect(),
        }
    }

    /// Scrape all active sources and keyword-match the results. Returns
    /// the total scraped count, the matched user-new articles annotated
    /// with their matched keywords, and any per-source fetch errors.
    async fn scrape_and_match(
        &self,
        user: &User,
    ) -> Result<(usize, Vec<(Article, Vec<String>)>, Vec<String>)> {
        let user_sources = sources::load_active_sources(&self.db, user.id).await?;
        if user_sources.is_empty() {
            return Ok((0, Vec::new(), Vec::new()));
        }

        let scrapes: Vec<SourceScrape> = self.scraper.scrape_all(&user_sources).await;
        let scraped: usize = scrapes.iter().map(|s| s.articles.len()).sum();
        let source_errors: Vec<String> = scrapes
            .iter()
            .filter_map(|s| s.error.clone())
            .collect();

        let keyword_rows = keywords::load_keywords(&self.db, user.id).await?;
        let words: Vec<String> = keyword_rows.into_iter().map(|k| k.word).collect();
        let matcher = KeywordMatcher::new(&words);

        let known_urls = user_articles::existing_urls(&self.db, user.id).await?;
        let mut seen_urls = HashSet::new();
        let mut matched = Vec::new();

        for scrape in scrapes {
            for item in scrape.articles {
                if known_urls.contains(&item.url) || !seen_urls.insert(item.url.clone()) {
                    continue;
                }

                let result = matcher.match_text(&item.title, &item.snippet);
                if !result.matched {
                    continue;
                }

                matched.push((
                    Article {
                        id: Uuid::new_v4(),
                        source_id: scrape.source_id,
                        url: item.url,
                        title: item.title,
                        content: item.snippet,
                        clean_text: None,
                        raw_html: None,
                        external_links: Vec::new(),
                        author: item.author,
                        guid: item.guid,
                        published_at: item.published_at,
                        entities_extracted: false,
                        cves_extracted: false,
                    },
                    result.matched_keywords,
                ));
            }
        }

        Ok((scraped, matched, source_errors))
    }

    /// Find-or-create articles and upsert the user links; returns the
    /// article ids in this run's batch
    async fn persist_matched(
        &self,
        user_id: Uuid,
        matched: &[(Article, Vec<String>)],
    ) -> Result<Vec<Uuid>> {
        let mut batch_ids = Vec::with_capacity(matched.len());

        for (article, matched_keywords) in matched {
            let stored = match articles::find_or_create(&self.db, article).await {
                Ok(stored) => stored,
                Err(e) => {
                    tracing::warn!(url = %article.url, error = %e, "Article persist failed");
                    continue;
                }
            };

            user_articles::upsert_user_article(
                &self.db,
                &UserArticle {
                    user_id,
                    article_id: stored.id,
                    matched: true,
                    matched_keywords: matched_keywords.clone(),
                    news_group_id: None,
                    read: false,
                    sent: false,
                    sent_at: None,
                },
            )
            .await?;

            batch_ids.push(stored.id);
        }

        Ok(batch_ids)
    }

    /// Fetch and extract content for batch articles still lacking clean
    /// text
    async fn content_stage(&self, batch_ids: &[Uuid]) -> Result<()> {
        let pending = articles::load_missing_clean_text(&self.db, batch_ids).await?;
        if pending.is_empty() {
            return Ok(());
        }

        tracing::debug!(articles = pending.len(), "Content extraction stage");

        let content_extractor = self.content_extractor.clone();
        let db = self.db.clone();

        stream::iter(pending)
            .map(move |article| {
                let content_extractor = content_extractor.clone();
                let db = db.clone();
                async move {
                    match content_extractor.extract(&article.url).await {
                        Ok(content) => {
                            if let Err(e) = articles::update_content(
                                &db,
                                article.id,
                                &content.clean_text,
                                &content.raw_html,
                                &content.external_links,
                            )
                            .await
                            {
                                tracing::warn!(url = %article.url, error = %e, "Content persist failed");
                            }
                        }
                        Err(e) => {
                            // The RSS snippet remains the article's text
                            tracing::debug!(url = %article.url, error = %e, "Content extraction failed");
                        }
                    }
                }
            })
            .buffer_unordered(CONTENT_CONCURRENCY)
            .collect::<Vec<_>>()
            .await;

        Ok(())
    }

    /// Entity extraction in serial batches of five articles per call
    async fn entity_stage(
        &self,
        llm: &dyn CompletionService,
        batch_ids: &[Uuid],
        signal_catalog: &[briefwire_common::db::models::IndustrySignal],
    ) -> Result<()> {
        let pending = articles::load_needing_entities(&self.db, batch_ids).await?;
        if pending.is_empty() {
            return Ok(());
        }

        let allowed_slugs: Vec<String> =
            signal_catalog.iter().map(|s| s.slug.clone()).collect();
        let signal_ids_by_slug: HashMap<String, Uuid> = signal_catalog
            .iter()
            .map(|s| (s.slug.clone(), s.id))
            .collect();

        tracing::debug!(articles = pending.len(), "Entity extraction stage");

        for batch in pending.chunks(ENTITY_BATCH_SIZE) {
            let inputs: Vec<ExtractionInput> = batch
                .iter()
                .map(|article| ExtractionInput {
                    article_id: article.id,
                    title: article.title.clone(),
                    text: article
                        .clean_text
                        .clone()
                        .unwrap_or_else(|| article.content.clone()),
                })
                .collect();

            let extracted = match entity_extractor::extract_batch(llm, &inputs, &allowed_slugs).await
            {
                Ok(extracted) => extracted,
                Err(e) => {
                    // This batch stays unextracted and retries next run
                    tracing::warn!(error = %e, "Entity extraction batch failed");
                    continue;
                }
            };

            for article in batch {
                let Some(result) = extracted.get(&article.id) else {
                    continue;
                };
                if let Err(e) = entity_extractor::persist_extraction(
                    &self.db,
                    article.id,
                    result,
                    &signal_ids_by_slug,
                )
                .await
                {
                    tracing::warn!(article_id = %article.id, error = %e, "Entity persist failed");
                }
            }
        }

        Ok(())
    }

    /// CVE extraction, enrichment, and exposure classification
    async fn cve_stage(&self, user_id: Uuid, batch_ids: &[Uuid]) -> Result<()> {
        let pending = articles::load_needing_cves(&self.db, batch_ids).await?;
        if pending.is_empty() {
            return Ok(());
        }

        // Union of CVE ids across the batch
        let per_article: Vec<(Uuid, Vec<String>)> = pending
            .iter()
            .map(|article| {
                let text = format!(
                    "{} {} {}",
                    article.title,
                    article.content,
                    article.clean_text.as_deref().unwrap_or("")
                );
                (article.id, extract_cve_ids(&text))
            })
            .collect();

        let union: Vec<String> = {
            let mut seen = HashSet::new();
            per_article
                .iter()
                .flat_map(|(_, ids)| ids.iter().cloned())
                .filter(|id| seen.insert(id.clone()))
                .collect()
        };

        if union.is_empty() {
            // Nothing mentioned; the stage is complete for these articles
            for (article_id, _) in &per_article {
                articles::set_cves_extracted(&self.db, *article_id).await?;
            }
            return Ok(());
        }

        tracing::debug!(articles = pending.len(), cve_ids = union.len(), "CVE enrichment stage");

        // Partition into already-enriched and new ids
        let mut enriched = cves::load_enriched_by_cve_ids(&self.db, &union).await?;
        let kev = self.kev.lookup_map().await;
        let mut failed_ids: HashSet<String> = HashSet::new();

        for cve_id in &union {
            if enriched.contains_key(cve_id) {
                continue;
            }

            match self.nvd.fetch_cve(cve_id).await {
                Ok(record) => {
                    let (cvss_score, severity, description, cpe_matches, published_date) =
                        match record {
                            Some(r) => (
                                r.cvss_score,
                                r.severity,
                                r.description,
                                r.cpe_matches,
                                r.published_date,
                            ),
                            None => (None, None, None, Vec::new(), None),
                        };

                    let kev_entry = kev.get(cve_id);
                    enriched.insert(
                        cve_id.clone(),
                        ArticleCve {
                            id: Uuid::new_v4(),
                            article_id: Uuid::nil(), // replaced per article below
                            cve_id: cve_id.clone(),
                            cvss_score,
                            severity,
                            description,
                            cpe_matches,
                            published_date,
                            in_kev: kev_entry.is_some(),
                            kev_date_added: kev_entry.and_then(|k| k.date_added.clone()),
                            kev_due_date: kev_entry.and_then(|k| k.due_date.clone()),
                            kev_ransomware_use: kev_entry.and_then(|k| k.ransomware_use),
                        },
                    );
                }
                Err(e) => {
                    // Unenriched this run; the flag stays down so the
                    // next run retries
                    tracing::warn!(cve_id = %cve_id, error = %e, "NVD enrichment failed");
                    failed_ids.insert(cve_id.clone());
                }
            }
        }

        for (article_id, article_cve_ids) in &per_article {
            let mut complete = true;

            for cve_id in article_cve_ids {
                if failed_ids.contains(cve_id) {
                    complete = false;
                    continue;
                }
                let Some(template) = enriched.get(cve_id) else {
                    complete = false;
                    continue;
                };

                let row = ArticleCve {
                    id: Uuid::new_v4(),
                    article_id: *article_id,
                    ..template.clone()
                };
                if let Err(e) = cves::upsert_article_cve(&self.db, &row).await {
                    tracing::warn!(article_id = %article_id, cve_id = %cve_id, error = %e, "CVE persist failed");
                    complete = false;
                }
            }

            if complete {
                articles::set_cves_extracted(&self.db, *article_id).await?;
            }
        }

        // Exposure classification over everything this batch touched
        let batch_cves = cves::load_for_articles(&self.db, batch_ids).await?;
        exposure_engine::classify_user_cves(&self.db, user_id, &batch_cves, Utc::now()).await?;

        Ok(())
    }

    /// Cluster ungrouped matched articles into stories
    async fn cluster_stage(&self, user_id: Uuid) -> Result<Vec<Uuid>> {
        let ungrouped = user_articles::load_ungrouped_matched(&self.db, user_id).await?;
        if ungrouped.is_empty() {
            return Ok(Vec::new());
        }

        let article_ids: Vec<Uuid> = ungrouped.iter().map(|ua| ua.article_id).collect();
        let article_rows = articles::load_by_ids(&self.db, &article_ids).await?;
        let entity_rows = entities::load_entities_for_articles(&self.db, &article_ids).await?;
        let signal_rows = entities::load_signal_slugs_for_articles(&self.db, &article_ids).await?;

        let mut entities_by_article: HashMap<Uuid, Vec<String>> = HashMap::new();
        for entity in entity_rows {
            entities_by_article
                .entry(entity.article_id)
                .or_default()
                .push(entity.name);
        }
        let mut signals_by_article: HashMap<Uuid, Vec<String>> = HashMap::new();
        for (article_id, slug, _) in signal_rows {
            signals_by_article.entry(article_id).or_default().push(slug);
        }
        let keywords_by_article: HashMap<Uuid, Vec<String>> = ungrouped
            .iter()
            .map(|ua| (ua.article_id, ua.matched_keywords.clone()))
            .collect();

        let inputs: Vec<ClusterInput> = article_rows
            .iter()
            .map(|article| ClusterInput {
                article_id: article.id,
                title: article.title.clone(),
                entities: entities_by_article.remove(&article.id).unwrap_or_default(),
                signals: signals_by_article.remove(&article.id).unwrap_or_default(),
                keywords: keywords_by_article
                    .get(&article.id)
                    .cloned()
                    .unwrap_or_default(),
                published_at: article.published_at,
            })
            .collect();

        let groups = clusterer::cluster_articles(&inputs);
        tracing::info!(user_id = %user_id, articles = inputs.len(), groups = groups.len(), "Clustering complete");

        let mut group_ids = Vec::with_capacity(groups.len());
        for group in groups {
            let record = briefwire_common::db::models::NewsGroup {
                id: Uuid::new_v4(),
                user_id,
                title: group.title,
                synopsis: None,
                executive_summary: None,
                impact_analysis: None,
                actionability: None,
                case_type: None,
                confidence: group.confidence,
                date: Utc::now(),
            };

            news_groups::insert_group(&self.db, &record).await?;
            user_articles::assign_group(&self.db, user_id, &group.article_ids, record.id).await?;
            group_ids.push(record.id);
        }

        Ok(group_ids)
    }

    /// Generate briefings for the new stories with bounded parallelism;
    /// returns the number of stories successfully summarized
    async fn brief_stage(
        &self,
        llm: Arc<dyn CompletionService>,
        group_ids: &[Uuid],
        errors: &mut Vec<StageError>,
    ) -> usize {
        let db = self.db.clone();
        let results: Vec<Result<(), StageError>> = stream::iter(group_ids.iter().copied())
            .map(|group_id| {
                let llm = llm.clone();
                let db = db.clone();
                async move {
                    Self::brief_one_group(&db, llm.as_ref(), group_id)
                        .await
                        .map_err(|e| StageError {
                            stage: PipelineStage::Brief,
                            detail: format!("{}: {}", group_id, e),
                        })
                }
            })
            .buffer_unordered(BRIEFING_CONCURRENCY)
            .collect()
            .await;

        let mut summarized = 0;
        for result in results {
            match result {
                Ok(()) => summarized += 1,
                Err(e) => errors.push(e),
            }
        }

        summarized
    }

    async fn brief_one_group(
        db: &SqlitePool,
        llm: &dyn CompletionService,
        group_id: Uuid,
    ) -> Result<()> {
        let article_ids = user_articles::article_ids_for_group(db, group_id).await?;
        let group_articles = articles::load_by_ids(db, &article_ids).await?;

        let texts: Vec<String> = group_articles
            .iter()
            .map(|a| {
                format!(
                    "{}\n{}",
                    a.title,
                    a.clean_text.clone().unwrap_or_else(|| a.content.clone())
                )
            })
            .collect();

        let briefing = briefing_generator::generate_briefing(llm, &texts).await?;

        news_groups::update_briefing(
            db,
            group_id,
            &briefing.title,
            &briefing.synopsis,
            &briefing.executive_summary,
            &briefing.impact_analysis,
            &briefing.actionability,
            briefing.case_type,
        )
        .await?;

        Ok(())
    }
}
