//! Period report builder
//!
//! Rolls a window of stories up into one report per period (1d / 7d /
//! 30d): a pure stats computation over the window's stories, entities,
//! signals, and CVEs, followed by a period-specific summary prompt. The
//! report row is upserted on `(user, period)`; the summary is optional
//! and its absence never blocks the stats.

use anyhow::Result;
use briefwire_common::db::models::{
    ArticleCve, ArticleEntity, CaseType, EntityType, NewsGroup, Period, PeriodReport,
};
use chrono::{DateTime, Duration, Utc};
use serde::Serialize;
use sqlx::SqlitePool;
use std::collections::HashMap;
use uuid::Uuid;

use crate::db::{articles, cves, entities, news_groups, reports, user_articles};
use crate::services::exposure_engine;
use crate::services::llm_client::{CompletionRequest, CompletionService};

/// Story context fed to the summary prompt is capped here
const MAX_GROUP_CONTEXT_CHARS: usize = 30_000;
const TRUNCATION_MARKER: &str = "[... truncated for length]";
/// Per-bucket cap on ranked stat lists
const TOP_N: usize = 10;

/// One story with its articles' best-available text
#[derive(Debug, Clone)]
pub struct GroupBundle {
    pub group: NewsGroup,
    pub article_titles: Vec<String>,
    pub article_texts: Vec<String>,
}

#[derive(Debug, Clone, Serialize)]
pub struct NameCount {
    pub name: String,
    pub count: usize,
}

#[derive(Debug, Clone, Serialize)]
pub struct DayCount {
    pub date: String,
    pub count: usize,
}

#[derive(Debug, Clone, Serialize)]
pub struct StoryTotals {
    pub total: usize,
    pub actively_exploited: usize,
    pub vulnerable: usize,
    pub fixed: usize,
    pub informational: usize,
    pub unclassified: usize,
}

#[derive(Debug, Clone, Serialize)]
pub struct CveScore {
    pub cve_id: String,
    pub cvss: Option<f64>,
    pub severity: Option<String>,
}

#[derive(Debug, Clone, Serialize)]
pub struct KevDue {
    pub cve_id: String,
    pub due_date: Option<String>,
}

#[derive(Debug, Clone, Serialize)]
pub struct CveStats {
    pub unique: usize,
    pub critical: usize,
    pub high: usize,
    pub medium: usize,
    pub low: usize,
    pub kev_count: usize,
    pub avg_cvss: f64,
    pub max_cvss: f64,
    pub top_by_cvss: Vec<CveScore>,
    pub kev_cves: Vec<KevDue>,
}

/// The structured stats blob stored on the report
#[derive(Debug, Clone, Serialize)]
pub struct ReportStats {
    pub story_totals: StoryTotals,
    pub signal_distribution: Vec<NameCount>,
    pub top_entities: Vec<NameCount>,
    pub top_affected_products: Vec<NameCount>,
    pub top_affected_sectors: Vec<NameCount>,
    pub top_threat_actors: Vec<NameCount>,
    pub stories_per_day: Vec<DayCount>,
    pub cve: CveStats,
}

fn ranked_counts(counts: HashMap<String, usize>) -> Vec<NameCount> {
    let mut ranked: Vec<NameCount> = counts
        .into_iter()
        .map(|(name, count)| NameCount { name, count })
        .collect();
    ranked.sort_by(|a, b| b.count.cmp(&a.count).then(a.name.cmp(&b.name)));
    ranked
}

/// Pure stats computation over one report window
pub fn compute_stats(
    bundles: &[GroupBundle],
    entity_rows: &[ArticleEntity],
    signal_rows: &[(Uuid, String, f64)],
    cve_rows: &[ArticleCve],
    from: DateTime<Utc>,
    to: DateTime<Utc>,
) -> ReportStats {
    let count_case = |case: CaseType| {
        bundles
            .iter()
            .filter(|b| b.group.case_type == Some(case))
            .count()
    };

    let story_totals = StoryTotals {
        total: bundles.len(),
        actively_exploited: count_case(CaseType::ActivelyExploited),
        vulnerable: count_case(CaseType::VulnerableNoExploit),
        fixed: count_case(CaseType::Fixed),
        informational: count_case(CaseType::Informational),
        unclassified: bundles.iter().filter(|b| b.group.case_type.is_none()).count(),
    };

    let mut signal_counts: HashMap<String, usize> = HashMap::new();
    for (_, slug, _) in signal_rows {
        *signal_counts.entry(slug.clone()).or_insert(0) += 1;
    }
    let signal_distribution = ranked_counts(signal_counts);

    let bucket = |filter: &dyn Fn(&ArticleEntity) -> bool| {
        let mut counts: HashMap<String, usize> = HashMap::new();
        for entity in entity_rows.iter().filter(|e| filter(e)) {
            *counts.entry(entity.name.clone()).or_insert(0) += 1;
        }
        ranked_counts(counts).into_iter().take(TOP_N).collect::<Vec<_>>()
    };

    let top_entities = bucket(&|_| true);
    let top_affected_products = bucket(&|e| e.entity_type == EntityType::Product);
    let top_affected_sectors = bucket(&|e| e.entity_type == EntityType::Sector);
    let top_threat_actors =
        bucket(&|e| matches!(e.entity_type, EntityType::Person | EntityType::Company));

    // Per-day story histogram, inclusive of empty days
    let mut stories_per_day = Vec::new();
    let mut day = from.date_naive();
    let last = to.date_naive();
    while day <= last {
        let count = bundles
            .iter()
            .filter(|b| b.group.date.date_naive() == day)
            .count();
        stories_per_day.push(DayCount {
            date: day.format("%Y-%m-%d").to_string(),
            count,
        });
        day += Duration::days(1);
    }

    // CVE metrics over distinct ids
    let mut unique: HashMap<String, &ArticleCve> = HashMap::new();
    for cve in cve_rows {
        unique.entry(cve.cve_id.clone()).or_insert(cve);
    }

    let scores: Vec<f64> = unique.values().filter_map(|c| c.cvss_score).collect();
    let bucket_count = |lo: f64, hi: f64| scores.iter().filter(|s| **s >= lo && **s < hi).count();

    let mut top_by_cvss: Vec<CveScore> = unique
        .values()
        .map(|c| CveScore {
            cve_id: c.cve_id.clone(),
            cvss: c.cvss_score,
            severity: c.severity.clone(),
        })
        .collect();
    top_by_cvss.sort_by(|a, b| {
        b.cvss
            .unwrap_or(0.0)
            .partial_cmp(&a.cvss.unwrap_or(0.0))
            .unwrap_or(std::cmp::Ordering::Equal)
            .then(a.cve_id.cmp(&b.cve_id))
    });
    top_by_cvss.truncate(TOP_N);

    let mut kev_cves: Vec<KevDue> = unique
        .values()
        .filter(|c| c.in_kev)
        .map(|c| KevDue {
            cve_id: c.cve_id.clone(),
            due_date: c.kev_due_date.clone(),
        })
        .collect();
    kev_cves.sort_by(|a, b| a.cve_id.cmp(&b.cve_id));

    let cve = CveStats {
        unique: unique.len(),
        critical: scores.iter().filter(|s| **s >= 9.0).count(),
        high: bucket_count(7.0, 9.0),
        medium: bucket_count(4.0, 7.0),
        low: scores.iter().filter(|s| **s < 4.0).count(),
        kev_count: kev_cves.len(),
        avg_cvss: if scores.is_empty() {
            0.0
        } else {
            ((scores.iter().sum::<f64>() / scores.len() as f64) * 10.0).round() / 10.0
        },
        max_cvss: scores.iter().cloned().fold(0.0, f64::max),
        top_by_cvss,
        kev_cves,
    };

    ReportStats {
        story_totals,
        signal_distribution,
        top_entities,
        top_affected_products,
        top_affected_sectors,
        top_threat_actors,
        stories_per_day,
        cve,
    }
}

/// Period-specific summary prompt and token budget
fn period_prompt(period: Period) -> (&'static str, u32) {
    match period {
        Period::Daily => (
            "You are writing the daily operational briefing for a SOC team. Summarize the last \
             24 hours of security stories: what is actively exploited, what needs patching today, \
             and what to watch. Be direct and operational; use short sections with headers.",
            2_500,
        ),
        Period::Weekly => (
            "You are writing the weekly tactical report for security leadership. Cover the week's \
             significant stories, trends across signals and affected products (tables are \
             welcome), remediation posture, and recommended priorities for next week.",
            3_500,
        ),
        Period::Monthly => (
            "You are writing the monthly strategic security posture report for the board. Focus \
             on the month's threat landscape, exposure and remediation trends, notable incidents \
             in the user's sectors, and strategic recommendations. Avoid operational minutiae.",
            4_000,
        ),
    }
}

/// Story context for the summary prompt: most severe first, hard-capped
/// with an explicit truncation marker
pub fn build_group_context(bundles: &[GroupBundle]) -> String {
    let mut ordered: Vec<&GroupBundle> = bundles.iter().collect();
    ordered.sort_by_key(|b| b.group.case_type.map(|c| c.as_i64()).unwrap_or(5));

    let mut context = String::new();
    for bundle in ordered {
        let block = format!(
            "## {} (case {})\n{}\nArticles: {}\n\n",
            bundle.group.title,
            bundle
                .group
                .case_type
                .map(|c| c.as_i64().to_string())
                .unwrap_or_else(|| "unclassified".to_string()),
            bundle
                .group
                .synopsis
                .clone()
                .unwrap_or_else(|| bundle.article_texts.first().cloned().unwrap_or_default()),
            bundle.article_titles.join("; "),
        );

        if context.len() + block.len() > MAX_GROUP_CONTEXT_CHARS {
            context.push_str(TRUNCATION_MARKER);
            break;
        }
        context.push_str(&block);
    }

    context
}

/// Build and persist one period report
pub async fn build_report(
    pool: &SqlitePool,
    llm: Option<&dyn CompletionService>,
    user_id: Uuid,
    period: Period,
    now: DateTime<Utc>,
) -> Result<PeriodReport> {
    let from = now - Duration::days(period.days());

    let groups = news_groups::load_groups_with_articles_since(pool, user_id, from).await?;

    let mut bundles = Vec::with_capacity(groups.len());
    let mut window_article_ids = Vec::new();

    for group in groups {
        let article_ids = user_articles::article_ids_for_group(pool, group.id).await?;
        let group_articles = articles::load_by_ids(pool, &article_ids).await?;

        window_article_ids.extend(article_ids);
        bundles.push(GroupBundle {
            article_titles: group_articles.iter().map(|a| a.title.clone()).collect(),
            article_texts: group_articles
                .iter()
                .map(|a| a.clean_text.clone().unwrap_or_else(|| a.content.clone()))
                .collect(),
            group,
        });
    }

    let entity_rows = entities::load_entities_for_articles(pool, &window_article_ids).await?;
    let signal_rows = entities::load_signal_slugs_for_articles(pool, &window_article_ids).await?;
    let cve_rows = cves::load_for_articles(pool, &window_article_ids).await?;

    let stats = compute_stats(&bundles, &entity_rows, &signal_rows, &cve_rows, from, now);

    // Fold remediation posture and its window deltas into the stats blob
    let metrics = exposure_engine::remediation_metrics(pool, user_id, now).await?;
    let deltas = exposure_engine::snapshot_and_deltas(pool, user_id, period, &metrics, now).await?;

    let mut stats_value = serde_json::to_value(&stats)?;
    if let Some(map) = stats_value.as_object_mut() {
        map.insert("remediation".to_string(), serde_json::to_value(&metrics)?);
        map.insert("remediation_deltas".to_string(), deltas);
    }

    let summary = match llm {
        Some(llm) if !bundles.is_empty() => {
            let (prompt, max_tokens) = period_prompt(period);
            let system = format!(
                "{}\n\nPrecomputed statistics for this window (JSON):\n{}",
                prompt, stats_value
            );
            let request = CompletionRequest::new(system, build_group_context(&bundles))
                .max_tokens(max_tokens);

            match llm.complete(request).await {
                Ok(text) => Some(text),
                Err(e) => {
                    tracing::warn!(user_id = %user_id, period = period.as_str(), error = %e, "Report summary failed");
                    None
                }
            }
        }
        _ => None,
    };

    let report = PeriodReport {
        user_id,
        period,
        from_date: from,
        to_date: now,
        summary,
        stats: stats_value,
        generated_at: now,
    };

    reports::upsert_report(pool, &report).await?;

    tracing::info!(
        user_id = %user_id,
        period = period.as_str(),
        stories = bundles.len(),
        has_summary = report.summary.is_some(),
        "Period report generated"
    );

    Ok(report)
}
