//! Story clusterer
//!
//! Groups a user's ungrouped matched articles into stories by IDF-weighted
//! Jaccard similarity over entities, signals, and matched keywords, plus a
//! temporal decay term. Grouping is greedy agglomeration over the pair
//! list sorted by similarity; the sort is stable, so equal-similarity
//! pairs keep input order and the result is deterministic for a given
//! input order.

use chrono::{DateTime, Utc};
use std::collections::{HashMap, HashSet};
use uuid::Uuid;

/// Pairs below this similarity never bind articles together
const SIMILARITY_THRESHOLD: f64 = 0.30;
/// Hard cap on story size
const MAX_GROUP_SIZE: usize = 10;
/// Temporal affinity decays linearly to zero across this many hours
const TEMPORAL_DECAY_HOURS: f64 = 72.0;
/// Stories with no co-member evidence get this confidence
const SINGLETON_CONFIDENCE: f64 = 0.5;

const WEIGHT_ENTITIES: f64 = 0.35;
const WEIGHT_SIGNALS: f64 = 0.30;
const WEIGHT_KEYWORDS: f64 = 0.15;
const WEIGHT_TEMPORAL: f64 = 0.20;

/// Per-article features feeding the clusterer
#[derive(Debug, Clone)]
pub struct ClusterInput {
    pub article_id: Uuid,
    pub title: String,
    /// Entity display names; compared case-insensitively
    pub entities: Vec<String>,
    /// Signal slugs
    pub signals: Vec<String>,
    /// Matched keywords, lowercased
    pub keywords: Vec<String>,
    pub published_at: Option<DateTime<Utc>>,
}

/// One produced story
#[derive(Debug, Clone)]
pub struct ClusterGroup {
    pub title: String,
    pub article_ids: Vec<Uuid>,
    pub confidence: f64,
    pub dominant_signals: Vec<String>,
    pub dominant_entities: Vec<String>,
}

/// Normalized inverse document frequency over one term space.
/// A term in every document weighs 0; a term in exactly one weighs 1.
/// A single-document corpus falls back to weight 1 for every term.
fn idf_weights(term_sets: &[HashSet<String>]) -> HashMap<String, f64> {
    let n = term_sets.len();
    let mut df: HashMap<&str, usize> = HashMap::new();
    for set in term_sets {
        for term in set {
            *df.entry(term.as_str()).or_insert(0) += 1;
        }
    }

    df.into_iter()
        .map(|(term, count)| {
            let weight = if n <= 1 {
                1.0
            } else {
                (n as f64 / count as f64).ln() / (n as f64).ln()
            };
            (term.to_string(), weight)
        })
        .collect()
}

/// IDF-weighted Jaccard. Zero when the union is empty or carries no
/// discriminating weight at all.
fn weighted_jaccard(
    a: &HashSet<String>,
    b: &HashSet<String>,
    idf: &HashMap<String, f64>,
) -> f64 {
    if a.is_empty() && b.is_empty() {
        return 0.0;
    }

    let union_weight: f64 = a.union(b).map(|t| idf.get(t).copied().unwrap_or(0.0)).sum();
    if union_weight <= f64::EPSILON {
        return 0.0;
    }

    let intersection_weight: f64 = a
        .intersection(b)
        .map(|t| idf.get(t).copied().unwrap_or(0.0))
        .sum();

    intersection_weight / union_weight
}

/// Linear decay over publication distance; zero when either date is
/// unknown
fn temporal_affinity(a: Option<DateTime<Utc>>, b: Option<DateTime<Utc>>) -> f64 {
    match (a, b) {
        (Some(a), Some(b)) => {
            let delta_hours = (a - b).num_minutes().abs() as f64 / 60.0;
            (1.0 - delta_hours / TEMPORAL_DECAY_HOURS).max(0.0)
        }
        _ => 0.0,
    }
}

struct Features {
    entities: HashSet<String>,
    signals: HashSet<String>,
    keywords: HashSet<String>,
}

fn lower_set(terms: &[String]) -> HashSet<String> {
    terms.iter().map(|t| t.to_lowercase()).collect()
}

/// Cluster articles into stories. Groups come back ordered by article
/// count descending; formation order breaks ties.
pub fn cluster_articles(inputs: &[ClusterInput]) -> Vec<ClusterGroup> {
    if inputs.is_empty() {
        return Vec::new();
    }

    let features: Vec<Features> = inputs
        .iter()
        .map(|input| Features {
            entities: lower_set(&input.entities),
            signals: lower_set(&input.signals),
            keywords: lower_set(&input.keywords),
        })
        .collect();

    let entity_idf = idf_weights(&features.iter().map(|f| f.entities.clone()).collect::<Vec<_>>());
    let signal_idf = idf_weights(&features.iter().map(|f| f.signals.clone()).collect::<Vec<_>>());
    let keyword_idf = idf_weights(&features.iter().map(|f| f.keywords.clone()).collect::<Vec<_>>());

    let n = inputs.len();
    let mut sim = vec![vec![0.0; n]; n];
    let mut pairs: Vec<(usize, usize, f64)> = Vec::new();

    for i in 0..n {
        for j in (i + 1)..n {
            let score = WEIGHT_ENTITIES
                * weighted_jaccard(&features[i].entities, &features[j].entities, &entity_idf)
                + WEIGHT_SIGNALS
                    * weighted_jaccard(&features[i].signals, &features[j].signals, &signal_idf)
                + WEIGHT_KEYWORDS
                    * weighted_jaccard(&features[i].keywords, &features[j].keywords, &keyword_idf)
                + WEIGHT_TEMPORAL
                    * temporal_affinity(inputs[i].published_at, inputs[j].published_at);

            sim[i][j] = score;
            sim[j][i] = score;

            if score >= SIMILARITY_THRESHOLD {
                pairs.push((i, j, score));
            }
        }
    }

    // Stable sort: equal similarities keep pair generation order
    pairs.sort_by(|a, b| b.2.partial_cmp(&a.2).unwrap_or(std::cmp::Ordering::Equal));

    let mut assignment: Vec<Option<usize>> = vec![None; n];
    let mut groups: Vec<Vec<usize>> = Vec::new();

    for (a, b, _) in pairs {
        match (assignment[a], assignment[b]) {
            (None, None) => {
                let group_id = groups.len();
                groups.push(vec![a, b]);
                assignment[a] = Some(group_id);
                assignment[b] = Some(group_id);
            }
            (Some(group_id), None) => {
                if groups[group_id].len() < MAX_GROUP_SIZE {
                    groups[group_id].push(b);
                    assignment[b] = Some(group_id);
                }
            }
            (None, Some(group_id)) => {
                if groups[group_id].len() < MAX_GROUP_SIZE {
                    groups[group_id].push(a);
                    assignment[a] = Some(group_id);
                }
            }
            (Some(ga), Some(gb)) if ga != gb => {
                if groups[ga].len() + groups[gb].len() <= MAX_GROUP_SIZE {
                    let moved = std::mem::take(&mut groups[gb]);
                    for member in &moved {
                        assignment[*member] = Some(ga);
                    }
                    groups[ga].extend(moved);
                }
            }
            _ => {}
        }
    }

    // Leftovers become singleton stories
    for i in 0..n {
        if assignment[i].is_none() {
            let group_id = groups.len();
            groups.push(vec![i]);
            assignment[i] = Some(group_id);
        }
    }

    let mut built: Vec<ClusterGroup> = groups
        .into_iter()
        .filter(|members| !members.is_empty())
        .map(|members| build_group(&members, inputs, &sim))
        .collect();

    built.sort_by(|a, b| b.article_ids.len().cmp(&a.article_ids.len()));

    built
}

fn build_group(members: &[usize], inputs: &[ClusterInput], sim: &[Vec<f64>]) -> ClusterGroup {
    let confidence = if members.len() < 2 {
        SINGLETON_CONFIDENCE
    } else {
        let mut total = 0.0;
        let mut count = 0usize;
        for (pos, &a) in members.iter().enumerate() {
            for &b in &members[pos + 1..] {
                total += sim[a][b];
                count += 1;
            }
        }
        total / count as f64
    };

    let dominant_entities = dominant_terms(members.iter().map(|&i| &inputs[i].entities));
    let dominant_signals = dominant_terms(members.iter().map(|&i| &inputs[i].signals));

    let title = group_title(&dominant_entities, &dominant_signals, &inputs[members[0]].title);

    ClusterGroup {
        title,
        article_ids: members.iter().map(|&i| inputs[i].article_id).collect(),
        confidence,
        dominant_signals,
        dominant_entities,
    }
}

/// Top-3 most frequent terms across member articles, first-seen display
/// form preserved, first-seen order breaking ties
fn dominant_terms<'a>(member_terms: impl Iterator<Item = &'a Vec<String>>) -> Vec<String> {
    let mut counts: HashMap<String, usize> = HashMap::new();
    let mut display: Vec<(String, String)> = Vec::new(); // (key, first-seen form)

    for terms in member_terms {
        for term in terms {
            let key = term.to_lowercase();
            let count = counts.entry(key.clone()).or_insert(0);
            if *count == 0 {
                display.push((key, term.clone()));
            }
            *count += 1;
        }
    }

    let mut ranked: Vec<(usize, usize, String)> = display
        .into_iter()
        .enumerate()
        .map(|(order, (key, form))| (counts[&key], order, form))
        .collect();
    ranked.sort_by(|a, b| b.0.cmp(&a.0).then(a.1.cmp(&b.1)));

    ranked.into_iter().take(3).map(|(_, _, form)| form).collect()
}

/// Deterministic pre-briefing title; the briefing stage may overwrite it
fn group_title(entities: &[String], signals: &[String], seed_title: &str) -> String {
    match (entities.first(), signals.first()) {
        (Some(entity), Some(signal)) => format!("{}: {}", entity, title_case(signal)),
        (Some(entity), None) => format!("{} Incident", entity),
        (None, Some(signal)) => format!("{} Activity", title_case(signal)),
        (None, None) => seed_title.to_string(),
    }
}

/// `data-breach` → `Data Breach`
fn title_case(slug: &str) -> String {
    slug.split(['-', '_', ' '])
        .filter(|part| !part.is_empty())
        .map(|part| {
            let mut chars = part.chars();
            match chars.next() {
                Some(first) => first.to_uppercase().collect::<String>() + chars.as_str(),
                None => String::new(),
            }
        })
        .collect::<Vec<_>>()
        .join(" ")
}

#[cfg(test)]
mod tests {
    use super::*;
    use chrono::TimeZone;

    fn article(
        id: u128,
        title: &str,
        entities: &[&str],
        signals: &[&str],
        keywords: &[&str],
        hour: u32,
    ) -> ClusterInput {
        ClusterInput {
            article_id: Uuid::from_u128(id),
            title: title.to_string(),
            entities: entities.iter().map(|s| s.to_string()).collect(),
            signals: signals.iter().map(|s| s.to_string()).collect(),
            keywords: keywords.iter().map(|s| s.to_string()).collect(),
            published_at: Some(Utc.with_ymd_and_hms(2025, 6, 10, hour, 0, 0).unwrap()),
        }
    }

    #[test]
    fn test_idf_normalization_bounds() {
        // Term in every article weighs 0; term in exactly one weighs 1
        let sets: Vec<HashSet<String>> = vec![
            ["common", "rare"].iter().map(|s| s.to_string()).collect(),
            ["common"].iter().map(|s| s.to_string()).collect(),
            ["common"].iter().map(|s| s.to_string()).collect(),
        ];
        let idf = idf_weights(&sets);
        assert_eq!(idf["common"], 0.0);
        assert_eq!(idf["rare"], 1.0);
    }

    #[test]
    fn test_idf_single_document_fallback() {
        let sets: Vec<HashSet<String>> =
            vec![["only"].iter().map(|s| s.to_string()).collect()];
        assert_eq!(idf_weights(&sets)["only"], 1.0);
    }

    #[test]
    fn test_temporal_affinity() {
        let at = |h| Some(Utc.with_ymd_and_hms(2025, 6, 10, h, 0, 0).unwrap());
        assert_eq!(temporal_affinity(at(0), at(0)), 1.0);
        let twelve = temporal_affinity(at(0), at(12));
        assert!((twelve - (1.0 - 12.0 / 72.0)).abs() < 1e-9);
        assert_eq!(temporal_affinity(at(0), None), 0.0);
        // Beyond the decay horizon
        let far = Some(Utc.with_ymd_and_hms(2025, 6, 20, 0, 0, 0).unwrap());
        assert_eq!(temporal_affinity(at(0), far), 0.0);
    }

    #[test]
    fn test_entity_overlap_clusters_against_diverse_corpus() {
        // Three Fortinet stories plus unrelated articles that keep the
        // Fortinet terms discriminating
        let inputs = vec![
            article(1, "FortiOS flaw exploited", &["Fortinet"], &["vulnerability"], &[], 0),
            article(2, "Fortinet patches bug", &["Fortinet"], &["vulnerability"], &[], 6),
            article(3, "More Fortinet fallout", &["Fortinet"], &["vulnerability"], &[], 12),
            article(4, "Retail breach", &["Acme Retail"], &["data-breach"], &[], 3),
            article(5, "Phishing wave", &["MailCo"], &["phishing"], &[], 9),
        ];

        let groups = cluster_articles(&inputs);
        assert_eq!(groups.len(), 3);

        let fortinet = &groups[0];
        assert_eq!(fortinet.article_ids.len(), 3);
        assert_eq!(fortinet.dominant_entities[0], "Fortinet");
        assert!(fortinet.title.starts_with("Fortinet: "));
        assert!(fortinet.confidence > SIMILARITY_THRESHOLD);
    }

    #[test]
    fn test_universal_signal_is_suppressed() {
        // Ten articles share one signal, nothing else: the signal's idf
        // is 0, so similarity is temporal-only (0.20) and stays below
        // threshold. Ten singletons result.
        let inputs: Vec<ClusterInput> = (0..10)
            .map(|i| {
                article(
                    i as u128 + 1,
                    "story",
                    &[format!("vendor-{i}").as_str()],
                    &["vulnerability"],
                    &[],
                    0,
                )
            })
            .collect();

        let groups = cluster_articles(&inputs);
        assert_eq!(groups.len(), 10);
        for group in &groups {
            assert_eq!(group.article_ids.len(), 1);
            assert_eq!(group.confidence, SINGLETON_CONFIDENCE);
        }
    }

    #[test]
    fn test_group_size_cap() {
        // Twelve near-identical articles plus unrelated noise (so the
        // shared terms keep nonzero idf): the cap splits the twelve
        let mut inputs: Vec<ClusterInput> = (0..12)
            .map(|i| {
                article(
                    i as u128 + 1,
                    "lockbit again",
                    &["LockBit"],
                    &["ransomware"],
                    &["ransomware"],
                    i as u32 % 12,
                )
            })
            .collect();
        inputs.push(article(100, "dns outage", &["NetCo"], &["outage"], &[], 0));
        inputs.push(article(101, "new cpu flaw", &["ChipCo"], &["vulnerability"], &[], 1));

        let groups = cluster_articles(&inputs);
        assert!(groups.iter().all(|g| g.article_ids.len() <= MAX_GROUP_SIZE));
        assert_eq!(groups[0].article_ids.len(), MAX_GROUP_SIZE);
        let total: usize = groups.iter().map(|g| g.article_ids.len()).sum();
        assert_eq!(total, 14);
    }

    #[test]
    fn test_singleton_group_shape() {
        let inputs = vec![article(1, "Lone story", &[], &[], &["ransomware"], 0)];
        let groups = cluster_articles(&inputs);
        assert_eq!(groups.len(), 1);
        assert_eq!(groups[0].confidence, SINGLETON_CONFIDENCE);
        // No dominant terms: seed article title is kept
        assert_eq!(groups[0].title, "Lone story");
    }

    #[test]
    fn test_title_case() {
        assert_eq!(title_case("data-breach"), "Data Breach");
        assert_eq!(title_case("ransomware"), "Ransomware");
        assert_eq!(title_case("supply_chain attack"), "Supply Chain Attack");
    }

    #[test]
    fn test_groups_ordered_by_size_desc() {
        let inputs = vec![
            article(1, "solo", &["OnlyOne"], &[], &[], 0),
            article(2, "pair a", &["PairCo"], &["breach"], &[], 1),
            article(3, "pair b", &["PairCo"], &["breach"], &[], 2),
            article(4, "noise", &["Other"], &["phishing"], &[], 3),
        ];
        let groups = cluster_articles(&inputs);
        assert_eq!(groups[0].article_ids.len(), 2);
    }
}
