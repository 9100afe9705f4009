//! Axiom records and the derived axiom network.
//!
//! Network construction is a deterministic keyword-overlap clustering:
//!
//! - two axioms from different sources whose keyword Jaccard index is at
//!   least [`SHARED_THRESHOLD`] are *shared*; shared links merge transitively
//! - a *conflict* is a related pair (Jaccard at least [`RELATED_THRESHOLD`])
//!   from different sources where exactly one side is negated, plus any pair
//!   the synthesizer flagged
//! - a *theory* is a connected component of shared links and same-source
//!   related links with at least two axioms

use std::collections::{BTreeMap, BTreeSet};

use serde::{Deserialize, Serialize};
use utoipa::ToSchema;

use super::PersonaRef;
use crate::similarity::{is_negated, jaccard, keywords};

pub const SHARED_THRESHOLD: f64 = 0.5;
pub const RELATED_THRESHOLD: f64 = 0.25;
const THEORY_NAME_KEYWORDS: usize = 3;

#[derive(Debug, Clone, Serialize, Deserialize, PartialEq, ToSchema)]
#[cfg_attr(feature = "typescript", derive(ts_rs::TS))]
#[cfg_attr(feature = "typescript", ts(export))]
#[serde(tag = "type", rename_all = "snake_case")]
pub enum AxiomSource {
    User,
    Worker { slot_id: String, persona: PersonaRef },
    Synthesizer,
}

impl AxiomSource {
    /// Stable short key used in axiom ids and proponent lists.
    pub fn key(&self) -> &str {
        match self {
            Self::User => "user",
            Self::Worker { slot_id, .. } => slot_id,
            Self::Synthesizer => "synthesizer",
        }
    }
}

#[derive(Debug, Clone, Serialize, Deserialize, PartialEq, ToSchema)]
#[cfg_attr(feature = "typescript", derive(ts_rs::TS))]
#[cfg_attr(feature = "typescript", ts(export))]
pub struct Axiom {
    pub id: String,
    pub statement: String,
    /// core | derived | assumption | parameter
    pub axiom_type: String,
    pub confidence: f64,
    #[serde(default)]
    pub vulnerability: Option<String>,
    #[serde(default)]
    pub potential_biases: Vec<String>,
}

/// Axioms extracted from one source.
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq, ToSchema)]
#[cfg_attr(feature = "typescript", derive(ts_rs::TS))]
#[cfg_attr(feature = "typescript", ts(export))]
pub struct AxiomSet {
    pub source: AxiomSource,
    pub axioms: Vec<Axiom>,
    #[serde(default)]
    pub theory_contribution: String,
}

pub fn axiom_id(session_id: &uuid::Uuid, source: &AxiomSource, index: usize) -> String {
    let short: String = session_id.simple().to_string().chars().take(8).collect();
    format!("ax_{}_{}_{}", short, source.key(), index + 1)
}

/// A pair of statements the synthesizer reported as contradictory.
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq, ToSchema)]
#[cfg_attr(feature = "typescript", derive(ts_rs::TS))]
#[cfg_attr(feature = "typescript", ts(export))]
pub struct ConflictHint {
    pub statement_a: String,
    pub statement_b: String,
    #[serde(default)]
    pub reason: String,
}

#[derive(Debug, Clone, Serialize, Deserialize, PartialEq, ToSchema)]
#[cfg_attr(feature = "typescript", derive(ts_rs::TS))]
#[cfg_attr(feature = "typescript", ts(export))]
pub struct SharedAxiom {
    pub statement: String,
    pub axiom_ids: Vec<String>,
    pub sources: Vec<String>,
}

#[derive(Debug, Clone, Serialize, Deserialize, PartialEq, ToSchema)]
#[cfg_attr(feature = "typescript", derive(ts_rs::TS))]
#[cfg_attr(feature = "typescript", ts(export))]
pub struct AxiomConflict {
    pub axiom_a: String,
    pub axiom_b: String,
    pub reason: String,
}

#[derive(Debug, Clone, Serialize, Deserialize, PartialEq, ToSchema)]
#[cfg_attr(feature = "typescript", derive(ts_rs::TS))]
#[cfg_attr(feature = "typescript", ts(export))]
pub struct Theory {
    pub id: String,
    pub name: String,
    pub axiom_ids: Vec<String>,
    pub proponents: Vec<String>,
    pub competing_theories: Vec<String>,
}

#[derive(Debug, Clone, Default, Serialize, Deserialize, PartialEq, ToSchema)]
#[cfg_attr(feature = "typescript", derive(ts_rs::TS))]
#[cfg_attr(feature = "typescript", ts(export))]
pub struct AxiomNetwork {
    pub meta_axioms: Vec<String>,
    pub shared_axioms: Vec<SharedAxiom>,
    pub conflicts: Vec<AxiomConflict>,
    pub theories: Vec<Theory>,
}

struct Node<'a> {
    id: &'a str,
    source: &'a str,
    statement: &'a str,
    words: BTreeSet<String>,
    negated: bool,
}

struct DisjointSet {
    parent: Vec<usize>,
}

impl DisjointSet {
    fn new(n: usize) -> Self {
        Self {
            parent: (0..n).collect(),
        }
    }

    fn find(&mut self, i: usize) -> usize {
        let mut root = i;
        while self.parent[root] != root {
            root = self.parent[root];
        }
        let mut cur = i;
        while self.parent[cur] != root {
            let next = self.parent[cur];
            self.parent[cur] = root;
            cur = next;
        }
        root
    }

    fn union(&mut self, a: usize, b: usize) {
        let (ra, rb) = (self.find(a), self.find(b));
        if ra != rb {
            // Lower index wins so component order follows insertion order.
            let (keep, merge) = if ra < rb { (ra, rb) } else { (rb, ra) };
            self.parent[merge] = keep;
        }
    }

    /// Components with at least `min` members, ordered by first member.
    fn components(&mut self, min: usize) -> Vec<Vec<usize>> {
        let mut groups: BTreeMap<usize, Vec<usize>> = BTreeMap::new();
        for i in 0..self.parent.len() {
            let root = self.find(i);
            groups.entry(root).or_default().push(i);
        }
        groups.into_values().filter(|g| g.len() >= min).collect()
    }
}

pub fn build_network(
    sets: &[AxiomSet],
    meta_axioms: Vec<String>,
    hints: &[ConflictHint],
) -> AxiomNetwork {
    let nodes: Vec<Node<'_>> = sets
        .iter()
        .flat_map(|set| {
            set.axioms.iter().map(move |axiom| Node {
                id: &axiom.id,
                source: set.source.key(),
                statement: &axiom.statement,
                words: keywords(&axiom.statement),
                negated: is_negated(&axiom.statement),
            })
        })
        .collect();

    let n = nodes.len();
    let mut shared = DisjointSet::new(n);
    let mut theory = DisjointSet::new(n);
    let mut conflict_pairs: BTreeSet<(usize, usize)> = BTreeSet::new();
    let mut conflicts = Vec::new();

    for i in 0..n {
        for j in (i + 1)..n {
            let (a, b) = (&nodes[i], &nodes[j]);
            let score = jaccard(&a.words, &b.words);
            let cross_source = a.source != b.source;

            if cross_source && score >= RELATED_THRESHOLD && a.negated != b.negated {
                conflict_pairs.insert((i, j));
                conflicts.push(AxiomConflict {
                    axiom_a: a.id.to_string(),
                    axiom_b: b.id.to_string(),
                    reason: "opposing stances on the same terms".to_string(),
                });
                continue;
            }

            if cross_source && score >= SHARED_THRESHOLD {
                shared.union(i, j);
                theory.union(i, j);
            } else if !cross_source && score >= RELATED_THRESHOLD {
                theory.union(i, j);
            }
        }
    }

    for hint in hints {
        let (Some(i), Some(j)) = (
            best_match(&nodes, &hint.statement_a),
            best_match(&nodes, &hint.statement_b),
        ) else {
            continue;
        };
        if i == j {
            continue;
        }
        let pair = (i.min(j), i.max(j));
        if conflict_pairs.insert(pair) {
            conflicts.push(AxiomConflict {
                axiom_a: nodes[pair.0].id.to_string(),
                axiom_b: nodes[pair.1].id.to_string(),
                reason: if hint.reason.is_empty() {
                    "flagged by synthesizer".to_string()
                } else {
                    hint.reason.clone()
                },
            });
        }
    }

    let shared_axioms = shared
        .components(2)
        .into_iter()
        .map(|group| SharedAxiom {
            statement: nodes[group[0]].statement.to_string(),
            axiom_ids: group.iter().map(|&i| nodes[i].id.to_string()).collect(),
            sources: unique_sources(&nodes, &group),
        })
        .collect();

    let components = theory.components(2);
    let theory_ids: Vec<String> = (1..=components.len())
        .map(|i| format!("theory_{}", i))
        .collect();
    let mut membership: BTreeMap<usize, usize> = BTreeMap::new();
    for (t, group) in components.iter().enumerate() {
        for &i in group {
            membership.insert(i, t);
        }
    }

    let mut competing: Vec<BTreeSet<usize>> = vec![BTreeSet::new(); components.len()];
    for &(i, j) in &conflict_pairs {
        if let (Some(&ti), Some(&tj)) = (membership.get(&i), membership.get(&j)) {
            if ti != tj {
                competing[ti].insert(tj);
                competing[tj].insert(ti);
            }
        }
    }

    let theories = components
        .iter()
        .enumerate()
        .map(|(t, group)| Theory {
            id: theory_ids[t].clone(),
            name: theory_name(&nodes, group),
            axiom_ids: group.iter().map(|&i| nodes[i].id.to_string()).collect(),
            proponents: unique_sources(&nodes, group),
            competing_theories: competing[t].iter().map(|&o| theory_ids[o].clone()).collect(),
        })
        .collect();

    AxiomNetwork {
        meta_axioms,
        shared_axioms,
        conflicts,
        theories,
    }
}

fn best_match(nodes: &[Node<'_>], statement: &str) -> Option<usize> {
    let words = keywords(statement);
    let mut best: Option<(usize, f64)> = None;
    for (i, node) in nodes.iter().enumerate() {
        let score = jaccard(&node.words, &words);
        if score >= RELATED_THRESHOLD && best.map_or(true, |(_, s)| score > s) {
            best = Some((i, score));
        }
    }
    best.map(|(i, _)| i)
}

fn unique_sources(nodes: &[Node<'_>], group: &[usize]) -> Vec<String> {
    let mut sources: Vec<String> = Vec::new();
    for &i in group {
        if !sources.iter().any(|s| s == nodes[i].source) {
            sources.push(nodes[i].source.to_string());
        }
    }
    sources
}

fn theory_name(nodes: &[Node<'_>], group: &[usize]) -> String {
    let mut counts: BTreeMap<&str, usize> = BTreeMap::new();
    for &i in group {
        for word in &nodes[i].words {
            *counts.entry(word.as_str()).or_default() += 1;
        }
    }
    let mut ranked: Vec<(&str, usize)> = counts.into_iter().collect();
    // BTreeMap order makes ties alphabetical; the sort is stable.
    ranked.sort_by(|a, b| b.1.cmp(&a.1));
    let top: Vec<&str> = ranked
        .into_iter()
        .take(THEORY_NAME_KEYWORDS)
        .map(|(w, _)| w)
        .collect();
    top.join(" / ")
}

#[cfg(test)]
mod tests {
    use super::*;

    fn set(source: AxiomSource, statements: &[&str]) -> AxiomSet {
        let key = source.key().to_string();
        AxiomSet {
            axioms: statements
                .iter()
                .enumerate()
                .map(|(i, s)| Axiom {
                    id: format!("{}_{}", key, i + 1),
                    statement: s.to_string(),
                    axiom_type: "core".to_string(),
                    confidence: 0.8,
                    vulnerability: None,
                    potential_biases: vec![],
                })
                .collect(),
            source,
            theory_contribution: String::new(),
        }
    }

    fn worker(slot: &str) -> AxiomSource {
        AxiomSource::Worker {
            slot_id: slot.to_string(),
            persona: PersonaRef {
                id: "p".to_string(),
                name: "P".to_string(),
            },
        }
    }

    #[test]
    fn test_shared_axioms_merge_across_sources() {
        let sets = vec![
            set(worker("worker_1"), &["Users value data privacy above convenience"]),
            set(worker("worker_2"), &["Users value data privacy above features"]),
            set(AxiomSource::User, &["Quarterly revenue drives roadmap priorities"]),
        ];

        let network = build_network(&sets, vec![], &[]);

        assert_eq!(network.shared_axioms.len(), 1);
        let shared = &network.shared_axioms[0];
        assert_eq!(shared.axiom_ids, vec!["worker_1_1", "worker_2_1"]);
        assert_eq!(shared.sources, vec!["worker_1", "worker_2"]);
        assert!(network.conflicts.is_empty());
    }

    #[test]
    fn test_negated_overlap_is_conflict() {
        let sets = vec![
            set(worker("worker_1"), &["Services should share a central database"]),
            set(worker("worker_2"), &["Services should never share a central database"]),
        ];

        let network = build_network(&sets, vec![], &[]);

        assert_eq!(network.conflicts.len(), 1);
        assert_eq!(network.conflicts[0].axiom_a, "worker_1_1");
        assert_eq!(network.conflicts[0].axiom_b, "worker_2_1");
        assert!(network.shared_axioms.is_empty());
    }

    #[test]
    fn test_same_source_negation_is_not_conflict() {
        let sets = vec![set(
            worker("worker_1"),
            &["Caching layers improve latency", "Caching layers never improve latency"],
        )];
        let network = build_network(&sets, vec![], &[]);
        assert!(network.conflicts.is_empty());
    }

    #[test]
    fn test_synthesizer_hint_adds_conflict() {
        let sets = vec![
            set(worker("worker_1"), &["Growth requires aggressive hiring"]),
            set(worker("worker_2"), &["Profitability requires lean teams"]),
        ];
        let hints = vec![ConflictHint {
            statement_a: "growth requires aggressive hiring".to_string(),
            statement_b: "profitability requires lean teams".to_string(),
            reason: "hiring pace".to_string(),
        }];

        let network = build_network(&sets, vec!["Scale is contested".to_string()], &hints);

        assert_eq!(network.conflicts.len(), 1);
        assert_eq!(network.conflicts[0].reason, "hiring pace");
        assert_eq!(network.meta_axioms, vec!["Scale is contested"]);
    }

    #[test]
    fn test_theories_and_competition() {
        let sets = vec![
            set(
                worker("worker_1"),
                &[
                    "Centralized platform teams reduce duplicated tooling",
                    "Centralized platform teams standardize tooling",
                ],
            ),
            set(
                worker("worker_2"),
                &[
                    "Autonomous teams own tooling choices",
                    "Autonomous teams should not adopt centralized platform tooling",
                ],
            ),
        ];

        let network = build_network(&sets, vec![], &[]);

        assert_eq!(network.theories.len(), 2);
        let first = &network.theories[0];
        assert_eq!(first.id, "theory_1");
        assert_eq!(first.proponents, vec!["worker_1"]);
        assert_eq!(first.name, "centralized / platform / teams");
        assert_eq!(first.competing_theories, vec!["theory_2"]);
        assert_eq!(network.theories[1].competing_theories, vec!["theory_1"]);
    }

    #[test]
    fn test_network_is_deterministic() {
        let sets = vec![
            set(worker("worker_1"), &["Simple designs age well", "Tests document intent"]),
            set(worker("worker_2"), &["Simple designs age gracefully"]),
        ];
        assert_eq!(build_network(&sets, vec![], &[]), build_network(&sets, vec![], &[]));
    }

    #[test]
    fn test_axiom_id_format() {
        let id = uuid::Uuid::parse_str("550e8400-e29b-41d4-a716-446655440000").unwrap();
        assert_eq!(axiom_id(&id, &AxiomSource::User, 0), "ax_550e8400_user_1");
        assert_eq!(axiom_id(&id, &worker("worker_2"), 2), "ax_550e8400_worker_2_3");
    }
}
