//! Rule merging.
//!
//! Combines the rules of a root document and everything it (transitively)
//! references into one tier-ordered [`MergedRuleSet`].
//!
//! The walk follows the resolver's dependency order restricted to the root's
//! closure, so referenced documents are visited before the documents that
//! include them:
//!
//! ```text
//! order:   base-backup ─▶ naming ─▶ repo-root
//!              │            │           │
//!              └── RULE-001 │           └── RULE-001 (closer to root: wins)
//!                           └── RULE-007
//! ```
//!
//! Per tier, every declaration of an ID is collected first. A declaration is
//! overridden when another declaring document reaches it (the including
//! document is the more specific source). The remaining declarations form the
//! frontier:
//!
//! - one frontier declaration, or several with the same text (shared
//!   inclusion): it wins and takes the position the ID was first seen at;
//! - differing texts: `ConflictingRules`. Neither document is authoritative.
//!
//! Deciding on the frontier alone keeps the outcome independent of how
//! unrelated siblings happen to be ordered.
//!
//! Tiers are independent: the same ID in different tiers is not a collision.

use super::graph::Resolution;
use crate::{DocumentId, MergeError, Rule, SectionKind, Tier};
use std::collections::{BTreeSet, HashMap, HashSet};

/// A recorded override: `by` replaced the rule previously held from `replaced`.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Override {
    pub rule_id: String,
    pub tier: Tier,
    pub replaced: DocumentId,
    pub by: DocumentId,
    /// The overriding document lists the ID in its `overrides` front matter.
    pub declared: bool,
}

/// Deduplicated, override-resolved, tier-ordered rules for one root document.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct MergedRuleSet {
    pub root: DocumentId,
    pub must: Vec<Rule>,
    pub should: Vec<Rule>,
    pub could: Vec<Rule>,
    /// Principles lines from the closure, in walk order, exact duplicates dropped.
    pub principles: Vec<String>,
    /// Patterns lines from the closure, in walk order, exact duplicates dropped.
    pub patterns: Vec<String>,
    pub overrides: Vec<Override>,
    /// Closure documents in walk order (leaves first, root last).
    pub sources: Vec<DocumentId>,
}

impl MergedRuleSet {
    pub fn tier(&self, tier: Tier) -> &[Rule] {
        match tier {
            Tier::Must => &self.must,
            Tier::Should => &self.should,
            Tier::Could => &self.could,
        }
    }

    /// All rules, Must first.
    pub fn rules(&self) -> impl Iterator<Item = &Rule> {
        self.must.iter().chain(&self.should).chain(&self.could)
    }

    pub fn get(&self, tier: Tier, id: &str) -> Option<&Rule> {
        self.tier(tier).iter().find(|r| r.id == id)
    }

    pub fn len(&self) -> usize {
        self.must.len() + self.should.len() + self.could.len()
    }

    pub fn is_empty(&self) -> bool {
        self.len() == 0
    }
}

/// Every declaration of one tier, grouped by ID in first-encounter order.
#[derive(Default)]
struct TierLedger<'a> {
    declarations: Vec<Vec<(&'a Rule, usize)>>,
    slots: HashMap<&'a str, usize>,
}

impl<'a> TierLedger<'a> {
    fn declare(&mut self, rule: &'a Rule, node: usize) {
        let next = self.declarations.len();
        let slot = *self.slots.entry(rule.id.as_str()).or_insert(next);
        if slot == next {
            self.declarations.push(Vec::new());
        }
        self.declarations[slot].push((rule, node));
    }
}

/// Outcome for one rule ID: the surviving declaration, or the documents that
/// disagree about it.
enum Settled<'a> {
    Kept { rule: &'a Rule, overrides: Vec<(usize, usize)> },
    Conflict(Vec<usize>),
}

/// Resolve every declaration of one ID. A declaration is overridden when
/// another declaring document reaches it; the rest (the frontier) must agree
/// on the text.
fn settle<'a>(declarations: &[(&'a Rule, usize)], reach: &HashMap<usize, BTreeSet<usize>>) -> Settled<'a> {
    let overrider = |node: usize| {
        declarations.iter().map(|&(_, other)| other).find(|&other| other != node && reach[&other].contains(&node))
    };

    let mut frontier: Vec<(&Rule, usize)> = Vec::new();
    let mut overrides = Vec::new();
    for &(rule, node) in declarations {
        match overrider(node) {
            Some(by) => overrides.push((node, by)),
            None => frontier.push((rule, node)),
        }
    }

    match frontier.first() {
        Some(&(first, _)) if frontier.iter().all(|(rule, _)| rule.text == first.text) => {
            Settled::Kept { rule: first, overrides }
        }
        _ => Settled::Conflict(frontier.into_iter().map(|(_, node)| node).collect()),
    }
}

/// Lines gathered across documents with exact duplicates dropped.
#[derive(Default)]
struct LineSet {
    lines: Vec<String>,
    seen: HashSet<String>,
}

impl LineSet {
    fn extend<'a>(&mut self, lines: impl Iterator<Item = &'a str>) {
        for line in lines {
            if self.seen.insert(line.to_string()) {
                self.lines.push(line.to_string());
            }
        }
    }
}

pub(crate) fn merge(root: &DocumentId, resolution: &Resolution) -> Result<MergedRuleSet, MergeError> {
    let graph = &resolution.graph;
    let root_node = graph.index_of(root).ok_or_else(|| MergeError::UnknownDocument(root.clone()))?;

    let broken = resolution.errors_affecting(root);
    if !broken.is_empty() {
        return Err(MergeError::BrokenSubgraph { root: root.clone(), errors: broken });
    }

    let closure = graph.closure_of(root_node);
    let walk: Vec<usize> =
        resolution.order.iter().filter_map(|id| graph.index_of(id)).filter(|n| closure.contains(n)).collect();
    let reach: HashMap<usize, BTreeSet<usize>> = walk.iter().map(|&n| (n, graph.closure_of(n))).collect();

    check_declared_overrides(resolution, &walk, &reach)?;

    let mut ledgers: [TierLedger; 3] = Default::default();
    let mut principles = LineSet::default();
    let mut patterns = LineSet::default();

    for &node in &walk {
        let doc = graph.node(node);
        for rule in doc.rules() {
            ledgers[rule.tier as usize].declare(rule, node);
        }
        for section in &doc.sections {
            match section.kind {
                SectionKind::Principles => principles.extend(section.content_lines()),
                SectionKind::Patterns => patterns.extend(section.content_lines()),
                _ => {}
            }
        }
    }

    let mut tiers: [Vec<Rule>; 3] = Default::default();
    let mut overrides = Vec::new();
    for (tier, ledger) in Tier::ALL.into_iter().zip(&ledgers) {
        let mut conflict: Option<(&str, Vec<usize>)> = None;
        for declarations in &ledger.declarations {
            match settle(declarations, &reach) {
                Settled::Kept { rule, overrides: replaced } => {
                    for (node, by) in replaced {
                        let by_doc = graph.node(by);
                        tracing::trace!(rule = %rule.id, %tier, replaced = %graph.node(node).id, by = %by_doc.id, "override");
                        overrides.push(Override {
                            rule_id: rule.id.clone(),
                            tier,
                            replaced: graph.node(node).id.clone(),
                            by: by_doc.id.clone(),
                            declared: by_doc.metadata.overrides.contains(&rule.id),
                        });
                    }
                    tiers[tier as usize].push(rule.clone());
                }
                Settled::Conflict(nodes) => {
                    let id = declarations[0].0.id.as_str();
                    if conflict.as_ref().is_none_or(|(held, _)| id < *held) {
                        conflict = Some((id, nodes));
                    }
                }
            }
        }

        if let Some((rule_id, nodes)) = conflict {
            let mut documents: Vec<DocumentId> = nodes.into_iter().map(|n| graph.node(n).id.clone()).collect();
            documents.sort();
            documents.dedup();
            return Err(MergeError::ConflictingRules { rule_id: rule_id.to_string(), tier, documents });
        }
    }

    let [must, should, could] = tiers;
    let merged = MergedRuleSet {
        root: root.clone(),
        must,
        should,
        could,
        principles: principles.lines,
        patterns: patterns.lines,
        overrides,
        sources: walk.iter().map(|&n| graph.node(n).id.clone()).collect(),
    };

    tracing::debug!(
        root = %merged.root,
        sources = merged.sources.len(),
        must = merged.must.len(),
        should = merged.should.len(),
        could = merged.could.len(),
        overrides = merged.overrides.len(),
        "merged rules"
    );

    Ok(merged)
}

/// Every ID listed in a document's `overrides` front matter must be defined by
/// some document it references.
fn check_declared_overrides(
    resolution: &Resolution,
    walk: &[usize],
    reach: &HashMap<usize, BTreeSet<usize>>,
) -> Result<(), MergeError> {
    let graph = &resolution.graph;
    for &node in walk {
        let doc = graph.node(node);
        for rule_id in &doc.metadata.overrides {
            let defined = reach[&node]
                .iter()
                .filter(|&&other| other != node)
                .any(|&other| graph.node(other).rules().any(|r| &r.id == rule_id));
            if !defined {
                return Err(MergeError::UnknownOverride { document: doc.id.clone(), rule_id: rule_id.clone() });
            }
        }
    }
    Ok(())
}
