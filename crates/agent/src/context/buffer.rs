//! The context buffer — append-only, budget-bounded, deterministic eviction.

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use std::sync::Arc;

use scribeloop_core::error::ContextError;
use scribeloop_core::task::CostUnit;
use scribeloop_core::tool::{CapabilityKind, Payload};

use super::token::payload_cost;

// ── Data Structures ───────────────────────────────────────────────────────

/// Where an entry came from. Ordered by eviction priority, lowest first.
#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum EntryKind {
    PlanNote,
    Retrieval,
    PluginOutput,
}

/// One accepted item of evidence or intermediate output.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct ContextEntry {
    /// Strictly increasing, assigned on acceptance.
    pub seq: u64,
    pub kind: EntryKind,
    /// Tool name, or `"engine"` for plan notes.
    pub origin: String,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub capability: Option<CapabilityKind>,
    /// Topical key used to group sections.
    pub topic: String,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub language: Option<String>,
    pub payload: Payload,
    pub cost: usize,
    pub created_at: DateTime<Utc>,
}

/// An entry waiting to be appended.
#[derive(Debug, Clone, PartialEq)]
pub struct NewEntry {
    pub kind: EntryKind,
    pub origin: String,
    pub capability: Option<CapabilityKind>,
    pub topic: String,
    pub language: Option<String>,
    pub payload: Payload,
}

impl NewEntry {
    pub fn retrieval(origin: impl Into<String>, topic: impl Into<String>, payload: Payload) -> Self {
        Self {
            kind: EntryKind::Retrieval,
            origin: origin.into(),
            capability: Some(CapabilityKind::Retrieval),
            topic: topic.into(),
            language: None,
            payload,
        }
    }

    pub fn plugin_output(
        origin: impl Into<String>,
        capability: CapabilityKind,
        topic: impl Into<String>,
        payload: Payload,
    ) -> Self {
        Self {
            kind: EntryKind::PluginOutput,
            origin: origin.into(),
            capability: Some(capability),
            topic: topic.into(),
            language: None,
            payload,
        }
    }

    pub fn plan_note(text: impl Into<String>) -> Self {
        Self {
            kind: EntryKind::PlanNote,
            origin: "engine".into(),
            capability: None,
            topic: "plan".into(),
            language: None,
            payload: Payload::text(text),
        }
    }

    pub fn with_language(mut self, language: Option<String>) -> Self {
        self.language = language;
        self
    }
}

/// Result of a successful append.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Appended {
    pub seq: u64,
    /// Sequence numbers removed to make room, in eviction order.
    pub evicted: Vec<u64>,
}

/// Ordered entries plus a running total that never exceeds the budget.
#[derive(Debug, Clone)]
pub struct ContextBuffer {
    entries: Vec<ContextEntry>,
    budget: usize,
    used: usize,
    next_seq: u64,
    unit: CostUnit,
}

/// An immutable, cheaply clonable view of the buffer at one point in time.
#[derive(Debug, Clone)]
pub struct ContextSnapshot {
    entries: Arc<[ContextEntry]>,
    total_cost: usize,
    budget: usize,
}

// ── Implementation ────────────────────────────────────────────────────────

impl ContextBuffer {
    pub fn new(budget: usize, unit: CostUnit) -> Self {
        Self {
            entries: Vec::new(),
            budget,
            used: 0,
            next_seq: 0,
            unit,
        }
    }

    /// Append an entry, evicting lower- or equal-class entries if needed.
    ///
    /// Either the entry is accepted (after all listed evictions) or the
    /// buffer is left untouched.
    pub fn append(&mut self, entry: NewEntry) -> Result<Appended, ContextError> {
        let cost = payload_cost(&entry.payload, self.unit);
        if cost > self.budget {
            return Err(ContextError::ExceedsBudget {
                cost,
                budget: self.budget,
            });
        }

        let evicted = self.plan_eviction(entry.kind, cost)?;
        if !evicted.is_empty() {
            let freed: usize = self
                .entries
                .iter()
                .filter(|e| evicted.contains(&e.seq))
                .map(|e| e.cost)
                .sum();
            self.entries.retain(|e| !evicted.contains(&e.seq));
            self.used -= freed;
        }

        let seq = self.next_seq;
        self.next_seq += 1;
        self.used += cost;
        self.entries.push(ContextEntry {
            seq,
            kind: entry.kind,
            origin: entry.origin,
            capability: entry.capability,
            topic: entry.topic,
            language: entry.language,
            payload: entry.payload,
            cost,
            created_at: Utc::now(),
        });

        debug_assert!(self.used <= self.budget);
        Ok(Appended { seq, evicted })
    }

    /// Pick victims by (class, seq) ascending until `cost` fits.
    fn plan_eviction(&self, kind: EntryKind, cost: usize) -> Result<Vec<u64>, ContextError> {
        if self.used + cost <= self.budget {
            return Ok(Vec::new());
        }
        let needed = self.used + cost - self.budget;

        let mut candidates: Vec<&ContextEntry> =
            self.entries.iter().filter(|e| e.kind <= kind).collect();
        candidates.sort_by_key(|e| (e.kind, e.seq));

        let mut freed = 0;
        let mut victims = Vec::new();
        for candidate in candidates {
            if freed >= needed {
                break;
            }
            freed += candidate.cost;
            victims.push(candidate.seq);
        }

        if freed < needed {
            return Err(ContextError::NoRoom {
                cost,
                used: self.used,
                budget: self.budget,
            });
        }
        Ok(victims)
    }

    pub fn snapshot(&self) -> ContextSnapshot {
        ContextSnapshot {
            entries: self.entries.clone().into(),
            total_cost: self.used,
            budget: self.budget,
        }
    }

    pub fn total_cost(&self) -> usize {
        self.used
    }

    pub fn budget(&self) -> usize {
        self.budget
    }

    pub fn entries(&self) -> &[ContextEntry] {
        &self.entries
    }

    pub fn len(&self) -> usize {
        self.entries.len()
    }

    pub fn is_empty(&self) -> bool {
        self.entries.is_empty()
    }
}

impl ContextSnapshot {
    pub fn empty(budget: usize) -> Self {
        Self {
            entries: Arc::from(Vec::new()),
            total_cost: 0,
            budget,
        }
    }

    pub fn entries(&self) -> &[ContextEntry] {
        &self.entries
    }

    pub fn iter(&self) -> impl Iterator<Item = &ContextEntry> {
        self.entries.iter()
    }

    pub fn retrieval(&self) -> impl Iterator<Item = &ContextEntry> {
        self.entries
            .iter()
            .filter(|e| e.kind == EntryKind::Retrieval)
    }

    pub fn has_retrieval(&self) -> bool {
        self.retrieval().next().is_some()
    }

    /// Retrieval text in insertion order, joined by blank lines.
    pub fn evidence_text(&self) -> String {
        self.retrieval()
            .filter_map(|e| e.payload.as_text())
            .collect::<Vec<_>>()
            .join("\n\n")
    }

    pub fn total_cost(&self) -> usize {
        self.total_cost
    }

    pub fn budget(&self) -> usize {
        self.budget
    }

    pub fn len(&self) -> usize {
        self.entries.len()
    }

    pub fn is_empty(&self) -> bool {
        self.entries.is_empty()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use rand::rngs::StdRng;
    use rand::{Rng, SeedableRng};

    fn sized(kind: EntryKind, cost: usize) -> NewEntry {
        let payload = Payload::text("x".repeat(cost));
        match kind {
            EntryKind::PlanNote => NewEntry::plan_note("x".repeat(cost)),
            EntryKind::Retrieval => NewEntry::retrieval("search", "topic", payload),
            EntryKind::PluginOutput => {
                NewEntry::plugin_output("translate", CapabilityKind::Translation, "fr", payload)
            }
        }
    }

    #[test]
    fn second_entry_evicts_first_when_over_budget() {
        let mut buf = ContextBuffer::new(100, CostUnit::Bytes);

        let first = buf.append(sized(EntryKind::Retrieval, 60)).unwrap();
        assert_eq!(first, Appended { seq: 0, evicted: vec![] });
        assert_eq!(buf.total_cost(), 60);

        let second = buf.append(sized(EntryKind::Retrieval, 60)).unwrap();
        assert_eq!(second, Appended { seq: 1, evicted: vec![0] });
        assert_eq!(buf.total_cost(), 60);
        assert_eq!(buf.entries()[0].seq, 1);
    }

    #[test]
    fn entry_larger_than_budget_is_rejected() {
        let mut buf = ContextBuffer::new(100, CostUnit::Bytes);
        buf.append(sized(EntryKind::Retrieval, 10)).unwrap();

        let err = buf.append(sized(EntryKind::PluginOutput, 101)).unwrap_err();
        assert_eq!(err, ContextError::ExceedsBudget { cost: 101, budget: 100 });
        assert_eq!(buf.len(), 1);
        assert_eq!(buf.total_cost(), 10);
    }

    #[test]
    fn plan_notes_go_before_retrieval() {
        let mut buf = ContextBuffer::new(100, CostUnit::Bytes);
        buf.append(sized(EntryKind::Retrieval, 30)).unwrap(); // seq 0
        buf.append(sized(EntryKind::PlanNote, 30)).unwrap(); // seq 1
        buf.append(sized(EntryKind::Retrieval, 30)).unwrap(); // seq 2

        let appended = buf.append(sized(EntryKind::Retrieval, 50)).unwrap();
        assert_eq!(appended.evicted, vec![1, 0]);
        let seqs: Vec<u64> = buf.entries().iter().map(|e| e.seq).collect();
        assert_eq!(seqs, vec![2, 3]);
        assert_eq!(buf.total_cost(), 80);
    }

    #[test]
    fn retrieval_never_evicts_plugin_output() {
        let mut buf = ContextBuffer::new(100, CostUnit::Bytes);
        buf.append(sized(EntryKind::PluginOutput, 80)).unwrap();

        let err = buf.append(sized(EntryKind::Retrieval, 30)).unwrap_err();
        assert_eq!(
            err,
            ContextError::NoRoom {
                cost: 30,
                used: 80,
                budget: 100
            }
        );
        assert_eq!(buf.len(), 1);
    }

    #[test]
    fn rejected_append_evicts_nothing() {
        let mut buf = ContextBuffer::new(100, CostUnit::Bytes);
        buf.append(sized(EntryKind::PlanNote, 20)).unwrap();
        buf.append(sized(EntryKind::PluginOutput, 70)).unwrap();

        // Evicting the plan note frees 20, still 30 short.
        assert!(buf.append(sized(EntryKind::Retrieval, 40)).is_err());
        assert_eq!(buf.len(), 2);
        assert_eq!(buf.total_cost(), 90);
    }

    #[test]
    fn plugin_output_evicts_lower_classes_first() {
        let mut buf = ContextBuffer::new(100, CostUnit::Bytes);
        buf.append(sized(EntryKind::PluginOutput, 40)).unwrap(); // seq 0
        buf.append(sized(EntryKind::Retrieval, 40)).unwrap(); // seq 1
        buf.append(sized(EntryKind::PlanNote, 10)).unwrap(); // seq 2

        let appended = buf.append(sized(EntryKind::PluginOutput, 50)).unwrap();
        assert_eq!(appended.evicted, vec![2, 1]);
        assert_eq!(buf.total_cost(), 90);
    }

    #[test]
    fn sequence_numbers_skip_nothing_on_rejection() {
        let mut buf = ContextBuffer::new(10, CostUnit::Bytes);
        buf.append(sized(EntryKind::Retrieval, 5)).unwrap();
        assert!(buf.append(sized(EntryKind::Retrieval, 11)).is_err());
        let next = buf.append(sized(EntryKind::Retrieval, 5)).unwrap();
        assert_eq!(next.seq, 1);
    }

    #[test]
    fn snapshot_is_isolated_from_later_appends() {
        let mut buf = ContextBuffer::new(100, CostUnit::Bytes);
        buf.append(sized(EntryKind::Retrieval, 10)).unwrap();
        let snap = buf.snapshot();
        buf.append(sized(EntryKind::Retrieval, 10)).unwrap();

        assert_eq!(snap.len(), 1);
        assert_eq!(snap.total_cost(), 10);
        assert!(snap.has_retrieval());
        assert_eq!(buf.len(), 2);
    }

    #[test]
    fn evidence_text_skips_other_kinds() {
        let mut buf = ContextBuffer::new(1000, CostUnit::Tokens);
        buf.append(NewEntry::retrieval("a", "t", Payload::text("first"))).unwrap();
        buf.append(NewEntry::plan_note("note")).unwrap();
        buf.append(NewEntry::retrieval("b", "t", Payload::text("second"))).unwrap();
        assert_eq!(buf.snapshot().evidence_text(), "first\n\nsecond");
    }

    fn random_entry(rng: &mut StdRng) -> NewEntry {
        let kind = match rng.random_range(0..3) {
            0 => EntryKind::PlanNote,
            1 => EntryKind::Retrieval,
            _ => EntryKind::PluginOutput,
        };
        sized(kind, rng.random_range(1..=120))
    }

    #[test]
    fn budget_holds_for_random_sequences() {
        for seed in 0..200 {
            let mut rng = StdRng::seed_from_u64(seed);
            let mut buf = ContextBuffer::new(100, CostUnit::Bytes);
            let mut last_seq = None;
            for _ in 0..50 {
                let before = buf.total_cost();
                match buf.append(random_entry(&mut rng)) {
                    Ok(appended) => {
                        assert!(last_seq.is_none_or(|s| appended.seq > s));
                        last_seq = Some(appended.seq);
                    }
                    Err(_) => assert_eq!(buf.total_cost(), before),
                }
                assert!(buf.total_cost() <= 100, "seed {seed} exceeded budget");
                let sum: usize = buf.entries().iter().map(|e| e.cost).sum();
                assert_eq!(sum, buf.total_cost());
            }
        }
    }

    #[test]
    fn eviction_is_deterministic() {
        for seed in 0..50 {
            let run = || {
                let mut rng = StdRng::seed_from_u64(seed);
                let mut buf = ContextBuffer::new(100, CostUnit::Bytes);
                let mut log = Vec::new();
                for _ in 0..40 {
                    log.push(buf.append(random_entry(&mut rng)).map(|a| a.evicted));
                }
                (log, buf.entries().iter().map(|e| e.seq).collect::<Vec<_>>())
            };
            assert_eq!(run(), run());
        }
    }
}
