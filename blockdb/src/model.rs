//! Core data types: labels, samples, matchers, and deletion intervals.
//!
//! A series is identified by its sorted [`Labels`] set. Label sets compare
//! as ordered `(name, value)` tuples, which gives the label-set ordering
//! that cursors and block indexes rely on throughout the engine.

use std::fmt;

use regex::Regex;

use crate::error::{Error, Result};

/// A single label pair.
#[derive(Debug, Clone, PartialEq, Eq, PartialOrd, Ord, Hash)]
pub struct Label {
    pub name: String,
    pub value: String,
}

impl Label {
    pub fn new(name: impl Into<String>, value: impl Into<String>) -> Self {
        Self {
            name: name.into(),
            value: value.into(),
        }
    }
}

/// A sorted set of labels with unique, non-empty names.
///
/// Construction sorts by name and keeps the last value for duplicate names,
/// so a `Labels` is always in canonical form. Equality and ordering are
/// tuple-wise over `(name, value)` pairs.
#[derive(Debug, Clone, Default, PartialEq, Eq, PartialOrd, Ord, Hash)]
pub struct Labels(Vec<Label>);

impl Labels {
    /// Build a label set from name/value pairs, sorting and deduplicating.
    pub fn from_pairs<N, V>(pairs: impl IntoIterator<Item = (N, V)>) -> Self
    where
        N: Into<String>,
        V: Into<String>,
    {
        let mut labels: Vec<Label> = pairs
            .into_iter()
            .map(|(n, v)| Label::new(n, v))
            .filter(|l| !l.name.is_empty())
            .collect();
        labels.sort_by(|a, b| a.name.cmp(&b.name));
        labels.dedup_by(|next, prev| {
            if next.name == prev.name {
                prev.value = std::mem::take(&mut next.value);
                true
            } else {
                false
            }
        });
        Self(labels)
    }

    pub fn is_empty(&self) -> bool {
        self.0.is_empty()
    }

    pub fn len(&self) -> usize {
        self.0.len()
    }

    pub fn iter(&self) -> std::slice::Iter<'_, Label> {
        self.0.iter()
    }

    /// Value of the named label, or `None` when absent.
    pub fn get(&self, name: &str) -> Option<&str> {
        self.0
            .binary_search_by(|l| l.name.as_str().cmp(name))
            .ok()
            .map(|idx| self.0[idx].value.as_str())
    }

    pub fn contains_name(&self, name: &str) -> bool {
        self.get(name).is_some()
    }

    /// Merge `other` into this label set. On a name collision the label
    /// already present in `self` wins; the returned flag reports whether
    /// any collision occurred.
    pub fn merge(&self, other: &Labels) -> (Labels, bool) {
        let mut out = self.0.clone();
        let mut collided = false;
        for label in other.iter() {
            if self.contains_name(&label.name) {
                collided = true;
            } else {
                out.push(label.clone());
            }
        }
        out.sort_by(|a, b| a.name.cmp(&b.name));
        (Labels(out), collided)
    }

    /// Sum of the byte lengths of all names and values. Used by the store
    /// adapter to estimate frame sizes.
    pub fn byte_size(&self) -> usize {
        self.0.iter().map(|l| l.name.len() + l.value.len()).sum()
    }
}

impl fmt::Display for Labels {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{{")?;
        for (i, label) in self.0.iter().enumerate() {
            if i > 0 {
                write!(f, ", ")?;
            }
            write!(f, "{}=\"{}\"", label.name, label.value)?;
        }
        write!(f, "}}")
    }
}

impl<'a> IntoIterator for &'a Labels {
    type Item = &'a Label;
    type IntoIter = std::slice::Iter<'a, Label>;

    fn into_iter(self) -> Self::IntoIter {
        self.0.iter()
    }
}

/// A single timestamped value. Timestamps are milliseconds.
#[derive(Debug, Clone, Copy, PartialEq)]
pub struct Sample {
    pub t: i64,
    pub v: f64,
}

impl Sample {
    pub fn new(t: i64, v: f64) -> Self {
        Self { t, v }
    }
}

/// Label matcher kinds. `Re`/`Nre` are fully anchored.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum MatcherType {
    Eq,
    Neq,
    Re,
    Nre,
}

/// A label matcher against a single label name.
///
/// Regular-expression matchers are anchored to the whole value regardless
/// of the pattern: `Re("1|2")` matches `"1"` and `"2"` but not `"11"`.
/// A matcher never matches a series in which the label is absent.
#[derive(Debug, Clone)]
pub struct Matcher {
    pub typ: MatcherType,
    pub name: String,
    pub value: String,
    re: Option<Regex>,
}

impl Matcher {
    pub fn new(typ: MatcherType, name: impl Into<String>, value: impl Into<String>) -> Result<Self> {
        let name = name.into();
        let value = value.into();
        let re = match typ {
            MatcherType::Re | MatcherType::Nre => {
                let anchored = format!("^(?:{})$", value);
                Some(Regex::new(&anchored).map_err(|e| {
                    Error::InvalidInput(format!("invalid matcher regex {:?}: {}", value, e))
                })?)
            }
            MatcherType::Eq | MatcherType::Neq => None,
        };
        Ok(Self {
            typ,
            name,
            value,
            re,
        })
    }

    pub fn eq(name: impl Into<String>, value: impl Into<String>) -> Self {
        // Eq never compiles a regex, so construction cannot fail.
        Self::new(MatcherType::Eq, name, value).expect("equality matcher")
    }

    /// Whether this matcher accepts the given label value.
    pub fn matches(&self, value: &str) -> bool {
        match self.typ {
            MatcherType::Eq => self.value == value,
            MatcherType::Neq => self.value != value,
            MatcherType::Re => self.re.as_ref().is_some_and(|re| re.is_match(value)),
            MatcherType::Nre => !self.re.as_ref().is_some_and(|re| re.is_match(value)),
        }
    }

    /// Whether a series with the given label set satisfies this matcher.
    /// An absent label never matches.
    pub fn matches_labels(&self, labels: &Labels) -> bool {
        match labels.get(&self.name) {
            Some(value) => self.matches(value),
            None => false,
        }
    }
}

/// Whether a label set satisfies every matcher in the slice.
pub fn matches_all(labels: &Labels, matchers: &[Matcher]) -> bool {
    matchers.iter().all(|m| m.matches_labels(labels))
}

/// A closed time interval `[mint, maxt]`.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct Interval {
    pub mint: i64,
    pub maxt: i64,
}

impl Interval {
    pub fn new(mint: i64, maxt: i64) -> Self {
        Self { mint, maxt }
    }

    pub fn contains(&self, t: i64) -> bool {
        self.mint <= t && t <= self.maxt
    }

    pub fn overlaps(&self, other: &Interval) -> bool {
        self.mint <= other.maxt && other.mint <= self.maxt
    }
}

/// A sorted union of closed intervals.
///
/// `add` coalesces overlapping and adjacent intervals, so the set is always
/// minimal and ordered by `mint`.
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct Intervals(Vec<Interval>);

impl Intervals {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn from_iter(intervals: impl IntoIterator<Item = Interval>) -> Self {
        let mut out = Self::new();
        for iv in intervals {
            out.add(iv);
        }
        out
    }

    pub fn is_empty(&self) -> bool {
        self.0.is_empty()
    }

    pub fn iter(&self) -> std::slice::Iter<'_, Interval> {
        self.0.iter()
    }

    /// Add an interval, merging it with any overlapping or adjacent ones.
    pub fn add(&mut self, iv: Interval) {
        if iv.mint > iv.maxt {
            return;
        }
        let mut merged = iv;
        let mut out = Vec::with_capacity(self.0.len() + 1);
        let mut placed = false;
        for existing in &self.0 {
            let adjacent = (merged.maxt != i64::MAX && existing.mint == merged.maxt + 1)
                || (merged.mint != i64::MIN && existing.maxt == merged.mint - 1);
            if existing.overlaps(&merged) || adjacent {
                merged.mint = merged.mint.min(existing.mint);
                merged.maxt = merged.maxt.max(existing.maxt);
            } else if existing.maxt < merged.mint {
                out.push(*existing);
            } else {
                if !placed {
                    out.push(merged);
                    placed = true;
                }
                out.push(*existing);
            }
        }
        if !placed {
            out.push(merged);
        }
        self.0 = out;
    }

    pub fn contains(&self, t: i64) -> bool {
        self.0.iter().any(|iv| iv.contains(t))
    }

    /// Whether the union fully covers `[mint, maxt]`.
    pub fn covers(&self, mint: i64, maxt: i64) -> bool {
        let mut next = mint;
        for iv in &self.0 {
            if iv.mint > next {
                return false;
            }
            if iv.maxt >= next {
                if iv.maxt >= maxt {
                    return true;
                }
                // Closed intervals: coverage resumes at maxt + 1.
                next = iv.maxt + 1;
            }
        }
        false
    }

    pub fn overlaps(&self, other: &Interval) -> bool {
        self.0.iter().any(|iv| iv.overlaps(other))
    }

    /// The union restricted to `[mint, maxt]`.
    pub fn intersect(&self, mint: i64, maxt: i64) -> Intervals {
        let mut out = Intervals::new();
        for iv in &self.0 {
            let lo = iv.mint.max(mint);
            let hi = iv.maxt.min(maxt);
            if lo <= hi {
                out.add(Interval::new(lo, hi));
            }
        }
        out
    }
}

impl fmt::Display for Intervals {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "[")?;
        for (i, iv) in self.0.iter().enumerate() {
            if i > 0 {
                write!(f, " ")?;
            }
            write!(f, "{{{} {}}}", iv.mint, iv.maxt)?;
        }
        write!(f, "]")
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn should_sort_and_deduplicate_labels() {
        // given
        let labels = Labels::from_pairs([("b", "2"), ("a", "1"), ("b", "3")]);

        // when/then
        assert_eq!(labels.len(), 2);
        assert_eq!(labels.get("a"), Some("1"));
        assert_eq!(labels.get("b"), Some("3"));
    }

    #[test]
    fn should_order_label_sets_tuple_wise() {
        // given
        let a = Labels::from_pairs([("a", "1")]);
        let b = Labels::from_pairs([("a", "1"), ("b", "1")]);
        let c = Labels::from_pairs([("a", "2")]);

        // then
        assert!(a < b);
        assert!(b < c);
    }

    #[test]
    fn should_format_labels_like_change_log_lines() {
        // given
        let labels = Labels::from_pairs([("a", "1"), ("b", "2")]);

        // then
        assert_eq!(labels.to_string(), "{a=\"1\", b=\"2\"}");
    }

    #[test]
    fn should_keep_intrinsic_label_on_merge_collision() {
        // given
        let intrinsic = Labels::from_pairs([("a", "1"), ("region", "local")]);
        let external = Labels::from_pairs([("region", "eu-west"), ("env", "prod")]);

        // when
        let (merged, collided) = intrinsic.merge(&external);

        // then
        assert!(collided);
        assert_eq!(merged.get("region"), Some("local"));
        assert_eq!(merged.get("env"), Some("prod"));
    }

    #[test]
    fn should_anchor_regex_matchers() {
        // given
        let m = Matcher::new(MatcherType::Re, "a", "1|2").unwrap();

        // then
        assert!(m.matches("1"));
        assert!(m.matches("2"));
        assert!(!m.matches("11"));
        assert!(!m.matches("12"));
    }

    #[test]
    fn should_not_match_absent_label() {
        // given
        let labels = Labels::from_pairs([("a", "1")]);
        let neq = Matcher::new(MatcherType::Neq, "b", "x").unwrap();

        // then: a matcher on an absent label never matches, even Neq
        assert!(!neq.matches_labels(&labels));
    }

    #[test]
    fn should_union_overlapping_intervals() {
        // given
        let mut ivs = Intervals::new();

        // when
        ivs.add(Interval::new(0, 5));
        ivs.add(Interval::new(10, 20));
        ivs.add(Interval::new(4, 12));

        // then
        assert_eq!(ivs.iter().count(), 1);
        assert!(ivs.contains(0));
        assert!(ivs.contains(20));
        assert!(!ivs.contains(21));
    }

    #[test]
    fn should_merge_adjacent_intervals() {
        // given
        let mut ivs = Intervals::new();

        // when
        ivs.add(Interval::new(0, 5));
        ivs.add(Interval::new(6, 9));

        // then
        assert!(ivs.covers(0, 9));
        assert_eq!(ivs.iter().count(), 1);
    }

    #[test]
    fn should_detect_full_coverage() {
        // given
        let ivs = Intervals::from_iter([Interval::new(i64::MIN, i64::MAX)]);

        // then
        assert!(ivs.covers(0, 20));
    }

    #[test]
    fn should_detect_partial_coverage() {
        // given
        let ivs = Intervals::from_iter([Interval::new(10, 11)]);

        // then
        assert!(!ivs.covers(0, 20));
        assert!(ivs.covers(10, 11));
    }

    #[test]
    fn should_clamp_intervals_on_intersect() {
        // given
        let ivs = Intervals::from_iter([Interval::new(i64::MIN, i64::MAX)]);

        // when
        let clamped = ivs.intersect(0, 20);

        // then
        assert_eq!(clamped.to_string(), "[{0 20}]");
    }

    #[test]
    fn should_format_multiple_intervals_space_separated() {
        // given
        let ivs = Intervals::from_iter([Interval::new(0, 5), Interval::new(10, 11)]);

        // then
        assert_eq!(ivs.to_string(), "[{0 5} {10 11}]");
    }
}
