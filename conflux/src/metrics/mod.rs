//! Metric registry with hierarchical and dimensional naming.
//!
//! The registry is the single meter store shared by the collapser and
//! the resilient cache. Components describe what they emit with a
//! [`MetricId`]; the registry's emission mode decides which concrete
//! name each meter materializes under:
//!
//! - *hierarchical* (default): dotted paths, no tags
//!   (`collapser.item.pending`).
//! - *dimensional*: underscored names with the id's tags
//!   (`collapser_pending{tier="standalone"}`). With the compatibility
//!   label enabled, the hierarchical path is additionally attached as
//!   the `hierarchical_id` tag so dashboards can bridge both schemes.
//!
//! Meters are queryable ([`MetricsRegistry::find`]) so tests and
//! reporters can assert on recorded values without scraping.

mod id;
mod meters;

pub use id::{MetricId, MetricIdBuilder, Tag};
pub use meters::{Counter, DistributionSummary, Timer};

use dashmap::DashMap;

/// Tag key carrying the hierarchical path on dimensional meters when
/// the compatibility label is enabled.
pub const HIERARCHICAL_ID_TAG: &str = "hierarchical_id";

#[derive(Clone, Debug, PartialEq, Eq, Hash)]
struct MeterKey {
    name: String,
    /// Sorted (key, value) pairs so tag order never splits a meter.
    tags: Vec<(String, String)>,
}

impl MeterKey {
    fn new(name: &str, tags: &[Tag]) -> Self {
        let mut tags: Vec<(String, String)> = tags
            .iter()
            .map(|tag| (tag.key().to_string(), tag.value().to_string()))
            .collect();
        tags.sort();
        Self {
            name: name.to_string(),
            tags,
        }
    }
}

#[derive(Clone, Debug)]
enum Meter {
    Counter(Counter),
    Summary(DistributionSummary),
    Timer(Timer),
}

/// Thread-safe meter registry.
#[derive(Debug, Default)]
pub struct MetricsRegistry {
    meters: DashMap<MeterKey, Meter>,
    dimensional_enabled: bool,
    compatibility_label_enabled: bool,
}

impl MetricsRegistry {
    /// Creates a registry emitting hierarchical metrics only.
    pub fn new() -> Self {
        Self::default()
    }

    /// Switches between dimensional and hierarchical emission.
    pub fn dimensional(mut self, enabled: bool) -> Self {
        self.dimensional_enabled = enabled;
        self
    }

    /// Attaches the hierarchical path as a tag on dimensional meters.
    pub fn compatibility_label(mut self, enabled: bool) -> Self {
        self.compatibility_label_enabled = enabled;
        self
    }

    /// Returns the counter registered under `name` and `tags`,
    /// creating it if absent.
    pub fn counter(&self, name: &str, tags: &[Tag]) -> Counter {
        let entry = self
            .meters
            .entry(MeterKey::new(name, tags))
            .or_insert_with(|| Meter::Counter(Counter::default()));
        match entry.value() {
            Meter::Counter(counter) => counter.clone(),
            other => {
                tracing::warn!(name, existing = ?other, "meter already registered with a different kind");
                Counter::default()
            }
        }
    }

    /// Returns the distribution summary registered under `name` and
    /// `tags`, creating it if absent.
    pub fn summary(&self, name: &str, tags: &[Tag]) -> DistributionSummary {
        let entry = self
            .meters
            .entry(MeterKey::new(name, tags))
            .or_insert_with(|| Meter::Summary(DistributionSummary::default()));
        match entry.value() {
            Meter::Summary(summary) => summary.clone(),
            other => {
                tracing::warn!(name, existing = ?other, "meter already registered with a different kind");
                DistributionSummary::default()
            }
        }
    }

    /// Returns the timer registered under `name` and `tags`, creating
    /// it if absent.
    pub fn timer(&self, name: &str, tags: &[Tag]) -> Timer {
        let entry = self
            .meters
            .entry(MeterKey::new(name, tags))
            .or_insert_with(|| Meter::Timer(Timer::default()));
        match entry.value() {
            Meter::Timer(timer) => timer.clone(),
            other => {
                tracing::warn!(name, existing = ?other, "meter already registered with a different kind");
                Timer::default()
            }
        }
    }

    /// Resolves the scheme-appropriate name and tags for a component
    /// metric with hierarchical leaf `h_leaf` and dimensional leaf
    /// `d_leaf`.
    fn qualified(&self, id: &MetricId, h_leaf: &str, d_leaf: &str) -> (String, Vec<Tag>) {
        if self.dimensional_enabled {
            let mut tags = id.tags().to_vec();
            if self.compatibility_label_enabled {
                tags.push(Tag::new(HIERARCHICAL_ID_TAG, id.hierarchical(h_leaf)));
            }
            (id.dimensional(d_leaf), tags)
        } else {
            (id.hierarchical(h_leaf), Vec::new())
        }
    }

    /// Counter for a component metric under the active naming scheme.
    pub fn qualified_counter(&self, id: &MetricId, h_leaf: &str, d_leaf: &str) -> Counter {
        let (name, tags) = self.qualified(id, h_leaf, d_leaf);
        self.counter(&name, &tags)
    }

    /// Summary for a component metric under the active naming scheme.
    pub fn qualified_summary(
        &self,
        id: &MetricId,
        h_leaf: &str,
        d_leaf: &str,
    ) -> DistributionSummary {
        let (name, tags) = self.qualified(id, h_leaf, d_leaf);
        self.summary(&name, &tags)
    }

    /// Timer for a component metric under the active naming scheme.
    pub fn qualified_timer(&self, id: &MetricId, h_leaf: &str, d_leaf: &str) -> Timer {
        let (name, tags) = self.qualified(id, h_leaf, d_leaf);
        self.timer(&name, &tags)
    }

    /// Starts a query for meters named `name`.
    pub fn find(&self, name: &str) -> MeterQuery<'_> {
        MeterQuery {
            registry: self,
            name: name.to_string(),
            tags: Vec::new(),
        }
    }
}

/// Query over registered meters, filtered by name and required tags.
#[derive(Debug)]
pub struct MeterQuery<'a> {
    registry: &'a MetricsRegistry,
    name: String,
    tags: Vec<(String, String)>,
}

impl MeterQuery<'_> {
    /// Requires the meter to carry the given tag.
    pub fn with_tag(mut self, key: impl Into<String>, value: impl Into<String>) -> Self {
        self.tags.push((key.into(), value.into()));
        self
    }

    fn locate(&self) -> Option<Meter> {
        self.registry
            .meters
            .iter()
            .find(|entry| {
                let key = entry.key();
                key.name == self.name
                    && self
                        .tags
                        .iter()
                        .all(|required| key.tags.iter().any(|have| have == required))
            })
            .map(|entry| entry.value().clone())
    }

    /// Returns the matching counter, if one is registered.
    pub fn counter(&self) -> Option<Counter> {
        match self.locate()? {
            Meter::Counter(counter) => Some(counter),
            _ => None,
        }
    }

    /// Returns the matching summary, if one is registered.
    pub fn summary(&self) -> Option<DistributionSummary> {
        match self.locate()? {
            Meter::Summary(summary) => Some(summary),
            _ => None,
        }
    }

    /// Returns the matching timer, if one is registered.
    pub fn timer(&self) -> Option<Timer> {
        match self.locate()? {
            Meter::Timer(timer) => Some(timer),
            _ => None,
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn sample_id() -> MetricId {
        MetricId::builder()
            .name("collapser_dim")
            .hierarchical_name("collapser.hier")
            .tag(Tag::new("tier", "standalone"))
            .build()
    }

    #[test]
    fn hierarchical_mode_registers_dotted_paths_without_tags() {
        let registry = MetricsRegistry::new();
        let summary = registry.qualified_summary(&sample_id(), "item.pending", "pending");
        summary.record(3.0);

        let found = registry
            .find("collapser.hier.item.pending")
            .summary()
            .unwrap();
        assert_eq!(found.count(), 1);
        assert_eq!(found.total_amount(), 3.0);
        assert!(registry.find("collapser_dim_pending").summary().is_none());
    }

    #[test]
    fn dimensional_mode_registers_tagged_meters() {
        let registry = MetricsRegistry::new().dimensional(true);
        let counter = registry.qualified_counter(&sample_id(), "item.pending", "pending");
        counter.increment();

        let found = registry
            .find("collapser_dim_pending")
            .with_tag("tier", "standalone")
            .counter()
            .unwrap();
        assert_eq!(found.value(), 1.0);
    }

    #[test]
    fn compatibility_label_attaches_hierarchical_path() {
        let registry = MetricsRegistry::new()
            .dimensional(true)
            .compatibility_label(true);
        registry
            .qualified_counter(&sample_id(), "item.pending", "pending")
            .increment();

        let found = registry
            .find("collapser_dim_pending")
            .with_tag(HIERARCHICAL_ID_TAG, "collapser.hier.item.pending")
            .counter();
        assert!(found.is_some());
    }

    #[test]
    fn same_name_and_tags_resolve_to_one_meter() {
        let registry = MetricsRegistry::new();
        let first = registry.counter("calls", &[Tag::new("op", "get")]);
        let second = registry.counter("calls", &[Tag::new("op", "get")]);
        first.increment();
        assert_eq!(second.value(), 1.0);
    }

    #[test]
    fn tag_order_does_not_split_meters() {
        let registry = MetricsRegistry::new();
        let first = registry.counter("calls", &[Tag::new("a", "1"), Tag::new("b", "2")]);
        let second = registry.counter("calls", &[Tag::new("b", "2"), Tag::new("a", "1")]);
        first.increment();
        assert_eq!(second.value(), 1.0);
    }

    #[test]
    fn query_without_required_tag_misses() {
        let registry = MetricsRegistry::new();
        registry.counter("calls", &[Tag::new("op", "get")]);
        assert!(registry
            .find("calls")
            .with_tag("op", "put")
            .counter()
            .is_none());
    }
}
