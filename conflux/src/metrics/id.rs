//! Metric identity.
//!
//! A [`MetricId`] parameterizes the names a component emits metrics
//! under. Two naming schemes coexist: a dotted *hierarchical* path
//! (legacy graph stores) and an underscored *dimensional* name with
//! key/value tags. Which one a registry materializes is decided by the
//! registry's emission mode, not by the id.

/// A dimensional metric tag.
#[derive(Clone, Debug, PartialEq, Eq, PartialOrd, Ord, Hash)]
pub struct Tag {
    key: String,
    value: String,
}

impl Tag {
    /// Creates a tag from a key and value.
    pub fn new(key: impl Into<String>, value: impl Into<String>) -> Self {
        Self {
            key: key.into(),
            value: value.into(),
        }
    }

    /// Returns the tag key.
    pub fn key(&self) -> &str {
        &self.key
    }

    /// Returns the tag value.
    pub fn value(&self) -> &str {
        &self.value
    }
}

/// Identity under which a component registers its meters.
///
/// `name` qualifies dimensional metrics, `hierarchical_name` qualifies
/// dotted-path metrics; either may be absent, in which case the other
/// doubles for both schemes.
#[derive(Clone, Debug, Default)]
pub struct MetricId {
    name: Option<String>,
    hierarchical_name: Option<String>,
    tags: Vec<Tag>,
}

impl MetricId {
    /// Starts building a metric id.
    pub fn builder() -> MetricIdBuilder {
        MetricIdBuilder::default()
    }

    /// Returns the dimensional qualifier, if set.
    pub fn name(&self) -> Option<&str> {
        self.name.as_deref()
    }

    /// Returns the hierarchical qualifier, if set.
    pub fn hierarchical_name(&self) -> Option<&str> {
        self.hierarchical_name.as_deref()
    }

    /// Returns the tags attached to dimensional meters.
    pub fn tags(&self) -> &[Tag] {
        &self.tags
    }

    /// Full hierarchical path for `leaf`, e.g. `qualifier.item.pending`.
    ///
    /// An empty leaf yields the qualifier alone.
    pub fn hierarchical(&self, leaf: &str) -> String {
        let qualifier = self
            .hierarchical_name
            .as_deref()
            .or(self.name.as_deref())
            .unwrap_or_default();
        join_parts(qualifier, leaf, '.')
    }

    /// Full dimensional name for `leaf`, e.g. `qualifier_pending`.
    ///
    /// An empty leaf yields the qualifier alone.
    pub fn dimensional(&self, leaf: &str) -> String {
        let qualifier = self
            .name
            .as_deref()
            .or(self.hierarchical_name.as_deref())
            .unwrap_or_default();
        join_parts(qualifier, leaf, '_')
    }
}

fn join_parts(qualifier: &str, leaf: &str, separator: char) -> String {
    match (qualifier.is_empty(), leaf.is_empty()) {
        (false, false) => format!("{qualifier}{separator}{leaf}"),
        (false, true) => qualifier.to_string(),
        (true, _) => leaf.to_string(),
    }
}

/// Builder for [`MetricId`].
#[derive(Debug, Default)]
pub struct MetricIdBuilder {
    name: Option<String>,
    hierarchical_name: Option<String>,
    tags: Vec<Tag>,
}

impl MetricIdBuilder {
    /// Sets the dimensional qualifier.
    pub fn name(mut self, name: impl Into<String>) -> Self {
        self.name = Some(name.into());
        self
    }

    /// Sets the hierarchical qualifier.
    pub fn hierarchical_name(mut self, name: impl Into<String>) -> Self {
        self.hierarchical_name = Some(name.into());
        self
    }

    /// Attaches a tag.
    pub fn tag(mut self, tag: Tag) -> Self {
        self.tags.push(tag);
        self
    }

    /// Finalizes the id.
    pub fn build(self) -> MetricId {
        MetricId {
            name: self.name,
            hierarchical_name: self.hierarchical_name,
            tags: self.tags,
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn hierarchical_path_uses_dots() {
        let id = MetricId::builder()
            .name("collapser_dim")
            .hierarchical_name("collapser.hier")
            .build();
        assert_eq!(id.hierarchical("item.pending"), "collapser.hier.item.pending");
    }

    #[test]
    fn dimensional_name_uses_underscores() {
        let id = MetricId::builder()
            .name("collapser_dim")
            .hierarchical_name("collapser.hier")
            .build();
        assert_eq!(id.dimensional("pending"), "collapser_dim_pending");
    }

    #[test]
    fn empty_leaf_yields_qualifier() {
        let id = MetricId::builder().name("cache_request_timeouts").build();
        assert_eq!(id.dimensional(""), "cache_request_timeouts");
    }

    #[test]
    fn missing_qualifier_falls_back_to_other_scheme() {
        let id = MetricId::builder().name("only_dim").build();
        assert_eq!(id.hierarchical("leaf"), "only_dim.leaf");
    }

    #[test]
    fn tags_are_preserved_in_order() {
        let id = MetricId::builder()
            .name("m")
            .tag(Tag::new("b", "2"))
            .tag(Tag::new("a", "1"))
            .build();
        assert_eq!(id.tags()[0].key(), "b");
        assert_eq!(id.tags()[1].value(), "1");
    }
}
