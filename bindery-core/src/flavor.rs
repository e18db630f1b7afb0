use crate::error::Result;
use crate::filter::PathFilter;
use std::collections::{BTreeMap, BTreeSet};

/// Administrator-supplied mapping of flavor names to path filter chains.
///
/// A flavor names a subset of a bundle's files. The whole spec is replaced as
/// one document; there is no per-flavor history.
#[derive(Debug, Clone, Default)]
pub struct FlavorSpec {
    flavors: BTreeMap<String, PathFilter>,
}

impl FlavorSpec {
    pub fn empty() -> Self {
        Self::default()
    }

    /// Build a spec from raw rule texts, e.g. `{"mobile": ["+ */small/*", "- *"]}`.
    pub fn from_rules(rules: &BTreeMap<String, Vec<String>>) -> Result<Self> {
        let mut flavors = BTreeMap::new();
        for (name, texts) in rules {
            flavors.insert(name.clone(), PathFilter::parse(texts)?);
        }
        Ok(Self { flavors })
    }

    pub fn is_empty(&self) -> bool {
        self.flavors.is_empty()
    }

    pub fn names(&self) -> impl Iterator<Item = &str> {
        self.flavors.keys().map(|name| name.as_str())
    }

    /// The set of flavors whose filter accepts `path`.
    pub fn flavors_for(&self, path: &str) -> BTreeSet<String> {
        self.flavors
            .iter()
            .filter(|(_, filter)| filter.matches(path))
            .map(|(name, _)| name.clone())
            .collect()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::error::CatalogError;

    fn spec(entries: &[(&str, &[&str])]) -> FlavorSpec {
        let rules = entries
            .iter()
            .map(|(name, texts)| {
                (
                    name.to_string(),
                    texts.iter().map(|t| t.to_string()).collect(),
                )
            })
            .collect();
        FlavorSpec::from_rules(&rules).unwrap()
    }

    #[test]
    fn test_flavors_for_path() {
        let spec = spec(&[
            ("small", &["+ */100/*", "- *"]),
            ("large", &["+ */640/*", "- *"]),
        ]);

        let flavors = spec.flavors_for("covers/100/a.png");
        assert_eq!(flavors.into_iter().collect::<Vec<_>>(), vec!["small"]);

        assert!(spec.flavors_for("covers/300/a.png").is_empty());
    }

    #[test]
    fn test_invalid_rule_fails_whole_spec() {
        let mut rules = BTreeMap::new();
        rules.insert("bad".to_string(), vec!["? nope".to_string()]);
        let err = FlavorSpec::from_rules(&rules).unwrap_err();
        assert!(matches!(err, CatalogError::InvalidFlavorRule(_)));
    }
}
