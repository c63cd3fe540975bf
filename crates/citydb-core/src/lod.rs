//! Level-of-detail selection shared by the SQL compiler and the exporter.

use std::collections::BTreeSet;

use serde::{Deserialize, Serialize};

/// How multiple LODs in a [`LodFilter`] are combined.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum LodMode {
    /// Every listed LOD must be present.
    And,
    /// At least one listed LOD must be present.
    #[default]
    Or,
}

/// Selects which levels of detail a query or export considers.
///
/// An empty LOD set is unrestricted. `search_depth` bounds how many levels of
/// contained child features are searched for matching geometry; `None` means
/// unbounded and `Some(0)` restricts matching to the feature itself.
#[derive(Debug, Clone, PartialEq, Eq, Default, Serialize, Deserialize)]
pub struct LodFilter {
    #[serde(default)]
    lods: BTreeSet<String>,
    #[serde(default)]
    mode: LodMode,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    search_depth: Option<u32>,
}

impl LodFilter {
    /// Unrestricted filter.
    #[must_use]
    pub fn new() -> Self {
        Self::default()
    }

    #[must_use]
    pub fn with_lods<I, S>(mut self, lods: I) -> Self
    where
        I: IntoIterator<Item = S>,
        S: Into<String>,
    {
        self.lods = lods.into_iter().map(Into::into).collect();
        self
    }

    #[must_use]
    pub fn with_mode(mut self, mode: LodMode) -> Self {
        self.mode = mode;
        self
    }

    #[must_use]
    pub fn with_search_depth(mut self, depth: u32) -> Self {
        self.search_depth = Some(depth);
        self
    }

    #[must_use]
    pub fn lods(&self) -> &BTreeSet<String> {
        &self.lods
    }

    #[must_use]
    pub fn mode(&self) -> LodMode {
        self.mode
    }

    #[must_use]
    pub fn search_depth(&self) -> Option<u32> {
        self.search_depth
    }

    #[must_use]
    pub fn is_unrestricted(&self) -> bool {
        self.lods.is_empty()
    }

    /// Whether a geometry property tagged with `lod` is kept.
    ///
    /// Properties without an LOD tag are always kept.
    #[must_use]
    pub fn accepts(&self, lod: Option<&str>) -> bool {
        match lod {
            Some(lod) => self.lods.is_empty() || self.lods.contains(lod),
            None => true,
        }
    }

    /// Evaluates the filter against the set of LODs available on an object.
    #[must_use]
    pub fn matches(&self, available: &BTreeSet<String>) -> bool {
        if self.lods.is_empty() {
            return true;
        }
        match self.mode {
            LodMode::And => self.lods.iter().all(|lod| available.contains(lod)),
            LodMode::Or => self.lods.iter().any(|lod| available.contains(lod)),
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn set(items: &[&str]) -> BTreeSet<String> {
        items.iter().map(|s| s.to_string()).collect()
    }

    #[test]
    fn default_is_unrestricted_or() {
        let filter = LodFilter::new();
        assert!(filter.is_unrestricted());
        assert_eq!(filter.mode(), LodMode::Or);
        assert_eq!(filter.search_depth(), None);
        assert!(filter.matches(&set(&[])));
    }

    #[test]
    fn or_mode_needs_any_lod() {
        let filter = LodFilter::new().with_lods(["2"]);
        assert!(filter.matches(&set(&["1", "2"])));
        assert!(!filter.matches(&set(&["1"])));
    }

    #[test]
    fn and_mode_needs_all_lods() {
        let filter = LodFilter::new()
            .with_lods(["1", "2"])
            .with_mode(LodMode::And);
        assert!(filter.matches(&set(&["1", "2", "3"])));
        assert!(!filter.matches(&set(&["2"])));
    }

    #[test]
    fn deserializes_from_json() {
        let filter: LodFilter =
            serde_json::from_str(r#"{"lods": ["2", "3"], "mode": "and", "search_depth": 1}"#)
                .unwrap();
        assert_eq!(filter.mode(), LodMode::And);
        assert_eq!(filter.search_depth(), Some(1));
        assert!(serde_json::from_str::<LodFilter>(r#"{"search_depth": -1}"#).is_err());
    }
}
