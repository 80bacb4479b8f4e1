// Region registry - visible region list and current selection
use crate::domain::region::{Region, RegionKey, fallback_regions};
use serde::Deserialize;

/// How a caller wants the selection moved after (or without) a refresh.
#[derive(Debug, Clone, PartialEq, Eq, Deserialize)]
#[serde(rename_all = "camelCase")]
pub enum SelectQuery {
    Key(RegionKey),
    ProjectId(String),
}

impl SelectQuery {
    fn matches(&self, region: &Region) -> bool {
        match self {
            SelectQuery::Key(key) => region.key() == *key,
            SelectQuery::ProjectId(project_id) => match &region.source_project_id {
                Some(source_id) => source_id == project_id,
                None => region.id.to_string() == *project_id,
            },
        }
    }
}

#[derive(Debug, Clone)]
pub struct RegionRegistry {
    regions: Vec<Region>,
    selected: Option<Region>,
}

impl Default for RegionRegistry {
    fn default() -> Self {
        Self::new()
    }
}

impl RegionRegistry {
    /// Starts with the built-in fallback list and its first region selected.
    pub fn new() -> Self {
        let regions = fallback_regions();
        let selected = regions.first().cloned();
        Self { regions, selected }
    }

    pub fn regions(&self) -> &[Region] {
        &self.regions
    }

    pub fn selected(&self) -> Option<&Region> {
        self.selected.as_ref()
    }

    pub fn find(&self, key: &RegionKey) -> Option<&Region> {
        self.regions.iter().find(|r| r.key() == *key)
    }

    /// Replace the visible list. Telemetry is untouched here.
    ///
    /// An empty `new_list` keeps the current list (or the fallback list when the
    /// current one is empty). Selection moves to the `select_query` match when
    /// there is one. Otherwise a selected region that is still listed picks up
    /// its refreshed record and any other selection is left as it was. Returns
    /// whether the selection changed.
    pub fn reconcile(&mut self, new_list: Vec<Region>, select_query: Option<&SelectQuery>) -> bool {
        if new_list.is_empty() {
            tracing::debug!("Region source returned no usable regions, keeping current list");
            if self.regions.is_empty() {
                self.regions = fallback_regions();
            }
        } else {
            self.regions = new_list;
        }

        let previous = self.selected.as_ref().map(Region::key);

        let matched = select_query.and_then(|q| self.regions.iter().find(|r| q.matches(r)).cloned());
        if let Some(region) = matched {
            self.selected = Some(region);
        } else if let Some(key) = &previous {
            if let Some(refreshed) = self.find(key).cloned() {
                self.selected = Some(refreshed);
            }
        } else {
            self.selected = self.regions.first().cloned();
        }

        previous != self.selected.as_ref().map(Region::key)
    }

    /// Select a listed region. Unknown queries leave the selection unchanged.
    pub fn select(&mut self, query: &SelectQuery) -> Option<&Region> {
        let region = self.regions.iter().find(|r| query.matches(r)).cloned()?;
        self.selected = Some(region);
        self.selected.as_ref()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::domain::region::RegionStatus;

    fn project_region(id: u32, project_id: &str) -> Region {
        Region {
            id,
            source_project_id: Some(project_id.to_string()),
            name: format!("Project {}", project_id),
            country: "Peru".to_string(),
            latitude: -12.0,
            longitude: -70.0,
            status: RegionStatus::Healthy,
            coverage_percent: 70.0,
        }
    }

    #[test]
    fn test_starts_with_fallback_selection() {
        let registry = RegionRegistry::new();
        assert_eq!(registry.regions().len(), 4);
        assert_eq!(registry.selected().unwrap().name, "Amazon Basin North");
    }

    #[test]
    fn test_reconcile_selects_query_match() {
        let mut registry = RegionRegistry::new();
        let changed = registry.reconcile(
            vec![project_region(1, "a"), project_region(2, "b")],
            Some(&SelectQuery::ProjectId("b".to_string())),
        );

        assert!(changed);
        assert_eq!(registry.selected().unwrap().key(), RegionKey::Project("b".to_string()));
    }

    #[test]
    fn test_reconcile_unmatched_hint_keeps_selection() {
        let mut registry = RegionRegistry::new();
        registry.reconcile(vec![project_region(1, "a"), project_region(2, "b")], None);
        registry.select(&SelectQuery::Key(RegionKey::Project("b".to_string())));

        let changed = registry.reconcile(
            vec![project_region(1, "a"), project_region(2, "b")],
            Some(&SelectQuery::ProjectId("missing".to_string())),
        );

        assert!(!changed);
        assert_eq!(registry.selected().unwrap().key(), RegionKey::Project("b".to_string()));
    }

    #[test]
    fn test_reconcile_refreshes_selected_record() {
        let mut registry = RegionRegistry::new();
        registry.reconcile(vec![project_region(1, "a")], None);
        registry.select(&SelectQuery::Key(RegionKey::Project("a".to_string())));

        let mut moved = project_region(2, "a");
        moved.coverage_percent = 12.0;
        registry.reconcile(vec![project_region(1, "z"), moved], None);

        let selected = registry.selected().unwrap();
        assert_eq!(selected.id, 2);
        assert_eq!(selected.coverage_percent, 12.0);
    }

    #[test]
    fn test_reconcile_with_empty_list_keeps_regions() {
        let mut registry = RegionRegistry::new();
        registry.reconcile(vec![project_region(1, "a")], None);
        registry.reconcile(Vec::new(), None);
        assert_eq!(registry.regions().len(), 1);

        let mut empty = RegionRegistry {
            regions: Vec::new(),
            selected: None,
        };
        empty.reconcile(Vec::new(), None);
        assert_eq!(empty.regions().len(), 4);
        assert!(empty.selected().is_some());
    }

    #[test]
    fn test_select_unknown_is_noop() {
        let mut registry = RegionRegistry::new();
        assert!(registry.select(&SelectQuery::Key(RegionKey::Position(99))).is_none());
        assert_eq!(registry.selected().unwrap().id, 1);
    }

    #[test]
    fn test_select_query_json() {
        let query: SelectQuery = serde_json::from_str(r#"{"projectId":"p-7"}"#).unwrap();
        assert_eq!(query, SelectQuery::ProjectId("p-7".to_string()));

        let query: SelectQuery = serde_json::from_str(r#"{"key":"region:2"}"#).unwrap();
        assert_eq!(query, SelectQuery::Key(RegionKey::Position(2)));
    }
}
