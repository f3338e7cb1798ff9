//! Per-workspace tab slices, focus tracking, and lookups.
//!
//! Insertion order of a slice defines display order. Lookups skip tabs that
//! are closing or closed; the slices themselves keep such tabs until the
//! close path removes them.

use std::collections::HashMap;

use tracing::debug;

use crate::tabs::types::{Tab, TabId, WorkspaceId};

#[derive(Default)]
pub struct TabRegistry {
    tabs_by_workspace: HashMap<WorkspaceId, Vec<Tab>>,
    active_tab_by_workspace: HashMap<WorkspaceId, usize>,
}

impl TabRegistry {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn tabs(&self, ws: &str) -> &[Tab] {
        self.tabs_by_workspace
            .get(ws)
            .map(Vec::as_slice)
            .unwrap_or(&[])
    }

    pub fn tabs_mut(&mut self, ws: &str) -> Option<&mut Vec<Tab>> {
        self.tabs_by_workspace.get_mut(ws)
    }

    pub fn workspaces(&self) -> impl Iterator<Item = &WorkspaceId> {
        self.tabs_by_workspace.keys()
    }

    pub fn push_tab(&mut self, tab: Tab) {
        let ws = tab.workspace_id.clone();
        self.tabs_by_workspace.entry(ws).or_default().push(tab);
    }

    pub fn tab_by_id(&self, ws: &str, id: TabId) -> Option<&Tab> {
        self.tabs(ws)
            .iter()
            .find(|t| t.id == id && !t.closing && !t.closed)
    }

    pub fn tab_by_id_mut(&mut self, ws: &str, id: TabId) -> Option<&mut Tab> {
        self.tabs_by_workspace
            .get_mut(ws)?
            .iter_mut()
            .find(|t| t.id == id && !t.closing && !t.closed)
    }

    pub fn tab_by_session(&self, ws: &str, session_name: &str) -> Option<&Tab> {
        self.tabs(ws)
            .iter()
            .find(|t| t.session_name == session_name && !t.closing && !t.closed)
    }

    /// Position of a tab in its workspace slice, closing tabs included.
    pub fn index_of(&self, ws: &str, id: TabId) -> Option<usize> {
        self.tabs(ws).iter().position(|t| t.id == id)
    }

    pub fn active_index(&self, ws: &str) -> usize {
        self.active_tab_by_workspace.get(ws).copied().unwrap_or(0)
    }

    pub fn active_tab(&self, ws: &str) -> Option<&Tab> {
        let tabs = self.tabs(ws);
        tabs.get(self.active_index(ws).min(tabs.len().saturating_sub(1)))
    }

    pub fn active_tab_mut(&mut self, ws: &str) -> Option<&mut Tab> {
        let index = self.active_index(ws);
        let tabs = self.tabs_by_workspace.get_mut(ws)?;
        let index = index.min(tabs.len().saturating_sub(1));
        tabs.get_mut(index)
    }

    /// Focus a tab by index, recording focus time for the limit policy.
    pub fn set_active_index(&mut self, ws: &str, index: usize, now_epoch: i64) {
        let Some(tabs) = self.tabs_by_workspace.get_mut(ws) else {
            return;
        };
        if tabs.is_empty() {
            return;
        }
        let index = index.min(tabs.len() - 1);
        self.active_tab_by_workspace.insert(ws.to_string(), index);
        tabs[index].last_focused_at = Some(now_epoch);
    }

    /// Remove a tab by index, shifting the active index so the same tab (or
    /// its left neighbor, when the active tab itself was removed) stays
    /// focused.
    pub fn remove_tab(&mut self, ws: &str, index: usize) -> Option<Tab> {
        let active = self.active_index(ws);
        let tabs = self.tabs_by_workspace.get_mut(ws)?;
        if index >= tabs.len() {
            return None;
        }
        let tab = tabs.remove(index);

        let new_active = if active > index {
            active - 1
        } else if active == index && active > 0 {
            active - 1
        } else {
            active
        };
        self.active_tab_by_workspace
            .insert(ws.to_string(), new_active);

        debug!(
            event = "core.tabs.removed",
            ws = ws,
            tab = %tab.id,
            remaining = tabs.len(),
        );
        Some(tab)
    }

    /// Drop a workspace's slices entirely (workspace deleted in the host).
    pub fn cleanup_workspace(&mut self, ws: &str) -> Vec<Tab> {
        self.active_tab_by_workspace.remove(ws);
        self.tabs_by_workspace.remove(ws).unwrap_or_default()
    }

    /// All tabs across workspaces, with slice indices, for the limit policy.
    pub fn iter_all(&self) -> impl Iterator<Item = (&WorkspaceId, usize, &Tab)> {
        self.tabs_by_workspace
            .iter()
            .flat_map(|(ws, tabs)| tabs.iter().enumerate().map(move |(i, t)| (ws, i, t)))
    }

    pub fn iter_all_mut(&mut self) -> impl Iterator<Item = (&WorkspaceId, &mut Tab)> {
        self.tabs_by_workspace
            .iter_mut()
            .flat_map(|(ws, tabs)| tabs.iter_mut().map(move |t| (&*ws, t)))
    }
}
