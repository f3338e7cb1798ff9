//! Attached-tab limit: when more than `max_attached` agent tabs hold live
//! PTY clients, detach the least-recently-focused until back under the cap.
//!
//! The focused tab of the visible workspace is never auto-detached, even if
//! that means the limit stays exceeded.

use tracing::info;

use crate::lifecycle::detach::detach_tab_inner;
use crate::model::CenterPane;
use crate::tabs::{TabId, WorkspaceId};

pub fn enforce_attached_limit(pane: &mut CenterPane) {
    let max = pane.config.max_attached;
    if max == 0 {
        return;
    }

    let attached_total = pane
        .registry
        .iter_all()
        .filter(|(_, _, t)| t.is_agent() && t.attached())
        .count();
    if attached_total <= max {
        return;
    }

    let visible_ws = pane.workspace.clone();
    let protected: Option<TabId> = pane.registry.active_tab(&visible_ws).map(|t| t.id);

    // Least-recently-focused first; (ws, slice index) is the stable
    // tie-break for tabs that have never been focused.
    let mut candidates: Vec<(i64, WorkspaceId, usize, TabId)> = pane
        .registry
        .iter_all()
        .filter(|(ws, _, t)| {
            t.is_agent()
                && t.attached()
                && !(Some(t.id) == protected && **ws == visible_ws)
        })
        .map(|(ws, index, t)| (t.focus_age_key(), ws.clone(), index, t.id))
        .collect();
    candidates.sort();

    let sink = pane.sink.clone();
    let mut excess = attached_total - max;
    for (_, ws, _, id) in candidates {
        if excess == 0 {
            break;
        }
        if let Some(tab) = pane.registry.tab_by_id_mut(&ws, id) {
            info!(
                event = "core.lifecycle.limit_detach",
                ws = %ws,
                tab = %id,
                max_attached = max,
            );
            detach_tab_inner(tab, &sink);
            excess -= 1;
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::sync::Arc;

    use crate::backend::fake::FakeBackend;
    use crate::config::PaneConfig;
    use crate::messages::Message;
    use crate::model::CenterPane;
    use crate::tabs::{Tab, TabId};

    fn attached_tab(ws: &str, created_at: i64, focused_at: Option<i64>) -> Tab {
        let id = TabId::next();
        let mut tab = Tab::new(id, ws.to_string(), "claude", format!("s-{}", id), created_at);
        tab.running = true;
        tab.last_focused_at = focused_at;
        tab
    }

    fn test_pane(max_attached: usize) -> (CenterPane, tokio::sync::mpsc::UnboundedReceiver<Message>) {
        let config = PaneConfig {
            max_attached,
            ..PaneConfig::default()
        };
        CenterPane::new_for_test(config, Arc::new(FakeBackend::new()), "A".to_string())
    }

    fn drain(rx: &mut tokio::sync::mpsc::UnboundedReceiver<Message>) -> Vec<Message> {
        let mut out = Vec::new();
        while let Ok(msg) = rx.try_recv() {
            out.push(msg);
        }
        out
    }

    #[tokio::test]
    async fn test_limit_detaches_least_recently_focused_across_workspaces() {
        let (mut pane, mut rx) = test_pane(2);
        let now = 1_700_000_000;

        // Workspace A: one two-hour-old tab, one five-minute-old active tab.
        pane.registry.push_tab(attached_tab("A", 0, Some(now - 7200)));
        pane.registry.push_tab(attached_tab("A", 0, Some(now - 300)));
        pane.registry.set_active_index("A", 1, now - 300);
        // Workspace B: a 45-minute-old tab.
        pane.registry.push_tab(attached_tab("B", 0, Some(now - 2700)));
        let oldest = pane.registry.tabs("A")[0].id;

        enforce_attached_limit(&mut pane);

        let detached: Vec<TabId> = drain(&mut rx)
            .into_iter()
            .filter_map(|m| match m {
                Message::TabDetached { id, .. } => Some(id),
                _ => None,
            })
            .collect();
        assert_eq!(detached, vec![oldest], "exactly the t-2h tab detaches");

        assert!(!pane.registry.tabs("A")[0].attached());
        assert!(pane.registry.tabs("A")[1].attached());
        assert!(pane.registry.tabs("B")[0].attached());
    }

    #[tokio::test]
    async fn test_limit_never_detaches_visible_active_tab() {
        let (mut pane, mut rx) = test_pane(1);
        let now = 1_700_000_000;

        // The active tab in the visible workspace is the oldest of two.
        pane.registry.push_tab(attached_tab("A", 0, Some(now - 7200)));
        pane.registry.push_tab(attached_tab("A", 0, Some(now - 60)));
        pane.registry.set_active_index("A", 0, now - 7200);

        enforce_attached_limit(&mut pane);

        let detached: Vec<TabId> = drain(&mut rx)
            .into_iter()
            .filter_map(|m| match m {
                Message::TabDetached { id, .. } => Some(id),
                _ => None,
            })
            .collect();
        // The newer, non-active tab is the only candidate.
        assert_eq!(detached, vec![pane.registry.tabs("A")[1].id]);
        assert!(pane.registry.tabs("A")[0].attached());
    }

    #[tokio::test]
    async fn test_limit_detaches_multiple_when_excess_is_larger() {
        let (mut pane, mut rx) = test_pane(1);
        let now = 1_700_000_000;

        pane.registry.push_tab(attached_tab("A", 0, Some(now - 9000)));
        pane.registry.push_tab(attached_tab("A", 0, Some(now - 6000)));
        pane.registry.push_tab(attached_tab("A", 0, Some(now - 10)));
        pane.registry.set_active_index("A", 2, now - 10);

        enforce_attached_limit(&mut pane);

        let detached = drain(&mut rx)
            .into_iter()
            .filter(|m| matches!(m, Message::TabDetached { .. }))
            .count();
        assert_eq!(detached, 2);
        assert!(pane.registry.tabs("A")[2].attached(), "active tab survives");
        assert!(!pane.registry.tabs("A")[0].attached());
        assert!(!pane.registry.tabs("A")[1].attached());
    }

    #[tokio::test]
    async fn test_limit_disabled_when_zero() {
        let (mut pane, mut rx) = test_pane(0);
        for _ in 0..5 {
            pane.registry.push_tab(attached_tab("A", 0, None));
        }
        enforce_attached_limit(&mut pane);
        assert!(drain(&mut rx).is_empty());
    }

    #[tokio::test]
    async fn test_limit_ties_break_on_creation_time_then_slice_order() {
        let (mut pane, mut rx) = test_pane(1);
        // Never-focused tabs fall back to created_at.
        pane.registry.push_tab(attached_tab("B", 500, None));
        pane.registry.push_tab(attached_tab("B", 100, None));
        pane.workspace = "A".to_string();

        enforce_attached_limit(&mut pane);
        let detached: Vec<TabId> = drain(&mut rx)
            .into_iter()
            .filter_map(|m| match m {
                Message::TabDetached { id, .. } => Some(id),
                _ => None,
            })
            .collect();
        assert_eq!(detached, vec![pane.registry.tabs("B")[1].id]);
    }
}
