//! Output tabs: independent scrollback buffers addressed by id or route.

use std::collections::BTreeMap;

use serde::{Deserialize, Serialize};

use crate::session::PersistedTab;

/// Stable identifier of an output tab (`command-001`, `logs-002`, ...).
pub type TabId = String;

/// Logical output category used to find "the" current tab without an id.
#[derive(Clone, Copy, Debug, PartialEq, Eq, PartialOrd, Ord, Hash, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum Route {
    /// Short-lived, one-shot command results
    Command,
    /// Long-running process output (dev server, compose up)
    Logs,
}

impl Route {
    pub fn as_str(&self) -> &'static str {
        match self {
            Route::Command => "command",
            Route::Logs => "logs",
        }
    }

    pub fn parse(value: &str) -> Option<Self> {
        match value {
            "command" => Some(Route::Command),
            "logs" => Some(Route::Logs),
            _ => None,
        }
    }

    /// Title used when a tab is created or reset without one.
    pub fn default_title(&self) -> &'static str {
        match self {
            Route::Command => "Command",
            Route::Logs => "Logs",
        }
    }

    /// Logs follow the tail by default, command results do not.
    pub fn default_autoscroll(&self) -> bool {
        matches!(self, Route::Logs)
    }

    pub fn other(&self) -> Self {
        match self {
            Route::Command => Route::Logs,
            Route::Logs => Route::Command,
        }
    }
}

impl std::fmt::Display for Route {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.write_str(self.as_str())
    }
}

/// Where the view of a tab is anchored.
#[derive(Clone, Copy, Debug, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum ScrollOrigin {
    /// Pinned to a concrete column/line.
    Fixed { x: usize, y: usize },
    /// Show the newest content. On a frozen (non-autoscroll) tab this
    /// resolves to the tail once and then becomes `Fixed`.
    #[default]
    FollowTail,
}

/// Addressing mode for [`TabStore::resolve`].
#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub enum TabSelector<'a> {
    /// The globally active tab, falling back to the newest tab.
    Current,
    /// The most recent tab on a route.
    Route(Route),
    /// A concrete tab id.
    Id(&'a str),
}

impl<'a> TabSelector<'a> {
    /// `""` is the current tab, a route name selects the route, anything
    /// else is treated as an id.
    pub fn parse(value: &'a str) -> Self {
        let value = value.trim();
        if value.is_empty() {
            return TabSelector::Current;
        }
        match Route::parse(value) {
            Some(route) => TabSelector::Route(route),
            None => TabSelector::Id(value),
        }
    }
}

#[derive(Clone, Debug, PartialEq, Eq)]
pub struct OutputTab {
    pub id: TabId,
    pub route: Route,
    pub title: String,
    pub text: String,
    pub autoscroll: bool,
    pub origin: ScrollOrigin,
}

impl OutputTab {
    fn new(id: TabId, route: Route, title: &str, autoscroll: bool) -> Self {
        Self {
            id,
            route,
            title: title_or_default(title, route),
            text: String::new(),
            autoscroll,
            origin: ScrollOrigin::FollowTail,
        }
    }

    /// Number of logical lines in the buffer.
    pub fn line_count(&self) -> usize {
        crate::interact::output_lines(&self.text).len()
    }

    fn last_line(&self) -> usize {
        self.line_count().saturating_sub(1)
    }

    /// Line the operator is looking at: the pinned line, or the last line
    /// when following the tail. Autoscroll always wins over a pinned origin.
    pub fn current_line(&self) -> usize {
        match self.origin {
            ScrollOrigin::Fixed { y, .. } if !self.autoscroll => y.min(self.last_line()),
            _ => self.last_line(),
        }
    }

    /// Resolve the top line to render for a viewport of `height` lines.
    ///
    /// A frozen tab whose origin is still `FollowTail` is pinned at the
    /// tail here, so later appends do not move it.
    pub fn resolve_origin(&mut self, height: usize) -> usize {
        let tail_top = self.line_count().saturating_sub(height.max(1));
        if self.autoscroll {
            return tail_top;
        }
        match self.origin {
            ScrollOrigin::Fixed { y, .. } => y.min(tail_top),
            ScrollOrigin::FollowTail => {
                self.origin = ScrollOrigin::Fixed { x: 0, y: tail_top };
                tail_top
            }
        }
    }
}

fn title_or_default(title: &str, route: Route) -> String {
    let title = title.trim();
    if title.is_empty() {
        route.default_title().to_string()
    } else {
        title.to_string()
    }
}

/// Owns every output tab, their creation order and the route mapping.
///
/// Only the UI-owning context mutates a `TabStore`. Every mutation that
/// matters for a later session save sets the dirty flag.
#[derive(Debug, Default)]
pub struct TabStore {
    tabs: BTreeMap<TabId, OutputTab>,
    order: Vec<TabId>,
    routes: BTreeMap<Route, TabId>,
    active: Option<TabId>,
    counter: u32,
    dirty: bool,
}

impl TabStore {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn len(&self) -> usize {
        self.order.len()
    }

    pub fn is_empty(&self) -> bool {
        self.order.is_empty()
    }

    pub fn get(&self, id: &str) -> Option<&OutputTab> {
        self.tabs.get(id)
    }

    pub fn get_mut(&mut self, id: &str) -> Option<&mut OutputTab> {
        self.tabs.get_mut(id)
    }

    /// Tab ids in creation order.
    pub fn order(&self) -> &[TabId] {
        &self.order
    }

    /// Tabs in creation order.
    pub fn iter(&self) -> impl Iterator<Item = &OutputTab> {
        self.order.iter().filter_map(|id| self.tabs.get(id))
    }

    /// Newest first, as shown in a tab picker.
    pub fn picker_order(&self) -> Vec<TabId> {
        self.order.iter().rev().cloned().collect()
    }

    pub fn active_id(&self) -> Option<&str> {
        self.active.as_deref().filter(|id| self.tabs.contains_key(*id))
    }

    pub fn active(&self) -> Option<&OutputTab> {
        self.active_id().and_then(|id| self.tabs.get(id))
    }

    /// Current tab for a route, if the route has one.
    pub fn route_tab(&self, route: Route) -> Option<&str> {
        self.routes
            .get(&route)
            .map(String::as_str)
            .filter(|id| self.tabs.contains_key(*id))
    }

    /// 0-based position of a tab in creation order.
    pub fn position(&self, id: &str) -> Option<usize> {
        self.order.iter().position(|t| t == id)
    }

    pub fn is_dirty(&self) -> bool {
        self.dirty
    }

    pub fn mark_dirty(&mut self) {
        self.dirty = true;
    }

    pub fn clear_dirty(&mut self) {
        self.dirty = false;
    }

    fn latest_for_route(&self, route: Route) -> Option<TabId> {
        self.order
            .iter()
            .rev()
            .find(|id| self.tabs.get(*id).is_some_and(|t| t.route == route))
            .cloned()
    }

    /// Find the tab addressed by `selector`, optionally creating one.
    ///
    /// Unknown concrete ids are never created.
    pub fn resolve(&mut self, selector: TabSelector<'_>, create_if_missing: bool) -> Option<TabId> {
        match selector {
            TabSelector::Current => {
                if let Some(id) = self.active_id() {
                    return Some(id.to_string());
                }
                self.active = None;
                if let Some(id) = self.order.last() {
                    return Some(id.clone());
                }
                create_if_missing.then(|| {
                    self.start(Route::Command, Route::Command.default_title(), false)
                })
            }
            TabSelector::Id(id) => self.tabs.contains_key(id).then(|| id.to_string()),
            TabSelector::Route(route) => {
                if let Some(id) = self.route_tab(route) {
                    return Some(id.to_string());
                }
                self.routes.remove(&route);
                if let Some(latest) = self.latest_for_route(route) {
                    self.routes.insert(route, latest.clone());
                    return Some(latest);
                }
                create_if_missing.then(|| {
                    self.start(route, route.default_title(), route.default_autoscroll())
                })
            }
        }
    }

    /// Always create a new tab, make it active and current for its route.
    pub fn start(&mut self, route: Route, title: &str, autoscroll: bool) -> TabId {
        self.counter += 1;
        let id = format!("{}-{:03}", route.as_str(), self.counter);
        self.tabs
            .insert(id.clone(), OutputTab::new(id.clone(), route, title, autoscroll));
        self.order.push(id.clone());
        self.routes.insert(route, id.clone());
        self.active = Some(id.clone());
        self.dirty = true;
        id
    }

    pub fn start_command_tab(&mut self, title: &str) -> TabId {
        self.start(Route::Command, title, false)
    }

    pub fn start_logs_tab(&mut self, title: &str) -> TabId {
        self.start(Route::Logs, title, true)
    }

    /// Append raw text. Returns false if the tab no longer exists.
    pub fn append(&mut self, id: &str, text: &str) -> bool {
        match self.tabs.get_mut(id) {
            Some(tab) => {
                tab.text.push_str(text);
                self.dirty = true;
                true
            }
            None => false,
        }
    }

    /// Clear the text, set a new title and re-home the view to the tail.
    pub fn reset(&mut self, id: &str, title: &str) -> bool {
        match self.tabs.get_mut(id) {
            Some(tab) => {
                tab.title = title_or_default(title, tab.route);
                tab.text.clear();
                tab.origin = ScrollOrigin::FollowTail;
                self.dirty = true;
                true
            }
            None => false,
        }
    }

    /// Clear the text but keep the title.
    pub fn clear_text(&mut self, id: &str) -> bool {
        let title = match self.tabs.get(id) {
            Some(tab) => tab.title.clone(),
            None => return false,
        };
        self.reset(id, &title)
    }

    pub fn set_title(&mut self, id: &str, title: &str) -> bool {
        match self.tabs.get_mut(id) {
            Some(tab) => {
                tab.title = title_or_default(title, tab.route);
                self.dirty = true;
                true
            }
            None => false,
        }
    }

    /// Make the addressed tab active. Returns the newly active id.
    pub fn switch(&mut self, selector: TabSelector<'_>) -> Option<TabId> {
        let id = self.resolve(selector, false)?;
        if self.active.as_deref() != Some(id.as_str()) {
            self.active = Some(id.clone());
            self.dirty = true;
        }
        Some(id)
    }

    /// Remove a tab, repairing the route mapping and the active tab.
    pub fn close(&mut self, id: &str) -> bool {
        let Some(idx) = self.position(id) else {
            return false;
        };
        self.tabs.remove(id);
        self.order.remove(idx);

        let stale: Vec<Route> = self
            .routes
            .iter()
            .filter(|(_, mapped)| mapped.as_str() == id)
            .map(|(route, _)| *route)
            .collect();
        for route in stale {
            match self.latest_for_route(route) {
                Some(latest) => {
                    self.routes.insert(route, latest);
                }
                None => {
                    self.routes.remove(&route);
                }
            }
        }

        if self.active.as_deref() == Some(id) || self.active_id().is_none() {
            self.active = if self.order.is_empty() {
                None
            } else {
                Some(self.order[idx.min(self.order.len() - 1)].clone())
            };
        }
        self.dirty = true;
        true
    }

    /// Activate the next tab in creation order, wrapping around.
    pub fn next(&mut self) -> Option<TabId> {
        self.cycle(1)
    }

    /// Activate the previous tab in creation order, wrapping around.
    pub fn prev(&mut self) -> Option<TabId> {
        self.cycle(-1)
    }

    fn cycle(&mut self, delta: isize) -> Option<TabId> {
        if self.order.is_empty() {
            return None;
        }
        let len = self.order.len() as isize;
        let next = match self.active_id().and_then(|id| self.position(id)) {
            Some(idx) => (idx as isize + delta).rem_euclid(len) as usize,
            None if delta >= 0 => 0,
            None => self.order.len() - 1,
        };
        let id = self.order[next].clone();
        self.active = Some(id.clone());
        self.dirty = true;
        Some(id)
    }

    /// Flip between the command and logs routes.
    pub fn toggle_route(&mut self) -> Option<TabId> {
        let route = self.active()?.route.other();
        self.switch(TabSelector::Route(route))
    }

    /// Stop autoscrolling and pin the view at the current last line.
    pub fn freeze_at_current_position(&mut self, id: &str) -> bool {
        match self.tabs.get_mut(id) {
            Some(tab) => {
                let y = tab.current_line();
                tab.autoscroll = false;
                tab.origin = ScrollOrigin::Fixed { x: 0, y };
                self.dirty = true;
                true
            }
            None => false,
        }
    }

    /// Resume following the tail.
    pub fn follow_tail(&mut self, id: &str) -> bool {
        match self.tabs.get_mut(id) {
            Some(tab) => {
                tab.autoscroll = true;
                tab.origin = ScrollOrigin::FollowTail;
                self.dirty = true;
                true
            }
            None => false,
        }
    }

    /// Pin the view of a tab at line `y` (clamped), disabling autoscroll.
    pub fn scroll_to(&mut self, id: &str, y: usize) -> bool {
        match self.tabs.get_mut(id) {
            Some(tab) => {
                let y = y.min(tab.last_line());
                tab.autoscroll = false;
                tab.origin = ScrollOrigin::Fixed { x: 0, y };
                self.dirty = true;
                true
            }
            None => false,
        }
    }

    /// Move the view of a tab by `delta` lines.
    pub fn scroll_by(&mut self, id: &str, delta: isize) -> bool {
        let Some(current) = self.tabs.get(id).map(OutputTab::current_line) else {
            return false;
        };
        self.scroll_to(id, current.saturating_add_signed(delta))
    }

    /// Replace every tab with persisted ones, preserving their order.
    ///
    /// Ids are regenerated from a fresh counter. An active index that is
    /// missing or out of range selects the last tab.
    pub fn restore(&mut self, saved: &[PersistedTab], active: Option<usize>) {
        *self = TabStore::default();
        for tab in saved {
            let id = self.start(tab.route(), &tab.title, tab.autoscroll);
            if let Some(restored) = self.tabs.get_mut(&id) {
                restored.text = tab.text.clone();
                restored.origin = if tab.autoscroll { ScrollOrigin::FollowTail } else { tab.origin };
            }
        }
        if let Some(last) = self.order.len().checked_sub(1) {
            let idx = active.filter(|i| *i <= last).unwrap_or(last);
            self.active = Some(self.order[idx].clone());
        }
        self.dirty = false;
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn assert_consistent(store: &TabStore) {
        for route in [Route::Command, Route::Logs] {
            if let Some(id) = store.routes.get(&route) {
                let tab = store.get(id).expect("route points at a live tab");
                assert_eq!(tab.route, route);
            }
        }
        if let Some(id) = &store.active {
            assert!(store.get(id).is_some(), "active tab {id} dangles");
        }
        assert_eq!(store.order.len(), store.tabs.len());
    }

    #[test]
    fn test_start_and_route_lookup() {
        let mut store = TabStore::new();
        let cmd1 = store.start_command_tab("Command 1");
        let logs1 = store.start_logs_tab("Logs 1");
        let cmd2 = store.start_command_tab("Command 2");

        assert_eq!(cmd1, "command-001");
        assert_eq!(logs1, "logs-002");
        assert_eq!(store.len(), 3);
        assert_eq!(store.active_id(), Some(cmd2.as_str()));
        assert!(store.get(&logs1).unwrap().autoscroll);
        assert!(!store.get(&cmd1).unwrap().autoscroll);

        store.append(&cmd1, "cmd-1\n");
        store.append(&logs1, "log-1\n");
        assert_eq!(store.get(&cmd1).unwrap().text, "cmd-1\n");

        assert_eq!(store.switch(TabSelector::Route(Route::Logs)), Some(logs1.clone()));
        assert_eq!(store.active_id(), Some(logs1.as_str()));
        assert_eq!(store.resolve(TabSelector::Route(Route::Command), false), Some(cmd2));
    }

    #[test]
    fn test_resolve_creates_only_when_asked() {
        let mut store = TabStore::new();
        assert_eq!(store.resolve(TabSelector::Current, false), None);
        assert_eq!(store.resolve(TabSelector::Route(Route::Logs), false), None);
        assert_eq!(store.resolve(TabSelector::Id("command-009"), true), None);

        let logs = store.resolve(TabSelector::Route(Route::Logs), true).unwrap();
        let tab = store.get(&logs).unwrap();
        assert_eq!(tab.title, "Logs");
        assert!(tab.autoscroll);

        let current = store.resolve(TabSelector::Current, true).unwrap();
        assert_eq!(current, logs);
    }

    #[test]
    fn test_resolve_current_on_empty_creates_command_tab() {
        let mut store = TabStore::new();
        let id = store.resolve(TabSelector::Current, true).unwrap();
        let tab = store.get(&id).unwrap();
        assert_eq!(tab.route, Route::Command);
        assert!(!tab.autoscroll);
    }

    #[test]
    fn test_reset_clears_text_and_title() {
        let mut store = TabStore::new();
        let id = store.start_command_tab("Old");
        store.append(&id, "a\nb\n");
        store.scroll_to(&id, 1);
        assert!(store.reset(&id, "Run Check"));
        let tab = store.get(&id).unwrap();
        assert_eq!(tab.title, "Run Check");
        assert_eq!(tab.text, "");
        assert_eq!(tab.origin, ScrollOrigin::FollowTail);

        store.reset(&id, "  ");
        assert_eq!(store.get(&id).unwrap().title, "Command");
    }

    #[test]
    fn test_close_promotes_previous_route_tab() {
        let mut store = TabStore::new();
        let cmd1 = store.start_command_tab("cmd-1");
        let _logs = store.start_logs_tab("logs-1");
        let cmd2 = store.start_command_tab("cmd-2");

        assert!(store.close(&cmd2));
        assert_eq!(store.len(), 2);
        assert_eq!(store.resolve(TabSelector::Route(Route::Command), false), Some(cmd1.clone()));
        assert_consistent(&store);

        assert!(store.close(&cmd1));
        assert_eq!(store.route_tab(Route::Command), None);
        assert!(!store.routes.contains_key(&Route::Command));
        assert_consistent(&store);
    }

    #[test]
    fn test_close_active_activates_same_position_clamped() {
        let mut store = TabStore::new();
        let a = store.start_command_tab("a");
        let b = store.start_command_tab("b");
        let c = store.start_command_tab("c");

        store.switch(TabSelector::Id(&b));
        store.close(&b);
        assert_eq!(store.active_id(), Some(c.as_str()));

        store.close(&c);
        assert_eq!(store.active_id(), Some(a.as_str()));

        store.close(&a);
        assert_eq!(store.active_id(), None);
        assert!(store.is_empty());
        assert_consistent(&store);
    }

    #[test]
    fn test_close_inactive_keeps_active() {
        let mut store = TabStore::new();
        let a = store.start_command_tab("a");
        let b = store.start_logs_tab("b");
        store.close(&a);
        assert_eq!(store.active_id(), Some(b.as_str()));
        assert!(!store.close(&a));
    }

    #[test]
    fn test_random_start_close_sequences_never_dangle() {
        let mut store = TabStore::new();
        let mut seed: u64 = 0x2545_f491_4f6c_dd1d;
        for _ in 0..500 {
            seed ^= seed << 13;
            seed ^= seed >> 7;
            seed ^= seed << 17;
            match seed % 4 {
                0 => {
                    store.start_command_tab("c");
                }
                1 => {
                    store.start_logs_tab("l");
                }
                2 => {
                    if let Some(id) = store.active_id().map(str::to_string) {
                        store.close(&id);
                    }
                }
                _ => {
                    if !store.is_empty() {
                        let idx = (seed as usize / 4) % store.len();
                        let id = store.order()[idx].clone();
                        store.close(&id);
                    }
                }
            }
            assert_consistent(&store);
            if !store.is_empty() {
                assert!(store.active_id().is_some() || store.resolve(TabSelector::Current, false).is_some());
            }
        }
    }

    #[test]
    fn test_next_prev_wrap() {
        let mut store = TabStore::new();
        let a = store.start_command_tab("a");
        let b = store.start_logs_tab("b");
        let c = store.start_command_tab("c");

        assert_eq!(store.next(), Some(a.clone()));
        assert_eq!(store.next(), Some(b.clone()));
        assert_eq!(store.prev(), Some(a.clone()));
        assert_eq!(store.prev(), Some(c.clone()));

        store.close(&b);
        assert_eq!(store.next(), Some(a));
    }

    #[test]
    fn test_toggle_route_and_picker_order() {
        let mut store = TabStore::new();
        let cmd1 = store.start_command_tab("cmd-1");
        let logs1 = store.start_logs_tab("logs-1");
        let cmd2 = store.start_command_tab("cmd-2");

        assert_eq!(store.picker_order(), vec![cmd2.clone(), logs1.clone(), cmd1]);
        assert_eq!(store.toggle_route(), Some(logs1));
        assert_eq!(store.toggle_route(), Some(cmd2));
    }

    #[test]
    fn test_freeze_and_origin_resolution() {
        let mut store = TabStore::new();
        let id = store.start_logs_tab("Logs");
        store.append(&id, "line1\nline2\nline3\nline4");

        store.freeze_at_current_position(&id);
        let tab = store.get(&id).unwrap();
        assert!(!tab.autoscroll);
        assert_eq!(tab.origin, ScrollOrigin::Fixed { x: 0, y: 3 });

        store.reset(&id, "Logs");
        store.append(&id, "a\nb\nc\nd\ne\n");
        let tab = store.get_mut(&id).unwrap();
        assert_eq!(tab.resolve_origin(2), 3);
        assert_eq!(tab.origin, ScrollOrigin::Fixed { x: 0, y: 3 });
        tab.text.push_str("f\ng\n");
        assert_eq!(tab.resolve_origin(2), 3);
    }

    #[test]
    fn test_autoscroll_wins_over_fixed_origin() {
        let mut store = TabStore::new();
        let id = store.start_logs_tab("Logs");
        store.append(&id, "1\n2\n3\n4\n5\n");
        let tab = store.get_mut(&id).unwrap();
        tab.origin = ScrollOrigin::Fixed { x: 0, y: 0 };
        assert_eq!(tab.resolve_origin(2), 3);
        assert_eq!(tab.current_line(), 4);
    }

    #[test]
    fn test_mutations_mark_dirty() {
        let mut store = TabStore::new();
        let id = store.start_command_tab("a");
        store.clear_dirty();
        store.scroll_to(&id, 0);
        assert!(store.is_dirty());
        store.clear_dirty();
        store.switch(TabSelector::Id(&id));
        assert!(!store.is_dirty(), "switching to the already active tab is a no-op");
        store.start_command_tab("b");
        store.clear_dirty();
        store.prev();
        assert!(store.is_dirty());
    }

    #[test]
    fn test_selector_parse() {
        assert_eq!(TabSelector::parse(""), TabSelector::Current);
        assert_eq!(TabSelector::parse("logs"), TabSelector::Route(Route::Logs));
        assert_eq!(TabSelector::parse("command-001"), TabSelector::Id("command-001"));
    }
}
