/*
 *  registry.rs
 *
 *  dialbridge - one poll, many widgets
 *  (c) 2020-26 Stuart Hunter
 *
 *  The set of visible widgets, keyed by host id
 *
 *  This program is free software: you can redistribute it and/or modify
 *  it under the terms of the GNU General Public License as published by
 *  the Free Software Foundation, either version 3 of the License, or
 *  (at your option) any later version.
 *
 *  This program is distributed in the hope that it will be useful,
 *  but WITHOUT ANY WARRANTY; without even the implied warranty of
 *  MERCHANTABILITY or FITNESS FOR A PARTICULAR PURPOSE.  See the
 *  GNU General Public License for more details.
 *
 *  See <http://www.gnu.org/licenses/> to get a copy of the GNU General
 *  Public License.
 *
 */

use log::debug;
use std::collections::BTreeMap;

use crate::widget::{WidgetController, WidgetId, WidgetKind, WidgetSettings};

/// Outcome of [`WidgetRegistry::register`], derived from the entry count
/// before and after the insert.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Registration {
    /// Registry went from empty to one entry.
    First,
    /// A new id joined a non-empty registry.
    Added,
    /// The id was already present; its entry was updated in place.
    Updated,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct Registered {
    pub registration: Registration,
    pub source_changed: bool,
}

/// Visible widgets. Each id appears at most once.
#[derive(Debug, Default)]
pub struct WidgetRegistry {
    entries: BTreeMap<WidgetId, WidgetController>,
    next_epoch: u64,
}

impl WidgetRegistry {
    pub fn new() -> Self {
        Self::default()
    }

    fn allocate_epoch(&mut self) -> u64 {
        self.next_epoch += 1;
        self.next_epoch
    }

    /// Insert or update. A kind change replaces the controller outright.
    pub fn register(&mut self, id: WidgetId, kind: WidgetKind, settings: &WidgetSettings) -> Registered {
        let before = self.entries.len();
        let epoch = self.allocate_epoch();

        let source_changed = match self.entries.get_mut(&id) {
            Some(existing) if existing.kind() == kind => existing.apply_settings(settings, epoch),
            Some(_) | None => {
                let controller = WidgetController::new(id.clone(), kind, settings, epoch);
                let has_source = controller.image_source().is_some();
                self.entries.insert(id.clone(), controller);
                has_source
            }
        };

        let after = self.entries.len();
        let registration = match (before, after) {
            (0, 1) => Registration::First,
            (b, a) if a > b => Registration::Added,
            _ => Registration::Updated,
        };
        debug!("registry: {} {:?}, {} widget(s)", id, registration, after);
        Registered { registration, source_changed }
    }

    /// Remove an entry. The flag is true when this removal emptied the
    /// registry.
    pub fn unregister(&mut self, id: &WidgetId) -> Option<(WidgetController, bool)> {
        let removed = self.entries.remove(id)?;
        let now_empty = self.entries.is_empty();
        debug!("registry: {} removed, {} widget(s)", id, self.entries.len());
        Some((removed, now_empty))
    }

    pub fn is_empty(&self) -> bool {
        self.entries.is_empty()
    }

    pub fn count(&self) -> usize {
        self.entries.len()
    }

    pub fn contains(&self, id: &WidgetId) -> bool {
        self.entries.contains_key(id)
    }

    pub fn get(&self, id: &WidgetId) -> Option<&WidgetController> {
        self.entries.get(id)
    }

    pub fn get_mut(&mut self, id: &WidgetId) -> Option<&mut WidgetController> {
        self.entries.get_mut(id)
    }

    pub fn dial_ids(&self) -> Vec<WidgetId> {
        self.entries
            .values()
            .filter(|c| c.kind() == WidgetKind::Dial)
            .map(|c| c.id().clone())
            .collect()
    }

    pub fn buttons_mut(&mut self) -> impl Iterator<Item = &mut WidgetController> {
        self.entries.values_mut().filter(|c| c.kind() == WidgetKind::Button)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn dial_settings(source: &str) -> WidgetSettings {
        WidgetSettings { image_source: Some(source.to_string()), ..Default::default() }
    }

    #[test]
    fn transitions_follow_size_delta() {
        let mut reg = WidgetRegistry::new();
        let a = reg.register("A".into(), WidgetKind::Dial, &dial_settings("img://a"));
        assert_eq!(a.registration, Registration::First);
        assert!(a.source_changed);

        let b = reg.register("B".into(), WidgetKind::Button, &WidgetSettings::default());
        assert_eq!(b.registration, Registration::Added);
        assert!(!b.source_changed);
        assert_eq!(reg.count(), 2);

        let (_, empty) = reg.unregister(&"A".into()).unwrap();
        assert!(!empty);
        let (_, empty) = reg.unregister(&"B".into()).unwrap();
        assert!(empty);
        assert!(reg.is_empty());
        assert!(reg.unregister(&"B".into()).is_none());
    }

    #[test]
    fn register_twice_updates_in_place() {
        let mut reg = WidgetRegistry::new();
        reg.register("A".into(), WidgetKind::Dial, &dial_settings("img://a"));
        let again = reg.register("A".into(), WidgetKind::Dial, &dial_settings("img://b"));
        assert_eq!(again, Registered { registration: Registration::Updated, source_changed: true });
        assert_eq!(reg.count(), 1);
        assert_eq!(reg.get(&"A".into()).unwrap().image_source(), Some("img://b"));

        let same = reg.register("A".into(), WidgetKind::Dial, &dial_settings("img://b"));
        assert!(!same.source_changed);
    }

    #[test]
    fn churn_never_reports_first_while_occupied() {
        let mut reg = WidgetRegistry::new();
        reg.register("keep".into(), WidgetKind::Button, &WidgetSettings::default());
        for _ in 0..5 {
            reg.unregister(&"churn".into());
            let r = reg.register("churn".into(), WidgetKind::Dial, &dial_settings("img://c"));
            assert_eq!(r.registration, Registration::Added);
        }
        assert_eq!(reg.count(), 2);
    }

    #[test]
    fn reregistration_gets_a_fresh_epoch() {
        let mut reg = WidgetRegistry::new();
        reg.register("A".into(), WidgetKind::Dial, &dial_settings("img://a"));
        let old = reg.get(&"A".into()).unwrap().fetch_ticket().unwrap();
        reg.unregister(&"A".into());
        reg.register("A".into(), WidgetKind::Dial, &dial_settings("img://a"));
        assert!(!reg.get(&"A".into()).unwrap().accepts(&old));
    }

    #[test]
    fn kind_change_replaces_controller() {
        let mut reg = WidgetRegistry::new();
        reg.register("A".into(), WidgetKind::Dial, &dial_settings("img://a"));
        let r = reg.register("A".into(), WidgetKind::Button, &WidgetSettings::default());
        assert_eq!(r.registration, Registration::Updated);
        assert_eq!(reg.get(&"A".into()).unwrap().kind(), WidgetKind::Button);
        assert!(reg.dial_ids().is_empty());
        assert_eq!(reg.buttons_mut().count(), 1);
    }
}
