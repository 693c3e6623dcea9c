//! Per-role module ordering, pinning and in-progress flags
//!
//! The display order for a role is the persisted order merged with the
//! registry: persisted ids that are still visible keep their relative order,
//! newly visible modules are appended in declaration order, and ids that are
//! no longer visible are dropped.

use serde::{Deserialize, Serialize};
use std::collections::HashSet;
use std::sync::{Arc, Mutex};

use crate::error::OrderError;
use crate::registry::{Module, Registry, Role};
use crate::store::Store;

/// A registry module annotated with the role's overlay flags
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct OrderedModule {
    #[serde(flatten)]
    pub module: Module,
    pub is_pinned: bool,
    pub is_in_progress: bool,
}

/// A user action against a role's module order
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(tag = "command", rename_all = "snake_case")]
pub enum OrderCommand {
    MoveUp { id: String },
    MoveDown { id: String },
    Move { from: usize, to: usize },
    Reorder { ids: Vec<String> },
    TogglePin { id: String },
    ToggleInProgress { id: String },
}

fn order_key(role: Role) -> String {
    format!("moduleOrder_{}", role)
}

fn pinned_key(role: Role) -> String {
    format!("pinnedModules_{}", role)
}

fn in_progress_key(role: Role) -> String {
    format!("inProgressModules_{}", role)
}

/// Computes and mutates module ordering state, persisting every change.
pub struct ModuleOrderEngine {
    store: Arc<Store>,
    registry: Arc<Registry>,
    // Serializes read-modify-write cycles against the store
    write_lock: Mutex<()>,
}

impl ModuleOrderEngine {
    pub fn new(store: Arc<Store>, registry: Arc<Registry>) -> Self {
        Self {
            store,
            registry,
            write_lock: Mutex::new(()),
        }
    }

    /// Visible modules for `role` in display order, with pin/in-progress flags.
    ///
    /// Initializes the persisted order on first access for the role.
    pub fn ordered_modules(&self, role: Role) -> Vec<OrderedModule> {
        let order = {
            let _guard = self.lock();
            self.current_order(role)
        };
        let pinned = self.flag_set(&pinned_key(role));
        let in_progress = self.flag_set(&in_progress_key(role));

        order
            .iter()
            .filter_map(|id| self.registry.get(id))
            .map(|module| OrderedModule {
                is_pinned: pinned.contains(&module.id),
                is_in_progress: in_progress.contains(&module.id),
                module: module.clone(),
            })
            .collect()
    }

    /// Pinned modules in display order
    pub fn pinned_modules(&self, role: Role) -> Vec<OrderedModule> {
        self.ordered_modules(role)
            .into_iter()
            .filter(|m| m.is_pinned)
            .collect()
    }

    /// Persisted order for `role` as stored, without merging
    pub fn persisted_order(&self, role: Role) -> Option<Vec<String>> {
        self.store.get(&order_key(role), None)
    }

    /// Swap `id` with its predecessor. Returns whether the order changed.
    pub fn move_up(&self, role: Role, id: &str) -> bool {
        let _guard = self.lock();
        let mut order = self.current_order(role);

        match order.iter().position(|m| m == id) {
            Some(pos) if pos > 0 => {
                order.swap(pos, pos - 1);
                self.save_order(role, &order);
                true
            }
            _ => false,
        }
    }

    /// Swap `id` with its successor. Returns whether the order changed.
    pub fn move_down(&self, role: Role, id: &str) -> bool {
        let _guard = self.lock();
        let mut order = self.current_order(role);

        match order.iter().position(|m| m == id) {
            Some(pos) if pos + 1 < order.len() => {
                order.swap(pos, pos + 1);
                self.save_order(role, &order);
                true
            }
            _ => false,
        }
    }

    /// Remove the module at `from` and reinsert it at `to`.
    pub fn move_module(&self, role: Role, from: usize, to: usize) -> Result<(), OrderError> {
        let _guard = self.lock();
        let mut order = self.current_order(role);
        let len = order.len();

        for index in [from, to] {
            if index >= len {
                return Err(OrderError::IndexOutOfRange { index, len });
            }
        }

        if from != to {
            let id = order.remove(from);
            order.insert(to, id);
            self.save_order(role, &order);
        }
        Ok(())
    }

    /// Replace the persisted order wholesale.
    ///
    /// Ids that are not visible to the role and repeated ids are discarded.
    /// Visible modules missing from `ids` reappear at the end on next read.
    pub fn reorder(&self, role: Role, ids: &[String]) {
        let _guard = self.lock();
        let visible: HashSet<&str> = self
            .registry
            .visible(role)
            .map(|m| m.id.as_str())
            .collect();

        let mut order: Vec<String> = Vec::with_capacity(ids.len());
        for id in ids {
            if visible.contains(id.as_str()) && !order.contains(id) {
                order.push(id.clone());
            }
        }

        if order.len() < ids.len() {
            tracing::debug!(
                role = %role,
                dropped = ids.len() - order.len(),
                "Discarded invisible or duplicate ids from reorder"
            );
        }

        self.save_order(role, &order);
    }

    /// Flip the pinned flag for `id`. Returns the new state.
    pub fn toggle_pin(&self, role: Role, id: &str) -> bool {
        let _guard = self.lock();
        self.toggle_flag(&pinned_key(role), id)
    }

    /// Flip the in-progress flag for `id`. Returns the new state.
    pub fn toggle_in_progress(&self, role: Role, id: &str) -> bool {
        let _guard = self.lock();
        self.toggle_flag(&in_progress_key(role), id)
    }

    pub fn apply(&self, role: Role, command: &OrderCommand) -> Result<(), OrderError> {
        tracing::debug!(role = %role, ?command, "Applying order command");

        match command {
            OrderCommand::MoveUp { id } => {
                self.move_up(role, id);
            }
            OrderCommand::MoveDown { id } => {
                self.move_down(role, id);
            }
            OrderCommand::Move { from, to } => self.move_module(role, *from, *to)?,
            OrderCommand::Reorder { ids } => self.reorder(role, ids),
            OrderCommand::TogglePin { id } => {
                self.toggle_pin(role, id);
            }
            OrderCommand::ToggleInProgress { id } => {
                self.toggle_in_progress(role, id);
            }
        }
        Ok(())
    }

    // Must be called with the write lock held.
    fn current_order(&self, role: Role) -> Vec<String> {
        let visible: Vec<&str> = self
            .registry
            .visible(role)
            .map(|m| m.id.as_str())
            .collect();

        let Some(persisted) = self.persisted_order(role) else {
            let order: Vec<String> = visible.iter().map(|id| id.to_string()).collect();
            tracing::debug!(role = %role, modules = order.len(), "Initialized module order");
            self.save_order(role, &order);
            return order;
        };

        let visible_set: HashSet<&str> = visible.iter().copied().collect();
        let mut seen = HashSet::new();
        let mut order: Vec<String> = persisted
            .into_iter()
            .filter(|id| visible_set.contains(id.as_str()) && seen.insert(id.clone()))
            .collect();

        for id in visible {
            if !seen.contains(id) {
                order.push(id.to_string());
            }
        }
        order
    }

    fn save_order(&self, role: Role, order: &[String]) {
        self.store.set(&order_key(role), &order);
    }

    fn flag_set(&self, key: &str) -> HashSet<String> {
        self.store
            .get::<Vec<String>>(key, Vec::new())
            .into_iter()
            .collect()
    }

    fn toggle_flag(&self, key: &str, id: &str) -> bool {
        let mut ids: Vec<String> = self.store.get(key, Vec::new());
        let enabled = match ids.iter().position(|m| m == id) {
            Some(pos) => {
                ids.remove(pos);
                false
            }
            None => {
                ids.push(id.to_string());
                true
            }
        };
        self.store.set(key, &ids);
        enabled
    }

    fn lock(&self) -> std::sync::MutexGuard<'_, ()> {
        self.write_lock.lock().unwrap_or_else(|e| e.into_inner())
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn engine_with(modules: Vec<Module>) -> (ModuleOrderEngine, Arc<Store>) {
        let store = Arc::new(Store::in_memory());
        let registry = Arc::new(Registry::new(modules).unwrap());
        (ModuleOrderEngine::new(store.clone(), registry), store)
    }

    fn dashboard() -> Vec<Module> {
        vec![
            Module::new("crm", "CRM", "", &[Role::Admin, Role::Manager]),
            Module::new("inventory", "Inventory", "", &[Role::Admin, Role::Manager]),
            Module::new("tickets", "Tickets", "", &[Role::Admin, Role::Manager, Role::Technician]),
            Module::new("villas", "Villas", "", &[Role::Admin, Role::Technician]),
        ]
    }

    fn ids(modules: &[OrderedModule]) -> Vec<&str> {
        modules.iter().map(|m| m.module.id.as_str()).collect()
    }

    #[test]
    fn first_access_persists_registry_order() {
        let (engine, store) = engine_with(dashboard());
        assert!(engine.persisted_order(Role::Manager).is_none());

        let modules = engine.ordered_modules(Role::Manager);
        assert_eq!(ids(&modules), vec!["crm", "inventory", "tickets"]);

        let persisted: Vec<String> = store.get("moduleOrder_manager", Vec::new());
        assert_eq!(persisted, vec!["crm", "inventory", "tickets"]);
    }

    #[test]
    fn merge_keeps_persisted_order_and_appends_new() {
        let (engine, store) = engine_with(dashboard());
        store.set("moduleOrder_admin", &vec!["villas", "removed", "crm", "crm"]);

        let modules = engine.ordered_modules(Role::Admin);
        assert_eq!(ids(&modules), vec!["villas", "crm", "inventory", "tickets"]);
    }

    #[test]
    fn persisted_ids_no_longer_visible_are_dropped() {
        let (engine, store) = engine_with(dashboard());
        store.set("moduleOrder_technician", &vec!["crm", "villas", "tickets"]);

        let modules = engine.ordered_modules(Role::Technician);
        assert_eq!(ids(&modules), vec!["villas", "tickets"]);
    }

    #[test]
    fn move_boundaries_are_noops() {
        let (engine, _) = engine_with(dashboard());

        assert!(!engine.move_up(Role::Admin, "crm"));
        assert!(!engine.move_down(Role::Admin, "villas"));
        assert!(!engine.move_up(Role::Admin, "not-a-module"));
        assert_eq!(
            ids(&engine.ordered_modules(Role::Admin)),
            vec!["crm", "inventory", "tickets", "villas"]
        );
    }

    #[test]
    fn move_down_swaps_with_next() {
        let (engine, _) = engine_with(dashboard());
        assert!(engine.move_down(Role::Admin, "crm"));
        assert_eq!(
            ids(&engine.ordered_modules(Role::Admin)),
            vec!["inventory", "crm", "tickets", "villas"]
        );
    }

    #[test]
    fn pinned_module_moved_up_keeps_flag() {
        let (engine, store) = engine_with(dashboard());

        assert!(engine.toggle_pin(Role::Admin, "tickets"));
        assert!(engine.move_up(Role::Admin, "tickets"));

        let modules = engine.ordered_modules(Role::Admin);
        assert_eq!(modules[1].module.id, "tickets");
        assert!(modules[1].is_pinned);

        let persisted: Vec<String> = store.get("moduleOrder_admin", Vec::new());
        assert_eq!(persisted[1], "tickets");
    }

    #[test]
    fn toggle_pin_twice_restores_state() {
        let (engine, _) = engine_with(dashboard());

        assert!(engine.toggle_pin(Role::Manager, "crm"));
        assert!(!engine.toggle_pin(Role::Manager, "crm"));
        assert!(engine.ordered_modules(Role::Manager).iter().all(|m| !m.is_pinned));
    }

    #[test]
    fn in_progress_is_independent_of_pin() {
        let (engine, _) = engine_with(dashboard());

        engine.toggle_pin(Role::Admin, "inventory");
        engine.toggle_in_progress(Role::Admin, "inventory");
        engine.toggle_pin(Role::Admin, "inventory");

        let inventory = engine
            .ordered_modules(Role::Admin)
            .into_iter()
            .find(|m| m.module.id == "inventory")
            .unwrap();
        assert!(!inventory.is_pinned);
        assert!(inventory.is_in_progress);
    }

    #[test]
    fn flags_are_scoped_by_role() {
        let (engine, _) = engine_with(dashboard());
        engine.toggle_pin(Role::Admin, "tickets");

        assert!(engine.pinned_modules(Role::Manager).is_empty());
        assert_eq!(ids(&engine.pinned_modules(Role::Admin)), vec!["tickets"]);
    }

    #[test]
    fn move_module_shifts_others() {
        let (engine, _) = engine_with(dashboard());

        engine.move_module(Role::Admin, 0, 2).unwrap();
        assert_eq!(
            ids(&engine.ordered_modules(Role::Admin)),
            vec!["inventory", "tickets", "crm", "villas"]
        );

        engine.move_module(Role::Admin, 3, 0).unwrap();
        assert_eq!(
            ids(&engine.ordered_modules(Role::Admin)),
            vec!["villas", "inventory", "tickets", "crm"]
        );
    }

    #[test]
    fn move_module_out_of_range_is_rejected() {
        let (engine, _) = engine_with(dashboard());

        let err = engine.move_module(Role::Technician, 0, 5).unwrap_err();
        assert_eq!(err, OrderError::IndexOutOfRange { index: 5, len: 2 });
        assert_eq!(
            ids(&engine.ordered_modules(Role::Technician)),
            vec!["tickets", "villas"]
        );
    }

    #[test]
    fn reorder_filters_invisible_and_duplicate_ids() {
        let (engine, store) = engine_with(dashboard());

        let requested = vec![
            "tickets".to_string(),
            "villas".to_string(),
            "tickets".to_string(),
            "crm".to_string(),
        ];
        engine.reorder(Role::Manager, &requested);

        let persisted: Vec<String> = store.get("moduleOrder_manager", Vec::new());
        assert_eq!(persisted, vec!["tickets", "crm"]);
        assert_eq!(
            ids(&engine.ordered_modules(Role::Manager)),
            vec!["tickets", "crm", "inventory"]
        );
    }

    #[test]
    fn order_is_a_permutation_preserving_shared_relative_order() {
        let (engine, store) = engine_with(dashboard());
        store.set("moduleOrder_admin", &vec!["tickets", "ghost", "crm"]);

        let result = ids(&engine.ordered_modules(Role::Admin))
            .into_iter()
            .map(String::from)
            .collect::<Vec<_>>();

        let mut sorted = result.clone();
        sorted.sort();
        assert_eq!(sorted, vec!["crm", "inventory", "tickets", "villas"]);

        let tickets = result.iter().position(|m| m == "tickets").unwrap();
        let crm = result.iter().position(|m| m == "crm").unwrap();
        assert!(tickets < crm);
    }

    #[test]
    fn commands_dispatch_to_operations() {
        let (engine, _) = engine_with(dashboard());

        let command: OrderCommand =
            serde_json::from_str(r#"{"command":"move_down","id":"tickets"}"#).unwrap();
        engine.apply(Role::Technician, &command).unwrap();
        engine
            .apply(Role::Technician, &OrderCommand::ToggleInProgress { id: "villas".into() })
            .unwrap();

        let modules = engine.ordered_modules(Role::Technician);
        assert_eq!(ids(&modules), vec!["villas", "tickets"]);
        assert!(modules[0].is_in_progress);

        assert!(
            engine
                .apply(Role::Technician, &OrderCommand::Move { from: 9, to: 0 })
                .is_err()
        );
    }
}
