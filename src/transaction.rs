use std::collections::BTreeSet;
use std::sync::Arc;

use crate::action::{Action, ActionFactory};
use crate::preferences::Preferences;
use crate::stats::Statistics;
use crate::value::Value;

/// Editing session over a store.
///
/// Changes are queued and only reach the store on [`apply`](Editor::apply)
/// or [`commit`](Editor::commit); both empty the queue so the editor can be
/// reused for the next batch.
pub struct Editor<'p> {
    prefs: &'p Preferences,
    /// Factory captured when the session started
    factory: Arc<dyn ActionFactory>,
    /// Queued actions in call order
    actions: Vec<Action>,
}

impl<'p> Editor<'p> {
    pub(crate) fn new(prefs: &'p Preferences, factory: Arc<dyn ActionFactory>) -> Self {
        Self {
            prefs,
            factory,
            actions: Vec::new(),
        }
    }

    /// Queue a typed put
    pub fn put(&mut self, key: &str, value: impl Into<Value>) -> &mut Self {
        let action = self.factory.put(key, value.into());
        self.actions.push(action);
        self
    }

    pub fn put_int(&mut self, key: &str, value: i32) -> &mut Self {
        self.put(key, value)
    }

    pub fn put_long(&mut self, key: &str, value: i64) -> &mut Self {
        self.put(key, value)
    }

    pub fn put_float(&mut self, key: &str, value: f32) -> &mut Self {
        self.put(key, value)
    }

    pub fn put_bool(&mut self, key: &str, value: bool) -> &mut Self {
        self.put(key, value)
    }

    pub fn put_string(&mut self, key: &str, value: impl Into<String>) -> &mut Self {
        self.put(key, Value::String(value.into()))
    }

    pub fn put_string_set<I, S>(&mut self, key: &str, values: I) -> &mut Self
    where
        I: IntoIterator<Item = S>,
        S: Into<String>,
    {
        let set: BTreeSet<String> = values.into_iter().map(Into::into).collect();
        self.put(key, set)
    }

    pub fn remove(&mut self, key: &str) -> &mut Self {
        let action = self.factory.remove(key);
        self.actions.push(action);
        self
    }

    /// Queue a clear. Whatever was queued before it in this session is
    /// dropped.
    pub fn clear(&mut self) -> &mut Self {
        self.actions.clear();
        let action = self.factory.clear();
        self.actions.push(action);
        self
    }

    /// Actions queued so far
    pub fn pending(&self) -> &[Action] {
        &self.actions
    }

    /// Apply the queued actions in memory and flush in the background
    pub fn apply(&mut self) {
        let store = self.prefs.store();
        Statistics::bump(&store.stats.applies);

        let actions = std::mem::take(&mut self.actions);
        if let Some(committed) = store.commit_to_memory(actions) {
            store.schedule_flush();
            self.prefs.notify_changed(&committed.keys);
        }
    }

    /// Apply the queued actions in memory, then block until they are durable,
    /// a flush attempt fails or the environment shuts down. Returns whether
    /// anything was applied; the outcome of the durable write is not reported.
    pub fn commit(&mut self) -> bool {
        let store = self.prefs.store();
        Statistics::bump(&store.stats.commits);

        let actions = std::mem::take(&mut self.actions);
        match store.commit_to_memory(actions) {
            Some(committed) => {
                self.prefs.notify_changed(&committed.keys);
                if !store.force_flush(committed.version) {
                    log::debug!(
                        "{}: version {} not confirmed durable",
                        store.identity,
                        committed.version
                    );
                }
                true
            }
            None => false,
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::action::DefaultFactory;
    use crate::config::EnvConfig;
    use crate::env::Environment;

    /// Factory that namespaces every key
    struct Prefixed;

    impl ActionFactory for Prefixed {
        fn put(&self, key: &str, value: Value) -> Action {
            Action::Put {
                key: format!("app.{}", key),
                value,
            }
        }

        fn name(&self) -> &str {
            "Prefixed"
        }
    }

    fn memory_env() -> Environment {
        Environment::new(EnvConfig::default().max_workers(1))
    }

    #[test]
    fn test_clear_drops_previous_actions() {
        let env = memory_env();
        let prefs = env.open_memory("editor").unwrap();
        let mut editor = prefs.edit();
        editor.put_int("a", 1).remove("b").clear().put_bool("c", true);

        assert_eq!(editor.pending().len(), 2);
        assert_eq!(editor.pending()[0], Action::Clear);
    }

    #[test]
    fn test_empty_commit_changes_nothing() {
        let env = memory_env();
        let prefs = env.open_memory("noop").unwrap();
        let version = prefs.version();

        assert!(!prefs.edit().commit());
        assert_eq!(prefs.version(), version);
    }

    #[test]
    fn test_effects_follow_call_order() {
        let env = memory_env();
        let prefs = env.open_memory("order").unwrap();
        prefs
            .edit()
            .put_int("k", 1)
            .put_int("k", 2)
            .remove("k")
            .put_string("k", "last")
            .apply();

        assert_eq!(prefs.get_string("k", ""), "last");
    }

    #[test]
    fn test_factory_rewrites_keys() {
        let env = memory_env();
        let prefs = env.open_memory("factory").unwrap();
        prefs.set_factory(Some(Arc::new(Prefixed)));
        prefs.edit().put_long("id", 7).commit();

        assert!(prefs.contains("app.id"));
        assert!(!prefs.contains("id"));

        prefs.set_factory(None);
        prefs.edit().put_long("id", 8).commit();
        assert_eq!(prefs.get_long("id", 0), 8);
        assert_eq!(DefaultFactory.name(), "DefaultFactory");
    }
}
