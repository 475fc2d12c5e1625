use crate::constants::ActionKind;
use crate::value::{Entries, Value};

/// Modification of a store queued by an editor
#[derive(Debug, Clone, PartialEq)]
pub enum Action {
    Put { key: String, value: Value },
    Remove { key: String },
    Clear,
}

impl Action {
    pub fn kind(&self) -> ActionKind {
        match self {
            Action::Put { .. } => ActionKind::PUT,
            Action::Remove { .. } => ActionKind::REMOVE,
            Action::Clear => ActionKind::CLEAR,
        }
    }

    /// Key touched by the action, `None` for a clear
    pub fn key(&self) -> Option<&str> {
        match self {
            Action::Put { key, .. } | Action::Remove { key } => Some(key),
            Action::Clear => None,
        }
    }

    /// Apply the action to the in-memory map
    pub fn apply(&self, objects: &mut Entries) {
        match self {
            Action::Put { key, value } => {
                objects.insert(key.clone(), value.clone());
            }
            Action::Remove { key } => {
                objects.remove(key);
            }
            Action::Clear => objects.clear(),
        }
    }
}

/// Builds the actions an editor queues. Override to rewrite keys or values
/// before they reach the store.
pub trait ActionFactory: Send + Sync {
    fn put(&self, key: &str, value: Value) -> Action {
        Action::Put {
            key: key.to_owned(),
            value,
        }
    }

    fn remove(&self, key: &str) -> Action {
        Action::Remove { key: key.to_owned() }
    }

    fn clear(&self) -> Action {
        Action::Clear
    }

    fn name(&self) -> &str {
        "DefaultFactory"
    }
}

/// Factory producing the plain actions
#[derive(Debug, Default, Clone, Copy)]
pub struct DefaultFactory;

impl ActionFactory for DefaultFactory {}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_apply_order() {
        let mut objects = Entries::new();
        Action::Put {
            key: "a".into(),
            value: Value::Int(1),
        }
        .apply(&mut objects);
        Action::Put {
            key: "a".into(),
            value: Value::Int(2),
        }
        .apply(&mut objects);
        assert_eq!(objects.get("a"), Some(&Value::Int(2)));

        Action::Remove { key: "a".into() }.apply(&mut objects);
        assert!(objects.is_empty());
    }

    #[test]
    fn test_kinds_and_keys() {
        let factory = DefaultFactory;
        let put = factory.put("k", Value::Bool(true));
        assert_eq!(put.kind(), ActionKind::PUT);
        assert_eq!(put.key(), Some("k"));
        assert_eq!(factory.remove("k").kind(), ActionKind::REMOVE);
        assert_eq!(factory.clear().key(), None);
    }
}
