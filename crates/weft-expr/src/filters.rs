//! Named value-transforming filters.
//!
//! Filters are resolved at evaluation time, not compile time, so programs
//! compiled before a filter is registered pick it up on their next run and
//! stay cached across registry changes. An unresolved name surfaces as
//! `EvalError::UnknownFilter` when the pipe actually executes.

use std::cell::RefCell;
use std::collections::HashMap;
use std::fmt;
use std::rc::Rc;

use weft_core::{EvalError, Value};

/// Shared filter function: receives the piped value and the parsed
/// arguments, left to right.
pub type FilterFn = Rc<dyn Fn(&Value, &[Value]) -> Result<Value, EvalError>>;

/// Shared name → filter table. Cloning shares the underlying registry, so
/// the compiler and every program it produced see the same filters.
pub struct FilterRegistry {
    inner: Rc<RefCell<HashMap<Rc<str>, FilterFn>>>,
}

impl FilterRegistry {
    #[must_use]
    pub fn new() -> Self {
        FilterRegistry {
            inner: Rc::new(RefCell::new(HashMap::new())),
        }
    }

    /// Registers `f` under `name`, replacing any previous filter.
    pub fn register(
        &self,
        name: impl Into<Rc<str>>,
        f: impl Fn(&Value, &[Value]) -> Result<Value, EvalError> + 'static,
    ) {
        self.inner.borrow_mut().insert(name.into(), Rc::new(f));
    }

    #[must_use]
    pub fn get(&self, name: &str) -> Option<FilterFn> {
        self.inner.borrow().get(name).cloned()
    }

    #[must_use]
    pub fn contains(&self, name: &str) -> bool {
        self.inner.borrow().contains_key(name)
    }
}

impl Clone for FilterRegistry {
    fn clone(&self) -> Self {
        FilterRegistry {
            inner: Rc::clone(&self.inner),
        }
    }
}

impl Default for FilterRegistry {
    fn default() -> Self {
        Self::new()
    }
}

impl fmt::Debug for FilterRegistry {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let mut names: Vec<String> = self
            .inner
            .borrow()
            .keys()
            .map(|k| k.to_string())
            .collect();
        names.sort_unstable();
        f.debug_struct("FilterRegistry").field("names", &names).finish()
    }
}
