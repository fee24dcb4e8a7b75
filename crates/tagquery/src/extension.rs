//! Named predicates reachable from queries as `@(name: body)`.

use std::fmt;
use std::sync::{Arc, LazyLock};

use fnv::FnvHashMap;
use parking_lot::RwLock;

use crate::error::{QueryError, Result};
use crate::item::ItemAccessor;

static GLOBAL_REGISTRY: LazyLock<ExtensionRegistry> = LazyLock::new(ExtensionRegistry::new);

/// A predicate supplied by the host application.
pub trait QueryExtension: Send + Sync {
    /// Checks the body at parse time; an error makes the query invalid.
    fn validate(&self, _body: Option<&str>) -> Result<()> {
        Ok(())
    }

    fn search(&self, item: &dyn ItemAccessor, body: Option<&str>) -> bool;
}

impl<F> QueryExtension for F
where
    F: Fn(&dyn ItemAccessor, Option<&str>) -> bool + Send + Sync,
{
    fn search(&self, item: &dyn ItemAccessor, body: Option<&str>) -> bool {
        self(item, body)
    }
}

#[derive(Default)]
pub struct ExtensionRegistry {
    extensions: RwLock<FnvHashMap<String, Arc<dyn QueryExtension>>>,
}

impl ExtensionRegistry {
    pub fn new() -> Self {
        Self::default()
    }

    /// The registry used by [`crate::Query::new`].
    pub fn global() -> &'static ExtensionRegistry {
        &GLOBAL_REGISTRY
    }

    /// Registers `extension` under `name`, returning any extension it replaces.
    pub fn register(
        &self,
        name: impl Into<String>,
        extension: impl QueryExtension + 'static,
    ) -> Option<Arc<dyn QueryExtension>> {
        let name = name.into();
        let previous = self.extensions.write().insert(name.clone(), Arc::new(extension));
        if previous.is_some() {
            log::warn!("query extension @({name}) registered twice; replacing the earlier one");
        }
        previous
    }

    pub fn unregister(&self, name: &str) -> Option<Arc<dyn QueryExtension>> {
        self.extensions.write().remove(name)
    }

    pub fn get(&self, name: &str) -> Option<Arc<dyn QueryExtension>> {
        self.extensions.read().get(name).cloned()
    }

    pub fn names(&self) -> Vec<String> {
        let mut names: Vec<String> = self.extensions.read().keys().cloned().collect();
        names.sort();
        names
    }

    /// Looks up and validates an extension invocation.
    pub(crate) fn resolve(&self, name: &str, body: Option<String>) -> Result<ExtensionCall> {
        let extension = self
            .get(name)
            .ok_or_else(|| QueryError::UnknownExtension(name.to_string()))?;
        extension.validate(body.as_deref())?;
        Ok(ExtensionCall {
            name: name.to_string(),
            body,
            extension,
        })
    }
}

impl fmt::Debug for ExtensionRegistry {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("ExtensionRegistry")
            .field("names", &self.names())
            .finish()
    }
}

/// A resolved `@(name: body)` leaf.
#[derive(Clone)]
pub struct ExtensionCall {
    name: String,
    body: Option<String>,
    extension: Arc<dyn QueryExtension>,
}

impl ExtensionCall {
    pub fn name(&self) -> &str {
        &self.name
    }

    pub fn body(&self) -> Option<&str> {
        self.body.as_deref()
    }

    pub fn search(&self, item: &dyn ItemAccessor) -> bool {
        self.extension.search(item, self.body.as_deref())
    }
}

impl fmt::Debug for ExtensionCall {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("ExtensionCall")
            .field("name", &self.name)
            .field("body", &self.body)
            .finish_non_exhaustive()
    }
}
