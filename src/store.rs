//! Published template sets.
//!
//! A [`TemplateSet`] is an immutable snapshot of every loaded template plus
//! a resolution memo. The [`TemplateStore`] holds the current snapshot and
//! swaps in a new one on reload; readers always see one complete set.

use crate::matcher::PathPattern;
use crate::template::Template;
use arc_swap::ArcSwap;
use dashmap::DashMap;
use std::collections::HashMap;
use std::sync::Arc;
use tracing::{info, warn};

/// A template together with its compiled endpoint pattern.
#[derive(Debug)]
pub struct Route {
    pub template: Arc<Template>,
    pub pattern: PathPattern,
}

/// One consistent set of templates.
#[derive(Debug, Default)]
pub struct TemplateSet {
    /// `METHOD PATTERN` -> template
    pub(crate) exact: HashMap<String, Arc<Template>>,
    /// Routes in load order
    pub(crate) routes: Vec<Route>,
    /// `METHOD PATH` -> template, filled by pattern resolution
    pub(crate) memo: DashMap<String, Arc<Template>>,
}

impl TemplateSet {
    /// Build a set from templates in load order.
    pub fn from_templates(
        templates: impl IntoIterator<Item = Template>,
    ) -> Result<Self, regex::Error> {
        let mut set = Self::default();
        for template in templates {
            set.insert(template)?;
        }
        Ok(set)
    }

    /// Add a template. A template with the same `METHOD PATTERN` key
    /// replaces the earlier one but keeps its position in the scan order.
    pub fn insert(&mut self, template: Template) -> Result<(), regex::Error> {
        let pattern = PathPattern::compile(&template.endpoint)?;
        let key = template.key();
        let template = Arc::new(template);

        if let Some(previous) = self.exact.insert(key.clone(), Arc::clone(&template)) {
            warn!(key = %key, "Duplicate template definition, replacing earlier one");
            if let Some(route) = self
                .routes
                .iter_mut()
                .find(|r| Arc::ptr_eq(&r.template, &previous))
            {
                route.template = template;
                route.pattern = pattern;
            }
        } else {
            self.routes.push(Route { template, pattern });
        }

        self.memo.clear();
        Ok(())
    }

    /// Number of templates.
    pub fn len(&self) -> usize {
        self.routes.len()
    }

    pub fn is_empty(&self) -> bool {
        self.routes.is_empty()
    }

    /// Templates in load order.
    pub fn templates(&self) -> impl Iterator<Item = &Arc<Template>> {
        self.routes.iter().map(|r| &r.template)
    }

    /// Look up by exact `METHOD PATTERN` key.
    pub fn get(&self, key: &str) -> Option<&Arc<Template>> {
        self.exact.get(key)
    }
}

/// Holder of the current [`TemplateSet`].
#[derive(Debug)]
pub struct TemplateStore {
    current: ArcSwap<TemplateSet>,
}

impl TemplateStore {
    pub fn new(set: TemplateSet) -> Self {
        Self {
            current: ArcSwap::from_pointee(set),
        }
    }

    /// The current snapshot. Lock-free; stays valid across reloads.
    pub fn snapshot(&self) -> Arc<TemplateSet> {
        self.current.load_full()
    }

    /// Publish a new snapshot, returning the one it replaced.
    pub fn publish(&self, set: TemplateSet) -> Arc<TemplateSet> {
        info!(templates = set.len(), "Publishing template set");
        self.current.swap(Arc::new(set))
    }
}

impl Default for TemplateStore {
    fn default() -> Self {
        Self::new(TemplateSet::default())
    }
}
