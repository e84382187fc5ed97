//! Registry of view compilers keyed by design-document language.
//!
//! Before a view is stored, its definition is passed through the transform
//! produced by the compiler registered for the design document's `language`.
//! Languages without a registered compiler get [`IdentityCompiler`].

use std::collections::HashMap;
use std::sync::Arc;

use sofa_api::{JsonObject, ViewDefinition};

/// Rewrites a view definition into the form stored on the server
pub type ViewTransform = Arc<dyn Fn(ViewDefinition) -> ViewDefinition + Send + Sync>;

pub trait ViewCompiler: Send + Sync {
    fn compile(&self, options: &JsonObject) -> ViewTransform;
}

/// Stores view sources unchanged
pub struct IdentityCompiler;

impl ViewCompiler for IdentityCompiler {
    fn compile(&self, _options: &JsonObject) -> ViewTransform {
        Arc::new(|view: ViewDefinition| view)
    }
}

pub struct ViewCompilers {
    compilers: HashMap<String, Arc<dyn ViewCompiler>>,
    fallback: Arc<dyn ViewCompiler>,
}

impl Default for ViewCompilers {
    /// Registry with `javascript` mapped to [`IdentityCompiler`]
    fn default() -> Self {
        let mut compilers = Self::empty();
        compilers.register("javascript", Arc::new(IdentityCompiler));
        compilers
    }
}

impl ViewCompilers {
    pub fn new() -> Self {
        Self::default()
    }

    /// Registry with no languages registered; everything uses the fallback
    pub fn empty() -> Self {
        Self {
            compilers: HashMap::new(),
            fallback: Arc::new(IdentityCompiler),
        }
    }

    /// Register (or replace) the compiler for `language`
    pub fn register(&mut self, language: impl Into<String>, compiler: Arc<dyn ViewCompiler>) {
        self.compilers.insert(language.into(), compiler);
    }

    pub fn contains(&self, language: &str) -> bool {
        self.compilers.contains_key(language)
    }

    pub fn compiler_for(&self, language: &str) -> Arc<dyn ViewCompiler> {
        self.compilers
            .get(language)
            .cloned()
            .unwrap_or_else(|| self.fallback.clone())
    }

    pub fn compile(&self, language: &str, options: &JsonObject) -> ViewTransform {
        self.compiler_for(language).compile(options)
    }
}
