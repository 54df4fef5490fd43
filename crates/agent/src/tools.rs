use std::collections::HashMap;
use std::sync::Arc;

use async_trait::async_trait;
use parley_core::{Attachment, ToolArguments};
use serde_json::Value;
use thiserror::Error;

use crate::schema::ToolSpec;

#[derive(Clone, Debug, PartialEq)]
pub struct ToolOutput {
    pub content: Value,
    pub attachments: Vec<Attachment>,
}

impl ToolOutput {
    pub fn new(content: Value) -> Self {
        Self { content, attachments: Vec::new() }
    }

    pub fn with_attachment(mut self, attachment: Attachment) -> Self {
        self.attachments.push(attachment);
        self
    }
}

impl From<Value> for ToolOutput {
    fn from(content: Value) -> Self {
        Self::new(content)
    }
}

#[derive(Clone, Debug, Error, PartialEq, Eq)]
pub enum ToolFailure {
    #[error("invalid input: {0}")]
    InvalidInput(String),
    #[error("backend failure: {0}")]
    Backend(String),
    #[error("unavailable: {0}")]
    Unavailable(String),
}

#[async_trait]
pub trait ToolHandler: Send + Sync {
    async fn execute(&self, arguments: ToolArguments) -> Result<ToolOutput, ToolFailure>;
}

#[derive(Clone, Debug, Error, PartialEq, Eq)]
pub enum RegistryError {
    #[error("tool `{0}` is already registered")]
    DuplicateName(String),
    #[error("unknown tool `{0}`")]
    UnknownTool(String),
}

pub struct RegisteredTool<'a> {
    pub spec: &'a ToolSpec,
    pub handler: &'a Arc<dyn ToolHandler>,
}

/// Name-keyed tool table. Populated during startup, then shared read-only behind `Arc`.
#[derive(Default)]
pub struct ToolRegistry {
    specs: Vec<ToolSpec>,
    handlers: Vec<Arc<dyn ToolHandler>>,
    index: HashMap<String, usize>,
}

impl ToolRegistry {
    pub fn register<H>(&mut self, spec: ToolSpec, handler: H) -> Result<(), RegistryError>
    where
        H: ToolHandler + 'static,
    {
        self.register_shared(spec, Arc::new(handler))
    }

    pub fn register_shared(
        &mut self,
        spec: ToolSpec,
        handler: Arc<dyn ToolHandler>,
    ) -> Result<(), RegistryError> {
        if self.index.contains_key(&spec.name) {
            return Err(RegistryError::DuplicateName(spec.name));
        }

        self.index.insert(spec.name.clone(), self.specs.len());
        self.specs.push(spec);
        self.handlers.push(handler);
        Ok(())
    }

    pub fn lookup(&self, name: &str) -> Result<RegisteredTool<'_>, RegistryError> {
        let position = self
            .index
            .get(name)
            .copied()
            .ok_or_else(|| RegistryError::UnknownTool(name.to_owned()))?;
        Ok(RegisteredTool { spec: &self.specs[position], handler: &self.handlers[position] })
    }

    /// Specs in registration order.
    pub fn list_specs(&self) -> &[ToolSpec] {
        &self.specs
    }

    pub fn names(&self) -> Vec<&str> {
        self.specs.iter().map(|spec| spec.name.as_str()).collect()
    }

    pub fn len(&self) -> usize {
        self.specs.len()
    }

    pub fn is_empty(&self) -> bool {
        self.specs.is_empty()
    }
}
