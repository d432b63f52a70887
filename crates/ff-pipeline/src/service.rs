//! Services: named collections of pipelines, and the registry that holds the
//! currently loaded one.

use std::collections::HashSet;
use std::path::Path;
use std::sync::Arc;

use ff_core::{Error, Result};
use parking_lot::RwLock;
use serde::{Deserialize, Serialize};
use tracing::info;

use crate::context::ExecutionContext;
use crate::factory::HandlerRegistry;
use crate::handler::Sinks;
use crate::item::ProcessableItem;
use crate::processor::{Processor, SequentialResult};
use crate::stage::OperationDecl;

/// A pipeline as written in a service definition.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct PipelineDefinition {
    pub name: String,
    #[serde(default)]
    pub operations: Vec<OperationDecl>,
}

/// The declarative form of a service, loaded from TOML or JSON.
///
/// ```toml
/// name = "uploads"
///
/// [[pipelines]]
/// name = "images"
///
/// [[pipelines.operations]]
/// name = "size_validate"
/// params.max = { source_type = "value", source = "5MB" }
/// ```
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct ServiceDefinition {
    pub name: String,
    #[serde(default)]
    pub pipelines: Vec<PipelineDefinition>,
}

impl ServiceDefinition {
    pub fn from_toml(s: &str) -> Result<Self> {
        toml::from_str(s).map_err(|e| Error::config(format!("invalid service definition: {e}")))
    }

    pub fn from_json(s: &str) -> Result<Self> {
        serde_json::from_str(s)
            .map_err(|e| Error::config(format!("invalid service definition: {e}")))
    }

    /// Load a definition file. `.json` files are parsed as JSON, anything
    /// else as TOML.
    pub fn load(path: &Path) -> Result<Self> {
        let content = std::fs::read_to_string(path)?;
        let is_json = path
            .extension()
            .is_some_and(|ext| ext.eq_ignore_ascii_case("json"));
        if is_json {
            Self::from_json(&content)
        } else {
            Self::from_toml(&content)
        }
    }

    /// Check names are present and pipeline names are unique.
    pub fn validate(&self) -> Result<()> {
        if self.name.trim().is_empty() {
            return Err(Error::config("service name must not be empty"));
        }
        let mut seen = HashSet::new();
        for pipeline in &self.pipelines {
            if pipeline.name.trim().is_empty() {
                return Err(Error::config(format!(
                    "service '{}': pipeline name must not be empty",
                    self.name
                )));
            }
            if !seen.insert(pipeline.name.as_str()) {
                return Err(Error::config(format!(
                    "service '{}': duplicate pipeline '{}'",
                    self.name, pipeline.name
                )));
            }
            for op in &pipeline.operations {
                if op.name.trim().is_empty() {
                    return Err(Error::config(format!(
                        "pipeline '{}': operation name must not be empty",
                        pipeline.name
                    )));
                }
            }
        }
        Ok(())
    }

    pub fn pipeline(&self, name: &str) -> Option<&PipelineDefinition> {
        self.pipelines.iter().find(|p| p.name == name)
    }
}

/// A validated service definition bound to a handler registry.
#[derive(Debug)]
pub struct Service {
    definition: ServiceDefinition,
    handlers: Arc<HandlerRegistry>,
}

impl Service {
    /// Validate `definition` and check that every operation it names is
    /// registered.
    pub fn new(definition: ServiceDefinition, handlers: Arc<HandlerRegistry>) -> Result<Self> {
        definition.validate()?;
        for pipeline in &definition.pipelines {
            for op in &pipeline.operations {
                if !handlers.contains(&op.name) {
                    return Err(Error::config(format!(
                        "pipeline '{}': unknown operation: {}",
                        pipeline.name, op.name
                    )));
                }
            }
        }
        Ok(Self {
            definition,
            handlers,
        })
    }

    pub fn name(&self) -> &str {
        &self.definition.name
    }

    pub fn definition(&self) -> &ServiceDefinition {
        &self.definition
    }

    pub fn pipeline_names(&self) -> Vec<&str> {
        self.definition
            .pipelines
            .iter()
            .map(|p| p.name.as_str())
            .collect()
    }

    /// Build a fresh processor for the named pipeline.
    pub fn processor(&self, pipeline: &str) -> Result<Processor> {
        let definition = self
            .definition
            .pipeline(pipeline)
            .ok_or_else(|| Error::not_found("pipeline", pipeline))?;
        Ok(Processor::new(
            &definition.name,
            definition.operations.clone(),
            Arc::clone(&self.handlers),
        ))
    }
}

/// Holds the currently loaded [`Service`] and runs its pipelines.
///
/// Reloading swaps the service atomically; runs already in flight keep the
/// snapshot they started with.
#[derive(Debug)]
pub struct ServiceRegistry {
    handlers: Arc<HandlerRegistry>,
    current: RwLock<Option<Arc<Service>>>,
}

impl ServiceRegistry {
    pub fn new(handlers: Arc<HandlerRegistry>) -> Self {
        Self {
            handlers,
            current: RwLock::new(None),
        }
    }

    pub fn handlers(&self) -> &Arc<HandlerRegistry> {
        &self.handlers
    }

    /// Validate and install a definition, replacing any previous service.
    pub fn load(&self, definition: ServiceDefinition) -> Result<Arc<Service>> {
        let service = Arc::new(Service::new(definition, Arc::clone(&self.handlers))?);
        info!(
            service = service.name(),
            pipelines = service.pipeline_names().len(),
            "Loaded service"
        );
        *self.current.write() = Some(Arc::clone(&service));
        Ok(service)
    }

    /// Load a definition file and install it. On error the previous service
    /// stays in place.
    pub fn reload(&self, path: &Path) -> Result<Arc<Service>> {
        let definition = ServiceDefinition::load(path)?;
        self.load(definition)
    }

    /// The currently loaded service.
    pub fn current(&self) -> Result<Arc<Service>> {
        self.current
            .read()
            .clone()
            .ok_or_else(|| Error::config("no service loaded"))
    }

    pub async fn run_sequential(
        &self,
        ctx: &dyn ExecutionContext,
        pipeline: &str,
        items: Vec<ProcessableItem>,
    ) -> SequentialResult {
        let mut processor = self.current()?.processor(pipeline)?;
        processor.run_sequential(ctx, items).await
    }

    pub async fn run_concurrent(
        &self,
        ctx: &dyn ExecutionContext,
        pipeline: &str,
        items: Vec<ProcessableItem>,
        sinks: Sinks,
    ) -> Result<Vec<ProcessableItem>> {
        let mut processor = self.current()?.processor(pipeline)?;
        processor.run_concurrent(ctx, items, sinks).await
    }
}
