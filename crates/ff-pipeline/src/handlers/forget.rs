use std::sync::Arc;

use async_trait::async_trait;
use ff_core::Result;

use crate::handler::{HandlerResult, OperationHandler, Sinks};
use crate::item::ProcessableItem;
use crate::params::ResolvedParams;

/// Drops every item it receives. Useful as a terminal stage when only side
/// effects matter, and to end a run early.
#[derive(Debug, Default)]
pub struct Forget;

impl Forget {
    pub const NAME: &'static str = "forget";

    pub fn from_params(_params: &ResolvedParams) -> Result<Arc<dyn OperationHandler>> {
        Ok(Arc::new(Self))
    }
}

#[async_trait]
impl OperationHandler for Forget {
    fn name(&self) -> &str {
        Self::NAME
    }

    fn allows_concurrency(&self) -> bool {
        true
    }

    async fn handle(&self, items: Vec<ProcessableItem>, _sinks: &Sinks) -> HandlerResult {
        tracing::debug!("Forgetting {} item(s)", items.len());
        Ok(Vec::new())
    }
}
