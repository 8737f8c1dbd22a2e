//! Deploy runner
//!
//! Deploys always run in the background and hold their hosts exclusively
//! until they finish.

use serde_json::Value as JsonValue;
use std::sync::Arc;

use volley_core::domain::job::OperateArgs;
use volley_core::dto::operation::Operation;
use volley_core::{Error, Result};

use super::{Dispatch, launch, require_targets};
use crate::context::AppContext;

const ERR_BAD_ROLE: &str = "role should be string types";
const ERR_BAD_PARTIAL: &str = "partial should be string list or omitted";
const ERR_BAD_EXTRAVARS: &str = "extra vars should be an json object or omitted";

pub struct DeployRunner {
    ctx: Arc<AppContext>,
}

impl DeployRunner {
    pub fn new(ctx: Arc<AppContext>) -> Self {
        Self { ctx }
    }

    /// Launches a deploy job
    ///
    /// # Arguments
    /// * `targets` - Hosts to deploy on
    /// * `role` - Role to apply
    /// * `extra_vars` - JSON object of variables, or nothing
    /// * `partial` - Non-empty list of step names to restrict the run to, or nothing
    /// * `run_async` - Must be true
    pub async fn handle(
        &self,
        targets: Vec<String>,
        role: String,
        extra_vars: Option<JsonValue>,
        partial: Option<JsonValue>,
        run_async: bool,
    ) -> Result<Dispatch> {
        if !run_async {
            return Err(Error::NotSupported(
                "deploy can only run asynchronously".to_string(),
            ));
        }

        let targets = require_targets(targets)?;
        let role = role.trim().to_string();
        if role.is_empty() {
            return Err(Error::Invalid(ERR_BAD_ROLE.to_string()));
        }
        let extra_vars = parse_extra_vars(extra_vars)?;
        let partial = parse_partial(partial)?;

        let operation = Operation::Deploy {
            role,
            extra_vars,
            partial,
        };
        launch(&self.ctx, targets, operation)
            .await
            .map(Dispatch::Launched)
    }
}

fn parse_extra_vars(value: Option<JsonValue>) -> Result<OperateArgs> {
    match value {
        None | Some(JsonValue::Null) => Ok(OperateArgs::new()),
        Some(JsonValue::Object(vars)) => Ok(vars),
        Some(_) => Err(Error::Invalid(ERR_BAD_EXTRAVARS.to_string())),
    }
}

fn parse_partial(value: Option<JsonValue>) -> Result<Option<Vec<String>>> {
    let items = match value {
        None | Some(JsonValue::Null) => return Ok(None),
        Some(JsonValue::Array(items)) if !items.is_empty() => items,
        Some(_) => return Err(Error::Invalid(ERR_BAD_PARTIAL.to_string())),
    };

    items
        .into_iter()
        .map(|item| match item {
            JsonValue::String(tag) if !tag.is_empty() => Ok(tag),
            _ => Err(Error::Invalid(ERR_BAD_PARTIAL.to_string())),
        })
        .collect::<Result<Vec<String>>>()
        .map(Some)
}
