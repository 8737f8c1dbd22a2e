//! Target runner
//!
//! Resolves a host pattern through the execution engine. Always synchronous.

use std::sync::Arc;

use volley_core::{Error, Result};

use crate::context::AppContext;

pub struct TargetRunner {
    ctx: Arc<AppContext>,
}

impl TargetRunner {
    pub fn new(ctx: Arc<AppContext>) -> Self {
        Self { ctx }
    }

    /// Returns the hosts matching `pattern`, every host when omitted
    pub async fn handle(&self, pattern: Option<String>, run_async: bool) -> Result<Vec<String>> {
        if run_async {
            return Err(Error::NotSupported(
                "target matching cannot run asynchronously".to_string(),
            ));
        }

        let pattern = pattern
            .filter(|p| !p.trim().is_empty())
            .unwrap_or_else(|| "*".to_string());
        self.ctx.executor.target(&pattern).await
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    use crate::context::testing;

    #[tokio::test]
    async fn test_pattern_defaults_to_all() {
        let (ctx, _, _) = testing::context();
        let runner = TargetRunner::new(ctx);

        assert_eq!(runner.handle(None, false).await.unwrap(), vec!["h1", "h2", "h3"]);
        assert_eq!(
            runner.handle(Some("h2".to_string()), false).await.unwrap(),
            vec!["h2"]
        );
    }

    #[tokio::test]
    async fn test_async_not_supported() {
        let (ctx, _, _) = testing::context();
        assert!(matches!(
            TargetRunner::new(ctx).handle(None, true).await,
            Err(Error::NotSupported(_))
        ));
    }
}
