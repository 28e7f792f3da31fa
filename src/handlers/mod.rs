pub mod browser_handlers;
pub mod bucket_handlers;
pub mod health_handlers;

#[cfg(test)]
pub(crate) mod test_support {
    use crate::services::{
        console_service::ConsoleService,
        hierarchy::HierarchyEngine,
        path_codec::PathCodec,
        retry::RetryPolicy,
        stats::{StatsAggregator, StatsPolicy},
        store::MemoryStore,
    };
    use axum::{body::to_bytes, response::Response};
    use serde_json::Value;
    use std::sync::Arc;

    pub fn console() -> ConsoleService {
        let hierarchy = HierarchyEngine::new(
            Arc::new(MemoryStore::new()),
            PathCodec::default(),
            RetryPolicy::default(),
            1000,
        );
        ConsoleService::new(
            Arc::new(StatsAggregator::new(hierarchy, StatsPolicy::default())),
            false,
        )
    }

    pub async fn json_body(response: Response) -> Value {
        let bytes = to_bytes(response.into_body(), usize::MAX)
            .await
            .unwrap_or_else(|e| panic!("reading body failed: {e}"));
        serde_json::from_slice(&bytes).unwrap_or_else(|e| panic!("body is not JSON: {e}"))
    }
}
