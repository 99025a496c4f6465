use async_graphql::{Context, EmptySubscription, Json, Object, Schema};
use serde_json::Value;
use std::sync::Arc;

use crate::domain::event::ChangeEvent;
use crate::domain::resource::ResourceSnapshot;
use crate::domain::service::{CollectiveService, ServiceHealth};

pub type CollectiveSchema = Schema<QueryRoot, MutationRoot, EmptySubscription>;

pub struct QueryRoot;

#[Object]
impl QueryRoot {
    async fn health(&self, ctx: &Context<'_>) -> async_graphql::Result<ServiceHealth> {
        let svc = ctx.data::<Arc<CollectiveService>>()?;
        Ok(svc.health().await)
    }

    /// Resolve a resource path such as `clusters/c1/apps/snoop`.
    async fn resource(&self, ctx: &Context<'_>, path: String) -> async_graphql::Result<Option<ResourceSnapshot>> {
        let svc = ctx.data::<Arc<CollectiveService>>()?;
        svc.resolve(&path)
            .await
            .map_err(|e| async_graphql::Error::new(e.to_string()))
    }
}

pub struct MutationRoot;

#[Object]
impl MutationRoot {
    /// Apply one change-event or an array of them. Returns how many reached a
    /// loaded resource.
    async fn apply_events(&self, ctx: &Context<'_>, events: Json<Value>) -> async_graphql::Result<u64> {
        let svc = ctx.data::<Arc<CollectiveService>>()?;
        let events = ChangeEvent::parse_many(events.0).map_err(|e| async_graphql::Error::new(e.to_string()))?;
        Ok(svc.apply_events(&events).await as u64)
    }
}

pub fn build_schema(collective: Arc<CollectiveService>) -> CollectiveSchema {
    Schema::build(QueryRoot, MutationRoot, EmptySubscription)
        .data(collective)
        .finish()
}
