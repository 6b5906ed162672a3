use axum::{extract::Query, routing::get, Json, Router};
use serde_json::{json, Map, Value};
use std::collections::BTreeMap;
use std::sync::Arc;
use tracing::error;

use crate::database::repository::Repository;
use crate::error::ApiError;
use crate::filter::Filter;
use crate::resource::{AppState, ResourceDescriptor};

/// Aggregate counts across every registered resource, optionally narrowed to
/// one owner. Counts run concurrently since each is an independent query.
pub fn router(state: AppState, descriptors: Vec<Arc<ResourceDescriptor>>) -> Router {
    Router::new().route(
        "/dashboard/summary",
        get(move |Query(params): Query<BTreeMap<String, String>>| {
            summary(state, descriptors, params)
        }),
    )
}

async fn summary(
    state: AppState,
    descriptors: Vec<Arc<ResourceDescriptor>>,
    params: BTreeMap<String, String>,
) -> Result<Json<Value>, ApiError> {
    let owner = params.get("owner").cloned();

    let counts = futures::future::try_join_all(descriptors.iter().map(|descriptor| {
        let pool = state.pool.clone();
        let owner = owner.clone();
        async move {
            let mut filter = Filter::new(&descriptor.table)?;
            if let Some(owner) = &owner {
                filter = filter.eq(&descriptor.owner_field, json!(owner))?;
            }
            let repo = Repository::new(&descriptor.table, pool)?;
            let count = repo.count(&filter).await.map_err(|e| {
                error!("count failed for {}: {}", descriptor.table, e);
                ApiError::from(e)
            })?;
            Ok::<_, ApiError>((descriptor.path.clone(), count))
        }
    }))
    .await?;

    let mut data = Map::new();
    for (path, count) in counts {
        data.insert(path, json!(count));
    }
    if let Some(owner) = owner {
        data.insert("owner".to_string(), json!(owner));
    }
    Ok(Json(json!({ "success": true, "data": data })))
}
