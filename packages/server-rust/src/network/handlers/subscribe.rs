//! `GET /dapr/subscribe`: advertises the node's pub/sub subscriptions to the
//! sidecar. Events are then delivered as ordinary calls to each route.

use axum::extract::State;
use axum::Json;
use serde::Serialize;

use super::AppState;

/// One entry of the sidecar subscription list.
#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct SubscriptionEntry {
    pub pubsubname: String,
    pub topic: String,
    pub route: String,
}

pub async fn subscribe_handler(State(state): State<AppState>) -> Json<Vec<SubscriptionEntry>> {
    let pubsubname = &state.config.pubsub_component_name;
    let entries = state
        .registration
        .subscriptions()
        .iter()
        .map(|s| SubscriptionEntry {
            pubsubname: pubsubname.clone(),
            topic: s.topic.clone(),
            route: s.route(),
        })
        .collect();
    Json(entries)
}
