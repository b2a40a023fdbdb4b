use serde::Deserialize;
use serde::Serialize;

/// Immutable per-endpoint identity, bound once at authentication time.
///
/// `route_id` is the route this endpoint may claim as `source` on requests
/// it originates. Router-kind endpoints do not claim a route at all.
#[derive(Debug, Clone, Default, Serialize, Deserialize, PartialEq, Eq)]
#[serde(rename_all = "camelCase")]
pub struct RpcContext {
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub route_id: Option<String>,

    #[serde(default)]
    pub is_router: bool,

    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub proc_route: Option<String>,

    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub block_id: Option<String>,

    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub tab_id: Option<String>,

    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub conn: Option<String>,
}

impl RpcContext {
    pub fn for_leaf(route_id: impl Into<String>) -> Self {
        Self {
            route_id: Some(route_id.into()),
            is_router: false,
            ..Default::default()
        }
    }

    pub fn for_router() -> Self {
        Self {
            is_router: true,
            ..Default::default()
        }
    }
}
