use serde::{Deserialize, Serialize};
use utoipa::ToSchema;

/// A plain status message, returned by the liveness route.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize, ToSchema)]
pub struct StatusMessage {
    pub message: String,
}
