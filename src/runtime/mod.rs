//! Runtime adapters: tokio spawner, operator control plane and admin HTTP
//! surface.

pub mod api;
pub mod control;
pub mod tokio_spawner;

pub use api::{rate_limit_middleware, router, serve, ApiError, OPERATOR_HEADER, TENANT_HEADER};
pub use control::{
    ConfigUpdateRequest, ControlPlane, ControlResponse, MemoryAction, MemoryControlRequest,
    MemoryControlResponse, MemoryOverview, QueueAction, QueueControlRequest,
};
pub use tokio_spawner::TokioSpawner;
