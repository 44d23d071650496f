//! Admin HTTP interface
//!
//! JSON routes to inspect the cluster and change its topology or strategy
//! at runtime.

mod handlers;
mod server;

pub use handlers::{
    AddNodeRequest, ApiError, AppState, ConfigFileResponse, ErrorResponse, StrategyRequest,
};
pub use server::{router, run_admin_server};
