mod auth;
mod middleware;
mod protocol;
mod routes;
mod server;
mod state;

pub use protocol::ApiError;
pub use server::{build_router, GatewayServer};
pub use state::AppState;
