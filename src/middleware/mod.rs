//! Session protocol integration for Axum.
//!
//! The edge refresher, the server extractor and the auth routes all build an
//! [`AuthClient`](crate::client::AuthClient) over the request's cookies, so every
//! context reads and writes the session the same way.
//!
//! # Quick Start
//!
//! ```rust,ignore
//! use lomi_session::middleware::{SessionConfig, SessionContext, auth_routes, refresh_session};
//! use lomi_session::supabase::SupabaseClient;
//!
//! // 1. Configure from environment
//! let context = SessionContext::new(SessionConfig::from_env()?);
//!
//! // 2. Mount auth routes (callback, sign-out, developer info)
//! let app = axum::Router::new()
//!     .merge(auth_routes(context.clone(), directory))
//!     // 3. Refresh sessions at the edge of every request
//!     .layer(axum::middleware::from_fn_with_state(
//!         context,
//!         refresh_session::<SupabaseClient>,
//!     ));
//!
//! // 4. Read the session in handlers with the `ServerSession` extractor
//! ```

mod config;
mod cookies;
mod edge;
mod error;
mod extractor;
mod routes;
mod state;
mod traits;
mod types;

pub use config::SessionConfig;
pub use cookies::RequestCookies;
pub use edge::refresh_session;
pub use error::AuthError;
pub use extractor::ServerSession;
pub use routes::auth_routes;
pub use state::SessionContext;
pub use traits::DeveloperDirectory;
pub use types::{DeveloperIds, DeveloperInfo};
