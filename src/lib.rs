#![doc = include_str!("../README.md")]

pub mod backend;
pub mod callback;
pub mod claims;
pub mod client;
pub mod error;
pub mod middleware;
pub mod pkce;
pub mod policy;
pub mod store;
#[cfg(feature = "supabase")]
pub mod supabase;
pub mod types;

#[cfg(test)]
pub(crate) mod testing;

// Re-exports for convenient access
pub use backend::{AuthBackend, OAuthProvider, OAuthRequest, PasswordCredentials};
pub use callback::{CallbackMachine, CallbackOutcome, CallbackQuery, CallbackRequest, CallbackRoutes};
pub use client::{AuthClient, AuthEvent, BrowserCookies, CookieAdapter, CookieNames, Subscription};
pub use error::Error;
pub use policy::{CookiePolicy, Environment, SESSION_MAX_AGE, policy_for};
pub use store::{AuthState, DurableCache, MemoryCache, SessionStore, StateChange};
#[cfg(feature = "supabase")]
pub use supabase::SupabaseClient;
pub use types::{OtpType, Session, User, UserId};
