//! Request authentication and session authorization for the stats API.
//! Keep the public surface thin and split implementation across sub-modules.

mod authorizer;
mod policy;
mod principal;
mod session;
mod token;

pub use authorizer::{
    RequestAuthorizer, RequestMeta, HDR_API_TIMESTAMP, HDR_API_TOKEN, HDR_APP_TIMESTAMP,
    HDR_APP_TOKEN, HDR_SESSION_TOKEN,
};
pub use policy::{Decision, Mechanism, Policy, ReasonCode};
pub use principal::Principal;
pub use session::{SessionRejection, SessionStore, SESSION_TTL_SECS};
pub use token::{
    constant_time_eq, derive_frontend_hash, derive_path_token, normalize_path,
    validate_frontend_hash, validate_path_token, FRONTEND_HASH_MAX_AGE_SECS,
    PATH_TOKEN_MAX_AGE_SECS,
};
