mod user_auth;

pub use user_auth::*;
