mod claims;
mod session;
mod signing;

pub use claims::*;
pub use session::SessionVerifier;
pub use signing::*;
