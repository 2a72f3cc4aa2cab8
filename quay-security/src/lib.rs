pub mod auth;
pub mod csrf;
pub mod error;
pub mod headers;
pub mod jwt;
pub mod principal;
pub mod stage;

pub use auth::{AuthStage, TokenSource};
pub use csrf::{mint_token, CsrfGuard};
pub use error::SecurityError;
pub use headers::SecurityHeaders;
pub use jwt::TokenValidator;
pub use principal::Principal;
pub use stage::SecurityStage;
