//! Persistent JWT access/refresh tokens.

mod claims;
mod codec;
mod issuer;

pub use claims::{AuthMethod, Claims, Role, TokenType};
pub use codec::{Algorithm, TokenCodec};
pub use issuer::{AccessExtra, IssuedToken, TokenIssuer, new_jti};
