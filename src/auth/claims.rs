use serde::{Deserialize, Serialize};
use uuid::Uuid;

/// JWT payload. Carries the role so guards need no store lookup.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct Claims {
    pub sub: Uuid,      // user ID
    pub name: String,   // display name at issuance
    pub email: String,  // email at issuance
    pub is_admin: bool, // administrator flag at issuance
    pub iat: usize,     // issued at (unix timestamp)
    pub exp: usize,     // expires at (unix timestamp)
    pub iss: String,    // issuer
    pub aud: String,    // audience
}
