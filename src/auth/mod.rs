pub mod claims;
pub mod guards;
pub mod jwt;
pub mod password;
