//! Staff authentication: bcrypt passwords + JWT
//!
//! Provides:
//! - JWT token encoding/decoding (`jwt` submodule)
//! - Password hashing and verification (`password` submodule)
//! - Bearer-token middleware for the admin routes (`middleware` submodule)

pub mod jwt;
pub mod middleware;
pub mod password;
