//! Caller credentials.
//!
//! Login happens elsewhere; this server only reads the bearer token that login left in a cookie
//! and forwards it to the resource store, which decides what the caller may touch.

pub mod bearer;

pub use bearer::Bearer;
