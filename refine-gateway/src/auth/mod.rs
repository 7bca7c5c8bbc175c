//! Token minting/verification and the two resource access checks named in
//! the authorization design (workflow ownership, proposal access). Both the
//! plain HTTP bearer path (`r2e_security::AuthenticatedUser`) and the
//! WebSocket gate (`RefinementSessionAuth`) validate through the same
//! [`r2e_security::JwtClaimsValidator`] instance, built once in
//! [`token::build_validator`].

pub mod access;
pub mod token;
pub mod ws_gate;

pub use ws_gate::RefinementSessionAuth;
