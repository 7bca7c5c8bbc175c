//! Plain CRUD/read queries with no transactional or locking concerns of
//! their own. Proposal resolution (approve/reject) and the terminal
//! snapshot write live in [`crate::services`] instead, since they need a
//! `SELECT ... FOR UPDATE` row lock spanning more than one statement.

pub mod drafts;
pub mod proposals;
pub mod users;
pub mod workflows;
