//! sea-orm entities for the HR server.

pub mod departments;
pub mod employees;
pub mod sessions;
pub mod users;
