//! HR vertical slice.
//!
//! Departments and employees with the cross-entity rules that keep them
//! consistent: unique department names and employee emails, department
//! capacity, and no orphaned employees. Every mutation runs its checks and its
//! write inside one transaction, locking the department row the decision is
//! about.

pub mod demo;
pub mod departments;
pub mod employees;
mod error;
pub mod requests;

pub use departments::{DepartmentInput, DepartmentView};
pub use employees::{EmployeeInput, EmployeeView};
pub use error::{HrError, HrResult};

#[cfg(test)]
pub(crate) mod testing;
