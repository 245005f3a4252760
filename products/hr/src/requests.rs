//! Request bodies as they arrive over the wire.
//!
//! Every field is optional so that a missing field becomes a field error
//! instead of a decoder rejection. `validate` trims strings, applies the
//! syntactic rules and yields the input type the rules engines accept.

use chrono::NaiveDate;
use platform_api::FieldErrors;
use rust_decimal::Decimal;
use serde::Deserialize;
use uuid::Uuid;
use validator::ValidateEmail;

use crate::{DepartmentInput, EmployeeInput, HrError, HrResult};

const MAX_SALARY: Decimal = Decimal::from_parts(3_567_587_327, 232, 0, false, 2);

#[derive(Clone, Debug, Default, Deserialize)]
#[serde(rename_all = "camelCase", default)]
pub struct DepartmentRequest {
    pub name: Option<String>,
    pub capacity: Option<i32>,
    pub description: Option<String>,
}

impl DepartmentRequest {
    pub fn validate(self) -> HrResult<DepartmentInput> {
        let mut errors = FieldErrors::new();
        let name = required_text(
            &mut errors,
            "name",
            self.name,
            "Department name is required",
            100,
            "Department name must not exceed 100 characters",
        );
        let capacity = match self.capacity {
            None => {
                errors.insert("capacity".into(), "Capacity is required".into());
                None
            }
            Some(c) if c < 1 => {
                errors.insert("capacity".into(), "Capacity must be at least 1".into());
                None
            }
            Some(c) => Some(c),
        };
        let description = self
            .description
            .map(|d| d.trim().to_string())
            .filter(|d| !d.is_empty());
        if description.as_ref().is_some_and(|d| d.chars().count() > 1000) {
            errors.insert(
                "description".into(),
                "Description must not exceed 1000 characters".into(),
            );
        }

        match (name, capacity) {
            (Some(name), Some(capacity)) if errors.is_empty() => Ok(DepartmentInput {
                name,
                capacity,
                description,
            }),
            _ => Err(HrError::Validation(errors)),
        }
    }
}

#[derive(Clone, Debug, Default, Deserialize)]
#[serde(rename_all = "camelCase", default)]
pub struct EmployeeRequest {
    pub first_name: Option<String>,
    pub last_name: Option<String>,
    pub email: Option<String>,
    pub position: Option<String>,
    pub department_id: Option<Uuid>,
    pub salary: Option<Decimal>,
    pub hire_date: Option<NaiveDate>,
}

impl EmployeeRequest {
    /// `today` bounds the hire date; callers pass the current UTC date.
    pub fn validate(self, today: NaiveDate) -> HrResult<EmployeeInput> {
        let mut errors = FieldErrors::new();
        let first_name = required_text(
            &mut errors,
            "firstName",
            self.first_name,
            "First name is required",
            50,
            "First name must not exceed 50 characters",
        );
        let last_name = required_text(
            &mut errors,
            "lastName",
            self.last_name,
            "Last name is required",
            50,
            "Last name must not exceed 50 characters",
        );
        let email = required_text(
            &mut errors,
            "email",
            self.email,
            "Email is required",
            100,
            "Email must not exceed 100 characters",
        )
        .filter(|email| {
            let valid = email.validate_email();
            if !valid {
                errors.insert("email".into(), "Email must be valid".into());
            }
            valid
        });
        let position = required_text(
            &mut errors,
            "position",
            self.position,
            "Position is required",
            100,
            "Position must not exceed 100 characters",
        );
        if self.department_id.is_none() {
            errors.insert("departmentId".into(), "Department ID is required".into());
        }
        let salary = match self.salary.map(|s| s.round_dp(2)) {
            None => {
                errors.insert("salary".into(), "Salary is required".into());
                None
            }
            Some(s) if s <= Decimal::ZERO => {
                errors.insert("salary".into(), "Salary must be greater than 0".into());
                None
            }
            Some(s) if s > MAX_SALARY => {
                errors.insert(
                    "salary".into(),
                    format!("Salary must not exceed {MAX_SALARY}"),
                );
                None
            }
            Some(s) => Some(s),
        };
        let hire_date = match self.hire_date {
            None => {
                errors.insert("hireDate".into(), "Hire date is required".into());
                None
            }
            Some(d) if d > today => {
                errors.insert(
                    "hireDate".into(),
                    "Hire date cannot be in the future".into(),
                );
                None
            }
            Some(d) => Some(d),
        };

        match (
            first_name,
            last_name,
            email,
            position,
            self.department_id,
            salary,
            hire_date,
        ) {
            (
                Some(first_name),
                Some(last_name),
                Some(email),
                Some(position),
                Some(department_id),
                Some(salary),
                Some(hire_date),
            ) if errors.is_empty() => Ok(EmployeeInput {
                first_name,
                last_name,
                email,
                position,
                department_id,
                salary,
                hire_date,
            }),
            _ => Err(HrError::Validation(errors)),
        }
    }
}

fn required_text(
    errors: &mut FieldErrors,
    field: &str,
    value: Option<String>,
    missing: &str,
    max_chars: usize,
    too_long: &str,
) -> Option<String> {
    let value = value.map(|v| v.trim().to_string()).unwrap_or_default();
    if value.is_empty() {
        errors.insert(field.into(), missing.into());
        None
    } else if value.chars().count() > max_chars {
        errors.insert(field.into(), too_long.into());
        None
    } else {
        Some(value)
    }
}
