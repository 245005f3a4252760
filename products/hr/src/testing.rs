use chrono::NaiveDate;
use migration::{Migrator, MigratorTrait};
use rust_decimal::Decimal;
use sea_orm::{Database, DatabaseConnection};
use uuid::Uuid;

use crate::{DepartmentInput, EmployeeInput};

pub(crate) async fn test_db() -> DatabaseConnection {
    let db = Database::connect("sqlite::memory:").await.unwrap();
    Migrator::up(&db, None).await.unwrap();
    db
}

pub(crate) fn department(name: &str, capacity: i32) -> DepartmentInput {
    DepartmentInput {
        name: name.into(),
        capacity,
        description: None,
    }
}

pub(crate) fn employee(email: &str, department_id: Uuid) -> EmployeeInput {
    let local = email.split('@').next().unwrap_or(email);
    EmployeeInput {
        first_name: local.to_string(),
        last_name: "Tester".into(),
        email: email.into(),
        position: "Engineer".into(),
        department_id,
        salary: Decimal::new(5_000_000, 2),
        hire_date: NaiveDate::from_ymd_opt(2023, 3, 1).unwrap(),
    }
}
