//! Demo fixture used by `hr-server seed`.

use chrono::NaiveDate;
use entity::employees;
use rust_decimal::Decimal;
use sea_orm::{ColumnTrait, DatabaseConnection, EntityTrait, PaginatorTrait, QueryFilter};
use tracing::info;

use crate::{
    DepartmentInput, DepartmentView, EmployeeInput, HrResult, departments,
    employees as employee_rules,
};

struct DemoDepartment {
    name: &'static str,
    capacity: i32,
    description: &'static str,
}

struct DemoEmployee {
    first_name: &'static str,
    last_name: &'static str,
    email: &'static str,
    position: &'static str,
    department: &'static str,
    salary_cents: i64,
    hired: (i32, u32, u32),
}

const DEPARTMENTS: &[DemoDepartment] = &[
    DemoDepartment {
        name: "Engineering",
        capacity: 5,
        description: "Product development and platform work",
    },
    DemoDepartment {
        name: "Finance",
        capacity: 2,
        description: "Payroll, budgeting and reporting",
    },
    DemoDepartment {
        name: "People Operations",
        capacity: 3,
        description: "Hiring and onboarding",
    },
];

const EMPLOYEES: &[DemoEmployee] = &[
    DemoEmployee {
        first_name: "Ada",
        last_name: "Lovelace",
        email: "ada@hr.test",
        position: "Principal Engineer",
        department: "Engineering",
        salary_cents: 14_500_000,
        hired: (2021, 3, 15),
    },
    DemoEmployee {
        first_name: "Linus",
        last_name: "Torvalds",
        email: "linus@hr.test",
        position: "Staff Engineer",
        department: "Engineering",
        salary_cents: 13_250_000,
        hired: (2022, 1, 10),
    },
    DemoEmployee {
        first_name: "Grace",
        last_name: "Hopper",
        email: "grace@hr.test",
        position: "Controller",
        department: "Finance",
        salary_cents: 11_000_000,
        hired: (2020, 9, 1),
    },
    DemoEmployee {
        first_name: "Frances",
        last_name: "Allen",
        email: "frances@hr.test",
        position: "Recruiter",
        department: "People Operations",
        salary_cents: 7_850_050,
        hired: (2023, 6, 19),
    },
];

/// What a seed run touched.
#[derive(Debug, Default)]
pub struct SeedReport {
    pub departments: Vec<DepartmentView>,
    pub employees_created: usize,
}

impl SeedReport {
    pub fn department_named(&self, name: &str) -> Option<&DepartmentView> {
        self.departments.iter().find(|d| d.name == name)
    }
}

/// Creates the demo departments and employees through the rules engines.
/// Records that already exist (by department name or employee email) are
/// left alone, so running it twice is harmless.
pub async fn seed_demo(db: &DatabaseConnection) -> HrResult<SeedReport> {
    let existing = departments::list(db).await?;
    let mut report = SeedReport::default();

    for demo in DEPARTMENTS {
        let department = match existing.iter().find(|d| d.name == demo.name) {
            Some(found) => found.clone(),
            None => {
                departments::create(
                    db,
                    DepartmentInput {
                        name: demo.name.into(),
                        capacity: demo.capacity,
                        description: Some(demo.description.into()),
                    },
                )
                .await?
            }
        };
        report.departments.push(department);
    }

    for demo in EMPLOYEES {
        let Some(department) = report.department_named(demo.department) else {
            continue;
        };
        let already = employees::Entity::find()
            .filter(employees::Column::Email.eq(demo.email))
            .count(db)
            .await?;
        if already > 0 {
            continue;
        }
        let (year, month, day) = demo.hired;
        let Some(hire_date) = NaiveDate::from_ymd_opt(year, month, day) else {
            continue;
        };
        employee_rules::create(
            db,
            EmployeeInput {
                first_name: demo.first_name.into(),
                last_name: demo.last_name.into(),
                email: demo.email.into(),
                position: demo.position.into(),
                department_id: department.id,
                salary: Decimal::new(demo.salary_cents, 2),
                hire_date,
            },
        )
        .await?;
        report.employees_created += 1;
    }

    info!(
        departments = report.departments.len(),
        employees_created = report.employees_created,
        "demo data seeded"
    );
    Ok(report)
}
