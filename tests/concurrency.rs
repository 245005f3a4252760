use anyhow::Result;
use chrono::NaiveDate;
use hr_tests::{Cli, migrated_pool, postgres_image};
use platform_db::IdentityProfile;
use products_hr::{DepartmentInput, EmployeeInput, HrError, departments, employees};
use rust_decimal::Decimal;
use sea_orm::DatabaseConnection;
use uuid::Uuid;

fn department(name: &str, capacity: i32) -> DepartmentInput {
    DepartmentInput {
        name: name.into(),
        capacity,
        description: None,
    }
}

fn employee(email: String, department_id: Uuid) -> EmployeeInput {
    EmployeeInput {
        first_name: "Load".into(),
        last_name: "Tester".into(),
        email,
        position: "Engineer".into(),
        department_id,
        salary: Decimal::new(6_000_000, 2),
        hire_date: NaiveDate::from_ymd_opt(2024, 1, 2).expect("valid date"),
    }
}

async fn hire_all(
    pool: &DatabaseConnection,
    inputs: Vec<EmployeeInput>,
) -> Vec<Result<products_hr::EmployeeView, HrError>> {
    let tasks: Vec<_> = inputs
        .into_iter()
        .map(|input| {
            let pool = pool.clone();
            tokio::spawn(async move { employees::create(&pool, input).await })
        })
        .collect();
    let mut results = Vec::with_capacity(tasks.len());
    for task in tasks {
        results.push(task.await.expect("hire task panicked"));
    }
    results
}

#[tokio::test]
#[ignore = "requires a Docker daemon"]
async fn parallel_hires_never_overfill_a_department() -> Result<()> {
    let docker = Cli::default();
    let container = docker.run(postgres_image());
    let pool = migrated_pool(container.get_host_port_ipv4(5432)).await?;

    let dept = departments::create(&pool, department("Engineering", 3)).await?;
    let inputs = (0..12)
        .map(|n| employee(format!("hire{n}@hr.test"), dept.id))
        .collect();
    let results = hire_all(&pool, inputs).await;

    let hired = results.iter().filter(|r| r.is_ok()).count();
    assert_eq!(hired, 3);
    assert!(
        results
            .iter()
            .filter_map(|r| r.as_ref().err())
            .all(|err| matches!(err, HrError::InvalidState(_)))
    );
    let dept = departments::get(&pool, dept.id).await?;
    assert_eq!(dept.employee_count, 3);
    Ok(())
}

#[tokio::test]
#[ignore = "requires a Docker daemon"]
async fn parallel_hires_with_one_email_admit_exactly_one() -> Result<()> {
    let docker = Cli::default();
    let container = docker.run(postgres_image());
    let pool = migrated_pool(container.get_host_port_ipv4(5432)).await?;

    let eng = departments::create(&pool, department("Engineering", 10)).await?;
    let ops = departments::create(&pool, department("Operations", 10)).await?;
    let inputs = (0..8)
        .map(|n| {
            let target = if n % 2 == 0 { eng.id } else { ops.id };
            employee("same@hr.test".into(), target)
        })
        .collect();
    let results = hire_all(&pool, inputs).await;

    assert_eq!(results.iter().filter(|r| r.is_ok()).count(), 1);
    assert!(
        results
            .iter()
            .filter_map(|r| r.as_ref().err())
            .all(|err| matches!(err, HrError::Conflict(_)))
    );
    assert_eq!(employees::list(&pool).await?.len(), 1);
    Ok(())
}

#[tokio::test]
#[ignore = "requires a Docker daemon"]
async fn delete_racing_a_hire_never_orphans_an_employee() -> Result<()> {
    let docker = Cli::default();
    let container = docker.run(postgres_image());
    let pool = migrated_pool(container.get_host_port_ipv4(5432)).await?;

    for round in 0..10 {
        let dept =
            departments::create(&pool, department(&format!("Team {round}"), 5)).await?;
        let hire = {
            let pool = pool.clone();
            let input = employee(format!("racer{round}@hr.test"), dept.id);
            tokio::spawn(async move { employees::create(&pool, input).await })
        };
        let removal = {
            let pool = pool.clone();
            tokio::spawn(async move { departments::delete(&pool, dept.id).await })
        };
        let hire = hire.await?;
        let removal = removal.await?;

        match (&hire, &removal) {
            (Ok(_), Err(HrError::Conflict(_))) => {}
            (Err(HrError::NotFound { .. }), Ok(())) => {}
            other => panic!("round {round}: unexpected outcome {other:?}"),
        }
    }
    Ok(())
}

#[tokio::test]
#[ignore = "requires a Docker daemon"]
async fn parallel_logins_share_one_user_row() -> Result<()> {
    let docker = Cli::default();
    let container = docker.run(postgres_image());
    let pool = migrated_pool(container.get_host_port_ipv4(5432)).await?;

    let tasks: Vec<_> = (0..8)
        .map(|n| {
            let pool = pool.clone();
            tokio::spawn(async move {
                let profile = IdentityProfile {
                    provider: "google".into(),
                    provider_id: "google-sub-42".into(),
                    email: Some("ada@hr.test".into()),
                    name: Some(format!("Ada {n}")),
                    picture_url: None,
                };
                platform_db::upsert_user(&pool, &profile).await
            })
        })
        .collect();
    let mut ids = Vec::new();
    for task in tasks {
        ids.push(task.await??.id);
    }

    ids.dedup();
    assert_eq!(ids.len(), 1);
    assert_eq!(platform_db::user_count(&pool).await?, 1);
    Ok(())
}
