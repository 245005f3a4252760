use chrono::{NaiveDate, Utc};
use entity::{departments, employees};
use rust_decimal::Decimal;
use sea_orm::prelude::DateTimeWithTimeZone;
use sea_orm::{
    ActiveModelTrait, ActiveValue::Set, ColumnTrait, ConnectionTrait, DatabaseConnection,
    EntityTrait, PaginatorTrait, QueryFilter, QueryOrder, QuerySelect, TransactionTrait,
};
use serde::Serialize;
use tracing::{info, instrument};
use uuid::Uuid;

use crate::{HrError, HrResult, departments as department_rules};

/// Validated employee fields, as accepted by [`create`] and [`update`].
#[derive(Clone, Debug, PartialEq, Eq)]
pub struct EmployeeInput {
    pub first_name: String,
    pub last_name: String,
    pub email: String,
    pub position: String,
    pub department_id: Uuid,
    pub salary: Decimal,
    pub hire_date: NaiveDate,
}

#[derive(Clone, Debug, PartialEq, Eq, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct EmployeeView {
    pub id: Uuid,
    pub first_name: String,
    pub last_name: String,
    pub email: String,
    pub position: String,
    pub department_id: Uuid,
    pub department_name: String,
    pub salary: Decimal,
    pub hire_date: NaiveDate,
    pub created_at: DateTimeWithTimeZone,
    pub updated_at: DateTimeWithTimeZone,
}

impl EmployeeView {
    pub(crate) fn from_parts(model: employees::Model, department: &departments::Model) -> Self {
        Self {
            id: model.id,
            first_name: model.first_name,
            last_name: model.last_name,
            email: model.email,
            position: model.position,
            department_id: model.department_id,
            department_name: department.name.clone(),
            salary: model.salary,
            hire_date: model.hire_date,
            created_at: model.created_at,
            updated_at: model.updated_at,
        }
    }

    fn from_joined(row: (employees::Model, Option<departments::Model>)) -> HrResult<Self> {
        match row {
            (model, Some(department)) => Ok(Self::from_parts(model, &department)),
            (model, None) => Err(HrError::department_not_found(model.department_id)),
        }
    }
}

/// Checks run in order: email uniqueness, department existence, capacity.
#[instrument(name = "hr.employees.create", skip_all, fields(department_id = %input.department_id))]
pub async fn create(db: &DatabaseConnection, input: EmployeeInput) -> HrResult<EmployeeView> {
    let txn = db.begin().await?;
    if email_taken(&txn, &input.email, None).await? {
        return Err(duplicate_email(&input.email));
    }
    let department = department_rules::lock(&txn, input.department_id).await?;
    ensure_room(&txn, &department, "Cannot add employee").await?;

    let now: DateTimeWithTimeZone = Utc::now().into();
    let model = employees::ActiveModel {
        id: Set(Uuid::new_v4()),
        first_name: Set(input.first_name),
        last_name: Set(input.last_name),
        email: Set(input.email),
        position: Set(input.position),
        department_id: Set(department.id),
        salary: Set(input.salary),
        hire_date: Set(input.hire_date),
        created_at: Set(now),
        updated_at: Set(now),
    }
    .insert(&txn)
    .await?;
    txn.commit().await?;
    info!(employee_id = %model.id, "employee created");
    Ok(EmployeeView::from_parts(model, &department))
}

#[instrument(name = "hr.employees.get", skip(db))]
pub async fn get(db: &DatabaseConnection, id: Uuid) -> HrResult<EmployeeView> {
    let row = employees::Entity::find_by_id(id)
        .find_also_related(departments::Entity)
        .one(db)
        .await?
        .ok_or_else(|| HrError::employee_not_found(id))?;
    EmployeeView::from_joined(row)
}

#[instrument(name = "hr.employees.list", skip_all)]
pub async fn list(db: &DatabaseConnection) -> HrResult<Vec<EmployeeView>> {
    employees::Entity::find()
        .find_also_related(departments::Entity)
        .order_by_asc(employees::Column::LastName)
        .order_by_asc(employees::Column::FirstName)
        .all(db)
        .await?
        .into_iter()
        .map(EmployeeView::from_joined)
        .collect()
}

/// Overwrites every field. Capacity is only consulted when the employee moves
/// to a different department; a rejected transfer leaves the row untouched.
#[instrument(name = "hr.employees.update", skip(db, input))]
pub async fn update(
    db: &DatabaseConnection,
    id: Uuid,
    input: EmployeeInput,
) -> HrResult<EmployeeView> {
    let txn = db.begin().await?;
    let existing = employees::Entity::find_by_id(id)
        .lock_exclusive()
        .one(&txn)
        .await?
        .ok_or_else(|| HrError::employee_not_found(id))?;
    if existing.email != input.email && email_taken(&txn, &input.email, Some(id)).await? {
        return Err(duplicate_email(&input.email));
    }

    let department = if existing.department_id != input.department_id {
        let target = department_rules::lock(&txn, input.department_id).await?;
        ensure_room(&txn, &target, "Cannot transfer employee").await?;
        info!(
            employee_id = %id,
            from = %existing.department_id,
            to = %target.id,
            "employee transferred"
        );
        target
    } else {
        departments::Entity::find_by_id(existing.department_id)
            .one(&txn)
            .await?
            .ok_or_else(|| HrError::department_not_found(existing.department_id))?
    };

    let mut active: employees::ActiveModel = existing.into();
    active.first_name = Set(input.first_name);
    active.last_name = Set(input.last_name);
    active.email = Set(input.email);
    active.position = Set(input.position);
    active.department_id = Set(department.id);
    active.salary = Set(input.salary);
    active.hire_date = Set(input.hire_date);
    active.updated_at = Set(Utc::now().into());
    let updated = active.update(&txn).await?;
    txn.commit().await?;
    info!(employee_id = %id, "employee updated");
    Ok(EmployeeView::from_parts(updated, &department))
}

#[instrument(name = "hr.employees.delete", skip(db))]
pub async fn delete(db: &DatabaseConnection, id: Uuid) -> HrResult<()> {
    let txn = db.begin().await?;
    employees::Entity::find_by_id(id)
        .lock_exclusive()
        .one(&txn)
        .await?
        .ok_or_else(|| HrError::employee_not_found(id))?;
    employees::Entity::delete_by_id(id).exec(&txn).await?;
    txn.commit().await?;
    info!(employee_id = %id, "employee deleted");
    Ok(())
}

async fn ensure_room<C: ConnectionTrait>(
    conn: &C,
    department: &departments::Model,
    action: &str,
) -> HrResult<()> {
    let count = department_rules::employee_count(conn, department.id).await?;
    if department_rules::has_no_room(department.capacity, count) {
        return Err(HrError::InvalidState(format!(
            "{action}. Department '{}' is at full capacity ({} employees)",
            department.name, department.capacity
        )));
    }
    Ok(())
}

async fn email_taken<C: ConnectionTrait>(
    conn: &C,
    email: &str,
    exclude: Option<Uuid>,
) -> HrResult<bool> {
    let mut query = employees::Entity::find().filter(employees::Column::Email.eq(email));
    if let Some(id) = exclude {
        query = query.filter(employees::Column::Id.ne(id));
    }
    Ok(query.count(conn).await? > 0)
}

fn duplicate_email(email: &str) -> HrError {
    HrError::Conflict(format!("Employee with email '{email}' already exists"))
}
