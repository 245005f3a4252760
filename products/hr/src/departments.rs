use std::collections::HashMap;

use chrono::Utc;
use entity::{departments, employees};
use sea_orm::prelude::DateTimeWithTimeZone;
use sea_orm::{
    ActiveModelTrait, ActiveValue::Set, ColumnTrait, ConnectionTrait, DatabaseConnection,
    EntityTrait, PaginatorTrait, QueryFilter, QueryOrder, QuerySelect, TransactionTrait,
};
use serde::Serialize;
use tracing::{info, instrument};
use uuid::Uuid;

use crate::{EmployeeView, HrError, HrResult};

/// Validated department fields, as accepted by [`create`] and [`update`].
#[derive(Clone, Debug, PartialEq, Eq)]
pub struct DepartmentInput {
    pub name: String,
    pub capacity: i32,
    pub description: Option<String>,
}

#[derive(Clone, Debug, PartialEq, Eq, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct DepartmentView {
    pub id: Uuid,
    pub name: String,
    pub capacity: i32,
    pub description: Option<String>,
    pub employee_count: u64,
    pub created_at: DateTimeWithTimeZone,
    pub updated_at: DateTimeWithTimeZone,
}

impl DepartmentView {
    fn from_model(model: departments::Model, employee_count: u64) -> Self {
        Self {
            id: model.id,
            name: model.name,
            capacity: model.capacity,
            description: model.description,
            employee_count,
            created_at: model.created_at,
            updated_at: model.updated_at,
        }
    }
}

#[instrument(name = "hr.departments.create", skip_all, fields(name = %input.name))]
pub async fn create(db: &DatabaseConnection, input: DepartmentInput) -> HrResult<DepartmentView> {
    let txn = db.begin().await?;
    if name_taken(&txn, &input.name, None).await? {
        return Err(duplicate_name(&input.name));
    }
    let now: DateTimeWithTimeZone = Utc::now().into();
    let model = departments::ActiveModel {
        id: Set(Uuid::new_v4()),
        name: Set(input.name),
        capacity: Set(input.capacity),
        description: Set(input.description),
        created_at: Set(now),
        updated_at: Set(now),
    }
    .insert(&txn)
    .await?;
    txn.commit().await?;
    info!(department_id = %model.id, capacity = model.capacity, "department created");
    Ok(DepartmentView::from_model(model, 0))
}

#[instrument(name = "hr.departments.get", skip(db))]
pub async fn get(db: &DatabaseConnection, id: Uuid) -> HrResult<DepartmentView> {
    let model = departments::Entity::find_by_id(id)
        .one(db)
        .await?
        .ok_or_else(|| HrError::department_not_found(id))?;
    let count = employee_count(db, id).await?;
    Ok(DepartmentView::from_model(model, count))
}

#[instrument(name = "hr.departments.list", skip_all)]
pub async fn list(db: &DatabaseConnection) -> HrResult<Vec<DepartmentView>> {
    let models = departments::Entity::find()
        .order_by_asc(departments::Column::Name)
        .all(db)
        .await?;
    let counts = employee_counts(db).await?;
    Ok(models
        .into_iter()
        .map(|model| {
            let count = counts.get(&model.id).copied().unwrap_or(0);
            DepartmentView::from_model(model, count)
        })
        .collect())
}

/// Overwrites name, capacity and description.
///
/// Keeping the current name is never a conflict; shrinking capacity below the
/// current head count is rejected.
#[instrument(name = "hr.departments.update", skip(db, input))]
pub async fn update(
    db: &DatabaseConnection,
    id: Uuid,
    input: DepartmentInput,
) -> HrResult<DepartmentView> {
    let txn = db.begin().await?;
    let existing = lock(&txn, id).await?;
    if existing.name != input.name && name_taken(&txn, &input.name, Some(id)).await? {
        return Err(duplicate_name(&input.name));
    }
    let count = employee_count(&txn, id).await?;
    if u64::try_from(input.capacity).unwrap_or(0) < count {
        return Err(HrError::InvalidState(format!(
            "Cannot reduce capacity to {}. Department has {} employees",
            input.capacity, count
        )));
    }
    let mut active: departments::ActiveModel = existing.into();
    active.name = Set(input.name);
    active.capacity = Set(input.capacity);
    active.description = Set(input.description);
    active.updated_at = Set(Utc::now().into());
    let updated = active.update(&txn).await?;
    txn.commit().await?;
    info!(department_id = %id, "department updated");
    Ok(DepartmentView::from_model(updated, count))
}

#[instrument(name = "hr.departments.delete", skip(db))]
pub async fn delete(db: &DatabaseConnection, id: Uuid) -> HrResult<()> {
    let txn = db.begin().await?;
    lock(&txn, id).await?;
    let count = employee_count(&txn, id).await?;
    if count > 0 {
        return Err(HrError::Conflict(format!(
            "Cannot delete department. It has {count} employee(s). \
             Please reassign or remove employees first."
        )));
    }
    departments::Entity::delete_by_id(id).exec(&txn).await?;
    txn.commit().await?;
    info!(department_id = %id, "department deleted");
    Ok(())
}

#[instrument(name = "hr.departments.list_employees", skip(db))]
pub async fn list_employees(db: &DatabaseConnection, id: Uuid) -> HrResult<Vec<EmployeeView>> {
    let department = departments::Entity::find_by_id(id)
        .one(db)
        .await?
        .ok_or_else(|| HrError::department_not_found(id))?;
    let members = employees::Entity::find()
        .filter(employees::Column::DepartmentId.eq(id))
        .order_by_asc(employees::Column::LastName)
        .order_by_asc(employees::Column::FirstName)
        .all(db)
        .await?;
    Ok(members
        .into_iter()
        .map(|employee| EmployeeView::from_parts(employee, &department))
        .collect())
}

/// Loads a department with `FOR UPDATE`, serializing every writer whose
/// decision depends on this department's head count.
pub(crate) async fn lock<C: ConnectionTrait>(conn: &C, id: Uuid) -> HrResult<departments::Model> {
    departments::Entity::find_by_id(id)
        .lock_exclusive()
        .one(conn)
        .await?
        .ok_or_else(|| HrError::department_not_found(id))
}

pub(crate) async fn employee_count<C: ConnectionTrait>(conn: &C, id: Uuid) -> HrResult<u64> {
    Ok(employees::Entity::find()
        .filter(employees::Column::DepartmentId.eq(id))
        .count(conn)
        .await?)
}

pub(crate) fn has_no_room(capacity: i32, employee_count: u64) -> bool {
    employee_count >= u64::try_from(capacity).unwrap_or(0)
}

async fn employee_counts(db: &DatabaseConnection) -> HrResult<HashMap<Uuid, u64>> {
    let rows: Vec<(Uuid, i64)> = employees::Entity::find()
        .select_only()
        .column(employees::Column::DepartmentId)
        .column_as(employees::Column::Id.count(), "employee_count")
        .group_by(employees::Column::DepartmentId)
        .into_tuple()
        .all(db)
        .await?;
    Ok(rows
        .into_iter()
        .map(|(id, count)| (id, u64::try_from(count).unwrap_or(0)))
        .collect())
}

async fn name_taken<C: ConnectionTrait>(
    conn: &C,
    name: &str,
    exclude: Option<Uuid>,
) -> HrResult<bool> {
    let mut query = departments::Entity::find().filter(departments::Column::Name.eq(name));
    if let Some(id) = exclude {
        query = query.filter(departments::Column::Id.ne(id));
    }
    Ok(query.count(conn).await? > 0)
}

fn duplicate_name(name: &str) -> HrError {
    HrError::Conflict(format!("Department with name '{name}' already exists"))
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::testing::{department, employee, test_db};

    #[tokio::test]
    async fn create_rejects_duplicate_names() {
        let db = test_db().await;
        create(&db, department("Engineering", 3)).await.unwrap();

        let err = create(&db, department("Engineering", 5)).await.unwrap_err();
        assert!(matches!(err, HrError::Conflict(_)));
        assert_eq!(list(&db).await.unwrap().len(), 1);
    }

    #[tokio::test]
    async fn names_are_case_sensitive() {
        let db = test_db().await;
        create(&db, department("Engineering", 3)).await.unwrap();
        create(&db, department("engineering", 3)).await.unwrap();
        assert_eq!(list(&db).await.unwrap().len(), 2);
    }

    #[tokio::test]
    async fn new_department_starts_empty() {
        let db = test_db().await;
        let created = create(&db, department("Finance", 2)).await.unwrap();
        assert_eq!(created.employee_count, 0);

        let fetched = get(&db, created.id).await.unwrap();
        assert_eq!(fetched, created);
    }

    #[tokio::test]
    async fn get_unknown_department_is_not_found() {
        let db = test_db().await;
        let err = get(&db, Uuid::new_v4()).await.unwrap_err();
        assert!(matches!(err, HrError::NotFound { entity: "Department", .. }));
    }

    #[tokio::test]
    async fn list_reports_live_employee_counts() {
        let db = test_db().await;
        let eng = create(&db, department("Engineering", 5)).await.unwrap();
        let ops = create(&db, department("Operations", 5)).await.unwrap();
        crate::employees::create(&db, employee("a@example.test", eng.id)).await.unwrap();
        crate::employees::create(&db, employee("b@example.test", eng.id)).await.unwrap();

        let listed = list(&db).await.unwrap();
        let count_of = |id: Uuid| {
            listed
                .iter()
                .find(|d| d.id == id)
                .map(|d| d.employee_count)
                .unwrap()
        };
        assert_eq!(count_of(eng.id), 2);
        assert_eq!(count_of(ops.id), 0);
    }

    #[tokio::test]
    async fn update_keeping_own_name_is_not_a_conflict() {
        let db = test_db().await;
        let eng = create(&db, department("Engineering", 3)).await.unwrap();

        let mut input = department("Engineering", 4);
        input.description = Some("Builds things".into());
        let updated = update(&db, eng.id, input).await.unwrap();
        assert_eq!(updated.name, "Engineering");
        assert_eq!(updated.capacity, 4);
        assert_eq!(updated.description.as_deref(), Some("Builds things"));
        assert!(updated.updated_at >= eng.updated_at);
    }

    #[tokio::test]
    async fn update_to_another_departments_name_conflicts() {
        let db = test_db().await;
        create(&db, department("Engineering", 3)).await.unwrap();
        let ops = create(&db, department("Operations", 3)).await.unwrap();

        let err = update(&db, ops.id, department("Engineering", 3))
            .await
            .unwrap_err();
        assert!(matches!(err, HrError::Conflict(_)));
        assert_eq!(get(&db, ops.id).await.unwrap().name, "Operations");
    }

    #[tokio::test]
    async fn capacity_cannot_drop_below_head_count() {
        let db = test_db().await;
        let eng = create(&db, department("Engineering", 3)).await.unwrap();
        crate::employees::create(&db, employee("a@example.test", eng.id)).await.unwrap();
        crate::employees::create(&db, employee("b@example.test", eng.id)).await.unwrap();

        let err = update(&db, eng.id, department("Engineering", 1))
            .await
            .unwrap_err();
        assert!(matches!(err, HrError::InvalidState(_)));
        assert_eq!(get(&db, eng.id).await.unwrap().capacity, 3);

        let exact = update(&db, eng.id, department("Engineering", 2)).await.unwrap();
        assert_eq!(exact.capacity, 2);
        assert_eq!(exact.employee_count, 2);
    }

    #[tokio::test]
    async fn update_unknown_department_is_not_found() {
        let db = test_db().await;
        let err = update(&db, Uuid::new_v4(), department("Ghost", 1))
            .await
            .unwrap_err();
        assert!(matches!(err, HrError::NotFound { .. }));
    }

    #[tokio::test]
    async fn delete_requires_an_empty_department() {
        let db = test_db().await;
        let eng = create(&db, department("Engineering", 3)).await.unwrap();
        let hire = crate::employees::create(&db, employee("a@example.test", eng.id))
            .await
            .unwrap();

        let err = delete(&db, eng.id).await.unwrap_err();
        assert!(matches!(err, HrError::Conflict(_)));
        assert!(get(&db, eng.id).await.is_ok());

        crate::employees::delete(&db, hire.id).await.unwrap();
        delete(&db, eng.id).await.unwrap();
        assert!(matches!(
            get(&db, eng.id).await.unwrap_err(),
            HrError::NotFound { .. }
        ));
    }

    #[tokio::test]
    async fn delete_unknown_department_is_not_found() {
        let db = test_db().await;
        let err = delete(&db, Uuid::new_v4()).await.unwrap_err();
        assert!(matches!(err, HrError::NotFound { .. }));
    }

    #[tokio::test]
    async fn list_employees_only_returns_members() {
        let db = test_db().await;
        let eng = create(&db, department("Engineering", 3)).await.unwrap();
        let ops = create(&db, department("Operations", 3)).await.unwrap();
        crate::employees::create(&db, employee("a@example.test", eng.id)).await.unwrap();
        crate::employees::create(&db, employee("b@example.test", ops.id)).await.unwrap();

        let members = list_employees(&db, eng.id).await.unwrap();
        assert_eq!(members.len(), 1);
        assert_eq!(members[0].email, "a@example.test");
        assert_eq!(members[0].department_name, "Engineering");

        let err = list_employees(&db, Uuid::new_v4()).await.unwrap_err();
        assert!(matches!(err, HrError::NotFound { .. }));
    }
}
