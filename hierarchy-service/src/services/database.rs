//! PostgreSQL hierarchy store.
//!
//! Paths are stored as `UUID[]` and searched with array containment and
//! overlap operators backed by a GIN index.

use async_trait::async_trait;
use chrono::{DateTime, Utc};
use sqlx::postgres::{PgPool, PgPoolOptions};
use sqlx::{FromRow, Postgres, QueryBuilder, Transaction};
use std::time::Duration;
use tracing::instrument;
use uuid::Uuid;

use super::error::HierarchyError;
use super::filter::ScopePredicate;
use super::metrics::QueryTimer;
use super::store::{HierarchyStore, StoreResult, StoreTransaction};
use crate::config::DatabaseConfig;
use crate::models::{Assignment, AssignmentType, Entity, EntityType, PathUpdate};

const ENTITY_COLUMNS: &str = "entity_id, tenant_id, entity_type, parent_entity_id, entity_level, \
     hierarchy_path, entity_name, attributes, created_utc, updated_utc";

const ASSIGNMENT_COLUMNS: &str = "assignment_id, tenant_id, user_id, entity_id, assignment_type, \
     is_active, assigned_utc, revoked_utc, assigned_by_user_id, supersedes_assignment_id";

#[derive(FromRow)]
struct EntityRow {
    entity_id: Uuid,
    tenant_id: Uuid,
    entity_type: String,
    parent_entity_id: Option<Uuid>,
    entity_level: i32,
    hierarchy_path: Vec<Uuid>,
    entity_name: String,
    attributes: serde_json::Value,
    created_utc: DateTime<Utc>,
    updated_utc: DateTime<Utc>,
}

impl TryFrom<EntityRow> for Entity {
    type Error = HierarchyError;

    fn try_from(row: EntityRow) -> Result<Self, Self::Error> {
        let entity_type = EntityType::parse(&row.entity_type).ok_or_else(|| {
            HierarchyError::Internal(anyhow::anyhow!(
                "unknown entity_type '{}' on {}",
                row.entity_type,
                row.entity_id
            ))
        })?;
        Ok(Entity {
            entity_id: row.entity_id,
            tenant_id: row.tenant_id,
            entity_type,
            parent_entity_id: row.parent_entity_id,
            entity_level: row.entity_level,
            hierarchy_path: row.hierarchy_path,
            entity_name: row.entity_name,
            attributes: row.attributes,
            created_utc: row.created_utc,
            updated_utc: row.updated_utc,
        })
    }
}

#[derive(FromRow)]
struct AssignmentRow {
    assignment_id: Uuid,
    tenant_id: Uuid,
    user_id: Uuid,
    entity_id: Uuid,
    assignment_type: String,
    is_active: bool,
    assigned_utc: DateTime<Utc>,
    revoked_utc: Option<DateTime<Utc>>,
    assigned_by_user_id: Option<Uuid>,
    supersedes_assignment_id: Option<Uuid>,
}

impl TryFrom<AssignmentRow> for Assignment {
    type Error = HierarchyError;

    fn try_from(row: AssignmentRow) -> Result<Self, Self::Error> {
        let assignment_type = AssignmentType::parse(&row.assignment_type).ok_or_else(|| {
            HierarchyError::Internal(anyhow::anyhow!(
                "unknown assignment_type '{}' on {}",
                row.assignment_type,
                row.assignment_id
            ))
        })?;
        Ok(Assignment {
            assignment_id: row.assignment_id,
            tenant_id: row.tenant_id,
            user_id: row.user_id,
            entity_id: row.entity_id,
            assignment_type,
            is_active: row.is_active,
            assigned_utc: row.assigned_utc,
            revoked_utc: row.revoked_utc,
            assigned_by_user_id: row.assigned_by_user_id,
            supersedes_assignment_id: row.supersedes_assignment_id,
        })
    }
}

fn into_entities(rows: Vec<EntityRow>) -> StoreResult<Vec<Entity>> {
    rows.into_iter().map(Entity::try_from).collect()
}

fn into_assignments(rows: Vec<AssignmentRow>) -> StoreResult<Vec<Assignment>> {
    rows.into_iter().map(Assignment::try_from).collect()
}

/// PostgreSQL-backed hierarchy store.
#[derive(Clone)]
pub struct PgHierarchyStore {
    pool: PgPool,
    lock_timeout: Duration,
}

impl PgHierarchyStore {
    pub fn new(pool: PgPool, lock_timeout: Duration) -> Self {
        Self { pool, lock_timeout }
    }

    /// Connect a pool using the service database settings.
    pub async fn connect(config: &DatabaseConfig, lock_timeout: Duration) -> StoreResult<Self> {
        tracing::info!("Connecting to PostgreSQL...");
        let pool = PgPoolOptions::new()
            .max_connections(config.max_connections)
            .min_connections(config.min_connections)
            .acquire_timeout(Duration::from_secs(config.acquire_timeout_seconds))
            .connect(&config.url)
            .await?;
        tracing::info!("Connected to PostgreSQL");
        Ok(Self::new(pool, lock_timeout))
    }

    /// Apply pending schema migrations.
    pub async fn run_migrations(&self) -> Result<(), sqlx::migrate::MigrateError> {
        tracing::info!("Running database migrations...");
        sqlx::migrate!("./migrations").run(&self.pool).await?;
        tracing::info!("Database migrations completed");
        Ok(())
    }

    pub fn pool(&self) -> &PgPool {
        &self.pool
    }
}

#[async_trait]
impl HierarchyStore for PgHierarchyStore {
    async fn health_check(&self) -> StoreResult<()> {
        sqlx::query("SELECT 1")
            .execute(&self.pool)
            .await
            .map_err(|e| {
                tracing::error!("Database health check failed: {}", e);
                HierarchyError::from(e)
            })?;
        Ok(())
    }

    #[instrument(skip(self))]
    async fn get_entity(&self, entity_id: Uuid) -> StoreResult<Option<Entity>> {
        let _timer = QueryTimer::start("get_entity");
        let row = sqlx::query_as::<_, EntityRow>(&format!(
            "SELECT {ENTITY_COLUMNS} FROM entities WHERE entity_id = $1"
        ))
        .bind(entity_id)
        .fetch_optional(&self.pool)
        .await?;
        row.map(Entity::try_from).transpose()
    }

    #[instrument(skip(self, entity_ids), fields(count = entity_ids.len()))]
    async fn find_entities(&self, entity_ids: &[Uuid]) -> StoreResult<Vec<Entity>> {
        let _timer = QueryTimer::start("find_entities");
        let rows = sqlx::query_as::<_, EntityRow>(&format!(
            "SELECT {ENTITY_COLUMNS} FROM entities WHERE entity_id = ANY($1) \
             ORDER BY entity_level, created_utc, entity_id"
        ))
        .bind(entity_ids)
        .fetch_all(&self.pool)
        .await?;
        into_entities(rows)
    }

    #[instrument(skip(self))]
    async fn list_tenant_entities(&self, tenant_id: Uuid) -> StoreResult<Vec<Entity>> {
        let _timer = QueryTimer::start("list_tenant_entities");
        let rows = sqlx::query_as::<_, EntityRow>(&format!(
            "SELECT {ENTITY_COLUMNS} FROM entities WHERE tenant_id = $1 \
             ORDER BY entity_level, created_utc, entity_id"
        ))
        .bind(tenant_id)
        .fetch_all(&self.pool)
        .await?;
        into_entities(rows)
    }

    #[instrument(skip(self))]
    async fn list_tenant_entity_ids(&self, tenant_id: Uuid) -> StoreResult<Vec<Uuid>> {
        let _timer = QueryTimer::start("list_tenant_entity_ids");
        let ids = sqlx::query_scalar::<_, Uuid>(
            "SELECT entity_id FROM entities WHERE tenant_id = $1 ORDER BY entity_level, entity_id",
        )
        .bind(tenant_id)
        .fetch_all(&self.pool)
        .await?;
        Ok(ids)
    }

    #[instrument(skip(self, entity_ids), fields(count = entity_ids.len()))]
    async fn list_descendants(
        &self,
        tenant_id: Uuid,
        entity_ids: &[Uuid],
    ) -> StoreResult<Vec<Entity>> {
        let _timer = QueryTimer::start("list_descendants");
        let rows = sqlx::query_as::<_, EntityRow>(&format!(
            "SELECT {ENTITY_COLUMNS} FROM entities \
             WHERE tenant_id = $1 AND hierarchy_path && $2::uuid[] \
             ORDER BY entity_level, created_utc, entity_id"
        ))
        .bind(tenant_id)
        .bind(entity_ids)
        .fetch_all(&self.pool)
        .await?;
        into_entities(rows)
    }

    #[instrument(skip(self, predicate))]
    async fn list_scoped_entities(&self, predicate: &ScopePredicate) -> StoreResult<Vec<Entity>> {
        if *predicate == ScopePredicate::Nothing {
            return Ok(Vec::new());
        }
        let _timer = QueryTimer::start("list_scoped_entities");
        let mut qb = QueryBuilder::<Postgres>::new(format!(
            "SELECT {ENTITY_COLUMNS} FROM entities WHERE "
        ));
        predicate.push_sql(&mut qb, "tenant_id", "entity_id");
        qb.push(" ORDER BY entity_level, created_utc, entity_id");

        let rows = qb
            .build_query_as::<EntityRow>()
            .fetch_all(&self.pool)
            .await?;
        into_entities(rows)
    }

    #[instrument(skip(self))]
    async fn get_assignment(&self, assignment_id: Uuid) -> StoreResult<Option<Assignment>> {
        let _timer = QueryTimer::start("get_assignment");
        let row = sqlx::query_as::<_, AssignmentRow>(&format!(
            "SELECT {ASSIGNMENT_COLUMNS} FROM assignments WHERE assignment_id = $1"
        ))
        .bind(assignment_id)
        .fetch_optional(&self.pool)
        .await?;
        row.map(Assignment::try_from).transpose()
    }

    #[instrument(skip(self))]
    async fn list_user_assignments(
        &self,
        tenant_id: Uuid,
        user_id: Uuid,
        active_only: bool,
    ) -> StoreResult<Vec<Assignment>> {
        let _timer = QueryTimer::start("list_user_assignments");
        let rows = sqlx::query_as::<_, AssignmentRow>(&format!(
            "SELECT {ASSIGNMENT_COLUMNS} FROM assignments \
             WHERE tenant_id = $1 AND user_id = $2 AND (is_active OR NOT $3) \
             ORDER BY assigned_utc, assignment_id"
        ))
        .bind(tenant_id)
        .bind(user_id)
        .bind(active_only)
        .fetch_all(&self.pool)
        .await?;
        into_assignments(rows)
    }

    #[instrument(skip(self))]
    async fn scope_generation(&self, tenant_id: Uuid) -> StoreResult<i64> {
        let _timer = QueryTimer::start("scope_generation");
        let generation = sqlx::query_scalar::<_, i64>(
            "SELECT generation FROM tenant_scope_generations WHERE tenant_id = $1",
        )
        .bind(tenant_id)
        .fetch_optional(&self.pool)
        .await?;
        Ok(generation.unwrap_or(0))
    }

    async fn begin(&self) -> StoreResult<Box<dyn StoreTransaction>> {
        let mut tx = self.pool.begin().await?;

        // SET does not accept bind parameters.
        let timeout_ms = self.lock_timeout.as_millis();
        sqlx::query(&format!("SET LOCAL lock_timeout = '{timeout_ms}ms'"))
            .execute(&mut *tx)
            .await?;

        Ok(Box::new(PgStoreTransaction { tx }))
    }
}

/// Open PostgreSQL transaction. Rolls back on drop.
pub struct PgStoreTransaction {
    tx: Transaction<'static, Postgres>,
}

fn expect_row(rows_affected: u64, missing: HierarchyError) -> StoreResult<()> {
    if rows_affected == 0 {
        Err(missing)
    } else {
        Ok(())
    }
}

#[async_trait]
impl StoreTransaction for PgStoreTransaction {
    #[instrument(skip(self))]
    async fn lock_tenant(&mut self, tenant_id: Uuid) -> StoreResult<()> {
        let _timer = QueryTimer::start("lock_tenant");
        sqlx::query("SELECT pg_advisory_xact_lock(hashtext($1::text)::bigint)")
            .bind(tenant_id.to_string())
            .execute(&mut *self.tx)
            .await?;
        Ok(())
    }

    #[instrument(skip(self))]
    async fn lock_subtree(
        &mut self,
        tenant_id: Uuid,
        entity_id: Uuid,
    ) -> StoreResult<Vec<Entity>> {
        let _timer = QueryTimer::start("lock_subtree");
        let rows = sqlx::query_as::<_, EntityRow>(&format!(
            "SELECT {ENTITY_COLUMNS} FROM entities \
             WHERE tenant_id = $1 AND hierarchy_path @> ARRAY[$2::uuid] \
             ORDER BY entity_level, entity_id \
             FOR UPDATE"
        ))
        .bind(tenant_id)
        .bind(entity_id)
        .fetch_all(&mut *self.tx)
        .await?;
        into_entities(rows)
    }

    async fn get_entity(&mut self, entity_id: Uuid) -> StoreResult<Option<Entity>> {
        let row = sqlx::query_as::<_, EntityRow>(&format!(
            "SELECT {ENTITY_COLUMNS} FROM entities WHERE entity_id = $1"
        ))
        .bind(entity_id)
        .fetch_optional(&mut *self.tx)
        .await?;
        row.map(Entity::try_from).transpose()
    }

    async fn find_root(&mut self, tenant_id: Uuid) -> StoreResult<Option<Entity>> {
        let row = sqlx::query_as::<_, EntityRow>(&format!(
            "SELECT {ENTITY_COLUMNS} FROM entities \
             WHERE tenant_id = $1 AND parent_entity_id IS NULL"
        ))
        .bind(tenant_id)
        .fetch_optional(&mut *self.tx)
        .await?;
        row.map(Entity::try_from).transpose()
    }

    #[instrument(skip(self))]
    async fn list_tenant_entities(&mut self, tenant_id: Uuid) -> StoreResult<Vec<Entity>> {
        let _timer = QueryTimer::start("list_tenant_entities_for_update");
        let rows = sqlx::query_as::<_, EntityRow>(&format!(
            "SELECT {ENTITY_COLUMNS} FROM entities WHERE tenant_id = $1 \
             ORDER BY entity_level, created_utc, entity_id \
             FOR UPDATE"
        ))
        .bind(tenant_id)
        .fetch_all(&mut *self.tx)
        .await?;
        into_entities(rows)
    }

    #[instrument(skip(self, entity), fields(entity_id = %entity.entity_id))]
    async fn insert_entity(&mut self, entity: &Entity) -> StoreResult<()> {
        sqlx::query(
            r#"
            INSERT INTO entities (entity_id, tenant_id, entity_type, parent_entity_id, entity_level,
                                  hierarchy_path, entity_name, attributes, created_utc, updated_utc)
            VALUES ($1, $2, $3, $4, $5, $6, $7, $8, $9, $10)
            "#,
        )
        .bind(entity.entity_id)
        .bind(entity.tenant_id)
        .bind(entity.entity_type.as_str())
        .bind(entity.parent_entity_id)
        .bind(entity.entity_level)
        .bind(&entity.hierarchy_path)
        .bind(&entity.entity_name)
        .bind(&entity.attributes)
        .bind(entity.created_utc)
        .bind(entity.updated_utc)
        .execute(&mut *self.tx)
        .await?;
        Ok(())
    }

    async fn update_entity_position(
        &mut self,
        update: &PathUpdate,
        updated_utc: DateTime<Utc>,
    ) -> StoreResult<()> {
        let result = sqlx::query(
            r#"
            UPDATE entities
            SET parent_entity_id = $2, hierarchy_path = $3, entity_level = $4, updated_utc = $5
            WHERE entity_id = $1
            "#,
        )
        .bind(update.entity_id)
        .bind(update.parent_entity_id)
        .bind(&update.hierarchy_path)
        .bind(update.entity_level)
        .bind(updated_utc)
        .execute(&mut *self.tx)
        .await?;
        expect_row(result.rows_affected(), HierarchyError::EntityNotFound(update.entity_id))
    }

    async fn rename_entity(
        &mut self,
        entity_id: Uuid,
        entity_name: &str,
        updated_utc: DateTime<Utc>,
    ) -> StoreResult<()> {
        let result = sqlx::query(
            "UPDATE entities SET entity_name = $2, updated_utc = $3 WHERE entity_id = $1",
        )
        .bind(entity_id)
        .bind(entity_name)
        .bind(updated_utc)
        .execute(&mut *self.tx)
        .await?;
        expect_row(result.rows_affected(), HierarchyError::EntityNotFound(entity_id))
    }

    async fn touch_entity(
        &mut self,
        entity_id: Uuid,
        updated_utc: DateTime<Utc>,
    ) -> StoreResult<()> {
        let result = sqlx::query("UPDATE entities SET updated_utc = $2 WHERE entity_id = $1")
            .bind(entity_id)
            .bind(updated_utc)
            .execute(&mut *self.tx)
            .await?;
        expect_row(result.rows_affected(), HierarchyError::EntityNotFound(entity_id))
    }

    async fn delete_entity(&mut self, entity_id: Uuid) -> StoreResult<()> {
        let result = sqlx::query("DELETE FROM entities WHERE entity_id = $1")
            .bind(entity_id)
            .execute(&mut *self.tx)
            .await?;
        expect_row(result.rows_affected(), HierarchyError::EntityNotFound(entity_id))
    }

    #[instrument(skip(self, entity_ids), fields(count = entity_ids.len()))]
    async fn delete_assignments_for_entities(&mut self, entity_ids: &[Uuid]) -> StoreResult<u64> {
        let result = sqlx::query("DELETE FROM assignments WHERE entity_id = ANY($1)")
            .bind(entity_ids)
            .execute(&mut *self.tx)
            .await?;
        Ok(result.rows_affected())
    }

    async fn get_assignment(&mut self, assignment_id: Uuid) -> StoreResult<Option<Assignment>> {
        let row = sqlx::query_as::<_, AssignmentRow>(&format!(
            "SELECT {ASSIGNMENT_COLUMNS} FROM assignments WHERE assignment_id = $1 FOR UPDATE"
        ))
        .bind(assignment_id)
        .fetch_optional(&mut *self.tx)
        .await?;
        row.map(Assignment::try_from).transpose()
    }

    async fn find_active_assignment(
        &mut self,
        tenant_id: Uuid,
        user_id: Uuid,
        entity_id: Uuid,
        assignment_type: AssignmentType,
    ) -> StoreResult<Option<Assignment>> {
        let row = sqlx::query_as::<_, AssignmentRow>(&format!(
            "SELECT {ASSIGNMENT_COLUMNS} FROM assignments \
             WHERE tenant_id = $1 AND user_id = $2 AND entity_id = $3 \
               AND assignment_type = $4 AND is_active"
        ))
        .bind(tenant_id)
        .bind(user_id)
        .bind(entity_id)
        .bind(assignment_type.as_str())
        .fetch_optional(&mut *self.tx)
        .await?;
        row.map(Assignment::try_from).transpose()
    }

    #[instrument(skip(self, assignment), fields(assignment_id = %assignment.assignment_id))]
    async fn insert_assignment(&mut self, assignment: &Assignment) -> StoreResult<()> {
        sqlx::query(
            r#"
            INSERT INTO assignments (assignment_id, tenant_id, user_id, entity_id, assignment_type,
                                     is_active, assigned_utc, revoked_utc, assigned_by_user_id,
                                     supersedes_assignment_id)
            VALUES ($1, $2, $3, $4, $5, $6, $7, $8, $9, $10)
            "#,
        )
        .bind(assignment.assignment_id)
        .bind(assignment.tenant_id)
        .bind(assignment.user_id)
        .bind(assignment.entity_id)
        .bind(assignment.assignment_type.as_str())
        .bind(assignment.is_active)
        .bind(assignment.assigned_utc)
        .bind(assignment.revoked_utc)
        .bind(assignment.assigned_by_user_id)
        .bind(assignment.supersedes_assignment_id)
        .execute(&mut *self.tx)
        .await?;
        Ok(())
    }

    async fn revoke_assignment(
        &mut self,
        assignment_id: Uuid,
        revoked_utc: DateTime<Utc>,
    ) -> StoreResult<()> {
        let result = sqlx::query(
            "UPDATE assignments SET is_active = FALSE, revoked_utc = $2 WHERE assignment_id = $1",
        )
        .bind(assignment_id)
        .bind(revoked_utc)
        .execute(&mut *self.tx)
        .await?;
        expect_row(
            result.rows_affected(),
            HierarchyError::AssignmentNotFound(assignment_id),
        )
    }

    async fn bump_scope_generation(&mut self, tenant_id: Uuid) -> StoreResult<i64> {
        let _timer = QueryTimer::start("bump_scope_generation");
        let generation = sqlx::query_scalar::<_, i64>(
            "INSERT INTO tenant_scope_generations (tenant_id, generation) VALUES ($1, 1) \
             ON CONFLICT (tenant_id) DO UPDATE \
             SET generation = tenant_scope_generations.generation + 1 \
             RETURNING generation",
        )
        .bind(tenant_id)
        .fetch_one(&mut *self.tx)
        .await?;
        Ok(generation)
    }

    async fn commit(self: Box<Self>) -> StoreResult<()> {
        self.tx.commit().await?;
        Ok(())
    }
}
