//! Postgres-backed implementation of the auth store.
//!
//! # What this module is
//! Implements every repository trait plus the policy adapter on top of a
//! `sqlx::PgPool`. It is the durable home of users, roles, role groups, preset
//! templates, SSO configurations, login audits, and the persisted policy tuples
//! (`casbin_rule`) the in-process enforcer loads at startup.
//!
//! # Key invariants
//! - A user or group write and its role-mapping changes commit in one
//!   transaction; roles named by a grant plan are inserted in that same
//!   transaction, so a failed grant leaves neither the role nor the mapping.
//! - Active emails and active group names are unique case-insensitively
//!   (partial unique indexes); violations surface as `StoreError::Conflict`.
//! - Unset role scope columns are stored as `NULL` and read back as `""`.
//!
//! # Security notes
//! - Database URLs may contain credentials; avoid logging them.
//! - Dynamic SQL is limited to the mapping-table allowlist in [`MappingTable`].
//!
//! # Operational notes
//! Migrations are embedded with `sqlx::migrate!("./migrations")` and run at
//! connect time so handlers can assume the schema exists.
use super::{
    AuthStore, GrantOutcome, GrantPlan, GroupRepo, GroupUpsert, PolicyAdapter, PresetRepo,
    RoleRepo, SelfRegistrationRepo, SsoRepo, StoreError, StoreResult, UserRepo, UserUpsert,
};
use crate::observability;
use crate::config::PostgresConfig;
use crate::model::{
    ACTION_UPDATE, DefaultRbacRoleData, ENTITY_APPS, ENTITY_CLUSTER, Policy, PolicyCacheDetailObj,
    PolicyType, RbacPolicyData, RbacRoleData, Role, RoleCacheDetailObj, RoleFilter, RoleGroup,
    SsoLoginModel, User, UserAudit, UserType,
};
use async_trait::async_trait;
use chrono::{DateTime, Utc};
use serde_json::Value;
use sqlx::postgres::{PgConnectOptions, PgPoolOptions};
use sqlx::types::Json;
use sqlx::{FromRow, PgPool, Postgres, QueryBuilder, Transaction};
use std::str::FromStr;
use std::time::Duration;

/// Durable auth store backed by Postgres.
///
/// # Example
/// ```rust,no_run
/// use orchestrator_auth::config::PostgresConfig;
/// use orchestrator_auth::store::postgres::PostgresStore;
///
/// async fn open(pg: PostgresConfig) {
///     let _ = PostgresStore::connect(&pg).await;
/// }
/// ```
pub struct PostgresStore {
    pool: PgPool,
}

const USER_COLUMNS: &str = "id, email_id, access_token, user_type, active, created_on, \
     created_by, updated_on, updated_by";

const ROLE_COLUMNS: &str = "id, role, coalesce(entity, '') AS entity, coalesce(team, '') AS team, \
     coalesce(entity_name, '') AS entity_name, coalesce(environment, '') AS environment, action, \
     coalesce(access_type, '') AS access_type, coalesce(cluster, '') AS cluster, \
     coalesce(namespace, '') AS namespace, coalesce(\"group\", '') AS \"group\", \
     coalesce(kind, '') AS kind, coalesce(resource, '') AS resource";

const GROUP_COLUMNS: &str = "id, name, casbin_name, description, active";

#[derive(Debug, Clone, FromRow)]
struct DbUser {
    id: i32,
    email_id: String,
    access_token: Option<String>,
    user_type: String,
    active: bool,
    created_on: DateTime<Utc>,
    created_by: i32,
    updated_on: DateTime<Utc>,
    updated_by: i32,
}

impl From<DbUser> for User {
    fn from(row: DbUser) -> Self {
        User {
            id: row.id,
            email: row.email_id,
            access_token: row.access_token,
            user_type: UserType::parse(&row.user_type),
            active: row.active,
            created_on: row.created_on,
            created_by: row.created_by,
            updated_on: row.updated_on,
            updated_by: row.updated_by,
        }
    }
}

#[derive(Debug, Clone, FromRow)]
struct DbRole {
    id: i32,
    role: String,
    entity: String,
    team: String,
    entity_name: String,
    environment: String,
    action: String,
    access_type: String,
    cluster: String,
    namespace: String,
    group: String,
    kind: String,
    resource: String,
}

impl From<DbRole> for Role {
    fn from(row: DbRole) -> Self {
        Role {
            id: row.id,
            role: row.role,
            entity: row.entity,
            team: row.team,
            entity_name: row.entity_name,
            environment: row.environment,
            action: row.action,
            access_type: row.access_type,
            cluster: row.cluster,
            namespace: row.namespace,
            group: row.group,
            kind: row.kind,
            resource: row.resource,
        }
    }
}

#[derive(Debug, Clone, FromRow)]
struct DbGroup {
    id: i32,
    name: String,
    casbin_name: String,
    description: String,
    active: bool,
}

impl From<DbGroup> for RoleGroup {
    fn from(row: DbGroup) -> Self {
        RoleGroup {
            id: row.id,
            name: row.name,
            casbin_name: row.casbin_name,
            description: row.description,
            active: row.active,
        }
    }
}

#[derive(Debug, Clone, FromRow)]
struct DbRoleData {
    id: i32,
    entity: String,
    access_type: String,
    role: String,
    role_display_name: String,
    role_description: String,
    role_data: Json<RoleCacheDetailObj>,
    is_preset_role: bool,
    deleted: bool,
}

impl From<DbRoleData> for RbacRoleData {
    fn from(row: DbRoleData) -> Self {
        RbacRoleData {
            id: row.id,
            entity: row.entity,
            access_type: row.access_type,
            role: row.role,
            role_display_name: row.role_display_name,
            role_description: row.role_description,
            role_data: row.role_data.0,
            is_preset_role: row.is_preset_role,
            deleted: row.deleted,
        }
    }
}

#[derive(Debug, Clone, FromRow)]
struct DbPolicyData {
    id: i32,
    entity: String,
    access_type: String,
    role: String,
    policy_data: Json<PolicyCacheDetailObj>,
    is_preset_role: bool,
    deleted: bool,
}

impl From<DbPolicyData> for RbacPolicyData {
    fn from(row: DbPolicyData) -> Self {
        RbacPolicyData {
            id: row.id,
            entity: row.entity,
            access_type: row.access_type,
            role: row.role,
            policy_data: row.policy_data.0,
            is_preset_role: row.is_preset_role,
            deleted: row.deleted,
        }
    }
}

#[derive(Debug, Clone, FromRow)]
struct DbDefaultRoleData {
    id: i32,
    entity: String,
    access_type: String,
    role: String,
    role_display_name: String,
    role_description: String,
    role_data: Json<RoleCacheDetailObj>,
    policy_data: Json<PolicyCacheDetailObj>,
    enabled: bool,
}

impl From<DbDefaultRoleData> for DefaultRbacRoleData {
    fn from(row: DbDefaultRoleData) -> Self {
        DefaultRbacRoleData {
            id: row.id,
            entity: row.entity,
            access_type: row.access_type,
            role: row.role,
            role_display_name: row.role_display_name,
            role_description: row.role_description,
            role_data: row.role_data.0,
            policy_data: row.policy_data.0,
            enabled: row.enabled,
        }
    }
}

#[derive(Debug, Clone, FromRow)]
struct DbSso {
    id: i32,
    name: String,
    url: String,
    config: Value,
    active: bool,
}

impl From<DbSso> for SsoLoginModel {
    fn from(row: DbSso) -> Self {
        SsoLoginModel {
            id: row.id,
            name: row.name,
            url: row.url,
            config: row.config,
            active: row.active,
        }
    }
}

#[derive(Debug, Clone, FromRow)]
struct DbAudit {
    user_id: i32,
    client_ip: String,
    created_on: DateTime<Utc>,
    updated_on: DateTime<Utc>,
}

#[derive(Debug, Clone, FromRow)]
struct DbPolicyRule {
    p_type: String,
    v0: String,
    v1: String,
    v2: String,
    v3: String,
}

/// Mapping tables a grant plan can be applied to.
#[derive(Debug, Clone, Copy)]
enum MappingTable {
    UserRoles,
    GroupRoles,
}

impl MappingTable {
    fn table(self) -> &'static str {
        match self {
            MappingTable::UserRoles => "user_roles",
            MappingTable::GroupRoles => "role_group_role_mapping",
        }
    }

    fn subject_column(self) -> &'static str {
        match self {
            MappingTable::UserRoles => "user_id",
            MappingTable::GroupRoles => "role_group_id",
        }
    }
}

impl PostgresStore {
    /// Connect to Postgres and run embedded migrations.
    ///
    /// # Errors
    /// - Connection, migration, or pool setup failures.
    pub async fn connect(pg: &PostgresConfig) -> StoreResult<Self> {
        #[cfg(any(test, feature = "pg-tests"))]
        let _ = Self::connect_without_migrations;
        Self::connect_internal(pg, true).await
    }

    /// Connect to Postgres without running migrations. Intended for tests that
    /// manage the schema themselves.
    #[cfg(any(test, feature = "pg-tests"))]
    pub async fn connect_without_migrations(pg: &PostgresConfig) -> StoreResult<Self> {
        Self::connect_internal(pg, false).await
    }

    async fn connect_internal(pg: &PostgresConfig, run_migrations: bool) -> StoreResult<Self> {
        // Fail fast on an unreachable database rather than hanging startup.
        // Avoid logging `pg.url` because it may contain credentials.
        let connect_options = PgConnectOptions::from_str(&pg.url)?;
        let pool = PgPoolOptions::new()
            .max_connections(pg.max_connections)
            .acquire_timeout(Duration::from_millis(pg.acquire_timeout_ms))
            .connect_with(connect_options)
            .await?;

        if run_migrations {
            sqlx::migrate!("./migrations").run(&pool).await?;
        }
        Ok(Self { pool })
    }

    async fn role_by_name_tx(
        tx: &mut Transaction<'_, Postgres>,
        name: &str,
    ) -> StoreResult<Option<Role>> {
        let query = format!("SELECT {ROLE_COLUMNS} FROM roles WHERE role = $1");
        let row: Option<DbRole> = sqlx::query_as(&query)
            .bind(name)
            .fetch_optional(&mut **tx)
            .await?;
        Ok(row.map(Role::from))
    }

    async fn role_by_id_tx(
        tx: &mut Transaction<'_, Postgres>,
        id: i32,
    ) -> StoreResult<Option<Role>> {
        let query = format!("SELECT {ROLE_COLUMNS} FROM roles WHERE id = $1");
        let row: Option<DbRole> = sqlx::query_as(&query)
            .bind(id)
            .fetch_optional(&mut **tx)
            .await?;
        Ok(row.map(Role::from))
    }

    /// Apply a grant plan to `subject_id` inside `tx`.
    ///
    /// # What it does
    /// Step 1 inserts `plan.new_roles` (an existing row with the same name
    /// wins), step 2 maps every granted name, step 3 unmaps every revoked id.
    ///
    /// # Errors
    /// - `StoreError::NotFound` when a granted role name does not exist.
    async fn apply_plan(
        tx: &mut Transaction<'_, Postgres>,
        table: MappingTable,
        subject_id: i32,
        plan: &GrantPlan,
        actor: i32,
    ) -> StoreResult<(Vec<Role>, Vec<Role>)> {
        // Step 1: create missing roles.
        for role in &plan.new_roles {
            sqlx::query(
                "INSERT INTO roles (role, entity, team, entity_name, environment, action, \
                 access_type, cluster, namespace, \"group\", kind, resource, created_by, updated_by) \
                 VALUES ($1, $2, $3, $4, $5, $6, $7, $8, $9, $10, $11, $12, $13, $13) \
                 ON CONFLICT (role) DO NOTHING",
            )
            .bind(&role.role)
            .bind(nullable(&role.entity))
            .bind(nullable(&role.team))
            .bind(nullable(&role.entity_name))
            .bind(nullable(&role.environment))
            .bind(&role.action)
            .bind(nullable(&role.access_type))
            .bind(nullable(&role.cluster))
            .bind(nullable(&role.namespace))
            .bind(nullable(&role.group))
            .bind(nullable(&role.kind))
            .bind(nullable(&role.resource))
            .bind(actor)
            .execute(&mut **tx)
            .await?;
        }

        // Step 2: map granted roles.
        let insert = format!(
            "INSERT INTO {} ({}, role_id, created_by, updated_by) VALUES ($1, $2, $3, $3) \
             ON CONFLICT DO NOTHING",
            table.table(),
            table.subject_column()
        );
        let mut granted = Vec::with_capacity(plan.grant.len());
        for name in &plan.grant {
            let role = Self::role_by_name_tx(tx, name)
                .await?
                .ok_or_else(|| StoreError::NotFound(format!("role {name}")))?;
            sqlx::query(&insert)
                .bind(subject_id)
                .bind(role.id)
                .bind(actor)
                .execute(&mut **tx)
                .await?;
            granted.push(role);
        }

        // Step 3: unmap revoked roles.
        let delete = format!(
            "DELETE FROM {} WHERE {} = $1 AND role_id = $2",
            table.table(),
            table.subject_column()
        );
        let mut revoked = Vec::new();
        for role_id in &plan.revoke {
            let result = sqlx::query(&delete)
                .bind(subject_id)
                .bind(role_id)
                .execute(&mut **tx)
                .await?;
            if result.rows_affected() > 0
                && let Some(role) = Self::role_by_id_tx(tx, *role_id).await?
            {
                revoked.push(role);
            }
        }
        Ok((granted, revoked))
    }

    async fn mapped_roles(&self, table: MappingTable, subject_id: i32) -> StoreResult<Vec<Role>> {
        let query = format!(
            "SELECT {ROLE_COLUMNS} FROM roles WHERE id IN \
             (SELECT role_id FROM {} WHERE {} = $1) ORDER BY id",
            table.table(),
            table.subject_column()
        );
        let rows: Vec<DbRole> = sqlx::query_as(&query)
            .bind(subject_id)
            .fetch_all(&self.pool)
            .await?;
        Ok(rows.into_iter().map(Role::from).collect())
    }
}

/// Lookup for the single role a selector names, one predicate set per shape.
///
/// - super-admin: the unscoped `super-admin` row.
/// - cluster: every cluster column, `IS NULL` where the selector leaves it unset.
/// - global entity: the entity, plus the entity name for `update`.
/// - apps: team, environment, and app, missing values comparing to `''`.
///
/// `None` when the selector cannot name a row.
fn role_lookup(selector: &RoleFilter) -> Option<QueryBuilder<'static, Postgres>> {
    let mut query = QueryBuilder::new(format!("SELECT {ROLE_COLUMNS} FROM roles WHERE action = "));
    query.push_bind(selector.action.clone());
    if selector.is_super_admin() {
        query.push(
            " AND coalesce(entity, '') = '' AND coalesce(team, '') = '' \
             AND coalesce(entity_name, '') = '' AND coalesce(environment, '') = '' \
             AND coalesce(cluster, '') = ''",
        );
    } else {
        query.push(" AND coalesce(access_type, '') = ");
        query.push_bind(selector.access_type.clone());
        if selector.is_cluster() {
            query.push(" AND entity = ");
            query.push_bind(ENTITY_CLUSTER);
            for (column, value) in [
                ("cluster", &selector.cluster),
                ("namespace", &selector.namespace),
                ("\"group\"", &selector.group),
                ("kind", &selector.kind),
                ("resource", &selector.resource),
            ] {
                if value.is_empty() {
                    query.push(format!(" AND {column} IS NULL"));
                } else {
                    query.push(format!(" AND {column} = "));
                    query.push_bind(value.clone());
                }
            }
        } else if selector.is_global_entity() {
            query.push(" AND entity = ");
            query.push_bind(selector.entity.clone());
            if selector.action == ACTION_UPDATE {
                if selector.entity_name.is_empty() {
                    return None;
                }
                query.push(" AND entity_name = ");
                query.push_bind(selector.entity_name.clone());
            }
        } else {
            query.push(" AND entity = ");
            query.push_bind(ENTITY_APPS);
            for (column, value) in [
                ("team", &selector.team),
                ("environment", &selector.environment),
                ("entity_name", &selector.entity_name),
            ] {
                query.push(format!(" AND coalesce({column}, '') = "));
                query.push_bind(value.clone());
            }
        }
    }
    query.push(" ORDER BY id LIMIT 1");
    Some(query)
}

fn nullable(value: &str) -> Option<&str> {
    if value.is_empty() { None } else { Some(value) }
}

fn is_unique_violation(err: &sqlx::Error) -> bool {
    if let sqlx::Error::Database(db_err) = err {
        return db_err.code().map(|code| code == "23505").unwrap_or(false);
    }
    false
}

fn conflict_or(err: sqlx::Error, what: &str) -> StoreError {
    if is_unique_violation(&err) {
        StoreError::Conflict(format!("{what} exists"))
    } else {
        StoreError::Unexpected(err.into())
    }
}

fn policy_from_row(row: DbPolicyRule) -> StoreResult<Policy> {
    match row.p_type.as_str() {
        "p" => Ok(Policy::permission(row.v0, row.v1, row.v2, row.v3)),
        "g" => Ok(Policy::grouping(row.v0, row.v1)),
        other => Err(StoreError::Unexpected(anyhow::anyhow!(
            "invalid policy type {other}"
        ))),
    }
}

/// Column values `(v0, v1, v2, v3)` for a policy tuple.
fn policy_columns(policy: &Policy) -> [&str; 4] {
    match policy.ptype {
        PolicyType::P => [
            policy.sub.as_str(),
            policy.res.as_str(),
            policy.act.as_str(),
            policy.obj.as_str(),
        ],
        PolicyType::G => [policy.sub.as_str(), policy.obj.as_str(), "", ""],
    }
}

#[async_trait]
impl UserRepo for PostgresStore {
    async fn fetch_active_or_deleted_by_email(&self, email: &str) -> StoreResult<Option<User>> {
        let query = format!(
            "SELECT {USER_COLUMNS} FROM users WHERE lower(email_id) = lower($1) \
             ORDER BY active DESC, id DESC LIMIT 1"
        );
        let row: Option<DbUser> = sqlx::query_as(&query)
            .bind(email)
            .fetch_optional(&self.pool)
            .await?;
        Ok(row.map(User::from))
    }

    async fn get_user(&self, id: i32) -> StoreResult<User> {
        let query = format!("SELECT {USER_COLUMNS} FROM users WHERE id = $1 AND active");
        let row: Option<DbUser> = sqlx::query_as(&query)
            .bind(id)
            .fetch_optional(&self.pool)
            .await?;
        row.map(User::from)
            .ok_or_else(|| StoreError::NotFound("user".into()))
    }

    async fn get_user_include_deleted(&self, id: i32) -> StoreResult<User> {
        let query = format!("SELECT {USER_COLUMNS} FROM users WHERE id = $1");
        let row: Option<DbUser> = sqlx::query_as(&query)
            .bind(id)
            .fetch_optional(&self.pool)
            .await?;
        row.map(User::from)
            .ok_or_else(|| StoreError::NotFound("user".into()))
    }

    async fn list_active_users(&self) -> StoreResult<Vec<User>> {
        let query = format!("SELECT {USER_COLUMNS} FROM users WHERE active ORDER BY id");
        let rows: Vec<DbUser> = sqlx::query_as(&query).fetch_all(&self.pool).await?;
        metrics::gauge!(observability::USERS_ACTIVE).set(rows.len() as f64);
        Ok(rows.into_iter().map(User::from).collect())
    }

    async fn roles_for_user(&self, user_id: i32) -> StoreResult<Vec<Role>> {
        self.mapped_roles(MappingTable::UserRoles, user_id).await
    }

    async fn save_user_with_grants(
        &self,
        user: UserUpsert,
        plan: &GrantPlan,
        actor: i32,
    ) -> StoreResult<GrantOutcome<User>> {
        let mut tx = self.pool.begin().await?;

        // Step 1: the user row.
        let row: Option<DbUser> = match user.id {
            Some(id) => {
                let query = format!(
                    "UPDATE users SET email_id = $2, active = TRUE, \
                     access_token = coalesce($3, access_token), updated_on = now(), \
                     updated_by = $4 WHERE id = $1 RETURNING {USER_COLUMNS}"
                );
                sqlx::query_as(&query)
                    .bind(id)
                    .bind(&user.email)
                    .bind(&user.access_token)
                    .bind(actor)
                    .fetch_optional(&mut *tx)
                    .await
                    .map_err(|err| conflict_or(err, "user"))?
            }
            None => {
                let query = format!(
                    "INSERT INTO users (email_id, access_token, user_type, active, created_by, \
                     updated_by) VALUES ($1, $2, $3, TRUE, $4, $4) RETURNING {USER_COLUMNS}"
                );
                Some(
                    sqlx::query_as(&query)
                        .bind(&user.email)
                        .bind(&user.access_token)
                        .bind(user.user_type.as_str())
                        .bind(actor)
                        .fetch_one(&mut *tx)
                        .await
                        .map_err(|err| conflict_or(err, "user"))?,
                )
            }
        };
        let saved = User::from(row.ok_or_else(|| StoreError::NotFound("user".into()))?);

        // Step 2: roles and mappings in the same transaction.
        let (granted, revoked) =
            Self::apply_plan(&mut tx, MappingTable::UserRoles, saved.id, plan, actor).await?;
        tx.commit().await?;
        Ok(GrantOutcome {
            subject: saved,
            granted,
            revoked,
        })
    }

    async fn deactivate_user(&self, user_id: i32, actor: i32) -> StoreResult<User> {
        let mut tx = self.pool.begin().await?;
        let query = format!(
            "UPDATE users SET active = FALSE, updated_on = now(), updated_by = $2 \
             WHERE id = $1 AND active RETURNING {USER_COLUMNS}"
        );
        let row: Option<DbUser> = sqlx::query_as(&query)
            .bind(user_id)
            .bind(actor)
            .fetch_optional(&mut *tx)
            .await?;
        let user = User::from(row.ok_or_else(|| StoreError::NotFound("user".into()))?);
        sqlx::query("DELETE FROM user_roles WHERE user_id = $1")
            .bind(user_id)
            .execute(&mut *tx)
            .await?;
        tx.commit().await?;
        Ok(user)
    }

    async fn upsert_user_audit(&self, user_id: i32, client_ip: &str) -> StoreResult<()> {
        sqlx::query(
            "INSERT INTO user_audit (user_id, client_ip, created_by, updated_by) \
             VALUES ($1, $2, $1, $1) \
             ON CONFLICT (user_id) DO UPDATE SET client_ip = EXCLUDED.client_ip, \
             updated_on = now(), updated_by = EXCLUDED.updated_by",
        )
        .bind(user_id)
        .bind(client_ip)
        .execute(&self.pool)
        .await?;
        Ok(())
    }

    async fn get_user_audit(&self, user_id: i32) -> StoreResult<Option<UserAudit>> {
        let row: Option<DbAudit> = sqlx::query_as(
            "SELECT user_id, client_ip, created_on, updated_on FROM user_audit WHERE user_id = $1",
        )
        .bind(user_id)
        .fetch_optional(&self.pool)
        .await?;
        Ok(row.map(|row| UserAudit {
            user_id: row.user_id,
            client_ip: row.client_ip,
            created_on: row.created_on,
            updated_on: row.updated_on,
        }))
    }

    async fn list_active_user_role_pairs(&self) -> StoreResult<Vec<(String, String)>> {
        let rows: Vec<(String, String)> = sqlx::query_as(
            "SELECT u.email_id, r.role FROM user_roles ur \
             JOIN users u ON u.id = ur.user_id JOIN roles r ON r.id = ur.role_id \
             WHERE u.active ORDER BY ur.id",
        )
        .fetch_all(&self.pool)
        .await?;
        Ok(rows)
    }
}

#[async_trait]
impl RoleRepo for PostgresStore {
    async fn get_role_by_filter(&self, selector: &RoleFilter) -> StoreResult<Option<Role>> {
        let Some(mut query) = role_lookup(selector) else {
            return Ok(None);
        };
        let row: Option<DbRole> = query
            .build_query_as()
            .fetch_optional(&self.pool)
            .await?;
        Ok(row.map(Role::from))
    }

    async fn get_roles_by_names(&self, names: &[String]) -> StoreResult<Vec<Role>> {
        let query = format!("SELECT {ROLE_COLUMNS} FROM roles WHERE role = ANY($1) ORDER BY id");
        let rows: Vec<DbRole> = sqlx::query_as(&query)
            .bind(names)
            .fetch_all(&self.pool)
            .await?;
        Ok(rows.into_iter().map(Role::from).collect())
    }

    async fn list_roles(&self) -> StoreResult<Vec<Role>> {
        let query = format!("SELECT {ROLE_COLUMNS} FROM roles ORDER BY id");
        let rows: Vec<DbRole> = sqlx::query_as(&query).fetch_all(&self.pool).await?;
        Ok(rows.into_iter().map(Role::from).collect())
    }

    async fn roles_by_entity_access_type_and_action(
        &self,
        entity: &str,
        access_type: &str,
        action: &str,
    ) -> StoreResult<Vec<Role>> {
        let query = format!(
            "SELECT {ROLE_COLUMNS} FROM roles WHERE coalesce(entity, '') = $1 \
             AND coalesce(access_type, '') = $2 AND action = $3 ORDER BY id"
        );
        let rows: Vec<DbRole> = sqlx::query_as(&query)
            .bind(entity)
            .bind(access_type)
            .bind(action)
            .fetch_all(&self.pool)
            .await?;
        Ok(rows.into_iter().map(Role::from).collect())
    }
}

#[async_trait]
impl GroupRepo for PostgresStore {
    async fn get_group(&self, id: i32) -> StoreResult<RoleGroup> {
        let query = format!("SELECT {GROUP_COLUMNS} FROM role_group WHERE id = $1 AND active");
        let row: Option<DbGroup> = sqlx::query_as(&query)
            .bind(id)
            .fetch_optional(&self.pool)
            .await?;
        row.map(RoleGroup::from)
            .ok_or_else(|| StoreError::NotFound("role group".into()))
    }

    async fn get_groups_by_names(&self, names: &[String]) -> StoreResult<Vec<RoleGroup>> {
        let lowered: Vec<String> = names.iter().map(|name| name.to_lowercase()).collect();
        let query = format!(
            "SELECT {GROUP_COLUMNS} FROM role_group WHERE active AND lower(name) = ANY($1) \
             ORDER BY id"
        );
        let rows: Vec<DbGroup> = sqlx::query_as(&query)
            .bind(&lowered)
            .fetch_all(&self.pool)
            .await?;
        Ok(rows.into_iter().map(RoleGroup::from).collect())
    }

    async fn get_groups_by_casbin_names(&self, names: &[String]) -> StoreResult<Vec<RoleGroup>> {
        let query = format!(
            "SELECT {GROUP_COLUMNS} FROM role_group WHERE active AND casbin_name = ANY($1) \
             ORDER BY id"
        );
        let rows: Vec<DbGroup> = sqlx::query_as(&query)
            .bind(names)
            .fetch_all(&self.pool)
            .await?;
        Ok(rows.into_iter().map(RoleGroup::from).collect())
    }

    async fn list_groups(&self) -> StoreResult<Vec<RoleGroup>> {
        let query = format!("SELECT {GROUP_COLUMNS} FROM role_group WHERE active ORDER BY id");
        let rows: Vec<DbGroup> = sqlx::query_as(&query).fetch_all(&self.pool).await?;
        Ok(rows.into_iter().map(RoleGroup::from).collect())
    }

    async fn roles_for_group(&self, group_id: i32) -> StoreResult<Vec<Role>> {
        self.mapped_roles(MappingTable::GroupRoles, group_id).await
    }

    async fn save_group_with_grants(
        &self,
        group: GroupUpsert,
        plan: &GrantPlan,
        actor: i32,
    ) -> StoreResult<GrantOutcome<RoleGroup>> {
        let mut tx = self.pool.begin().await?;
        // Names that normalise to one casbin subject would share policy edges.
        let clash: Option<i32> = sqlx::query_scalar(
            "SELECT id FROM role_group WHERE active \
             AND (lower(name) = lower($1) OR casbin_name = $2) \
             AND id IS DISTINCT FROM $3 LIMIT 1",
        )
        .bind(&group.name)
        .bind(&group.casbin_name)
        .bind(group.id)
        .fetch_optional(&mut *tx)
        .await?;
        if clash.is_some() {
            return Err(StoreError::Conflict("role group exists".into()));
        }
        let row: Option<DbGroup> = match group.id {
            Some(id) => {
                let query = format!(
                    "UPDATE role_group SET name = $2, casbin_name = $3, description = $4, \
                     updated_on = now(), updated_by = $5 WHERE id = $1 AND active \
                     RETURNING {GROUP_COLUMNS}"
                );
                sqlx::query_as(&query)
                    .bind(id)
                    .bind(&group.name)
                    .bind(&group.casbin_name)
                    .bind(&group.description)
                    .bind(actor)
                    .fetch_optional(&mut *tx)
                    .await
                    .map_err(|err| conflict_or(err, "role group"))?
            }
            None => {
                let query = format!(
                    "INSERT INTO role_group (name, casbin_name, description, active, created_by, \
                     updated_by) VALUES ($1, $2, $3, TRUE, $4, $4) RETURNING {GROUP_COLUMNS}"
                );
                Some(
                    sqlx::query_as(&query)
                        .bind(&group.name)
                        .bind(&group.casbin_name)
                        .bind(&group.description)
                        .bind(actor)
                        .fetch_one(&mut *tx)
                        .await
                        .map_err(|err| conflict_or(err, "role group"))?,
                )
            }
        };
        let saved = RoleGroup::from(row.ok_or_else(|| StoreError::NotFound("role group".into()))?);
        let (granted, revoked) =
            Self::apply_plan(&mut tx, MappingTable::GroupRoles, saved.id, plan, actor).await?;
        tx.commit().await?;
        Ok(GrantOutcome {
            subject: saved,
            granted,
            revoked,
        })
    }

    async fn deactivate_group(&self, group_id: i32, actor: i32) -> StoreResult<RoleGroup> {
        let mut tx = self.pool.begin().await?;
        let query = format!(
            "UPDATE role_group SET active = FALSE, updated_on = now(), updated_by = $2 \
             WHERE id = $1 AND active RETURNING {GROUP_COLUMNS}"
        );
        let row: Option<DbGroup> = sqlx::query_as(&query)
            .bind(group_id)
            .bind(actor)
            .fetch_optional(&mut *tx)
            .await?;
        let group = RoleGroup::from(row.ok_or_else(|| StoreError::NotFound("role group".into()))?);
        sqlx::query("DELETE FROM role_group_role_mapping WHERE role_group_id = $1")
            .bind(group_id)
            .execute(&mut *tx)
            .await?;
        tx.commit().await?;
        Ok(group)
    }

    async fn inactive_group_casbin_names(&self) -> StoreResult<Vec<String>> {
        let names: Vec<String> = sqlx::query_scalar(
            "SELECT DISTINCT casbin_name FROM role_group WHERE NOT active \
             AND casbin_name NOT IN (SELECT casbin_name FROM role_group WHERE active) \
             ORDER BY casbin_name",
        )
        .fetch_all(&self.pool)
        .await?;
        Ok(names)
    }

    async fn list_active_group_role_pairs(&self) -> StoreResult<Vec<(String, String)>> {
        let rows: Vec<(String, String)> = sqlx::query_as(
            "SELECT g.casbin_name, r.role FROM role_group_role_mapping m \
             JOIN role_group g ON g.id = m.role_group_id JOIN roles r ON r.id = m.role_id \
             WHERE g.active ORDER BY m.id",
        )
        .fetch_all(&self.pool)
        .await?;
        Ok(rows)
    }
}

const ROLE_DATA_COLUMNS: &str = "id, entity, access_type, role, role_display_name, \
     role_description, role_data, is_preset_role, deleted";
const POLICY_DATA_COLUMNS: &str =
    "id, entity, access_type, role, policy_data, is_preset_role, deleted";

#[async_trait]
impl PresetRepo for PostgresStore {
    async fn list_role_data(&self) -> StoreResult<Vec<RbacRoleData>> {
        let query =
            format!("SELECT {ROLE_DATA_COLUMNS} FROM rbac_role_data WHERE NOT deleted ORDER BY id");
        let rows: Vec<DbRoleData> = sqlx::query_as(&query).fetch_all(&self.pool).await?;
        Ok(rows.into_iter().map(RbacRoleData::from).collect())
    }

    async fn list_policy_data(&self) -> StoreResult<Vec<RbacPolicyData>> {
        let query = format!(
            "SELECT {POLICY_DATA_COLUMNS} FROM rbac_policy_data WHERE NOT deleted ORDER BY id"
        );
        let rows: Vec<DbPolicyData> = sqlx::query_as(&query).fetch_all(&self.pool).await?;
        Ok(rows.into_iter().map(RbacPolicyData::from).collect())
    }

    async fn get_role_data(
        &self,
        entity: &str,
        access_type: &str,
        role: &str,
    ) -> StoreResult<Option<RbacRoleData>> {
        let query = format!(
            "SELECT {ROLE_DATA_COLUMNS} FROM rbac_role_data WHERE entity = $1 \
             AND access_type = $2 AND role = $3 AND NOT deleted"
        );
        let row: Option<DbRoleData> = sqlx::query_as(&query)
            .bind(entity)
            .bind(access_type)
            .bind(role)
            .fetch_optional(&self.pool)
            .await?;
        Ok(row.map(RbacRoleData::from))
    }

    async fn get_role_data_by_id(&self, id: i32) -> StoreResult<RbacRoleData> {
        let query = format!(
            "SELECT {ROLE_DATA_COLUMNS} FROM rbac_role_data WHERE id = $1 AND NOT deleted"
        );
        let row: Option<DbRoleData> = sqlx::query_as(&query)
            .bind(id)
            .fetch_optional(&self.pool)
            .await?;
        row.map(RbacRoleData::from)
            .ok_or_else(|| StoreError::NotFound("role data".into()))
    }

    async fn get_policy_data(
        &self,
        entity: &str,
        access_type: &str,
        role: &str,
    ) -> StoreResult<Option<RbacPolicyData>> {
        let query = format!(
            "SELECT {POLICY_DATA_COLUMNS} FROM rbac_policy_data WHERE entity = $1 \
             AND access_type = $2 AND role = $3 AND NOT deleted"
        );
        let row: Option<DbPolicyData> = sqlx::query_as(&query)
            .bind(entity)
            .bind(access_type)
            .bind(role)
            .fetch_optional(&self.pool)
            .await?;
        Ok(row.map(RbacPolicyData::from))
    }

    async fn save_preset(
        &self,
        mut role_data: RbacRoleData,
        mut policy_data: RbacPolicyData,
        actor: i32,
    ) -> StoreResult<(RbacRoleData, RbacPolicyData)> {
        let mut tx = self.pool.begin().await?;
        role_data.id = sqlx::query_scalar(
            "INSERT INTO rbac_role_data (entity, access_type, role, role_display_name, \
             role_description, role_data, is_preset_role, deleted, created_by, updated_by) \
             VALUES ($1, $2, $3, $4, $5, $6, $7, FALSE, $8, $8) \
             ON CONFLICT (entity, access_type, role) DO UPDATE SET \
             role_display_name = EXCLUDED.role_display_name, \
             role_description = EXCLUDED.role_description, role_data = EXCLUDED.role_data, \
             is_preset_role = EXCLUDED.is_preset_role, deleted = FALSE, updated_on = now(), \
             updated_by = EXCLUDED.updated_by RETURNING id",
        )
        .bind(&role_data.entity)
        .bind(&role_data.access_type)
        .bind(&role_data.role)
        .bind(&role_data.role_display_name)
        .bind(&role_data.role_description)
        .bind(Json(&role_data.role_data))
        .bind(role_data.is_preset_role)
        .bind(actor)
        .fetch_one(&mut *tx)
        .await?;
        policy_data.id = sqlx::query_scalar(
            "INSERT INTO rbac_policy_data (entity, access_type, role, policy_data, \
             is_preset_role, deleted, created_by, updated_by) \
             VALUES ($1, $2, $3, $4, $5, FALSE, $6, $6) \
             ON CONFLICT (entity, access_type, role) DO UPDATE SET \
             policy_data = EXCLUDED.policy_data, is_preset_role = EXCLUDED.is_preset_role, \
             deleted = FALSE, updated_on = now(), updated_by = EXCLUDED.updated_by RETURNING id",
        )
        .bind(&policy_data.entity)
        .bind(&policy_data.access_type)
        .bind(&policy_data.role)
        .bind(Json(&policy_data.policy_data))
        .bind(policy_data.is_preset_role)
        .bind(actor)
        .fetch_one(&mut *tx)
        .await?;
        tx.commit().await?;
        role_data.deleted = false;
        policy_data.deleted = false;
        Ok((role_data, policy_data))
    }

    async fn mark_preset_deleted(
        &self,
        entity: &str,
        access_type: &str,
        role: &str,
        actor: i32,
    ) -> StoreResult<()> {
        let mut tx = self.pool.begin().await?;
        for table in ["rbac_role_data", "rbac_policy_data"] {
            let query = format!(
                "UPDATE {table} SET deleted = TRUE, updated_on = now(), updated_by = $4 \
                 WHERE entity = $1 AND access_type = $2 AND role = $3"
            );
            sqlx::query(&query)
                .bind(entity)
                .bind(access_type)
                .bind(role)
                .bind(actor)
                .execute(&mut *tx)
                .await?;
        }
        tx.commit().await?;
        Ok(())
    }

    async fn list_declared_presets(&self) -> StoreResult<Vec<DefaultRbacRoleData>> {
        let rows: Vec<DbDefaultRoleData> = sqlx::query_as(
            "SELECT id, entity, access_type, role, role_display_name, role_description, \
             role_data, policy_data, enabled FROM default_rbac_role_data ORDER BY id",
        )
        .fetch_all(&self.pool)
        .await?;
        Ok(rows.into_iter().map(DefaultRbacRoleData::from).collect())
    }

    async fn seed_declared_presets(&self, presets: &[DefaultRbacRoleData]) -> StoreResult<usize> {
        let mut tx = self.pool.begin().await?;
        let mut inserted = 0usize;
        for preset in presets {
            let result = sqlx::query(
                "INSERT INTO default_rbac_role_data (entity, access_type, role, \
                 role_display_name, role_description, role_data, policy_data, enabled) \
                 VALUES ($1, $2, $3, $4, $5, $6, $7, $8) \
                 ON CONFLICT (entity, access_type, role) DO NOTHING",
            )
            .bind(&preset.entity)
            .bind(&preset.access_type)
            .bind(&preset.role)
            .bind(&preset.role_display_name)
            .bind(&preset.role_description)
            .bind(Json(&preset.role_data))
            .bind(Json(&preset.policy_data))
            .bind(preset.enabled)
            .execute(&mut *tx)
            .await?;
            inserted += result.rows_affected() as usize;
        }
        tx.commit().await?;
        Ok(inserted)
    }
}

#[async_trait]
impl SsoRepo for PostgresStore {
    async fn list_sso(&self) -> StoreResult<Vec<SsoLoginModel>> {
        let rows: Vec<DbSso> =
            sqlx::query_as("SELECT id, name, url, config, active FROM sso_login ORDER BY id")
                .fetch_all(&self.pool)
                .await?;
        Ok(rows.into_iter().map(SsoLoginModel::from).collect())
    }

    async fn get_sso(&self, id: i32) -> StoreResult<SsoLoginModel> {
        let row: Option<DbSso> =
            sqlx::query_as("SELECT id, name, url, config, active FROM sso_login WHERE id = $1")
                .bind(id)
                .fetch_optional(&self.pool)
                .await?;
        row.map(SsoLoginModel::from)
            .ok_or_else(|| StoreError::NotFound("sso config".into()))
    }

    async fn get_sso_by_name(&self, name: &str) -> StoreResult<Option<SsoLoginModel>> {
        let row: Option<DbSso> =
            sqlx::query_as("SELECT id, name, url, config, active FROM sso_login WHERE name = $1")
                .bind(name)
                .fetch_optional(&self.pool)
                .await?;
        Ok(row.map(SsoLoginModel::from))
    }

    async fn active_sso(&self) -> StoreResult<Option<SsoLoginModel>> {
        let row: Option<DbSso> = sqlx::query_as(
            "SELECT id, name, url, config, active FROM sso_login WHERE active ORDER BY id LIMIT 1",
        )
        .fetch_optional(&self.pool)
        .await?;
        Ok(row.map(SsoLoginModel::from))
    }

    async fn save_sso(&self, model: SsoLoginModel, actor: i32) -> StoreResult<SsoLoginModel> {
        let mut tx = self.pool.begin().await?;
        let row: Option<DbSso> = if model.id == 0 {
            Some(
                sqlx::query_as(
                    "INSERT INTO sso_login (name, url, config, active, created_by, updated_by) \
                     VALUES ($1, $2, $3, $4, $5, $5) RETURNING id, name, url, config, active",
                )
                .bind(&model.name)
                .bind(&model.url)
                .bind(&model.config)
                .bind(model.active)
                .bind(actor)
                .fetch_one(&mut *tx)
                .await
                .map_err(|err| conflict_or(err, "sso config"))?,
            )
        } else {
            sqlx::query_as(
                "UPDATE sso_login SET name = $2, url = $3, config = $4, active = $5, \
                 updated_on = now(), updated_by = $6 WHERE id = $1 \
                 RETURNING id, name, url, config, active",
            )
            .bind(model.id)
            .bind(&model.name)
            .bind(&model.url)
            .bind(&model.config)
            .bind(model.active)
            .bind(actor)
            .fetch_optional(&mut *tx)
            .await
            .map_err(|err| conflict_or(err, "sso config"))?
        };
        let saved = SsoLoginModel::from(row.ok_or_else(|| StoreError::NotFound("sso config".into()))?);
        if saved.active {
            sqlx::query("UPDATE sso_login SET active = FALSE WHERE id <> $1 AND active")
                .bind(saved.id)
                .execute(&mut *tx)
                .await?;
        }
        tx.commit().await?;
        Ok(saved)
    }
}

#[async_trait]
impl SelfRegistrationRepo for PostgresStore {
    async fn self_registration_roles(&self) -> StoreResult<Vec<String>> {
        let roles: Vec<String> =
            sqlx::query_scalar("SELECT role FROM self_registration_roles ORDER BY role")
                .fetch_all(&self.pool)
                .await?;
        Ok(roles)
    }

    async fn set_self_registration_roles(&self, roles: &[String], actor: i32) -> StoreResult<()> {
        let mut tx = self.pool.begin().await?;
        sqlx::query("DELETE FROM self_registration_roles")
            .execute(&mut *tx)
            .await?;
        for role in roles {
            sqlx::query(
                "INSERT INTO self_registration_roles (role, created_by, updated_by) \
                 VALUES ($1, $2, $2) ON CONFLICT DO NOTHING",
            )
            .bind(role)
            .bind(actor)
            .execute(&mut *tx)
            .await?;
        }
        tx.commit().await?;
        Ok(())
    }
}

#[async_trait]
impl PolicyAdapter for PostgresStore {
    async fn load_policy_rules(&self) -> StoreResult<Vec<Policy>> {
        let rows: Vec<DbPolicyRule> =
            sqlx::query_as("SELECT p_type, v0, v1, v2, v3 FROM casbin_rule ORDER BY id")
                .fetch_all(&self.pool)
                .await?;
        rows.into_iter().map(policy_from_row).collect()
    }

    async fn save_policy_rules(&self, policies: &[Policy]) -> StoreResult<()> {
        let mut tx = self.pool.begin().await?;
        for policy in policies {
            let [v0, v1, v2, v3] = policy_columns(policy);
            sqlx::query(
                "INSERT INTO casbin_rule (p_type, v0, v1, v2, v3) VALUES ($1, $2, $3, $4, $5) \
                 ON CONFLICT DO NOTHING",
            )
            .bind(policy.ptype.as_str())
            .bind(v0)
            .bind(v1)
            .bind(v2)
            .bind(v3)
            .execute(&mut *tx)
            .await?;
        }
        tx.commit().await?;
        Ok(())
    }

    async fn remove_policy_rules(&self, policies: &[Policy]) -> StoreResult<()> {
        let mut tx = self.pool.begin().await?;
        for policy in policies {
            let [v0, v1, v2, v3] = policy_columns(policy);
            sqlx::query(
                "DELETE FROM casbin_rule WHERE p_type = $1 AND v0 = $2 AND v1 = $3 \
                 AND v2 = $4 AND v3 = $5",
            )
            .bind(policy.ptype.as_str())
            .bind(v0)
            .bind(v1)
            .bind(v2)
            .bind(v3)
            .execute(&mut *tx)
            .await?;
        }
        tx.commit().await?;
        Ok(())
    }
}

#[async_trait]
impl AuthStore for PostgresStore {
    async fn health_check(&self) -> StoreResult<()> {
        sqlx::query("SELECT 1").execute(&self.pool).await?;
        Ok(())
    }

    fn is_durable(&self) -> bool {
        true
    }

    fn backend_name(&self) -> &'static str {
        "postgres"
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::model::{ACTION_SUPER_ADMIN, ENTITY_CHART_GROUP};

    fn lookup_sql(selector: &RoleFilter) -> Option<String> {
        role_lookup(selector).map(|query| query.sql().to_string())
    }

    #[test]
    fn role_lookup_filters_each_shape_in_sql() {
        let apps = lookup_sql(&RoleFilter {
            entity: ENTITY_APPS.to_string(),
            team: "T".to_string(),
            environment: "E".to_string(),
            action: "view".to_string(),
            ..RoleFilter::default()
        })
        .expect("apps");
        assert!(apps.contains("coalesce(team, '') = $4"));
        assert!(apps.contains("coalesce(entity_name, '') = $6"));
        assert!(apps.ends_with("ORDER BY id LIMIT 1"));

        let cluster = lookup_sql(&RoleFilter {
            entity: ENTITY_CLUSTER.to_string(),
            cluster: "c1".to_string(),
            namespace: "ns".to_string(),
            action: "view".to_string(),
            ..RoleFilter::default()
        })
        .expect("cluster");
        assert!(cluster.contains("cluster = $4 AND namespace = $5"));
        assert!(cluster.contains("\"group\" IS NULL AND kind IS NULL AND resource IS NULL"));

        let super_admin = lookup_sql(&RoleFilter {
            action: ACTION_SUPER_ADMIN.to_string(),
            ..RoleFilter::default()
        })
        .expect("super admin");
        assert!(super_admin.contains("coalesce(cluster, '') = ''"));
        assert!(!super_admin.contains("access_type"));
    }

    #[test]
    fn update_lookup_needs_an_entity_name() {
        let mut selector = RoleFilter {
            entity: ENTITY_CHART_GROUP.to_string(),
            entity_name: "payments".to_string(),
            action: ACTION_UPDATE.to_string(),
            ..RoleFilter::default()
        };
        let sql = lookup_sql(&selector).expect("named");
        assert!(sql.contains("entity_name = $4"));
        selector.entity_name.clear();
        assert!(lookup_sql(&selector).is_none());

        selector.action = "view".to_string();
        let sql = lookup_sql(&selector).expect("view");
        assert!(!sql.contains("entity_name"));
    }

    #[test]
    fn unique_violation_detects_only_db_codes() {
        let err = sqlx::Error::RowNotFound;
        assert!(!is_unique_violation(&err));
        assert!(matches!(
            conflict_or(sqlx::Error::RowNotFound, "user"),
            StoreError::Unexpected(_)
        ));
    }

    #[test]
    fn empty_scope_values_bind_as_null() {
        assert_eq!(nullable(""), None);
        assert_eq!(nullable("T"), Some("T"));
    }

    #[test]
    fn grouping_rows_store_role_in_second_column() {
        let edge = Policy::grouping("alice@x", "role:view_T__");
        assert_eq!(policy_columns(&edge), ["alice@x", "role:view_T__", "", ""]);
        let back = policy_from_row(DbPolicyRule {
            p_type: "g".to_string(),
            v0: "alice@x".to_string(),
            v1: "role:view_T__".to_string(),
            v2: String::new(),
            v3: String::new(),
        })
        .expect("row");
        assert_eq!(back, edge);
    }

    #[test]
    fn unknown_policy_type_is_rejected() {
        let err = policy_from_row(DbPolicyRule {
            p_type: "x".to_string(),
            v0: String::new(),
            v1: String::new(),
            v2: String::new(),
            v3: String::new(),
        })
        .expect_err("invalid");
        assert!(err.to_string().contains("invalid policy type"));
    }

    #[test]
    fn role_columns_read_back_empty_strings() {
        assert!(ROLE_COLUMNS.contains("coalesce(\"group\", '') AS \"group\""));
        assert!(MappingTable::GroupRoles.table() == "role_group_role_mapping");
    }
}
