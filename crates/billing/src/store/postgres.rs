//! PostgreSQL account store

use async_trait::async_trait;
use nanoedit_shared::{BillingType, PlanName, UserId};
use sqlx::{PgPool, Postgres, QueryBuilder};
use time::OffsetDateTime;

use super::AccountStore;
use crate::account::{
    Account, AccountDefaults, AccountPatch, ColumnValue, CreditGrant, DebitOutcome,
    GrantApplication,
};
use crate::error::{BillingError, BillingResult};
use crate::invariants::Invariant;

const ACCOUNT_COLUMNS: &str = "user_id, email, is_paid, plan_name, billing_type, \
     remaining_credits, total_credits, generation_count, subscription_id, customer_id, \
     order_id, created_at, updated_at";

/// Row type for `user_usage`
#[derive(Debug, sqlx::FromRow)]
struct AccountRow {
    user_id: UserId,
    email: String,
    is_paid: bool,
    plan_name: Option<String>,
    billing_type: Option<String>,
    remaining_credits: i32,
    total_credits: i32,
    generation_count: i32,
    subscription_id: Option<String>,
    customer_id: Option<String>,
    order_id: Option<String>,
    created_at: OffsetDateTime,
    updated_at: OffsetDateTime,
}

impl From<AccountRow> for Account {
    fn from(row: AccountRow) -> Self {
        let plan_name = row.plan_name.as_deref().and_then(|raw| {
            raw.parse::<PlanName>()
                .map_err(|e| {
                    tracing::warn!(user_id = %row.user_id, error = %e, "Unrecognised plan in user_usage");
                })
                .ok()
        });
        let billing_type = row.billing_type.as_deref().and_then(|raw| {
            raw.parse::<BillingType>()
                .map_err(|e| {
                    tracing::warn!(user_id = %row.user_id, error = %e, "Unrecognised billing type in user_usage");
                })
                .ok()
        });

        Account {
            user_id: row.user_id,
            email: row.email,
            is_paid: row.is_paid,
            plan_name,
            billing_type,
            remaining_credits: row.remaining_credits,
            total_credits: row.total_credits,
            generation_count: row.generation_count,
            subscription_id: row.subscription_id,
            customer_id: row.customer_id,
            order_id: row.order_id,
            created_at: row.created_at,
            updated_at: row.updated_at,
        }
    }
}

/// Account store backed by the `user_usage` table
#[derive(Clone)]
pub struct PgAccountStore {
    pool: PgPool,
}

impl PgAccountStore {
    pub fn new(pool: PgPool) -> Self {
        Self { pool }
    }

    async fn balance(&self, user_id: UserId) -> BillingResult<Option<i32>> {
        let balance: Option<(i32,)> =
            sqlx::query_as("SELECT remaining_credits FROM user_usage WHERE user_id = $1")
                .bind(user_id)
                .fetch_optional(&self.pool)
                .await?;
        Ok(balance.map(|(credits,)| credits))
    }
}

const GRANT_COLUMNS: &str = "user_id, email, is_paid, plan_name, billing_type, remaining_credits, \
     total_credits, subscription_id, customer_id, order_id, generation_count";

const GRANT_CONFLICT: &str = r#"
    ON CONFLICT (user_id) DO UPDATE SET
        email = EXCLUDED.email,
        is_paid = TRUE,
        plan_name = EXCLUDED.plan_name,
        billing_type = EXCLUDED.billing_type,
        remaining_credits = EXCLUDED.remaining_credits,
        total_credits = EXCLUDED.total_credits,
        subscription_id = COALESCE(EXCLUDED.subscription_id, user_usage.subscription_id),
        customer_id = COALESCE(EXCLUDED.customer_id, user_usage.customer_id),
        order_id = COALESCE(EXCLUDED.order_id, user_usage.order_id),
        updated_at = NOW()
"#;

type AccountQuery<'q> =
    sqlx::query::QueryAs<'q, Postgres, AccountRow, sqlx::postgres::PgArguments>;

/// Bind `$1..$8` of the grant statements
fn bind_grant<'q>(query: AccountQuery<'q>, grant: &'q CreditGrant) -> AccountQuery<'q> {
    query
        .bind(grant.user_id)
        .bind(grant.email.as_str())
        .bind(grant.plan.as_str())
        .bind(grant.billing_type.as_str())
        .bind(grant.credits)
        .bind(grant.refs.subscription_id.as_deref())
        .bind(grant.refs.customer_id.as_deref())
        .bind(grant.refs.order_id.as_deref())
}

fn push_value(builder: &mut QueryBuilder<'_, Postgres>, value: ColumnValue) {
    match value {
        ColumnValue::Bool(v) => builder.push_bind(v),
        ColumnValue::Int(v) => builder.push_bind(v),
        ColumnValue::Text(v) => builder.push_bind(v),
    };
}

#[async_trait]
impl AccountStore for PgAccountStore {
    async fn get(&self, user_id: UserId) -> BillingResult<Account> {
        let sql = format!("SELECT {} FROM user_usage WHERE user_id = $1", ACCOUNT_COLUMNS);
        let row: Option<AccountRow> = sqlx::query_as(&sql)
            .bind(user_id)
            .fetch_optional(&self.pool)
            .await?;

        row.map(Account::from).ok_or(BillingError::NotFound(user_id))
    }

    async fn create(
        &self,
        user_id: UserId,
        email: &str,
        defaults: &AccountDefaults,
    ) -> BillingResult<Account> {
        let sql = format!(
            r#"
            INSERT INTO user_usage
                (user_id, email, is_paid, plan_name, remaining_credits, total_credits, generation_count)
            VALUES ($1, $2, $3, $4, $5, $6, 0)
            ON CONFLICT (user_id) DO NOTHING
            RETURNING {}
            "#,
            ACCOUNT_COLUMNS
        );
        let created: Option<AccountRow> = sqlx::query_as(&sql)
            .bind(user_id)
            .bind(email)
            .bind(defaults.is_paid)
            .bind(defaults.plan_name.map(|p| p.as_str()))
            .bind(defaults.remaining_credits)
            .bind(defaults.total_credits)
            .fetch_optional(&self.pool)
            .await?;

        match created {
            Some(row) => Ok(row.into()),
            None => {
                tracing::debug!(user_id = %user_id, "Account created concurrently, returning existing row");
                self.get(user_id).await
            }
        }
    }

    async fn update(&self, user_id: UserId, patch: &AccountPatch) -> BillingResult<Account> {
        patch.validate()?;

        let mut builder: QueryBuilder<Postgres> =
            QueryBuilder::new("UPDATE user_usage SET updated_at = NOW()");
        for (column, value) in patch.columns() {
            builder.push(", ").push(column).push(" = ");
            push_value(&mut builder, value);
        }
        builder.push(" WHERE user_id = ").push_bind(user_id);
        builder.push(" RETURNING ").push(ACCOUNT_COLUMNS);

        let row: Option<AccountRow> = builder
            .build_query_as()
            .fetch_optional(&self.pool)
            .await?;

        row.map(Account::from).ok_or(BillingError::NotFound(user_id))
    }

    async fn upsert(
        &self,
        user_id: UserId,
        email: &str,
        patch: &AccountPatch,
    ) -> BillingResult<Account> {
        patch.validate()?;

        let columns: Vec<_> = patch
            .columns()
            .into_iter()
            .filter(|(column, _)| *column != "email")
            .collect();

        let mut builder: QueryBuilder<Postgres> =
            QueryBuilder::new("INSERT INTO user_usage (user_id, email");
        for (column, _) in &columns {
            builder.push(", ").push(*column);
        }
        builder.push(") VALUES (");
        builder.push_bind(user_id).push(", ").push_bind(email.trim().to_string());
        for (_, value) in &columns {
            builder.push(", ");
            push_value(&mut builder, value.clone());
        }
        builder.push(") ON CONFLICT (user_id) DO UPDATE SET email = EXCLUDED.email, updated_at = NOW()");
        for (column, _) in &columns {
            builder
                .push(", ")
                .push(*column)
                .push(" = EXCLUDED.")
                .push(*column);
        }
        builder.push(" RETURNING ").push(ACCOUNT_COLUMNS);

        let row: AccountRow = builder.build_query_as().fetch_one(&self.pool).await?;
        Ok(row.into())
    }

    async fn debit(&self, user_id: UserId, amount: i32) -> BillingResult<DebitOutcome> {
        if amount <= 0 {
            return Err(BillingError::InvalidAmount(amount));
        }

        // Conditional decrement: the WHERE clause is the only balance check that counts
        let remaining: Option<(i32,)> = sqlx::query_as(
            r#"
            UPDATE user_usage
            SET remaining_credits = remaining_credits - $2,
                updated_at = NOW()
            WHERE user_id = $1
              AND remaining_credits >= $2
            RETURNING remaining_credits
            "#,
        )
        .bind(user_id)
        .bind(amount)
        .fetch_optional(&self.pool)
        .await?;

        match remaining {
            Some((remaining_credits,)) => Ok(DebitOutcome {
                success: true,
                remaining_credits,
            }),
            None => Ok(DebitOutcome {
                success: false,
                remaining_credits: self.balance(user_id).await?.unwrap_or(0),
            }),
        }
    }

    async fn increment_generation_count(&self, user_id: UserId) -> BillingResult<()> {
        sqlx::query(
            "UPDATE user_usage SET generation_count = generation_count + 1 WHERE user_id = $1",
        )
        .bind(user_id)
        .execute(&self.pool)
        .await?;
        Ok(())
    }

    async fn apply_grant(&self, grant: &CreditGrant) -> BillingResult<GrantApplication> {
        if grant.credits < 0 {
            return Err(BillingError::InvalidAmount(grant.credits));
        }

        let row: Option<AccountRow> = match &grant.grant_key {
            // Claiming the key and writing the balance happen in one statement;
            // a key that is already claimed yields no source row and no write.
            Some(key) => {
                let sql = format!(
                    r#"
                    WITH claimed AS (
                        INSERT INTO applied_grants (user_id, grant_key)
                        VALUES ($1, $9)
                        ON CONFLICT (user_id, grant_key) DO NOTHING
                        RETURNING user_id
                    )
                    INSERT INTO user_usage ({})
                    SELECT $1, $2, TRUE, $3, $4, $5, $5, $6, $7, $8, 0 FROM claimed
                    {}
                    RETURNING {}
                    "#,
                    GRANT_COLUMNS, GRANT_CONFLICT, ACCOUNT_COLUMNS
                );
                bind_grant(sqlx::query_as(&sql), grant)
                    .bind(key.as_str())
                    .fetch_optional(&self.pool)
                    .await?
            }
            None => {
                let sql = format!(
                    r#"
                    INSERT INTO user_usage ({})
                    VALUES ($1, $2, TRUE, $3, $4, $5, $5, $6, $7, $8, 0)
                    {}
                    RETURNING {}
                    "#,
                    GRANT_COLUMNS, GRANT_CONFLICT, ACCOUNT_COLUMNS
                );
                Some(
                    bind_grant(sqlx::query_as(&sql), grant)
                        .fetch_one(&self.pool)
                        .await?,
                )
            }
        };

        Ok(match row {
            Some(row) => GrantApplication::Applied(row.into()),
            None => GrantApplication::Duplicate,
        })
    }

    async fn revoke(&self, user_id: UserId) -> BillingResult<Account> {
        let sql = format!(
            r#"
            UPDATE user_usage
            SET is_paid = FALSE,
                remaining_credits = 0,
                total_credits = 0,
                plan_name = NULL,
                billing_type = NULL,
                subscription_id = NULL,
                updated_at = NOW()
            WHERE user_id = $1
            RETURNING {}
            "#,
            ACCOUNT_COLUMNS
        );
        let row: Option<AccountRow> = sqlx::query_as(&sql)
            .bind(user_id)
            .fetch_optional(&self.pool)
            .await?;

        row.map(Account::from).ok_or(BillingError::NotFound(user_id))
    }

    async fn accounts_violating(&self, invariant: Invariant) -> BillingResult<Vec<Account>> {
        let sql = format!(
            "SELECT {} FROM user_usage WHERE {} ORDER BY updated_at DESC LIMIT 500",
            ACCOUNT_COLUMNS,
            invariant.violation_predicate()
        );
        let rows: Vec<AccountRow> = sqlx::query_as(&sql).fetch_all(&self.pool).await?;
        Ok(rows.into_iter().map(Account::from).collect())
    }
}
