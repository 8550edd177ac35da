pub mod seed;

use chrono::NaiveDate;
use sqlx::{migrate::MigrateError, sqlite::SqlitePoolOptions, SqlitePool};
use thiserror::Error;

use covtrack_core::types::{CarWithOwner, Claim, ExpiringPolicy, PolicyPeriod};

/// Top-level database handle that owns the SQLite connection pool.
#[derive(Clone)]
pub struct Database {
    pool: SqlitePool,
}

impl Database {
    /// Establishes a new SQLite connection pool for the provided connection string.
    pub async fn connect(database_url: &str) -> Result<Self, StorageError> {
        let pool = SqlitePoolOptions::new()
            .max_connections(5)
            .connect(database_url)
            .await
            .map_err(StorageError::Connect)?;

        apply_pragmas(&pool).await?;

        Ok(Self { pool })
    }

    /// Applies migrations located under `migrations/`.
    pub async fn run_migrations(&self) -> Result<(), StorageError> {
        sqlx::migrate!("../../migrations")
            .run(&self.pool)
            .await
            .map_err(StorageError::Migration)?;
        Ok(())
    }

    /// Returns a handle for interacting with car owners.
    pub fn owners(&self) -> OwnerRepository {
        OwnerRepository {
            pool: self.pool.clone(),
        }
    }

    /// Returns a handle for interacting with registered cars.
    pub fn cars(&self) -> CarRepository {
        CarRepository {
            pool: self.pool.clone(),
        }
    }

    /// Returns a handle to operate on insurance policies.
    pub fn policies(&self) -> PolicyRepository {
        PolicyRepository {
            pool: self.pool.clone(),
        }
    }

    /// Returns a handle to operate on damage claims.
    pub fn claims(&self) -> ClaimRepository {
        ClaimRepository {
            pool: self.pool.clone(),
        }
    }

    /// Exposes the inner pool when lower level access is required.
    pub fn pool(&self) -> &SqlitePool {
        &self.pool
    }
}

async fn apply_pragmas(pool: &SqlitePool) -> Result<(), StorageError> {
    sqlx::query("PRAGMA foreign_keys = ON;")
        .execute(pool)
        .await
        .map_err(StorageError::Pragma)?;

    sqlx::query("PRAGMA journal_mode = WAL;")
        .fetch_one(pool)
        .await
        .map_err(StorageError::Pragma)?;

    sqlx::query("PRAGMA synchronous = NORMAL;")
        .execute(pool)
        .await
        .map_err(StorageError::Pragma)?;

    sqlx::query("PRAGMA busy_timeout = 5000;")
        .execute(pool)
        .await
        .map_err(StorageError::Pragma)?;

    Ok(())
}

/// General storage level errors.
#[derive(Debug, Error)]
pub enum StorageError {
    #[error("failed to connect to sqlite: {0}")]
    Connect(sqlx::Error),
    #[error("failed to apply pragma: {0}")]
    Pragma(sqlx::Error),
    #[error("failed to run database migrations: {0}")]
    Migration(MigrateError),
    #[error("database error: {0}")]
    Database(#[from] sqlx::Error),
}

/// Repository used to query and create car owners.
#[derive(Clone)]
pub struct OwnerRepository {
    pool: SqlitePool,
}

impl OwnerRepository {
    /// Inserts a new owner and returns the generated identifier.
    pub async fn insert(&self, owner: NewOwner<'_>) -> Result<i64, OwnerError> {
        let result = sqlx::query("INSERT INTO owners (name, email) VALUES (?, ?)")
            .bind(owner.name)
            .bind(owner.email)
            .execute(&self.pool)
            .await?;

        Ok(result.last_insert_rowid())
    }

    /// Returns `true` when an owner with the given id exists.
    pub async fn exists(&self, owner_id: i64) -> Result<bool, OwnerError> {
        let present: i64 = sqlx::query_scalar("SELECT EXISTS(SELECT 1 FROM owners WHERE id = ?)")
            .bind(owner_id)
            .fetch_one(&self.pool)
            .await?;

        Ok(present != 0)
    }

    /// Number of owner rows, used to decide whether seeding is needed.
    pub async fn count(&self) -> Result<i64, OwnerError> {
        let count: i64 = sqlx::query_scalar("SELECT COUNT(*) FROM owners")
            .fetch_one(&self.pool)
            .await?;

        Ok(count)
    }
}

/// Data required to create a new owner.
pub struct NewOwner<'a> {
    pub name: &'a str,
    pub email: Option<&'a str>,
}

/// Errors that can occur while operating on owners.
#[derive(Debug, Error)]
pub enum OwnerError {
    #[error("database error: {0}")]
    Database(#[from] sqlx::Error),
}

/// Repository used to query and create registered cars.
#[derive(Clone)]
pub struct CarRepository {
    pool: SqlitePool,
}

impl CarRepository {
    /// Inserts a new car and returns the generated identifier.
    ///
    /// The VIN is unique across the fleet and the owner must already
    /// exist; both violations surface as dedicated variants so callers can
    /// map them to the right response.
    pub async fn insert(&self, car: NewCar<'_>) -> Result<i64, CarError> {
        let result = sqlx::query(
            "INSERT INTO cars (vin, make, model, year_of_manufacture, owner_id) \
             VALUES (?, ?, ?, ?, ?)",
        )
        .bind(car.vin)
        .bind(car.make)
        .bind(car.model)
        .bind(car.year_of_manufacture)
        .bind(car.owner_id)
        .execute(&self.pool)
        .await;

        match result {
            Ok(done) => Ok(done.last_insert_rowid()),
            Err(sqlx::Error::Database(db_err)) => match db_err.code().as_deref() {
                Some("2067") => Err(CarError::DuplicateVin),
                Some("787") => Err(CarError::MissingOwner),
                _ => Err(CarError::Database(sqlx::Error::Database(db_err))),
            },
            Err(err) => Err(CarError::Database(err)),
        }
    }

    /// Lists every car joined with its owner's name and email.
    pub async fn list_with_owners(&self) -> Result<Vec<CarWithOwner>, CarError> {
        let rows = sqlx::query_as::<_, CarWithOwnerRow>(
            r#"
SELECT c.id,
       c.vin,
       c.make,
       c.model,
       c.year_of_manufacture,
       c.owner_id,
       o.name AS owner_name,
       o.email AS owner_email
  FROM cars AS c
  JOIN owners AS o
    ON o.id = c.owner_id
 ORDER BY c.id ASC
            "#,
        )
        .fetch_all(&self.pool)
        .await?;

        Ok(rows.into_iter().map(CarWithOwnerRow::into_domain).collect())
    }

    /// Returns `true` when a car with the given VIN is already registered.
    pub async fn vin_exists(&self, vin: &str) -> Result<bool, CarError> {
        let present: i64 = sqlx::query_scalar("SELECT EXISTS(SELECT 1 FROM cars WHERE vin = ?)")
            .bind(vin)
            .fetch_one(&self.pool)
            .await?;

        Ok(present != 0)
    }

    /// Returns `true` when a car with the given id exists.
    pub async fn exists(&self, car_id: i64) -> Result<bool, CarError> {
        let present: i64 = sqlx::query_scalar("SELECT EXISTS(SELECT 1 FROM cars WHERE id = ?)")
            .bind(car_id)
            .fetch_one(&self.pool)
            .await?;

        Ok(present != 0)
    }
}

/// Data required to register a new car.
pub struct NewCar<'a> {
    pub vin: &'a str,
    pub make: Option<&'a str>,
    pub model: Option<&'a str>,
    pub year_of_manufacture: i64,
    pub owner_id: i64,
}

/// Database row for a car joined with its owner.
#[derive(Debug, sqlx::FromRow)]
struct CarWithOwnerRow {
    id: i64,
    vin: String,
    make: Option<String>,
    model: Option<String>,
    year_of_manufacture: i64,
    owner_id: i64,
    owner_name: String,
    owner_email: Option<String>,
}

impl CarWithOwnerRow {
    fn into_domain(self) -> CarWithOwner {
        CarWithOwner {
            id: self.id,
            vin: self.vin,
            make: self.make,
            model: self.model,
            year_of_manufacture: self.year_of_manufacture,
            owner_id: self.owner_id,
            owner_name: self.owner_name,
            owner_email: self.owner_email,
        }
    }
}

/// Errors that can occur while operating on cars.
#[derive(Debug, Error)]
pub enum CarError {
    #[error("a car with the same vin is already registered")]
    DuplicateVin,
    #[error("owner does not exist")]
    MissingOwner,
    #[error("database error: {0}")]
    Database(sqlx::Error),
}

impl From<sqlx::Error> for CarError {
    fn from(err: sqlx::Error) -> Self {
        Self::Database(err)
    }
}

/// Repository responsible for insurance policies.
#[derive(Clone)]
pub struct PolicyRepository {
    pool: SqlitePool,
}

impl PolicyRepository {
    /// Inserts a new policy period and returns the generated identifier.
    pub async fn insert(&self, policy: NewPolicy<'_>) -> Result<i64, PolicyError> {
        let result = sqlx::query(
            "INSERT INTO policies (car_id, provider, start_date, end_date) \
             VALUES (?, ?, ?, ?)",
        )
        .bind(policy.car_id)
        .bind(policy.provider)
        .bind(policy.start_date)
        .bind(policy.end_date)
        .execute(&self.pool)
        .await?;

        Ok(result.last_insert_rowid())
    }

    /// Lists the policy periods of a car ordered by start date.
    pub async fn list_for_car(&self, car_id: i64) -> Result<Vec<PolicyPeriod>, PolicyError> {
        let rows = sqlx::query_as::<_, PolicyPeriodRow>(
            "SELECT id, car_id, provider, start_date, end_date, is_processed \
               FROM policies WHERE car_id = ? ORDER BY start_date ASC, id ASC",
        )
        .bind(car_id)
        .fetch_all(&self.pool)
        .await?;

        Ok(rows.into_iter().map(PolicyPeriodRow::into_domain).collect())
    }

    /// Returns `true` when the car has a policy whose inclusive date range
    /// contains `date`.
    pub async fn has_active_on(&self, car_id: i64, date: NaiveDate) -> Result<bool, PolicyError> {
        let present: i64 = sqlx::query_scalar(
            "SELECT EXISTS(SELECT 1 FROM policies \
              WHERE car_id = ? AND start_date <= ? AND end_date >= ?)",
        )
        .bind(car_id)
        .bind(date)
        .bind(date)
        .fetch_one(&self.pool)
        .await?;

        Ok(present != 0)
    }

    /// Lists unprocessed policies whose end date falls in `[from, to]`,
    /// joined with the car model for alert context.
    ///
    /// The bound is date-granular; the caller applies the exact per-record
    /// instant test on the result.
    pub async fn list_unprocessed_expiring(
        &self,
        from: NaiveDate,
        to: NaiveDate,
    ) -> Result<Vec<ExpiringPolicy>, PolicyError> {
        let rows = sqlx::query_as::<_, ExpiringPolicyRow>(
            r#"
SELECT p.id,
       p.provider,
       p.end_date,
       c.model AS car_model
  FROM policies AS p
  JOIN cars AS c
    ON c.id = p.car_id
 WHERE p.is_processed = 0
   AND p.end_date >= ?
   AND p.end_date <= ?
 ORDER BY p.end_date ASC, p.id ASC
            "#,
        )
        .bind(from)
        .bind(to)
        .fetch_all(&self.pool)
        .await?;

        Ok(rows.into_iter().map(ExpiringPolicyRow::into_domain).collect())
    }

    /// Marks the given policies as processed in a single transaction.
    ///
    /// All-or-nothing: when any id matches no row the transaction is rolled
    /// back and no flag changes. The flag only ever transitions from 0 to 1.
    pub async fn mark_processed(&self, ids: &[i64]) -> Result<(), PolicyError> {
        if ids.is_empty() {
            return Ok(());
        }

        let mut tx = self.pool.begin().await?;
        for &id in ids {
            let result = sqlx::query("UPDATE policies SET is_processed = 1 WHERE id = ?")
                .bind(id)
                .execute(&mut *tx)
                .await?;

            if result.rows_affected() == 0 {
                return Err(PolicyError::MissingPolicy(id));
            }
        }
        tx.commit().await?;

        Ok(())
    }
}

/// Data required to create a new policy period.
pub struct NewPolicy<'a> {
    pub car_id: i64,
    pub provider: &'a str,
    pub start_date: NaiveDate,
    pub end_date: NaiveDate,
}

/// Database row for a policy period.
#[derive(Debug, sqlx::FromRow)]
struct PolicyPeriodRow {
    id: i64,
    car_id: i64,
    provider: String,
    start_date: NaiveDate,
    end_date: NaiveDate,
    is_processed: i64,
}

impl PolicyPeriodRow {
    fn into_domain(self) -> PolicyPeriod {
        PolicyPeriod {
            id: self.id,
            car_id: self.car_id,
            provider: self.provider,
            start_date: self.start_date,
            end_date: self.end_date,
            is_processed: self.is_processed != 0,
        }
    }
}

/// Database row for an expiring policy joined with its car.
#[derive(Debug, sqlx::FromRow)]
struct ExpiringPolicyRow {
    id: i64,
    provider: String,
    end_date: NaiveDate,
    car_model: Option<String>,
}

impl ExpiringPolicyRow {
    fn into_domain(self) -> ExpiringPolicy {
        ExpiringPolicy {
            id: self.id,
            provider: self.provider,
            end_date: self.end_date,
            car_model: self.car_model,
        }
    }
}

/// Errors that can occur while operating on policies.
#[derive(Debug, Error)]
pub enum PolicyError {
    #[error("policy {0} does not exist")]
    MissingPolicy(i64),
    #[error("database error: {0}")]
    Database(#[from] sqlx::Error),
}

/// Repository responsible for damage claims.
#[derive(Clone)]
pub struct ClaimRepository {
    pool: SqlitePool,
}

impl ClaimRepository {
    /// Inserts a new claim and returns it with the generated identifier.
    pub async fn insert(&self, claim: NewClaim<'_>) -> Result<Claim, ClaimError> {
        let result = sqlx::query(
            "INSERT INTO claims (car_id, claim_date, description, amount) \
             VALUES (?, ?, ?, ?)",
        )
        .bind(claim.car_id)
        .bind(claim.claim_date)
        .bind(claim.description)
        .bind(claim.amount)
        .execute(&self.pool)
        .await?;

        Ok(Claim {
            id: result.last_insert_rowid(),
            car_id: claim.car_id,
            claim_date: claim.claim_date,
            description: claim.description.to_string(),
            amount: claim.amount,
        })
    }

    /// Lists the claims of a car ordered by claim date.
    pub async fn list_for_car(&self, car_id: i64) -> Result<Vec<Claim>, ClaimError> {
        let rows = sqlx::query_as::<_, ClaimRow>(
            "SELECT id, car_id, claim_date, description, amount \
               FROM claims WHERE car_id = ? ORDER BY claim_date ASC, id ASC",
        )
        .bind(car_id)
        .fetch_all(&self.pool)
        .await?;

        Ok(rows.into_iter().map(ClaimRow::into_domain).collect())
    }
}

/// Data required to file a new claim.
pub struct NewClaim<'a> {
    pub car_id: i64,
    pub claim_date: NaiveDate,
    pub description: &'a str,
    pub amount: f64,
}

/// Database row for a claim.
#[derive(Debug, sqlx::FromRow)]
struct ClaimRow {
    id: i64,
    car_id: i64,
    claim_date: NaiveDate,
    description: String,
    amount: f64,
}

impl ClaimRow {
    fn into_domain(self) -> Claim {
        Claim {
            id: self.id,
            car_id: self.car_id,
            claim_date: self.claim_date,
            description: self.description,
            amount: self.amount,
        }
    }
}

/// Errors that can occur while operating on claims.
#[derive(Debug, Error)]
pub enum ClaimError {
    #[error("database error: {0}")]
    Database(#[from] sqlx::Error),
}

#[cfg(test)]
mod tests {
    use super::*;

    async fn setup_db() -> Database {
        let db = Database::connect("sqlite::memory:?cache=shared")
            .await
            .expect("connect");
        db.run_migrations().await.expect("migrations");
        db
    }

    async fn seed_owner_and_car(db: &Database) -> (i64, i64) {
        let owner_id = db
            .owners()
            .insert(NewOwner {
                name: "Ana Pop",
                email: Some("ana.pop@example.com"),
            })
            .await
            .expect("insert owner");
        let car_id = db
            .cars()
            .insert(NewCar {
                vin: "VIN12345",
                make: Some("Dacia"),
                model: Some("Logan"),
                year_of_manufacture: 2018,
                owner_id,
            })
            .await
            .expect("insert car");
        (owner_id, car_id)
    }

    fn date(value: &str) -> NaiveDate {
        value.parse().expect("valid test date")
    }

    #[tokio::test]
    async fn migrations_apply() {
        let db = setup_db().await;

        let tables: (i64,) =
            sqlx::query_as("SELECT COUNT(*) FROM sqlite_master WHERE type = 'table'")
                .fetch_one(db.pool())
                .await
                .expect("fetch tables");
        assert!(tables.0 >= 4, "expected core tables to be created");
    }

    #[tokio::test]
    async fn insert_car_rejects_duplicate_vin() {
        let db = setup_db().await;
        let (owner_id, _) = seed_owner_and_car(&db).await;

        let err = db
            .cars()
            .insert(NewCar {
                vin: "VIN12345",
                make: None,
                model: None,
                year_of_manufacture: 2020,
                owner_id,
            })
            .await
            .unwrap_err();
        assert!(matches!(err, CarError::DuplicateVin));
    }

    #[tokio::test]
    async fn insert_car_rejects_missing_owner() {
        let db = setup_db().await;

        let err = db
            .cars()
            .insert(NewCar {
                vin: "VIN99999",
                make: None,
                model: None,
                year_of_manufacture: 2020,
                owner_id: 42,
            })
            .await
            .unwrap_err();
        assert!(matches!(err, CarError::MissingOwner));
    }

    #[tokio::test]
    async fn list_with_owners_joins_owner_columns() {
        let db = setup_db().await;
        let (owner_id, car_id) = seed_owner_and_car(&db).await;

        let cars = db.cars().list_with_owners().await.expect("list cars");
        assert_eq!(cars.len(), 1);
        assert_eq!(cars[0].id, car_id);
        assert_eq!(cars[0].owner_id, owner_id);
        assert_eq!(cars[0].owner_name, "Ana Pop");
        assert_eq!(cars[0].owner_email.as_deref(), Some("ana.pop@example.com"));
    }

    #[tokio::test]
    async fn validity_containment_is_inclusive_on_both_boundaries() {
        let db = setup_db().await;
        let (_, car_id) = seed_owner_and_car(&db).await;
        db.policies()
            .insert(NewPolicy {
                car_id,
                provider: "Allianz",
                start_date: date("2024-01-01"),
                end_date: date("2024-12-31"),
            })
            .await
            .expect("insert policy");

        let policies = db.policies();
        assert!(policies
            .has_active_on(car_id, date("2024-01-01"))
            .await
            .expect("query"));
        assert!(policies
            .has_active_on(car_id, date("2024-12-31"))
            .await
            .expect("query"));
        assert!(!policies
            .has_active_on(car_id, date("2023-12-31"))
            .await
            .expect("query"));
        assert!(!policies
            .has_active_on(car_id, date("2025-01-01"))
            .await
            .expect("query"));
    }

    #[tokio::test]
    async fn expiring_projection_filters_processed_and_joins_model() {
        let db = setup_db().await;
        let (_, car_id) = seed_owner_and_car(&db).await;
        let policies = db.policies();

        let due = policies
            .insert(NewPolicy {
                car_id,
                provider: "Allianz",
                start_date: date("2024-01-01"),
                end_date: date("2024-06-15"),
            })
            .await
            .expect("insert due policy");
        let out_of_range = policies
            .insert(NewPolicy {
                car_id,
                provider: "Groupama",
                start_date: date("2024-01-01"),
                end_date: date("2024-09-30"),
            })
            .await
            .expect("insert later policy");
        let processed = policies
            .insert(NewPolicy {
                car_id,
                provider: "Allianz",
                start_date: date("2023-01-01"),
                end_date: date("2024-06-15"),
            })
            .await
            .expect("insert processed policy");
        policies
            .mark_processed(&[processed])
            .await
            .expect("mark processed");

        let matches = policies
            .list_unprocessed_expiring(date("2024-06-14"), date("2024-06-15"))
            .await
            .expect("list expiring");
        assert_eq!(matches.len(), 1);
        assert_eq!(matches[0].id, due);
        assert_eq!(matches[0].provider, "Allianz");
        assert_eq!(matches[0].car_model.as_deref(), Some("Logan"));
        assert!(matches.iter().all(|policy| policy.id != out_of_range));
    }

    #[tokio::test]
    async fn mark_processed_updates_every_given_policy() {
        let db = setup_db().await;
        let (_, car_id) = seed_owner_and_car(&db).await;
        let policies = db.policies();

        let first = policies
            .insert(NewPolicy {
                car_id,
                provider: "Allianz",
                start_date: date("2024-01-01"),
                end_date: date("2024-06-15"),
            })
            .await
            .expect("insert first");
        let second = policies
            .insert(NewPolicy {
                car_id,
                provider: "Groupama",
                start_date: date("2024-01-01"),
                end_date: date("2024-06-16"),
            })
            .await
            .expect("insert second");

        policies
            .mark_processed(&[first, second])
            .await
            .expect("mark processed");

        let flags: Vec<(i64,)> = sqlx::query_as("SELECT is_processed FROM policies ORDER BY id")
            .fetch_all(db.pool())
            .await
            .expect("fetch flags");
        assert_eq!(flags, vec![(1,), (1,)]);
    }

    #[tokio::test]
    async fn mark_processed_rolls_back_entirely_on_unknown_id() {
        let db = setup_db().await;
        let (_, car_id) = seed_owner_and_car(&db).await;
        let policies = db.policies();

        let existing = policies
            .insert(NewPolicy {
                car_id,
                provider: "Allianz",
                start_date: date("2024-01-01"),
                end_date: date("2024-06-15"),
            })
            .await
            .expect("insert policy");

        let err = policies
            .mark_processed(&[existing, 9999])
            .await
            .unwrap_err();
        assert!(matches!(err, PolicyError::MissingPolicy(9999)));

        let flag: (i64,) = sqlx::query_as("SELECT is_processed FROM policies WHERE id = ?")
            .bind(existing)
            .fetch_one(db.pool())
            .await
            .expect("fetch flag");
        assert_eq!(flag.0, 0, "partial batch application is forbidden");
    }

    #[tokio::test]
    async fn history_lists_are_ordered_by_date() {
        let db = setup_db().await;
        let (_, car_id) = seed_owner_and_car(&db).await;

        db.policies()
            .insert(NewPolicy {
                car_id,
                provider: "Groupama",
                start_date: date("2025-01-01"),
                end_date: date("2026-01-01"),
            })
            .await
            .expect("insert later policy");
        db.policies()
            .insert(NewPolicy {
                car_id,
                provider: "Allianz",
                start_date: date("2024-01-01"),
                end_date: date("2024-12-31"),
            })
            .await
            .expect("insert earlier policy");

        db.claims()
            .insert(NewClaim {
                car_id,
                claim_date: date("2024-08-10"),
                description: "Rear bumper damage",
                amount: 1200.50,
            })
            .await
            .expect("insert later claim");
        db.claims()
            .insert(NewClaim {
                car_id,
                claim_date: date("2024-03-02"),
                description: "Windshield crack",
                amount: 350.0,
            })
            .await
            .expect("insert earlier claim");

        let policies = db
            .policies()
            .list_for_car(car_id)
            .await
            .expect("list policies");
        assert_eq!(policies.len(), 2);
        assert_eq!(policies[0].provider, "Allianz");
        assert_eq!(policies[1].provider, "Groupama");
        assert!(!policies[0].is_processed);

        let claims = db.claims().list_for_car(car_id).await.expect("list claims");
        assert_eq!(claims.len(), 2);
        assert_eq!(claims[0].description, "Windshield crack");
        assert_eq!(claims[1].description, "Rear bumper damage");
    }
}
