use chrono::NaiveDate;
use thiserror::Error;

use crate::{CarError, Database, NewCar, NewOwner, NewPolicy, OwnerError, PolicyError};

/// Populates the database with demo owners, cars and policies.
///
/// Runs only against an empty database; a single existing owner row means
/// the data set was seeded before and the function returns without writing.
pub async fn ensure_seeded(db: &Database) -> Result<(), SeedError> {
    if db.owners().count().await? > 0 {
        return Ok(());
    }

    let owners = db.owners();
    let ana = owners
        .insert(NewOwner {
            name: "Ana Pop",
            email: Some("ana.pop@example.com"),
        })
        .await?;
    let bogdan = owners
        .insert(NewOwner {
            name: "Bogdan Ionescu",
            email: Some("bogdan.ionescu@example.com"),
        })
        .await?;

    let cars = db.cars();
    let car1 = cars
        .insert(NewCar {
            vin: "VIN12345",
            make: Some("Dacia"),
            model: Some("Logan"),
            year_of_manufacture: 2018,
            owner_id: ana,
        })
        .await?;
    let car2 = cars
        .insert(NewCar {
            vin: "VIN67890",
            make: Some("VW"),
            model: Some("Golf"),
            year_of_manufacture: 2021,
            owner_id: bogdan,
        })
        .await?;

    let policies = db.policies();
    policies
        .insert(NewPolicy {
            car_id: car1,
            provider: "Allianz",
            start_date: seed_date(2024, 1, 1),
            end_date: seed_date(2024, 12, 31),
        })
        .await?;
    policies
        .insert(NewPolicy {
            car_id: car1,
            provider: "Groupama",
            start_date: seed_date(2025, 1, 1),
            end_date: seed_date(2026, 1, 1),
        })
        .await?;
    policies
        .insert(NewPolicy {
            car_id: car2,
            provider: "Allianz",
            start_date: seed_date(2025, 3, 1),
            end_date: seed_date(2025, 9, 30),
        })
        .await?;

    Ok(())
}

fn seed_date(year: i32, month: u32, day: u32) -> NaiveDate {
    NaiveDate::from_ymd_opt(year, month, day).expect("seed dates are valid")
}

/// Errors that can occur while seeding demo data.
#[derive(Debug, Error)]
pub enum SeedError {
    #[error("failed to seed owners: {0}")]
    Owner(#[from] OwnerError),
    #[error("failed to seed cars: {0}")]
    Car(#[from] CarError),
    #[error("failed to seed policies: {0}")]
    Policy(#[from] PolicyError),
}

#[cfg(test)]
mod tests {
    use super::*;

    #[tokio::test]
    async fn seeding_is_idempotent() {
        let db = Database::connect("sqlite::memory:?cache=shared")
            .await
            .expect("connect");
        db.run_migrations().await.expect("migrations");

        ensure_seeded(&db).await.expect("first seed");
        ensure_seeded(&db).await.expect("second seed");

        assert_eq!(db.owners().count().await.expect("count"), 2);
        let cars = db.cars().list_with_owners().await.expect("list cars");
        assert_eq!(cars.len(), 2);
        let policies = db
            .policies()
            .list_for_car(cars[0].id)
            .await
            .expect("list policies");
        assert_eq!(policies.len(), 2);
    }
}
