#[macro_use]
extern crate rocket;

#[macro_use]
extern crate log;

#[cfg(test)]
#[macro_use]
extern crate backend_test;

use rocket::{Build, Rocket};

pub mod api;
pub mod config;
pub mod error;
pub mod logging;
pub mod model;

pub use config::Config;

/// Assemble the server: routes plus fairings, in dependency order
/// (config first, then the database, then request logging).
pub fn build() -> Rocket<Build> {
    rocket::build()
        .mount("/", api::routes())
        .attach(config::ConfigFairing)
        .attach(config::DatabaseFairing)
        .attach(logging::LoggerFairing)
}

/// Connect to the test database server configured in `Rocket.toml`.
#[cfg(test)]
pub async fn db_client() -> mongodb::Client {
    let figment = rocket::build().figment().clone();
    let config: config::DbConfig = figment.extract().expect("`db_uri` not set");
    mongodb::Client::with_uri_str(&config.db_uri)
        .await
        .expect("Could not connect to the test database")
}

/// A random database name, so concurrent tests can't collide.
#[cfg(test)]
pub fn database() -> String {
    format!("test{}", rand::random::<u32>())
}

/// Assemble a server against an existing connection and database name,
/// bypassing the database fairing (tests manage their own databases).
#[cfg(test)]
pub async fn rocket_for_db(db_client: mongodb::Client, db_name: &str) -> Rocket<Build> {
    let db = db_client.database(db_name);
    model::mongodb::ensure_indexes_exist(&db)
        .await
        .expect("Failed to create test database indexes");
    rocket::build()
        .mount("/", api::routes())
        .attach(config::ConfigFairing)
        .attach(logging::LoggerFairing)
        .manage(db_client)
        .manage(db)
}
