use rocket::Route;

mod admin;
pub mod auth;
mod common;
mod elections;
mod notifications;
mod super_admin;
mod voting;

pub fn routes() -> Vec<Route> {
    let mut routes = Vec::new();
    routes.extend(auth::routes());
    routes.extend(elections::routes());
    routes.extend(voting::routes());
    routes.extend(admin::routes());
    routes.extend(super_admin::routes());
    routes.extend(notifications::routes());
    routes
}
