use actix_web::{App, HttpServer};
use anyhow::Context;
use sqlx::sqlite::SqliteConnectOptions;
use std::{env, str::FromStr};
use tracing_subscriber::EnvFilter;

mod error;
mod model;
mod routes;
mod sql;

#[tokio::main]
async fn main() -> anyhow::Result<()> {
    dotenvy::dotenv().ok();
    tracing_subscriber::fmt()
        .with_env_filter(EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new("info")))
        .init();

    // user must give us a database url
    let database_url = env::var("DATABASE_URL").with_context(|| "fail to get database url")?;
    let db_opts = SqliteConnectOptions::from_str(&database_url)
        .with_context(|| "invalid database url")?
        .create_if_missing(true)
        .foreign_keys(true);
    let sqlite = sqlx::SqlitePool::connect_with(db_opts).await?;
    sql::init_schema(&sqlite).await?;

    // if $LISTEN_ADDR not found, use default "0.0.0.0"
    let listen_addr = env::var("LISTEN_ADDR").unwrap_or_else(|_| "0.0.0.0".to_string());
    // if $LISTEN_PORT env exist, but it is not a valid port number, return default
    // if $LISTEN_PORT env doesn't exist, return default
    let listen_port = env::var("LISTEN_PORT")
        .map(|port| port.parse::<u16>().unwrap_or(11451))
        .unwrap_or(11451);

    let state = routes::State { db_conn: sqlite };

    tracing::info!(%listen_addr, listen_port, "registry server starting");
    run((listen_addr, listen_port), state).await
}

async fn run(server_binding: (String, u16), state: routes::State) -> anyhow::Result<()> {
    let data = actix_web::web::Data::new(state);

    HttpServer::new(move || {
        App::new()
            .service(routes::list_pkg)
            .service(routes::upsert_pkg)
            .service(routes::upsert_packager)
            .service(routes::assign)
            .service(routes::unassign)
            .service(routes::get_assignee)
            .service(routes::mark)
            .service(routes::add_relation)
            .service(routes::resolve_relation)
            .service(routes::ready)
            .service(routes::delete)
            .app_data(data.clone())
    })
    .bind(server_binding)?
    .run()
    .await?;

    Ok(())
}
