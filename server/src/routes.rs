use super::{error::RegistryError, sql};

use actix_web::{delete, get, post, web, HttpResponse};

/// Runtime necessary data.
pub struct State {
    /// connection pool to the sqlite database
    pub db_conn: sqlx::SqlitePool,
}

/// Alias of the application state data
type Data = actix_web::web::Data<State>;

#[derive(Debug, serde::Serialize)]
enum ReqStatus {
    Ok,
    Fail,
}

/// Default JSON response when some internal error occur. The msg field should contains friendly
/// hint for debugging. And detail field contains the original error.
#[derive(serde::Serialize)]
struct MsgResp {
    status: ReqStatus,
    msg: String,
    detail: String,
}

impl MsgResp {
    fn new_200_msg<D: ToString>(detail: D) -> HttpResponse {
        HttpResponse::Ok().json(Self {
            status: ReqStatus::Ok,
            msg: "Request success".to_string(),
            detail: detail.to_string(),
        })
    }

    /// Create a new Internal Server Error (ise) response
    fn new_500_resp<M, D>(msg: M, detail: D) -> HttpResponse
    where
        M: ToString,
        D: ToString,
    {
        HttpResponse::InternalServerError().json(Self {
            status: ReqStatus::Fail,
            msg: msg.to_string(),
            detail: detail.to_string(),
        })
    }

    fn new_400_resp<M: ToString>(detail: M) -> HttpResponse {
        HttpResponse::BadRequest().json(Self {
            status: ReqStatus::Fail,
            msg: "bad request".to_string(),
            detail: detail.to_string(),
        })
    }

    fn new_409_resp<M: ToString>(detail: M) -> HttpResponse {
        HttpResponse::Conflict().json(Self {
            status: ReqStatus::Fail,
            msg: "conflict".to_string(),
            detail: detail.to_string(),
        })
    }
}

/// Map a registry failure onto the HTTP layer. Caller mistakes are 400,
/// a cyclic relation graph is 409, storage failures are 500.
fn registry_err_resp(err: RegistryError) -> HttpResponse {
    match &err {
        RegistryError::UnknownPackage(_)
        | RegistryError::UnknownPackager(_)
        | RegistryError::SelfDependency(_) => MsgResp::new_400_resp(err),
        RegistryError::CyclicDependency(_) => MsgResp::new_409_resp(err),
        RegistryError::ConstraintViolation(_) => MsgResp::new_500_resp("storage failure", err),
    }
}

/// Timestamp supplied by the caller, unix epoch. The server never stamps its
/// own clock on registry rows.
#[derive(serde::Deserialize)]
pub struct AtQuery {
    at: i64,
}

#[post("/packager/{uid}/{alias}")]
pub(super) async fn upsert_packager(path: web::Path<(i64, String)>, data: Data) -> HttpResponse {
    let (uid, alias) = path.into_inner();
    match sql::upsert_packager(&data.db_conn, uid, &alias).await {
        Ok(()) => MsgResp::new_200_msg(format!("packager {uid} is now known as {alias}")),
        Err(err) => registry_err_resp(err),
    }
}

#[post("/pkg/{id}/{name}")]
pub(super) async fn upsert_pkg(path: web::Path<(i64, String)>, data: Data) -> HttpResponse {
    let (id, name) = path.into_inner();
    match sql::upsert_pkg(&data.db_conn, id, &name).await {
        Ok(()) => MsgResp::new_200_msg(format!("package {id} is now known as {name}")),
        Err(err) => registry_err_resp(err),
    }
}

#[post("/assign/{pkg}/{assignee}")]
pub(super) async fn assign(
    path: web::Path<(i64, i64)>,
    q: web::Query<AtQuery>,
    data: Data,
) -> HttpResponse {
    let (pkg, assignee) = path.into_inner();
    match sql::assign(&data.db_conn, pkg, assignee, q.at).await {
        Ok(()) => {
            tracing::info!(pkg, assignee, "package assigned");
            MsgResp::new_200_msg(format!("package {pkg} assigned to {assignee}"))
        }
        Err(err) => registry_err_resp(err),
    }
}

#[post("/unassign/{pkg}")]
pub(super) async fn unassign(
    path: web::Path<i64>,
    q: web::Query<AtQuery>,
    data: Data,
) -> HttpResponse {
    let pkg = path.into_inner();
    match sql::unassign(&data.db_conn, pkg, q.at).await {
        Ok(()) => {
            tracing::info!(pkg, "package unassigned");
            MsgResp::new_200_msg(format!("package {pkg} unassigned"))
        }
        Err(err) => registry_err_resp(err),
    }
}

#[derive(serde::Serialize)]
struct AssigneeResp {
    assignee: Option<i64>,
    alias: Option<String>,
}

#[get("/assignee/{pkg}")]
pub(super) async fn get_assignee(path: web::Path<i64>, data: Data) -> HttpResponse {
    let assignee = match sql::current_assignee(&data.db_conn, path.into_inner()).await {
        Ok(found) => found,
        Err(err) => return registry_err_resp(err),
    };

    let alias = match assignee {
        Some(uid) => match sql::find_packager(&data.db_conn, sql::FindPackagerProp::ByUid(uid)).await
        {
            Ok(found) => found.map(|p| p.alias),
            Err(err) => return registry_err_resp(err),
        },
        None => None,
    };

    HttpResponse::Ok().json(AssigneeResp { assignee, alias })
}

/// Request body for `/mark`
#[derive(serde::Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct MarkReq {
    name: String,
    for_pkg: Option<i64>,
    marked_by: Option<i64>,
    msg_id: i64,
    comment: Option<String>,
    at: i64,
}

#[post("/mark")]
pub(super) async fn mark(body: web::Json<MarkReq>, data: Data) -> HttpResponse {
    let req = body.into_inner();
    match sql::record_mark(
        &data.db_conn,
        &req.name,
        req.for_pkg,
        req.marked_by,
        req.msg_id,
        req.comment.as_deref(),
        req.at,
    )
    .await
    {
        Ok(id) => MsgResp::new_200_msg(format!("mark {id} recorded")),
        Err(err) => registry_err_resp(err),
    }
}

#[post("/relation/{request}/{required}/{status}")]
pub(super) async fn add_relation(path: web::Path<(i64, i64, String)>, data: Data) -> HttpResponse {
    let (request, required, status) = path.into_inner();

    if !["missing_dep", "outdated_dep"].contains(&status.as_str()) {
        return MsgResp::new_400_resp(format!(
            "Required 'missing_dep' or 'outdated_dep', get {status}"
        ));
    }

    match sql::add_relation(&data.db_conn, request, required, &status).await {
        Ok(()) => MsgResp::new_200_msg(format!("package {request} now waits on {required}")),
        Err(err) => registry_err_resp(err),
    }
}

#[delete("/relation/{request}/{required}")]
pub(super) async fn resolve_relation(path: web::Path<(i64, i64)>, data: Data) -> HttpResponse {
    let (request, required) = path.into_inner();
    match sql::resolve_relation(&data.db_conn, request, required).await {
        Ok(()) => MsgResp::new_200_msg(format!("package {request} no longer waits on {required}")),
        Err(err) => registry_err_resp(err),
    }
}

#[derive(serde::Serialize)]
struct ReadyResp {
    ready: bool,
}

#[get("/ready/{pkg}")]
pub(super) async fn ready(path: web::Path<i64>, data: Data) -> HttpResponse {
    match sql::is_ready(&data.db_conn, path.into_inner()).await {
        Ok(ready) => HttpResponse::Ok().json(ReadyResp { ready }),
        Err(err) => registry_err_resp(err),
    }
}

/// Present the JSON response for route `/pkg`.
///
/// The workList contains the package assignment status. And markList contains the marks for each
/// package.
#[derive(serde::Serialize)]
#[serde(rename_all = "camelCase")]
struct PkgJsonResponse {
    work_list: Vec<sql::WorkListUnit>,
    mark_list: Vec<sql::MarkListUnit>,
}

/// Implementation of route `/pkg`
#[get("/pkg")]
pub(super) async fn list_pkg(data: Data) -> HttpResponse {
    let work_list = sql::get_working_list(&data.db_conn).await;
    if let Err(err) = work_list {
        return MsgResp::new_500_resp("fail to get working list", err);
    }

    let mark_list = sql::get_mark_list(&data.db_conn).await;
    if let Err(err) = mark_list {
        return MsgResp::new_500_resp("fail to get mark list", err);
    }

    HttpResponse::Ok().json(PkgJsonResponse {
        work_list: work_list.unwrap(),
        mark_list: mark_list.unwrap(),
    })
}

#[derive(serde::Deserialize)]
pub struct RouteDeletePathSegment {
    pkgname: String,
}

/// A package left the review queue (it has been published). Every relation
/// waiting on it is resolved and the current assignment is closed with the
/// unassigned sentinel. Marks stay untouched: they are the audit trail.
#[get("/delete/{pkgname}")]
pub(super) async fn delete(
    path: web::Path<RouteDeletePathSegment>,
    q: web::Query<AtQuery>,
    data: Data,
) -> HttpResponse {
    let pkg = match sql::find_pkg_id(&data.db_conn, &path.pkgname).await {
        Ok(Some(id)) => id,
        Ok(None) => return MsgResp::new_400_resp(format!("no package named {}", path.pkgname)),
        Err(err) => return registry_err_resp(err),
    };

    let packager = match sql::find_packager(
        &data.db_conn,
        sql::FindPackagerProp::ByPkgname(&path.pkgname),
    )
    .await
    {
        Ok(found) => found,
        Err(err) => return registry_err_resp(err),
    };

    let resolved = match sql::resolve_relations_for(&data.db_conn, pkg).await {
        Ok(n) => n,
        Err(err) => return registry_err_resp(err),
    };

    if packager.is_some() {
        if let Err(err) = sql::unassign(&data.db_conn, pkg, q.at).await {
            return registry_err_resp(err);
        }
    }

    let who = packager
        .map(|p| p.alias)
        .unwrap_or_else(|| "nobody".to_string());
    tracing::info!(pkg = path.pkgname.as_str(), resolved, "package published");
    MsgResp::new_200_msg(format!(
        "{} published, was assigned to {who}, resolved {resolved} blocking relations",
        path.pkgname
    ))
}

#[cfg(test)]
mod tests {
    use super::*;
    use actix_web::{test, App};
    use sqlx::sqlite::{SqliteConnectOptions, SqlitePoolOptions};
    use sqlx::SqlitePool;
    use std::str::FromStr;

    async fn mem_pool() -> SqlitePool {
        let opts = SqliteConnectOptions::from_str("sqlite::memory:")
            .unwrap()
            .foreign_keys(true);
        let db = SqlitePoolOptions::new()
            .max_connections(1)
            .idle_timeout(None)
            .max_lifetime(None)
            .connect_with(opts)
            .await
            .unwrap();
        sql::init_schema(&db).await.unwrap();
        db
    }

    macro_rules! test_app {
        ($db:expr) => {
            test::init_service(
                App::new()
                    .service(list_pkg)
                    .service(upsert_pkg)
                    .service(upsert_packager)
                    .service(assign)
                    .service(unassign)
                    .service(get_assignee)
                    .service(mark)
                    .service(add_relation)
                    .service(resolve_relation)
                    .service(ready)
                    .service(delete)
                    .app_data(Data::new(State { db_conn: $db })),
            )
            .await
        };
    }

    #[actix_web::test]
    async fn assign_roundtrip_over_http() {
        let app = test_app!(mem_pool().await);

        for uri in [
            "/packager/42/alice",
            "/pkg/7/libfoo",
            "/assign/7/42?at=100",
        ] {
            let resp =
                test::call_service(&app, test::TestRequest::post().uri(uri).to_request()).await;
            assert!(resp.status().is_success(), "POST {uri}");
        }

        let req = test::TestRequest::get().uri("/assignee/7").to_request();
        let body: serde_json::Value = test::read_body_json(test::call_service(&app, req).await).await;
        assert_eq!(body["assignee"], 42);
        assert_eq!(body["alias"], "alice");

        let req = test::TestRequest::get().uri("/ready/7").to_request();
        let body: serde_json::Value = test::read_body_json(test::call_service(&app, req).await).await;
        assert_eq!(body["ready"], true);
    }

    #[actix_web::test]
    async fn cycle_maps_to_conflict() {
        let app = test_app!(mem_pool().await);

        for uri in [
            "/pkg/1/liba",
            "/pkg/2/libb",
            "/relation/1/2/missing_dep",
            "/relation/2/1/outdated_dep",
        ] {
            let resp =
                test::call_service(&app, test::TestRequest::post().uri(uri).to_request()).await;
            assert!(resp.status().is_success(), "POST {uri}");
        }

        let req = test::TestRequest::get().uri("/ready/1").to_request();
        let resp = test::call_service(&app, req).await;
        assert_eq!(resp.status(), actix_web::http::StatusCode::CONFLICT);
    }

    #[actix_web::test]
    async fn relation_status_is_validated() {
        let app = test_app!(mem_pool().await);

        for uri in ["/pkg/1/liba", "/pkg/2/libb"] {
            test::call_service(&app, test::TestRequest::post().uri(uri).to_request()).await;
        }

        let req = test::TestRequest::post()
            .uri("/relation/1/2/bogus")
            .to_request();
        let resp = test::call_service(&app, req).await;
        assert_eq!(resp.status(), actix_web::http::StatusCode::BAD_REQUEST);
    }

    #[actix_web::test]
    async fn publish_unassigns_and_unblocks() {
        let db = mem_pool().await;
        sql::upsert_packager(&db, 42, "alice").await.unwrap();
        sql::upsert_pkg(&db, 7, "libfoo").await.unwrap();
        sql::upsert_pkg(&db, 8, "libbar").await.unwrap();
        sql::assign(&db, 7, 42, 100).await.unwrap();
        sql::add_relation(&db, 8, 7, "missing_dep").await.unwrap();
        sql::record_mark(&db, "reviewed", Some(7), Some(42), 1, None, 150)
            .await
            .unwrap();

        let app = test_app!(db.clone());
        let req = test::TestRequest::get()
            .uri("/delete/libfoo?at=200")
            .to_request();
        let resp = test::call_service(&app, req).await;
        assert!(resp.status().is_success());

        assert_eq!(sql::current_assignee(&db, 7).await.unwrap(), None);
        assert!(sql::is_ready(&db, 8).await.unwrap());

        // the audit log survives publication
        let marks: i64 = sqlx::query_scalar("SELECT COUNT(*) FROM mark")
            .fetch_one(&db)
            .await
            .unwrap();
        assert_eq!(marks, 1);
    }
}
