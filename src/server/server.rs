use anyhow::Result;
use std::{
    sync::{Arc, Mutex},
    time::{Duration, Instant, SystemTime},
};

use tracing::error;

use crate::freshness::FreshnessCache;
use crate::playlist::{
    CatalogStore, ConditionalGet, NewPlaylist, PlaylistError, PlaylistManager, PlaylistStore,
};

use axum::{
    extract::{Path, State},
    http::{header, HeaderMap, HeaderName, StatusCode},
    middleware,
    response::{IntoResponse, Response},
    routing::{get, post},
    Json, Router,
};
use serde::Serialize;
use tower::{Service, ServiceExt}; // for `call`, `oneshot`, and `ready`

use super::http_date::{format_http_date, parse_http_date};
use super::http_layers::log_requests;
use super::{session::Session, state::*, ServerConfig};

#[derive(Serialize)]
struct ServerStats {
    pub uptime: String,
    pub username: Option<String>,
}

fn format_uptime(duration: Duration) -> String {
    let total_seconds = duration.as_secs();

    let days = total_seconds / 86_400;
    let hours = (total_seconds % 86_400) / 3600;
    let minutes = (total_seconds % 3600) / 60;
    let seconds = total_seconds % 60;

    format!("{}d {:02}:{:02}:{:02}", days, hours, minutes, seconds)
}

async fn home(session: Option<Session>, State(state): State<ServerState>) -> impl IntoResponse {
    let stats = ServerStats {
        uptime: format_uptime(state.start_time.elapsed()),
        username: session.map(|s| s.username),
    };
    Json(stats)
}

/// Reads a conditional request header. Unparseable values count as absent,
/// which degrades the request to an unconditional one.
fn conditional_header(headers: &HeaderMap, name: HeaderName) -> Option<SystemTime> {
    headers
        .get(name)
        .and_then(|v| v.to_str().ok())
        .and_then(parse_http_date)
}

fn with_last_modified(mut response: Response, timestamp: SystemTime) -> Response {
    match format_http_date(timestamp).parse() {
        Ok(value) => {
            response.headers_mut().insert(header::LAST_MODIFIED, value);
        }
        Err(err) => error!("Unrepresentable Last-Modified value: {}", err),
    }
    response
}

fn error_response(err: PlaylistError) -> Response {
    match err {
        PlaylistError::Validation(msg) => (StatusCode::BAD_REQUEST, msg).into_response(),
        PlaylistError::Unauthorized(msg) => (StatusCode::UNAUTHORIZED, msg).into_response(),
        PlaylistError::NotFound(msg) => (StatusCode::NOT_FOUND, msg).into_response(),
        PlaylistError::Conflict(msg) => (StatusCode::CONFLICT, msg).into_response(),
        PlaylistError::PreconditionFailed(msg) => {
            (StatusCode::PRECONDITION_FAILED, msg).into_response()
        }
        PlaylistError::Storage(err) => {
            error!("Storage failure: {:#}", err);
            StatusCode::INTERNAL_SERVER_ERROR.into_response()
        }
    }
}

fn conditional_get_response<T: Serialize>(
    result: Result<ConditionalGet<T>, PlaylistError>,
) -> Response {
    match result {
        Ok(ConditionalGet::NotModified) => StatusCode::NOT_MODIFIED.into_response(),
        Ok(ConditionalGet::Fresh {
            value,
            last_modified,
        }) => with_last_modified(Json(value).into_response(), last_modified),
        Err(err) => error_response(err),
    }
}

async fn post_playlist(
    session: Session,
    State(manager): State<GuardedPlaylistManager>,
    Json(body): Json<NewPlaylist>,
) -> Response {
    match manager
        .lock()
        .unwrap()
        .create_playlist(body, &session.username)
    {
        Ok((id, last_modified)) => with_last_modified(
            (StatusCode::CREATED, Json(id)).into_response(),
            last_modified,
        ),
        Err(err) => error_response(err),
    }
}

async fn get_playlist(
    State(manager): State<GuardedPlaylistManager>,
    Path(id): Path<i64>,
    headers: HeaderMap,
) -> Response {
    let if_modified_since = conditional_header(&headers, header::IF_MODIFIED_SINCE);
    conditional_get_response(manager.lock().unwrap().get_playlist(id, if_modified_since))
}

async fn get_creator_playlists(
    State(manager): State<GuardedPlaylistManager>,
    Path(creator_name): Path<String>,
    headers: HeaderMap,
) -> Response {
    let if_modified_since = conditional_header(&headers, header::IF_MODIFIED_SINCE);
    conditional_get_response(
        manager
            .lock()
            .unwrap()
            .get_creator_playlists(&creator_name, if_modified_since),
    )
}

async fn get_followed_playlists(
    session: Session,
    State(manager): State<GuardedPlaylistManager>,
    headers: HeaderMap,
) -> Response {
    let if_modified_since = conditional_header(&headers, header::IF_MODIFIED_SINCE);
    conditional_get_response(
        manager
            .lock()
            .unwrap()
            .get_followed_playlists(&session.username, if_modified_since),
    )
}

async fn follow_playlist(
    session: Session,
    State(manager): State<GuardedPlaylistManager>,
    Path(id): Path<i64>,
) -> Response {
    match manager
        .lock()
        .unwrap()
        .follow_playlist(&session.username, id)
    {
        Ok(()) => StatusCode::CREATED.into_response(),
        Err(err) => error_response(err),
    }
}

async fn add_music(
    session: Session,
    State(manager): State<GuardedPlaylistManager>,
    Path((id, music_id)): Path<(i64, i64)>,
    headers: HeaderMap,
) -> Response {
    let if_unmodified_since = conditional_header(&headers, header::IF_UNMODIFIED_SINCE);
    match manager.lock().unwrap().add_music_to_playlist(
        &session.username,
        id,
        music_id,
        if_unmodified_since,
    ) {
        Ok(last_modified) => {
            with_last_modified(StatusCode::CREATED.into_response(), last_modified)
        }
        Err(err) => error_response(err),
    }
}

async fn remove_music(
    session: Session,
    State(manager): State<GuardedPlaylistManager>,
    Path((id, music_id)): Path<(i64, i64)>,
    headers: HeaderMap,
) -> Response {
    let if_unmodified_since = conditional_header(&headers, header::IF_UNMODIFIED_SINCE);
    match manager.lock().unwrap().remove_music_from_playlist(
        &session.username,
        id,
        music_id,
        if_unmodified_since,
    ) {
        Ok(last_modified) => {
            with_last_modified(StatusCode::NO_CONTENT.into_response(), last_modified)
        }
        Err(err) => error_response(err),
    }
}

impl ServerState {
    fn new(config: ServerConfig, playlist_manager: PlaylistManager) -> ServerState {
        ServerState {
            config,
            start_time: Instant::now(),
            playlist_manager: Arc::new(Mutex::new(playlist_manager)),
        }
    }
}

fn make_app(
    config: ServerConfig,
    store: Arc<dyn PlaylistStore>,
    catalog: Arc<dyn CatalogStore>,
    freshness: Arc<dyn FreshnessCache>,
) -> Router {
    let manager = PlaylistManager::new(store, catalog, freshness);
    let state = ServerState::new(config, manager);

    // "/playlists/followed" must stay a literal segment; the router gives it
    // priority over the "/playlists/{id}" capture.
    Router::new()
        .route("/", get(home))
        .route("/playlists", post(post_playlist))
        .route("/playlists/followed", get(get_followed_playlists))
        .route("/playlists/followed/{id}", post(follow_playlist))
        .route("/playlists/user/{creator_name}", get(get_creator_playlists))
        .route("/playlists/{id}", get(get_playlist))
        .route(
            "/playlists/{id}/musics/{music_id}",
            post(add_music).delete(remove_music),
        )
        .layer(middleware::from_fn_with_state(state.clone(), log_requests))
        .with_state(state)
}

pub async fn run_server(
    config: ServerConfig,
    store: Arc<dyn PlaylistStore>,
    catalog: Arc<dyn CatalogStore>,
    freshness: Arc<dyn FreshnessCache>,
) -> Result<()> {
    let port = config.port;
    let app = make_app(config, store, catalog, freshness);

    let listener = tokio::net::TcpListener::bind(format!("127.0.0.1:{}", port)).await?;

    Ok(axum::serve(listener, app).await?)
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::freshness::InMemoryFreshnessCache;
    use crate::playlist::SqlitePlaylistStore;
    use axum::body::Body;
    use axum::http::Request;
    use tempfile::TempDir;

    struct TestServer {
        app: Router,
        // Holds the db file alive for the duration of the test.
        _temp_dir: TempDir,
    }

    impl TestServer {
        fn new() -> Self {
            let temp_dir = TempDir::new().unwrap();
            let store = SqlitePlaylistStore::new(temp_dir.path().join("playlists.db")).unwrap();

            store.create_user("alice").unwrap();
            store.create_user("bob").unwrap();
            for title in ["one", "two", "three"] {
                store
                    .insert_music(title, None, 180, None, &["zimmer"])
                    .unwrap();
            }

            let app = make_app(
                ServerConfig {
                    requests_logging_level: crate::server::RequestsLoggingLevel::None,
                    ..Default::default()
                },
                Arc::new(store.clone()),
                Arc::new(store),
                Arc::new(InMemoryFreshnessCache::default()),
            );

            TestServer {
                app,
                _temp_dir: temp_dir,
            }
        }

        async fn request(&mut self, request: Request<Body>) -> Response {
            (&mut self.app).oneshot(request).await.unwrap()
        }

        async fn create_playlist(&mut self, username: &str, body: &str) -> Response {
            self.request(
                Request::builder()
                    .method("POST")
                    .uri("/playlists")
                    .header("X-Username", username)
                    .header("content-type", "application/json")
                    .body(Body::from(body.to_owned()))
                    .unwrap(),
            )
            .await
        }
    }

    async fn body_json<T: serde::de::DeserializeOwned>(response: Response) -> T {
        let bytes = axum::body::to_bytes(response.into_body(), usize::MAX)
            .await
            .unwrap();
        serde_json::from_slice(&bytes).unwrap()
    }

    fn last_modified(response: &Response) -> String {
        response
            .headers()
            .get(header::LAST_MODIFIED)
            .expect("Last-Modified header missing")
            .to_str()
            .unwrap()
            .to_owned()
    }

    #[tokio::test]
    async fn rejects_anonymous_callers_on_protected_routes() {
        let mut server = TestServer::new();

        let protected = vec![
            ("POST", "/playlists"),
            ("GET", "/playlists/followed"),
            ("POST", "/playlists/followed/1"),
            ("POST", "/playlists/1/musics/1"),
            ("DELETE", "/playlists/1/musics/1"),
        ];

        for (method, route) in protected.into_iter() {
            println!("Trying {} {}", method, route);
            let request = Request::builder()
                .method(method)
                .uri(route)
                .body(Body::empty())
                .unwrap();
            let response = server.request(request).await;
            assert_eq!(response.status(), StatusCode::UNAUTHORIZED);
        }
    }

    #[tokio::test]
    async fn creates_and_serves_a_playlist() {
        let mut server = TestServer::new();

        let response = server
            .create_playlist("alice", r#"{"name":"driving","musicIds":[1,2]}"#)
            .await;
        assert_eq!(response.status(), StatusCode::CREATED);
        let stamp = last_modified(&response);
        let id: i64 = body_json(response).await;

        let response = server
            .request(
                Request::builder()
                    .uri(format!("/playlists/{}", id))
                    .body(Body::empty())
                    .unwrap(),
            )
            .await;
        assert_eq!(response.status(), StatusCode::OK);
        assert_eq!(last_modified(&response), stamp);

        let playlist: serde_json::Value = body_json(response).await;
        assert_eq!(playlist["name"], "driving");
        assert_eq!(playlist["creatorName"], "alice");
        assert_eq!(playlist["musics"].as_array().unwrap().len(), 2);
        assert_eq!(playlist["musics"][0]["musicId"], 1);
        assert_eq!(playlist["musics"][0]["creatorNames"], "zimmer");
    }

    #[tokio::test]
    async fn echoed_last_modified_turns_into_not_modified() {
        let mut server = TestServer::new();

        let response = server
            .create_playlist("alice", r#"{"name":"p","musicIds":[1]}"#)
            .await;
        let stamp = last_modified(&response);
        let id: i64 = body_json(response).await;

        let response = server
            .request(
                Request::builder()
                    .uri(format!("/playlists/{}", id))
                    .header("If-Modified-Since", &stamp)
                    .body(Body::empty())
                    .unwrap(),
            )
            .await;
        assert_eq!(response.status(), StatusCode::NOT_MODIFIED);
    }

    #[tokio::test]
    async fn mismatched_if_modified_since_serves_the_body() {
        let mut server = TestServer::new();

        let response = server
            .create_playlist("alice", r#"{"name":"p","musicIds":[1]}"#)
            .await;
        let id: i64 = body_json(response).await;

        // Even a later date misses: only the exact cached stamp short-circuits.
        let response = server
            .request(
                Request::builder()
                    .uri(format!("/playlists/{}", id))
                    .header("If-Modified-Since", "Thu, 01 Jan 2037 00:00:00 GMT")
                    .body(Body::empty())
                    .unwrap(),
            )
            .await;
        assert_eq!(response.status(), StatusCode::OK);
    }

    #[tokio::test]
    async fn rejects_duplicate_client_chosen_id() {
        let mut server = TestServer::new();

        let response = server
            .create_playlist("alice", r#"{"name":"p","musicIds":[1]}"#)
            .await;
        assert_eq!(response.status(), StatusCode::CREATED);
        let id: i64 = body_json(response).await;

        let response = server
            .create_playlist(
                "alice",
                &format!(r#"{{"id":{},"name":"q","musicIds":[2]}}"#, id),
            )
            .await;
        assert_eq!(response.status(), StatusCode::CONFLICT);
    }

    #[tokio::test]
    async fn rejects_invalid_playlist_bodies() {
        let mut server = TestServer::new();

        let response = server
            .create_playlist("alice", r#"{"name":"p","musicIds":[]}"#)
            .await;
        assert_eq!(response.status(), StatusCode::BAD_REQUEST);

        let response = server
            .create_playlist("alice", r#"{"name":"","musicIds":[1]}"#)
            .await;
        assert_eq!(response.status(), StatusCode::BAD_REQUEST);
    }

    #[tokio::test]
    async fn following_is_idempotent() {
        let mut server = TestServer::new();

        let response = server
            .create_playlist("alice", r#"{"name":"p","musicIds":[1]}"#)
            .await;
        let id: i64 = body_json(response).await;

        for _ in 0..2 {
            let response = server
                .request(
                    Request::builder()
                        .method("POST")
                        .uri(format!("/playlists/followed/{}", id))
                        .header("X-Username", "bob")
                        .body(Body::empty())
                        .unwrap(),
                )
                .await;
            assert_eq!(response.status(), StatusCode::CREATED);
        }

        let response = server
            .request(
                Request::builder()
                    .uri("/playlists/followed")
                    .header("X-Username", "bob")
                    .body(Body::empty())
                    .unwrap(),
            )
            .await;
        assert_eq!(response.status(), StatusCode::OK);
        let playlists: serde_json::Value = body_json(response).await;
        assert_eq!(playlists.as_array().unwrap().len(), 1);
    }

    #[tokio::test]
    async fn only_the_creator_may_edit_memberships() {
        let mut server = TestServer::new();

        let response = server
            .create_playlist("alice", r#"{"name":"p","musicIds":[1]}"#)
            .await;
        let id: i64 = body_json(response).await;

        let response = server
            .request(
                Request::builder()
                    .method("POST")
                    .uri(format!("/playlists/{}/musics/2", id))
                    .header("X-Username", "bob")
                    .body(Body::empty())
                    .unwrap(),
            )
            .await;
        assert_eq!(response.status(), StatusCode::UNAUTHORIZED);
    }

    #[tokio::test]
    async fn stale_precondition_fails_the_mutation() {
        let mut server = TestServer::new();

        let response = server
            .create_playlist("alice", r#"{"name":"p","musicIds":[1]}"#)
            .await;
        let id: i64 = body_json(response).await;

        let response = server
            .request(
                Request::builder()
                    .method("POST")
                    .uri(format!("/playlists/{}/musics/2", id))
                    .header("X-Username", "alice")
                    .header("If-Unmodified-Since", "Wed, 21 Oct 2015 07:28:00 GMT")
                    .body(Body::empty())
                    .unwrap(),
            )
            .await;
        assert_eq!(response.status(), StatusCode::PRECONDITION_FAILED);
    }

    #[tokio::test]
    async fn membership_edits_restamp_the_playlist() {
        let mut server = TestServer::new();

        let response = server
            .create_playlist("alice", r#"{"name":"p","musicIds":[1]}"#)
            .await;
        let stamp = last_modified(&response);
        let id: i64 = body_json(response).await;

        let response = server
            .request(
                Request::builder()
                    .method("POST")
                    .uri(format!("/playlists/{}/musics/2", id))
                    .header("X-Username", "alice")
                    .header("If-Unmodified-Since", &stamp)
                    .body(Body::empty())
                    .unwrap(),
            )
            .await;
        assert_eq!(response.status(), StatusCode::CREATED);
        let stamp = last_modified(&response);

        let response = server
            .request(
                Request::builder()
                    .method("DELETE")
                    .uri(format!("/playlists/{}/musics/2", id))
                    .header("X-Username", "alice")
                    .header("If-Unmodified-Since", &stamp)
                    .body(Body::empty())
                    .unwrap(),
            )
            .await;
        assert_eq!(response.status(), StatusCode::NO_CONTENT);
        last_modified(&response);

        let response = server
            .request(
                Request::builder()
                    .uri(format!("/playlists/{}", id))
                    .body(Body::empty())
                    .unwrap(),
            )
            .await;
        let playlist: serde_json::Value = body_json(response).await;
        assert_eq!(playlist["musics"].as_array().unwrap().len(), 1);
    }

    #[tokio::test]
    async fn unknown_resources_are_not_found() {
        let mut server = TestServer::new();

        let response = server
            .request(
                Request::builder()
                    .uri("/playlists/999")
                    .body(Body::empty())
                    .unwrap(),
            )
            .await;
        assert_eq!(response.status(), StatusCode::NOT_FOUND);

        let response = server
            .request(
                Request::builder()
                    .uri("/playlists/user/nobody")
                    .body(Body::empty())
                    .unwrap(),
            )
            .await;
        assert_eq!(response.status(), StatusCode::NOT_FOUND);
    }

    #[tokio::test]
    async fn lists_a_creators_playlists() {
        let mut server = TestServer::new();

        server
            .create_playlist("alice", r#"{"name":"p","musicIds":[1]}"#)
            .await;
        server
            .create_playlist("alice", r#"{"name":"q","musicIds":[2]}"#)
            .await;
        server
            .create_playlist("bob", r#"{"name":"r","musicIds":[3]}"#)
            .await;

        let response = server
            .request(
                Request::builder()
                    .uri("/playlists/user/alice")
                    .body(Body::empty())
                    .unwrap(),
            )
            .await;
        assert_eq!(response.status(), StatusCode::OK);
        last_modified(&response);

        let playlists: serde_json::Value = body_json(response).await;
        assert_eq!(playlists.as_array().unwrap().len(), 2);
    }

    #[tokio::test]
    async fn home_reports_server_stats() {
        let mut server = TestServer::new();

        let response = server
            .request(Request::builder().uri("/").body(Body::empty()).unwrap())
            .await;
        assert_eq!(response.status(), StatusCode::OK);

        let stats: serde_json::Value = body_json(response).await;
        assert!(stats["uptime"].as_str().unwrap().starts_with("0d"));
        assert!(stats["username"].is_null());

        let response = server
            .request(
                Request::builder()
                    .uri("/")
                    .header("X-Username", "alice")
                    .body(Body::empty())
                    .unwrap(),
            )
            .await;
        let stats: serde_json::Value = body_json(response).await;
        assert_eq!(stats["username"], "alice");
    }
}
