//! A minimal GitHub REST API double serving one repository.
//!
//! Runs on its own thread and runtime so both sync (CLI) and async tests
//! can point `[github] api_url` at it.

#![allow(dead_code)]

use std::collections::BTreeMap;
use std::io::{Cursor, Write};
use std::sync::{Arc, Mutex};

use axum::extract::{Path, State};
use axum::http::{header, StatusCode};
use axum::response::{IntoResponse, Response};
use axum::routing::get;
use axum::{Json, Router};
use zip::write::SimpleFileOptions;

#[derive(Debug)]
struct RepoState {
    owner: String,
    name: String,
    revision: Option<String>,
    files: BTreeMap<String, String>,
    archive_downloads: usize,
}

type Shared = Arc<Mutex<RepoState>>;

pub struct MockGitHub {
    pub api_url: String,
    state: Shared,
}

impl MockGitHub {
    /// Serve `owner/name` at `revision` with the given files.
    pub fn start(owner: &str, name: &str, revision: &str, files: &[(&str, &str)]) -> Self {
        let state = Arc::new(Mutex::new(RepoState {
            owner: owner.to_string(),
            name: name.to_string(),
            revision: Some(revision.to_string()),
            files: files
                .iter()
                .map(|(p, c)| (p.to_string(), c.to_string()))
                .collect(),
            archive_downloads: 0,
        }));

        let app = Router::new()
            .route("/repos/{owner}/{name}", get(repo_meta))
            .route("/repos/{owner}/{name}/commits/{branch}", get(latest_commit))
            .route("/repos/{owner}/{name}/zipball/{reference}", get(zipball))
            .with_state(state.clone());

        let listener = std::net::TcpListener::bind("127.0.0.1:0").unwrap();
        listener.set_nonblocking(true).unwrap();
        let addr = listener.local_addr().unwrap();

        std::thread::spawn(move || {
            let rt = tokio::runtime::Builder::new_current_thread()
                .enable_all()
                .build()
                .unwrap();
            rt.block_on(async move {
                let listener = tokio::net::TcpListener::from_std(listener).unwrap();
                axum::serve(listener, app).await.unwrap();
            });
        });

        Self {
            api_url: format!("http://{}", addr),
            state,
        }
    }

    /// Publish a new revision with `files` changed (`None` deletes).
    pub fn push(&self, revision: &str, changes: &[(&str, Option<&str>)]) {
        let mut state = self.state.lock().unwrap();
        state.revision = Some(revision.to_string());
        for (path, content) in changes {
            match content {
                Some(content) => {
                    state.files.insert(path.to_string(), content.to_string());
                }
                None => {
                    state.files.remove(*path);
                }
            }
        }
    }

    pub fn archive_downloads(&self) -> usize {
        self.state.lock().unwrap().archive_downloads
    }
}

fn is_served(state: &RepoState, owner: &str, name: &str) -> bool {
    state.owner == owner && state.name == name
}

async fn repo_meta(
    State(state): State<Shared>,
    Path((owner, name)): Path<(String, String)>,
) -> Response {
    let state = state.lock().unwrap();
    if !is_served(&state, &owner, &name) {
        return (StatusCode::NOT_FOUND, Json(serde_json::json!({ "message": "Not Found" })))
            .into_response();
    }
    Json(serde_json::json!({
        "full_name": format!("{}/{}", owner, name),
        "html_url": format!("https://github.com/{}/{}", owner, name),
        "default_branch": "main",
    }))
    .into_response()
}

async fn latest_commit(
    State(state): State<Shared>,
    Path((owner, name, _branch)): Path<(String, String, String)>,
) -> Response {
    let state = state.lock().unwrap();
    if !is_served(&state, &owner, &name) {
        return StatusCode::NOT_FOUND.into_response();
    }
    match &state.revision {
        Some(sha) => Json(serde_json::json!({ "sha": sha })).into_response(),
        None => StatusCode::CONFLICT.into_response(),
    }
}

async fn zipball(
    State(state): State<Shared>,
    Path((owner, name, reference)): Path<(String, String, String)>,
) -> Response {
    let mut state = state.lock().unwrap();
    if !is_served(&state, &owner, &name) {
        return StatusCode::NOT_FOUND.into_response();
    }
    state.archive_downloads += 1;

    let prefix = format!("{}-{}-{}", owner, name, reference);
    let mut writer = zip::ZipWriter::new(Cursor::new(Vec::new()));
    for (path, content) in &state.files {
        writer
            .start_file(format!("{}/{}", prefix, path), SimpleFileOptions::default())
            .unwrap();
        writer.write_all(content.as_bytes()).unwrap();
    }
    let bytes = writer.finish().unwrap().into_inner();

    ([(header::CONTENT_TYPE, "application/zip")], bytes).into_response()
}
