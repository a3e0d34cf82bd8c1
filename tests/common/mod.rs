#![allow(dead_code)]

use axum::{
    Json, Router,
    extract::{Path, State},
    http::{HeaderMap, StatusCode},
    routing::post,
};
use push_deploy::config::DeployConfig;
use push_deploy::status::{CommitRef, StatusObserver, StatusUpdate};
use serde_json::Value;
use std::path::{Path as FsPath, PathBuf};
use std::sync::{Arc, Mutex};
use std::time::Duration;
use tempfile::TempDir;

/// Collects every notification the orchestrator emits
#[derive(Default)]
pub struct Recorder {
    pub updates: Mutex<Vec<(CommitRef, StatusUpdate)>>,
}

impl StatusObserver for Recorder {
    fn notify(&self, commit: &CommitRef, update: StatusUpdate) {
        self.updates.lock().unwrap().push((commit.clone(), update));
    }
}

impl Recorder {
    /// (state, description) pairs in emission order
    pub fn sequence(&self) -> Vec<(String, String)> {
        self.updates
            .lock()
            .unwrap()
            .iter()
            .map(|(_, u)| (u.state.to_string(), u.description.clone()))
            .collect()
    }
}

/// A working directory, a separate deploy directory, and scripts inside them
pub struct Workspace {
    pub root: TempDir,
    pub work: PathBuf,
    pub deploy: PathBuf,
}

impl Workspace {
    pub fn new() -> Self {
        let root = tempfile::tempdir().unwrap();
        let work = root.path().join("checkout");
        let deploy = root.path().join("deploy");
        std::fs::create_dir_all(&work).unwrap();
        std::fs::create_dir_all(&deploy).unwrap();
        Self { root, work, deploy }
    }

    /// Writes a shell script and returns the command line that runs it
    pub fn script(&self, dir: &FsPath, name: &str, body: &str) -> String {
        let path = dir.join(name);
        std::fs::write(&path, body).unwrap();
        format!("sh {}", path.display())
    }

    pub fn marker(&self, name: &str) -> PathBuf {
        self.root.path().join(name)
    }

    /// Script body that records it ran, then exits with `code`
    pub fn touch_and_exit(&self, marker: &str, code: i32) -> String {
        format!("echo ran > {}\nexit {}\n", self.marker(marker).display(), code)
    }

    /// Config whose fetch/test/deploy write `fetched`/`tested`/`deployed`
    /// markers and exit with the given codes
    pub fn config(&self, fetch: i32, test: i32, deploy: i32) -> DeployConfig {
        DeployConfig {
            working_dir: self.work.clone(),
            deploy_dir: self.deploy.clone(),
            fetch_command: self.script(&self.work, "fetch.sh", &self.touch_and_exit("fetched", fetch)),
            test_command: self.script(&self.work, "test.sh", &self.touch_and_exit("tested", test)),
            deploy_command: self.script(&self.deploy, "deploy.sh", &self.touch_and_exit("deployed", deploy)),
            app_id: "team".into(),
            proxy_domain: "example.net".into(),
            ..DeployConfig::default()
        }
    }
}

/// A status update as received by the fake GitHub API
#[derive(Debug, Clone)]
pub struct ReceivedStatus {
    pub repo: String,
    pub sha: String,
    pub authorization: Option<String>,
    pub body: Value,
}

#[derive(Clone)]
struct FakeGithub {
    received: Arc<Mutex<Vec<ReceivedStatus>>>,
    reply: StatusCode,
}

async fn record_status(
    State(fake): State<FakeGithub>,
    Path((owner, repo, sha)): Path<(String, String, String)>,
    headers: HeaderMap,
    Json(body): Json<Value>,
) -> (StatusCode, Json<Value>) {
    fake.received.lock().unwrap().push(ReceivedStatus {
        repo: format!("{}/{}", owner, repo),
        sha,
        authorization: headers
            .get("authorization")
            .and_then(|v| v.to_str().ok())
            .map(String::from),
        body: body.clone(),
    });
    (fake.reply, Json(body))
}

/// Serves a fake statuses endpoint; returns its base URL and the received log
pub async fn spawn_fake_github(reply: StatusCode) -> (String, Arc<Mutex<Vec<ReceivedStatus>>>) {
    let received = Arc::new(Mutex::new(Vec::new()));
    let fake = FakeGithub {
        received: received.clone(),
        reply,
    };
    let app = Router::new()
        .route("/repos/{owner}/{repo}/statuses/{sha}", post(record_status))
        .with_state(fake);
    let listener = tokio::net::TcpListener::bind("127.0.0.1:0").await.unwrap();
    let addr = listener.local_addr().unwrap();
    tokio::spawn(async move {
        axum::serve(listener, app).await.unwrap();
    });
    (format!("http://{}", addr), received)
}

/// Polls `check` until it holds or `limit` elapses
pub async fn wait_for<F: Fn() -> bool>(check: F, limit: Duration) -> bool {
    let deadline = tokio::time::Instant::now() + limit;
    while tokio::time::Instant::now() < deadline {
        if check() {
            return true;
        }
        tokio::time::sleep(Duration::from_millis(25)).await;
    }
    check()
}
