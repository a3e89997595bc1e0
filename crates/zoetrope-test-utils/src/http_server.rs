use std::{
    collections::{HashMap, VecDeque},
    net::SocketAddr,
    sync::Arc,
    time::Duration,
};

use axum::{
    Router,
    body::Body,
    extract::State,
    http::{Request, StatusCode},
    response::{IntoResponse, Response},
};
use parking_lot::Mutex;
use tokio::net::TcpListener;
use url::Url;

/// One scripted response for a path. Consumed in order; the last one
/// repeats.
#[derive(Clone, Debug)]
pub struct Scripted {
    pub status: u16,
    pub body: Vec<u8>,
    pub delay: Duration,
}

impl Scripted {
    pub fn ok(body: Vec<u8>) -> Self {
        Self {
            status: 200,
            body,
            delay: Duration::ZERO,
        }
    }

    pub fn status(status: u16) -> Self {
        Self {
            status,
            body: Vec::new(),
            delay: Duration::ZERO,
        }
    }

    pub fn with_delay(mut self, delay: Duration) -> Self {
        self.delay = delay;
        self
    }
}

type Routes = Arc<Mutex<HashMap<String, VecDeque<Scripted>>>>;

/// Fixture HTTP server on an ephemeral localhost port.
///
/// Routes are scripted per path; unknown paths return 404.
pub struct FixtureServer {
    addr: SocketAddr,
    routes: Routes,
    _task: tokio::task::JoinHandle<()>,
}

impl FixtureServer {
    pub async fn start() -> Self {
        let listener = TcpListener::bind("127.0.0.1:0")
            .await
            .expect("bind fixture server");
        let addr = listener.local_addr().expect("local addr");
        let routes: Routes = Arc::new(Mutex::new(HashMap::new()));

        let app = Router::new()
            .fallback(handler)
            .with_state(Arc::clone(&routes));
        let task = tokio::spawn(async move {
            let _ = axum::serve(listener, app).await;
        });

        Self {
            addr,
            routes,
            _task: task,
        }
    }

    pub fn url(&self, path: &str) -> Url {
        let path = path.trim_start_matches('/');
        Url::parse(&format!("http://{}/{path}", self.addr)).expect("fixture url")
    }

    /// Script a response for `path`. Multiple calls queue responses; the
    /// final one repeats forever.
    pub fn script(&self, path: &str, response: Scripted) {
        let path = format!("/{}", path.trim_start_matches('/'));
        self.routes.lock().entry(path).or_default().push_back(response);
    }

    /// Serve `body` with status 200 on `path`.
    pub fn serve_bytes(&self, path: &str, body: Vec<u8>) {
        self.script(path, Scripted::ok(body));
    }
}

async fn handler(State(routes): State<Routes>, request: Request<Body>) -> Response {
    let path = request.uri().path().to_string();
    let scripted = {
        let mut routes = routes.lock();
        match routes.get_mut(&path) {
            Some(queue) if queue.len() > 1 => queue.pop_front(),
            Some(queue) => queue.front().cloned(),
            None => None,
        }
    };

    let Some(scripted) = scripted else {
        return StatusCode::NOT_FOUND.into_response();
    };

    if !scripted.delay.is_zero() {
        tokio::time::sleep(scripted.delay).await;
    }

    let status = StatusCode::from_u16(scripted.status).unwrap_or(StatusCode::INTERNAL_SERVER_ERROR);
    (status, scripted.body).into_response()
}
