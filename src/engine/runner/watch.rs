//! Watch mode is a three-part system:
//!
//! 1. **File watcher**: the `notify` crate monitors the source directory
//!    recursively and feeds raw events into a channel.
//! 2. **Dispatcher**: every event is matched against the watch bindings and
//!    each bound task is started on the rayon pool. There is no debouncing;
//!    a task bound through several matching paths of one event runs once.
//! 3. **WebSocket server**: a dedicated thread using `tungstenite` keeps
//!    connections with open browser tabs and broadcasts `"reload"` after a
//!    reloading task wrote something.

use std::collections::HashSet;
use std::net::{TcpListener, TcpStream};
use std::path::Path;
use std::sync::mpsc::{Sender, channel};
use std::sync::{Arc, Mutex};
use std::thread::JoinHandle;
use std::time::Instant;

use camino::{Utf8Path, Utf8PathBuf};
use glob::{MatchOptions, Pattern};
use notify::event::ModifyKind;
use notify::{Event, EventKind, RecursiveMode, Watcher};
use tungstenite::WebSocket;

use super::run_caught;
use crate::Config;
use crate::alert::{Alert, AlertSink};
use crate::error::WatchError;
use crate::io::as_overhead;
use crate::task::Task;

/// Preferred port of the live reload socket.
pub const RELOAD_PORT: u16 = 1337;
/// Connections beyond this many are closed, oldest first.
const MAX_CLIENTS: usize = 10;

const MATCH: MatchOptions = MatchOptions {
    case_sensitive: true,
    require_literal_separator: true,
    require_literal_leading_dot: false,
};

/// A glob pattern, relative to the project root, bound to the task that
/// must run when a matching file changes.
#[derive(Debug, Clone)]
pub struct Binding {
    pattern: Pattern,
    task: Arc<dyn Task>,
}

impl Binding {
    pub fn new(pattern: &str, task: Arc<dyn Task>) -> Result<Self, glob::PatternError> {
        Ok(Self {
            pattern: Pattern::new(pattern)?,
            task,
        })
    }
}

/// Maps changed paths to the tasks bound to them.
#[derive(Debug, Clone)]
pub struct Dispatcher {
    root: Utf8PathBuf,
    bindings: Vec<Binding>,
}

impl Dispatcher {
    pub fn new(root: impl Into<Utf8PathBuf>, bindings: Vec<Binding>) -> Self {
        Self {
            root: root.into(),
            bindings,
        }
    }

    /// Tasks bound to any of `paths`, in binding order, each at most once.
    /// Paths outside the project root match nothing.
    pub fn route<P: AsRef<Path>>(&self, paths: impl IntoIterator<Item = P>) -> Vec<Arc<dyn Task>> {
        let relative: Vec<Utf8PathBuf> = paths
            .into_iter()
            .filter_map(|path| {
                let path = Utf8Path::from_path(path.as_ref())?;
                path.strip_prefix(&self.root).ok().map(Utf8Path::to_path_buf)
            })
            .collect();

        let mut seen = HashSet::new();
        let mut tasks = Vec::new();

        for binding in &self.bindings {
            if seen.contains(binding.task.name()) {
                continue;
            }

            let hit = relative
                .iter()
                .any(|path| binding.pattern.matches_with(path.as_str(), MATCH));

            if hit {
                seen.insert(binding.task.name().to_string());
                tasks.push(binding.task.clone());
            }
        }

        tasks
    }
}

/// Start every task on the rayon pool without waiting for it. Failures are
/// surfaced as alerts; a reloading task that changed the output signals
/// `reload`.
pub fn dispatch(tasks: Vec<Arc<dyn Task>>, alerts: Arc<dyn AlertSink>, reload: &Sender<()>) {
    for task in tasks {
        let alerts = alerts.clone();
        let reload = reload.clone();

        rayon::spawn(move || {
            let s = Instant::now();
            match run_caught(task.as_ref()) {
                Ok(outcome) => {
                    tracing::info!("{} finished {}", task.name(), as_overhead(s));
                    if task.reloads() && outcome.changed() {
                        reload.send(()).ok();
                    }
                }
                Err(err) => alerts.alert(Alert::from(&err)),
            }
        });
    }
}

/// Watch the source tree forever, dispatching bound tasks on change and
/// serving the output tree when the `server` feature is on.
pub(crate) fn watch(
    config: &Config,
    dispatcher: Dispatcher,
    alerts: Arc<dyn AlertSink>,
) -> Result<(), WatchError> {
    let (tcp, ws_port) = reserve_port()?;
    tracing::info!("live reload listening on port {ws_port}");

    let clients = Arc::new(Mutex::new(vec![]));
    let _thread_i = new_thread_ws_incoming(tcp, clients.clone());
    let (tx_reload, _thread_o) = new_thread_ws_reload(clients);

    let (tx, rx) = channel();
    let mut watcher = notify::recommended_watcher(tx)?;
    watcher.watch(config.layout.src.as_std_path(), RecursiveMode::Recursive)?;
    tracing::info!("watching {}", config.layout.src);

    #[cfg(feature = "server")]
    let _thread_http = super::http::start(config.layout.out.clone(), config.port, ws_port);

    loop {
        match rx.recv()? {
            Ok(event) => {
                if !is_change(&event) {
                    continue;
                }

                let tasks = dispatcher.route(&event.paths);
                if tasks.is_empty() {
                    continue;
                }

                tracing::debug!(paths = ?event.paths, "change detected");
                dispatch(tasks, alerts.clone(), &tx_reload);
            }
            Err(e) => tracing::error!("watch error: {e:?}"),
        }
    }
}

fn is_change(event: &Event) -> bool {
    match event.kind {
        EventKind::Create(_) | EventKind::Remove(_) => true,
        EventKind::Modify(ModifyKind::Metadata(_)) => false,
        EventKind::Modify(_) => true,
        _ => false,
    }
}

fn reserve_port() -> std::io::Result<(TcpListener, u16)> {
    let listener = match TcpListener::bind(("127.0.0.1", RELOAD_PORT)) {
        Ok(sock) => sock,
        Err(_) => TcpListener::bind("127.0.0.1:0")?,
    };

    let addr = listener.local_addr()?;
    let port = addr.port();
    Ok((listener, port))
}

type Clients = Arc<Mutex<Vec<WebSocket<TcpStream>>>>;

fn new_thread_ws_incoming(server: TcpListener, clients: Clients) -> JoinHandle<()> {
    std::thread::spawn(move || {
        for stream in server.incoming() {
            let Ok(stream) = stream else {
                continue;
            };

            let socket = match tungstenite::accept(stream) {
                Ok(socket) => socket,
                Err(e) => {
                    tracing::debug!("websocket handshake failed: {e}");
                    continue;
                }
            };

            let Ok(mut clients) = clients.lock() else {
                break;
            };
            clients.push(socket);
            trim_clients(&mut clients);
        }
    })
}

fn new_thread_ws_reload(clients: Clients) -> (Sender<()>, JoinHandle<()>) {
    let (tx, rx) = channel();

    let thread = std::thread::spawn(move || {
        while rx.recv().is_ok() {
            let Ok(mut clients) = clients.lock() else {
                break;
            };
            let mut broken = vec![];

            for (i, socket) in clients.iter_mut().enumerate() {
                if let Err(e) = socket.send("reload".into()) {
                    tracing::debug!("dropping websocket client: {e}");
                    broken.push(i);
                }
            }

            for i in broken.into_iter().rev() {
                clients.remove(i);
            }

            trim_clients(&mut clients);
            tracing::info!("reload sent to {} client(s)", clients.len());
        }
    });

    (tx, thread)
}

fn trim_clients(clients: &mut Vec<WebSocket<TcpStream>>) {
    let len = clients.len();
    if len > MAX_CLIENTS {
        for mut socket in clients.drain(0..len - MAX_CLIENTS) {
            socket.close(None).ok();
        }
    }
}
