//! The dispatch server
//!
//! A single TCP listener sniffs each connection's first line: requests
//! ending in `HTTP/1.1` get the bearer-authenticated HTTP treatment, any
//! other line is the `OP {json}` protocol. Both route through the same
//! operation handlers; one request, one response, then the connection
//! closes.

use std::net::SocketAddr;
use std::path::{Path, PathBuf};
use std::sync::Arc;
use std::time::Duration;

use eyre::{Context, Result};
use serde::de::DeserializeOwned;
use serde_json::{Value, json};
use tokio::io::{AsyncBufReadExt, AsyncWriteExt, BufReader};
use tokio::net::{TcpListener, TcpStream};
use tokio::sync::{RwLock, broadcast};
use tracing::{debug, info, warn};

use super::http;
use super::ops::{
    IncludeRequest, ListRequest, Operation, PathRequest, SearchRequest, SetRootsRequest, TodoRequest, TransferRequest,
    WriteRequest, engine_error_response, error_response, ok_response,
};
use crate::config::Config;
use crate::engine::{BackupWriter, ExecutorHandle, PathLocks, RunOutcome};
use crate::error::EngineError;
use knowstore::{FileStore, IncludeResolver, IncludeSpec, Resolved, RootSet};

/// Everything a connection handler needs
pub struct ServerState {
    pub config: Config,
    pub roots: Arc<RwLock<RootSet>>,
    pub store: FileStore,
    pub executor: ExecutorHandle,
    pub path_locks: PathLocks,
    pub shutdown: broadcast::Sender<()>,
}

impl ServerState {
    /// Resolve a wire path against the roots, based at the first root
    async fn resolve(&self, raw: &str) -> Result<Resolved, EngineError> {
        let roots = self.roots.read().await;
        let base = roots.first().to_path_buf();
        Ok(roots.resolve(raw, &base)?)
    }

    /// Display form of a path, relative to its root
    async fn rel(&self, path: &Path) -> String {
        let roots = self.roots.read().await;
        roots.relative_to_nearest_root(path).display().to_string()
    }

    fn backup_writer(&self) -> BackupWriter {
        BackupWriter::new(self.store.clone(), &self.config.backup_root)
    }
}

/// The dual-protocol TCP server
pub struct DispatchServer {
    listener: TcpListener,
    state: Arc<ServerState>,
}

impl DispatchServer {
    /// Bind the listen socket and assemble the shared state
    pub async fn bind(
        config: Config,
        roots: Arc<RwLock<RootSet>>,
        executor: ExecutorHandle,
        path_locks: PathLocks,
    ) -> Result<Self> {
        let store = FileStore::new(config.max_file_bytes);
        let (shutdown, _) = broadcast::channel(4);
        let listener = TcpListener::bind(config.listen_addr())
            .await
            .context(format!("Failed to bind {}", config.listen_addr()))?;

        Ok(Self {
            listener,
            state: Arc::new(ServerState {
                config,
                roots,
                store,
                executor,
                path_locks,
                shutdown,
            }),
        })
    }

    pub fn local_addr(&self) -> std::io::Result<SocketAddr> {
        self.listener.local_addr()
    }

    /// Accept connections until QUIT, then drain the engine
    pub async fn run(self) -> Result<()> {
        let mut shutdown_rx = self.state.shutdown.subscribe();
        info!(addr = %self.listener.local_addr()?, "dispatch server listening");

        loop {
            tokio::select! {
                accepted = self.listener.accept() => match accepted {
                    Ok((stream, peer)) => {
                        debug!(%peer, "connection accepted");
                        let state = self.state.clone();
                        tokio::spawn(async move {
                            if let Err(e) = handle_connection(stream, state).await {
                                debug!(error = %e, "connection handler error");
                            }
                        });
                    }
                    Err(e) => warn!(error = %e, "accept failed"),
                },
                _ = shutdown_rx.recv() => break,
            }
        }

        info!("dispatch server shutting down");
        self.state.executor.shutdown(Duration::from_secs(30)).await;
        Ok(())
    }
}

async fn handle_connection(stream: TcpStream, state: Arc<ServerState>) -> std::io::Result<()> {
    let (read_half, mut write_half) = stream.into_split();
    let mut reader = BufReader::new(read_half);

    let mut first_line = String::new();
    if reader.read_line(&mut first_line).await? == 0 {
        return Ok(());
    }
    let request_line = first_line.trim_end().to_string();

    if request_line.ends_with("HTTP/1.1") {
        handle_http(&mut reader, &mut write_half, &request_line, &state).await
    } else {
        handle_line(&mut write_half, &request_line, &state).await
    }
}

async fn handle_http<R>(
    reader: &mut R,
    writer: &mut (impl AsyncWriteExt + Unpin),
    request_line: &str,
    state: &ServerState,
) -> std::io::Result<()>
where
    R: AsyncBufReadExt + Unpin,
{
    let request = http::read_request(reader, request_line).await?;

    if request.method.eq_ignore_ascii_case("OPTIONS") {
        return http::write_options_response(writer).await;
    }

    if request.bearer_token() != Some(state.config.token.as_str()) {
        debug!("rejecting request without valid bearer token");
        let body = error_response("Unauthorized", "missing or invalid bearer token");
        return http::write_response(writer, 401, "Unauthorized", &body.to_string()).await;
    }

    let parsed: Value = match serde_json::from_str(&request.body) {
        Ok(v) => v,
        Err(e) => {
            let body = error_response("ParseError", &format!("invalid request body: {}", e));
            return http::write_response(writer, 400, "Bad Request", &body.to_string()).await;
        }
    };
    let op_name = parsed["operation"].as_str().unwrap_or_default().to_string();
    let payload = parsed.get("payload").cloned().unwrap_or_else(|| json!({}));

    let (body, quit) = route(state, &op_name, payload).await;
    http::write_response(writer, 200, "OK", &body.to_string()).await?;

    if quit {
        let _ = state.shutdown.send(());
    }
    Ok(())
}

async fn handle_line(
    writer: &mut (impl AsyncWriteExt + Unpin),
    line: &str,
    state: &ServerState,
) -> std::io::Result<()> {
    let (op_name, payload_text) = match line.split_once(' ') {
        Some((op, rest)) => (op, rest.trim()),
        None => (line, ""),
    };

    let payload: Value = if payload_text.is_empty() {
        json!({})
    } else {
        match serde_json::from_str(payload_text) {
            Ok(v) => v,
            Err(e) => {
                let body = error_response("ParseError", &format!("invalid payload: {}", e));
                return write_line(writer, &body).await;
            }
        }
    };

    if state.config.require_line_auth && payload["token"].as_str() != Some(state.config.token.as_str()) {
        let body = error_response("Unauthorized", "missing or invalid token field");
        return write_line(writer, &body).await;
    }

    let (body, quit) = route(state, op_name, payload).await;
    write_line(writer, &body).await?;

    if quit {
        let _ = state.shutdown.send(());
    }
    Ok(())
}

async fn write_line(writer: &mut (impl AsyncWriteExt + Unpin), body: &Value) -> std::io::Result<()> {
    writer.write_all(body.to_string().as_bytes()).await?;
    writer.write_all(b"\n").await?;
    writer.flush().await
}

/// Map an operation name to its handler; unknown names never reach one
async fn route(state: &ServerState, op_name: &str, payload: Value) -> (Value, bool) {
    let Some(op) = Operation::parse(op_name) else {
        debug!(%op_name, "unknown operation");
        return (json!({"status": "error", "error": "unknown"}), false);
    };

    debug!(op = op.name(), "dispatching");
    let response = dispatch(state, op, payload).await;
    let quit = op == Operation::Quit && response["status"] == "ok";
    (response, quit)
}

fn parse_payload<T: DeserializeOwned>(payload: Value) -> Result<T, Value> {
    serde_json::from_value(payload).map_err(|e| error_response("ParseError", &format!("invalid payload: {}", e)))
}

async fn dispatch(state: &ServerState, op: Operation, payload: Value) -> Value {
    match op {
        Operation::Todo => op_todo(state, payload).await,
        Operation::ListFiles => op_list_files(state, payload).await,
        Operation::ReadFile => op_read_file(state, payload).await,
        Operation::UpdateFile => op_write_file(state, payload, WriteMode::Update).await,
        Operation::CreateFile => op_write_file(state, payload, WriteMode::Create).await,
        Operation::AppendFile => op_append_file(state, payload).await,
        Operation::DeleteFile => op_delete_file(state, payload).await,
        Operation::Rename | Operation::Move => op_transfer(state, payload, Transfer::Rename).await,
        Operation::CopyFile => op_transfer(state, payload, Transfer::Copy).await,
        Operation::CreateDir => op_create_dir(state, payload).await,
        Operation::DeleteDir => op_delete_dir(state, payload).await,
        Operation::Checksum => op_checksum(state, payload).await,
        Operation::Search => op_search(state, payload).await,
        Operation::Include => op_include(state, payload).await,
        Operation::SetRoots => op_set_roots(state, payload).await,
        Operation::Quit => ok_response(json!({"result": "shutting down"})),
    }
}

async fn op_todo(state: &ServerState, payload: Value) -> Value {
    let req: TodoRequest = match parse_payload(payload) {
        Ok(r) => r,
        Err(e) => return e,
    };

    let todo = match req.file {
        Some(raw) => match state.resolve(&raw).await {
            Ok(resolved) => Some(resolved.path),
            Err(e) => return engine_error_response(&e),
        },
        None => None,
    };

    match state.executor.run_next(todo).await {
        Ok(RunOutcome::NoPending) => ok_response(json!({"result": "no-pending"})),
        Ok(RunOutcome::Completed {
            task,
            files,
            backup_dir,
            plan_tokens,
        }) => {
            let files: Vec<String> = files.iter().map(|p| p.display().to_string()).collect();
            ok_response(json!({
                "result": "completed",
                "task": task,
                "files": files,
                "backup": backup_dir.display().to_string(),
                "plan_tokens": plan_tokens,
            }))
        }
        Err(e) => engine_error_response(&e),
    }
}

async fn op_read_file(state: &ServerState, payload: Value) -> Value {
    let req: PathRequest = match parse_payload(payload) {
        Ok(r) => r,
        Err(e) => return e,
    };
    let resolved = match state.resolve(&req.path).await {
        Ok(r) => r,
        Err(e) => return engine_error_response(&e),
    };
    if resolved.new_file {
        return engine_error_response(&EngineError::NotFound(resolved.path));
    }

    match state.store.read(&resolved.path) {
        Ok(content) => {
            let rel = state.rel(&resolved.path).await;
            ok_response(json!({"path": rel, "content": content}))
        }
        Err(e) => engine_error_response(&e.into()),
    }
}

enum WriteMode {
    Update,
    Create,
}

async fn op_write_file(state: &ServerState, payload: Value, mode: WriteMode) -> Value {
    let req: WriteRequest = match parse_payload(payload) {
        Ok(r) => r,
        Err(e) => return e,
    };
    let resolved = match state.resolve(&req.path).await {
        Ok(r) => r,
        Err(e) => return engine_error_response(&e),
    };

    match mode {
        WriteMode::Update if resolved.new_file => {
            return engine_error_response(&EngineError::NotFound(resolved.path));
        }
        WriteMode::Create if !resolved.new_file => {
            return engine_error_response(&EngineError::Validation(format!("{} already exists", req.path)));
        }
        _ => {}
    }

    let _guard = state.path_locks.lock(&resolved.path).await;
    if let Err(e) = backup_prior(state, &resolved.path).await {
        return engine_error_response(&e);
    }
    match state.store.write(&resolved.path, &req.content) {
        Ok(()) => {
            let rel = state.rel(&resolved.path).await;
            ok_response(json!({"path": rel}))
        }
        Err(e) => engine_error_response(&e.into()),
    }
}

async fn op_append_file(state: &ServerState, payload: Value) -> Value {
    let req: WriteRequest = match parse_payload(payload) {
        Ok(r) => r,
        Err(e) => return e,
    };
    let resolved = match state.resolve(&req.path).await {
        Ok(r) => r,
        Err(e) => return engine_error_response(&e),
    };

    let _guard = state.path_locks.lock(&resolved.path).await;
    if let Err(e) = backup_prior(state, &resolved.path).await {
        return engine_error_response(&e);
    }
    match state.store.append(&resolved.path, &req.content) {
        Ok(()) => {
            let rel = state.rel(&resolved.path).await;
            ok_response(json!({"path": rel}))
        }
        Err(e) => engine_error_response(&e.into()),
    }
}

async fn op_delete_file(state: &ServerState, payload: Value) -> Value {
    let req: PathRequest = match parse_payload(payload) {
        Ok(r) => r,
        Err(e) => return e,
    };
    let resolved = match state.resolve(&req.path).await {
        Ok(r) => r,
        Err(e) => return engine_error_response(&e),
    };
    if resolved.new_file {
        return engine_error_response(&EngineError::NotFound(resolved.path));
    }

    let _guard = state.path_locks.lock(&resolved.path).await;
    if let Err(e) = backup_prior(state, &resolved.path).await {
        return engine_error_response(&e);
    }
    match state.store.delete(&resolved.path) {
        Ok(()) => ok_response(json!({})),
        Err(e) => engine_error_response(&e.into()),
    }
}

enum Transfer {
    Rename,
    Copy,
}

async fn op_transfer(state: &ServerState, payload: Value, kind: Transfer) -> Value {
    let req: TransferRequest = match parse_payload(payload) {
        Ok(r) => r,
        Err(e) => return e,
    };
    let from = match state.resolve(&req.from).await {
        Ok(r) => r,
        Err(e) => return engine_error_response(&e),
    };
    if from.new_file {
        return engine_error_response(&EngineError::NotFound(from.path));
    }
    let to = match state.resolve(&req.to).await {
        Ok(r) => r,
        Err(e) => return engine_error_response(&e),
    };

    // Lock both endpoints in path order so concurrent transfers can't
    // deadlock
    let (first, second) = if from.path <= to.path {
        (from.path.clone(), to.path.clone())
    } else {
        (to.path.clone(), from.path.clone())
    };
    let _guard_a = state.path_locks.lock(&first).await;
    let _guard_b = if first != second {
        Some(state.path_locks.lock(&second).await)
    } else {
        None
    };

    if let Err(e) = backup_prior(state, &to.path).await {
        return engine_error_response(&e);
    }

    let result = match kind {
        Transfer::Rename => state.store.rename(&from.path, &to.path),
        Transfer::Copy => state.store.copy(&from.path, &to.path),
    };
    match result {
        Ok(()) => {
            let rel = state.rel(&to.path).await;
            ok_response(json!({"path": rel}))
        }
        Err(e) => engine_error_response(&e.into()),
    }
}

async fn op_create_dir(state: &ServerState, payload: Value) -> Value {
    let req: PathRequest = match parse_payload(payload) {
        Ok(r) => r,
        Err(e) => return e,
    };
    let resolved = match state.resolve(&req.path).await {
        Ok(r) => r,
        Err(e) => return engine_error_response(&e),
    };
    match state.store.create_dir(&resolved.path) {
        Ok(()) => {
            let rel = state.rel(&resolved.path).await;
            ok_response(json!({"path": rel}))
        }
        Err(e) => engine_error_response(&e.into()),
    }
}

async fn op_delete_dir(state: &ServerState, payload: Value) -> Value {
    let req: PathRequest = match parse_payload(payload) {
        Ok(r) => r,
        Err(e) => return e,
    };
    let resolved = match state.resolve(&req.path).await {
        Ok(r) => r,
        Err(e) => return engine_error_response(&e),
    };
    match state.store.delete_dir(&resolved.path) {
        Ok(()) => ok_response(json!({})),
        Err(e) => engine_error_response(&e.into()),
    }
}

async fn op_checksum(state: &ServerState, payload: Value) -> Value {
    let req: PathRequest = match parse_payload(payload) {
        Ok(r) => r,
        Err(e) => return e,
    };
    let resolved = match state.resolve(&req.path).await {
        Ok(r) => r,
        Err(e) => return engine_error_response(&e),
    };
    if resolved.new_file {
        return engine_error_response(&EngineError::NotFound(resolved.path));
    }

    match state.store.checksum(&resolved.path) {
        Ok(checksum) => ok_response(json!({"checksum": checksum})),
        Err(e) => engine_error_response(&e.into()),
    }
}

async fn op_list_files(state: &ServerState, payload: Value) -> Value {
    let req: ListRequest = match parse_payload(payload) {
        Ok(r) => r,
        Err(e) => return e,
    };

    // Resolve the scope like every other path payload, before taking the
    // roots guard the enumeration below holds
    let dir = match &req.dir {
        Some(dir) => match state.resolve(dir).await {
            Ok(resolved) => Some(resolved.path),
            Err(e) => return engine_error_response(&e),
        },
        None => None,
    };

    let roots = state.roots.read().await;
    let bases: Vec<PathBuf> = match dir {
        Some(path) => vec![path],
        None => roots.roots().to_vec(),
    };

    let mut files = Vec::new();
    for base in &bases {
        match roots.enumerate(base, req.recursive, &state.config.exclude_dirs) {
            Ok(paths) => files.extend(
                paths
                    .iter()
                    .map(|p| roots.relative_to_nearest_root(p).display().to_string()),
            ),
            Err(e) => return engine_error_response(&e.into()),
        }
    }
    ok_response(json!({"files": files}))
}

async fn op_search(state: &ServerState, payload: Value) -> Value {
    let req: SearchRequest = match parse_payload(payload) {
        Ok(r) => r,
        Err(e) => return e,
    };

    let roots = state.roots.read().await;
    let mut paths = Vec::new();
    for root in roots.roots() {
        match roots.enumerate(root, true, &state.config.exclude_dirs) {
            Ok(found) => paths.extend(found),
            Err(e) => return engine_error_response(&e.into()),
        }
    }

    match state
        .store
        .search(&paths, &req.pattern, req.case_insensitive, req.max_results)
    {
        Ok(matches) => {
            let matches: Vec<Value> = matches
                .iter()
                .map(|m| {
                    json!({
                        "path": roots.relative_to_nearest_root(&m.path).display().to_string(),
                        "line_number": m.line_number,
                        "line": m.line,
                    })
                })
                .collect();
            ok_response(json!({"matches": matches}))
        }
        Err(e) => engine_error_response(&e.into()),
    }
}

async fn op_include(state: &ServerState, payload: Value) -> Value {
    let req: IncludeRequest = match parse_payload(payload) {
        Ok(r) => r,
        Err(e) => return e,
    };

    let roots = state.roots.read().await;
    let resolver = IncludeResolver::new(
        &roots,
        &state.store,
        state.config.exclude_dirs.clone(),
        state.config.token_budget,
    );

    let blob = match IncludeSpec::parse(&req.spec).and_then(|spec| resolver.resolve(&spec)) {
        Ok(blob) => blob,
        Err(e) => return engine_error_response(&e.into()),
    };

    let rel = |p: &PathBuf| roots.relative_to_nearest_root(p).display().to_string();
    ok_response(json!({
        "knowledge": blob.text,
        "files": blob.files.iter().map(rel).collect::<Vec<_>>(),
        "dropped": blob.dropped.iter().map(rel).collect::<Vec<_>>(),
        "bytes": blob.bytes,
        "tokens": blob.tokens,
    }))
}

async fn op_set_roots(state: &ServerState, payload: Value) -> Value {
    let req: SetRootsRequest = match parse_payload(payload) {
        Ok(r) => r,
        Err(e) => return e,
    };

    let new_roots = match RootSet::new(req.roots) {
        Ok(r) => r,
        Err(e) => return engine_error_response(&e.into()),
    };

    let listed: Vec<String> = new_roots.roots().iter().map(|r| r.display().to_string()).collect();
    *state.roots.write().await = new_roots;
    info!(roots = ?listed, "roots replaced");
    ok_response(json!({"roots": listed}))
}

/// Back up existing contents before a dispatch-level write
async fn backup_prior(state: &ServerState, path: &Path) -> Result<(), EngineError> {
    if !path.exists() {
        return Ok(());
    }
    let prior = state.store.read(path)?;
    let rel = {
        let roots = state.roots.read().await;
        roots.relative_to_nearest_root(path)
    };
    state.backup_writer().backup_file(&rel, &prior)?;
    Ok(())
}
