//! HTTP engine: listener, connection lifetime, and the request pipeline fold.
//!
//! The engine knows nothing about concrete routes or stages; it owns the
//! accept loop, enforces the connection cap, counts requests, and folds each
//! request over the configured [`PipelineSet`] around the route table.

use std::net::SocketAddr;
use std::panic::AssertUnwindSafe;
use std::path::{Path, PathBuf};
use std::sync::atomic::Ordering;
use std::sync::Arc;
use std::time::Duration;

use axum::body::Body;
use axum::http::{Extensions, Request};
use axum::response::{IntoResponse, Response};
use futures_util::FutureExt;
use hyper::body::Incoming;
use hyper::server::conn::http1;
use hyper::service::service_fn;
use hyper_util::rt::{TokioIo, TokioTimer};
use tokio::net::{TcpListener, TcpStream};
use tokio::sync::Semaphore;
use tokio::task::{JoinHandle, JoinSet};
use tokio_rustls::rustls::pki_types::{CertificateDer, PrivateKeyDer};
use tokio_rustls::rustls::ServerConfig as RustlsServerConfig;
use tokio_rustls::TlsAcceptor;
use tokio_util::sync::CancellationToken;
use tracing::{debug, error, info, warn};

use crate::config::{is_production, ServerSettings};
use crate::error::{HttpError, StartError};
use crate::pipeline::{Exchange, PipelineSet, Verdict};
use crate::router::RouteTable;
use crate::state::ServerStats;

/// Resolved TLS material locations.
#[derive(Clone, Debug)]
pub struct TlsPaths {
    pub certificate: PathBuf,
    pub private_key: PathBuf,
}

/// Listener-level settings, resolved and validated from the `server` section.
#[derive(Clone, Debug)]
pub struct EngineConfig {
    pub host: String,
    pub port: u16,
    pub max_connections: usize,
    pub keep_alive_enabled: bool,
    pub connection_timeout: Duration,
    pub shutdown_grace_period: Duration,
    pub max_request_body_bytes: usize,
    pub tls: Option<TlsPaths>,
}

impl EngineConfig {
    /// Build from settings, resolving TLS files against `base_path` and
    /// validating them. Production mode requires TLS with a non-trivial key.
    pub fn from_settings(server: &ServerSettings, base_path: &Path) -> Result<Self, StartError> {
        let production = is_production();
        if production && !server.ssl.enabled {
            return Err(StartError::Tls(
                "TLS must be enabled in production mode".to_string(),
            ));
        }

        let tls = if server.ssl.enabled {
            let resolve = |file: &str| {
                let path = Path::new(file);
                if path.is_absolute() {
                    path.to_path_buf()
                } else {
                    base_path.join(path)
                }
            };
            let certificate = resolve(&server.ssl.certificate_file);
            let private_key = resolve(&server.ssl.private_key_file);
            let file_size = |path: &Path, what: &str| {
                std::fs::metadata(path)
                    .map(|m| m.len())
                    .map_err(|e| StartError::Tls(format!("{what} '{}': {e}", path.display())))
            };
            if file_size(&certificate, "certificate file")? == 0 {
                return Err(StartError::Tls(format!(
                    "certificate file '{}' is empty",
                    certificate.display()
                )));
            }
            let key_size = file_size(&private_key, "private key file")?;
            if key_size == 0 {
                return Err(StartError::Tls(format!(
                    "private key file '{}' is empty",
                    private_key.display()
                )));
            }
            if production && key_size <= 256 {
                return Err(StartError::Tls(
                    "private key file is implausibly small for production".to_string(),
                ));
            }
            Some(TlsPaths {
                certificate,
                private_key,
            })
        } else {
            None
        };

        Ok(Self {
            host: server.host.clone(),
            port: server.port,
            max_connections: server.max_connections.max(1),
            keep_alive_enabled: server.keep_alive_enabled,
            connection_timeout: Duration::from_secs(server.connection_timeout_seconds),
            shutdown_grace_period: Duration::from_secs(server.shutdown_grace_period_seconds),
            max_request_body_bytes: server.max_request_body_bytes,
            tls,
        })
    }
}

fn load_tls_config(paths: &TlsPaths) -> Result<RustlsServerConfig, StartError> {
    let open = |path: &PathBuf| {
        std::fs::File::open(path)
            .map(std::io::BufReader::new)
            .map_err(|e| StartError::Tls(format!("'{}': {e}", path.display())))
    };
    let certs: Vec<CertificateDer<'static>> = rustls_pemfile::certs(&mut open(&paths.certificate)?)
        .collect::<Result<_, _>>()
        .map_err(|e| StartError::Tls(format!("reading certificates: {e}")))?;
    if certs.is_empty() {
        return Err(StartError::Tls("no certificates found".to_string()));
    }
    let key: PrivateKeyDer<'static> = rustls_pemfile::private_key(&mut open(&paths.private_key)?)
        .map_err(|e| StartError::Tls(format!("reading private key: {e}")))?
        .ok_or_else(|| StartError::Tls("no private key found".to_string()))?;
    RustlsServerConfig::builder()
        .with_no_client_auth()
        .with_single_cert(certs, key)
        .map_err(|e| StartError::Tls(e.to_string()))
}

struct EngineInner {
    config: EngineConfig,
    pipeline: PipelineSet,
    routes: Arc<RouteTable>,
    stats: Arc<ServerStats>,
    extensions: Extensions,
    shutdown: CancellationToken,
    accept_task: tokio::sync::Mutex<Option<JoinHandle<()>>>,
    local_addr: std::sync::Mutex<Option<SocketAddr>>,
}

/// One engine instance serves one run; a reload builds a fresh engine.
#[derive(Clone)]
pub struct HttpEngine {
    inner: Arc<EngineInner>,
}

impl HttpEngine {
    pub fn new(
        config: EngineConfig,
        pipeline: PipelineSet,
        routes: Arc<RouteTable>,
        stats: Arc<ServerStats>,
        extensions: Extensions,
        shutdown: CancellationToken,
    ) -> Self {
        Self {
            inner: Arc::new(EngineInner {
                config,
                pipeline,
                routes,
                stats,
                extensions,
                shutdown,
                accept_task: tokio::sync::Mutex::new(None),
                local_addr: std::sync::Mutex::new(None),
            }),
        }
    }

    /// Address actually bound, available after [`start`](Self::start).
    pub fn local_addr(&self) -> Option<SocketAddr> {
        *self.inner.local_addr.lock().expect("engine lock poisoned")
    }

    /// Bind the listener and spawn the accept loop.
    pub async fn start(&self) -> Result<SocketAddr, StartError> {
        let mut task_slot = self.inner.accept_task.lock().await;
        if task_slot.is_some() {
            return Err(StartError::InvalidState("engine already started".to_string()));
        }

        let config = &self.inner.config;
        let acceptor = match &config.tls {
            Some(paths) => Some(TlsAcceptor::from(Arc::new(load_tls_config(paths)?))),
            None => None,
        };
        let listener = TcpListener::bind((config.host.as_str(), config.port))
            .await
            .map_err(|e| StartError::Bind(format!("{}:{}: {e}", config.host, config.port)))?;
        let local = listener
            .local_addr()
            .map_err(|e| StartError::Bind(e.to_string()))?;
        *self.inner.local_addr.lock().expect("engine lock poisoned") = Some(local);

        info!(
            addr = %local,
            tls = acceptor.is_some(),
            max_connections = config.max_connections,
            "listener active"
        );

        let engine = self.clone();
        *task_slot = Some(tokio::spawn(async move {
            engine.accept_loop(listener, acceptor).await;
        }));
        Ok(local)
    }

    /// Stop accepting, drain in-flight connections up to the grace period,
    /// then force the stragglers closed. Idempotent.
    pub async fn stop(&self) {
        self.inner.shutdown.cancel();
        let task = self.inner.accept_task.lock().await.take();
        if let Some(task) = task {
            if let Err(err) = task.await {
                error!(error = %err, "accept loop terminated abnormally");
            }
        }
    }

    async fn accept_loop(self, listener: TcpListener, acceptor: Option<TlsAcceptor>) {
        let semaphore = Arc::new(Semaphore::new(self.inner.config.max_connections));
        let mut connections = JoinSet::new();
        let shutdown = self.inner.shutdown.clone();

        loop {
            // Opportunistically reap finished connection tasks.
            while connections.try_join_next().is_some() {}

            let permit = tokio::select! {
                _ = shutdown.cancelled() => break,
                permit = semaphore.clone().acquire_owned() => {
                    permit.expect("connection semaphore closed")
                }
            };
            let (stream, peer) = tokio::select! {
                _ = shutdown.cancelled() => break,
                accepted = listener.accept() => match accepted {
                    Ok(pair) => pair,
                    Err(err) => {
                        warn!(error = %err, "accept failed");
                        continue;
                    }
                },
            };

            let engine = self.clone();
            let acceptor = acceptor.clone();
            let token = shutdown.clone();
            connections.spawn(async move {
                engine
                    .inner
                    .stats
                    .active_connections
                    .fetch_add(1, Ordering::SeqCst);
                engine.handle_connection(stream, peer, acceptor, token).await;
                engine
                    .inner
                    .stats
                    .active_connections
                    .fetch_sub(1, Ordering::SeqCst);
                drop(permit);
            });
        }

        // New connections are refused from here on; the listener closes when
        // dropped at the end of this function.
        let grace = self.inner.config.shutdown_grace_period;
        let drained = tokio::time::timeout(grace, async {
            while connections.join_next().await.is_some() {}
        })
        .await;
        if drained.is_err() {
            warn!(grace_seconds = grace.as_secs(), "grace period elapsed, forcing connections closed");
            connections.abort_all();
            while connections.join_next().await.is_some() {}
        }
        info!("listener drained");
    }

    async fn handle_connection(
        &self,
        stream: TcpStream,
        peer: SocketAddr,
        acceptor: Option<TlsAcceptor>,
        token: CancellationToken,
    ) {
        let mut builder = http1::Builder::new();
        builder
            .keep_alive(self.inner.config.keep_alive_enabled)
            .timer(TokioTimer::new())
            .header_read_timeout(self.inner.config.connection_timeout);

        match acceptor {
            Some(acceptor) => match acceptor.accept(stream).await {
                Ok(tls_stream) => {
                    self.serve_io(&builder, TokioIo::new(tls_stream), peer, true, token)
                        .await
                }
                Err(err) => debug!(%peer, error = %err, "TLS handshake failed"),
            },
            None => {
                self.serve_io(&builder, TokioIo::new(stream), peer, false, token)
                    .await
            }
        }
    }

    async fn serve_io<I>(
        &self,
        builder: &http1::Builder,
        io: TokioIo<I>,
        peer: SocketAddr,
        tls: bool,
        token: CancellationToken,
    ) where
        I: tokio::io::AsyncRead + tokio::io::AsyncWrite + Unpin + Send + 'static,
    {
        let engine = self.clone();
        let service = service_fn(move |req: Request<Incoming>| {
            let engine = engine.clone();
            async move {
                let response = engine.dispatch(req.map(Body::new), peer, tls).await;
                Ok::<_, std::convert::Infallible>(response)
            }
        });

        let conn = builder.serve_connection(io, service);
        tokio::pin!(conn);
        tokio::select! {
            result = conn.as_mut() => {
                if let Err(err) = result {
                    debug!(%peer, error = %err, "connection closed with error");
                }
            }
            _ = token.cancelled() => {
                // Let the in-flight response finish; the accept loop bounds
                // the total wait with the grace period.
                conn.as_mut().graceful_shutdown();
                if let Err(err) = conn.as_mut().await {
                    debug!(%peer, error = %err, "connection closed during drain");
                }
            }
        }
    }

    /// Fold one request through the pipeline and produce the final response.
    ///
    /// Public so tests (and alternative frontends) can drive the pipeline
    /// without a socket.
    pub async fn dispatch(&self, request: Request<Body>, peer: SocketAddr, tls: bool) -> Response {
        self.inner.stats.total_requests.fetch_add(1, Ordering::SeqCst);

        let (parts, body) = request.into_parts();
        let body = match axum::body::to_bytes(body, self.inner.config.max_request_body_bytes).await
        {
            Ok(bytes) => bytes,
            Err(_) => {
                return self.finalize(
                    Vec::new(),
                    HttpError::BadRequest("Invalid request body.".to_string()).into_response(),
                )
            }
        };

        let mut exchange = Exchange::new(
            parts.method,
            parts.uri,
            parts.headers,
            body,
            peer,
            tls,
            self.inner.extensions.clone(),
        );

        for stage in &self.inner.pipeline.pre_route {
            if let Verdict::Done(response) = stage.apply(&mut exchange).await {
                let decorations = exchange.take_decorations();
                return self.finalize(decorations, response);
            }
        }

        let Some(matched) = self
            .inner
            .routes
            .find(&exchange.method, exchange.path())
        else {
            let decorations = exchange.take_decorations();
            return self.finalize(decorations, HttpError::endpoint_not_found().into_response());
        };
        if !matched.validate() {
            let decorations = exchange.take_decorations();
            return self.finalize(
                decorations,
                HttpError::invalid_route_parameter().into_response(),
            );
        }
        exchange.params = matched.params;
        exchange.route = Some(matched.route.clone());

        for stage in &self.inner.pipeline.post_route {
            if let Verdict::Done(response) = stage.apply(&mut exchange).await {
                let decorations = exchange.take_decorations();
                return self.finalize(decorations, response);
            }
        }

        let handler = matched.route.handler.clone();
        let decorations = exchange.take_decorations();
        let response = match AssertUnwindSafe(handler(exchange)).catch_unwind().await {
            Ok(Ok(response)) => response,
            Ok(Err(err)) => err.into_response(),
            Err(_) => {
                error!("handler panicked");
                HttpError::Internal("Internal server error.".to_string()).into_response()
            }
        };
        self.finalize(decorations, response)
    }

    fn finalize(
        &self,
        decorations: Vec<(axum::http::HeaderName, axum::http::HeaderValue)>,
        mut response: Response,
    ) -> Response {
        for (name, value) in decorations {
            response.headers_mut().insert(name, value);
        }
        if response.status().is_client_error() || response.status().is_server_error() {
            self.inner.stats.failed_requests.fetch_add(1, Ordering::SeqCst);
        }
        response
    }
}
