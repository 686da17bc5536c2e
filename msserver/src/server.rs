//! # Module Server - API de haut niveau pour Axum
//!
//! - Routes JSON simples avec `add_route()`
//! - Handlers avec état (GET/POST, flux, WebSocket) avec `add_handler_with_state()`
//! - Sous-routers complets avec `add_router()`
//! - Répertoire statique avec `add_static_dir()`
//! - Arrêt gracieux sur Ctrl+C ou via le [`CancellationToken`] du serveur

use std::{future::Future, net::SocketAddr, sync::Arc};

use anyhow::{Context, Result};
use axum::{
    Json, Router,
    handler::Handler,
    middleware,
    routing::{get, post},
};
use msconfig::get_config;
use serde::Serialize;
use tokio::{net::TcpListener, signal, sync::RwLock, task::JoinHandle};
use tokio_util::sync::CancellationToken;
use tower_http::services::ServeDir;
use tracing::{error, info};

use crate::middleware::common_headers;

/// Info serveur sérialisable
#[derive(Debug, Clone, Serialize)]
pub struct ServerInfo {
    pub name: String,
    pub base_url: String,
    pub http_port: u16,
}

/// Serveur principal
pub struct Server {
    name: String,
    base_url: String,
    http_port: u16,
    router: Arc<RwLock<Router>>,
    static_dir: Option<String>,
    shutdown: CancellationToken,
    join_handle: Option<JoinHandle<()>>,
}

impl Server {
    /// Crée une nouvelle instance de serveur
    ///
    /// # Arguments
    ///
    /// * `name` - Nom du serveur (pour les logs)
    /// * `base_url` - URL de base (ex: "http://localhost:8080")
    /// * `http_port` - Port HTTP à écouter, 0 pour un port libre
    pub fn new(name: impl Into<String>, base_url: impl Into<String>, http_port: u16) -> Self {
        Self {
            name: name.into(),
            base_url: base_url.into(),
            http_port,
            router: Arc::new(RwLock::new(Router::new())),
            static_dir: None,
            shutdown: CancellationToken::new(),
            join_handle: None,
        }
    }

    pub fn new_configured() -> Self {
        ServerBuilder::new_configured().build()
    }

    async fn mount(&mut self, path: &str, route: Router) {
        let mut r = self.router.write().await;
        *r = if path == "/" {
            std::mem::take(&mut *r).merge(route)
        } else {
            std::mem::take(&mut *r).nest(path, route)
        };
    }

    /// Ajoute une route JSON dynamique
    ///
    /// La closure est appelée à chaque GET sur `path`.
    ///
    /// ```rust,no_run
    /// # use msserver::Server;
    /// # async fn example() {
    /// # let mut server = Server::new("Test", "http://localhost:8080", 8080);
    /// server.add_route("/api/status", || async {
    ///     serde_json::json!({"status": "online"})
    /// }).await;
    /// # }
    /// ```
    pub async fn add_route<F, Fut, T>(&mut self, path: &str, f: F)
    where
        F: Fn() -> Fut + Send + Sync + 'static,
        Fut: Future<Output = T> + Send + 'static,
        T: Serialize + Send + 'static,
    {
        let f = Arc::new(f);
        let handler = move || {
            let f = f.clone();
            async move { Json(f().await) }
        };
        self.mount(path, Router::new().route("/", get(handler))).await;
    }

    /// Ajoute un handler GET avec état
    pub async fn add_handler_with_state<H, T, S>(&mut self, path: &str, handler: H, state: S)
    where
        H: Handler<T, S> + Clone + 'static,
        T: 'static,
        S: Clone + Send + Sync + 'static,
    {
        let route = Router::new().route("/", get(handler)).with_state(state);
        self.mount(path, route).await;
    }

    /// Ajoute un handler POST avec état
    pub async fn add_post_handler_with_state<H, T, S>(&mut self, path: &str, handler: H, state: S)
    where
        H: Handler<T, S> + Clone + 'static,
        T: 'static,
        S: Clone + Send + Sync + 'static,
    {
        let route = Router::new().route("/", post(handler)).with_state(state);
        self.mount(path, route).await;
    }

    /// Ajoute un sous-router au serveur
    ///
    /// - Si `path` est "/", merge directement au router principal
    /// - Sinon, nest le router sous le chemin donné
    pub async fn add_router(&mut self, path: &str, sub_router: Router) {
        let normalized = if path == "/" {
            path.to_string()
        } else {
            format!("/{}", path.trim_start_matches('/'))
        };
        self.mount(&normalized, sub_router).await;
    }

    /// Sert `dir` pour toutes les requêtes qui ne correspondent à aucune route.
    pub fn add_static_dir(&mut self, dir: impl Into<String>) {
        self.static_dir = Some(dir.into());
    }

    /// Router final, middleware commun inclus.
    pub async fn router(&self) -> Router {
        let mut router = self.router.read().await.clone();
        if let Some(dir) = &self.static_dir {
            router = router.fallback_service(ServeDir::new(dir));
        }
        router.layer(middleware::from_fn(common_headers))
    }

    /// Jeton annulé à l'arrêt du serveur.
    pub fn shutdown_token(&self) -> CancellationToken {
        self.shutdown.clone()
    }

    /// Démarre le serveur HTTP
    ///
    /// Écoute sur le port configuré et retourne l'adresse effectivement liée.
    /// L'arrêt est déclenché par Ctrl+C ou par [`Server::shutdown_token`].
    pub async fn start(&mut self) -> Result<SocketAddr> {
        let addr = SocketAddr::from(([0, 0, 0, 0], self.http_port));
        let listener = TcpListener::bind(addr)
            .await
            .with_context(|| format!("cannot bind {addr}"))?;
        let local_addr = listener.local_addr()?;
        info!(
            "Server {} running at {} (listening on {})",
            self.name, self.base_url, local_addr
        );

        let router = self.router().await;
        let shutdown = self.shutdown.clone();

        tokio::spawn({
            let shutdown = shutdown.clone();
            async move {
                tokio::select! {
                    res = signal::ctrl_c() => match res {
                        Ok(()) => info!("Ctrl+C reçu, arrêt gracieux"),
                        Err(e) => error!("failed to listen for ctrl_c: {}", e),
                    },
                    _ = shutdown.cancelled() => {}
                }
                shutdown.cancel();
            }
        });

        self.join_handle = Some(tokio::spawn(async move {
            let serve = axum::serve(listener, router)
                .with_graceful_shutdown(async move { shutdown.cancelled().await });
            if let Err(e) = serve.await {
                error!("HTTP server error: {}", e);
            }
        }));

        Ok(local_addr)
    }

    /// Attend la fin du serveur
    pub async fn wait(&mut self) {
        if let Some(h) = self.join_handle.take() {
            let _ = h.await;
        }
    }

    /// Déclenche l'arrêt gracieux
    pub fn stop(&self) {
        self.shutdown.cancel();
    }

    /// Récupère les infos du serveur
    pub fn info(&self) -> ServerInfo {
        ServerInfo {
            name: self.name.clone(),
            base_url: self.base_url.clone(),
            http_port: self.http_port,
        }
    }
}

/// Builder pattern
pub struct ServerBuilder {
    name: String,
    base_url: String,
    http_port: u16,
    static_dir: Option<String>,
}

impl ServerBuilder {
    /// Crée un nouveau builder
    pub fn new(name: impl Into<String>, base_url: impl Into<String>, http_port: u16) -> Self {
        Self {
            name: name.into(),
            base_url: base_url.into(),
            http_port,
            static_dir: None,
        }
    }

    /// Builder initialisé depuis `host.*`.
    pub fn new_configured() -> Self {
        let config = get_config();
        let port = config.get_http_port();
        Self {
            name: "MusicStream".to_string(),
            base_url: format!("http://localhost:{port}"),
            http_port: port,
            static_dir: Some(config.get_static_dir()),
        }
    }

    pub fn http_port(mut self, port: u16) -> Self {
        self.http_port = port;
        self
    }

    pub fn static_dir(mut self, dir: impl Into<String>) -> Self {
        self.static_dir = Some(dir.into());
        self
    }

    /// Construit le serveur
    pub fn build(self) -> Server {
        let mut server = Server::new(self.name, self.base_url, self.http_port);
        if let Some(dir) = self.static_dir {
            server.add_static_dir(dir);
        }
        server
    }
}
