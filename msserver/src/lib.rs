//! # msserver - Serveur web haut niveau basé sur Axum
//!
//! Petite couche au-dessus d'Axum utilisée par MusicStream :
//!
//! - [`server`] : le [`Server`] et son builder, enregistrement des routes,
//!   démarrage et arrêt gracieux
//! - [`logs`] : initialisation de `tracing` avec un niveau modifiable à chaud
//! - [`middleware`] : en-têtes communs (CORS, cache, cookie de session)
//!
//! ```rust,no_run
//! use msserver::{ServerBuilder, logs::{LoggingOptions, init_logging}};
//!
//! # async fn example() -> anyhow::Result<()> {
//! init_logging(LoggingOptions::default())?;
//!
//! let mut server = ServerBuilder::new("MyServer", "http://localhost:8080", 8080).build();
//! server
//!     .add_route("/api/status", || async { serde_json::json!({"status": "ok"}) })
//!     .await;
//! server.start().await?;
//! server.wait().await;
//! # Ok(())
//! # }
//! ```

pub mod logs;
pub mod middleware;
pub mod server;

pub use logs::{LogHandle, LoggingOptions, init_logging};
pub use middleware::{SESSION_COOKIE, common_headers, rest_headers};
pub use server::{Server, ServerBuilder, ServerInfo};
