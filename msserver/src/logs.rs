//! Initialisation du logging.
//!
//! Un filtre de niveau rechargeable est posé avant la sortie console, ce qui
//! permet de changer le niveau sans redémarrer.

use std::sync::{Arc, PoisonError, RwLock};

use anyhow::{Context, Result};
use msconfig::Config;
use tracing::warn;
use tracing_subscriber::{
    Registry, filter::LevelFilter, layer::SubscriberExt, reload, util::SubscriberInitExt,
};

/// Options du logging.
#[derive(Debug, Clone)]
pub struct LoggingOptions {
    pub min_level: LevelFilter,
    pub enable_console: bool,
}

impl Default for LoggingOptions {
    fn default() -> Self {
        Self {
            min_level: LevelFilter::INFO,
            enable_console: true,
        }
    }
}

impl LoggingOptions {
    /// Lit `host.logger.*`.
    pub fn from_config(config: &Config) -> Self {
        let defaults = Self::default();
        let min_level = match config.get_log_min_level() {
            Ok(level) => parse_level(&level).unwrap_or_else(|| {
                warn!("Unknown log level '{}', using {}", level, defaults.min_level);
                defaults.min_level
            }),
            Err(_) => defaults.min_level,
        };
        let enable_console = config
            .get_log_enable_console()
            .unwrap_or(defaults.enable_console);
        Self {
            min_level,
            enable_console,
        }
    }
}

/// Handle sur le filtre installé par [`init_logging`].
#[derive(Clone)]
pub struct LogHandle {
    reload_handle: reload::Handle<LevelFilter, Registry>,
    level: Arc<RwLock<LevelFilter>>,
}

impl LogHandle {
    pub fn level(&self) -> LevelFilter {
        *self.level.read().unwrap_or_else(PoisonError::into_inner)
    }

    /// Remplace le niveau minimum.
    pub fn set_level(&self, level: LevelFilter) -> Result<()> {
        self.reload_handle
            .reload(level)
            .context("failed to reload log level filter")?;
        *self.level.write().unwrap_or_else(PoisonError::into_inner) = level;
        Ok(())
    }
}

/// Convertit un nom de niveau (`"info"`, `"WARN"`, `"off"`...).
pub fn parse_level(name: &str) -> Option<LevelFilter> {
    name.trim().parse::<LevelFilter>().ok()
}

/// Installe le subscriber global.
///
/// Échoue si un subscriber global est déjà installé.
pub fn init_logging(options: LoggingOptions) -> Result<LogHandle> {
    let (filter, reload_handle) = reload::Layer::new(options.min_level);

    // L'ordre compte : le filtre d'abord, la console ensuite
    let console = options.enable_console.then(|| {
        tracing_subscriber::fmt::layer()
            .with_target(true)
            .with_level(true)
            .with_ansi(true)
    });

    Registry::default()
        .with(filter)
        .with(console)
        .try_init()
        .context("a global tracing subscriber is already installed")?;

    Ok(LogHandle {
        reload_handle,
        level: Arc::new(RwLock::new(options.min_level)),
    })
}
