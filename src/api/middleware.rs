//! # Registro de errores
//!
//! Utilidades para volcar al log la cadena completa de `source()` de un error.

use std::error::Error as StdError;

fn error_chain(error: &(dyn StdError + 'static)) -> Vec<String> {
    let mut chain = Vec::new();
    let mut current: Option<&(dyn StdError + 'static)> = Some(error);
    while let Some(err) = current {
        chain.push(err.to_string());
        current = err.source();
    }
    chain
}

/// Registra el error y todas sus causas con nivel `error`
pub fn log_error_chain<E>(error: &E, context: Option<&str>)
where
    E: StdError + 'static,
{
    let chain = error_chain(error);
    match context {
        Some(ctx) => tracing::error!(context = %ctx, error_chain = ?chain, "Error con cadena completa"),
        None => tracing::error!(error_chain = ?chain, "Error con cadena completa"),
    }
}

/// Extensión para `Result` que registra la cadena de errores sin consumirlo
///
/// ```ignore
/// repo.ping()
///     .await
///     .log_error_context("comprobando MongoDB")?;
/// ```
pub trait ErrorLogExt<T, E> {
    fn log_error_context(self, context: &str) -> Result<T, E>;

    /// Igual que `log_error_context` pero con nivel `warn`, para fallos
    /// recuperables
    fn log_warn_context(self, context: &str) -> Result<T, E>;
}

impl<T, E> ErrorLogExt<T, E> for Result<T, E>
where
    E: StdError + 'static,
{
    fn log_error_context(self, context: &str) -> Result<T, E> {
        if let Err(ref error) = self {
            log_error_chain(error, Some(context));
        }
        self
    }

    fn log_warn_context(self, context: &str) -> Result<T, E> {
        if let Err(ref error) = self {
            tracing::warn!(context = %context, error_chain = ?error_chain(error), "Error recuperable");
        }
        self
    }
}
