//! External API adapters.
//!
//! - [`scripted::ScriptedApi`] replays a `>>` / `<<` transcript (`--mock`).
//! - [`process::ProcessApi`] talks to a helper program over stdio.
//!
//! Both hand out the receiving end of the event channel at construction; the
//! listener owns it for the life of the process.

pub mod process;
pub mod scripted;

use std::sync::Arc;

use thiserror::Error;

use crate::application::{EventReceiver, ExternalApi};
use crate::domain::BackendConfig;

pub use process::ProcessApi;
pub use scripted::{ScriptError, ScriptedApi};

/// The configured backend could not be started.
#[derive(Debug, Error)]
pub enum BackendError {
    #[error(transparent)]
    Script(#[from] ScriptError),

    #[error("cannot start external API helper {program}: {source}")]
    Spawn {
        program: String,
        #[source]
        source: std::io::Error,
    },
}

/// Starts the adapter selected by `backend`.
///
/// Must be called from within a Tokio runtime.
///
/// # Errors
///
/// [`BackendError`] if the transcript is unusable or the helper cannot be
/// spawned.
pub fn start(
    backend: &BackendConfig,
    capacity: usize,
) -> Result<(Arc<dyn ExternalApi>, EventReceiver), BackendError> {
    match backend {
        BackendConfig::Scripted { script } => {
            let (api, events) = ScriptedApi::load(script, capacity)?;
            tracing::info!("using scripted external API from {}", script.display());
            Ok((Arc::new(api), events))
        }
        BackendConfig::Process { program, args } => {
            let (api, events) =
                ProcessApi::spawn(program, args, capacity).map_err(|source| BackendError::Spawn {
                    program: program.clone(),
                    source,
                })?;
            Ok((Arc::new(api), events))
        }
    }
}

// ── Tests ─────────────────────────────────────────────────────────────────────

#[cfg(test)]
mod tests {
    use super::*;
    use std::path::PathBuf;

    #[tokio::test]
    async fn test_missing_transcript_is_script_error() {
        let backend = BackendConfig::Scripted {
            script: PathBuf::from("/nonexistent/login.mock"),
        };
        let err = start(&backend, 8).err().unwrap();
        assert!(matches!(err, BackendError::Script(ScriptError::Io { .. })));
    }

    #[tokio::test]
    async fn test_missing_helper_is_spawn_error() {
        let backend = BackendConfig::Process {
            program: "/nonexistent/callbridge-helper".into(),
            args: Vec::new(),
        };
        let err = start(&backend, 8).err().unwrap();
        assert!(err.to_string().contains("/nonexistent/callbridge-helper"));
    }
}
