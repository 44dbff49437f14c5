use std::sync::{Arc, Mutex, PoisonError};

use progress_core::HandlerId;
use progress_logging::{progress_debug, progress_warn};

use crate::connection::ConnectionManager;
use crate::types::ConnectionEventKind;

#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct SessionTokens {
    pub access_token: Option<String>,
    pub id_token: Option<String>,
}

/// Supplies the current authenticated session. Implementations own token
/// refresh; the pipeline only reads.
pub trait SessionProvider: Send + Sync {
    fn get_session(&self) -> Option<SessionTokens>;
}

/// Session provider backed by an in-memory value that can be swapped when
/// the host refreshes tokens.
#[derive(Debug, Default)]
pub struct StaticSessionProvider {
    tokens: Mutex<Option<SessionTokens>>,
}

impl StaticSessionProvider {
    pub fn new(tokens: Option<SessionTokens>) -> Self {
        Self {
            tokens: Mutex::new(tokens),
        }
    }

    pub fn replace(&self, tokens: Option<SessionTokens>) {
        *self.tokens.lock().unwrap_or_else(PoisonError::into_inner) = tokens;
    }
}

impl SessionProvider for StaticSessionProvider {
    fn get_session(&self) -> Option<SessionTokens> {
        self.tokens
            .lock()
            .unwrap_or_else(PoisonError::into_inner)
            .clone()
    }
}

/// Sends the authorization handshake on every `Connected`, reading the
/// freshest id token at that moment.
///
/// The handler holds the manager weakly, so registering it does not keep the
/// connection alive.
pub fn authorize_on_connect(
    manager: &ConnectionManager,
    provider: Arc<dyn SessionProvider>,
) -> HandlerId {
    let weak = manager.downgrade();
    manager.on(ConnectionEventKind::Connected, move |_| {
        let Some(manager) = weak.upgrade() else {
            return;
        };
        match provider.get_session().and_then(|session| session.id_token) {
            Some(token) => {
                if manager.authenticate(&token) {
                    progress_debug!("Authorization sent");
                }
            }
            None => progress_warn!("Connected without a session id token; not authorizing"),
        }
    })
}
