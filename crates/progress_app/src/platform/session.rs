use progress_engine::{SessionProvider, SessionTokens};

use super::config::{ACCESS_TOKEN, ID_TOKEN};

type Lookup = Box<dyn Fn(&str) -> Option<String> + Send + Sync>;

/// Reads tokens on every call so a token rotated by an external refresher
/// is picked up on the next connect.
pub(crate) struct EnvSessionProvider {
    lookup: Lookup,
}

impl EnvSessionProvider {
    pub(crate) fn from_env() -> Self {
        Self::with_lookup(|key| std::env::var(key).ok())
    }

    pub(crate) fn with_lookup(
        lookup: impl Fn(&str) -> Option<String> + Send + Sync + 'static,
    ) -> Self {
        Self {
            lookup: Box::new(lookup),
        }
    }

    fn read(&self, key: &str) -> Option<String> {
        (self.lookup)(key)
            .map(|value| value.trim().to_string())
            .filter(|value| !value.is_empty())
    }
}

impl SessionProvider for EnvSessionProvider {
    fn get_session(&self) -> Option<SessionTokens> {
        let tokens = SessionTokens {
            access_token: self.read(ACCESS_TOKEN),
            id_token: self.read(ID_TOKEN),
        };
        if tokens.access_token.is_none() && tokens.id_token.is_none() {
            return None;
        }
        Some(tokens)
    }
}
