//! Shared per-adapter lifecycle state
//!
//! Each connector owns one [`AdapterState`] behind a mutex: `init` fills it
//! (idempotently), `shutdown` drains it, every request reads a clone of the
//! client out of it. The mutex is never held across an await point.

use polyvox_core::error::{Error, Result};
use reqwest::Client;
use std::sync::Mutex;

#[derive(Default)]
pub(crate) struct AdapterState {
    pub initialized: bool,
    pub api_key: Option<String>,
    pub client: Option<Client>,
    pub streaming_client: Option<Client>,
    pub last_error: Option<Error>,
}

pub(crate) struct SharedState(Mutex<AdapterState>);

impl SharedState {
    pub fn new() -> Self {
        Self(Mutex::new(AdapterState::default()))
    }

    /// Run `setup` under the state lock unless already initialized.
    ///
    /// This is what makes adapter `init` idempotent: concurrent callers
    /// serialize here and only the first one builds clients. `setup` must
    /// not block on I/O (credential discovery and client construction are
    /// both synchronous).
    pub fn init_with<F>(&self, setup: F) -> Result<()>
    where
        F: FnOnce() -> Result<(Option<String>, Client, Client)>,
    {
        let mut state = self.0.lock().unwrap();
        if state.initialized {
            return Ok(());
        }
        match setup() {
            Ok((api_key, client, streaming_client)) => {
                state.api_key = api_key;
                state.client = Some(client);
                state.streaming_client = Some(streaming_client);
                state.initialized = true;
                Ok(())
            }
            Err(error) => {
                state.last_error = Some(error.clone());
                Err(error)
            }
        }
    }

    /// Clear everything `init` installed, including the recorded error.
    pub fn clear(&self) {
        let mut state = self.0.lock().unwrap();
        *state = AdapterState::default();
    }

    pub fn record_error(&self, error: &Error) {
        self.0.lock().unwrap().last_error = Some(error.clone());
    }

    pub fn last_error(&self) -> Option<Error> {
        self.0.lock().unwrap().last_error.clone()
    }

    /// Client + credential for a request, or NotInitialized.
    pub fn request_handles(
        &self,
        provider: &str,
        streaming: bool,
    ) -> Result<(Client, Option<String>)> {
        let state = self.0.lock().unwrap();
        if !state.initialized {
            return Err(Error::not_initialized(provider));
        }
        let client = if streaming {
            state.streaming_client.clone()
        } else {
            state.client.clone()
        };
        match client {
            Some(client) => Ok((client, state.api_key.clone())),
            None => Err(Error::not_initialized(provider)),
        }
    }
}
