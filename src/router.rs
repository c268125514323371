//! # Health-Aware Provider Routing
//!
//! [`ProviderRouter`] presents one [`SpeechToText`] over a primary and a
//! fallback backend. The backend is chosen once, when a session starts:
//!
//! | Health at `start_streaming` | Backend  |
//! |-----------------------------|----------|
//! | Healthy, Degraded           | primary  |
//! | Unhealthy                   | fallback |
//!
//! A health change observed during a session is logged and applies to the
//! next session. Audio already flowing is never moved between backends.

use crate::error::{HarnessError, Result};
use crate::health::HealthStatus;
use crate::services::{AudioFormat, ServiceStream, SpeechToText, SttResult};
use async_trait::async_trait;
use tokio::sync::watch;
use tracing::{debug, info, warn};

/// Which backend serves the current session
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Route {
    Primary,
    Fallback,
}

impl Route {
    pub fn for_status(status: HealthStatus) -> Self {
        if status.is_usable() {
            Route::Primary
        } else {
            Route::Fallback
        }
    }
}

struct Backends {
    primary: Box<dyn SpeechToText>,
    fallback: Box<dyn SpeechToText>,
    health: watch::Receiver<HealthStatus>,
}

impl Backends {
    fn get(&mut self, route: Route) -> &mut Box<dyn SpeechToText> {
        match route {
            Route::Primary => &mut self.primary,
            Route::Fallback => &mut self.fallback,
        }
    }
}

/// Speech-to-text router selecting a backend per session
#[derive(Default)]
pub struct ProviderRouter {
    backends: Option<Backends>,
    active: Option<Route>,
}

impl ProviderRouter {
    pub fn new() -> Self {
        Self::default()
    }

    /// Install backends and the health feed for the primary
    pub fn configure(
        &mut self,
        primary: Box<dyn SpeechToText>,
        fallback: Box<dyn SpeechToText>,
        health: watch::Receiver<HealthStatus>,
    ) {
        debug!(
            primary = %primary.identifier(),
            fallback = %fallback.identifier(),
            "Provider router configured"
        );
        self.backends = Some(Backends {
            primary,
            fallback,
            health,
        });
        self.active = None;
    }

    pub fn is_configured(&self) -> bool {
        self.backends.is_some()
    }

    /// Route of the session in progress, if any
    pub fn active_route(&self) -> Option<Route> {
        self.active
    }

    /// Identifier of the backend serving the current session
    pub fn active_provider_identifier(&self) -> Option<String> {
        let route = self.active?;
        let backends = self.backends.as_ref()?;
        Some(match route {
            Route::Primary => backends.primary.identifier(),
            Route::Fallback => backends.fallback.identifier(),
        })
    }

    fn backends_mut(&mut self) -> Result<&mut Backends> {
        self.backends.as_mut().ok_or(HarnessError::NotConfigured {
            component: "ProviderRouter",
        })
    }

    fn active_backend(&mut self) -> Result<&mut Box<dyn SpeechToText>> {
        let route = self
            .active
            .ok_or_else(|| HarnessError::execution("stt", "no active session"))?;
        Ok(self.backends_mut()?.get(route))
    }
}

#[async_trait]
impl SpeechToText for ProviderRouter {
    async fn start_streaming(&mut self, format: AudioFormat) -> Result<ServiceStream<SttResult>> {
        if self.active.is_some() {
            return Err(HarnessError::execution("stt", "session already active"));
        }
        let backends = self.backends_mut()?;
        let status = *backends.health.borrow_and_update();
        let route = Route::for_status(status);

        if route == Route::Fallback {
            warn!(%status, fallback = %backends.fallback.identifier(), "Routing session to fallback");
        } else {
            debug!(%status, primary = %backends.primary.identifier(), "Routing session to primary");
        }

        let stream = backends.get(route).start_streaming(format).await?;
        self.active = Some(route);
        Ok(stream)
    }

    async fn send_audio(&mut self, chunk: &[u8]) -> Result<()> {
        let route = self.active;
        let backends = self.backends_mut()?;
        if backends.health.has_changed().unwrap_or(false) {
            let status = *backends.health.borrow_and_update();
            info!(
                %status,
                route = ?route,
                "Health changed mid-session; applies from the next session"
            );
        }
        self.active_backend()?.send_audio(chunk).await
    }

    async fn stop_streaming(&mut self) -> Result<()> {
        let result = self.active_backend()?.stop_streaming().await;
        self.active = None;
        result
    }

    async fn cancel_streaming(&mut self) -> Result<()> {
        if self.active.is_none() {
            return Ok(());
        }
        let result = self.active_backend()?.cancel_streaming().await;
        self.active = None;
        result
    }

    fn identifier(&self) -> String {
        match &self.backends {
            Some(b) => format!(
                "router({} -> {})",
                b.primary.identifier(),
                b.fallback.identifier()
            ),
            None => "router(unconfigured)".to_string(),
        }
    }
}
