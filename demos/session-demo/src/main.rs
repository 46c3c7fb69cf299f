use std::sync::Arc;
use std::time::Duration;

use rallypoint::prelude::*;
use rallypoint::token::{Claims, encode_unsigned};

// ---------------------------------------------------------------------------
// Stub API
// ---------------------------------------------------------------------------

/// Accepts any email with the password `rallypoint`. Tokens are unsigned
/// and live for ten minutes.
struct DemoApi;

impl DemoApi {
    fn token_for(user_id: u64) -> Result<String, ApiError> {
        encode_unsigned(&Claims {
            exp: Some(chrono::Utc::now().timestamp() + 600),
            sub: Some(user_id.to_string()),
            permissions: ["events.read".to_string()].into(),
            ..Claims::default()
        })
        .map_err(|e| ApiError::new(e.to_string()))
    }
}

impl AuthApi for DemoApi {
    async fn login(&self, request: &LoginRequest) -> Result<LoginResponse, ApiError> {
        if request.password != "rallypoint" {
            return Err(ApiError::with_status(401, "Invalid email or password"));
        }
        Ok(LoginResponse {
            user: UserProfile::new(7)
                .with_email(request.email.clone())
                .with_name("Sam", "Okafor")
                .with_permissions(["events.read"])
                .with_roles(["volunteer"]),
            token: Self::token_for(7)?,
            refresh_token: Some("demo-refresh".into()),
        })
    }

    async fn refresh(&self, _refresh_token: &str) -> Result<String, ApiError> {
        Self::token_for(7)
    }
}

// ---------------------------------------------------------------------------
// Demo
// ---------------------------------------------------------------------------

fn demo_config() -> EngineConfig {
    EngineConfig {
        tracker: TrackerConfig {
            idle_timeout: Duration::from_secs(3),
            check_interval: Duration::from_secs(1),
            ..TrackerConfig::default()
        },
        ..EngineConfig::default()
    }
}

fn build_engine(storage: Arc<dyn KeyValueStorage>, bus: Arc<EventBus>) -> SessionEngine {
    let engine = SessionEngine::builder()
        .config(demo_config())
        .storage(storage)
        .interaction_source(bus)
        .build();
    engine.store().subscribe(|event| tracing::info!(?event, "session event"));
    engine
}

#[tokio::main]
async fn main() -> Result<(), Box<dyn std::error::Error>> {
    rallypoint::telemetry::init_tracing();

    let dir = std::env::temp_dir().join("rallypoint-session-demo");
    let storage = Arc::new(FileStorage::open(&dir)?);
    tracing::info!(dir = %dir.display(), "persisting session");

    let bus = Arc::new(EventBus::new());
    let engine = build_engine(storage, bus.clone());
    let api = DemoApi;

    if let Err(e) = engine.auth().sign_in(&api, "sam@example.org", "wrong").await {
        tracing::info!(error = %e, "first attempt rejected");
    }
    engine.auth().sign_in(&api, "sam@example.org", "rallypoint").await?;

    let events = Requirement::Permission("events.read".into());
    let billing = Requirement::Permission("billing.manage".into());
    tracing::info!(decision = ?engine.guard().check(&events, "/events"), "visit /events");
    tracing::info!(decision = ?engine.guard().check(&billing, "/billing"), "visit /billing");

    // Keep busy for a while; every interaction pushes the deadline back.
    for _ in 0..4 {
        tokio::time::sleep(Duration::from_secs(1)).await;
        bus.emit(InteractionKind::KeyDown);
    }
    tracing::info!(signed_in = engine.auth().is_authenticated(), "after activity");

    // Then walk away.
    tokio::time::sleep(Duration::from_secs(5)).await;
    tracing::info!(
        signed_in = engine.auth().is_authenticated(),
        reason = ?engine.auth().last_logout_reason(),
        "after idling"
    );

    engine.shutdown();
    Ok(())
}

#[cfg(test)]
mod tests {
    use super::*;

    #[tokio::test(start_paused = true)]
    async fn test_demo_flow_times_out_after_idling() {
        let bus = Arc::new(EventBus::new());
        let engine = build_engine(Arc::new(MemoryStorage::new()), bus.clone());

        engine
            .auth()
            .sign_in(&DemoApi, "sam@example.org", "rallypoint")
            .await
            .unwrap();
        tokio::time::sleep(Duration::from_secs(2)).await;
        bus.emit(InteractionKind::Click);
        tokio::time::sleep(Duration::from_secs(2)).await;
        assert!(engine.auth().is_authenticated());

        tokio::time::sleep(Duration::from_secs(5)).await;
        assert!(!engine.auth().is_authenticated());
        assert_eq!(engine.auth().last_logout_reason(), Some(LogoutReason::IdleTimeout));
    }

    #[tokio::test]
    async fn test_demo_api_rejects_wrong_password() {
        let engine = build_engine(Arc::new(MemoryStorage::new()), Arc::new(EventBus::new()));
        let err = engine
            .auth()
            .sign_in(&DemoApi, "sam@example.org", "nope")
            .await
            .unwrap_err();
        assert_eq!(err.to_string(), "Invalid email or password");
    }
}
