//! Control plane handlers for the gadget operations

use std::sync::Arc;

use async_trait::async_trait;
use axum::extract::State;
use axum::Json;
use serde::{Deserialize, Serialize};
use tokio::sync::{oneshot, Mutex};

use crate::error::Result;
use crate::gadget::{FunctionSet, GadgetCallback, Status, UsbSpeed};
use crate::state::AppState;

/// Default apply wait when the request does not bound it
const DEFAULT_TIMEOUT_MS: u64 = 5000;

#[derive(Serialize)]
pub struct HealthResponse {
    pub status: &'static str,
    pub version: &'static str,
}

/// GET /api/health
pub async fn health_check() -> Json<HealthResponse> {
    Json(HealthResponse {
        status: "ok",
        version: env!("CARGO_PKG_VERSION"),
    })
}

#[derive(Deserialize)]
pub struct SetFunctionsRequest {
    /// Function names to compose (empty for teardown)
    pub functions: Vec<String>,
    /// Milliseconds to wait for descriptor application
    pub timeout_ms: Option<u64>,
    /// Caller-chosen id echoed through the callback
    pub transaction_id: Option<i64>,
}

#[derive(Serialize)]
pub struct ApplyResponse {
    pub success: bool,
    pub functions: Vec<&'static str>,
    pub status: Status,
}

/// POST /api/usb/functions - replace the gadget composition
pub async fn set_functions(
    State(state): State<Arc<AppState>>,
    Json(req): Json<SetFunctionsRequest>,
) -> Result<Json<ApplyResponse>> {
    let functions = FunctionSet::from_names(req.functions.iter().map(String::as_str))?;
    let (callback, rx) = ChannelCallback::new();

    state
        .gadget
        .set_current_usb_functions(
            functions,
            Some(callback),
            req.timeout_ms.unwrap_or(DEFAULT_TIMEOUT_MS),
            req.transaction_id.unwrap_or(0),
        )
        .await?;

    let status = match rx.await {
        Ok(CallbackEvent::SetFunctions { status }) => status,
        _ => Status::Error,
    };
    Ok(Json(ApplyResponse {
        success: true,
        functions: functions.names(),
        status,
    }))
}

#[derive(Serialize)]
pub struct FunctionsResponse {
    pub success: bool,
    pub functions: Vec<&'static str>,
    pub applied: bool,
}

/// GET /api/usb/functions - current composition and applied state
pub async fn get_functions(State(state): State<Arc<AppState>>) -> Json<FunctionsResponse> {
    let (callback, rx) = ChannelCallback::new();
    state.gadget.get_current_usb_functions(Some(callback), 0).await;

    let (functions, status) = match rx.await {
        Ok(CallbackEvent::GetFunctions { functions, status }) => (functions, status),
        _ => (FunctionSet::NONE, Status::Error),
    };
    Json(FunctionsResponse {
        success: true,
        functions: functions.names(),
        applied: status == Status::FunctionsApplied,
    })
}

#[derive(Serialize)]
pub struct ResetResponse {
    pub success: bool,
}

/// POST /api/usb/reset - force the host to re-enumerate
pub async fn reset(State(state): State<Arc<AppState>>) -> Result<Json<ResetResponse>> {
    state.gadget.reset(None, 0).await?;
    Ok(Json(ResetResponse { success: true }))
}

#[derive(Serialize)]
pub struct SpeedResponse {
    pub success: bool,
    pub speed: UsbSpeed,
}

/// GET /api/usb/speed - negotiated connection speed
pub async fn get_speed(State(state): State<Arc<AppState>>) -> Json<SpeedResponse> {
    let speed = state.gadget.get_usb_speed(None, 0).await;
    Json(SpeedResponse {
        success: true,
        speed,
    })
}

/// Callback outcome forwarded to the waiting handler
pub enum CallbackEvent {
    SetFunctions {
        status: Status,
    },
    GetFunctions {
        functions: FunctionSet,
        status: Status,
    },
    Reset {
        status: Status,
    },
    Speed {
        speed: UsbSpeed,
    },
}

/// One-shot adapter from the callback interface to a channel.
///
/// The sender is consumed on first use, keeping the at-most-once callback
/// contract visible at the type level.
pub struct ChannelCallback {
    tx: Mutex<Option<oneshot::Sender<CallbackEvent>>>,
}

impl ChannelCallback {
    pub fn new() -> (Arc<Self>, oneshot::Receiver<CallbackEvent>) {
        let (tx, rx) = oneshot::channel();
        (
            Arc::new(Self {
                tx: Mutex::new(Some(tx)),
            }),
            rx,
        )
    }

    async fn send(&self, event: CallbackEvent) {
        if let Some(tx) = self.tx.lock().await.take() {
            let _ = tx.send(event);
        }
    }
}

#[async_trait]
impl GadgetCallback for ChannelCallback {
    async fn set_current_usb_functions_cb(
        &self,
        _functions: FunctionSet,
        status: Status,
        _transaction_id: i64,
    ) {
        self.send(CallbackEvent::SetFunctions { status }).await;
    }

    async fn get_current_usb_functions_cb(
        &self,
        functions: FunctionSet,
        status: Status,
        _transaction_id: i64,
    ) {
        self.send(CallbackEvent::GetFunctions { functions, status })
            .await;
    }

    async fn reset_cb(&self, status: Status, _transaction_id: i64) {
        self.send(CallbackEvent::Reset { status }).await;
    }

    async fn get_usb_speed_cb(&self, speed: UsbSpeed, _transaction_id: i64) {
        self.send(CallbackEvent::Speed { speed }).await;
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[tokio::test]
    async fn test_channel_callback_delivers_once() {
        let (cb, rx) = ChannelCallback::new();
        cb.reset_cb(Status::Success, 1).await;
        // A second invocation has nowhere to deliver and is dropped
        cb.reset_cb(Status::Error, 2).await;

        match rx.await {
            Ok(CallbackEvent::Reset { status }) => assert_eq!(status, Status::Success),
            _ => panic!("expected reset event"),
        }
    }

    #[tokio::test]
    async fn test_set_functions_event_carries_status() {
        let (cb, rx) = ChannelCallback::new();
        cb.set_current_usb_functions_cb(FunctionSet::ADB, Status::FunctionsApplied, 1)
            .await;
        match rx.await {
            Ok(CallbackEvent::SetFunctions { status }) => {
                assert_eq!(status, Status::FunctionsApplied)
            }
            _ => panic!("expected set event"),
        }
    }

    #[tokio::test]
    async fn test_speed_event() {
        let (cb, rx) = ChannelCallback::new();
        cb.get_usb_speed_cb(UsbSpeed::SuperSpeed, 1).await;
        match rx.await {
            Ok(CallbackEvent::Speed { speed }) => assert_eq!(speed, UsbSpeed::SuperSpeed),
            _ => panic!("expected speed event"),
        }
    }
}
