use crate::service::OcrService;

/// Shared by every request; only the engine inside the service is stateful.
#[derive(Clone)]
pub struct ServerState {
    pub service: OcrService,
}
