use std::sync::Arc;

use crate::config::GadgetConfig;
use crate::gadget::UsbGadgetService;

/// Application-wide state shared across handlers
pub struct AppState {
    /// The single gadget service instance
    pub gadget: Arc<UsbGadgetService>,
    /// Effective configuration
    pub config: GadgetConfig,
}

impl AppState {
    pub fn new(config: GadgetConfig) -> Self {
        Self {
            gadget: Arc::new(UsbGadgetService::new(config.clone())),
            config,
        }
    }
}
