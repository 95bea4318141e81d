//! USB gadget composition and lifecycle
//!
//! The configfs gadget tree is composed by linking function directories into
//! a configuration, writing the matching USB identity, and finally writing
//! the UDC name to the pull-up file. Descriptor-bearing (FunctionFS)
//! functions delay that last step until their userspace daemons have written
//! descriptors; the monitor session covers that window.
//!
//! ```text
//! UsbGadgetService (apply lock, four operations)
//!     ├── VidPidTable      (composition -> USB identity)
//!     ├── function table   (fixed link order, ffs instances)
//!     ├── MonitorSession   (descriptor watch, pull-up, applied signal)
//!     └── aux adjustments  (IRQ affinity, accessory current limit)
//! ```

pub mod aux_adjust;
pub mod configfs;
pub mod function;
pub mod monitor;
pub mod service;
pub mod speed;
pub mod vidpid;

pub use function::FunctionSet;
pub use monitor::{MonitorSession, MonitorState};
pub use service::{GadgetCallback, Status, UsbGadgetService};
pub use speed::UsbSpeed;
pub use vidpid::{VidPid, VidPidTable};
