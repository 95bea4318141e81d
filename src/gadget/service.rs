//! USB gadget service - apply sequencing and the four gadget operations
//!
//! One service instance owns the configfs tree, the composition/identity
//! table, and at most one monitor session. A single mutex serializes every
//! apply and reset end-to-end: teardown, validation, linking, and the
//! bounded wait all happen under it, so a new request always observes the
//! previous one fully applied or fully torn down. State queries read atomics
//! outside the lock and are eventually consistent with a running apply.

use std::path::PathBuf;
use std::sync::atomic::{AtomicBool, AtomicU64, Ordering};
use std::sync::Arc;
use std::time::Duration;

use async_trait::async_trait;
use serde::Serialize;
use tokio::sync::Mutex;
use tracing::{debug, error, info, warn};

use super::aux_adjust;
use super::configfs::{
    create_symlink, list_function_links, read_file, remove_link, write_file, PULLUP_NONE,
};
use super::function::{vendor_extras, FunctionSet, ADB_FUNCTION, GENERIC_FUNCTIONS, NCM_FUNCTION};
use super::monitor::MonitorSession;
use super::speed::UsbSpeed;
use super::vidpid::{validate_and_set_vid_pid, VidPidTable};
use crate::config::GadgetConfig;
use crate::error::{GadgetError, Result};

/// Time the gadget stays pulled down so the host senses the disconnect
const DISCONNECT_WAIT: Duration = Duration::from_millis(100);

/// Operation status reported through callbacks
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
#[serde(rename_all = "SCREAMING_SNAKE_CASE")]
pub enum Status {
    Success,
    Error,
    FunctionsApplied,
    FunctionsNotApplied,
    ConfigurationNotSupported,
}

/// Completion interface for the gadget operations.
///
/// Every operation invokes its callback at most once, on success and on
/// every failure path alike.
#[async_trait]
pub trait GadgetCallback: Send + Sync {
    async fn set_current_usb_functions_cb(
        &self,
        functions: FunctionSet,
        status: Status,
        transaction_id: i64,
    );

    async fn get_current_usb_functions_cb(
        &self,
        functions: FunctionSet,
        status: Status,
        transaction_id: i64,
    );

    async fn reset_cb(&self, status: Status, transaction_id: i64);

    async fn get_usb_speed_cb(&self, speed: UsbSpeed, transaction_id: i64);
}

/// Monitor ownership, guarded by the apply lock
#[derive(Default)]
struct ApplyGuarded {
    monitor: Option<MonitorSession>,
}

/// Single-instance USB gadget service
pub struct UsbGadgetService {
    config: GadgetConfig,
    vidpid: VidPidTable,
    /// Last requested function set, readable without the apply lock
    current_functions: AtomicU64,
    /// Set from the monitor task once descriptors are live
    applied: Arc<AtomicBool>,
    apply_lock: Mutex<ApplyGuarded>,
}

impl UsbGadgetService {
    pub fn new(config: GadgetConfig) -> Self {
        let vidpid = VidPidTable::new(config.configfs.adb_debug_pid);
        Self {
            config,
            vidpid,
            current_functions: AtomicU64::new(0),
            applied: Arc::new(AtomicBool::new(false)),
            apply_lock: Mutex::new(ApplyGuarded::default()),
        }
    }

    /// Last requested function set (eventually consistent during an apply)
    pub fn current_functions(&self) -> FunctionSet {
        FunctionSet(self.current_functions.load(Ordering::Acquire))
    }

    /// Whether the current function set has live descriptors
    pub fn is_applied(&self) -> bool {
        self.applied.load(Ordering::Acquire)
    }

    /// Replace the gadget composition with `functions`.
    ///
    /// Tears down the previous composition first, then validates, links in
    /// fixed order, and waits (bounded by `timeout_ms`) for descriptor-
    /// bearing functions to come up. The callback fires exactly once with
    /// the outcome before this returns.
    pub async fn set_current_usb_functions(
        &self,
        functions: FunctionSet,
        callback: Option<Arc<dyn GadgetCallback>>,
        timeout_ms: u64,
        transaction_id: i64,
    ) -> Result<()> {
        let mut guard = self.apply_lock.lock().await;
        info!("setCurrentUsbFunctions [{}]", functions);

        self.current_functions.store(functions.0, Ordering::Release);
        self.applied.store(false, Ordering::Release);

        if let Err(e) = self.tear_down_gadget(&mut guard).await {
            error!("Teardown failed: {}", e);
            self.notify_set(&callback, functions, Status::Error, transaction_id)
                .await;
            return Err(e);
        }

        tokio::time::sleep(DISCONNECT_WAIT).await;

        if functions.is_empty() {
            // Reset the saving flag when no functions are enabled
            if let Err(e) = write_file(&self.config.configfs.saving_path, "0") {
                warn!("Failed to reset saving state: {}", e);
            }
            self.notify_set(&callback, functions, Status::Success, transaction_id)
                .await;
            return Ok(());
        }

        let mapping = match validate_and_set_vid_pid(&self.vidpid, &self.config.configfs, functions)
        {
            Ok(mapping) => mapping,
            Err(e) => {
                let status = match &e {
                    GadgetError::NotSupported(_) => Status::ConfigurationNotSupported,
                    _ => Status::Error,
                };
                self.notify_set(&callback, functions, status, transaction_id)
                    .await;
                return Err(e);
            }
        };
        debug!(
            "Resolved [{}] to {:04x}:{:04x}",
            functions, mapping.vendor_id, mapping.product_id
        );

        let ffs_instances = match self.link_functions(functions) {
            Ok(instances) => instances,
            Err(e) => {
                error!("Function linking failed: {}", e);
                self.notify_set(&callback, functions, Status::Error, transaction_id)
                    .await;
                return Err(e);
            }
        };

        let cfg = &self.config.configfs;
        if ffs_instances.is_empty() {
            // No descriptor-bearing function: nothing asynchronous to wait
            // for, pull up right away.
            if let Err(e) = write_file(&cfg.pullup_path(), &cfg.udc) {
                error!("Gadget cannot be pulled up: {}", e);
                self.notify_set(&callback, functions, Status::Error, transaction_id)
                    .await;
                return Err(e);
            }
            self.applied.store(true, Ordering::Release);
            self.notify_set(&callback, functions, Status::Success, transaction_id)
                .await;
            self.run_aux_adjustments(functions);
            return Ok(());
        }

        let ffs_dirs: Vec<PathBuf> = ffs_instances
            .iter()
            .map(|inst| cfg.ffs_mount(inst))
            .collect();
        let applied = Arc::clone(&self.applied);
        let session = MonitorSession::start(
            &self.config.monitor,
            ffs_dirs,
            cfg.pullup_path(),
            cfg.udc.clone(),
            Arc::new(move |ok| applied.store(ok, Ordering::Release)),
        );

        let pulled_up = session
            .wait_applied(Duration::from_millis(timeout_ms))
            .await;
        // The session keeps running either way; a timed-out one is stopped
        // by the next call's teardown.
        guard.monitor = Some(session);

        if pulled_up {
            self.notify_set(&callback, functions, Status::Success, transaction_id)
                .await;
            self.run_aux_adjustments(functions);
            info!("setCurrentUsbFunctions [{}] applied", functions);
            Ok(())
        } else {
            self.notify_set(&callback, functions, Status::Error, transaction_id)
                .await;
            Err(GadgetError::ApplyTimeout)
        }
    }

    /// Report the last requested set and whether it has been applied.
    /// Reads state without the apply lock.
    pub async fn get_current_usb_functions(
        &self,
        callback: Option<Arc<dyn GadgetCallback>>,
        transaction_id: i64,
    ) {
        let functions = self.current_functions();
        let status = if self.is_applied() {
            Status::FunctionsApplied
        } else {
            Status::FunctionsNotApplied
        };
        if let Some(cb) = &callback {
            cb.get_current_usb_functions_cb(functions, status, transaction_id)
                .await;
        }
    }

    /// Pull the gadget down and back up to force the host to re-enumerate
    pub async fn reset(
        &self,
        callback: Option<Arc<dyn GadgetCallback>>,
        transaction_id: i64,
    ) -> Result<()> {
        let _guard = self.apply_lock.lock().await;
        info!("USB Gadget reset");
        let cfg = &self.config.configfs;

        if let Err(e) = write_file(&cfg.pullup_path(), PULLUP_NONE) {
            error!("Gadget cannot be pulled down: {}", e);
            if let Some(cb) = &callback {
                cb.reset_cb(Status::Error, transaction_id).await;
            }
            return Err(e);
        }

        tokio::time::sleep(DISCONNECT_WAIT).await;

        if let Err(e) = write_file(&cfg.pullup_path(), &cfg.udc) {
            error!("Gadget cannot be pulled up: {}", e);
            if let Some(cb) = &callback {
                cb.reset_cb(Status::Error, transaction_id).await;
            }
            return Err(e);
        }

        if let Some(cb) = &callback {
            cb.reset_cb(Status::Success, transaction_id).await;
        }
        Ok(())
    }

    /// Read the negotiated speed from the UDC
    pub async fn get_usb_speed(
        &self,
        callback: Option<Arc<dyn GadgetCallback>>,
        transaction_id: i64,
    ) -> UsbSpeed {
        let speed = match read_file(&self.config.configfs.speed_path()) {
            Ok(raw) => {
                info!("current USB speed is {}", raw);
                UsbSpeed::from_sysfs(&raw)
            }
            Err(e) => {
                error!("Failed to read current speed: {}", e);
                UsbSpeed::Unknown
            }
        };

        if let Some(cb) = &callback {
            cb.get_usb_speed_cb(speed, transaction_id).await;
        }
        speed
    }

    /// Stop the monitor and unlink every composed function.
    ///
    /// Idempotent: a gadget with no links and no running monitor tears down
    /// trivially. The gadget is always left pulled down.
    async fn tear_down_gadget(&self, guard: &mut ApplyGuarded) -> Result<()> {
        if let Some(mut session) = guard.monitor.take() {
            session.reset().await;
        } else {
            debug!("Monitor not running");
        }

        let cfg = &self.config.configfs;
        // The attribute may reject the write when the gadget is already
        // down; that is not a teardown failure.
        if let Err(e) = write_file(&cfg.pullup_path(), PULLUP_NONE) {
            warn!("Gadget cannot be pulled down: {}", e);
        }

        for link in list_function_links(&cfg.config_path())? {
            remove_link(&link)?;
        }
        Ok(())
    }

    /// Link the composition in its fixed order: generic functions, vendor
    /// extras, ADB, NCM. Returns the ffs instances the monitor must watch.
    ///
    /// Atomically fails: any link error removes the links created so far,
    /// leaving the gadget pulled down with no partial composition.
    fn link_functions(&self, functions: FunctionSet) -> Result<Vec<&'static str>> {
        let cfg = &self.config.configfs;
        let functions_path = cfg.functions_path();
        let config_path = cfg.config_path();

        let mut composition: Vec<(&'static str, Option<&'static str>)> = Vec::new();
        for entry in GENERIC_FUNCTIONS {
            if functions.contains(entry.flag) {
                composition.push((entry.dir, entry.ffs_instance));
            }
        }
        for extra in vendor_extras(&cfg.vendor_extra) {
            composition.push((extra, None));
        }
        if functions.contains(FunctionSet::ADB) {
            composition.push((ADB_FUNCTION.dir, ADB_FUNCTION.ffs_instance));
        }
        if functions.contains(FunctionSet::NCM) {
            composition.push((NCM_FUNCTION.dir, NCM_FUNCTION.ffs_instance));
        }

        let mut created: Vec<PathBuf> = Vec::new();
        let mut ffs_instances = Vec::new();
        for (index, (dir, ffs_instance)) in composition.iter().enumerate() {
            let src = functions_path.join(dir);
            let dest = config_path.join(format!("function{index}"));
            if let Err(e) = create_symlink(&src, &dest) {
                for link in &created {
                    let _ = remove_link(link);
                }
                return Err(e);
            }
            debug!("Linked {} as function{}", dir, index);
            created.push(dest);
            if let Some(instance) = ffs_instance {
                ffs_instances.push(*instance);
            }
        }
        Ok(ffs_instances)
    }

    fn run_aux_adjustments(&self, functions: FunctionSet) {
        if let Err(e) = aux_adjust::steer_irq_affinity(&self.config.irq, functions.has_tethering())
        {
            warn!("IRQ affinity steering skipped: {}", e);
        }
        if functions.contains(FunctionSet::ACCESSORY) {
            if let Err(e) = aux_adjust::limit_accessory_current(&self.config.power) {
                warn!("Accessory current limiting skipped: {}", e);
            }
        }
    }

    async fn notify_set(
        &self,
        callback: &Option<Arc<dyn GadgetCallback>>,
        functions: FunctionSet,
        status: Status,
        transaction_id: i64,
    ) {
        if let Some(cb) = callback {
            cb.set_current_usb_functions_cb(functions, status, transaction_id)
                .await;
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::config::{ConfigFsConfig, MonitorConfig};
    use std::sync::Mutex as StdMutex;
    use tempfile::TempDir;

    /// Callback recording every invocation for assertion
    #[derive(Default)]
    struct RecordingCallback {
        set_calls: StdMutex<Vec<(FunctionSet, Status, i64)>>,
        get_calls: StdMutex<Vec<(FunctionSet, Status, i64)>>,
        reset_calls: StdMutex<Vec<(Status, i64)>>,
        speed_calls: StdMutex<Vec<(UsbSpeed, i64)>>,
    }

    #[async_trait]
    impl GadgetCallback for RecordingCallback {
        async fn set_current_usb_functions_cb(
            &self,
            functions: FunctionSet,
            status: Status,
            transaction_id: i64,
        ) {
            self.set_calls
                .lock()
                .unwrap()
                .push((functions, status, transaction_id));
        }

        async fn get_current_usb_functions_cb(
            &self,
            functions: FunctionSet,
            status: Status,
            transaction_id: i64,
        ) {
            self.get_calls
                .lock()
                .unwrap()
                .push((functions, status, transaction_id));
        }

        async fn reset_cb(&self, status: Status, transaction_id: i64) {
            self.reset_calls.lock().unwrap().push((status, transaction_id));
        }

        async fn get_usb_speed_cb(&self, speed: UsbSpeed, transaction_id: i64) {
            self.speed_calls.lock().unwrap().push((speed, transaction_id));
        }
    }

    struct FakeBoard {
        _dir: TempDir,
        config: GadgetConfig,
    }

    impl FakeBoard {
        fn new() -> Self {
            let dir = TempDir::new().unwrap();
            let root = dir.path();

            let configfs = ConfigFsConfig {
                configfs_root: root.join("usb_gadget"),
                udc: "test.udc".to_string(),
                udc_class_root: root.join("udc"),
                ffs_root: root.join("usb-ffs"),
                saving_path: root.join("saving"),
                ..ConfigFsConfig::default()
            };

            std::fs::create_dir_all(configfs.config_path()).unwrap();
            std::fs::create_dir_all(configfs.functions_path()).unwrap();
            std::fs::write(configfs.pullup_path(), "").unwrap();
            std::fs::write(configfs.id_vendor_path(), "").unwrap();
            std::fs::write(configfs.id_product_path(), "").unwrap();
            std::fs::write(&configfs.saving_path, "").unwrap();
            for inst in ["adb", "mtp", "ptp"] {
                std::fs::create_dir_all(configfs.ffs_mount(inst)).unwrap();
            }
            std::fs::create_dir_all(configfs.speed_path().parent().unwrap()).unwrap();
            std::fs::write(configfs.speed_path(), "high-speed\n").unwrap();

            let config = GadgetConfig {
                configfs,
                monitor: MonitorConfig {
                    poll_start_ms: 2,
                    poll_cap_ms: 10,
                    settle_ms: 5,
                },
                ..GadgetConfig::default()
            };

            Self { _dir: dir, config }
        }

        fn service(&self) -> UsbGadgetService {
            UsbGadgetService::new(self.config.clone())
        }

        fn pullup(&self) -> String {
            std::fs::read_to_string(self.config.configfs.pullup_path()).unwrap()
        }

        fn links(&self) -> Vec<PathBuf> {
            list_function_links(&self.config.configfs.config_path()).unwrap()
        }

        fn write_descriptors(&self, instance: &str) {
            let mount = self.config.configfs.ffs_mount(instance);
            std::fs::write(mount.join("ep0"), "").unwrap();
            std::fs::write(mount.join("ep1"), "").unwrap();
        }
    }

    #[tokio::test]
    async fn test_none_tears_down_and_reports_success() {
        let board = FakeBoard::new();
        let service = board.service();
        let cb = Arc::new(RecordingCallback::default());

        service
            .set_current_usb_functions(FunctionSet::NONE, Some(cb.clone()), 1000, 7)
            .await
            .unwrap();

        let calls = cb.set_calls.lock().unwrap();
        assert_eq!(calls.as_slice(), [(FunctionSet::NONE, Status::Success, 7)]);
        assert_eq!(board.pullup(), "none\n");
        assert!(board.links().is_empty());
        assert!(!service.is_applied());
        // Saving flag reset on the zero-function path
        assert_eq!(
            std::fs::read_to_string(&board.config.configfs.saving_path).unwrap(),
            "0\n"
        );
    }

    #[tokio::test]
    async fn test_none_without_callback_still_requires_teardown() {
        let board = FakeBoard::new();
        let service = board.service();
        service
            .set_current_usb_functions(FunctionSet::NONE, None, 1000, 1)
            .await
            .unwrap();
        assert_eq!(board.pullup(), "none\n");
    }

    #[tokio::test]
    async fn test_unsupported_combination_rejected_before_linking() {
        let board = FakeBoard::new();
        let service = board.service();
        let cb = Arc::new(RecordingCallback::default());

        let set = FunctionSet::MTP.union(FunctionSet::PTP);
        let err = service
            .set_current_usb_functions(set, Some(cb.clone()), 1000, 2)
            .await
            .unwrap_err();

        assert!(matches!(err, GadgetError::NotSupported(_)));
        let calls = cb.set_calls.lock().unwrap();
        assert_eq!(
            calls.as_slice(),
            [(set, Status::ConfigurationNotSupported, 2)]
        );
        assert!(board.links().is_empty());
        assert_eq!(board.pullup(), "none\n");
    }

    #[tokio::test]
    async fn test_non_ffs_composition_pulls_up_immediately() {
        let board = FakeBoard::new();
        let service = board.service();
        let cb = Arc::new(RecordingCallback::default());

        service
            .set_current_usb_functions(FunctionSet::MIDI, Some(cb.clone()), 1000, 3)
            .await
            .unwrap();

        assert_eq!(board.pullup(), "test.udc\n");
        assert!(service.is_applied());
        let links = board.links();
        assert_eq!(links.len(), 1);
        assert!(links[0].ends_with("function0"));
        let calls = cb.set_calls.lock().unwrap();
        assert_eq!(calls.as_slice(), [(FunctionSet::MIDI, Status::Success, 3)]);
    }

    #[tokio::test]
    async fn test_ffs_composition_applies_once_descriptors_land() {
        let board = FakeBoard::new();
        let service = board.service();
        let cb = Arc::new(RecordingCallback::default());
        board.write_descriptors("adb");

        service
            .set_current_usb_functions(FunctionSet::ADB, Some(cb.clone()), 2000, 4)
            .await
            .unwrap();

        assert_eq!(board.pullup(), "test.udc\n");
        assert!(service.is_applied());
        assert_eq!(
            std::fs::read_to_string(board.config.configfs.id_product_path()).unwrap(),
            "0xff08\n"
        );
        let calls = cb.set_calls.lock().unwrap();
        assert_eq!(calls.as_slice(), [(FunctionSet::ADB, Status::Success, 4)]);
    }

    #[tokio::test]
    async fn test_apply_timeout_reports_error_once_and_stays_down() {
        let board = FakeBoard::new();
        let service = board.service();
        let cb = Arc::new(RecordingCallback::default());
        // No descriptors written: the monitor can never satisfy the wait

        let err = service
            .set_current_usb_functions(FunctionSet::ADB, Some(cb.clone()), 50, 5)
            .await
            .unwrap_err();

        assert!(matches!(err, GadgetError::ApplyTimeout));
        assert_eq!(board.pullup(), "none\n");
        assert!(!service.is_applied());
        {
            let calls = cb.set_calls.lock().unwrap();
            assert_eq!(calls.as_slice(), [(FunctionSet::ADB, Status::Error, 5)]);
        }

        // The next call's teardown stops the stale monitor and recovers
        service
            .set_current_usb_functions(FunctionSet::NONE, Some(cb.clone()), 1000, 6)
            .await
            .unwrap();
        assert!(board.links().is_empty());
    }

    #[tokio::test]
    async fn test_apply_sequence_ends_torn_down() {
        let board = FakeBoard::new();
        let service = board.service();
        board.write_descriptors("adb");

        service
            .set_current_usb_functions(FunctionSet::ADB, None, 2000, 10)
            .await
            .unwrap();
        service
            .set_current_usb_functions(FunctionSet::ADB.union(FunctionSet::NCM), None, 2000, 11)
            .await
            .unwrap();
        // ADB links before NCM in the fixed order
        let links = board.links();
        assert_eq!(links.len(), 2);
        let adb_link = std::fs::read_link(&links[0]).unwrap();
        assert!(adb_link.ends_with("ffs.adb"));
        let ncm_link = std::fs::read_link(&links[1]).unwrap();
        assert!(ncm_link.ends_with("ncm.gs9"));

        service
            .set_current_usb_functions(FunctionSet::NONE, None, 2000, 12)
            .await
            .unwrap();
        assert!(board.links().is_empty());
        assert_eq!(board.pullup(), "none\n");
        assert!(!service.is_applied());
    }

    #[tokio::test]
    async fn test_late_descriptors_then_teardown_end_pulled_down() {
        let board = FakeBoard::new();
        let service = board.service();

        // The wait expires, but the session keeps watching
        assert!(service
            .set_current_usb_functions(FunctionSet::ADB, None, 50, 8)
            .await
            .is_err());

        // Descriptors land after the timeout: the stale session pulls up
        board.write_descriptors("adb");
        let deadline = std::time::Instant::now() + Duration::from_secs(2);
        while board.pullup() != "test.udc\n" {
            assert!(std::time::Instant::now() < deadline, "never pulled up");
            tokio::time::sleep(Duration::from_millis(5)).await;
        }

        // The next teardown stops it and leaves a clean pull-down state
        service
            .set_current_usb_functions(FunctionSet::NONE, None, 1000, 9)
            .await
            .unwrap();
        assert_eq!(board.pullup(), "none\n");
        assert!(board.links().is_empty());
        assert!(!service.is_applied());
    }

    #[tokio::test]
    async fn test_vendor_extras_link_between_generics_and_adb() {
        let board = FakeBoard::new();
        let mut config = board.config.clone();
        config.configfs.vendor_extra = "diag".to_string();
        let service = UsbGadgetService::new(config);
        board.write_descriptors("adb");
        board.write_descriptors("mtp");

        service
            .set_current_usb_functions(
                FunctionSet::ADB.union(FunctionSet::MTP),
                None,
                2000,
                15,
            )
            .await
            .unwrap();

        let links = board.links();
        assert_eq!(links.len(), 3);
        let targets: Vec<_> = links
            .iter()
            .map(|l| std::fs::read_link(l).unwrap())
            .collect();
        assert!(targets[0].ends_with("ffs.mtp"));
        assert!(targets[1].ends_with("diag.diag"));
        assert!(targets[2].ends_with("ffs.adb"));
    }

    #[tokio::test]
    async fn test_teardown_is_idempotent() {
        let board = FakeBoard::new();
        let service = board.service();

        service
            .set_current_usb_functions(FunctionSet::NONE, None, 1000, 20)
            .await
            .unwrap();
        service
            .set_current_usb_functions(FunctionSet::NONE, None, 1000, 21)
            .await
            .unwrap();
    }

    #[tokio::test]
    async fn test_partial_link_failure_rolls_back() {
        let board = FakeBoard::new();
        let service = board.service();

        // Occupy the second link slot so linking ADB after MTP fails
        std::fs::write(
            board.config.configfs.config_path().join("function1"),
            "occupied",
        )
        .unwrap();

        let set = FunctionSet::ADB.union(FunctionSet::MTP);
        let err = service.link_functions(set).unwrap_err();
        assert!(matches!(err, GadgetError::ConfigFs { .. }));

        // The rollback removed function0; only the blocker file remains
        let links = board.links();
        assert_eq!(links.len(), 1);
        assert!(links[0].ends_with("function1"));
    }

    #[tokio::test]
    async fn test_teardown_failure_aborts_apply() {
        let board = FakeBoard::new();
        let service = board.service();
        let cb = Arc::new(RecordingCallback::default());

        // A link slot that cannot be unlinked makes teardown fail
        std::fs::create_dir(board.config.configfs.config_path().join("function0")).unwrap();

        let err = service
            .set_current_usb_functions(FunctionSet::MIDI, Some(cb.clone()), 1000, 30)
            .await
            .unwrap_err();
        assert!(matches!(err, GadgetError::ConfigFs { .. }));

        // Aborted before validation: identity untouched, gadget pulled down
        assert_eq!(
            std::fs::read_to_string(board.config.configfs.id_product_path()).unwrap(),
            ""
        );
        assert_eq!(board.pullup(), "none\n");
        let calls = cb.set_calls.lock().unwrap();
        assert_eq!(calls.as_slice(), [(FunctionSet::MIDI, Status::Error, 30)]);
    }

    #[tokio::test]
    async fn test_get_current_functions_reports_applied_state() {
        let board = FakeBoard::new();
        let service = board.service();
        let cb = Arc::new(RecordingCallback::default());

        service.get_current_usb_functions(Some(cb.clone()), 40).await;
        service
            .set_current_usb_functions(FunctionSet::MIDI, None, 1000, 41)
            .await
            .unwrap();
        service.get_current_usb_functions(Some(cb.clone()), 42).await;

        let calls = cb.get_calls.lock().unwrap();
        assert_eq!(
            calls.as_slice(),
            [
                (FunctionSet::NONE, Status::FunctionsNotApplied, 40),
                (FunctionSet::MIDI, Status::FunctionsApplied, 42),
            ]
        );
    }

    #[tokio::test]
    async fn test_reset_cycles_pullup() {
        let board = FakeBoard::new();
        let service = board.service();
        let cb = Arc::new(RecordingCallback::default());

        service.reset(Some(cb.clone()), 50).await.unwrap();
        assert_eq!(board.pullup(), "test.udc\n");
        let calls = cb.reset_calls.lock().unwrap();
        assert_eq!(calls.as_slice(), [(Status::Success, 50)]);
    }

    #[tokio::test]
    async fn test_reset_failure_reports_error() {
        let board = FakeBoard::new();
        let service = board.service();
        let cb = Arc::new(RecordingCallback::default());
        std::fs::remove_file(board.config.configfs.pullup_path()).unwrap();

        assert!(service.reset(Some(cb.clone()), 51).await.is_err());
        let calls = cb.reset_calls.lock().unwrap();
        assert_eq!(calls.as_slice(), [(Status::Error, 51)]);
    }

    #[tokio::test]
    async fn test_get_usb_speed() {
        let board = FakeBoard::new();
        let service = board.service();
        let cb = Arc::new(RecordingCallback::default());

        let speed = service.get_usb_speed(Some(cb.clone()), 60).await;
        assert_eq!(speed, UsbSpeed::HighSpeed);
        let calls = cb.speed_calls.lock().unwrap();
        assert_eq!(calls.as_slice(), [(UsbSpeed::HighSpeed, 60)]);

        std::fs::remove_file(board.config.configfs.speed_path()).unwrap();
        assert_eq!(service.get_usb_speed(None, 61).await, UsbSpeed::Unknown);
    }

    #[tokio::test]
    async fn test_concurrent_applies_serialize() {
        let board = FakeBoard::new();
        let service = Arc::new(board.service());
        board.write_descriptors("adb");

        let s1 = Arc::clone(&service);
        let t1 = tokio::spawn(async move {
            s1.set_current_usb_functions(FunctionSet::ADB, None, 2000, 70)
                .await
        });
        let s2 = Arc::clone(&service);
        let t2 = tokio::spawn(async move {
            s2.set_current_usb_functions(FunctionSet::MIDI, None, 2000, 71)
                .await
        });

        t1.await.unwrap().unwrap();
        t2.await.unwrap().unwrap();

        // Whichever apply ran last, the tree reflects exactly one full
        // composition, never an interleaved partial link set.
        let links = board.links();
        assert_eq!(links.len(), 1);
        let target = std::fs::read_link(&links[0]).unwrap();
        assert!(target.ends_with("ffs.adb") || target.ends_with("midi.gs5"));
        assert_eq!(board.pullup(), "test.udc\n");
    }
}
