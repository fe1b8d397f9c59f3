//! Built-in "off" VFS variant and variant switching.

use crate::{Result, SyncError};
use bridge_traits::{
    AvailabilityError, PinState, SyncBackend, SyncFileStatus, Vfs, VfsItemAvailability, VfsMode,
    VfsSetupParams,
};
use std::path::Path;
use tracing::info;

/// Every file is a real local file.
#[derive(Debug, Default, Clone)]
pub struct VfsOff {
    started: bool,
}

impl VfsOff {
    pub fn new() -> Self {
        Self::default()
    }
}

impl Vfs for VfsOff {
    fn mode(&self) -> VfsMode {
        VfsMode::Off
    }

    fn start(&mut self, _params: &VfsSetupParams) -> bridge_traits::error::Result<()> {
        self.started = true;
        Ok(())
    }

    fn stop(&mut self) {
        self.started = false;
    }

    fn wipe_artifacts(&mut self) -> bridge_traits::error::Result<()> {
        Ok(())
    }

    fn set_pin_state(
        &mut self,
        _relative_path: &str,
        _state: PinState,
    ) -> bridge_traits::error::Result<()> {
        Ok(())
    }

    fn pin_state(&self, _relative_path: &str) -> Option<PinState> {
        Some(PinState::AlwaysLocal)
    }

    fn availability(
        &self,
        _relative_path: &str,
    ) -> std::result::Result<VfsItemAvailability, AvailabilityError> {
        Ok(VfsItemAvailability::AlwaysLocal)
    }

    fn file_status_changed(&mut self, _system_path: &Path, _status: SyncFileStatus) {}

    fn is_hydrating(&self) -> bool {
        false
    }

    fn pin_actions_shown(&self) -> bool {
        false
    }
}

/// Builds the variant for `mode`; `Off` never needs the backend.
pub fn create_vfs(backend: &dyn SyncBackend, mode: VfsMode) -> Result<Box<dyn Vfs>> {
    if mode == VfsMode::Off {
        return Ok(Box::new(VfsOff::new()));
    }
    if !backend.is_vfs_available(mode) {
        return Err(SyncError::InvalidState(format!(
            "Virtual file mode {mode} is not available on this system"
        )));
    }
    Ok(backend.create_vfs(mode)?)
}

/// Replaces `current` with a `target` variant.
///
/// Artifacts of the old variant are removed before the new one is built so
/// both never manage the same files.
pub fn upgrade_vfs(
    mut current: Box<dyn Vfs>,
    target: VfsMode,
    backend: &dyn SyncBackend,
) -> Result<Box<dyn Vfs>> {
    let from = current.mode();
    current.wipe_artifacts()?;
    current.stop();
    drop(current);

    let next = create_vfs(backend, target)?;
    info!(from = %from, to = %target, "Switched virtual file mode");
    Ok(next)
}

#[cfg(test)]
mod tests {
    use super::*;
    use bridge_traits::{BridgeError, EngineSetup, JournalDb, SyncEngine};
    use std::sync::{Arc, Mutex};

    #[derive(Default)]
    struct Recorder {
        calls: Arc<Mutex<Vec<&'static str>>>,
    }

    struct RecordingVfs {
        mode: VfsMode,
        calls: Arc<Mutex<Vec<&'static str>>>,
    }

    impl Vfs for RecordingVfs {
        fn mode(&self) -> VfsMode {
            self.mode
        }
        fn start(&mut self, _params: &VfsSetupParams) -> bridge_traits::error::Result<()> {
            Ok(())
        }
        fn stop(&mut self) {
            self.calls.lock().unwrap().push("stop");
        }
        fn wipe_artifacts(&mut self) -> bridge_traits::error::Result<()> {
            self.calls.lock().unwrap().push("wipe");
            Ok(())
        }
        fn set_pin_state(&mut self, _: &str, _: PinState) -> bridge_traits::error::Result<()> {
            Ok(())
        }
        fn pin_state(&self, _: &str) -> Option<PinState> {
            None
        }
        fn availability(
            &self,
            _: &str,
        ) -> std::result::Result<VfsItemAvailability, AvailabilityError> {
            Err(AvailabilityError::NoSuchItem)
        }
        fn file_status_changed(&mut self, _: &Path, _: SyncFileStatus) {}
        fn is_hydrating(&self) -> bool {
            false
        }
        fn pin_actions_shown(&self) -> bool {
            true
        }
    }

    impl SyncBackend for Recorder {
        fn open_journal(
            &self,
            _: &Path,
            _: &str,
        ) -> bridge_traits::error::Result<Box<dyn JournalDb>> {
            Err(BridgeError::NotAvailable("journal".into()))
        }
        fn create_engine(
            &self,
            _: &EngineSetup,
        ) -> bridge_traits::error::Result<Arc<dyn SyncEngine>> {
            Err(BridgeError::NotAvailable("engine".into()))
        }
        fn create_vfs(&self, mode: VfsMode) -> bridge_traits::error::Result<Box<dyn Vfs>> {
            self.calls.lock().unwrap().push("create");
            Ok(Box::new(RecordingVfs {
                mode,
                calls: self.calls.clone(),
            }))
        }
        fn is_vfs_available(&self, mode: VfsMode) -> bool {
            mode == VfsMode::WithSuffix
        }
    }

    #[test]
    fn off_variant_is_always_local() {
        let vfs = VfsOff::new();
        assert_eq!(vfs.pin_state("any/file"), Some(PinState::AlwaysLocal));
        assert_eq!(vfs.availability(""), Ok(VfsItemAvailability::AlwaysLocal));
        assert!(!vfs.pin_actions_shown());
    }

    #[test]
    fn unavailable_mode_is_rejected() {
        let backend = Recorder::default();
        assert!(create_vfs(&backend, VfsMode::WindowsCfApi).is_err());
        assert_eq!(create_vfs(&backend, VfsMode::Off).unwrap().mode(), VfsMode::Off);
    }

    #[test]
    fn upgrade_wipes_before_creating() {
        let backend = Recorder::default();
        let current = create_vfs(&backend, VfsMode::WithSuffix).unwrap();
        backend.calls.lock().unwrap().clear();

        let next = upgrade_vfs(current, VfsMode::Off, &backend).unwrap();

        assert_eq!(next.mode(), VfsMode::Off);
        assert_eq!(*backend.calls.lock().unwrap(), vec!["wipe", "stop"]);
    }
}
