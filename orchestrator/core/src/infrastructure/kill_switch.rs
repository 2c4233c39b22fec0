// Copyright (c) 2026 100monkeys.ai
// SPDX-License-Identifier: AGPL-3.0
//! # File-Backed Kill Switch
//!
//! Presence of `<data-dir>/KILL_SWITCH` means active. The file survives
//! supervisor restarts and can be touched or removed by out-of-band tooling;
//! runtimes read through a cached mirror refreshed at most every two
//! seconds, which bounds both observation staleness and filesystem traffic.

use std::path::{Path, PathBuf};
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::Mutex;
use std::time::{Duration, Instant};

use crate::domain::control::{ControlError, KillSwitch};

const REFRESH_INTERVAL: Duration = Duration::from_secs(2);

pub struct FileKillSwitch {
    path: PathBuf,
    active: AtomicBool,
    checked_at: Mutex<Option<Instant>>,
}

impl FileKillSwitch {
    pub fn new(data_dir: &Path) -> Self {
        let path = data_dir.join("KILL_SWITCH");
        let active = AtomicBool::new(path.exists());
        Self {
            path,
            active,
            checked_at: Mutex::new(Some(Instant::now())),
        }
    }

    pub fn path(&self) -> &Path {
        &self.path
    }

    fn refresh(&self) {
        let mut checked_at = match self.checked_at.lock() {
            Ok(guard) => guard,
            Err(poisoned) => poisoned.into_inner(),
        };
        let due = checked_at
            .map(|at| at.elapsed() >= REFRESH_INTERVAL)
            .unwrap_or(true);
        if due {
            self.active.store(self.path.exists(), Ordering::Relaxed);
            *checked_at = Some(Instant::now());
        }
    }

    fn invalidate(&self) {
        let mut checked_at = match self.checked_at.lock() {
            Ok(guard) => guard,
            Err(poisoned) => poisoned.into_inner(),
        };
        *checked_at = None;
    }
}

impl KillSwitch for FileKillSwitch {
    fn is_active(&self) -> bool {
        self.refresh();
        self.active.load(Ordering::Relaxed)
    }

    fn activate(&self) -> Result<(), ControlError> {
        if let Some(parent) = self.path.parent() {
            std::fs::create_dir_all(parent)?;
        }
        std::fs::write(
            &self.path,
            format!("activated at {}\n", chrono::Utc::now().to_rfc3339()),
        )?;
        self.active.store(true, Ordering::Relaxed);
        self.invalidate();
        tracing::warn!("kill switch ACTIVATED");
        Ok(())
    }

    fn deactivate(&self) -> Result<(), ControlError> {
        match std::fs::remove_file(&self.path) {
            Ok(()) => {}
            Err(e) if e.kind() == std::io::ErrorKind::NotFound => {}
            Err(e) => return Err(e.into()),
        }
        self.active.store(false, Ordering::Relaxed);
        self.invalidate();
        tracing::info!("kill switch deactivated");
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::domain::control::KillSwitch as _;

    #[test]
    fn toggles_through_the_flag_file() {
        let dir = tempfile::tempdir().unwrap();
        let switch = FileKillSwitch::new(dir.path());
        assert!(!switch.is_active());

        switch.activate().unwrap();
        assert!(switch.path().exists());
        assert!(switch.is_active());

        switch.deactivate().unwrap();
        assert!(!switch.path().exists());
        assert!(!switch.is_active());
    }

    #[test]
    fn out_of_band_activation_is_observed() {
        let dir = tempfile::tempdir().unwrap();
        let switch = FileKillSwitch::new(dir.path());
        assert!(!switch.is_active());

        // another process touches the flag file
        std::fs::write(dir.path().join("KILL_SWITCH"), "x").unwrap();
        switch.invalidate();
        assert!(switch.is_active());
    }

    #[test]
    fn deactivating_an_inactive_switch_is_fine() {
        let dir = tempfile::tempdir().unwrap();
        let switch = FileKillSwitch::new(dir.path());
        switch.deactivate().unwrap();
    }
}
