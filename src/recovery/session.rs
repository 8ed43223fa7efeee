use std::sync::{
    Arc,
    atomic::{AtomicBool, Ordering},
};

use serde::Serialize;
use tracing::{info, warn};

use crate::{
    crypto::{
        CipherSettings,
        codec::PageCodec,
        kdf::{DerivedKeys, KeyDeriver, KeyMaterial},
    },
    types::{
        SALT_SIZE,
        error::{RecoveryWarning, Result},
    },
};

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
#[serde(rename_all = "snake_case")]
pub enum Phase {
    Created,
    Baseline,
    WalReplay,
    FullyReconciled,
}

/// Everything one analysis run owns: the derived keys (inside the codec),
/// accumulated warnings and the cancellation flag. Nothing here is global,
/// so independent databases can be analysed side by side.
#[derive(Debug)]
pub struct Session {
    settings: CipherSettings,
    codec: Arc<PageCodec>,
    salt: [u8; SALT_SIZE],
    warnings: Vec<RecoveryWarning>,
    cancel: Arc<AtomicBool>,
    phase: Phase,
}

impl Session {
    pub fn new(settings: &CipherSettings, key: &KeyMaterial, salt: &[u8; SALT_SIZE]) -> Result<Self> {
        settings.validate()?;
        let keys = KeyDeriver::new(settings).derive(key, salt)?;
        Self::with_keys(settings, keys, salt)
    }

    pub fn with_keys(settings: &CipherSettings, keys: DerivedKeys, salt: &[u8; SALT_SIZE]) -> Result<Self> {
        Ok(Self {
            settings: settings.clone(),
            codec: Arc::new(PageCodec::new(keys, settings)?),
            salt: *salt,
            warnings: Vec::new(),
            cancel: Arc::new(AtomicBool::new(false)),
            phase: Phase::Created,
        })
    }

    pub fn with_cancel_flag(mut self, flag: Arc<AtomicBool>) -> Self {
        self.cancel = flag;
        self
    }

    pub fn settings(&self) -> &CipherSettings {
        &self.settings
    }

    pub fn codec(&self) -> Arc<PageCodec> {
        Arc::clone(&self.codec)
    }

    pub fn salt(&self) -> &[u8; SALT_SIZE] {
        &self.salt
    }

    pub fn cancel_flag(&self) -> Arc<AtomicBool> {
        Arc::clone(&self.cancel)
    }

    pub fn is_cancelled(&self) -> bool {
        self.cancel.load(Ordering::Relaxed)
    }

    pub fn phase(&self) -> Phase {
        self.phase
    }

    pub(crate) fn enter(&mut self, phase: Phase) {
        info!(?phase, warnings = self.warnings.len(), "recovery phase");
        self.phase = phase;
    }

    pub fn record(&mut self, warning: RecoveryWarning) {
        warn!(?warning, "skipped");
        self.warnings.push(warning);
    }

    pub fn record_all(&mut self, warnings: impl IntoIterator<Item = RecoveryWarning>) {
        for warning in warnings {
            self.record(warning);
        }
    }

    pub fn warnings(&self) -> &[RecoveryWarning] {
        &self.warnings
    }

    pub fn take_warnings(&mut self) -> Vec<RecoveryWarning> {
        std::mem::take(&mut self.warnings)
    }
}
