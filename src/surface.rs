// DARKNESS CONFIGURATION SURFACE
// ONE FILE PER TUNABLE UNDER A CONTROL DIRECTORY. READ = SHOW, WRITE = STORE.
// THE DAEMON POLLS WITH sync(): A CHANGED FILE IS STORED THROUGH THE
// TUNABLE STORE AND THE FILE IS REWRITTEN WITH THE VALUE NOW IN EFFECT.

use std::fs;
use std::path::{Path, PathBuf};
use std::sync::{Arc, Mutex, PoisonError};

use log::{debug, info, warn};

use crate::error::PlatformError;
use crate::platform::ConfigSurface;
use crate::tuning::Tunables;

pub struct ControlDir {
    dir: PathBuf,
    published: Mutex<Option<Arc<Tunables>>>,
}

impl ControlDir {
    pub fn new(dir: impl Into<PathBuf>) -> Self {
        Self { dir: dir.into(), published: Mutex::new(None) }
    }

    pub fn path(&self) -> &Path {
        &self.dir
    }

    fn write_all(&self, tunables: &Tunables) -> Result<(), PlatformError> {
        for key in tunables.keys() {
            let path = self.dir.join(key.name());
            fs::write(&path, format!("{}\n", tunables.show(key)))
                .map_err(|e| PlatformError::io(&path, e))?;
        }
        Ok(())
    }

    /// Rewrite every file from the store, after changes made through the API.
    pub fn refresh(&self) -> Result<(), PlatformError> {
        let published = self.published.lock().unwrap_or_else(PoisonError::into_inner).clone();
        match published {
            Some(t) => self.write_all(&t),
            None => Ok(()),
        }
    }

    /// Apply edited files. Returns how many tunables changed.
    pub fn sync(&self) -> usize {
        let tunables = match &*self.published.lock().unwrap_or_else(PoisonError::into_inner) {
            Some(t) => Arc::clone(t),
            None => return 0,
        };

        let mut changed = 0;
        for key in tunables.keys() {
            let name = key.name();
            let path = self.dir.join(&name);
            let current = tunables.show(key);
            let raw = match fs::read_to_string(&path) {
                Ok(raw) => raw,
                Err(e) => {
                    debug!("{}: {}", path.display(), e);
                    continue;
                }
            };
            if raw.trim() == current.to_string() {
                continue;
            }

            let effective = match tunables.store(key, &raw) {
                Ok(v) => {
                    if v != current {
                        info!("TUNABLE {} = {}", name, v);
                        changed += 1;
                    }
                    v
                }
                Err(e) => {
                    warn!("{}", e);
                    current
                }
            };
            // SHOW THE CLAMPED VALUE (OR RESTORE THE OLD ONE)
            if let Err(e) = fs::write(&path, format!("{}\n", effective)) {
                warn!("{}: {}", path.display(), e);
            }
        }
        changed
    }
}

impl ConfigSurface for ControlDir {
    fn publish(&self, tunables: &Arc<Tunables>) -> Result<(), PlatformError> {
        fs::create_dir_all(&self.dir).map_err(|e| PlatformError::io(&self.dir, e))?;
        self.write_all(tunables)?;
        *self.published.lock().unwrap_or_else(PoisonError::into_inner) = Some(Arc::clone(tunables));
        info!("tunables published at {}", self.dir.display());
        Ok(())
    }

    fn retract(&self) {
        let was = self.published.lock().unwrap_or_else(PoisonError::into_inner).take();
        if was.is_none() {
            return;
        }
        if let Err(e) = fs::remove_dir_all(&self.dir) {
            warn!("{}: {}", self.dir.display(), e);
        }
    }
}

/// Surface that exposes nothing. Tunables are reachable through the API only.
#[derive(Default)]
pub struct NullSurface;

impl ConfigSurface for NullSurface {
    fn publish(&self, _tunables: &Arc<Tunables>) -> Result<(), PlatformError> {
        Ok(())
    }

    fn retract(&self) {}
}
