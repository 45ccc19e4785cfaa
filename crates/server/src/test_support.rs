use std::{
    path::Path,
    sync::{Mutex, MutexGuard, PoisonError},
};

/// Process-wide environment is shared across test threads; deployments are
/// built one at a time.
static ENV_LOCK: Mutex<()> = Mutex::new(());

/// Points the asset directory (and therefore the SQLite file, config, and
/// project workdirs) at a per-test temp root, restoring the previous
/// environment on drop.
pub struct TestEnvGuard {
    _env_lock: MutexGuard<'static, ()>,
    previous_asset_dir: Option<String>,
    previous_database_url: Option<String>,
}

impl TestEnvGuard {
    pub fn new(temp_root: &Path) -> Self {
        let env_lock = ENV_LOCK.lock().unwrap_or_else(PoisonError::into_inner);
        let previous_asset_dir = std::env::var("REME_ASSET_DIR").ok();
        let previous_database_url = std::env::var("DATABASE_URL").ok();

        let db_path = temp_root.join("db.sqlite");
        unsafe {
            std::env::set_var("REME_ASSET_DIR", temp_root);
            std::env::set_var(
                "DATABASE_URL",
                format!("sqlite://{}?mode=rwc", db_path.to_string_lossy()),
            );
        }

        Self {
            _env_lock: env_lock,
            previous_asset_dir,
            previous_database_url,
        }
    }
}

impl Drop for TestEnvGuard {
    fn drop(&mut self) {
        unsafe {
            match &self.previous_asset_dir {
                Some(value) => std::env::set_var("REME_ASSET_DIR", value),
                None => std::env::remove_var("REME_ASSET_DIR"),
            }
            match &self.previous_database_url {
                Some(value) => std::env::set_var("DATABASE_URL", value),
                None => std::env::remove_var("DATABASE_URL"),
            }
        }
    }
}
