//! `fimon baseline ...` commands. The next scan pass records fresh baselines
//! for whatever was removed here.

use anyhow::{Context, Result};
use fimon_core::hashing::file_code;
use fimon_core::store::BaselineStore;
use tracing::info;

pub fn reset(store: &dyn BaselineStore) -> Result<()> {
    store.delete_all().context("clear baseline store")?;
    info!("all baselines removed");
    Ok(())
}

pub fn forget(store: &dyn BaselineStore, path: &str) -> Result<()> {
    let code = file_code(path);
    store
        .delete_one(&code)
        .with_context(|| format!("remove baseline for {path}"))?;
    info!(file = path, code = %code, "baseline removed");
    Ok(())
}

#[cfg(test)]
mod tests {
    use super::*;
    use fimon_core::store::MemoryStore;

    #[test]
    fn forget_targets_one_file() {
        let store = MemoryStore::new();
        store.insert(&file_code("/a"), "h1").unwrap();
        store.insert(&file_code("/b"), "h2").unwrap();
        forget(&store, "/a").unwrap();
        assert_eq!(store.select(&file_code("/a")).unwrap(), None);
        assert_eq!(store.select(&file_code("/b")).unwrap().as_deref(), Some("h2"));
        reset(&store).unwrap();
        assert!(store.is_empty());
    }

    #[test]
    fn storage_failure_is_reported() {
        let store = MemoryStore::new();
        store.set_failing(true);
        assert!(reset(&store).is_err());
    }
}
