#![allow(dead_code)]

use std::path::Path;

use cairn::config::CairnConfig;
use cairn::MemoryManager;
use tempfile::TempDir;

/// A throwaway project root.
pub fn project() -> TempDir {
    TempDir::new().unwrap()
}

/// Open a manager over `root` with default configuration.
pub fn open_manager(root: &Path) -> MemoryManager {
    MemoryManager::open(root).unwrap()
}

/// Open a manager over `root` with the given configuration.
pub fn open_with(root: &Path, config: CairnConfig) -> MemoryManager {
    MemoryManager::with_config(root, config).unwrap()
}

/// Default location of the memory document under `root`.
pub fn store_file(root: &Path) -> std::path::PathBuf {
    CairnConfig::default().store_path(root)
}

/// Replace the store's directory with a regular file so every write fails.
pub fn block_store(root: &Path) {
    let dir = store_file(root).parent().unwrap().to_path_buf();
    if dir.exists() {
        std::fs::remove_dir_all(&dir).unwrap();
    }
    std::fs::write(&dir, "").unwrap();
}

/// Undo [`block_store`].
pub fn unblock_store(root: &Path) {
    let dir = store_file(root).parent().unwrap().to_path_buf();
    std::fs::remove_file(&dir).unwrap();
}
