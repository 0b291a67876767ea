use std::collections::HashMap;
use std::path::Path;

use sia_common::config::{MAX_STORAGE_FOLDER_SIZE, MIN_STORAGE_FOLDER_SIZE, SECTOR_SIZE};
use sia_common::crypto::{hash, Hash};

use super::HostError;

// One operator-added storage location. Sectors live as individual files
// named by their Merkle root inside the folder.
#[derive(Clone, Debug)]
pub struct StorageFolder {
    pub path: String,
    pub capacity: u64,
    pub used: u64,
}

impl StorageFolder {
    pub fn remaining(&self) -> u64 {
        self.capacity.saturating_sub(self.used)
    }
}

// The sector store: folders plus the root -> folder index. All mutation
// happens under the host's state lock; this struct is plain data.
pub struct SectorStore {
    pub folders: Vec<StorageFolder>,
    // sector root -> owning folder path
    pub sectors: HashMap<Hash, String>,
}

impl SectorStore {
    pub fn new() -> Self {
        SectorStore {
            folders: Vec::new(),
            sectors: HashMap::new(),
        }
    }

    pub fn remaining(&self) -> u64 {
        self.folders.iter().map(|folder| folder.remaining()).sum()
    }

    pub fn capacity(&self) -> u64 {
        self.folders.iter().map(|folder| folder.capacity).sum()
    }

    pub fn add_folder(&mut self, path: &str, size: u64) -> Result<(), HostError> {
        if self.folders.iter().any(|folder| folder.path == path) {
            return Err(HostError::RepeatFolder);
        }
        if size < MIN_STORAGE_FOLDER_SIZE {
            return Err(HostError::SmallStorageFolder);
        }
        if size > MAX_STORAGE_FOLDER_SIZE {
            return Err(HostError::LargeStorageFolder);
        }

        std::fs::create_dir_all(path)?;
        self.folders.push(StorageFolder {
            path: path.to_string(),
            capacity: size,
            used: 0,
        });
        info!("Added storage folder {} ({} bytes)", path, size);
        Ok(())
    }

    pub fn resize_folder(&mut self, path: &str, new_size: u64) -> Result<(), HostError> {
        let folder = self
            .folders
            .iter_mut()
            .find(|folder| folder.path == path)
            .ok_or(HostError::StorageFolderNotFound)?;

        if folder.capacity == new_size {
            return Err(HostError::NoResize);
        }
        if new_size < MIN_STORAGE_FOLDER_SIZE {
            return Err(HostError::SmallStorageFolder);
        }
        if new_size > MAX_STORAGE_FOLDER_SIZE {
            return Err(HostError::LargeStorageFolder);
        }
        if new_size < folder.used {
            return Err(HostError::IncompleteOffload);
        }

        folder.capacity = new_size;
        Ok(())
    }

    // Removing a folder holding sectors requires force and loses the data
    pub fn remove_folder(&mut self, path: &str, force: bool) -> Result<(), HostError> {
        let index = self
            .folders
            .iter()
            .position(|folder| folder.path == path)
            .ok_or(HostError::StorageFolderNotFound)?;

        if self.folders[index].used > 0 && !force {
            return Err(HostError::IncompleteOffload);
        }

        let lost: Vec<Hash> = self
            .sectors
            .iter()
            .filter(|(_, folder_path)| folder_path.as_str() == path)
            .map(|(root, _)| root.clone())
            .collect();
        if !lost.is_empty() {
            warn!(
                "Removing folder {} discards {} stored sectors",
                path,
                lost.len()
            );
        }
        for root in lost {
            self.sectors.remove(&root);
        }

        let folder = self.folders.remove(index);
        let _ = std::fs::remove_dir_all(&folder.path);
        Ok(())
    }

    fn sector_path(folder: &str, root: &Hash) -> String {
        format!("{}/{}", folder, root.to_hex())
    }

    // Store a sector in the emptiest folder. The root addresses the sector
    // from then on; storing the same data twice is a no-op.
    pub fn store_sector(&mut self, data: &[u8]) -> Result<Hash, HostError> {
        if data.len() as u64 > SECTOR_SIZE {
            return Err(HostError::OversizedSector);
        }
        let root = sector_root(data);
        if self.sectors.contains_key(&root) {
            return Ok(root);
        }

        let folder = self
            .folders
            .iter_mut()
            .filter(|folder| folder.remaining() >= SECTOR_SIZE)
            .max_by_key(|folder| folder.remaining())
            .ok_or(HostError::InsufficientStorage)?;

        std::fs::write(Self::sector_path(&folder.path, &root), data)?;
        folder.used += SECTOR_SIZE;
        self.sectors.insert(root.clone(), folder.path.clone());
        Ok(root)
    }

    pub fn read_sector(&self, root: &Hash) -> Result<Vec<u8>, HostError> {
        let folder = self
            .sectors
            .get(root)
            .ok_or(HostError::SectorNotFound)?;
        Ok(std::fs::read(Self::sector_path(folder, root))?)
    }

    pub fn delete_sector(&mut self, root: &Hash) -> Result<(), HostError> {
        let folder_path = self
            .sectors
            .remove(root)
            .ok_or(HostError::SectorNotFound)?;
        if let Some(folder) = self
            .folders
            .iter_mut()
            .find(|folder| folder.path == folder_path)
        {
            folder.used = folder.used.saturating_sub(SECTOR_SIZE);
        }
        let _ = std::fs::remove_file(Self::sector_path(&folder_path, root));
        Ok(())
    }

    pub fn has_sector(&self, root: &Hash) -> bool {
        self.sectors.contains_key(root)
    }

    // Rescan folders on startup to rebuild usage and the sector index
    pub fn rescan(&mut self) {
        self.sectors.clear();
        for folder in &mut self.folders {
            folder.used = 0;
            let entries = match std::fs::read_dir(&folder.path) {
                Ok(entries) => entries,
                Err(_) => continue,
            };
            for entry in entries.flatten() {
                let name = entry.file_name();
                let Some(name) = name.to_str() else { continue };
                let Ok(root) = name.parse::<Hash>() else {
                    continue;
                };
                if Path::new(&entry.path()).is_file() {
                    self.sectors.insert(root, folder.path.clone());
                    folder.used += SECTOR_SIZE;
                }
            }
        }
    }
}

// Content address of a sector. Merkle-tree construction over segments is
// external math; the sector root here is the content hash.
pub fn sector_root(data: &[u8]) -> Hash {
    hash(data)
}

#[cfg(test)]
mod tests {
    use super::*;

    fn temp_folder(name: &str) -> String {
        let path = std::env::temp_dir().join(format!("sia-host-test-{}", name));
        let _ = std::fs::remove_dir_all(&path);
        path.to_string_lossy().to_string()
    }

    #[test]
    fn test_folder_size_bounds() {
        let mut store = SectorStore::new();
        let path = temp_folder("bounds");
        assert!(matches!(
            store.add_folder(&path, MIN_STORAGE_FOLDER_SIZE - 1),
            Err(HostError::SmallStorageFolder)
        ));
        assert!(matches!(
            store.add_folder(&path, MAX_STORAGE_FOLDER_SIZE + 1),
            Err(HostError::LargeStorageFolder)
        ));
        store.add_folder(&path, MIN_STORAGE_FOLDER_SIZE).unwrap();
        assert!(matches!(
            store.add_folder(&path, MIN_STORAGE_FOLDER_SIZE),
            Err(HostError::RepeatFolder)
        ));
    }

    #[test]
    fn test_resize_rules() {
        let mut store = SectorStore::new();
        let path = temp_folder("resize");
        store.add_folder(&path, MIN_STORAGE_FOLDER_SIZE).unwrap();
        assert!(matches!(
            store.resize_folder(&path, MIN_STORAGE_FOLDER_SIZE),
            Err(HostError::NoResize)
        ));
        assert!(matches!(
            store.resize_folder("/nonexistent", MIN_STORAGE_FOLDER_SIZE * 2),
            Err(HostError::StorageFolderNotFound)
        ));
        store
            .resize_folder(&path, MIN_STORAGE_FOLDER_SIZE * 2)
            .unwrap();
    }

    #[test]
    fn test_sector_round_trip() {
        let mut store = SectorStore::new();
        let path = temp_folder("sectors");
        store.add_folder(&path, MIN_STORAGE_FOLDER_SIZE).unwrap();

        let data = vec![7u8; 1024];
        let root = store.store_sector(&data).unwrap();
        assert_eq!(root, sector_root(&data));
        assert_eq!(store.read_sector(&root).unwrap(), data);

        // non-empty folder refuses removal without force
        assert!(matches!(
            store.remove_folder(&path, false),
            Err(HostError::IncompleteOffload)
        ));
        store.remove_folder(&path, true).unwrap();
        assert!(!store.has_sector(&root));
    }

    #[test]
    fn test_delete_sector() {
        let mut store = SectorStore::new();
        let path = temp_folder("delete");
        store.add_folder(&path, MIN_STORAGE_FOLDER_SIZE).unwrap();
        let root = store.store_sector(b"payload").unwrap();
        store.delete_sector(&root).unwrap();
        assert!(matches!(
            store.read_sector(&root),
            Err(HostError::SectorNotFound)
        ));
    }
}
