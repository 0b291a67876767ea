use sia_common::crypto::Hash;
use sia_common::serializer::Serializer;

use super::changes::ConsensusChange;
use super::{BlockNode, ConsensusError};

const META_RECENT_CHANGE: &[u8] = b"recent_change";

// Durable consensus store: every block node ever accepted, the canonical
// path, and the full consensus change log with its next-pointers. The log is
// never pruned so late subscribers can always replay from genesis.
pub struct ConsensusDb {
    db: sled::Db,
    blocks: sled::Tree,
    path: sled::Tree,
    changes: sled::Tree,
    change_next: sled::Tree,
    meta: sled::Tree,
}

impl ConsensusDb {
    pub fn open(data_dir: &str) -> Result<Self, ConsensusError> {
        let db = sled::open(format!("{}/consensus", data_dir))?;
        Ok(ConsensusDb {
            blocks: db.open_tree("blocks")?,
            path: db.open_tree("path")?,
            changes: db.open_tree("changes")?,
            change_next: db.open_tree("change_next")?,
            meta: db.open_tree("meta")?,
            db,
        })
    }

    pub fn store_block_node(&self, node: &BlockNode) -> Result<(), ConsensusError> {
        self.blocks
            .insert(node.block.id().as_bytes(), node.to_bytes())?;
        Ok(())
    }

    pub fn remove_block_node(&self, id: &Hash) -> Result<(), ConsensusError> {
        self.blocks.remove(id.as_bytes())?;
        Ok(())
    }

    pub fn all_block_nodes(&self) -> Result<Vec<BlockNode>, ConsensusError> {
        let mut nodes = Vec::new();
        for entry in self.blocks.iter() {
            let (_, value) = entry?;
            nodes.push(BlockNode::from_bytes(&value)?);
        }
        Ok(nodes)
    }

    pub fn set_path(&self, height: u64, id: &Hash) -> Result<(), ConsensusError> {
        self.path.insert(height.to_be_bytes(), id.as_bytes())?;
        Ok(())
    }

    pub fn truncate_path(&self, from_height: u64) -> Result<(), ConsensusError> {
        let mut height = from_height;
        while self.path.remove(height.to_be_bytes())?.is_some() {
            height += 1;
        }
        Ok(())
    }

    pub fn append_change(&self, change: &ConsensusChange) -> Result<(), ConsensusError> {
        self.changes.insert(change.id.as_bytes(), change.to_bytes())?;
        self.change_next
            .insert(change.prev.as_bytes(), change.id.as_bytes())?;
        self.meta.insert(META_RECENT_CHANGE, change.id.as_bytes())?;
        Ok(())
    }

    pub fn change(&self, id: &Hash) -> Result<Option<ConsensusChange>, ConsensusError> {
        match self.changes.get(id.as_bytes())? {
            Some(value) => Ok(Some(ConsensusChange::from_bytes(&value)?)),
            None => Ok(None),
        }
    }

    pub fn next_of(&self, id: &Hash) -> Result<Option<Hash>, ConsensusError> {
        match self.change_next.get(id.as_bytes())? {
            Some(value) => {
                let bytes: [u8; 32] = value
                    .as_ref()
                    .try_into()
                    .map_err(|_| ConsensusError::CorruptDatabase)?;
                Ok(Some(Hash::new(bytes)))
            }
            None => Ok(None),
        }
    }

    pub fn recent_change_id(&self) -> Result<Option<Hash>, ConsensusError> {
        match self.meta.get(META_RECENT_CHANGE)? {
            Some(value) => {
                let bytes: [u8; 32] = value
                    .as_ref()
                    .try_into()
                    .map_err(|_| ConsensusError::CorruptDatabase)?;
                Ok(Some(Hash::new(bytes)))
            }
            None => Ok(None),
        }
    }

    pub async fn flush(&self) -> Result<(), ConsensusError> {
        self.db.flush_async().await?;
        Ok(())
    }
}
