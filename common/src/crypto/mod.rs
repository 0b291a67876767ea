mod hash;
mod signature;

pub use hash::{hash, Hash, Hashable, HASH_SIZE};
pub use signature::{
    PublicKey, SecretKey, Signature, PUBLIC_KEY_SIZE, SECRET_KEY_SIZE, SIGNATURE_SIZE,
};
