pub mod cipher;
pub mod mask;
pub mod models;
pub mod service;

pub use cipher::{CipherError, KeyCipher};
pub use mask::mask;
pub use models::{
    EncryptedValue, MaskedView, ProviderCredential, RequestContext, RevealedKey, StoredSecret,
    VaultAction,
};
pub use service::{MigrationOutcome, VaultService};
