//! Account: a holder of a keypair on a specific Blockchain (§3).

use uuid::Uuid;

use crate::crypto::{self, Secret};
use crate::error::ProviderError;
use crate::model::Blockchain;
use crate::provider::Provider;

/// A holder of a keypair on a specific [`crate::model::Blockchain`].
///
/// `encrypted_private_key` is opaque ciphertext; decryption is the pure
/// [`crypto::decrypt`] primitive. An Account is created without an address;
/// before first use, [`Account::generate_private_key`] asks the Provider to
/// create a keypair, stores the encrypted key, and fills `address`.
#[derive(Debug, Clone)]
pub struct Account {
    pub id: Uuid,
    pub blockchain_id: Uuid,
    pub address: Option<String>,
    pub encrypted_private_key: Vec<u8>,
    pub owner_id: Option<Uuid>,
    pub balance: Option<u128>,
    pub name: String,
}

impl Account {
    pub fn new(blockchain_id: Uuid, name: impl Into<String>) -> Self {
        Self {
            id: Uuid::new_v4(),
            blockchain_id,
            address: None,
            encrypted_private_key: Vec::new(),
            owner_id: None,
            balance: None,
            name: name.into(),
        }
    }

    /// Decrypts the stored private key under the process secret. `None`
    /// when no key has been generated yet.
    pub fn private_key(&self, secret: &Secret) -> Option<Vec<u8>> {
        crypto::decrypt(secret, &self.encrypted_private_key)
    }

    /// Returns true once a wallet has been provisioned for this account.
    pub fn has_wallet(&self) -> bool {
        self.address.is_some() && !self.encrypted_private_key.is_empty()
    }

    /// Asks `provider` to mint a fresh keypair, encrypts the private key
    /// under `secret`, and fills in `address`. A no-op if a wallet already
    /// exists — mirrors `account_wallet`'s `if instance.crypted_key: return`
    /// guard in the original `pre_save` signal handler.
    pub async fn generate_private_key(
        &mut self,
        provider: &dyn Provider,
        blockchain: &Blockchain,
        passphrase: &str,
        secret: &Secret,
    ) -> Result<(), ProviderError> {
        if self.has_wallet() {
            return Ok(());
        }
        let (address, private_key) = provider.create_wallet(blockchain, passphrase).await?;
        self.encrypted_private_key = crypto::encrypt(secret, &private_key).unwrap_or_default();
        self.address = Some(address);
        Ok(())
    }
}
