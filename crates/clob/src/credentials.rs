use std::sync::Arc;

use tracing::{info, warn};

use common::{Address, ApiCredentials, CredentialService, Error, Result};

/// Where a credential set came from.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum CredentialSource {
    Derived,
    Created,
}

/// Obtains API credentials: derive the existing set first, create a new one
/// when the service has nothing usable.
pub struct CredentialAcquirer {
    service: Arc<dyn CredentialService>,
}

impl CredentialAcquirer {
    pub fn new(service: Arc<dyn CredentialService>) -> Self {
        Self { service }
    }

    pub async fn acquire(&self, owner: &Address) -> Result<ApiCredentials> {
        self.acquire_with_source(owner).await.map(|(c, _)| c)
    }

    pub async fn acquire_with_source(
        &self,
        owner: &Address,
    ) -> Result<(ApiCredentials, CredentialSource)> {
        match self.service.derive_api_key(owner).await {
            Ok(Some(creds)) if creds.is_complete() => {
                info!(owner = %owner, "Derived existing API credentials");
                return Ok((creds, CredentialSource::Derived));
            }
            Ok(Some(_)) => info!(owner = %owner, "Derived credentials incomplete, creating new set"),
            Ok(None) => info!(owner = %owner, "No existing credentials, creating new set"),
            // A wallet that cannot sign will not sign the create request either.
            Err(e @ Error::Authentication(_)) => return Err(e),
            Err(e) => warn!(owner = %owner, error = %e, "Credential derivation failed, creating new set"),
        }

        let creds = self.service.create_api_key(owner).await?;
        if !creds.is_complete() {
            return Err(Error::Integrity(
                "credential service issued an incomplete credential set".into(),
            ));
        }
        info!(owner = %owner, "Created new API credentials");
        Ok((creds, CredentialSource::Created))
    }
}
