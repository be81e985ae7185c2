// table2sheet/src/sheets/auth.rs
//! Produces the authorized handle used by the Google client. Token storage and
//! refresh are left to yup-oauth2.
use anyhow::{Context, Result};
use tracing::info;
use yup_oauth2::authenticator::DefaultAuthenticator;
use yup_oauth2::{
    ApplicationSecret, InstalledFlowAuthenticator, InstalledFlowReturnMethod,
    ServiceAccountAuthenticator,
};

use crate::config::CredentialsConfig;

pub async fn build_authenticator(credentials: &CredentialsConfig) -> Result<DefaultAuthenticator> {
    match credentials {
        CredentialsConfig::ServiceAccount { key_path } => {
            let key = yup_oauth2::read_service_account_key(key_path)
                .await
                .with_context(|| format!("Failed to read service account key at {}", key_path.display()))?;
            info!("Authenticating with service account {}", key.client_email);
            ServiceAccountAuthenticator::builder(key)
                .build()
                .await
                .context("Failed to build service account authenticator")
        }
        CredentialsConfig::InstalledApp {
            client_id,
            client_secret,
            project_id,
            auth_uri,
            token_uri,
            cert_url,
            redirect_uri,
            token_cache,
        } => {
            let secret = ApplicationSecret {
                client_id: client_id.clone(),
                client_secret: client_secret.clone(),
                token_uri: token_uri.clone(),
                auth_uri: auth_uri.clone(),
                redirect_uris: vec![redirect_uri.clone()],
                project_id: Some(project_id.clone()),
                auth_provider_x509_cert_url: Some(cert_url.clone()),
                ..Default::default()
            };
            info!("Authenticating with OAuth client for project {} (token cache {})", project_id, token_cache.display());
            InstalledFlowAuthenticator::builder(secret, InstalledFlowReturnMethod::HTTPRedirect)
                .persist_tokens_to_disk(token_cache)
                .build()
                .await
                .context("Failed to build installed-app authenticator")
        }
    }
}
