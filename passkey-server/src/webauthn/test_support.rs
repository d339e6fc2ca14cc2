//! Fixtures for ceremony tests

use std::sync::Arc;

use base64::{engine::general_purpose::URL_SAFE_NO_PAD, Engine};
use chrono::Utc;
use uuid::Uuid;
use webauthn_rs::prelude::{PublicKeyCredential, RegisterPublicKeyCredential};

use super::ceremony::encode_id;
use crate::db::{Credential, UserProfile, WebauthnUser};
use crate::storage::{MemoryStore, Persister};
use crate::tenant::{TenantConfig, TenantContext, TenantDirectory};

pub struct TestTenant {
    pub mfa: bool,
    pub timeout_ms: u64,
}

impl Default for TestTenant {
    fn default() -> Self {
        Self {
            mfa: false,
            timeout_ms: 60_000,
        }
    }
}

/// Context for tenant "acme" backed by `store`.
pub async fn tenant_context(store: &Arc<MemoryStore>, tenant: TestTenant) -> TenantContext {
    let config: TenantConfig = serde_json::from_value(serde_json::json!({
        "id": "acme",
        "webauthn": {
            "rp_id": "localhost",
            "rp_name": "Acme",
            "origins": ["http://localhost:3001"],
            "timeout_ms": tenant.timeout_ms
        },
        "mfa": { "enabled": tenant.mfa },
        "secrets": ["acme-wrapping-secret-0001"]
    }))
    .unwrap();

    let persister: Arc<dyn Persister> = store.clone();
    let directory = TenantDirectory::from_configs(vec![config], persister.clone())
        .await
        .unwrap();
    TenantContext::new(directory.get("acme").unwrap(), persister)
}

/// Store a user with credentials `(name, is_mfa)`; ids are the base64url names.
pub fn seed_user(store: &MemoryStore, external_id: &str, credentials: &[(&str, bool)]) -> WebauthnUser {
    let user = WebauthnUser::new(
        "acme",
        UserProfile {
            user_id: external_id.to_string(),
            name: format!("{}@example.com", external_id),
            display_name: None,
            icon: None,
        },
    );
    store.insert_user(user.clone());

    for (name, is_mfa) in credentials {
        store.insert_credential(Credential {
            id: encode_id(name.as_bytes()),
            tenant_id: "acme".to_string(),
            user_id: user.id,
            passkey: serde_json::json!({}),
            attestation_type: "none".to_string(),
            aaguid: Uuid::nil(),
            transports: vec!["internal".to_string()],
            backup_eligible: false,
            backup_state: false,
            is_mfa: *is_mfa,
            created_at: Utc::now(),
            last_used_at: None,
        });
    }
    user
}

fn client_data(kind: &str, challenge: &[u8]) -> String {
    let json = serde_json::json!({
        "type": kind,
        "challenge": URL_SAFE_NO_PAD.encode(challenge),
        "origin": "http://localhost:3001",
        "crossOrigin": false
    });
    URL_SAFE_NO_PAD.encode(json.to_string())
}

/// Structurally valid assertion carrying `challenge`; the signature is junk.
pub fn assertion_response(
    challenge: &[u8],
    raw_id: &[u8],
    user_handle: Option<&[u8]>,
) -> PublicKeyCredential {
    let id = URL_SAFE_NO_PAD.encode(raw_id);
    serde_json::from_value(serde_json::json!({
        "id": id,
        "rawId": id,
        "type": "public-key",
        "response": {
            "authenticatorData": URL_SAFE_NO_PAD.encode([0u8; 37]),
            "clientDataJSON": client_data("webauthn.get", challenge),
            "signature": URL_SAFE_NO_PAD.encode([1u8; 64]),
            "userHandle": user_handle.map(|h| URL_SAFE_NO_PAD.encode(h)),
        },
        "extensions": {}
    }))
    .unwrap()
}

/// Structurally valid attestation carrying `challenge`.
pub fn registration_response(challenge: &[u8]) -> RegisterPublicKeyCredential {
    let id = URL_SAFE_NO_PAD.encode([4u8; 16]);
    serde_json::from_value(serde_json::json!({
        "id": id,
        "rawId": id,
        "type": "public-key",
        "response": {
            "attestationObject": URL_SAFE_NO_PAD.encode([0xa0u8]),
            "clientDataJSON": client_data("webauthn.create", challenge),
        },
        "extensions": {}
    }))
    .unwrap()
}
