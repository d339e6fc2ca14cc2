//! Credential metadata from the attestation object
//!
//! webauthn-rs keeps the attestation details of a `Passkey` private, so the
//! stored metadata (format, AAGUID, backup flags) is read from the raw
//! attestation object after verification has succeeded. Parsing is
//! best-effort: anything unreadable falls back to defaults.

use ciborium::Value as CborValue;
use uuid::Uuid;

use super::types::AttestationFormat;

/// Offset of the flags byte in authenticator data (after the rpIdHash)
const FLAGS_OFFSET: usize = 32;
/// rpIdHash(32) + flags(1) + counter(4)
const AAGUID_OFFSET: usize = 37;
const AAGUID_LEN: usize = 16;

const FLAG_BACKUP_ELIGIBLE: u8 = 0x08;
const FLAG_BACKUP_STATE: u8 = 0x10;
const FLAG_ATTESTED_DATA: u8 = 0x40;

/// Metadata recorded alongside a new credential
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
pub struct AttestationMetadata {
    pub format: AttestationFormat,
    pub aaguid: Uuid,
    pub backup_eligible: bool,
    pub backup_state: bool,
}

impl AttestationMetadata {
    /// Read metadata from a CBOR attestation object.
    pub fn parse(attestation_object: &[u8]) -> Self {
        let value = match ciborium::from_reader::<CborValue, _>(attestation_object) {
            Ok(value) => value,
            Err(e) => {
                tracing::debug!(error = %e, "Unreadable attestation object");
                return Self::default();
            }
        };

        let Some(map) = value.as_map() else {
            return Self::default();
        };
        let field = |name: &str| map.iter().find(|(k, _)| k.as_text() == Some(name)).map(|(_, v)| v);

        let format = field("fmt")
            .and_then(|v| v.as_text())
            .map(AttestationFormat::from_fmt)
            .unwrap_or_default();

        let mut metadata = Self {
            format,
            ..Self::default()
        };

        if let Some(auth_data) = field("authData").and_then(|v| v.as_bytes()) {
            metadata.apply_authenticator_data(auth_data);
        }
        metadata
    }

    fn apply_authenticator_data(&mut self, auth_data: &[u8]) {
        let Some(&flags) = auth_data.get(FLAGS_OFFSET) else {
            return;
        };
        self.backup_eligible = flags & FLAG_BACKUP_ELIGIBLE != 0;
        self.backup_state = flags & FLAG_BACKUP_STATE != 0;

        if flags & FLAG_ATTESTED_DATA == 0 {
            return;
        }
        if let Some(bytes) = auth_data.get(AAGUID_OFFSET..AAGUID_OFFSET + AAGUID_LEN) {
            if let Ok(aaguid) = Uuid::from_slice(bytes) {
                self.aaguid = aaguid;
            }
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    const AAGUID: [u8; 16] = [
        0xad, 0xce, 0x00, 0x02, 0x35, 0xbc, 0xc6, 0x0a, 0x64, 0x8b, 0x0b, 0x25, 0xf1, 0xf0, 0x55,
        0x03,
    ];

    fn auth_data(flags: u8) -> Vec<u8> {
        let mut data = vec![0u8; 32];
        data.push(flags);
        data.extend_from_slice(&[0, 0, 0, 0]);
        data.extend_from_slice(&AAGUID);
        data.extend_from_slice(&[0, 4, 1, 2, 3, 4]);
        data
    }

    fn attestation_object(fmt: &str, auth_data: Vec<u8>) -> Vec<u8> {
        let value = CborValue::Map(vec![
            (CborValue::Text("fmt".into()), CborValue::Text(fmt.into())),
            (CborValue::Text("attStmt".into()), CborValue::Map(vec![])),
            (CborValue::Text("authData".into()), CborValue::Bytes(auth_data)),
        ]);
        let mut bytes = Vec::new();
        ciborium::into_writer(&value, &mut bytes).unwrap();
        bytes
    }

    #[test]
    fn test_parse_packed_with_backup_flags() {
        let object = attestation_object(
            "packed",
            auth_data(FLAG_ATTESTED_DATA | FLAG_BACKUP_ELIGIBLE | FLAG_BACKUP_STATE | 0x05),
        );
        let meta = AttestationMetadata::parse(&object);

        assert_eq!(meta.format, AttestationFormat::Packed);
        assert_eq!(meta.aaguid, Uuid::from_bytes(AAGUID));
        assert!(meta.backup_eligible);
        assert!(meta.backup_state);
    }

    #[test]
    fn test_aaguid_requires_attested_data_flag() {
        let meta = AttestationMetadata::parse(&attestation_object("none", auth_data(0x05)));
        assert_eq!(meta.format, AttestationFormat::None);
        assert_eq!(meta.aaguid, Uuid::nil());
        assert!(!meta.backup_eligible);
    }

    #[test]
    fn test_garbage_falls_back_to_defaults() {
        assert_eq!(
            AttestationMetadata::parse(b"not cbor at all"),
            AttestationMetadata::default()
        );
        assert_eq!(
            AttestationMetadata::parse(&attestation_object("tpm", vec![1, 2, 3])).format,
            AttestationFormat::Tpm
        );
    }
}
