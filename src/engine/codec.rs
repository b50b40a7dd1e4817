//! Entity encoding.
//!
//! # Responsibilities
//! - Serialize entities to the JSON stored at their keys
//! - Deserialize and validate stored values, taking identity from the key
//! - Seal the host key pair on write and unseal it on read
//!
//! # Design Decisions
//! - The key is authoritative for identity; an id inside the value that
//!   disagrees with its key is overwritten
//! - Without a sealer, any value that needs sealing fails loudly instead
//!   of being stored in plaintext

use std::sync::Arc;

use serde::de::DeserializeOwned;
use serde::{Deserialize, Serialize};

use crate::engine::keys::{BackendKey, FrontendKey, HostKey, ListenerKey, MiddlewareKey, ServerKey};
use crate::error::Error;
use crate::model::{
    Backend, Frontend, Host, HostSettings, KeyPair, Listener, Middleware, OcspSettings, Server,
};
use crate::secret::{SealedValue, Sealer};

#[derive(Debug, Serialize, Deserialize)]
struct HostRecord {
    name: String,
    #[serde(default)]
    settings: HostSettingsRecord,
}

#[derive(Debug, Default, Serialize, Deserialize)]
struct HostSettingsRecord {
    #[serde(default)]
    default: bool,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    key_pair: Option<SealedValue>,
    #[serde(default)]
    ocsp: OcspSettings,
}

/// Converts entities to and from stored values.
#[derive(Debug, Clone, Default)]
pub struct Codec {
    sealer: Option<Arc<dyn Sealer>>,
}

impl Codec {
    pub fn new(sealer: Option<Arc<dyn Sealer>>) -> Self {
        Self { sealer }
    }

    pub fn can_seal(&self) -> bool {
        self.sealer.is_some()
    }

    fn seal_json<T: Serialize>(&self, value: &T) -> Result<SealedValue, Error> {
        let sealer = self.sealer.as_ref().ok_or(Error::EncryptionNotSupported)?;
        let bytes = serde_json::to_vec(value)?;
        Ok(sealer.seal(&bytes)?)
    }

    fn unseal_json<T: DeserializeOwned>(&self, sealed: &SealedValue) -> Result<T, Error> {
        let sealer = self.sealer.as_ref().ok_or(Error::EncryptionNotSupported)?;
        let bytes = sealer.unseal(sealed)?;
        serde_json::from_slice(&bytes)
            .map_err(|e| Error::InvalidFormat(format!("sealed value: {}", e)))
    }

    fn decode<T: DeserializeOwned>(what: &dyn std::fmt::Display, raw: &str) -> Result<T, Error> {
        serde_json::from_str(raw).map_err(|e| Error::InvalidFormat(format!("{}: {}", what, e)))
    }

    pub fn encode_host(&self, host: &Host) -> Result<String, Error> {
        let key_pair = match &host.settings.key_pair {
            Some(pair) => Some(self.seal_json(pair)?),
            None => None,
        };
        let record = HostRecord {
            name: host.name.clone(),
            settings: HostSettingsRecord {
                default: host.settings.default,
                key_pair,
                ocsp: host.settings.ocsp.clone(),
            },
        };
        Ok(serde_json::to_string(&record)?)
    }

    pub fn decode_host(&self, key: &HostKey, raw: &str) -> Result<Host, Error> {
        let record: HostRecord = Self::decode(key, raw)?;
        let key_pair = match &record.settings.key_pair {
            Some(sealed) => Some(self.unseal_json::<KeyPair>(sealed)?),
            None => None,
        };
        let host = Host {
            name: key.name.clone(),
            settings: HostSettings {
                default: record.settings.default,
                key_pair,
                ocsp: record.settings.ocsp,
            },
        };
        host.validate()?;
        Ok(host)
    }

    /// Encode any entity without sealed fields.
    pub fn encode<T: Serialize>(&self, entity: &T) -> Result<String, Error> {
        Ok(serde_json::to_string(entity)?)
    }

    pub fn decode_listener(&self, key: &ListenerKey, raw: &str) -> Result<Listener, Error> {
        let mut listener: Listener = Self::decode(key, raw)?;
        listener.id = key.id.clone();
        listener.validate()?;
        Ok(listener)
    }

    pub fn decode_frontend(&self, key: &FrontendKey, raw: &str) -> Result<Frontend, Error> {
        let mut frontend: Frontend = Self::decode(key, raw)?;
        frontend.id = key.id.clone();
        frontend.validate()?;
        Ok(frontend)
    }

    pub fn decode_middleware(&self, key: &MiddlewareKey, raw: &str) -> Result<Middleware, Error> {
        let mut middleware: Middleware = Self::decode(key, raw)?;
        middleware.id = key.id.clone();
        middleware.validate()?;
        Ok(middleware)
    }

    pub fn decode_backend(&self, key: &BackendKey, raw: &str) -> Result<Backend, Error> {
        let mut backend: Backend = Self::decode(key, raw)?;
        backend.id = key.id.clone();
        backend.validate()?;
        Ok(backend)
    }

    pub fn decode_server(&self, key: &ServerKey, raw: &str) -> Result<Server, Error> {
        let mut server: Server = Self::decode(key, raw)?;
        server.id = key.id.clone();
        server.validate()?;
        Ok(server)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::secret::AeadBox;

    fn sealing_codec() -> Codec {
        let sealer = AeadBox::from_printable(&AeadBox::generate_key()).unwrap();
        Codec::new(Some(Arc::new(sealer)))
    }

    fn key_pair() -> KeyPair {
        let cert = rcgen::generate_simple_self_signed(vec!["example.com".into()]).unwrap();
        KeyPair::new(cert.cert.pem(), cert.key_pair.serialize_pem()).unwrap()
    }

    #[test]
    fn test_host_key_pair_is_sealed() {
        let codec = sealing_codec();
        let mut settings = HostSettings::default();
        settings.key_pair = Some(key_pair());
        let host = Host::new("example.com", settings).unwrap();

        let raw = codec.encode_host(&host).unwrap();
        assert!(!raw.contains("PRIVATE KEY"));
        assert!(raw.contains("aes-gcm.v1"));

        let decoded = codec.decode_host(&HostKey::new("example.com"), &raw).unwrap();
        assert_eq!(decoded, host);
    }

    #[test]
    fn test_sealing_without_sealer_fails() {
        let codec = Codec::default();
        let mut settings = HostSettings::default();
        settings.key_pair = Some(key_pair());
        let host = Host::new("example.com", settings).unwrap();
        assert!(matches!(
            codec.encode_host(&host),
            Err(Error::EncryptionNotSupported)
        ));

        let raw = sealing_codec().encode_host(&host).unwrap();
        assert!(matches!(
            codec.decode_host(&HostKey::new("example.com"), &raw),
            Err(Error::EncryptionNotSupported)
        ));
    }

    #[test]
    fn test_host_without_key_pair_needs_no_sealer() {
        let codec = Codec::default();
        let host = Host::new("plain.com", HostSettings::default()).unwrap();
        let raw = codec.encode_host(&host).unwrap();
        assert_eq!(codec.decode_host(&HostKey::new("plain.com"), &raw).unwrap(), host);
    }

    #[test]
    fn test_identity_comes_from_key() {
        let codec = Codec::default();
        let raw = r#"{"id":"wrong","url":"http://10.0.0.1:80"}"#;
        let server = codec.decode_server(&ServerKey::new("b1", "s1"), raw).unwrap();
        assert_eq!(server.id, "s1");
    }

    #[test]
    fn test_malformed_value_is_invalid_format() {
        let codec = Codec::default();
        let err = codec
            .decode_frontend(&FrontendKey::new("f1"), "{not json")
            .unwrap_err();
        assert!(matches!(err, Error::InvalidFormat(_)));

        let raw = r#"{"id":"f1","route":"Bogus(","backend_id":"b1"}"#;
        assert!(codec.decode_frontend(&FrontendKey::new("f1"), raw).is_err());
    }

    #[test]
    fn test_listener_decode() {
        let codec = Codec::default();
        let raw = r#"{"id":"l1","protocol":"https","address":{"network":"tcp","address":"0.0.0.0:443"}}"#;
        let listener = codec.decode_listener(&ListenerKey::new("l1"), raw).unwrap();
        assert_eq!(listener.address.address, "0.0.0.0:443");
    }
}
