//! Decoded node identity and tunables.

use std::collections::BTreeSet;
use std::time::Duration;

use trellis_core::{ContactInfo, Id, SpaceError, decode_name};

#[derive(Debug, Clone)]
pub struct Settings {
    id: Id,
    name: String,
    ip: String,
    ips: BTreeSet<String>,
    port: u16,
    delay: Duration,
    expiration: Duration,
    delegation_threshold: i64,
    set_length: usize,
}

impl Settings {
    #[allow(clippy::too_many_arguments)]
    pub fn new(
        name: &str,
        ip: &str,
        port: u16,
        delay: Duration,
        expiration: Duration,
        delegation_threshold: i64,
        set_length: usize,
    ) -> Result<Self, SpaceError> {
        let id = decode_name(name)?;
        let mut ips = BTreeSet::from([ip.to_string()]);
        ips.insert("127.0.0.1".to_string());
        Ok(Settings {
            id,
            name: name.to_string(),
            ip: ip.to_string(),
            ips,
            port,
            delay,
            expiration,
            delegation_threshold,
            set_length,
        })
    }

    pub fn id(&self) -> Id {
        self.id
    }

    pub fn name(&self) -> &str {
        &self.name
    }

    pub fn ip(&self) -> &str {
        &self.ip
    }

    pub fn ips(&self) -> &BTreeSet<String> {
        &self.ips
    }

    pub fn port(&self) -> u16 {
        self.port
    }

    pub fn delay(&self) -> Duration {
        self.delay
    }

    pub fn expiration(&self) -> Duration {
        self.expiration
    }

    pub fn delegation_threshold(&self) -> i64 {
        self.delegation_threshold
    }

    pub fn set_length(&self) -> usize {
        self.set_length
    }

    pub fn contact_info(&self) -> ContactInfo {
        ContactInfo {
            name: self.name.clone(),
            ips: self.ips.clone(),
            ip: self.ip.clone(),
            port: self.port,
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use trellis_core::space::{encode_id, random_id};

    #[test]
    fn settings_decode_the_node_name() {
        let id = random_id();
        let settings = Settings::new(
            &encode_id(&id),
            "10.0.0.7",
            21000,
            Duration::from_secs(10),
            Duration::from_secs(300),
            1000,
            20,
        )
        .unwrap();
        assert_eq!(settings.id(), id);
        assert!(settings.ips().contains("10.0.0.7"));
        assert!(settings.ips().contains("127.0.0.1"));
        assert_eq!(settings.contact_info().host(), format!("{}@10.0.0.7|21000", settings.name()));
    }

    #[test]
    fn settings_reject_bad_names() {
        assert!(Settings::new(
            "not an identifier",
            "127.0.0.1",
            0,
            Duration::ZERO,
            Duration::ZERO,
            0,
            0
        )
        .is_err());
    }
}
