// Copyright (c) TX Society
// SPDX-License-Identifier: Apache-2.0

use std::fmt;
use std::str::FromStr;

use base64::engine::general_purpose::{STANDARD_NO_PAD, URL_SAFE_NO_PAD};
use base64::Engine as _;
use serde::{Deserialize, Deserializer, Serialize, Serializer};

use crate::error::CoreError;

/// TON account address: workchain plus a 256-bit account id.
///
/// The raw form is `wc:hex64`; the human form is base64url over
/// `tag ‖ workchain ‖ account ‖ crc16`.
#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Hash)]
pub struct AccountId {
    pub workchain: i32,
    pub address: [u8; 32],
}

const BOUNCEABLE_TAG: u8 = 0x11;
const NON_BOUNCEABLE_TAG: u8 = 0x51;
const TESTNET_FLAG: u8 = 0x80;

impl AccountId {
    pub fn new(workchain: i32, address: [u8; 32]) -> Self {
        Self { workchain, address }
    }

    /// Raw form, e.g. `0:25f2…cd91`.
    pub fn to_raw(&self) -> String {
        format!("{}:{}", self.workchain, hex::encode(self.address))
    }

    /// Human-readable base64url form with the crc16 checksum.
    pub fn to_human(&self, bounceable: bool, testnet: bool) -> String {
        let mut tag = if bounceable {
            BOUNCEABLE_TAG
        } else {
            NON_BOUNCEABLE_TAG
        };
        if testnet {
            tag |= TESTNET_FLAG;
        }
        let mut data = [0u8; 36];
        data[0] = tag;
        data[1] = self.workchain as i8 as u8;
        data[2..34].copy_from_slice(&self.address);
        let crc = crc16_xmodem(&data[..34]);
        data[34] = (crc >> 8) as u8;
        data[35] = (crc & 0xff) as u8;
        URL_SAFE_NO_PAD.encode(data)
    }

    pub fn from_raw(s: &str) -> Result<Self, CoreError> {
        let (wc, addr) = s
            .split_once(':')
            .ok_or_else(|| CoreError::MessageParse(format!("invalid address: {s}")))?;
        let workchain: i32 = wc
            .parse()
            .map_err(|_| CoreError::MessageParse(format!("invalid workchain: {wc}")))?;
        let bytes = hex::decode(addr)
            .map_err(|_| CoreError::MessageParse(format!("invalid address hex: {addr}")))?;
        let address: [u8; 32] = bytes
            .try_into()
            .map_err(|_| CoreError::MessageParse(format!("invalid address length: {addr}")))?;
        Ok(Self { workchain, address })
    }

    pub fn from_human(s: &str) -> Result<Self, CoreError> {
        let data = URL_SAFE_NO_PAD
            .decode(s.trim_end_matches('='))
            .or_else(|_| STANDARD_NO_PAD.decode(s.trim_end_matches('=')))
            .map_err(|_| CoreError::MessageParse(format!("invalid address base64: {s}")))?;
        if data.len() != 36 {
            return Err(CoreError::MessageParse(format!(
                "invalid address length: {s}"
            )));
        }
        let crc = crc16_xmodem(&data[..34]);
        if data[34] != (crc >> 8) as u8 || data[35] != (crc & 0xff) as u8 {
            return Err(CoreError::MessageParse(format!(
                "invalid address checksum: {s}"
            )));
        }
        let tag = data[0] & !TESTNET_FLAG;
        if tag != BOUNCEABLE_TAG && tag != NON_BOUNCEABLE_TAG {
            return Err(CoreError::MessageParse(format!("invalid address tag: {s}")));
        }
        let mut address = [0u8; 32];
        address.copy_from_slice(&data[2..34]);
        Ok(Self {
            workchain: data[1] as i8 as i32,
            address,
        })
    }
}

impl FromStr for AccountId {
    type Err = CoreError;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        if s.contains(':') {
            Self::from_raw(s)
        } else {
            Self::from_human(s)
        }
    }
}

impl fmt::Display for AccountId {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}", self.to_raw())
    }
}

impl Serialize for AccountId {
    fn serialize<S: Serializer>(&self, serializer: S) -> Result<S::Ok, S::Error> {
        serializer.serialize_str(&self.to_raw())
    }
}

impl<'de> Deserialize<'de> for AccountId {
    fn deserialize<D: Deserializer<'de>>(deserializer: D) -> Result<Self, D::Error> {
        let s = String::deserialize(deserializer)?;
        s.parse().map_err(serde::de::Error::custom)
    }
}

/// 256-bit value (transaction hashes, block hashes, ADNL addresses).
#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Hash, Default)]
pub struct Bits256(pub [u8; 32]);

impl Bits256 {
    pub fn to_hex(&self) -> String {
        hex::encode(self.0)
    }

    pub fn as_slice(&self) -> &[u8] {
        &self.0
    }

    pub fn from_slice(data: &[u8]) -> Result<Self, CoreError> {
        let bytes: [u8; 32] = data
            .try_into()
            .map_err(|_| CoreError::MessageParse(format!("invalid hash length: {}", data.len())))?;
        Ok(Self(bytes))
    }
}

impl FromStr for Bits256 {
    type Err = CoreError;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        let bytes = hex::decode(s)
            .map_err(|_| CoreError::MessageParse(format!("invalid hash hex: {s}")))?;
        Self::from_slice(&bytes)
    }
}

impl fmt::Display for Bits256 {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}", self.to_hex())
    }
}

impl Serialize for Bits256 {
    fn serialize<S: Serializer>(&self, serializer: S) -> Result<S::Ok, S::Error> {
        serializer.serialize_str(&self.to_hex())
    }
}

impl<'de> Deserialize<'de> for Bits256 {
    fn deserialize<D: Deserializer<'de>>(deserializer: D) -> Result<Self, D::Error> {
        let s = String::deserialize(deserializer)?;
        s.parse().map_err(serde::de::Error::custom)
    }
}

/// CRC16/XMODEM, the checksum used by user-friendly address forms.
fn crc16_xmodem(data: &[u8]) -> u16 {
    let mut crc: u16 = 0;
    for &byte in data {
        crc ^= (byte as u16) << 8;
        for _ in 0..8 {
            if crc & 0x8000 != 0 {
                crc = (crc << 1) ^ 0x1021;
            } else {
                crc <<= 1;
            }
        }
    }
    crc
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_crc16_xmodem_vector() {
        // CRC16/XMODEM check value for "123456789"
        assert_eq!(crc16_xmodem(b"123456789"), 0x31c3);
    }

    #[test]
    fn test_raw_round_trip() {
        let raw = "0:3333333333333333333333333333333333333333333333333333333333333333";
        let account = AccountId::from_raw(raw).unwrap();
        assert_eq!(account.workchain, 0);
        assert_eq!(account.to_raw(), raw);
    }

    #[test]
    fn test_masterchain_workchain() {
        let account = AccountId::from_raw(
            "-1:3333333333333333333333333333333333333333333333333333333333333333",
        )
        .unwrap();
        assert_eq!(account.workchain, -1);
        // Workchain survives the human-form i8 narrowing
        let human = account.to_human(true, false);
        assert_eq!(AccountId::from_human(&human).unwrap(), account);
    }

    #[test]
    fn test_human_round_trip() {
        let account = AccountId::new(0, [0xAB; 32]);
        for bounceable in [true, false] {
            let human = account.to_human(bounceable, false);
            assert_eq!(AccountId::from_human(&human).unwrap(), account);
        }
    }

    #[test]
    fn test_human_checksum_rejected() {
        let account = AccountId::new(0, [7; 32]);
        let human = account.to_human(true, false);
        let mut data = URL_SAFE_NO_PAD.decode(&human).unwrap();
        data[35] ^= 0xFF;
        let corrupted = URL_SAFE_NO_PAD.encode(data);
        assert!(AccountId::from_human(&corrupted).is_err());
    }

    #[test]
    fn test_from_str_accepts_both_forms() {
        let account = AccountId::new(0, [0x11; 32]);
        assert_eq!(account.to_raw().parse::<AccountId>().unwrap(), account);
        assert_eq!(
            account.to_human(true, false).parse::<AccountId>().unwrap(),
            account
        );
    }

    #[test]
    fn test_bits256_hex_round_trip() {
        let hash = Bits256([0x5A; 32]);
        assert_eq!(hash.to_hex().parse::<Bits256>().unwrap(), hash);
        assert!("zz".parse::<Bits256>().is_err());
        assert!("aabb".parse::<Bits256>().is_err());
    }
}
