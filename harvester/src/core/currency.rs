// Copyright (c) TX Society
// SPDX-License-Identifier: Apache-2.0

use std::fmt;

use crate::core::AccountId;
use crate::error::CoreError;

pub const DEFAULT_TON_TICKER: &str = "TON";

/// A tracked currency. Equality is structural; `(kind, info)` is the unique
/// key in the `payments.currencies` table.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum Currency {
    Ton,
    Extra(u32),
    Jetton(AccountId),
}

impl Currency {
    pub fn kind(&self) -> &'static str {
        match self {
            Currency::Ton => "ton",
            Currency::Extra(_) => "extra",
            Currency::Jetton(_) => "jetton",
        }
    }

    /// The `info` column value: empty for TON, the decimal id for an extra
    /// currency, the raw address for a jetton.
    pub fn info(&self) -> String {
        match self {
            Currency::Ton => String::new(),
            Currency::Extra(id) => id.to_string(),
            Currency::Jetton(master) => master.to_raw(),
        }
    }

    pub fn from_parts(kind: &str, info: &str) -> Result<Self, CoreError> {
        match kind {
            "ton" => Ok(Currency::Ton),
            "extra" => {
                let id = info.parse::<u32>().map_err(|_| {
                    CoreError::CorruptStorage(format!("invalid extra currency id: {info}"))
                })?;
                Ok(Currency::Extra(id))
            }
            "jetton" => Ok(Currency::Jetton(AccountId::from_raw(info).map_err(
                |_| CoreError::CorruptStorage(format!("invalid jetton master: {info}")),
            )?)),
            other => Err(CoreError::CorruptStorage(format!(
                "unknown currency kind: {other}"
            ))),
        }
    }

    pub fn jetton_master(&self) -> Option<AccountId> {
        match self {
            Currency::Jetton(master) => Some(*master),
            _ => None,
        }
    }
}

impl fmt::Display for Currency {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Currency::Ton => write!(f, "ton$"),
            Currency::Extra(id) => write!(f, "extra${id}"),
            Currency::Jetton(master) => write!(f, "jetton${}", master.to_raw()),
        }
    }
}

/// A whitelisted currency with its display configuration.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct ExtendedCurrency {
    pub currency: Currency,
    pub jetton_decimals: u8,
}

impl ExtendedCurrency {
    pub fn ton() -> Self {
        Self {
            currency: Currency::Ton,
            jetton_decimals: 0,
        }
    }

    pub fn jetton(master: AccountId, decimals: u8) -> Self {
        Self {
            currency: Currency::Jetton(master),
            jetton_decimals: decimals,
        }
    }
}
