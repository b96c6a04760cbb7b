// Copyright (c) TX Society
// SPDX-License-Identifier: Apache-2.0

//! Environment-driven configuration.

use std::collections::{HashMap, HashSet};

use anyhow::{bail, Context as _};
use clap::Parser;
use harvester_pg_db::DbArgs;
use url::Url;

use crate::core::{AccountId, ExtendedCurrency, DEFAULT_PAYMENT_PREFIXES, DEFAULT_TON_TICKER};

#[derive(Parser, Debug)]
#[clap(rename_all = "kebab-case", version)]
pub struct Config {
    #[clap(env = "PORT", long, default_value_t = 8081)]
    pub port: u16,

    #[clap(env = "LOG_LEVEL", long, default_value = "info")]
    pub log_level: String,

    #[clap(env = "POSTGRES_URI", long)]
    pub postgres_uri: Url,

    /// Bearer token protecting the private API surface.
    #[clap(env = "TOKEN", long)]
    pub token: String,

    /// Comma-separated liteserver gateway endpoints.
    #[clap(env = "LITE_SERVERS", long, value_delimiter = ',', required = true)]
    pub lite_servers: Vec<Url>,

    /// The merchant recipient address.
    #[clap(env = "RECIPIENT", long)]
    pub recipient: AccountId,

    /// Comma-separated `TICKER DECIMALS ADDRESS` tuples.
    #[clap(env = "JETTONS", long)]
    pub jettons: Option<String>,

    #[clap(env = "WEBHOOK_ENDPOINT", long)]
    pub webhook_endpoint: Option<Url>,

    /// Comma-separated `NAME PREFIX` pairs overriding the defaults.
    #[clap(env = "PAYMENT_PREFIXES", long)]
    pub payment_prefixes: Option<String>,

    /// 32 hex bytes seeding the metadata-encryption key and the ADNL address.
    #[clap(env = "KEY", long)]
    pub key: Option<String>,

    #[clap(flatten)]
    pub db: DbArgs,
}

impl Config {
    /// The currency whitelist: TON is always tracked, jettons come from the
    /// environment.
    pub fn currencies(&self) -> anyhow::Result<HashMap<String, ExtendedCurrency>> {
        parse_jettons(self.jettons.as_deref().unwrap_or_default())
    }

    pub fn prefixes(&self) -> anyhow::Result<HashMap<String, String>> {
        parse_prefixes(self.payment_prefixes.as_deref().unwrap_or_default())
    }
}

fn parse_jettons(raw: &str) -> anyhow::Result<HashMap<String, ExtendedCurrency>> {
    let mut currencies = HashMap::from([(
        DEFAULT_TON_TICKER.to_string(),
        ExtendedCurrency::ton(),
    )]);
    let mut addresses = HashSet::new();
    for entry in raw.split(',').filter(|s| !s.trim().is_empty()) {
        let fields: Vec<&str> = entry.split_whitespace().collect();
        let [ticker, decimals, address] = fields.as_slice() else {
            bail!("invalid jetton config: {entry}");
        };
        let decimals: u8 = decimals
            .parse()
            .with_context(|| format!("invalid jetton decimals (must be 0..255): {decimals}"))?;
        let address: AccountId = address
            .parse()
            .with_context(|| format!("invalid jetton address: {address}"))?;
        if currencies.contains_key(*ticker) {
            bail!("duplicated jetton ticker: {ticker}");
        }
        if !addresses.insert(address) {
            bail!("duplicated jetton address: {entry}");
        }
        currencies.insert(
            ticker.to_string(),
            ExtendedCurrency::jetton(address, decimals),
        );
    }
    Ok(currencies)
}

fn parse_prefixes(raw: &str) -> anyhow::Result<HashMap<String, String>> {
    let mut prefixes: HashMap<String, String> = DEFAULT_PAYMENT_PREFIXES
        .iter()
        .map(|(name, prefix)| (name.to_string(), prefix.to_string()))
        .collect();
    for entry in raw.split(',').filter(|s| !s.trim().is_empty()) {
        let fields: Vec<&str> = entry.split_whitespace().collect();
        let [name, prefix] = fields.as_slice() else {
            bail!("invalid prefixes config: {entry}");
        };
        prefixes.insert(name.to_string(), prefix.to_string());
    }
    Ok(prefixes)
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::core::Currency;

    fn jetton_address() -> String {
        AccountId::new(0, [0x11; 32]).to_raw()
    }

    #[test]
    fn test_ton_always_tracked() {
        let currencies = parse_jettons("").unwrap();
        assert_eq!(currencies.len(), 1);
        assert_eq!(
            currencies[DEFAULT_TON_TICKER].currency,
            Currency::Ton
        );
    }

    #[test]
    fn test_jetton_tuples_parsed() {
        let raw = format!("USDT 6 {}", jetton_address());
        let currencies = parse_jettons(&raw).unwrap();
        assert_eq!(currencies.len(), 2);
        let usdt = &currencies["USDT"];
        assert_eq!(usdt.jetton_decimals, 6);
        assert!(matches!(usdt.currency, Currency::Jetton(_)));
    }

    #[test]
    fn test_jetton_duplicates_rejected() {
        let raw = format!(
            "USDT 6 {a},USDT 9 {a}",
            a = jetton_address()
        );
        assert!(parse_jettons(&raw).is_err());

        let other = AccountId::new(0, [0x22; 32]).to_raw();
        let raw = format!("TON 9 {other}");
        assert!(parse_jettons(&raw).is_err(), "TON ticker is reserved");
    }

    #[test]
    fn test_jetton_malformed_tuple_rejected() {
        assert!(parse_jettons("USDT 6").is_err());
        assert!(parse_jettons("USDT six 0:00").is_err());
    }

    #[test]
    fn test_default_prefixes() {
        let prefixes = parse_prefixes("").unwrap();
        assert_eq!(prefixes["universal"], "ton://");
        assert_eq!(prefixes["tonkeeper"], "https://app.tonkeeper.com/");
    }

    #[test]
    fn test_prefix_overrides_merge() {
        let prefixes = parse_prefixes("universal tonhub://,custom https://pay.example/").unwrap();
        assert_eq!(prefixes["universal"], "tonhub://");
        assert_eq!(prefixes["custom"], "https://pay.example/");
        assert_eq!(prefixes["tonkeeper"], "https://app.tonkeeper.com/");
    }

    #[test]
    fn test_bad_prefix_entry_rejected() {
        assert!(parse_prefixes("justonefield").is_err());
    }
}
