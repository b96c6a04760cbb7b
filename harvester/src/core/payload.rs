// Copyright (c) TX Society
// SPDX-License-Identifier: Apache-2.0

//! Binary invoice payload embedded in payment deep links and messages.

use base64::engine::general_purpose::URL_SAFE;
use base64::Engine as _;

use crate::core::{Bits256, InvoiceId};

/// 32-bit operation code of the invoice payload message body.
pub const INVOICE_PAYLOAD_OPCODE: u32 = 0x4950_4159;

const PROVIDER_URL_NONE: u8 = 0x00;
const PROVIDER_URL_TONSITE: u8 = 0x01;

/// Encode the payload a payer embeds in the transfer message: the opcode, the
/// raw UUIDv7 bits and an optional payment-provider tonsite address.
pub fn encode_payload(id: &InvoiceId, adnl_address: Option<&Bits256>) -> String {
    let mut data = Vec::with_capacity(4 + 16 + 33);
    data.extend_from_slice(&INVOICE_PAYLOAD_OPCODE.to_be_bytes());
    data.extend_from_slice(id.as_bytes());
    match adnl_address {
        Some(addr) => {
            data.push(PROVIDER_URL_TONSITE);
            data.extend_from_slice(addr.as_slice());
        }
        None => data.push(PROVIDER_URL_NONE),
    }
    URL_SAFE.encode(data)
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::core::new_invoice_id;

    #[test]
    fn test_payload_layout_without_provider() {
        let id = new_invoice_id();
        let encoded = encode_payload(&id, None);
        let data = URL_SAFE.decode(encoded).unwrap();
        assert_eq!(data.len(), 4 + 16 + 1);
        assert_eq!(&data[..4], &INVOICE_PAYLOAD_OPCODE.to_be_bytes());
        assert_eq!(&data[4..20], id.as_bytes());
        assert_eq!(data[20], PROVIDER_URL_NONE);
    }

    #[test]
    fn test_payload_layout_with_provider() {
        let id = new_invoice_id();
        let adnl = Bits256([0xAD; 32]);
        let encoded = encode_payload(&id, Some(&adnl));
        let data = URL_SAFE.decode(encoded).unwrap();
        assert_eq!(data.len(), 4 + 16 + 1 + 32);
        assert_eq!(data[20], PROVIDER_URL_TONSITE);
        assert_eq!(&data[21..], adnl.as_slice());
    }
}
