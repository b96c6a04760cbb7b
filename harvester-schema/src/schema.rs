// Copyright (c) TX Society
// SPDX-License-Identifier: Apache-2.0

diesel::table! {
    blockchain.accounts (address) {
        address -> Text,
        last_tx_lt -> Int8,
        last_tx_hash -> Bytea,
        last_checked_block -> Nullable<Int8>,
        indexer_timestamp -> Timestamptz,
        start_tx_lt -> Int8,
        last_processed_lt -> Int8,
    }
}

diesel::table! {
    blockchain.transactions (hash) {
        hash -> Bytea,
        lt -> Int8,
        account_id -> Text,
        prev_tx_hash -> Bytea,
        prev_tx_lt -> Int8,
        utime -> Int8,
        in_message -> Jsonb,
        out_messages -> Array<Jsonb>,
        success -> Bool,
        processing_error -> Nullable<Text>,
    }
}

diesel::table! {
    blockchain.trusted_mc_block (id) {
        id -> Int4,
        seqno -> Int8,
        root_hash -> Bytea,
        file_hash -> Bytea,
    }
}

diesel::table! {
    payments.currencies (id) {
        id -> Uuid,
        #[sql_name = "type"]
        type_ -> Text,
        info -> Text,
    }
}

diesel::table! {
    payments.jetton_wallets (address) {
        address -> Text,
        owner -> Text,
        currency -> Uuid,
    }
}

diesel::table! {
    payments.invoices (id) {
        id -> Uuid,
        status -> Text,
        amount -> Text,
        currency -> Uuid,
        created_at -> Timestamptz,
        expire_at -> Timestamptz,
        updated_at -> Timestamptz,
        private_info -> Jsonb,
        metadata -> Jsonb,
        overpayment -> Text,
        paid_at -> Nullable<Timestamptz>,
        paid_by -> Nullable<Text>,
        recipient -> Text,
        tx_hash -> Nullable<Bytea>,
    }
}

diesel::table! {
    payments.invoice_notifications (id) {
        id -> Uuid,
        status -> Text,
        amount -> Text,
        currency -> Uuid,
        created_at -> Timestamptz,
        expire_at -> Timestamptz,
        updated_at -> Timestamptz,
        private_info -> Jsonb,
        metadata -> Jsonb,
        overpayment -> Text,
        paid_at -> Nullable<Timestamptz>,
        paid_by -> Nullable<Text>,
        recipient -> Text,
        tx_hash -> Nullable<Bytea>,
    }
}

diesel::table! {
    payments.keys (address) {
        address -> Text,
        encryption_key -> Bytea,
        accepted -> Bool,
        created_at -> Timestamptz,
    }
}

diesel::allow_tables_to_appear_in_same_query!(
    accounts,
    transactions,
    trusted_mc_block,
    currencies,
    jetton_wallets,
    invoices,
    invoice_notifications,
    keys,
);
