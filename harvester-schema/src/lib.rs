// Copyright (c) TX Society
// SPDX-License-Identifier: Apache-2.0

pub mod models;
pub mod schema;

use harvester_pg_db::Migration;

pub const MIGRATIONS: &[Migration] = &[
    Migration {
        version: 1,
        name: "blockchain",
        sql: include_str!("../migrations/0001_blockchain.up.sql"),
    },
    Migration {
        version: 2,
        name: "payments",
        sql: include_str!("../migrations/0002_payments.up.sql"),
    },
];
