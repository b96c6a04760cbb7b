// Copyright (c) TX Society
// SPDX-License-Identifier: Apache-2.0

use diesel::prelude::*;
use diesel_async::RunQueryDsl;
use harvester_schema::schema::trusted_mc_block;

use crate::chain::{BlockIdExt, MASTERCHAIN, MASTERCHAIN_SHARD};
use crate::core::Bits256;
use crate::error::{CoreError, CoreResult};
use crate::store::{PgConn, Store};

impl Store {
    pub async fn get_last_trusted_block(&self) -> CoreResult<Option<BlockIdExt>> {
        let mut guard = self.conn().await?;
        let conn: &mut PgConn = &mut guard;
        let row: Option<(i64, Vec<u8>, Vec<u8>)> = trusted_mc_block::table
            .filter(trusted_mc_block::id.eq(1))
            .select((
                trusted_mc_block::seqno,
                trusted_mc_block::root_hash,
                trusted_mc_block::file_hash,
            ))
            .first(conn)
            .await
            .optional()?;
        let Some((seqno, root_hash, file_hash)) = row else {
            return Ok(None);
        };
        Ok(Some(BlockIdExt {
            workchain: MASTERCHAIN,
            shard: MASTERCHAIN_SHARD,
            seqno: seqno as u32,
            root_hash: Bits256::from_slice(&root_hash)
                .map_err(|e| CoreError::CorruptStorage(e.to_string()))?,
            file_hash: Bits256::from_slice(&file_hash)
                .map_err(|e| CoreError::CorruptStorage(e.to_string()))?,
        }))
    }

    pub async fn set_last_trusted_block(&self, block: BlockIdExt) -> CoreResult<()> {
        if !block.is_masterchain() {
            return Err(CoreError::ChainVerification(
                "only masterchain block can be saved".into(),
            ));
        }
        let mut guard = self.conn().await?;
        let conn: &mut PgConn = &mut guard;
        diesel::insert_into(trusted_mc_block::table)
            .values((
                trusted_mc_block::id.eq(1),
                trusted_mc_block::seqno.eq(block.seqno as i64),
                trusted_mc_block::root_hash.eq(block.root_hash.as_slice().to_vec()),
                trusted_mc_block::file_hash.eq(block.file_hash.as_slice().to_vec()),
            ))
            .on_conflict(trusted_mc_block::id)
            .do_update()
            .set((
                trusted_mc_block::seqno.eq(block.seqno as i64),
                trusted_mc_block::root_hash.eq(block.root_hash.as_slice().to_vec()),
                trusted_mc_block::file_hash.eq(block.file_hash.as_slice().to_vec()),
            ))
            .execute(conn)
            .await?;
        Ok(())
    }
}
