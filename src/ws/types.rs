//! JSON shapes of the node's notification stream and the parsers that turn
//! them into block events.

use std::collections::HashMap;

use anyhow::{Context, Result, anyhow};
use serde::Deserialize;
use serde_json::Value;

use crate::events::{NewTicketsEvent, SpentMissedEvent, WinningTicketsEvent};
use crate::rpc::types::RpcErrorObject;
use crate::wire::TxHash;

/// Notification method names the daemon subscribes to.
pub const NTFN_BLOCK_CONNECTED: &str = "blockconnected";
pub const NTFN_NEW_TICKETS: &str = "newtickets";
pub const NTFN_SPENT_MISSED: &str = "spentandmissedtickets";
pub const NTFN_WINNING_TICKETS: &str = "winningtickets";

/// Byte offset of the height field in a serialized block header.
const HEADER_HEIGHT_OFFSET: usize = 128;

/// Messages arriving on the notification socket: either a notification or
/// the response to one of our subscription requests.
#[derive(Debug, Clone, Deserialize)]
#[serde(untagged)]
pub enum WsMessage {
    Notification {
        method: String,
        params: Vec<Value>,
    },
    RequestResult {
        id: u64,
        #[serde(default)]
        result: Value,
        #[serde(default)]
        error: Option<RpcErrorObject>,
    },
}

fn param_str<'a>(params: &'a [Value], idx: usize, what: &str) -> Result<&'a str> {
    params
        .get(idx)
        .and_then(Value::as_str)
        .with_context(|| format!("notification missing {what}"))
}

fn param_i64(params: &[Value], idx: usize, what: &str) -> Result<i64> {
    params
        .get(idx)
        .and_then(Value::as_i64)
        .with_context(|| format!("notification missing {what}"))
}

/// `newtickets`: block hash, height, stake difficulty, ticket hash list.
pub fn parse_new_tickets(params: &[Value]) -> Result<NewTicketsEvent> {
    let block_hash = param_str(params, 0, "block hash")?.to_string();
    let block_height = param_i64(params, 1, "block height")?;
    let hashes: Vec<String> = serde_json::from_value(
        params
            .get(3)
            .cloned()
            .context("notification missing ticket list")?,
    )?;
    let tickets = hashes
        .iter()
        .map(|h| h.parse::<TxHash>().map_err(anyhow::Error::from))
        .collect::<Result<Vec<_>>>()?;
    Ok(NewTicketsEvent {
        block_hash,
        block_height,
        tickets,
    })
}

/// `spentandmissedtickets`: block hash, height, stake difficulty, then a
/// map of ticket hash to `"spent"` or `"missed"`.
pub fn parse_spent_missed(params: &[Value]) -> Result<SpentMissedEvent> {
    let block_hash = param_str(params, 0, "block hash")?.to_string();
    let block_height = param_i64(params, 1, "block height")?;
    let raw: HashMap<String, String> = serde_json::from_value(
        params
            .get(3)
            .cloned()
            .context("notification missing ticket map")?,
    )?;
    let mut tickets = HashMap::with_capacity(raw.len());
    for (hash, state) in raw {
        tickets.insert(hash.parse::<TxHash>()?, state == "spent");
    }
    Ok(SpentMissedEvent {
        block_hash,
        block_height,
        tickets,
    })
}

/// `winningtickets`: block hash, height, then a map of lottery index to
/// ticket hash.
pub fn parse_winning_tickets(params: &[Value]) -> Result<WinningTicketsEvent> {
    let block_hash = param_str(params, 0, "block hash")?.to_string();
    let block_height = param_i64(params, 1, "block height")?;
    let raw: HashMap<String, String> = serde_json::from_value(
        params
            .get(2)
            .cloned()
            .context("notification missing winner map")?,
    )?;
    let tickets = raw
        .values()
        .map(|h| h.parse::<TxHash>().map_err(anyhow::Error::from))
        .collect::<Result<Vec<_>>>()?;
    Ok(WinningTicketsEvent {
        block_hash,
        block_height,
        tickets,
    })
}

/// `blockconnected` carries the serialized header; the height sits at a
/// fixed offset.
pub fn parse_block_connected_height(params: &[Value]) -> Result<i64> {
    let header = hex::decode(param_str(params, 0, "block header")?)?;
    if header.len() < HEADER_HEIGHT_OFFSET + 4 {
        return Err(anyhow!("block header too short: {} bytes", header.len()));
    }
    let height = u32::from_le_bytes(
        header[HEADER_HEIGHT_OFFSET..HEADER_HEIGHT_OFFSET + 4]
            .try_into()
            .unwrap(),
    );
    Ok(height as i64)
}
