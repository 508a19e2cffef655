//! A small key-value commands handler used across the test suite. Requests
//! put tagged key-value pairs or read one key back; the handler prefixes
//! every application key with [`APP_TAG`], the byte the thin replica filters
//! on.

use borsh::{BorshDeserialize, BorshSerialize};
use bytes::Bytes;

use kvbc::app::{CommandsHandler, ExecuteError, ExecuteOutput, ExecuteRequest, ReadOnlyStorage};
use kvbc::replica::{ConsensusEngine, EngineError};
use kvbc::types::{ClientId, SeqNum, UpdateSet};

pub(crate) const APP_TAG: u8 = 0x10;

#[derive(BorshSerialize, BorshDeserialize)]
pub(crate) enum KvRequest {
    Put { pairs: Vec<(Vec<u8>, Vec<u8>)> },
    Get { key: Vec<u8> },
}

#[derive(BorshSerialize, BorshDeserialize, Debug, PartialEq, Eq)]
pub(crate) enum KvReply {
    Ok,
    Value(Option<Vec<u8>>),
}

pub(crate) struct KvCommandsHandler;

impl CommandsHandler for KvCommandsHandler {
    fn execute(
        &mut self,
        request: &ExecuteRequest,
        storage: &dyn ReadOnlyStorage,
    ) -> Result<ExecuteOutput, ExecuteError> {
        let parsed = KvRequest::deserialize(&mut &request.request[..]).map_err(|err| {
            ExecuteError::MalformedRequest {
                detail: err.to_string(),
            }
        })?;

        match parsed {
            KvRequest::Put { pairs } => {
                let mut updates = UpdateSet::new();
                for (key, value) in pairs {
                    updates.insert(tagged(&key), Bytes::from(value));
                }
                Ok(ExecuteOutput {
                    reply: reply_bytes(&KvReply::Ok),
                    updates,
                })
            }
            KvRequest::Get { key } => {
                let value = storage
                    .get_latest(&tagged(&key))
                    .unwrap()
                    .map(|(value, _)| value.to_vec());
                Ok(ExecuteOutput {
                    reply: reply_bytes(&KvReply::Value(value)),
                    updates: UpdateSet::new(),
                })
            }
        }
    }
}

pub(crate) fn tagged(key: &[u8]) -> Bytes {
    let mut bytes = vec![APP_TAG];
    bytes.extend_from_slice(key);
    Bytes::from(bytes)
}

fn reply_bytes(reply: &KvReply) -> Bytes {
    Bytes::from(reply.try_to_vec().unwrap())
}

#[allow(dead_code)]
pub(crate) fn put_request(pairs: &[(&str, &str)]) -> Bytes {
    let request = KvRequest::Put {
        pairs: pairs
            .iter()
            .map(|(k, v)| (k.as_bytes().to_vec(), v.as_bytes().to_vec()))
            .collect(),
    };
    Bytes::from(request.try_to_vec().unwrap())
}

#[allow(dead_code)]
pub(crate) fn get_request(key: &str) -> Bytes {
    Bytes::from(
        KvRequest::Get {
            key: key.as_bytes().to_vec(),
        }
        .try_to_vec()
        .unwrap(),
    )
}

#[allow(dead_code)]
pub(crate) fn execute_request(
    sequence_number: u64,
    read_only: bool,
    request: Bytes,
) -> ExecuteRequest {
    ExecuteRequest {
        client_id: ClientId::new(1),
        sequence_number: SeqNum::new(sequence_number),
        read_only,
        request,
        max_reply_size: 1024,
    }
}

/// Consensus engine stub: remembers only its last executed sequence number.
pub(crate) struct StubEngine {
    pub(crate) last_executed: SeqNum,
}

impl ConsensusEngine for StubEngine {
    fn start(&mut self) -> Result<(), EngineError> {
        Ok(())
    }

    fn stop(&mut self) {}

    fn last_executed_sequence_number(&self) -> SeqNum {
        self.last_executed
    }
}
