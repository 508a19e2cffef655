/*
    Copyright © 2023, ParallelChain Lab
    Licensed under the Apache License, Version 2.0: http://www.apache.org/licenses/LICENSE-2.0
*/

//! The time contract: a state machine that derives a single trustworthy
//! "now" from signed per-source time samples, and the canonical example of a
//! sub-module whose state rides inside the block stream.
//!
//! Each replica operator runs a time source that periodically publishes its
//! clock reading, signed. The contract keeps the latest sample per source
//! and summarizes them as the median, so that up to half the sources can be
//! faulty or malicious without dragging the summary. Samples only move
//! forward: an older reading from a known source is ignored.
//!
//! The contract's serialized samples are stored under the reserved
//! [`TIME_SAMPLES_KEY`](crate::store::paths::TIME_SAMPLES_KEY) and injected
//! into the next appended block whenever they change, via
//! [`TimeStateProvider`]. Loading is lazy: the first read in a contract's
//! lifetime pulls the latest stored samples.

use std::collections::BTreeMap;
use std::fmt::{self, Display, Formatter};
use std::sync::{Arc, Mutex};

use borsh::{BorshDeserialize, BorshSerialize};
use bytes::Bytes;

use crate::app::ReadOnlyStorage;
use crate::replica::BlockStateProvider;
use crate::store::blockchain::BlockStoreError;
use crate::store::paths;

const TIME_STORAGE_VERSION: u32 = 1;

/// Verifies time sample signatures and knows the registered source ids.
/// Supplied by the environment; signature schemes are not this module's
/// business.
pub trait TimeVerifier: Send + 'static {
    fn has_time_source(&self, source: &str) -> bool;

    fn verify(&self, source: &str, time: u64, signature: &[u8]) -> bool;

    /// The registered source ids, used to seed an empty contract.
    fn time_source_ids(&self) -> Vec<String>;
}

#[derive(Clone, Debug, PartialEq, Eq, BorshDeserialize, BorshSerialize)]
struct Sample {
    time: u64,
    signature: Vec<u8>,
}

/// The serialized form of the contract's samples. A `BTreeMap` keyed by
/// source id keeps the encoding deterministic across replicas.
#[derive(BorshDeserialize, BorshSerialize)]
struct TimeStorage {
    version: u32,
    samples: BTreeMap<String, Sample>,
}

pub struct TimeContract<V: TimeVerifier> {
    verifier: V,
    samples: Option<BTreeMap<String, Sample>>,
    changed: bool,
}

impl<V: TimeVerifier> TimeContract<V> {
    pub fn new(verifier: V) -> TimeContract<V> {
        TimeContract {
            verifier,
            samples: None,
            changed: false,
        }
    }

    /// Add a sample to the contract and return the updated summary.
    ///
    /// Samples from unknown sources are ignored, as are samples with invalid
    /// signatures and samples older than what the source already reported.
    pub fn update(
        &mut self,
        storage: &dyn ReadOnlyStorage,
        source: &str,
        time: u64,
        signature: &[u8],
    ) -> Result<u64, TimeError> {
        self.load_latest_samples(storage)?;

        let samples = self.samples.as_mut().unwrap();
        match samples.get_mut(source) {
            Some(sample) => {
                if self.verifier.verify(source, time, signature) {
                    if time > sample.time {
                        sample.time = time;
                        sample.signature = signature.to_vec();
                        self.changed = true;
                    }
                } else {
                    log::warn!(
                        "ignoring time sample with invalid signature claiming to be from source \"{}\"",
                        source
                    );
                }
            }
            None => {
                log::warn!("ignoring sample from unknown source \"{}\"", source);
            }
        }

        Ok(self.summarize_time())
    }

    /// The current time at the latest block, including any updates applied
    /// since this contract was instantiated.
    pub fn get_time(&mut self, storage: &dyn ReadOnlyStorage) -> Result<u64, TimeError> {
        self.load_latest_samples(storage)?;
        Ok(self.summarize_time())
    }

    /// The latest sample of every source.
    pub fn samples(
        &mut self,
        storage: &dyn ReadOnlyStorage,
    ) -> Result<Vec<(String, u64)>, TimeError> {
        self.load_latest_samples(storage)?;
        Ok(self
            .samples
            .as_ref()
            .unwrap()
            .iter()
            .map(|(source, sample)| (source.clone(), sample.time))
            .collect())
    }

    /// Whether the samples changed since the last serialization.
    pub fn changed(&self) -> bool {
        self.changed
    }

    /// Forget loaded samples and pending changes; the next read reloads from
    /// storage.
    pub fn reset(&mut self) {
        self.samples = None;
        self.changed = false;
    }

    /// The serialized samples, for injection into the next block. Clears the
    /// changed flag.
    pub fn serialize(&mut self) -> Bytes {
        let samples = self
            .samples
            .clone()
            .expect("serialize is only called after samples changed, which loads them");
        let storage = TimeStorage {
            version: TIME_STORAGE_VERSION,
            samples,
        };
        self.changed = false;
        Bytes::from(
            storage
                .try_to_vec()
                .expect("TimeStorage serialization cannot fail"),
        )
    }

    /// Combine samples into a single definition of "now": the median, with
    /// the mean of the two middle samples for even counts. Samples must have
    /// been loaded.
    fn summarize_time(&self) -> u64 {
        let samples = self.samples.as_ref().expect("samples are loaded");
        if samples.is_empty() {
            return 0;
        }

        let mut times: Vec<u64> = samples.values().map(|sample| sample.time).collect();
        times.sort_unstable();

        let middle = times.len() / 2;
        if times.len() % 2 == 0 {
            (times[middle] + times[middle - 1]) / 2
        } else {
            times[middle]
        }
    }

    /// Load samples from storage, if they haven't been already.
    ///
    /// A sample with time 0 and an empty signature is accepted for a
    /// recognized source: it only means no reading arrived before the stored
    /// state was written. Anything else failing verification is an error;
    /// stored state this replica cannot trust is not recoverable here.
    fn load_latest_samples(&mut self, storage: &dyn ReadOnlyStorage) -> Result<(), TimeError> {
        if self.samples.is_some() {
            // Already loaded; loading again could overwrite updates that
            // have been applied since.
            return Ok(());
        }

        let raw = storage
            .get_latest(&paths::TIME_SAMPLES_KEY)
            .map_err(|source| TimeError::Store { source })?;

        let samples = match raw {
            Some((value, _)) => {
                let stored = TimeStorage::deserialize(&mut &*value)
                    .map_err(|source| TimeError::MalformedStorage { source })?;
                if stored.version != TIME_STORAGE_VERSION {
                    return Err(TimeError::UnknownVersion {
                        version: stored.version,
                    });
                }
                for (source, sample) in &stored.samples {
                    let blank = sample.time == 0
                        && sample.signature.is_empty()
                        && self.verifier.has_time_source(source);
                    if !blank && !self.verifier.verify(source, sample.time, &sample.signature) {
                        log::error!(
                            "time storage contained invalid signature for sample claimed to be from source: {}",
                            source
                        );
                        return Err(TimeError::InvalidStoredSample {
                            source: source.clone(),
                        });
                    }
                }
                stored.samples
            }
            None => {
                let mut samples = BTreeMap::new();
                for source in self.verifier.time_source_ids() {
                    samples.insert(
                        source,
                        Sample {
                            time: 0,
                            signature: Vec::new(),
                        },
                    );
                }
                log::info!("initializing time contract with {} sources", samples.len());
                samples
            }
        };

        self.samples = Some(samples);
        Ok(())
    }
}

/// Adapter that lets a shared time contract ride inside appended blocks.
/// Register it with [`Replica::register_state_provider`]
/// (crate::replica::Replica::register_state_provider).
pub struct TimeStateProvider<V: TimeVerifier>(pub Arc<Mutex<TimeContract<V>>>);

impl<V: TimeVerifier> BlockStateProvider for TimeStateProvider<V> {
    fn state_key(&self) -> Bytes {
        Bytes::from_static(&paths::TIME_SAMPLES_KEY)
    }

    fn take_state_if_changed(&mut self) -> Option<Bytes> {
        let mut contract = self.0.lock().unwrap();
        if contract.changed() {
            Some(contract.serialize())
        } else {
            None
        }
    }
}

#[derive(Debug)]
pub enum TimeError {
    /// The stored samples carry a version this implementation doesn't know.
    UnknownVersion { version: u32 },
    /// The stored samples failed to deserialize.
    MalformedStorage { source: std::io::Error },
    /// A stored sample carries an invalid signature.
    InvalidStoredSample { source: String },
    Store { source: BlockStoreError },
}

impl Display for TimeError {
    fn fmt(&self, f: &mut Formatter<'_>) -> fmt::Result {
        match self {
            TimeError::UnknownVersion { version } => {
                write!(f, "unknown time storage version: {}", version)
            }
            TimeError::MalformedStorage { source } => {
                write!(f, "unable to parse time storage: {}", source)
            }
            TimeError::InvalidStoredSample { source } => write!(
                f,
                "time storage contains a sample with an invalid signature from source {}",
                source
            ),
            TimeError::Store { source } => write!(f, "{}", source),
        }
    }
}
