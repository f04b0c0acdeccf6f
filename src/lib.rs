pub mod curve;
pub mod ecies;
pub mod error;
pub mod keyfile;
pub mod protocols;
pub mod tag;
pub mod tagdb;

pub use error::{Result, TagTrailError, VerifyFailure};
pub use keyfile::{
    BaselineConfig, RfChainConfig, StepAuthConfig, TrackerConfig,
};
pub use protocols::baseline::Baseline;
pub use protocols::rfchain::{ChainPayload, RfChain};
pub use protocols::stepauth::StepAuth;
pub use protocols::tracker::Tracker;
pub use protocols::Scheme;
pub use tag::{EventKind, OnlineStorage, StorageEntry, Tag, TagEvent, TagLock};
pub use tagdb::{OnlineSecret, TagDb};
