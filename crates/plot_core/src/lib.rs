pub mod consts;
pub mod errors;
pub mod utils;
pub mod digest;
pub mod nonce;
pub mod layout;
pub mod block;
pub mod bucket;
pub mod progress;
pub mod generator;
pub mod config;
pub mod merge;
pub mod meta;
pub mod builder;
pub mod lookup;
pub mod verify;
pub mod dump;

pub use builder::{build_store, BuildReport};
pub use config::{BuildConfig, BuildPlan};
pub use digest::DigestKind;
pub use dump::{FillStats, IndexedRecord, MappedStore};
pub use errors::{PlotError, Result};
pub use layout::{placement, prefix_bytes, Record, StoreLayout};
pub use lookup::{lookup, StoreReader};
pub use meta::StoreMeta;
pub use verify::{verify, verify_with_layout, Sample, VerifyOptions, VerifyReport};
