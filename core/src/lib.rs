pub mod bucket;
pub mod cache;
pub mod config;
pub mod controller;
pub mod engine;
pub mod error;
pub mod gaps;
pub mod history;
pub mod load;
pub mod render;
pub mod session;
pub mod source;
pub mod store;
pub mod synth;
pub mod types;
pub mod window;

pub use bucket::{aggregate, resample};
pub use config::{EngineConfig, StoreConfig};
pub use controller::{CycleOutcome, CycleReport, CycleStats, ReplayController};
pub use engine::{Control, Engine};
pub use error::{ConfigError, FetchError, LoadError, RecordError, StoreError};
pub use load::{load_bars_csv, load_bars_parquet, load_ticks_csv, load_ticks_parquet};
pub use render::{CollectingSink, Frame, RenderableSeries, SeriesSink};
pub use source::{Fetched, RecordedSource, StoreSource, TickSource};
pub use store::{DataRange, DuckDbStore, StorageMode};
pub use types::{Bucket, ColumnMapping, Interval, LoadOptions, Mode, RawTick, Tick};
pub use window::{LagPolicy, Window, WindowBuffer};
