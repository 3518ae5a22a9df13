pub mod config;
pub mod context;
pub mod controller;
pub mod error;
pub mod notify;
pub mod pool;
pub mod registry;
pub mod render;
pub mod scene;
pub mod streaming;
pub mod tokens;
pub mod transform;
pub mod types;

pub use config::{ContextConfig, ImageryOptions, ResourceConfig, StreamerConfig, TilesetOptions};
pub use context::{Context, TilesetHandle};
pub use controller::{Services, TilesetController, TilesetStatistics};
pub use error::{Result, StreamError};
pub use scene::{MemoryStage, SceneHost, ScenePath};
