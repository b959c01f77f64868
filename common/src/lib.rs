pub mod climate;
pub mod command;
pub mod config;
pub mod dispatcher;
pub mod memory;
pub mod mesh;
pub mod nodes;
pub mod packet;
pub mod safety;
pub mod store;
pub mod topics;
pub mod types;

pub use climate::{ClimateSettings, RestoredAcState};
pub use command::{ClientCommand, CommandError, Reply};
pub use config::{GatewayConfig, NodeConfig, RetryPolicy};
pub use dispatcher::Dispatcher;
pub use memory::{LoopbackTransport, MemoryStore};
pub use mesh::{InboundFrame, MeshAdapter, MeshTransport, TransportError};
pub use nodes::{NodeRegistry, NodeSnapshot};
pub use packet::{decode, encode, CodecError, Packet, PacketKey, PacketValue};
pub use safety::{SafetyAction, SafetySupervisor};
pub use store::{
    AcStateEvent, NodeStatusRecord, PersistenceGateway, SettingKey, StoreError, StoredSettings,
};
pub use types::{FreshnessState, HealthState, Moment, NodeId};
