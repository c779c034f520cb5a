pub mod features;
pub mod shared;

// Re-export the built-in datasets
pub use features::host::{HostCollector, HostInformation};
pub use features::login::{LoginCollector, LoginRecord, LoginRecordType};
pub use features::packages::{Package, PackagesCollector};
pub use features::processes::{ProcessInformation, ProcessesCollector};
pub use features::user::{User, UserCollector};
pub use features::{register_builtin, BuiltinOptions};

// Re-export shared functionality
pub use shared::config::{AgentConfig, DatasetConfig, OutputConfig};
pub use shared::error::{
    AgentError,
    CollectionError,
    ConfigError,
    NormalizationError,
    RegistryError,
    SinkError,
};
pub use shared::event::{normalize, Event, EventNormalizer, HostFacts};
pub use shared::record::{Collection, FieldValue, RawRecord};
pub use shared::registry::{CollectorDescriptor, CollectorRegistry};
pub use shared::scheduler::{Scheduler, SchedulerOptions, StatsSnapshot};
pub use shared::sink::{ConsoleSink, EventSink, FileSink, MemorySink};
pub use shared::traits::{CollectContext, DataCollector, Validatable};
