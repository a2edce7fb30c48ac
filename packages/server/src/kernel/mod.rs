// Kernel - core infrastructure with dependency injection
//
// Holds the orchestrator machinery and the trait seams to external
// collaborators (source network, metadata catalog). Business logic belongs
// in domain layers, not here.

pub mod clock;
pub mod deps;
pub mod events;
pub mod jobs;
pub mod soulseek;
pub mod spotify;
pub mod test_dependencies;
pub mod traits;

pub use clock::{Clock, Jitter, ManualClock, SharedClock, SystemClock};
pub use deps::{ServerDeps, WatchlistPolicy};
pub use events::{CapturingEventSink, EventSink, TracingEventSink, WorkerEvent};
pub use soulseek::SoulseekAdapter;
pub use spotify::SpotifyClient;
pub use test_dependencies::{MockMetadataProvider, MockSourceProvider};
pub use traits::{
    AlbumRef, Candidate, MetadataProvider, ProviderError, SourceProvider, TrackRef, TransferState,
};
