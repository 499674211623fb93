pub mod feed;
pub mod item;
pub mod run;
pub mod unavailable;

pub use feed::Feed;
pub use item::{Item, ItemUpgrade, NewItem, Source, Tag, TagKind};
pub use run::{
    Counters, PrimaryCounters, RunOutcome, RunState, RunStatus, SecondaryCounters, SecondaryRun,
    SyncRun,
};
pub use unavailable::UnavailableRecord;
