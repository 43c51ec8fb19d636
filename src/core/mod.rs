//! Sync core: token handling, the remote client, mapping, sync and doctor.

pub mod api;
pub mod clock;
pub mod doctor;
pub mod http;
pub mod hub;
pub mod logging;
pub mod mapping;
pub mod models;
pub mod range;
pub mod retry;
pub mod sync;
pub mod token;

pub use api::{KiwifyClient, RecordSource};
pub use clock::{Clock, SystemClock};
pub use doctor::{BackfillDoctor, DoctorReport, DoctorRequest, FieldMismatch};
pub use hub::Hub;
pub use models::{Resource, SyncCursor, SyncFailure, SyncResult};
pub use range::SyncRange;
pub use sync::{ResyncResult, SyncEngine, SyncRequest, SyncSettings};
pub use token::{AccessTokenMetadata, TokenManager};
