//! Object-store transfer clients
//!
//! Direct uploads go to presigned URLs over reqwest; range copies use the
//! AWS SDK because they need signed requests.

pub mod copy;
pub mod part;
pub mod payload;
pub mod presigned;

pub use copy::{load_s3_config, new_object_key, RangeCopyTransfer};
pub use part::{Destination, PartResult, PartTimings, PartTransfer, TransferFactory, WorkUnit};
pub use payload::PayloadSource;
pub use presigned::{store_http_client, PresignedPutTransfer};
